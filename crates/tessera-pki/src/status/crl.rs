//! 证书撤销列表
//!
//! `build_crl`是纯函数：相同的条目、CRL编号和时间戳总是产生相同的TBS。
//! 条目按序列号数值排序，过期证书的条目被丢弃。

use std::fmt;

use der::{
    asn1::{GeneralizedTime, OctetString},
    Decode, Encode,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use x509_cert::{
    certificate::Version,
    crl::{CertificateList, RevokedCert, TbsCertList},
    ext::Extension as X509Extension,
};

use super::revocation::RevocationEntry;
use crate::{
    asn1::{self, CrlReason, DistributionPointName, IssuingDistributionPoint},
    builder,
    ca::CertificateAuthority,
    error::{PkiError, Result},
    extension::{AuthorityKeyIdentifier, Extension, ExtensionValue, GeneralName},
    oid,
    types::{CertificateKind, RevocationReason},
};

/// CRL覆盖的证书范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrlScope {
    /// 所有证书
    All,
    /// 仅终端实体证书
    User,
    /// 仅CA证书
    Ca,
}

impl CrlScope {
    pub fn includes(&self, kind: CertificateKind) -> bool {
        match self {
            CrlScope::All => true,
            CrlScope::User => kind == CertificateKind::EndEntity,
            CrlScope::Ca => kind == CertificateKind::Ca,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CrlScope::All => "all",
            CrlScope::User => "user",
            CrlScope::Ca => "ca",
        }
    }
}

impl fmt::Display for CrlScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 签名后的CRL
#[derive(Debug, Clone)]
pub struct SignedCrl {
    pub scope: CrlScope,
    pub number: u64,
    pub this_update: OffsetDateTime,
    pub next_update: OffsetDateTime,
    /// 条目数
    pub entries: usize,
    der: Vec<u8>,
}

impl SignedCrl {
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("X509 CRL", self.der.clone()))
    }

    pub fn parse(&self) -> Result<CertificateList> {
        CertificateList::from_der(&self.der)
            .map_err(|e| PkiError::CRLError(format!("Failed to parse CRL: {}", e)))
    }
}

fn raw_extension(extn_id: der::asn1::ObjectIdentifier, critical: bool, der: Vec<u8>) -> Result<X509Extension> {
    Ok(X509Extension {
        extn_id,
        critical,
        extn_value: OctetString::new(der)?,
    })
}

fn revoked_cert(entry: &RevocationEntry) -> Result<RevokedCert> {
    let mut extensions = Vec::new();
    if entry.reason != RevocationReason::Unspecified {
        extensions.push(raw_extension(
            oid::CRL_REASON,
            false,
            CrlReason::from(entry.reason).to_der()?,
        )?);
    }
    if let Some(compromised) = entry.compromised {
        let date: GeneralizedTime = asn1::to_generalized_time(compromised)?;
        extensions.push(raw_extension(oid::INVALIDITY_DATE, false, date.to_der()?)?);
    }
    Ok(RevokedCert {
        serial_number: asn1::serial_from_hex(&entry.serial)?,
        revocation_date: asn1::to_x509_time(entry.revoked_at)?,
        crl_entry_extensions: if extensions.is_empty() {
            None
        } else {
            Some(extensions)
        },
    })
}

/// 范围受限或CA配置了CRL地址时才需要IDP
fn issuing_distribution_point(
    ca: &CertificateAuthority,
    scope: CrlScope,
) -> Result<Option<X509Extension>> {
    let names = ca.config().crl_names()?;
    if scope == CrlScope::All && names.is_empty() {
        return Ok(None);
    }
    let distribution_point = if names.is_empty() {
        None
    } else {
        Some(DistributionPointName::FullName(
            names
                .iter()
                .map(GeneralName::to_x509)
                .collect::<Result<Vec<_>>>()?,
        ))
    };
    let idp = IssuingDistributionPoint {
        distribution_point,
        only_contains_user_certs: scope == CrlScope::User,
        only_contains_ca_certs: scope == CrlScope::Ca,
        only_some_reasons: None,
        indirect_crl: false,
        only_contains_attribute_certs: false,
    };
    Ok(Some(raw_extension(
        oid::ISSUING_DISTRIBUTION_POINT,
        true,
        idp.to_der()?,
    )?))
}

/// 构建并签名CRL
///
/// `entries`按范围过滤并丢弃在`this_update`时已过期的证书，其余按序列号
/// 数值排序。
pub fn build_crl(
    ca: &CertificateAuthority,
    scope: CrlScope,
    entries: &[RevocationEntry],
    number: u64,
    this_update: OffsetDateTime,
    next_update: OffsetDateTime,
) -> Result<SignedCrl> {
    if next_update <= this_update {
        return Err(PkiError::CRLError(
            "next_update must be after this_update".to_string(),
        ));
    }
    let signer = ca.signing_key()?;
    let algorithm = ca.signature_algorithm(None)?;

    let mut included: Vec<&RevocationEntry> = entries
        .iter()
        .filter(|entry| scope.includes(entry.kind) && entry.not_after > this_update)
        .collect();
    included.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    let revoked = included
        .iter()
        .map(|entry| revoked_cert(entry))
        .collect::<Result<Vec<_>>>()?;

    let mut crl_extensions = vec![
        Extension::new(ExtensionValue::AuthorityKeyIdentifier(AuthorityKeyIdentifier {
            key_identifier: Some(ca.subject_key_identifier().to_vec()),
            ..Default::default()
        }))
        .to_x509()?,
        Extension::new(ExtensionValue::CrlNumber(number)).to_x509()?,
    ];
    crl_extensions.extend(issuing_distribution_point(ca, scope)?);

    let tbs_cert_list = TbsCertList {
        version: Version::V2,
        signature: algorithm.algorithm_identifier()?,
        issuer: ca.certificate().tbs_certificate.subject.clone(),
        this_update: asn1::to_x509_time(this_update)?,
        next_update: Some(asn1::to_x509_time(next_update)?),
        revoked_certificates: if revoked.is_empty() {
            None
        } else {
            Some(revoked)
        },
        crl_extensions: Some(crl_extensions),
    };
    let signature = builder::sign_der(signer.as_ref(), algorithm, &tbs_cert_list)?;
    let list = CertificateList {
        tbs_cert_list,
        signature_algorithm: algorithm.algorithm_identifier()?,
        signature,
    };

    info!(
        ca = %ca.name(),
        scope = %scope,
        number,
        entries = included.len(),
        "Signed CRL"
    );
    Ok(SignedCrl {
        scope,
        number,
        this_update,
        next_update,
        entries: included.len(),
        der: list.to_der()?,
    })
}
