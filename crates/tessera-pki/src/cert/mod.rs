//! 已签发证书
//!
//! `Certificate`是签发结果的记录：DER字节签发后不可变，只有撤销会修改它。
//! DER的解析是显式的两态：`CertificateData::Raw`只有字节，第一次调用
//! `parse`后变为`CertificateData::Parsed`并缓存解析结果。

use der::{Decode, Encode};
use time::OffsetDateTime;
use uuid::Uuid;
use x509_cert::Certificate as X509Certificate;

use crate::{
    asn1,
    error::{PkiError, Result},
    extension::{Extension, ExtensionKind, ExtensionValue},
    name::Subject,
    types::{CertificateKind, Revocation, RevocationReason},
};

/// 证书DER及其（可选的）解析结果
#[derive(Debug, Clone)]
pub enum CertificateData {
    /// 仅有原始字节
    Raw(Vec<u8>),
    /// 原始字节与解析结果
    Parsed {
        der: Vec<u8>,
        parsed: Box<X509Certificate>,
    },
}

impl CertificateData {
    pub fn from_der(der: Vec<u8>) -> Self {
        CertificateData::Raw(der)
    }

    /// 已解析的证书，直接保存两种形式
    pub fn from_parsed(parsed: X509Certificate) -> Result<Self> {
        let der = parsed.to_der()?;
        Ok(CertificateData::Parsed {
            der,
            parsed: Box::new(parsed),
        })
    }

    pub fn der(&self) -> &[u8] {
        match self {
            CertificateData::Raw(der) | CertificateData::Parsed { der, .. } => der,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, CertificateData::Parsed { .. })
    }

    /// 已解析时返回解析结果，不触发解析
    pub fn parsed(&self) -> Option<&X509Certificate> {
        match self {
            CertificateData::Parsed { parsed, .. } => Some(parsed),
            CertificateData::Raw(_) => None,
        }
    }

    /// 解析DER并缓存结果；已解析时直接返回
    pub fn parse(&mut self) -> Result<&X509Certificate> {
        if let CertificateData::Raw(der) = self {
            let parsed = X509Certificate::from_der(der)
                .map_err(|e| PkiError::CertError(format!("Failed to parse certificate: {}", e)))?;
            let der = std::mem::take(der);
            *self = CertificateData::Parsed {
                der,
                parsed: Box::new(parsed),
            };
        }
        match self {
            CertificateData::Parsed { parsed, .. } => Ok(parsed),
            CertificateData::Raw(_) => Err(PkiError::CertError(
                "certificate data is not parsed".to_string(),
            )),
        }
    }
}

/// 签发的证书记录
#[derive(Debug, Clone)]
pub struct Certificate {
    pub id: Uuid,
    /// 签发CA
    pub ca_id: Uuid,
    /// 大写十六进制序列号，在签发CA内唯一
    pub serial: String,
    pub profile: String,
    pub subject: Subject,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub kind: CertificateKind,
    pub revocation: Option<Revocation>,
    data: CertificateData,
}

impl Certificate {
    pub(crate) fn issued(
        ca_id: Uuid,
        profile: &str,
        subject: Subject,
        kind: CertificateKind,
        certificate: X509Certificate,
    ) -> Result<Self> {
        let tbs = &certificate.tbs_certificate;
        Ok(Self {
            id: Uuid::new_v4(),
            ca_id,
            serial: asn1::serial_to_hex(&tbs.serial_number),
            profile: profile.to_string(),
            subject,
            not_before: asn1::from_x509_time(&tbs.validity.not_before)?,
            not_after: asn1::from_x509_time(&tbs.validity.not_after)?,
            kind,
            revocation: None,
            data: CertificateData::from_parsed(certificate)?,
        })
    }

    /// 从保存的DER恢复记录；解析一次以取得序列号、主体和有效期
    pub fn from_der(ca_id: Uuid, profile: &str, der: Vec<u8>) -> Result<Self> {
        let mut data = CertificateData::from_der(der);
        let tbs = &data.parse()?.tbs_certificate;
        let is_ca = tbs
            .extensions
            .iter()
            .flatten()
            .filter_map(|ext| Extension::from_x509(ext).ok().flatten())
            .any(|ext| matches!(ext.value, ExtensionValue::BasicConstraints { ca: true, .. }));
        let serial = asn1::serial_to_hex(&tbs.serial_number);
        let subject = Subject::from_name(&tbs.subject)?;
        let not_before = asn1::from_x509_time(&tbs.validity.not_before)?;
        let not_after = asn1::from_x509_time(&tbs.validity.not_after)?;

        Ok(Self {
            id: Uuid::new_v4(),
            ca_id,
            serial,
            profile: profile.to_string(),
            subject,
            not_before,
            not_after,
            kind: if is_ca {
                CertificateKind::Ca
            } else {
                CertificateKind::EndEntity
            },
            revocation: None,
            data,
        })
    }

    pub fn data(&self) -> &CertificateData {
        &self.data
    }

    pub fn der(&self) -> &[u8] {
        self.data.der()
    }

    /// PEM只是同一份DER的重新编码
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der().to_vec()))
    }

    pub fn parsed(&mut self) -> Result<&X509Certificate> {
        self.data.parse()
    }

    /// 证书中本crate支持的扩展
    pub fn extensions(&mut self) -> Result<Vec<Extension>> {
        let parsed = self.data.parse()?;
        let mut extensions = Vec::new();
        for ext in parsed.tbs_certificate.extensions.iter().flatten() {
            if let Some(extension) = Extension::from_x509(ext)? {
                extensions.push(extension);
            }
        }
        Ok(extensions)
    }

    pub fn extension(&mut self, kind: ExtensionKind) -> Result<Option<Extension>> {
        Ok(self
            .extensions()?
            .into_iter()
            .find(|extension| extension.kind() == kind))
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation.is_some()
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.not_after
    }

    /// 撤销证书；撤销是终态，再次撤销返回`CertificateRevoked`且不修改原记录
    pub fn revoke(
        &mut self,
        reason: RevocationReason,
        compromised: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<&Revocation> {
        if let Some(existing) = &self.revocation {
            return Err(PkiError::CertificateRevoked(format!(
                "{} was already revoked at {} ({})",
                self.serial, existing.revoked_at, existing.reason
            )));
        }
        Ok(self.revocation.insert(Revocation {
            reason,
            revoked_at: now,
            compromised,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tessera_key::Ed25519Key;
    use time::macros::datetime;

    use super::*;
    use crate::{ca::CertificateAuthority, settings::Settings};

    fn sample() -> Certificate {
        let settings = Arc::new(Settings::default());
        let ca = CertificateAuthority::init_root(
            "Test Root",
            "CN=Test Root".parse().unwrap(),
            Arc::new(Ed25519Key::generate().unwrap()),
            3650,
            None,
            settings,
        )
        .unwrap();
        Certificate::from_der(ca.id(), "ca", ca.certificate_der().to_vec()).unwrap()
    }

    #[test]
    fn test_parse_is_explicit_and_memoized() {
        let root = sample();
        let mut data = CertificateData::from_der(root.der().to_vec());
        assert!(!data.is_parsed());
        assert!(data.parsed().is_none());
        data.parse().unwrap();
        assert!(data.is_parsed());
        assert_eq!(data.der(), root.der());
    }

    #[test]
    fn test_invalid_der_stays_raw() {
        let mut data = CertificateData::from_der(vec![0x30, 0x01, 0x00]);
        assert!(data.parse().is_err());
        assert!(!data.is_parsed());
    }

    #[test]
    fn test_restored_record() {
        let mut root = sample();
        assert_eq!(root.serial, "1");
        assert_eq!(root.kind, CertificateKind::Ca);
        assert_eq!(root.subject.common_name(), Some("Test Root"));
        assert!(root.to_pem().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(root
            .extension(ExtensionKind::SubjectKeyIdentifier)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_second_revocation_keeps_original() {
        let mut cert = sample();
        let first = datetime!(2030-01-01 00:00 UTC);
        cert.revoke(RevocationReason::KeyCompromise, None, first).unwrap();

        let err = cert
            .revoke(
                RevocationReason::Superseded,
                None,
                datetime!(2031-01-01 00:00 UTC),
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::CertificateRevoked(_)));
        let revocation = cert.revocation.as_ref().unwrap();
        assert_eq!(revocation.reason, RevocationReason::KeyCompromise);
        assert_eq!(revocation.revoked_at, first);
    }
}
