//! 证书构建与签名
//!
//! `issue`把模板合并后的扩展、CA配置和调用者的参数组合成TBSCertificate并用
//! CA私钥签名。所有前置检查（CA状态、私钥、算法、公钥长度、有效期）都在
//! 分配序列号和签名之前完成，失败时不会留下任何状态。

use std::collections::BTreeMap;

use der::{asn1::BitString, Decode, Encode};
use sha2::{Digest, Sha256};
use tessera_key::{Algorithm, HashAlgorithm, KeySign, PublicKey, SignatureAlgorithm, SigningKey};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};
use x509_cert::{
    certificate::{TbsCertificate, Version},
    ext::Extensions,
    name::Name,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
    Certificate as X509Certificate,
};

use crate::{
    asn1,
    ca::CertificateAuthority,
    cert::Certificate,
    csr::Csr,
    error::{PkiError, ProfileError, Result},
    extension::{
        overrides_from_wire, AuthorityKeyIdentifier, Extension, ExtensionKind, ExtensionOverride,
        ExtensionValue, GeneralName,
    },
    name::Subject,
    profile::ResolvedExtensions,
    types::CertificateKind,
};

/// 被签发证书的公钥来源
#[derive(Debug, Clone)]
pub enum SubjectKey {
    /// CSR，签发前校验其自签名
    Csr(Box<Csr>),
    /// SubjectPublicKeyInfo DER
    Spki(Vec<u8>),
}

impl SubjectKey {
    /// 解析PEM或DER格式的CSR
    pub fn from_csr_bytes(data: &[u8]) -> Result<Self> {
        Ok(SubjectKey::Csr(Box::new(Csr::parse(data)?)))
    }

    pub fn from_public_key(key: &PublicKey) -> Result<Self> {
        Ok(SubjectKey::Spki(key.to_spki_der()?))
    }

    fn spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        match self {
            SubjectKey::Csr(csr) => {
                csr.verify_signature()?;
                Ok(csr.spki().clone())
            }
            SubjectKey::Spki(der) => SubjectPublicKeyInfoOwned::from_der(der)
                .map_err(|e| PkiError::CertError(format!("Failed to parse public key: {}", e))),
        }
    }
}

/// 签发参数中与模板无关的部分
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    /// 有效期（天），未设置时使用模板或全局默认值
    pub validity_days: Option<u32>,
    /// 显式摘要算法
    pub hash: Option<HashAlgorithm>,
}

/// 签发请求
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub subject: Subject,
    pub key: SubjectKey,
    /// 模板名称，未设置时使用CA或全局默认模板
    pub profile: Option<String>,
    /// 调用者的扩展覆盖
    pub extensions: BTreeMap<ExtensionKind, ExtensionOverride>,
    pub options: IssueOptions,
}

impl IssueRequest {
    pub fn new(subject: Subject, key: SubjectKey) -> Self {
        Self {
            subject,
            key,
            profile: None,
            extensions: BTreeMap::new(),
            options: IssueOptions::default(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// 线格式的扩展覆盖，键为扩展名
    pub fn with_wire_extensions(mut self, overrides: &serde_json::Value) -> Result<Self> {
        self.extensions = overrides_from_wire(overrides)?;
        Ok(self)
    }

    pub fn with_extension(mut self, extension: ExtensionOverride) -> Self {
        self.extensions.insert(extension.kind(), extension);
        self
    }

    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.options.validity_days = Some(days);
        self
    }

    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.options.hash = Some(hash);
        self
    }
}

/// RFC 7093 method 1: leftmost 160 bits of the SHA-256 of the key bits
pub fn key_identifier(spki: &SubjectPublicKeyInfoOwned) -> Vec<u8> {
    Sha256::digest(spki.subject_public_key.raw_bytes())[..20].to_vec()
}

/// 对DER编码的待签名结构签名
pub(crate) fn sign_der<T: Encode>(
    key: &dyn SigningKey,
    algorithm: SignatureAlgorithm,
    tbs: &T,
) -> Result<BitString> {
    let message = tbs.to_der()?;
    let signature = key
        .sign(algorithm, &message)
        .map_err(|e| PkiError::SigningError(format!("Failed to sign with {}: {}", algorithm, e)))?;
    Ok(BitString::from_bytes(&signature)?)
}

/// 证书内容，CA初始化与普通签发共用
pub(crate) struct CertificateParams<'a> {
    pub serial: &'a str,
    pub issuer: Name,
    pub subject: Name,
    pub public_key: SubjectPublicKeyInfoOwned,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub extensions: Vec<Extension>,
}

/// 组装TBSCertificate并签名
pub(crate) fn sign_certificate(
    key: &dyn SigningKey,
    algorithm: SignatureAlgorithm,
    params: CertificateParams<'_>,
) -> Result<X509Certificate> {
    let extensions = params
        .extensions
        .iter()
        .map(Extension::to_x509)
        .collect::<Result<Extensions>>()?;

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: asn1::serial_from_hex(params.serial)?,
        signature: algorithm.algorithm_identifier()?,
        issuer: params.issuer,
        validity: Validity {
            not_before: asn1::to_x509_time(params.not_before)?,
            not_after: asn1::to_x509_time(params.not_after)?,
        },
        subject: params.subject,
        subject_public_key_info: params.public_key,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: if extensions.is_empty() {
            None
        } else {
            Some(extensions)
        },
    };

    let signature = sign_der(key, algorithm, &tbs_certificate)?;
    Ok(X509Certificate {
        tbs_certificate,
        signature_algorithm: algorithm.algorithm_identifier()?,
        signature,
    })
}

/// CN复制到SAN；无法作为通用名称解析的CN被跳过
fn copy_common_names(subject: &Subject, extensions: &mut ResolvedExtensions) -> Result<()> {
    let mut names = match extensions.get(ExtensionKind::SubjectAlternativeName) {
        Some(Extension {
            value: ExtensionValue::SubjectAlternativeName(names),
            ..
        }) => names.clone(),
        _ => Vec::new(),
    };
    let critical = extensions
        .get(ExtensionKind::SubjectAlternativeName)
        .map(|ext| ext.critical)
        .unwrap_or(false);

    let mut changed = false;
    for cn in subject.common_names() {
        match GeneralName::parse(cn) {
            Ok(name) if !names.contains(&name) => {
                names.push(name);
                changed = true;
            }
            Ok(_) => {}
            Err(e) => debug!(common_name = cn, error = %e, "Common name not copied to SAN"),
        }
    }
    if changed {
        extensions.insert(Extension::with_critical(
            ExtensionValue::SubjectAlternativeName(names),
            critical,
        )?);
    }
    Ok(())
}

/// 签发终端实体证书
///
/// `now`作为签发时刻，CA状态与有效期都以它为准。
pub fn issue(
    ca: &CertificateAuthority,
    subject: &Subject,
    key: &SubjectKey,
    mut extensions: ResolvedExtensions,
    options: &IssueOptions,
    now: OffsetDateTime,
) -> Result<Certificate> {
    ca.check_usable(now)?;
    let signer = ca.signing_key()?;
    let algorithm = ca.signature_algorithm(options.hash)?;
    let settings = ca.settings();

    let public_key = key.spki()?;
    let parsed_key = PublicKey::from_spki_der(&public_key.to_der()?)?;
    if parsed_key.algorithm() == Algorithm::Rsa && parsed_key.key_size() < settings.min_key_size {
        return Err(PkiError::CertError(format!(
            "RSA key size {} is below the minimum of {}",
            parsed_key.key_size(),
            settings.min_key_size
        )));
    }

    if let Some(Extension {
        value: ExtensionValue::BasicConstraints { ca: true, .. },
        ..
    }) = extensions.get(ExtensionKind::BasicConstraints)
    {
        return Err(ProfileError::CaNotAllowed(extensions.profile.clone()).into());
    }
    extensions.insert_if_absent(Extension::new(ExtensionValue::BasicConstraints {
        ca: false,
        path_length: None,
    }));
    extensions.insert_if_absent(Extension::new(ExtensionValue::SubjectKeyIdentifier(
        key_identifier(&public_key),
    )));
    extensions.insert_if_absent(Extension::new(ExtensionValue::AuthorityKeyIdentifier(
        AuthorityKeyIdentifier {
            key_identifier: Some(ca.subject_key_identifier().to_vec()),
            ..Default::default()
        },
    )));

    let flags = extensions.flags;
    if flags.cn_in_san {
        copy_common_names(subject, &mut extensions)?;
    }
    if subject.is_empty() && !extensions.contains(ExtensionKind::SubjectAlternativeName) {
        return Err(PkiError::CertError(
            "certificate needs a subject or a subject alternative name".to_string(),
        ));
    }
    let config = ca.config();
    if flags.add_crl_url {
        if let Some(cdp) = config.crl_distribution_points()? {
            extensions.insert_if_absent(cdp);
        }
    }
    if flags.add_ocsp_url || flags.add_issuer_url {
        if let Some(aia) =
            config.authority_information_access(flags.add_ocsp_url, flags.add_issuer_url)?
        {
            extensions.insert_if_absent(aia);
        }
    }
    if flags.add_issuer_alternative_name {
        if let Some(ian) = config.issuer_alternative_name()? {
            extensions.insert_if_absent(ian);
        }
    }

    let validity_days = options
        .validity_days
        .or(extensions.validity_days)
        .unwrap_or(settings.default_expires_days);
    let not_before = now - Duration::seconds(i64::from(settings.clock_skew_seconds));
    let not_after = (not_before + Duration::days(i64::from(validity_days))).min(ca.not_after());
    if not_after <= not_before {
        return Err(PkiError::CertError(format!(
            "CA {} expires before the certificate would become valid",
            ca.name()
        )));
    }

    let serial = ca.serials().allocate()?;
    let certificate = sign_certificate(
        signer.as_ref(),
        algorithm,
        CertificateParams {
            serial: &serial,
            issuer: ca.subject().to_name()?,
            subject: subject.to_name()?,
            public_key,
            not_before,
            not_after,
            extensions: extensions.iter().cloned().collect(),
        },
    )?;

    info!(
        ca = %ca.name(),
        serial = %serial,
        profile = %extensions.profile,
        algorithm = %algorithm,
        "Issued certificate"
    );
    Certificate::issued(
        ca.id(),
        &extensions.profile,
        subject.clone(),
        CertificateKind::EndEntity,
        certificate,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tessera_key::{Ed25519Key, Key, P256Key};

    use super::*;
    use crate::{ca::CaConfig, profile::ProfileFlags, settings::Settings};

    fn root() -> CertificateAuthority {
        CertificateAuthority::init_root(
            "Builder Root",
            "CN=Builder Root".parse().unwrap(),
            Arc::new(P256Key::generate().unwrap()),
            3650,
            Some(0),
            Arc::new(Settings::default()),
        )
        .unwrap()
        .with_config(CaConfig::default().with_crl_url("http://crl.example.com/root.crl"))
        .unwrap()
    }

    fn flags() -> ProfileFlags {
        ProfileFlags {
            cn_in_san: true,
            add_crl_url: true,
            add_ocsp_url: false,
            add_issuer_url: false,
            add_issuer_alternative_name: false,
        }
    }

    fn spki() -> SubjectKey {
        SubjectKey::Spki(Ed25519Key::generate().unwrap().spki_der().unwrap())
    }

    #[test]
    fn test_adds_identifiers_and_urls() {
        let ca = root();
        let subject: Subject = "CN=www.example.com".parse().unwrap();
        let mut cert = issue(
            &ca,
            &subject,
            &spki(),
            ResolvedExtensions::unprofiled("test", flags()),
            &IssueOptions::default(),
            OffsetDateTime::now_utc(),
        )
        .unwrap();

        assert_eq!(cert.serial, "2");
        let kinds: Vec<_> = cert.extensions().unwrap().iter().map(Extension::kind).collect();
        for kind in [
            ExtensionKind::AuthorityKeyIdentifier,
            ExtensionKind::BasicConstraints,
            ExtensionKind::CrlDistributionPoints,
            ExtensionKind::SubjectAlternativeName,
            ExtensionKind::SubjectKeyIdentifier,
        ] {
            assert!(kinds.contains(&kind), "missing {kind}");
        }
        match cert
            .extension(ExtensionKind::AuthorityKeyIdentifier)
            .unwrap()
            .unwrap()
            .value
        {
            ExtensionValue::AuthorityKeyIdentifier(aki) => {
                assert_eq!(aki.key_identifier.as_deref(), Some(ca.subject_key_identifier()))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_validity_is_clamped_to_ca() {
        let ca = root();
        let cert = issue(
            &ca,
            &"CN=long.example.com".parse().unwrap(),
            &spki(),
            ResolvedExtensions::unprofiled("test", flags()),
            &IssueOptions {
                validity_days: Some(365 * 30),
                hash: None,
            },
            OffsetDateTime::now_utc(),
        )
        .unwrap();
        assert_eq!(cert.not_after, ca.not_after());
    }

    #[test]
    fn test_rejects_ca_request_and_wrong_hash() {
        let ca = root();
        let subject: Subject = "CN=sub.example.com".parse().unwrap();

        let mut extensions = ResolvedExtensions::unprofiled("test", flags());
        extensions.insert(Extension::new(ExtensionValue::BasicConstraints {
            ca: true,
            path_length: None,
        }));
        let err = issue(
            &ca,
            &subject,
            &spki(),
            extensions,
            &IssueOptions::default(),
            OffsetDateTime::now_utc(),
        )
        .unwrap_err();
        assert!(matches!(err, PkiError::Profile(ProfileError::CaNotAllowed(_))));

        let ed_root = CertificateAuthority::init_root(
            "Ed Root",
            "CN=Ed Root".parse().unwrap(),
            Arc::new(Ed25519Key::generate().unwrap()),
            365,
            None,
            Arc::new(Settings::default()),
        )
        .unwrap();
        let err = issue(
            &ed_root,
            &subject,
            &spki(),
            ResolvedExtensions::unprofiled("test", flags()),
            &IssueOptions {
                validity_days: None,
                hash: Some(HashAlgorithm::Sha256),
            },
            OffsetDateTime::now_utc(),
        )
        .unwrap_err();
        assert!(matches!(err, PkiError::SigningError(_)));
        assert_eq!(ed_root.serials().peek(), Some(2));
    }

    #[test]
    fn test_csr_signature_is_checked() {
        let ca = root();
        let key = P256Key::generate().unwrap();
        let subject: Subject = "CN=csr.example.com".parse().unwrap();
        let csr = Csr::build(&key, &subject, &[]).unwrap();
        let cert = issue(
            &ca,
            &subject,
            &SubjectKey::from_csr_bytes(&csr.to_der().unwrap()).unwrap(),
            ResolvedExtensions::unprofiled("test", flags()),
            &IssueOptions::default(),
            OffsetDateTime::now_utc(),
        )
        .unwrap();
        assert_eq!(cert.kind, CertificateKind::EndEntity);
    }
}
