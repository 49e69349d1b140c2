//! 证书颁发机构
//!
//! `CertificateAuthority`持有CA证书、（可选的）私钥、序列号计数器和CA配置。
//! 根CA自签名，中间CA由父CA签名并从父CA的计数器取得序列号。私钥缺失的CA
//! 只能用于查询和校验，签发时返回`KeyUnavailable`。

mod config;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use der::{Decode, Encode};
use tessera_key::{Algorithm, HashAlgorithm, Key, PublicKey, SignatureAlgorithm, SigningKey};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;
use x509_cert::{spki::SubjectPublicKeyInfoOwned, Certificate as X509Certificate};

pub use self::config::CaConfig;
use crate::{
    asn1,
    builder::{self, CertificateParams, IssueOptions, IssueRequest, SubjectKey},
    cert::Certificate,
    error::{PkiError, Result},
    extension::{
        AuthorityKeyIdentifier, Extension, ExtensionKind, ExtensionValue, KeyUsage,
    },
    name::Subject,
    profile::Profiles,
    serial::SerialAllocator,
    settings::Settings,
};

/// 证书颁发机构
pub struct CertificateAuthority {
    id: Uuid,
    name: String,
    /// 签发本CA证书的CA，根CA为`None`
    parent_id: Option<Uuid>,
    certificate: X509Certificate,
    der: Vec<u8>,
    subject: Subject,
    subject_key_identifier: Vec<u8>,
    key_algorithm: Algorithm,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    path_length: Option<u8>,
    key: Option<Arc<dyn SigningKey>>,
    config: CaConfig,
    enabled: AtomicBool,
    serials: SerialAllocator,
    settings: Arc<Settings>,
    profiles: Profiles,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("subject", &self.subject.to_string())
            .field("not_after", &self.not_after)
            .field("has_private_key", &self.key.is_some())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// CA证书自身的扩展
fn ca_extensions(
    path_length: Option<u8>,
    subject_key_identifier: Vec<u8>,
    authority_key_identifier: Option<Vec<u8>>,
) -> Vec<Extension> {
    let mut extensions = vec![
        Extension::new(ExtensionValue::BasicConstraints {
            ca: true,
            path_length,
        }),
        Extension::new(ExtensionValue::KeyUsage(
            [KeyUsage::KeyCertSign, KeyUsage::CrlSign].into_iter().collect(),
        )),
        Extension::new(ExtensionValue::SubjectKeyIdentifier(subject_key_identifier)),
    ];
    if let Some(key_identifier) = authority_key_identifier {
        extensions.push(Extension::new(ExtensionValue::AuthorityKeyIdentifier(
            AuthorityKeyIdentifier {
                key_identifier: Some(key_identifier),
                ..Default::default()
            },
        )));
    }
    extensions
}

fn key_spki(key: &dyn SigningKey) -> Result<SubjectPublicKeyInfoOwned> {
    SubjectPublicKeyInfoOwned::from_der(&key.spki_der()?)
        .map_err(|e| PkiError::CertError(format!("Failed to parse CA public key: {}", e)))
}

/// 新CA证书的签名算法：Ed25519不带摘要，其他使用全局默认摘要
fn initial_algorithm(key: &dyn SigningKey, settings: &Settings) -> Result<SignatureAlgorithm> {
    let hash = match key.algorithm() {
        Algorithm::Ed25519 => None,
        _ => Some(settings.default_hash_algorithm),
    };
    SignatureAlgorithm::for_key(key.algorithm(), hash)
        .map_err(|e| PkiError::SigningError(e.to_string()))
}

impl CertificateAuthority {
    /// 创建自签名根CA
    ///
    /// 根证书带有critical的`basic_constraints`和`key_usage`
    /// （`key_cert_sign`、`crl_sign`），序列号为本CA计数器的第一个值。
    pub fn init_root(
        name: &str,
        subject: Subject,
        key: Arc<dyn SigningKey>,
        validity_days: u32,
        path_length: Option<u8>,
        settings: Arc<Settings>,
    ) -> Result<Self> {
        let algorithm = initial_algorithm(key.as_ref(), &settings)?;
        let public_key = key_spki(key.as_ref())?;
        let subject_key_identifier = builder::key_identifier(&public_key);
        let not_before =
            OffsetDateTime::now_utc() - Duration::seconds(i64::from(settings.clock_skew_seconds));

        let serials = SerialAllocator::default();
        let serial = serials.allocate()?;
        let certificate = builder::sign_certificate(
            key.as_ref(),
            algorithm,
            CertificateParams {
                serial: &serial,
                issuer: subject.to_name()?,
                subject: subject.to_name()?,
                public_key,
                not_before,
                not_after: not_before + Duration::days(i64::from(validity_days)),
                extensions: ca_extensions(path_length, subject_key_identifier, None),
            },
        )?;

        let ca = Self::assemble(name, None, certificate, Some(key), serials, settings)?;
        info!(ca = %ca.name, id = %ca.id, serial = %serial, algorithm = %algorithm, "Initialized root CA");
        Ok(ca)
    }

    /// 由本CA签发中间CA
    ///
    /// 子CA的路径长度必须小于本CA的路径长度；未指定时取本CA路径长度减一。
    pub fn init_intermediate(
        &self,
        name: &str,
        subject: Subject,
        key: Arc<dyn SigningKey>,
        validity_days: u32,
        path_length: Option<u8>,
    ) -> Result<Self> {
        let now = OffsetDateTime::now_utc();
        self.check_usable(now)?;
        let signer = self.signing_key()?;
        let algorithm = self.signature_algorithm(None)?;

        let path_length = match (self.path_length, path_length) {
            (Some(0), _) => {
                return Err(PkiError::CertError(format!(
                    "CA {} has path length 0 and cannot sign intermediate CAs",
                    self.name
                )))
            }
            (Some(parent), Some(child)) if child >= parent => {
                return Err(PkiError::CertError(format!(
                    "path length {child} must be smaller than the path length {parent} of CA {}",
                    self.name
                )))
            }
            (Some(parent), None) => Some(parent - 1),
            (_, child) => child,
        };

        let public_key = key_spki(key.as_ref())?;
        let mut extensions = ca_extensions(
            path_length,
            builder::key_identifier(&public_key),
            Some(self.subject_key_identifier.clone()),
        );
        extensions.extend(self.config.crl_distribution_points()?);
        extensions.extend(self.config.authority_information_access(true, true)?);

        let not_before = now - Duration::seconds(i64::from(self.settings.clock_skew_seconds));
        let not_after = (not_before + Duration::days(i64::from(validity_days))).min(self.not_after);
        let serial = self.serials.allocate()?;
        let certificate = builder::sign_certificate(
            signer.as_ref(),
            algorithm,
            CertificateParams {
                serial: &serial,
                issuer: self.subject.to_name()?,
                subject: subject.to_name()?,
                public_key,
                not_before,
                not_after,
                extensions,
            },
        )?;

        let ca = Self::assemble(
            name,
            Some(self.id),
            certificate,
            Some(key),
            SerialAllocator::default(),
            Arc::clone(&self.settings),
        )?;
        info!(
            ca = %ca.name,
            parent = %self.name,
            serial = %serial,
            path_length = ?path_length,
            "Initialized intermediate CA"
        );
        Ok(ca)
    }

    /// 从保存的CA证书恢复
    ///
    /// `key`为`None`时CA只能用于查询；`last_serial`是已分配的最大序列号。
    pub fn from_parts(
        name: &str,
        certificate_der: &[u8],
        key: Option<Arc<dyn SigningKey>>,
        last_serial: u64,
        settings: Arc<Settings>,
    ) -> Result<Self> {
        let certificate = X509Certificate::from_der(certificate_der)
            .map_err(|e| PkiError::CertError(format!("Failed to parse CA certificate: {}", e)))?;
        Self::assemble(
            name,
            None,
            certificate,
            key,
            SerialAllocator::resume_after(last_serial),
            settings,
        )
    }

    fn assemble(
        name: &str,
        parent_id: Option<Uuid>,
        certificate: X509Certificate,
        key: Option<Arc<dyn SigningKey>>,
        serials: SerialAllocator,
        settings: Arc<Settings>,
    ) -> Result<Self> {
        let tbs = &certificate.tbs_certificate;
        let spki_der = tbs.subject_public_key_info.to_der()?;
        if let Some(key) = &key {
            if key.spki_der()? != spki_der {
                return Err(PkiError::CertError(format!(
                    "private key does not match the certificate of CA {name}"
                )));
            }
        }

        let mut subject_key_identifier = None;
        let mut path_length = None;
        let mut is_ca = false;
        for ext in tbs.extensions.iter().flatten() {
            match Extension::from_x509(ext)?.map(|ext| ext.value) {
                Some(ExtensionValue::SubjectKeyIdentifier(identifier)) => {
                    subject_key_identifier = Some(identifier)
                }
                Some(ExtensionValue::BasicConstraints { ca, path_length: len }) => {
                    is_ca = ca;
                    path_length = len;
                }
                _ => {}
            }
        }
        if !is_ca {
            return Err(PkiError::CertError(format!(
                "certificate of {name} is not a CA certificate"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            parent_id,
            der: certificate.to_der()?,
            subject: Subject::from_name(&tbs.subject)?,
            subject_key_identifier: subject_key_identifier
                .unwrap_or_else(|| builder::key_identifier(&tbs.subject_public_key_info)),
            key_algorithm: PublicKey::from_spki_der(&spki_der)?.algorithm(),
            not_before: asn1::from_x509_time(&tbs.validity.not_before)?,
            not_after: asn1::from_x509_time(&tbs.validity.not_after)?,
            path_length,
            key,
            config: CaConfig::default(),
            enabled: AtomicBool::new(true),
            serials,
            profiles: settings.profiles()?,
            settings,
            certificate,
        })
    }

    /// 替换CA配置；配置中的默认模板必须存在
    pub fn with_config(mut self, config: CaConfig) -> Result<Self> {
        config.validate()?;
        for profile in config.default_profile.iter().chain(config.acme_profile.iter()) {
            self.profiles.get(profile)?;
        }
        self.config = config;
        Ok(self)
    }

    /// 记录签发本CA的父CA
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn certificate(&self) -> &X509Certificate {
        &self.certificate
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.der
    }

    pub fn certificate_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der.clone()))
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn path_length(&self) -> Option<u8> {
        self.path_length
    }

    pub fn subject_key_identifier(&self) -> &[u8] {
        &self.subject_key_identifier
    }

    /// CA公钥的位串内容（OCSP CertID中的issuerKeyHash以此计算）
    pub fn public_key_bits(&self) -> &[u8] {
        self.certificate
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes()
    }

    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn profiles(&self) -> &Profiles {
        &self.profiles
    }

    pub fn serials(&self) -> &SerialAllocator {
        &self.serials
    }

    pub fn has_private_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            warn!(ca = %self.name, enabled, "CA status changed");
        }
    }

    // ========================================================================
    // Issuance
    // ========================================================================

    /// CA在`now`时刻已启用且处于有效期内
    pub fn check_usable(&self, now: OffsetDateTime) -> Result<()> {
        if !self.is_enabled() || now < self.not_before || now >= self.not_after {
            return Err(PkiError::ExpiredOrDisabledCA(self.name.clone()));
        }
        Ok(())
    }

    pub fn signing_key(&self) -> Result<&Arc<dyn SigningKey>> {
        self.key
            .as_ref()
            .ok_or_else(|| PkiError::KeyUnavailable(self.name.clone()))
    }

    /// 选择签名算法：显式指定的摘要，其次CA配置的默认摘要，最后沿用CA证书
    /// 自身的摘要（仍未确定时使用全局默认值）
    pub fn signature_algorithm(&self, hash: Option<HashAlgorithm>) -> Result<SignatureAlgorithm> {
        let hash = match hash.or(self.config.default_hash) {
            Some(hash) => Some(hash),
            None if self.key_algorithm == Algorithm::Ed25519 => None,
            None => Some(
                SignatureAlgorithm::from_oid(&self.certificate.signature_algorithm.oid)
                    .ok()
                    .filter(|own| own.key_algorithm() == self.key_algorithm)
                    .and_then(|own| own.hash())
                    .unwrap_or(self.settings.default_hash_algorithm),
            ),
        };
        SignatureAlgorithm::for_key(self.key_algorithm, hash)
            .map_err(|e| PkiError::SigningError(format!("CA {}: {}", self.name, e)))
    }

    /// 模板名称：请求中的，其次CA配置的，最后全局默认模板
    fn profile_name<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str> {
        match requested.or(self.config.default_profile.as_deref()) {
            Some(name) => Ok(name),
            None => Ok(self.profiles.default_profile()?.name()),
        }
    }

    /// 按请求签发终端实体证书
    pub fn issue(&self, request: &IssueRequest) -> Result<Certificate> {
        self.issue_at(request, OffsetDateTime::now_utc())
    }

    pub fn issue_at(&self, request: &IssueRequest, now: OffsetDateTime) -> Result<Certificate> {
        let profile = self.profile_name(request.profile.as_deref())?;
        let extensions = self.profiles.resolve(profile, &request.extensions)?;
        builder::issue(
            self,
            &request.subject,
            &request.key,
            extensions,
            &request.options,
            now,
        )
    }

    /// 签发委托OCSP响应器证书（`ocsp`模板，短有效期）
    pub fn issue_ocsp_responder(&self, subject: Subject, key: SubjectKey) -> Result<Certificate> {
        let extensions = self.profiles.resolve("ocsp", &Default::default())?;
        builder::issue(
            self,
            &subject,
            &key,
            extensions,
            &IssueOptions {
                validity_days: Some(self.settings.ocsp.responder_certificate_validity_days),
                hash: None,
            },
            OffsetDateTime::now_utc(),
        )
    }

    /// 本CA证书作为父CA名下的记录（用于撤销中间CA）
    pub fn certificate_record(&self) -> Result<Certificate> {
        Certificate::from_der(
            self.parent_id.unwrap_or(self.id),
            "ca",
            self.der.clone(),
        )
    }

    /// 本CA是否签发了`certificate`（签发者名称与AKI都匹配）
    pub fn is_issuer_of(&self, certificate: &X509Certificate) -> bool {
        if certificate.tbs_certificate.issuer != self.certificate.tbs_certificate.subject {
            return false;
        }
        let aki = certificate
            .tbs_certificate
            .extensions
            .iter()
            .flatten()
            .filter(|ext| ext.extn_id == ExtensionKind::AuthorityKeyIdentifier.oid())
            .find_map(|ext| Extension::from_x509(ext).ok().flatten());
        match aki.map(|ext| ext.value) {
            Some(ExtensionValue::AuthorityKeyIdentifier(AuthorityKeyIdentifier {
                key_identifier: Some(key_identifier),
                ..
            })) => key_identifier == self.subject_key_identifier,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use der::Encode;
    use tessera_key::{Ed25519Key, P256Key};

    use super::*;
    use crate::{error::ProfileError, types::CertificateKind};

    fn settings() -> Arc<Settings> {
        Arc::new(Settings::default())
    }

    fn root(path_length: Option<u8>) -> CertificateAuthority {
        CertificateAuthority::init_root(
            "Root",
            "C=AT,O=Tessera,CN=Root".parse().unwrap(),
            Arc::new(P256Key::generate().unwrap()),
            3650,
            path_length,
            settings(),
        )
        .unwrap()
    }

    fn verify_signed_by(issuer: &CertificateAuthority, certificate: &X509Certificate) {
        let public_key = PublicKey::from_spki_der(
            &issuer
                .certificate()
                .tbs_certificate
                .subject_public_key_info
                .to_der()
                .unwrap(),
        )
        .unwrap();
        let algorithm = SignatureAlgorithm::from_oid(&certificate.signature_algorithm.oid).unwrap();
        public_key
            .verify(
                algorithm,
                &certificate.tbs_certificate.to_der().unwrap(),
                certificate.signature.raw_bytes(),
            )
            .unwrap();
    }

    #[test]
    fn test_root_is_self_signed() {
        let root = root(Some(1));
        assert_eq!(root.path_length(), Some(1));
        assert_eq!(root.serials().peek(), Some(2));
        assert_eq!(root.subject_key_identifier().len(), 20);
        assert!(root.is_issuer_of(root.certificate()));
        verify_signed_by(&root, root.certificate());

        let mut record = root.certificate_record().unwrap();
        assert_eq!(record.kind, CertificateKind::Ca);
        let ku = record.extension(ExtensionKind::KeyUsage).unwrap().unwrap();
        assert!(ku.critical);
        let bc = record.extension(ExtensionKind::BasicConstraints).unwrap().unwrap();
        assert!(bc.critical);
    }

    #[test]
    fn test_intermediate_chain() {
        let root = root(Some(1));
        let intermediate = root
            .init_intermediate(
                "Intermediate",
                "CN=Intermediate".parse().unwrap(),
                Arc::new(Ed25519Key::generate().unwrap()),
                365,
                None,
            )
            .unwrap();

        assert_eq!(intermediate.parent_id(), Some(root.id()));
        assert_eq!(intermediate.path_length(), Some(0));
        assert!(root.is_issuer_of(intermediate.certificate()));
        assert!(!intermediate.is_issuer_of(root.certificate()));
        verify_signed_by(&root, intermediate.certificate());

        let record = intermediate.certificate_record().unwrap();
        assert_eq!(record.ca_id, root.id());
        assert_eq!(record.serial, "2");

        let err = intermediate
            .init_intermediate(
                "Too deep",
                "CN=Too deep".parse().unwrap(),
                Arc::new(Ed25519Key::generate().unwrap()),
                30,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::CertError(_)));
    }

    #[test]
    fn test_default_algorithm_follows_key() {
        let root = root(None);
        assert_eq!(
            root.signature_algorithm(None).unwrap(),
            SignatureAlgorithm::EcdsaSha256
        );
        assert_eq!(
            root.signature_algorithm(Some(HashAlgorithm::Sha384)).unwrap(),
            SignatureAlgorithm::EcdsaSha384
        );

        let configured = root
            .with_config(CaConfig {
                default_hash: Some(HashAlgorithm::Sha512),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            configured.signature_algorithm(None).unwrap(),
            SignatureAlgorithm::EcdsaSha512
        );
    }

    #[test]
    fn test_unknown_default_profile_is_rejected() {
        let err = root(None)
            .with_config(CaConfig {
                default_profile: Some("missing".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(
            err,
            PkiError::Profile(ProfileError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_public_only_ca_cannot_sign() {
        let root = root(None);
        let restored = CertificateAuthority::from_parts(
            "Restored",
            root.certificate_der(),
            None,
            41,
            settings(),
        )
        .unwrap();
        assert!(!restored.has_private_key());
        assert_eq!(restored.serials().peek(), Some(42));
        assert!(matches!(
            restored.signing_key(),
            Err(PkiError::KeyUnavailable(_))
        ));

        let mismatched = CertificateAuthority::from_parts(
            "Mismatched",
            root.certificate_der(),
            Some(Arc::new(P256Key::generate().unwrap())),
            1,
            settings(),
        );
        assert!(matches!(mismatched, Err(PkiError::CertError(_))));
    }

    #[test]
    fn test_disabled_ca_is_rejected() {
        let root = root(None);
        let now = OffsetDateTime::now_utc();
        root.check_usable(now).unwrap();
        root.set_enabled(false);
        assert!(matches!(
            root.check_usable(now),
            Err(PkiError::ExpiredOrDisabledCA(_))
        ));
        root.set_enabled(true);
        assert!(matches!(
            root.check_usable(root.not_after()),
            Err(PkiError::ExpiredOrDisabledCA(_))
        ));
    }
}
