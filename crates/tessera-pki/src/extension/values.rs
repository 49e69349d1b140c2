//! 扩展的类型化取值
//!
//! 每种扩展一个结构体或枚举；`validate`检查RFC 5280规定的结构约束。

use std::collections::BTreeSet;

use der::asn1::ObjectIdentifier;

use super::general_name::GeneralName;
use crate::{error::DecodeError, name::Subject, oid, types::RevocationReason};

/// 密钥用途（KeyUsage位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyUsage {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

impl KeyUsage {
    pub const ALL: [KeyUsage; 9] = [
        KeyUsage::DigitalSignature,
        KeyUsage::ContentCommitment,
        KeyUsage::KeyEncipherment,
        KeyUsage::DataEncipherment,
        KeyUsage::KeyAgreement,
        KeyUsage::KeyCertSign,
        KeyUsage::CrlSign,
        KeyUsage::EncipherOnly,
        KeyUsage::DecipherOnly,
    ];

    /// 在BIT STRING中的位置
    pub fn bit(&self) -> usize {
        *self as usize
    }

    pub fn from_bit(bit: usize) -> Option<Self> {
        Self::ALL.get(bit).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyUsage::DigitalSignature => "digital_signature",
            KeyUsage::ContentCommitment => "content_commitment",
            KeyUsage::KeyEncipherment => "key_encipherment",
            KeyUsage::DataEncipherment => "data_encipherment",
            KeyUsage::KeyAgreement => "key_agreement",
            KeyUsage::KeyCertSign => "key_cert_sign",
            KeyUsage::CrlSign => "crl_sign",
            KeyUsage::EncipherOnly => "encipher_only",
            KeyUsage::DecipherOnly => "decipher_only",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|usage| usage.name() == name)
    }
}

/// 扩展密钥用途的常用名称
pub const EXTENDED_KEY_USAGE_NAMES: &[(&str, ObjectIdentifier)] = &[
    ("serverAuth", oid::KP_SERVER_AUTH),
    ("clientAuth", oid::KP_CLIENT_AUTH),
    ("codeSigning", oid::KP_CODE_SIGNING),
    ("emailProtection", oid::KP_EMAIL_PROTECTION),
    ("timeStamping", oid::KP_TIME_STAMPING),
    ("OCSPSigning", oid::KP_OCSP_SIGNING),
    ("smartcardLogon", oid::KP_SMARTCARD_LOGON),
    ("msKDC", oid::KP_MS_KDC),
    ("ipsecIKE", oid::KP_IPSEC_IKE),
    ("anyExtendedKeyUsage", oid::ANY_EXTENDED_KEY_USAGE),
];

/// 名称或点分OID
pub fn extended_key_usage_from_name(name: &str) -> Option<ObjectIdentifier> {
    EXTENDED_KEY_USAGE_NAMES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, oid)| *oid)
        .or_else(|| name.parse().ok())
}

pub fn extended_key_usage_name(usage: &ObjectIdentifier) -> String {
    EXTENDED_KEY_USAGE_NAMES
        .iter()
        .find(|(_, known)| known == usage)
        .map(|(name, _)| (*name).to_string())
        .unwrap_or_else(|| usage.to_string())
}

/// 访问方式（AIA/SIA）
pub const ACCESS_METHOD_NAMES: &[(&str, ObjectIdentifier)] = &[
    ("ocsp", oid::AD_OCSP),
    ("ca_issuers", oid::AD_CA_ISSUERS),
    ("ca_repository", oid::AD_CA_REPOSITORY),
    ("time_stamping", oid::AD_TIME_STAMPING),
];

pub fn access_method_from_name(name: &str) -> Option<ObjectIdentifier> {
    ACCESS_METHOD_NAMES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, oid)| *oid)
        .or_else(|| name.parse().ok())
}

pub fn access_method_name(method: &ObjectIdentifier) -> String {
    ACCESS_METHOD_NAMES
        .iter()
        .find(|(_, known)| known == method)
        .map(|(name, _)| (*name).to_string())
        .unwrap_or_else(|| method.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDescription {
    pub access_method: ObjectIdentifier,
    pub access_location: GeneralName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityKeyIdentifier {
    pub key_identifier: Option<Vec<u8>>,
    pub authority_cert_issuer: Option<Vec<GeneralName>>,
    /// 大写十六进制
    pub authority_cert_serial_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionPointName {
    FullName(Vec<GeneralName>),
    /// 相对于CRL签发者的名称，编码为单个RDN
    RelativeName(Subject),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionPoint {
    pub name: DistributionPointName,
    pub reasons: Option<BTreeSet<RevocationReason>>,
    pub crl_issuer: Option<Vec<GeneralName>>,
}

impl DistributionPoint {
    pub fn full_name(names: Vec<GeneralName>) -> Self {
        Self {
            name: DistributionPointName::FullName(names),
            reasons: None,
            crl_issuer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeReference {
    pub organization: String,
    pub notice_numbers: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyQualifier {
    /// CPS指针（自由文本/URI）
    Cps(String),
    UserNotice {
        notice_reference: Option<NoticeReference>,
        explicit_text: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInformation {
    pub policy_identifier: ObjectIdentifier,
    pub policy_qualifiers: Vec<PolicyQualifier>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameConstraints {
    pub permitted_subtrees: Vec<GeneralName>,
    pub excluded_subtrees: Vec<GeneralName>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyConstraints {
    pub require_explicit_policy: Option<u32>,
    pub inhibit_policy_mapping: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsCertificateTemplate {
    pub template_id: ObjectIdentifier,
    pub major_version: Option<u32>,
    pub minor_version: Option<u32>,
}

/// TLS Feature（RFC 7633）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TlsFeature {
    StatusRequest,
    StatusRequestV2,
}

impl TlsFeature {
    pub fn code(&self) -> u32 {
        match self {
            TlsFeature::StatusRequest => 5,
            TlsFeature::StatusRequestV2 => 17,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            5 => Some(TlsFeature::StatusRequest),
            17 => Some(TlsFeature::StatusRequestV2),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TlsFeature::StatusRequest => "status_request",
            TlsFeature::StatusRequestV2 => "status_request_v2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "status_request" | "OCSPMustStaple" => Some(TlsFeature::StatusRequest),
            "status_request_v2" | "MultipleCertStatusRequest" => Some(TlsFeature::StatusRequestV2),
            _ => None,
        }
    }
}

// ============================================================================
// 结构约束
// ============================================================================

pub(crate) fn non_empty<T>(ext: &str, field: &str, items: &[T]) -> Result<(), DecodeError> {
    if items.is_empty() {
        Err(DecodeError::field(ext, field, "must not be empty"))
    } else {
        Ok(())
    }
}

pub(crate) fn validate_access_descriptions(
    ext: &str,
    descriptions: &[AccessDescription],
    allowed: &[ObjectIdentifier],
) -> Result<(), DecodeError> {
    non_empty(ext, "value", descriptions)?;
    for (i, description) in descriptions.iter().enumerate() {
        if !allowed.contains(&description.access_method) {
            return Err(DecodeError::field(
                ext,
                format!("value[{i}].access_method"),
                format!(
                    "access method {} is not allowed here",
                    access_method_name(&description.access_method)
                ),
            ));
        }
    }
    Ok(())
}

pub(crate) fn validate_key_usage(usages: &BTreeSet<KeyUsage>) -> Result<(), DecodeError> {
    if usages.is_empty() {
        return Err(DecodeError::new("key_usage", "must not be empty"));
    }
    let only = usages.contains(&KeyUsage::EncipherOnly) || usages.contains(&KeyUsage::DecipherOnly);
    if only && !usages.contains(&KeyUsage::KeyAgreement) {
        return Err(DecodeError::new(
            "key_usage",
            "encipher_only and decipher_only require key_agreement",
        ));
    }
    Ok(())
}

impl AuthorityKeyIdentifier {
    pub(crate) fn validate(&self) -> Result<(), DecodeError> {
        const EXT: &str = "authority_key_identifier";
        if self.authority_cert_issuer.is_some() != self.authority_cert_serial_number.is_some() {
            return Err(DecodeError::new(
                EXT,
                "authority_cert_issuer and authority_cert_serial_number must both be present or both be absent",
            ));
        }
        if self.key_identifier.is_none() && self.authority_cert_issuer.is_none() {
            return Err(DecodeError::new(EXT, "at least one field is required"));
        }
        if let Some(issuer) = &self.authority_cert_issuer {
            non_empty(EXT, "authority_cert_issuer", issuer)?;
        }
        if let Some(key_identifier) = &self.key_identifier {
            non_empty(EXT, "key_identifier", key_identifier)?;
        }
        Ok(())
    }
}

impl DistributionPoint {
    pub(crate) fn validate(&self, ext: &str, index: usize) -> Result<(), DecodeError> {
        let field = |name: &str| format!("value[{index}].{name}");
        match &self.name {
            DistributionPointName::FullName(names) => non_empty(ext, &field("full_name"), names)?,
            DistributionPointName::RelativeName(subject) => {
                if subject.is_empty() {
                    return Err(DecodeError::field(ext, field("relative_name"), "must not be empty"));
                }
            }
        }
        if let Some(reasons) = &self.reasons {
            if reasons.is_empty() {
                return Err(DecodeError::field(ext, field("reasons"), "must not be empty"));
            }
            if let Some(reason) = reasons.iter().find(|reason| reason.flag_bit().is_none()) {
                return Err(DecodeError::field(
                    ext,
                    field("reasons"),
                    format!("{reason} cannot be used as a reason flag"),
                ));
            }
        }
        if let Some(issuer) = &self.crl_issuer {
            non_empty(ext, &field("crl_issuer"), issuer)?;
        }
        Ok(())
    }
}

impl PolicyInformation {
    pub(crate) fn validate(&self, index: usize) -> Result<(), DecodeError> {
        for (i, qualifier) in self.policy_qualifiers.iter().enumerate() {
            let field = format!("value[{index}].policy_qualifiers[{i}]");
            match qualifier {
                PolicyQualifier::Cps(text) if text.is_empty() => {
                    return Err(DecodeError::field("certificate_policies", field, "must not be empty"))
                }
                PolicyQualifier::UserNotice {
                    notice_reference: None,
                    explicit_text: None,
                } => {
                    return Err(DecodeError::field(
                        "certificate_policies",
                        field,
                        "user notice needs notice_reference or explicit_text",
                    ))
                }
                PolicyQualifier::Cps(text) if !text.is_ascii() => {
                    return Err(DecodeError::field(
                        "certificate_policies",
                        field,
                        "CPS pointer must be ASCII",
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl NameConstraints {
    pub(crate) fn validate(&self) -> Result<(), DecodeError> {
        if self.permitted_subtrees.is_empty() && self.excluded_subtrees.is_empty() {
            return Err(DecodeError::new(
                "name_constraints",
                "at least one of permitted_subtrees and excluded_subtrees is required",
            ));
        }
        Ok(())
    }
}

impl PolicyConstraints {
    pub(crate) fn validate(&self) -> Result<(), DecodeError> {
        if self.require_explicit_policy.is_none() && self.inhibit_policy_mapping.is_none() {
            return Err(DecodeError::new(
                "policy_constraints",
                "at least one of require_explicit_policy and inhibit_policy_mapping is required",
            ));
        }
        Ok(())
    }
}

impl MsCertificateTemplate {
    pub(crate) fn validate(&self) -> Result<(), DecodeError> {
        if self.minor_version.is_some() && self.major_version.is_none() {
            return Err(DecodeError::field(
                "ms_certificate_template",
                "minor_version",
                "requires major_version",
            ));
        }
        Ok(())
    }
}
