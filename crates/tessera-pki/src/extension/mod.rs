//! X.509扩展编解码
//!
//! `ExtensionValue`是封闭的枚举，每种支持的扩展一个变体。扩展可以在
//! JSON线格式（见`wire`）与DER `x509_cert::ext::Extension`（见`x509`）之间
//! 双向转换，两个方向都会先通过`validate`检查结构约束。

mod general_name;
mod values;
mod wire;
mod x509;

use std::{collections::BTreeSet, fmt, str::FromStr};

use der::asn1::ObjectIdentifier;

pub use general_name::GeneralName;
pub use values::{
    access_method_from_name, access_method_name, extended_key_usage_from_name,
    extended_key_usage_name, AccessDescription, AuthorityKeyIdentifier, DistributionPoint,
    DistributionPointName, KeyUsage, MsCertificateTemplate, NameConstraints, NoticeReference,
    PolicyConstraints, PolicyInformation, PolicyQualifier, TlsFeature,
    EXTENDED_KEY_USAGE_NAMES,
};
pub use wire::{overrides_from_wire, ExtensionOverride};

use crate::{
    error::{DecodeError, PkiError},
    oid,
};

/// 支持的扩展种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtensionKind {
    AuthorityInformationAccess,
    AuthorityKeyIdentifier,
    BasicConstraints,
    CrlDistributionPoints,
    CrlNumber,
    CertificatePolicies,
    DeltaCrlIndicator,
    ExtendedKeyUsage,
    FreshestCrl,
    InhibitAnyPolicy,
    IssuerAlternativeName,
    KeyUsage,
    MsCertificateTemplate,
    NameConstraints,
    OcspNoCheck,
    PolicyConstraints,
    PrecertPoison,
    SubjectAlternativeName,
    SubjectInformationAccess,
    SubjectKeyIdentifier,
    TlsFeature,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 21] = [
        ExtensionKind::AuthorityInformationAccess,
        ExtensionKind::AuthorityKeyIdentifier,
        ExtensionKind::BasicConstraints,
        ExtensionKind::CrlDistributionPoints,
        ExtensionKind::CrlNumber,
        ExtensionKind::CertificatePolicies,
        ExtensionKind::DeltaCrlIndicator,
        ExtensionKind::ExtendedKeyUsage,
        ExtensionKind::FreshestCrl,
        ExtensionKind::InhibitAnyPolicy,
        ExtensionKind::IssuerAlternativeName,
        ExtensionKind::KeyUsage,
        ExtensionKind::MsCertificateTemplate,
        ExtensionKind::NameConstraints,
        ExtensionKind::OcspNoCheck,
        ExtensionKind::PolicyConstraints,
        ExtensionKind::PrecertPoison,
        ExtensionKind::SubjectAlternativeName,
        ExtensionKind::SubjectInformationAccess,
        ExtensionKind::SubjectKeyIdentifier,
        ExtensionKind::TlsFeature,
    ];

    /// 线格式名称
    pub fn name(&self) -> &'static str {
        match self {
            ExtensionKind::AuthorityInformationAccess => "authority_information_access",
            ExtensionKind::AuthorityKeyIdentifier => "authority_key_identifier",
            ExtensionKind::BasicConstraints => "basic_constraints",
            ExtensionKind::CrlDistributionPoints => "crl_distribution_points",
            ExtensionKind::CrlNumber => "crl_number",
            ExtensionKind::CertificatePolicies => "certificate_policies",
            ExtensionKind::DeltaCrlIndicator => "delta_crl_indicator",
            ExtensionKind::ExtendedKeyUsage => "extended_key_usage",
            ExtensionKind::FreshestCrl => "freshest_crl",
            ExtensionKind::InhibitAnyPolicy => "inhibit_any_policy",
            ExtensionKind::IssuerAlternativeName => "issuer_alternative_name",
            ExtensionKind::KeyUsage => "key_usage",
            ExtensionKind::MsCertificateTemplate => "ms_certificate_template",
            ExtensionKind::NameConstraints => "name_constraints",
            ExtensionKind::OcspNoCheck => "ocsp_no_check",
            ExtensionKind::PolicyConstraints => "policy_constraints",
            ExtensionKind::PrecertPoison => "precert_poison",
            ExtensionKind::SubjectAlternativeName => "subject_alternative_name",
            ExtensionKind::SubjectInformationAccess => "subject_information_access",
            ExtensionKind::SubjectKeyIdentifier => "subject_key_identifier",
            ExtensionKind::TlsFeature => "tls_feature",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            ExtensionKind::AuthorityInformationAccess => oid::AUTHORITY_INFORMATION_ACCESS,
            ExtensionKind::AuthorityKeyIdentifier => oid::AUTHORITY_KEY_IDENTIFIER,
            ExtensionKind::BasicConstraints => oid::BASIC_CONSTRAINTS,
            ExtensionKind::CrlDistributionPoints => oid::CRL_DISTRIBUTION_POINTS,
            ExtensionKind::CrlNumber => oid::CRL_NUMBER,
            ExtensionKind::CertificatePolicies => oid::CERTIFICATE_POLICIES,
            ExtensionKind::DeltaCrlIndicator => oid::DELTA_CRL_INDICATOR,
            ExtensionKind::ExtendedKeyUsage => oid::EXTENDED_KEY_USAGE,
            ExtensionKind::FreshestCrl => oid::FRESHEST_CRL,
            ExtensionKind::InhibitAnyPolicy => oid::INHIBIT_ANY_POLICY,
            ExtensionKind::IssuerAlternativeName => oid::ISSUER_ALTERNATIVE_NAME,
            ExtensionKind::KeyUsage => oid::KEY_USAGE,
            ExtensionKind::MsCertificateTemplate => oid::MS_CERTIFICATE_TEMPLATE,
            ExtensionKind::NameConstraints => oid::NAME_CONSTRAINTS,
            ExtensionKind::OcspNoCheck => oid::OCSP_NO_CHECK,
            ExtensionKind::PolicyConstraints => oid::POLICY_CONSTRAINTS,
            ExtensionKind::PrecertPoison => oid::PRECERT_POISON,
            ExtensionKind::SubjectAlternativeName => oid::SUBJECT_ALTERNATIVE_NAME,
            ExtensionKind::SubjectInformationAccess => oid::SUBJECT_INFORMATION_ACCESS,
            ExtensionKind::SubjectKeyIdentifier => oid::SUBJECT_KEY_IDENTIFIER,
            ExtensionKind::TlsFeature => oid::TLS_FEATURE,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.oid() == *oid)
    }

    /// 未显式指定时使用的critical标志
    pub fn default_critical(&self) -> bool {
        matches!(
            self,
            ExtensionKind::BasicConstraints
                | ExtensionKind::DeltaCrlIndicator
                | ExtensionKind::InhibitAnyPolicy
                | ExtensionKind::KeyUsage
                | ExtensionKind::NameConstraints
                | ExtensionKind::PolicyConstraints
                | ExtensionKind::PrecertPoison
        )
    }

    /// RFC强制的critical标志；`None`表示两者皆可
    pub fn required_critical(&self) -> Option<bool> {
        match self {
            ExtensionKind::AuthorityInformationAccess
            | ExtensionKind::AuthorityKeyIdentifier
            | ExtensionKind::CrlNumber
            | ExtensionKind::FreshestCrl
            | ExtensionKind::SubjectKeyIdentifier => Some(false),
            ExtensionKind::DeltaCrlIndicator
            | ExtensionKind::InhibitAnyPolicy
            | ExtensionKind::NameConstraints
            | ExtensionKind::PolicyConstraints
            | ExtensionKind::PrecertPoison => Some(true),
            _ => None,
        }
    }

    /// 没有取值的扩展（编码为NULL）
    pub fn has_no_value(&self) -> bool {
        matches!(self, ExtensionKind::OcspNoCheck | ExtensionKind::PrecertPoison)
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExtensionKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| DecodeError::new(s, "unknown extension"))
    }
}

/// 扩展的类型化取值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionValue {
    AuthorityInformationAccess(Vec<AccessDescription>),
    AuthorityKeyIdentifier(AuthorityKeyIdentifier),
    BasicConstraints { ca: bool, path_length: Option<u8> },
    CrlDistributionPoints(Vec<DistributionPoint>),
    CrlNumber(u64),
    CertificatePolicies(Vec<PolicyInformation>),
    DeltaCrlIndicator(u64),
    ExtendedKeyUsage(Vec<ObjectIdentifier>),
    FreshestCrl(Vec<DistributionPoint>),
    InhibitAnyPolicy(u32),
    IssuerAlternativeName(Vec<GeneralName>),
    KeyUsage(BTreeSet<KeyUsage>),
    MsCertificateTemplate(MsCertificateTemplate),
    NameConstraints(NameConstraints),
    OcspNoCheck,
    PolicyConstraints(PolicyConstraints),
    PrecertPoison,
    SubjectAlternativeName(Vec<GeneralName>),
    SubjectInformationAccess(Vec<AccessDescription>),
    SubjectKeyIdentifier(Vec<u8>),
    TlsFeature(Vec<TlsFeature>),
}

impl ExtensionValue {
    pub fn kind(&self) -> ExtensionKind {
        match self {
            ExtensionValue::AuthorityInformationAccess(_) => ExtensionKind::AuthorityInformationAccess,
            ExtensionValue::AuthorityKeyIdentifier(_) => ExtensionKind::AuthorityKeyIdentifier,
            ExtensionValue::BasicConstraints { .. } => ExtensionKind::BasicConstraints,
            ExtensionValue::CrlDistributionPoints(_) => ExtensionKind::CrlDistributionPoints,
            ExtensionValue::CrlNumber(_) => ExtensionKind::CrlNumber,
            ExtensionValue::CertificatePolicies(_) => ExtensionKind::CertificatePolicies,
            ExtensionValue::DeltaCrlIndicator(_) => ExtensionKind::DeltaCrlIndicator,
            ExtensionValue::ExtendedKeyUsage(_) => ExtensionKind::ExtendedKeyUsage,
            ExtensionValue::FreshestCrl(_) => ExtensionKind::FreshestCrl,
            ExtensionValue::InhibitAnyPolicy(_) => ExtensionKind::InhibitAnyPolicy,
            ExtensionValue::IssuerAlternativeName(_) => ExtensionKind::IssuerAlternativeName,
            ExtensionValue::KeyUsage(_) => ExtensionKind::KeyUsage,
            ExtensionValue::MsCertificateTemplate(_) => ExtensionKind::MsCertificateTemplate,
            ExtensionValue::NameConstraints(_) => ExtensionKind::NameConstraints,
            ExtensionValue::OcspNoCheck => ExtensionKind::OcspNoCheck,
            ExtensionValue::PolicyConstraints(_) => ExtensionKind::PolicyConstraints,
            ExtensionValue::PrecertPoison => ExtensionKind::PrecertPoison,
            ExtensionValue::SubjectAlternativeName(_) => ExtensionKind::SubjectAlternativeName,
            ExtensionValue::SubjectInformationAccess(_) => ExtensionKind::SubjectInformationAccess,
            ExtensionValue::SubjectKeyIdentifier(_) => ExtensionKind::SubjectKeyIdentifier,
            ExtensionValue::TlsFeature(_) => ExtensionKind::TlsFeature,
        }
    }

    /// 检查该种扩展的结构约束
    pub fn validate(&self) -> Result<(), DecodeError> {
        let name = self.kind().name();
        match self {
            ExtensionValue::AuthorityInformationAccess(descriptions) => {
                values::validate_access_descriptions(
                    name,
                    descriptions,
                    &[oid::AD_OCSP, oid::AD_CA_ISSUERS],
                )
            }
            ExtensionValue::SubjectInformationAccess(descriptions) => {
                values::validate_access_descriptions(
                    name,
                    descriptions,
                    &[oid::AD_CA_REPOSITORY, oid::AD_TIME_STAMPING],
                )
            }
            ExtensionValue::AuthorityKeyIdentifier(aki) => aki.validate(),
            ExtensionValue::BasicConstraints { ca, path_length } => {
                if path_length.is_some() && !ca {
                    return Err(DecodeError::field(
                        name,
                        "path_length",
                        "only allowed when ca is true",
                    ));
                }
                Ok(())
            }
            ExtensionValue::CrlDistributionPoints(points) | ExtensionValue::FreshestCrl(points) => {
                values::non_empty(name, "value", points)?;
                points
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, point)| point.validate(name, i))
            }
            ExtensionValue::CertificatePolicies(policies) => {
                values::non_empty(name, "value", policies)?;
                policies
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, policy)| policy.validate(i))
            }
            ExtensionValue::ExtendedKeyUsage(usages) => values::non_empty(name, "value", usages),
            ExtensionValue::IssuerAlternativeName(names)
            | ExtensionValue::SubjectAlternativeName(names) => {
                values::non_empty(name, "value", names)
            }
            ExtensionValue::KeyUsage(usages) => values::validate_key_usage(usages),
            ExtensionValue::MsCertificateTemplate(template) => template.validate(),
            ExtensionValue::NameConstraints(constraints) => constraints.validate(),
            ExtensionValue::PolicyConstraints(constraints) => constraints.validate(),
            ExtensionValue::SubjectKeyIdentifier(identifier) => {
                values::non_empty(name, "value", identifier)
            }
            ExtensionValue::TlsFeature(features) => values::non_empty(name, "value", features),
            ExtensionValue::CrlNumber(_)
            | ExtensionValue::DeltaCrlIndicator(_)
            | ExtensionValue::InhibitAnyPolicy(_)
            | ExtensionValue::OcspNoCheck
            | ExtensionValue::PrecertPoison => Ok(()),
        }
    }
}

/// 带critical标志的扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub critical: bool,
    pub value: ExtensionValue,
}

impl Extension {
    /// 使用该种扩展的默认critical标志
    pub fn new(value: ExtensionValue) -> Self {
        Self {
            critical: value.kind().default_critical(),
            value,
        }
    }

    /// 显式指定critical；违反RFC强制要求时报错
    pub fn with_critical(value: ExtensionValue, critical: bool) -> Result<Self, DecodeError> {
        let kind = value.kind();
        check_critical(kind, critical)?;
        Ok(Self { critical, value })
    }

    pub fn kind(&self) -> ExtensionKind {
        self.value.kind()
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        check_critical(self.kind(), self.critical)?;
        self.value.validate()
    }

    /// 从JSON线格式解码
    pub fn from_wire(value: &serde_json::Value) -> Result<Self, DecodeError> {
        wire::decode(value)
    }

    /// 编码为JSON线格式
    pub fn to_wire(&self) -> serde_json::Value {
        wire::encode(self)
    }

    /// 编码为DER扩展
    pub fn to_x509(&self) -> Result<x509_cert::ext::Extension, PkiError> {
        self.validate()?;
        x509::encode(self)
    }

    /// 从DER扩展解码；不支持的OID返回`Ok(None)`
    pub fn from_x509(extension: &x509_cert::ext::Extension) -> Result<Option<Self>, PkiError> {
        x509::decode(extension)
    }
}

pub(crate) fn check_critical(kind: ExtensionKind, critical: bool) -> Result<(), DecodeError> {
    match kind.required_critical() {
        Some(required) if required != critical => Err(DecodeError::field(
            kind.name(),
            "critical",
            if required {
                "must be marked critical"
            } else {
                "must not be marked critical"
            },
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_and_oids_are_unique() {
        let names: BTreeSet<_> = ExtensionKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), ExtensionKind::ALL.len());
        for kind in ExtensionKind::ALL {
            assert_eq!(ExtensionKind::from_oid(&kind.oid()), Some(kind));
            assert_eq!(kind.name().parse::<ExtensionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_default_critical_satisfies_requirement() {
        for kind in ExtensionKind::ALL {
            if let Some(required) = kind.required_critical() {
                assert_eq!(kind.default_critical(), required, "{kind}");
            }
        }
    }

    #[test]
    fn test_with_critical_rejects_rfc_violation() {
        let err = Extension::with_critical(ExtensionValue::CrlNumber(1), true).unwrap_err();
        assert_eq!(err.extension, "crl_number");
        assert_eq!(err.field.as_deref(), Some("critical"));
        assert!(Extension::with_critical(ExtensionValue::OcspNoCheck, true).is_ok());
    }

    #[test]
    fn test_path_length_requires_ca() {
        let value = ExtensionValue::BasicConstraints {
            ca: false,
            path_length: Some(0),
        };
        assert!(value.validate().is_err());
    }
}
