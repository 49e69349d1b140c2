//! JSON线格式
//!
//! 单个扩展写作`{"type": "key_usage", "critical": true, "value": [...]}`，
//! `critical`可以省略。覆盖项是以扩展名为键的对象，每项为
//! `{"critical": bool?, "value": ...}`。编码结果是规范形式，
//! 因此`decode(encode(x)) == x`。

use std::collections::{BTreeMap, BTreeSet};

use der::asn1::ObjectIdentifier;
use serde_json::{json, Map, Value};

use super::{
    check_critical,
    general_name::{names_from_wire, names_to_wire, GeneralName},
    values::*,
    Extension, ExtensionKind, ExtensionValue,
};
use crate::{asn1, error::DecodeError, name::Subject, types::RevocationReason};

/// 调用者对某个扩展的覆盖；`critical`为`None`时沿用模板默认值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOverride {
    pub critical: Option<bool>,
    pub value: ExtensionValue,
}

impl ExtensionOverride {
    pub fn new(value: ExtensionValue) -> Self {
        Self {
            critical: None,
            value,
        }
    }

    pub fn with_critical(value: ExtensionValue, critical: bool) -> Self {
        Self {
            critical: Some(critical),
            value,
        }
    }

    pub fn kind(&self) -> ExtensionKind {
        self.value.kind()
    }

    /// 解码`{"critical": bool?, "value": ...}`
    pub fn from_wire(kind: ExtensionKind, entry: &Value) -> Result<Self, DecodeError> {
        let ext = kind.name();
        let map = entry
            .as_object()
            .ok_or_else(|| DecodeError::new(ext, "override must be an object"))?;
        if let Some(declared) = map.get("type") {
            if declared.as_str() != Some(ext) {
                return Err(DecodeError::field(ext, "type", "does not match the override key"));
            }
        }
        let critical = decode_critical(ext, map)?;
        if let Some(critical) = critical {
            check_critical(kind, critical)?;
        }
        let value = decode_value(kind, map.get("value").unwrap_or(&Value::Null))?;
        value.validate()?;
        Ok(Self { critical, value })
    }
}

/// 解码以扩展名为键的覆盖集合
pub fn overrides_from_wire(
    wire: &Value,
) -> Result<BTreeMap<ExtensionKind, ExtensionOverride>, DecodeError> {
    let map = wire
        .as_object()
        .ok_or_else(|| DecodeError::new("extensions", "must be an object keyed by extension name"))?;
    map.iter()
        .map(|(name, entry)| {
            let kind: ExtensionKind = name.parse()?;
            Ok((kind, ExtensionOverride::from_wire(kind, entry)?))
        })
        .collect()
}

pub(super) fn decode(wire: &Value) -> Result<Extension, DecodeError> {
    let map = wire
        .as_object()
        .ok_or_else(|| DecodeError::new("extension", "must be an object"))?;
    let name = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::field("extension", "type", "missing extension type"))?;
    let kind: ExtensionKind = name.parse()?;

    let critical = match decode_critical(name, map)? {
        Some(critical) => {
            check_critical(kind, critical)?;
            critical
        }
        None => kind.default_critical(),
    };
    let value = decode_value(kind, map.get("value").unwrap_or(&Value::Null))?;
    value.validate()?;
    Ok(Extension { critical, value })
}

pub(super) fn encode(extension: &Extension) -> Value {
    let mut map = Map::new();
    map.insert("type".into(), json!(extension.kind().name()));
    map.insert("critical".into(), json!(extension.critical));
    if !extension.kind().has_no_value() {
        map.insert("value".into(), encode_value(&extension.value));
    }
    Value::Object(map)
}

fn decode_critical(ext: &str, map: &Map<String, Value>) -> Result<Option<bool>, DecodeError> {
    match map.get("critical") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(critical)) => Ok(Some(*critical)),
        Some(_) => Err(DecodeError::field(ext, "critical", "must be a boolean")),
    }
}

// ============================================================================
// 取值
// ============================================================================

fn decode_value(kind: ExtensionKind, value: &Value) -> Result<ExtensionValue, DecodeError> {
    let ext = kind.name();
    let decoded = match kind {
        ExtensionKind::AuthorityInformationAccess => {
            ExtensionValue::AuthorityInformationAccess(decode_access_descriptions(ext, value)?)
        }
        ExtensionKind::SubjectInformationAccess => {
            ExtensionValue::SubjectInformationAccess(decode_access_descriptions(ext, value)?)
        }
        ExtensionKind::AuthorityKeyIdentifier => {
            ExtensionValue::AuthorityKeyIdentifier(decode_authority_key_identifier(value)?)
        }
        ExtensionKind::BasicConstraints => {
            let map = object(ext, "value", value)?;
            let ca = match map.get("ca") {
                None | Some(Value::Null) => false,
                Some(Value::Bool(ca)) => *ca,
                Some(_) => return Err(DecodeError::field(ext, "ca", "must be a boolean")),
            };
            let path_length = optional_u64(ext, "path_length", map.get("path_length"))?
                .map(|length| {
                    u8::try_from(length)
                        .map_err(|_| DecodeError::field(ext, "path_length", "must be at most 255"))
                })
                .transpose()?;
            ExtensionValue::BasicConstraints { ca, path_length }
        }
        ExtensionKind::CrlDistributionPoints => {
            ExtensionValue::CrlDistributionPoints(decode_distribution_points(ext, value)?)
        }
        ExtensionKind::FreshestCrl => {
            ExtensionValue::FreshestCrl(decode_distribution_points(ext, value)?)
        }
        ExtensionKind::CrlNumber => ExtensionValue::CrlNumber(integer(ext, "value", value)?),
        ExtensionKind::DeltaCrlIndicator => {
            ExtensionValue::DeltaCrlIndicator(integer(ext, "value", value)?)
        }
        ExtensionKind::InhibitAnyPolicy => {
            ExtensionValue::InhibitAnyPolicy(small_integer(ext, "value", value)?)
        }
        ExtensionKind::CertificatePolicies => {
            ExtensionValue::CertificatePolicies(decode_policies(value)?)
        }
        ExtensionKind::ExtendedKeyUsage => {
            let usages = array(ext, "value", value)?
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let field = format!("value[{i}]");
                    let name = string(ext, &field, item)?;
                    extended_key_usage_from_name(name).ok_or_else(|| {
                        DecodeError::field(ext, field, format!("unknown extended key usage: {name}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            ExtensionValue::ExtendedKeyUsage(usages)
        }
        ExtensionKind::IssuerAlternativeName => {
            ExtensionValue::IssuerAlternativeName(names_from_wire(ext, "value", value)?)
        }
        ExtensionKind::SubjectAlternativeName => {
            ExtensionValue::SubjectAlternativeName(names_from_wire(ext, "value", value)?)
        }
        ExtensionKind::KeyUsage => {
            let usages = array(ext, "value", value)?
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let field = format!("value[{i}]");
                    let token = string(ext, &field, item)?;
                    KeyUsage::from_name(token).ok_or_else(|| {
                        DecodeError::field(ext, field, format!("unknown key usage: {token}"))
                    })
                })
                .collect::<Result<BTreeSet<_>, _>>()?;
            ExtensionValue::KeyUsage(usages)
        }
        ExtensionKind::MsCertificateTemplate => {
            let map = object(ext, "value", value)?;
            let template_id = oid_value(
                ext,
                "template_id",
                map.get("template_id").unwrap_or(&Value::Null),
            )?;
            ExtensionValue::MsCertificateTemplate(MsCertificateTemplate {
                template_id,
                major_version: optional_u32(ext, "major_version", map.get("major_version"))?,
                minor_version: optional_u32(ext, "minor_version", map.get("minor_version"))?,
            })
        }
        ExtensionKind::NameConstraints => {
            let map = object(ext, "value", value)?;
            let subtree = |field: &str| match map.get(field) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(names) => names_from_wire(ext, field, names),
            };
            ExtensionValue::NameConstraints(NameConstraints {
                permitted_subtrees: subtree("permitted_subtrees")?,
                excluded_subtrees: subtree("excluded_subtrees")?,
            })
        }
        ExtensionKind::PolicyConstraints => {
            let map = object(ext, "value", value)?;
            ExtensionValue::PolicyConstraints(PolicyConstraints {
                require_explicit_policy: optional_u32(
                    ext,
                    "require_explicit_policy",
                    map.get("require_explicit_policy"),
                )?,
                inhibit_policy_mapping: optional_u32(
                    ext,
                    "inhibit_policy_mapping",
                    map.get("inhibit_policy_mapping"),
                )?,
            })
        }
        ExtensionKind::OcspNoCheck | ExtensionKind::PrecertPoison => {
            if !value.is_null() {
                return Err(DecodeError::field(ext, "value", "this extension has no value"));
            }
            if kind == ExtensionKind::OcspNoCheck {
                ExtensionValue::OcspNoCheck
            } else {
                ExtensionValue::PrecertPoison
            }
        }
        ExtensionKind::SubjectKeyIdentifier => {
            ExtensionValue::SubjectKeyIdentifier(hex_value(ext, "value", value)?)
        }
        ExtensionKind::TlsFeature => {
            let features = array(ext, "value", value)?
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let field = format!("value[{i}]");
                    let name = string(ext, &field, item)?;
                    TlsFeature::from_name(name).ok_or_else(|| {
                        DecodeError::field(ext, field, format!("unknown TLS feature: {name}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            ExtensionValue::TlsFeature(features)
        }
    };
    Ok(decoded)
}

fn encode_value(value: &ExtensionValue) -> Value {
    match value {
        ExtensionValue::AuthorityInformationAccess(descriptions)
        | ExtensionValue::SubjectInformationAccess(descriptions) => Value::Array(
            descriptions
                .iter()
                .map(|description| {
                    json!({
                        "access_method": access_method_name(&description.access_method),
                        "access_location": description.access_location.to_wire(),
                    })
                })
                .collect(),
        ),
        ExtensionValue::AuthorityKeyIdentifier(aki) => {
            let mut map = Map::new();
            if let Some(key_identifier) = &aki.key_identifier {
                map.insert("key_identifier".into(), json!(encode_hex(key_identifier)));
            }
            if let Some(issuer) = &aki.authority_cert_issuer {
                map.insert("authority_cert_issuer".into(), names_to_wire(issuer));
            }
            if let Some(serial) = &aki.authority_cert_serial_number {
                map.insert("authority_cert_serial_number".into(), json!(serial));
            }
            Value::Object(map)
        }
        ExtensionValue::BasicConstraints { ca, path_length } => match path_length {
            Some(length) => json!({ "ca": ca, "path_length": length }),
            None => json!({ "ca": ca }),
        },
        ExtensionValue::CrlDistributionPoints(points) | ExtensionValue::FreshestCrl(points) => {
            Value::Array(points.iter().map(encode_distribution_point).collect())
        }
        ExtensionValue::CrlNumber(number) | ExtensionValue::DeltaCrlIndicator(number) => {
            json!(number)
        }
        ExtensionValue::InhibitAnyPolicy(skip_certs) => json!(skip_certs),
        ExtensionValue::CertificatePolicies(policies) => {
            Value::Array(policies.iter().map(encode_policy).collect())
        }
        ExtensionValue::ExtendedKeyUsage(usages) => Value::Array(
            usages
                .iter()
                .map(|usage| json!(extended_key_usage_name(usage)))
                .collect(),
        ),
        ExtensionValue::IssuerAlternativeName(names)
        | ExtensionValue::SubjectAlternativeName(names) => names_to_wire(names),
        ExtensionValue::KeyUsage(usages) => {
            Value::Array(usages.iter().map(|usage| json!(usage.name())).collect())
        }
        ExtensionValue::MsCertificateTemplate(template) => {
            let mut map = Map::new();
            map.insert("template_id".into(), json!(template.template_id.to_string()));
            if let Some(major) = template.major_version {
                map.insert("major_version".into(), json!(major));
            }
            if let Some(minor) = template.minor_version {
                map.insert("minor_version".into(), json!(minor));
            }
            Value::Object(map)
        }
        ExtensionValue::NameConstraints(constraints) => {
            let mut map = Map::new();
            if !constraints.permitted_subtrees.is_empty() {
                map.insert(
                    "permitted_subtrees".into(),
                    names_to_wire(&constraints.permitted_subtrees),
                );
            }
            if !constraints.excluded_subtrees.is_empty() {
                map.insert(
                    "excluded_subtrees".into(),
                    names_to_wire(&constraints.excluded_subtrees),
                );
            }
            Value::Object(map)
        }
        ExtensionValue::PolicyConstraints(constraints) => {
            let mut map = Map::new();
            if let Some(value) = constraints.require_explicit_policy {
                map.insert("require_explicit_policy".into(), json!(value));
            }
            if let Some(value) = constraints.inhibit_policy_mapping {
                map.insert("inhibit_policy_mapping".into(), json!(value));
            }
            Value::Object(map)
        }
        ExtensionValue::OcspNoCheck | ExtensionValue::PrecertPoison => Value::Null,
        ExtensionValue::SubjectKeyIdentifier(identifier) => json!(encode_hex(identifier)),
        ExtensionValue::TlsFeature(features) => {
            Value::Array(features.iter().map(|feature| json!(feature.name())).collect())
        }
    }
}

fn decode_access_descriptions(
    ext: &str,
    value: &Value,
) -> Result<Vec<AccessDescription>, DecodeError> {
    array(ext, "value", value)?
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let field = format!("value[{i}]");
            let map = object(ext, &field, item)?;
            let method_field = format!("{field}.access_method");
            let method = string(
                ext,
                &method_field,
                map.get("access_method").unwrap_or(&Value::Null),
            )?;
            let access_method = access_method_from_name(method).ok_or_else(|| {
                DecodeError::field(ext, &method_field, format!("unknown access method: {method}"))
            })?;
            let location_field = format!("{field}.access_location");
            let location = map
                .get("access_location")
                .ok_or_else(|| DecodeError::field(ext, &location_field, "is required"))?;
            let access_location = GeneralName::from_wire(location)
                .map_err(|reason| DecodeError::field(ext, &location_field, reason))?;
            Ok(AccessDescription {
                access_method,
                access_location,
            })
        })
        .collect()
}

fn decode_authority_key_identifier(value: &Value) -> Result<AuthorityKeyIdentifier, DecodeError> {
    const EXT: &str = "authority_key_identifier";
    // 单独的十六进制字符串视为key_identifier
    if value.is_string() {
        return Ok(AuthorityKeyIdentifier {
            key_identifier: Some(hex_value(EXT, "key_identifier", value)?),
            ..Default::default()
        });
    }
    let map = object(EXT, "value", value)?;
    let key_identifier = match map.get("key_identifier") {
        None | Some(Value::Null) => None,
        Some(value) => Some(hex_value(EXT, "key_identifier", value)?),
    };
    let authority_cert_issuer = match map.get("authority_cert_issuer") {
        None | Some(Value::Null) => None,
        Some(value) => Some(names_from_wire(EXT, "authority_cert_issuer", value)?),
    };
    let authority_cert_serial_number = match map.get("authority_cert_serial_number") {
        None | Some(Value::Null) => None,
        Some(Value::Number(number)) => {
            let serial = number.as_u64().ok_or_else(|| {
                DecodeError::field(EXT, "authority_cert_serial_number", "must be a positive integer")
            })?;
            Some(format!("{serial:X}"))
        }
        Some(Value::String(serial)) => {
            // 接受奇数位和冒号分隔的十六进制，统一为无前导零的大写形式
            let cleaned: String = serial.chars().filter(|c| *c != ':').collect();
            if cleaned.is_empty() {
                return Err(DecodeError::field(
                    EXT,
                    "authority_cert_serial_number",
                    "must not be empty",
                ));
            }
            let parsed = asn1::serial_from_hex(&cleaned).map_err(|_| {
                DecodeError::field(
                    EXT,
                    "authority_cert_serial_number",
                    format!("invalid hex value {serial}"),
                )
            })?;
            Some(asn1::serial_to_hex(&parsed))
        }
        Some(_) => {
            return Err(DecodeError::field(
                EXT,
                "authority_cert_serial_number",
                "must be an integer or a hex string",
            ))
        }
    };
    Ok(AuthorityKeyIdentifier {
        key_identifier,
        authority_cert_issuer,
        authority_cert_serial_number,
    })
}

fn decode_distribution_points(
    ext: &str,
    value: &Value,
) -> Result<Vec<DistributionPoint>, DecodeError> {
    array(ext, "value", value)?
        .iter()
        .enumerate()
        .map(|(i, item)| decode_distribution_point(ext, item).map_err(|e| e.within(&format!("value[{i}]"))))
        .collect()
}

fn decode_distribution_point(ext: &str, value: &Value) -> Result<DistributionPoint, DecodeError> {
    let map = value
        .as_object()
        .ok_or_else(|| DecodeError::new(ext, "distribution point must be an object"))?;
    let full_name = map.get("full_name").filter(|v| !v.is_null());
    let relative_name = map.get("relative_name").filter(|v| !v.is_null());

    let name = match (full_name, relative_name) {
        (Some(_), Some(_)) => {
            return Err(DecodeError::new(
                ext,
                "full_name and relative_name are mutually exclusive",
            ))
        }
        (None, None) => {
            return Err(DecodeError::new(
                ext,
                "one of full_name and relative_name is required",
            ))
        }
        (Some(names), None) => {
            DistributionPointName::FullName(names_from_wire(ext, "full_name", names)?)
        }
        (None, Some(relative)) => {
            let text = relative.as_str().ok_or_else(|| {
                DecodeError::field(ext, "relative_name", "must be a string such as CN=example")
            })?;
            let subject: Subject = text
                .parse()
                .map_err(|e| DecodeError::field(ext, "relative_name", format!("{e}")))?;
            DistributionPointName::RelativeName(subject)
        }
    };

    let reasons = match map.get("reasons") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            array(ext, "reasons", value)?
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let field = format!("reasons[{i}]");
                    let reason = string(ext, &field, item)?;
                    reason
                        .parse::<RevocationReason>()
                        .map_err(|_| DecodeError::field(ext, field, format!("unknown reason: {reason}")))
                })
                .collect::<Result<BTreeSet<_>, _>>()?,
        ),
    };
    let crl_issuer = match map.get("crl_issuer") {
        None | Some(Value::Null) => None,
        Some(value) => Some(names_from_wire(ext, "crl_issuer", value)?),
    };

    Ok(DistributionPoint {
        name,
        reasons,
        crl_issuer,
    })
}

fn encode_distribution_point(point: &DistributionPoint) -> Value {
    let mut map = Map::new();
    match &point.name {
        DistributionPointName::FullName(names) => {
            map.insert("full_name".into(), names_to_wire(names));
        }
        DistributionPointName::RelativeName(subject) => {
            map.insert("relative_name".into(), json!(subject.to_string()));
        }
    }
    if let Some(reasons) = &point.reasons {
        map.insert(
            "reasons".into(),
            Value::Array(reasons.iter().map(|reason| json!(reason.name())).collect()),
        );
    }
    if let Some(issuer) = &point.crl_issuer {
        map.insert("crl_issuer".into(), names_to_wire(issuer));
    }
    Value::Object(map)
}

fn decode_policies(value: &Value) -> Result<Vec<PolicyInformation>, DecodeError> {
    const EXT: &str = "certificate_policies";
    array(EXT, "value", value)?
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let field = format!("value[{i}]");
            let map = object(EXT, &field, item)?;
            let policy_identifier = oid_value(
                EXT,
                &format!("{field}.policy_identifier"),
                map.get("policy_identifier").unwrap_or(&Value::Null),
            )?;
            let policy_qualifiers = match map.get("policy_qualifiers") {
                None | Some(Value::Null) => Vec::new(),
                Some(qualifiers) => array(EXT, &format!("{field}.policy_qualifiers"), qualifiers)?
                    .iter()
                    .enumerate()
                    .map(|(j, qualifier)| {
                        decode_policy_qualifier(qualifier)
                            .map_err(|e| e.within(&format!("{field}.policy_qualifiers[{j}]")))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(PolicyInformation {
                policy_identifier,
                policy_qualifiers,
            })
        })
        .collect()
}

fn decode_policy_qualifier(value: &Value) -> Result<PolicyQualifier, DecodeError> {
    const EXT: &str = "certificate_policies";
    match value {
        Value::String(text) => Ok(PolicyQualifier::Cps(text.clone())),
        Value::Object(map) => {
            let notice_reference = match map.get("notice_reference") {
                None | Some(Value::Null) => None,
                Some(reference) => {
                    let reference = object(EXT, "notice_reference", reference)?;
                    let organization = string(
                        EXT,
                        "notice_reference.organization",
                        reference.get("organization").unwrap_or(&Value::Null),
                    )?
                    .to_string();
                    let notice_numbers = array(
                        EXT,
                        "notice_reference.notice_numbers",
                        reference.get("notice_numbers").unwrap_or(&Value::Null),
                    )?
                    .iter()
                    .map(|number| small_integer(EXT, "notice_reference.notice_numbers", number))
                    .collect::<Result<Vec<_>, _>>()?;
                    Some(NoticeReference {
                        organization,
                        notice_numbers,
                    })
                }
            };
            let explicit_text = match map.get("explicit_text") {
                None | Some(Value::Null) => None,
                Some(text) => Some(string(EXT, "explicit_text", text)?.to_string()),
            };
            if notice_reference.is_none() && explicit_text.is_none() {
                return Err(DecodeError::new(
                    EXT,
                    "user notice needs notice_reference or explicit_text",
                ));
            }
            Ok(PolicyQualifier::UserNotice {
                notice_reference,
                explicit_text,
            })
        }
        _ => Err(DecodeError::new(
            EXT,
            "policy qualifier must be a string or a user notice object",
        )),
    }
}

fn encode_policy(policy: &PolicyInformation) -> Value {
    let mut map = Map::new();
    map.insert(
        "policy_identifier".into(),
        json!(policy.policy_identifier.to_string()),
    );
    if !policy.policy_qualifiers.is_empty() {
        let qualifiers = policy
            .policy_qualifiers
            .iter()
            .map(|qualifier| match qualifier {
                PolicyQualifier::Cps(text) => json!(text),
                PolicyQualifier::UserNotice {
                    notice_reference,
                    explicit_text,
                } => {
                    let mut notice = Map::new();
                    if let Some(reference) = notice_reference {
                        notice.insert(
                            "notice_reference".into(),
                            json!({
                                "organization": reference.organization,
                                "notice_numbers": reference.notice_numbers,
                            }),
                        );
                    }
                    if let Some(text) = explicit_text {
                        notice.insert("explicit_text".into(), json!(text));
                    }
                    Value::Object(notice)
                }
            })
            .collect();
        map.insert("policy_qualifiers".into(), Value::Array(qualifiers));
    }
    Value::Object(map)
}

// ============================================================================
// 基本类型
// ============================================================================

fn array<'a>(ext: &str, field: &str, value: &'a Value) -> Result<&'a Vec<Value>, DecodeError> {
    value
        .as_array()
        .ok_or_else(|| DecodeError::field(ext, field, "expected a list"))
}

fn object<'a>(
    ext: &str,
    field: &str,
    value: &'a Value,
) -> Result<&'a Map<String, Value>, DecodeError> {
    value
        .as_object()
        .ok_or_else(|| DecodeError::field(ext, field, "expected an object"))
}

fn string<'a>(ext: &str, field: &str, value: &'a Value) -> Result<&'a str, DecodeError> {
    value
        .as_str()
        .ok_or_else(|| DecodeError::field(ext, field, "expected a string"))
}

fn integer(ext: &str, field: &str, value: &Value) -> Result<u64, DecodeError> {
    value
        .as_u64()
        .ok_or_else(|| DecodeError::field(ext, field, "expected a non-negative integer"))
}

fn small_integer(ext: &str, field: &str, value: &Value) -> Result<u32, DecodeError> {
    u32::try_from(integer(ext, field, value)?)
        .map_err(|_| DecodeError::field(ext, field, "integer out of range"))
}

fn optional_u64(ext: &str, field: &str, value: Option<&Value>) -> Result<Option<u64>, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => integer(ext, field, value).map(Some),
    }
}

fn optional_u32(ext: &str, field: &str, value: Option<&Value>) -> Result<Option<u32>, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => small_integer(ext, field, value).map(Some),
    }
}

fn oid_value(ext: &str, field: &str, value: &Value) -> Result<ObjectIdentifier, DecodeError> {
    let text = string(ext, field, value)?;
    text.parse()
        .map_err(|_| DecodeError::field(ext, field, format!("not a valid OID: {text}")))
}

fn hex_value(ext: &str, field: &str, value: &Value) -> Result<Vec<u8>, DecodeError> {
    let text = string(ext, field, value)?;
    decode_hex(text).map_err(|reason| DecodeError::field(ext, field, reason))
}

/// 接受`AB:CD:EF`或`abcdef`
fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    let cleaned: String = text.chars().filter(|c| *c != ':').collect();
    hex::decode(&cleaned).map_err(|e| format!("invalid hex value {text}: {e}"))
}

/// `AB:CD:EF`
pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_ok(wire: Value) -> Extension {
        decode(&wire).unwrap()
    }

    #[test]
    fn test_key_usage_default_critical_and_unknown_token() {
        let ext = decode_ok(json!({
            "type": "key_usage",
            "value": ["key_encipherment", "digital_signature"]
        }));
        assert!(ext.critical);
        assert_eq!(
            encode(&ext),
            json!({
                "type": "key_usage",
                "critical": true,
                "value": ["digital_signature", "key_encipherment"]
            })
        );

        let err = decode(&json!({"type": "key_usage", "value": ["digital_signature", "sign_all"]}))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("value[1]"));
        assert!(err.reason.contains("sign_all"));
    }

    #[test]
    fn test_distribution_point_needs_exactly_one_name() {
        let both = json!({
            "type": "crl_distribution_points",
            "value": [{
                "full_name": ["URI:http://crl.example.com/ca.crl"],
                "relative_name": "CN=crl"
            }]
        });
        let err = decode(&both).unwrap_err();
        assert!(err.reason.contains("mutually exclusive"));
        assert_eq!(err.field.as_deref(), Some("value[0]"));

        let neither = json!({
            "type": "crl_distribution_points",
            "value": [{"reasons": ["key_compromise"]}]
        });
        assert!(decode(&neither).is_err());
    }

    #[test]
    fn test_policy_qualifiers() {
        let wire = json!({
            "type": "certificate_policies",
            "critical": false,
            "value": [{
                "policy_identifier": "2.5.29.32.0",
                "policy_qualifiers": [
                    "https://ca.example.com/cps",
                    {
                        "notice_reference": {"organization": "Example", "notice_numbers": [1, 2]},
                        "explicit_text": "Example policy"
                    }
                ]
            }]
        });
        let ext = decode_ok(wire.clone());
        assert_eq!(encode(&ext), wire);

        let bad = json!({
            "type": "certificate_policies",
            "value": [{"policy_identifier": "2.5.29.32.0", "policy_qualifiers": [{}]}]
        });
        let err = decode(&bad).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("value[0].policy_qualifiers[0]"));
    }

    #[test]
    fn test_required_criticality() {
        let err = decode(&json!({"type": "name_constraints", "critical": false, "value": {
            "permitted_subtrees": ["DNS:.example.com"]
        }}))
        .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("critical"));

        let err = decode(&json!({"type": "subject_key_identifier", "critical": "yes", "value": "AB"}))
            .unwrap_err();
        assert_eq!(err.reason, "must be a boolean");
    }

    #[test]
    fn test_valueless_extensions() {
        let ext = decode_ok(json!({"type": "ocsp_no_check"}));
        assert_eq!(ext.value, ExtensionValue::OcspNoCheck);
        assert!(!ext.critical);
        assert_eq!(encode(&ext), json!({"type": "ocsp_no_check", "critical": false}));
        assert!(decode(&json!({"type": "precert_poison", "value": 1})).is_err());
    }

    #[test]
    fn test_aki_serial_forms() {
        let ext = decode_ok(json!({
            "type": "authority_key_identifier",
            "value": {
                "key_identifier": "ab:cd",
                "authority_cert_issuer": [{"type": "dirName", "value": "CN=Root"}],
                "authority_cert_serial_number": 255
            }
        }));
        match &ext.value {
            ExtensionValue::AuthorityKeyIdentifier(aki) => {
                assert_eq!(aki.key_identifier.as_deref(), Some(&[0xab, 0xcd][..]));
                assert_eq!(aki.authority_cert_serial_number.as_deref(), Some("FF"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(decode(&encode(&ext)).unwrap(), ext);

        for (serial, normalized) in [
            (json!(2748), "ABC"),
            (json!("0A:BC"), "ABC"),
            (json!("abc"), "ABC"),
            (json!("000f"), "F"),
            (json!("00"), "0"),
        ] {
            let ext = decode_ok(json!({
                "type": "authority_key_identifier",
                "value": {
                    "authority_cert_issuer": ["DNS:ca.test"],
                    "authority_cert_serial_number": serial
                }
            }));
            match &ext.value {
                ExtensionValue::AuthorityKeyIdentifier(aki) => {
                    assert_eq!(aki.authority_cert_serial_number.as_deref(), Some(normalized));
                }
                other => panic!("unexpected {other:?}"),
            }
            assert_eq!(decode(&encode(&ext)).unwrap(), ext);
        }

        for bad in [json!(""), json!("xyz"), json!(-1)] {
            let err = decode(&json!({
                "type": "authority_key_identifier",
                "value": {
                    "authority_cert_issuer": ["DNS:ca.test"],
                    "authority_cert_serial_number": bad
                }
            }))
            .unwrap_err();
            assert_eq!(err.field.as_deref(), Some("authority_cert_serial_number"));
        }
    }

    /// 每种扩展一个有代表性的线格式取值
    fn wire_samples() -> Vec<Value> {
        vec![
            json!({"type": "authority_information_access", "value": [
                {"access_method": "ocsp", "access_location": "URI:http://ocsp.example.com"},
                {"access_method": "ca_issuers", "access_location": {"type": "URI", "value": "http://ca.example.com/ca.der"}}
            ]}),
            json!({"type": "authority_key_identifier", "value": {
                "key_identifier": "0a:bc:de",
                "authority_cert_issuer": [{"type": "dirName", "value": "CN=Root,O=Example"}],
                "authority_cert_serial_number": "0ABC"
            }}),
            json!({"type": "basic_constraints", "value": {"ca": true, "path_length": 0}}),
            json!({"type": "crl_distribution_points", "value": [
                {"full_name": ["URI:http://crl.example.com/ca.crl"], "reasons": ["key_compromise", "superseded"]},
                {"relative_name": "CN=crl", "crl_issuer": ["DNS:crl.example.com"]}
            ]}),
            json!({"type": "crl_number", "value": u64::MAX}),
            json!({"type": "certificate_policies", "value": [
                {"policy_identifier": "2.23.140.1.2.1"},
                {"policy_identifier": "1.3.6.1.4.1.99999.1", "policy_qualifiers": [
                    "https://ca.example.com/cps",
                    {"explicit_text": "only text"}
                ]}
            ]}),
            json!({"type": "delta_crl_indicator", "value": 7}),
            json!({"type": "extended_key_usage", "value": ["serverAuth", "1.3.6.1.4.1.99999.7"]}),
            json!({"type": "freshest_crl", "value": [
                {"full_name": ["URI:http://crl.example.com/delta.crl"]}
            ]}),
            json!({"type": "inhibit_any_policy", "value": 2}),
            json!({"type": "issuer_alternative_name", "value": ["URI:https://ca.example.com", "email:ca@example.com"]}),
            json!({"type": "key_usage", "value": ["key_agreement", "encipher_only", "digital_signature"]}),
            json!({"type": "ms_certificate_template", "value": {
                "template_id": "1.3.6.1.4.1.311.21.8.1", "major_version": 100
            }}),
            json!({"type": "name_constraints", "value": {
                "permitted_subtrees": ["DNS:.example.com", {"type": "IP", "value": "10.0.0.0/8"}],
                "excluded_subtrees": [{"type": "IP", "value": "2001:db8::/32"}]
            }}),
            json!({"type": "ocsp_no_check"}),
            json!({"type": "policy_constraints", "value": {"inhibit_policy_mapping": 0}}),
            json!({"type": "precert_poison"}),
            json!({"type": "subject_alternative_name", "value": [
                "DNS:example.com",
                {"type": "IP", "value": "192.0.2.1"},
                {"type": "IP", "value": "::1"},
                {"type": "RID", "value": "1.2.3.4"},
                {"type": "dirName", "value": "CN=alt"}
            ]}),
            json!({"type": "subject_information_access", "value": [
                {"access_method": "ca_repository", "access_location": "URI:http://repo.example.com"}
            ]}),
            json!({"type": "subject_key_identifier", "value": "01:02:03"}),
            json!({"type": "tls_feature", "value": ["OCSPMustStaple", "status_request_v2"]}),
        ]
    }

    #[test]
    fn test_every_kind_round_trips() {
        let mut covered = BTreeSet::new();
        for wire in wire_samples() {
            let ext = decode(&wire).unwrap_or_else(|e| panic!("{wire}: {e:?}"));
            covered.insert(ext.kind());
            let encoded = encode(&ext);
            assert_eq!(decode(&encoded).unwrap(), ext, "{wire}");
            // the canonical form is a fixed point
            assert_eq!(encode(&decode(&encoded).unwrap()), encoded);
        }
        assert_eq!(covered.len(), ExtensionKind::ALL.len());
    }

    proptest::proptest! {
        #[test]
        fn aki_serial_round_trips(serial in proptest::prelude::any::<u64>(), zeros in 0usize..3, colons in proptest::prelude::any::<bool>()) {
            let hex = format!("{}{:x}", "0".repeat(zeros), serial);
            let text = if colons {
                hex.chars()
                    .collect::<Vec<_>>()
                    .chunks(2)
                    .map(|pair| pair.iter().collect::<String>())
                    .collect::<Vec<_>>()
                    .join(":")
            } else {
                hex
            };
            for value in [json!(serial), json!(text)] {
                let ext = decode(&json!({
                    "type": "authority_key_identifier",
                    "value": {
                        "authority_cert_issuer": ["DNS:ca.test"],
                        "authority_cert_serial_number": value
                    }
                })).unwrap();
                match &ext.value {
                    ExtensionValue::AuthorityKeyIdentifier(aki) => {
                        let expected = format!("{serial:X}");
                        proptest::prop_assert_eq!(aki.authority_cert_serial_number.as_deref(), Some(expected.as_str()));
                    }
                    other => panic!("unexpected {other:?}"),
                }
                proptest::prop_assert_eq!(decode(&encode(&ext)).unwrap(), ext);
            }
        }

        #[test]
        fn general_names_round_trip(label in "[a-z][a-z0-9]{0,12}", octets in proptest::prelude::any::<[u8; 4]>(), prefix in 0u8..=32) {
            let wire = json!({"type": "subject_alternative_name", "value": [
                format!("DNS:{label}.example.com"),
                {"type": "IP", "value": std::net::Ipv4Addr::from(octets).to_string()},
                {"type": "URI", "value": format!("https://{label}.example.com/")},
            ]});
            let ext = decode(&wire).unwrap();
            proptest::prop_assert_eq!(decode(&encode(&ext)).unwrap(), ext);

            let network = std::net::Ipv4Addr::from(u32::from_be_bytes(octets) & u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0));
            let constraints = json!({"type": "name_constraints", "value": {
                "permitted_subtrees": [{"type": "IP", "value": format!("{network}/{prefix}")}]
            }});
            let ext = decode(&constraints).unwrap();
            proptest::prop_assert_eq!(decode(&encode(&ext)).unwrap(), ext);
        }
    }

    #[test]
    fn test_overrides_keyed_by_name() {
        let overrides = overrides_from_wire(&json!({
            "subject_alternative_name": {"value": ["DNS:example.com"]},
            "tls_feature": {"critical": true, "value": ["OCSPMustStaple"]}
        }))
        .unwrap();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[&ExtensionKind::SubjectAlternativeName].critical, None);
        assert_eq!(
            overrides[&ExtensionKind::TlsFeature].value,
            ExtensionValue::TlsFeature(vec![TlsFeature::StatusRequest])
        );
        assert!(overrides_from_wire(&json!({"no_such_extension": {"value": 1}})).is_err());
    }
}
