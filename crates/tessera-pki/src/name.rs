//! 证书主体（Subject）
//!
//! 主体是有序的`(属性, 值)`列表，支持`CN=example.com,O=Org`与
//! `/C=AT/CN=example.com`两种写法，并可与X.509 `Name`互相转换。

use std::{fmt, str::FromStr};

use der::{
    asn1::{Ia5StringRef, ObjectIdentifier, PrintableStringRef, SetOfVec, Utf8StringRef},
    Any, Tag, Tagged,
};
use serde::{Deserialize, Serialize};
use x509_cert::{
    attr::AttributeTypeAndValue,
    name::{Name, RdnSequence, RelativeDistinguishedName},
};

use crate::{
    error::{PkiError, Result},
    oid,
};

/// 属性简称与OID的对应表
const ATTRIBUTE_NAMES: &[(&str, ObjectIdentifier)] = &[
    ("C", oid::AT_COUNTRY),
    ("ST", oid::AT_STATE),
    ("L", oid::AT_LOCALITY),
    ("O", oid::AT_ORGANIZATION),
    ("OU", oid::AT_ORGANIZATIONAL_UNIT),
    ("CN", oid::AT_COMMON_NAME),
    ("emailAddress", oid::AT_EMAIL_ADDRESS),
    ("serialNumber", oid::AT_SERIAL_NUMBER),
    ("DC", oid::AT_DOMAIN_COMPONENT),
    ("UID", oid::AT_USER_ID),
    ("title", oid::AT_TITLE),
    ("GN", oid::AT_GIVEN_NAME),
    ("SN", oid::AT_SURNAME),
];

/// 主体中的单个属性
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameAttribute {
    /// 属性简称（如`CN`），未知属性使用点分OID
    pub attribute: String,
    pub value: String,
}

/// 证书主体，保持属性的书写顺序
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject {
    attributes: Vec<NameAttribute>,
}

impl Subject {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加属性；属性名可以是简称或点分OID
    pub fn push(&mut self, attribute: &str, value: impl Into<String>) -> Result<()> {
        let canonical = canonical_attribute(attribute)?;
        let value = value.into();
        if value.is_empty() {
            return Err(PkiError::SubjectError(format!("{canonical} has an empty value")));
        }
        if canonical == "C" && value.len() != 2 {
            return Err(PkiError::SubjectError(format!(
                "country code must have two characters: {value}"
            )));
        }
        self.attributes.push(NameAttribute {
            attribute: canonical,
            value,
        });
        Ok(())
    }

    pub fn with(mut self, attribute: &str, value: impl Into<String>) -> Result<Self> {
        self.push(attribute, value)?;
        Ok(self)
    }

    pub fn attributes(&self) -> &[NameAttribute] {
        &self.attributes
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// 所有CN的值
    pub fn common_names(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|attr| attr.attribute == "CN")
            .map(|attr| attr.value.as_str())
            .collect()
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_names().into_iter().next()
    }

    /// 转换为X.509名称，每个属性单独一个RDN
    pub fn to_name(&self) -> Result<Name> {
        let rdns = self
            .attributes
            .iter()
            .map(|attr| {
                let mut set = SetOfVec::new();
                set.insert(to_attribute_type_and_value(attr)?).map_err(|e| {
                    PkiError::SubjectError(format!("Failed to add {}: {}", attr.attribute, e))
                })?;
                Ok(RelativeDistinguishedName(set))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RdnSequence(rdns))
    }

    /// 从X.509名称解析；多值RDN被展开为连续属性
    pub fn from_name(name: &Name) -> Result<Self> {
        let mut attributes = Vec::new();
        for rdn in name.0.iter() {
            for atv in rdn.0.iter() {
                attributes.push(NameAttribute {
                    attribute: attribute_name(&atv.oid),
                    value: attribute_value(&atv.value)?,
                });
            }
        }
        Ok(Self { attributes })
    }

    /// 解析`/C=AT/CN=example.com`形式（OpenSSL风格）
    fn parse_slashed(input: &str) -> Result<Self> {
        let mut subject = Subject::new();
        for part in input.split('/').filter(|part| !part.is_empty()) {
            let (attribute, value) = split_pair(part)?;
            subject.push(attribute.trim(), value.trim())?;
        }
        Ok(subject)
    }

    /// 解析`CN=example.com,O=Org`形式，支持`\,`转义
    fn parse_comma(input: &str) -> Result<Self> {
        let mut subject = Subject::new();
        let mut current = String::new();
        let mut parts = Vec::new();
        let mut chars = input.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(PkiError::SubjectError(
                            "dangling escape at end of subject".to_string(),
                        ))
                    }
                },
                ',' => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        parts.push(current);

        for part in parts.iter().filter(|part| !part.trim().is_empty()) {
            let (attribute, value) = split_pair(part)?;
            subject.push(attribute.trim(), value.trim())?;
        }
        Ok(subject)
    }
}

impl FromStr for Subject {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.starts_with('/') {
            Self::parse_slashed(trimmed)
        } else {
            Self::parse_comma(trimmed)
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attr) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}=", attr.attribute)?;
            for c in attr.value.chars() {
                if matches!(c, ',' | '\\' | '+' | '"' | '<' | '>' | ';') {
                    f.write_str("\\")?;
                }
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

fn split_pair(part: &str) -> Result<(&str, &str)> {
    part.split_once('=')
        .ok_or_else(|| PkiError::SubjectError(format!("missing '=' in {part:?}")))
}

fn canonical_attribute(attribute: &str) -> Result<String> {
    if let Some((name, _)) = ATTRIBUTE_NAMES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
    {
        return Ok((*name).to_string());
    }
    let oid = attribute
        .parse::<ObjectIdentifier>()
        .map_err(|_| PkiError::SubjectError(format!("unknown attribute: {attribute}")))?;
    Ok(attribute_name(&oid))
}

fn attribute_oid(attribute: &str) -> Result<ObjectIdentifier> {
    match ATTRIBUTE_NAMES.iter().find(|(name, _)| *name == attribute) {
        Some((_, oid)) => Ok(*oid),
        None => attribute
            .parse::<ObjectIdentifier>()
            .map_err(|_| PkiError::SubjectError(format!("unknown attribute: {attribute}"))),
    }
}

fn attribute_name(oid: &ObjectIdentifier) -> String {
    ATTRIBUTE_NAMES
        .iter()
        .find(|(_, known)| known == oid)
        .map(|(name, _)| (*name).to_string())
        .unwrap_or_else(|| oid.to_string())
}

fn to_attribute_type_and_value(attr: &NameAttribute) -> Result<AttributeTypeAndValue> {
    let attribute_type = attribute_oid(&attr.attribute)?;
    let value = if attribute_type == oid::AT_COUNTRY {
        let printable = PrintableStringRef::new(&attr.value)
            .map_err(|e| PkiError::SubjectError(format!("Invalid C value: {}", e)))?;
        Any::encode_from(&printable)?
    } else {
        let utf8 = Utf8StringRef::new(&attr.value)
            .map_err(|e| PkiError::SubjectError(format!("Invalid {} value: {}", attr.attribute, e)))?;
        Any::encode_from(&utf8)?
    };
    Ok(AttributeTypeAndValue {
        oid: attribute_type,
        value,
    })
}

fn attribute_value(value: &Any) -> Result<String> {
    let text = match value.tag() {
        Tag::Utf8String => Utf8StringRef::try_from(value).map(|s| s.as_str().to_string()),
        Tag::PrintableString => PrintableStringRef::try_from(value).map(|s| s.as_str().to_string()),
        Tag::Ia5String => Ia5StringRef::try_from(value).map(|s| s.as_str().to_string()),
        other => {
            return Err(PkiError::SubjectError(format!(
                "unsupported attribute value type: {other}"
            )))
        }
    };
    text.map_err(|e| PkiError::SubjectError(format!("invalid attribute value: {e}")))
}

#[cfg(test)]
mod tests {
    use der::{Decode, Encode};

    use super::*;

    #[test]
    fn test_parse_both_notations() {
        let comma: Subject = "C=AT, O=Example Org, CN=example.com".parse().unwrap();
        let slashed: Subject = "/C=AT/O=Example Org/CN=example.com".parse().unwrap();
        assert_eq!(comma, slashed);
        assert_eq!(comma.common_name(), Some("example.com"));
        assert_eq!(comma.to_string(), "C=AT,O=Example Org,CN=example.com");
    }

    #[test]
    fn test_escaped_comma() {
        let subject: Subject = r"O=Acme\, Inc.,CN=acme.test".parse().unwrap();
        assert_eq!(subject.attributes()[0].value, "Acme, Inc.");
        let reparsed: Subject = subject.to_string().parse().unwrap();
        assert_eq!(reparsed, subject);
    }

    #[test]
    fn test_name_roundtrip_keeps_order() {
        let subject: Subject = "CN=example.com,OU=Ops,C=DE,emailAddress=ops@example.com"
            .parse()
            .unwrap();
        let der = subject.to_name().unwrap().to_der().unwrap();
        let name = Name::from_der(&der).unwrap();
        assert_eq!(Subject::from_name(&name).unwrap(), subject);
    }

    #[test]
    fn test_rejects_unknown_attribute_and_bad_country() {
        assert!("XX=foo".parse::<Subject>().is_err());
        assert!("C=Austria".parse::<Subject>().is_err());
        let dotted: Subject = "2.5.4.3=dotted".parse().unwrap();
        assert_eq!(dotted.common_name(), Some("dotted"));
    }
}
