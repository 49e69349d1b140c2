use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use der::{
    asn1::{Ia5String, ObjectIdentifier, OctetString},
    Decode, Encode,
};
use serde_json::{json, Value};
use x509_cert::ext::pkix::name::GeneralName as X509GeneralName;

use crate::{
    error::{DecodeError, PkiError, Result},
    name::Subject,
};

/// General name as used in alternative names, access descriptions,
/// distribution points and name constraints.
///
/// On the wire a name is `{"type": "DNS", "value": "example.com"}`, the
/// shorthand `"DNS:example.com"`, or a bare string whose type is guessed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GeneralName {
    Dns(String),
    Uri(String),
    Email(String),
    Ip(IpAddr),
    /// Address with prefix length, only meaningful in name constraints
    IpNetwork { address: IpAddr, prefix: u8 },
    Rid(ObjectIdentifier),
    DirName(Subject),
}

impl GeneralName {
    pub fn type_name(&self) -> &'static str {
        match self {
            GeneralName::Dns(_) => "DNS",
            GeneralName::Uri(_) => "URI",
            GeneralName::Email(_) => "email",
            GeneralName::Ip(_) | GeneralName::IpNetwork { .. } => "IP",
            GeneralName::Rid(_) => "RID",
            GeneralName::DirName(_) => "dirName",
        }
    }

    fn value_string(&self) -> String {
        match self {
            GeneralName::Dns(v) | GeneralName::Uri(v) | GeneralName::Email(v) => v.clone(),
            GeneralName::Ip(address) => address.to_string(),
            GeneralName::IpNetwork { address, prefix } => format!("{address}/{prefix}"),
            GeneralName::Rid(oid) => oid.to_string(),
            GeneralName::DirName(subject) => subject.to_string(),
        }
    }

    /// Parse a name whose type is given explicitly
    pub fn parse_typed(name_type: &str, value: &str) -> std::result::Result<Self, String> {
        if value.is_empty() {
            return Err(format!("{name_type} name must not be empty"));
        }
        match name_type {
            "DNS" | "dns" => parse_dns(value).map(GeneralName::Dns),
            "URI" | "uri" => {
                if !value.contains(':') || !value.is_ascii() {
                    return Err(format!("not a valid URI: {value}"));
                }
                Ok(GeneralName::Uri(value.to_string()))
            }
            "email" | "EMAIL" => match value.split_once('@') {
                Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                    Ok(GeneralName::Email(value.to_string()))
                }
                _ => Err(format!("not a valid email address: {value}")),
            },
            "IP" | "ip" => parse_ip(value),
            "RID" | "rid" => value
                .parse::<ObjectIdentifier>()
                .map(GeneralName::Rid)
                .map_err(|_| format!("not a valid OID: {value}")),
            "dirName" | "dirname" => value
                .parse::<Subject>()
                .map(GeneralName::DirName)
                .map_err(|e| e.to_string()),
            other => Err(format!("unsupported general name type: {other}")),
        }
    }

    /// Parse `TYPE:value` or guess the type from the value itself
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        let value = value.trim();
        if let Some((prefix, rest)) = value.split_once(':') {
            if matches!(
                prefix,
                "DNS" | "URI" | "email" | "IP" | "RID" | "dirName" | "dirname"
            ) {
                return Self::parse_typed(prefix, rest);
            }
        }
        Self::guess(value)
    }

    fn guess(value: &str) -> std::result::Result<Self, String> {
        if value.contains("://") {
            return Self::parse_typed("URI", value);
        }
        if value.contains('@') {
            return Self::parse_typed("email", value);
        }
        if let Ok(name) = parse_ip(value) {
            return Ok(name);
        }
        if value.starts_with('/') {
            return Self::parse_typed("dirName", value);
        }
        Self::parse_typed("DNS", value)
    }

    pub fn from_wire(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Object(map) => {
                let name_type = map
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "general name needs a string \"type\"".to_string())?;
                let name_value = map
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "general name needs a string \"value\"".to_string())?;
                Self::parse_typed(name_type, name_value)
            }
            _ => Err("general name must be a string or an object".to_string()),
        }
    }

    pub fn to_wire(&self) -> Value {
        json!({ "type": self.type_name(), "value": self.value_string() })
    }

    pub fn to_x509(&self) -> Result<X509GeneralName> {
        let name = match self {
            GeneralName::Dns(v) => X509GeneralName::DnsName(Ia5String::new(v)?),
            GeneralName::Uri(v) => X509GeneralName::UniformResourceIdentifier(Ia5String::new(v)?),
            GeneralName::Email(v) => X509GeneralName::Rfc822Name(Ia5String::new(v)?),
            GeneralName::Ip(address) => {
                X509GeneralName::IpAddress(OctetString::new(ip_octets(address))?)
            }
            GeneralName::IpNetwork { address, prefix } => {
                let mut octets = ip_octets(address);
                octets.extend(netmask(address, *prefix));
                X509GeneralName::IpAddress(OctetString::new(octets)?)
            }
            GeneralName::Rid(oid) => X509GeneralName::RegisteredId(*oid),
            GeneralName::DirName(subject) => X509GeneralName::DirectoryName(subject.to_name()?),
        };
        Ok(name)
    }

    pub fn from_x509(name: &X509GeneralName) -> Result<Self> {
        let parsed = match name {
            X509GeneralName::DnsName(v) => GeneralName::Dns(v.to_string()),
            X509GeneralName::UniformResourceIdentifier(v) => GeneralName::Uri(v.to_string()),
            X509GeneralName::Rfc822Name(v) => GeneralName::Email(v.to_string()),
            X509GeneralName::IpAddress(octets) => ip_from_octets(octets.as_bytes())?,
            X509GeneralName::RegisteredId(oid) => GeneralName::Rid(*oid),
            X509GeneralName::DirectoryName(name) => GeneralName::DirName(Subject::from_name(name)?),
            other => {
                return Err(PkiError::CertError(format!(
                    "unsupported general name: {other:?}"
                )))
            }
        };
        Ok(parsed)
    }

    /// Decode a DER encoded GeneralNames sequence
    pub fn decode_list(der: &[u8]) -> Result<Vec<Self>> {
        Vec::<X509GeneralName>::from_der(der)?
            .iter()
            .map(Self::from_x509)
            .collect()
    }

    pub fn encode_list(names: &[Self]) -> Result<Vec<u8>> {
        let names = names
            .iter()
            .map(Self::to_x509)
            .collect::<Result<Vec<_>>>()?;
        Ok(names.to_der()?)
    }
}

impl fmt::Display for GeneralName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name(), self.value_string())
    }
}

/// Decode a wire list of general names, naming the failing element
pub(crate) fn names_from_wire(
    extension: &str,
    field: &str,
    value: &Value,
) -> std::result::Result<Vec<GeneralName>, DecodeError> {
    let items = value
        .as_array()
        .ok_or_else(|| DecodeError::field(extension, field, "expected a list of general names"))?;
    if items.is_empty() {
        return Err(DecodeError::field(extension, field, "must not be empty"));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            GeneralName::from_wire(item)
                .map_err(|reason| DecodeError::field(extension, format!("{field}[{i}]"), reason))
        })
        .collect()
}

pub(crate) fn names_to_wire(names: &[GeneralName]) -> Value {
    Value::Array(names.iter().map(GeneralName::to_wire).collect())
}

fn parse_dns(value: &str) -> std::result::Result<String, String> {
    let host = value.strip_prefix("*.").unwrap_or(value);
    let host = host.strip_prefix('.').unwrap_or(host);
    let valid = !host.is_empty()
        && host.is_ascii()
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        });
    if valid {
        Ok(value.to_string())
    } else {
        Err(format!("not a valid DNS name: {value}"))
    }
}

fn parse_ip(value: &str) -> std::result::Result<GeneralName, String> {
    if let Some((address, prefix)) = value.split_once('/') {
        let address: IpAddr = address
            .parse()
            .map_err(|_| format!("not a valid IP network: {value}"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("not a valid prefix length: {value}"))?;
        let max = if address.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(format!("prefix length out of range: {value}"));
        }
        return Ok(GeneralName::IpNetwork { address, prefix });
    }
    value
        .parse::<IpAddr>()
        .map(GeneralName::Ip)
        .map_err(|_| format!("not a valid IP address: {value}"))
}

fn ip_octets(address: &IpAddr) -> Vec<u8> {
    match address {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn netmask(address: &IpAddr, prefix: u8) -> Vec<u8> {
    let len = if address.is_ipv4() { 4 } else { 16 };
    (0..len)
        .map(|i| {
            let bits = (prefix as i32 - i * 8).clamp(0, 8);
            (0xff_u16 << (8 - bits)) as u8
        })
        .collect()
}

fn ip_from_octets(octets: &[u8]) -> Result<GeneralName> {
    let invalid = || PkiError::CertError(format!("invalid iPAddress length: {}", octets.len()));
    let v4 = |bytes: &[u8]| -> Option<IpAddr> {
        let array: [u8; 4] = bytes.try_into().ok()?;
        Some(IpAddr::V4(Ipv4Addr::from(array)))
    };
    let v6 = |bytes: &[u8]| -> Option<IpAddr> {
        let array: [u8; 16] = bytes.try_into().ok()?;
        Some(IpAddr::V6(Ipv6Addr::from(array)))
    };
    match octets.len() {
        4 => v4(octets).map(GeneralName::Ip).ok_or_else(invalid),
        16 => v6(octets).map(GeneralName::Ip).ok_or_else(invalid),
        8 | 32 => {
            let half = octets.len() / 2;
            let address = if half == 4 { v4(&octets[..half]) } else { v6(&octets[..half]) }
                .ok_or_else(invalid)?;
            let prefix = octets[half..].iter().map(|b| b.count_ones() as u8).sum();
            Ok(GeneralName::IpNetwork { address, prefix })
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorthand_and_guessing() {
        assert_eq!(
            GeneralName::parse("DNS:example.com").unwrap(),
            GeneralName::Dns("example.com".into())
        );
        assert_eq!(
            GeneralName::parse("https://ca.example.com/crl").unwrap(),
            GeneralName::Uri("https://ca.example.com/crl".into())
        );
        assert_eq!(
            GeneralName::parse("user@example.com").unwrap(),
            GeneralName::Email("user@example.com".into())
        );
        assert_eq!(
            GeneralName::parse("192.0.2.1").unwrap(),
            GeneralName::Ip("192.0.2.1".parse().unwrap())
        );
        assert!(matches!(
            GeneralName::parse("/CN=example").unwrap(),
            GeneralName::DirName(_)
        ));
        assert!(GeneralName::parse("not a host!").is_err());
    }

    #[test]
    fn test_wire_object_form() {
        let name = GeneralName::from_wire(&json!({"type": "IP", "value": "10.0.0.0/8"})).unwrap();
        assert_eq!(
            name,
            GeneralName::IpNetwork {
                address: "10.0.0.0".parse().unwrap(),
                prefix: 8
            }
        );
        assert_eq!(name.to_wire(), json!({"type": "IP", "value": "10.0.0.0/8"}));
        assert!(GeneralName::from_wire(&json!({"type": "FOO", "value": "x"})).is_err());
    }

    #[test]
    fn test_ip_network_der_encoding() {
        let name = GeneralName::IpNetwork {
            address: "10.0.0.0".parse().unwrap(),
            prefix: 12,
        };
        match name.to_x509().unwrap() {
            X509GeneralName::IpAddress(octets) => {
                assert_eq!(octets.as_bytes(), &[10, 0, 0, 0, 255, 240, 0, 0]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let decoded = GeneralName::from_x509(&name.to_x509().unwrap()).unwrap();
        assert_eq!(decoded, name);
    }

    #[test]
    fn test_wildcard_dns_is_accepted() {
        assert!(GeneralName::parse_typed("DNS", "*.example.com").is_ok());
        assert!(GeneralName::parse_typed("DNS", "").is_err());
    }
}
