//! ACME记录与状态值（RFC 8555 第7.1节）

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

macro_rules! status_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

status_names!(OrderStatus {
    Pending => "pending",
    Ready => "ready",
    Processing => "processing",
    Valid => "valid",
    Invalid => "invalid",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

status_names!(AuthorizationStatus {
    Pending => "pending",
    Valid => "valid",
    Invalid => "invalid",
    Deactivated => "deactivated",
    Expired => "expired",
    Revoked => "revoked",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

status_names!(ChallengeStatus {
    Pending => "pending",
    Processing => "processing",
    Valid => "valid",
    Invalid => "invalid",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

status_names!(ChallengeType {
    Http01 => "http-01",
    Dns01 => "dns-01",
    TlsAlpn01 => "tls-alpn-01",
});

/// 订单中的标识符，只支持`dns`类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            kind: "dns".to_string(),
            value: value.into().to_ascii_lowercase(),
        }
    }
}

/// 随机挑战令牌：64个base64url字符
pub fn new_token() -> String {
    let mut bytes = [0u8; 48];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 令牌在URL和密钥授权中的编码形式
pub fn encoded_token(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(token.as_bytes())
}

/// `http-01`期望的响应体：`base64url(token) "." thumbprint`
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{}.{}", encoded_token(token), thumbprint)
}

/// `dns-01`期望的TXT记录值
pub fn dns_txt_value(token: &str, thumbprint: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization(token, thumbprint).as_bytes()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// 账户公钥的JWK指纹
    pub account_thumbprint: String,
    pub status: OrderStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
    pub identifiers: Vec<Identifier>,
    pub authorizations: Vec<Uuid>,
    /// 签发成功后的证书序列号
    pub certificate_serial: Option<String>,
    /// 签发成功后的PEM证书
    pub certificate_pem: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub id: Uuid,
    pub order_id: Uuid,
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
    pub challenges: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub authorization_id: Uuid,
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    pub status: ChallengeStatus,
    pub token: String,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub validated: Option<OffsetDateTime>,
    /// 验证失败的原因
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(OrderStatus::Processing.to_string(), "processing");
        assert_eq!(AuthorizationStatus::Deactivated.as_str(), "deactivated");
        assert_eq!(ChallengeType::TlsAlpn01.to_string(), "tls-alpn-01");
        assert_eq!(
            serde_json::to_value(ChallengeType::Http01).unwrap(),
            serde_json::json!("http-01")
        );
        assert_eq!(
            serde_json::from_value::<ChallengeStatus>(serde_json::json!("invalid")).unwrap(),
            ChallengeStatus::Invalid
        );
    }

    #[test]
    fn test_token_and_key_authorization() {
        let token = new_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, new_token());

        assert_eq!(encoded_token("abc"), "YWJj");
        assert_eq!(key_authorization("abc", "thumb"), "YWJj.thumb");
        let txt = dns_txt_value("abc", "thumb");
        assert_eq!(txt.len(), 43);
        assert!(!txt.contains('='));
    }

    #[test]
    fn test_identifier_is_lowercased() {
        assert_eq!(Identifier::dns("WWW.Example.COM").value, "www.example.com");
    }
}
