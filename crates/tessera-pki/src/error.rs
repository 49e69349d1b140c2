use std::fmt;

use thiserror::Error;

/// PKI模块的错误类型
#[derive(Error, Debug)]
pub enum PkiError {
    /// 扩展解码错误（格式错误或违反结构约束）
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// 模板（Profile）不允许该请求
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    /// CA私钥不可用
    #[error("Private key of CA {0} is not available")]
    KeyUnavailable(String),

    /// CA已过期或已禁用
    #[error("CA {0} is expired or disabled")]
    ExpiredOrDisabledCA(String),

    /// 签名错误
    #[error("Signing error: {0}")]
    SigningError(String),

    /// CSR相关错误
    #[error("CSR error: {0}")]
    CsrError(String),

    /// 证书相关错误
    #[error("Certificate error: {0}")]
    CertError(String),

    /// 证书已撤销
    #[error("Certificate revoked: {0}")]
    CertificateRevoked(String),

    /// 证书未找到
    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    /// 序列号已用尽
    #[error("Serial numbers exhausted after {0:X}")]
    SerialExhausted(u64),

    /// CRL相关错误
    #[error("CRL error: {0}")]
    CRLError(String),

    /// OCSP相关错误
    #[error("OCSP error: {0}")]
    OcspError(String),

    /// 配置错误
    #[error("Config error: {0}")]
    ConfigError(String),

    /// 主体名称解析错误
    #[error("Invalid subject: {0}")]
    SubjectError(String),

    /// DER编码/解码错误
    #[error("DER error: {0}")]
    DerError(#[from] der::Error),

    /// 密钥错误
    #[error("Key error: {0}")]
    KeyError(#[from] tessera_key::Error),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result类型别名
pub type Result<T> = std::result::Result<T, PkiError>;

/// 扩展解码错误
///
/// 记录出错的扩展、字段以及违反的约束，便于直接展示给调用者。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub extension: String,
    pub field: Option<String>,
    pub reason: String,
}

impl DecodeError {
    pub fn new(extension: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            field: None,
            reason: reason.into(),
        }
    }

    pub fn field(
        extension: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            extension: extension.into(),
            field: Some(field.into()),
            reason: reason.into(),
        }
    }

    /// 为嵌套结构中的错误补充外层字段路径
    pub fn within(mut self, parent: &str) -> Self {
        self.field = Some(match self.field.take() {
            Some(field) => format!("{parent}.{field}"),
            None => parent.to_string(),
        });
        self
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}: {}: {}", self.extension, field, self.reason),
            None => write!(f, "{}: {}", self.extension, self.reason),
        }
    }
}

impl std::error::Error for DecodeError {}

/// 模板错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// 模板不存在
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    /// 调用者试图覆盖模板不允许的扩展
    #[error("extension not allowed by profile {profile}: {extension}")]
    ExtensionNotAllowed { profile: String, extension: String },

    /// 密钥用途不在模板允许范围内
    #[error("key usage not permitted by profile {profile}: {usage}")]
    KeyUsageNotPermitted { profile: String, usage: String },

    /// 扩展密钥用途不在模板允许范围内
    #[error("extended key usage not permitted by profile {profile}: {usage}")]
    ExtendedKeyUsageNotPermitted { profile: String, usage: String },

    /// 通过普通签发流程申请CA证书
    #[error("profile {0} cannot issue CA certificates")]
    CaNotAllowed(String),

    /// 模板配置本身无效
    #[error("invalid profile {profile}: {reason}")]
    InvalidProfile { profile: String, reason: String },
}
