use thiserror::Error;

/// Key模块的错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 密钥相关错误
    #[error("Key error: {0}")]
    KeyError(String),

    /// 签名相关错误
    #[error("Signature error: {0}")]
    SignatureError(String),

    /// 签名算法与密钥类型不匹配
    #[error("Algorithm mismatch: {0}")]
    AlgorithmMismatch(String),

    /// 不支持的算法
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// 导入错误
    #[error("Import error: {0}")]
    ImportError(String),

    /// 导出错误
    #[error("Export error: {0}")]
    ExportError(String),

    /// 无效的签名
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("PKCS8 error: {0}")]
    Pkcs8Error(#[from] pkcs8::Error),

    #[error("SPKI error: {0}")]
    SpkiError(#[from] pkcs8::spki::Error),

    #[error("DER error: {0}")]
    DerError(#[from] der::Error),

    #[error("Getrandom error: {0}")]
    GetrandomError(String),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result类型别名
pub type Result<T> = std::result::Result<T, Error>;
