use std::time::Duration;

use tessera_pki::PkiError;
use thiserror::Error;
use uuid::Uuid;

use crate::types::ChallengeType;

/// 挑战验证失败的原因
///
/// 网络错误与令牌不匹配同样使挑战变为`invalid`；重试需要新的挑战。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("Token mismatch: expected {expected:?}, received {received:?}")]
    TokenMismatch { expected: String, received: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Validation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Challenge type {0} is not supported")]
    UnsupportedChallenge(ChallengeType),
}

/// ACME模块的错误类型
#[derive(Error, Debug)]
pub enum AcmeError {
    /// 记录不存在
    #[error("Unknown {kind} {id}")]
    NotFound { kind: &'static str, id: Uuid },

    /// 状态机不允许的转换
    #[error("Invalid {kind} transition from {from} to {to}")]
    InvalidTransition {
        kind: &'static str,
        from: String,
        to: String,
    },

    /// 订单尚未就绪
    #[error("Order {0} is not ready")]
    OrderNotReady(Uuid),

    /// 订单已过期
    #[error("Order {0} has expired")]
    OrderExpired(Uuid),

    /// CSR请求的名称与订单标识符不一致
    #[error("CSR does not match order identifiers: {0}")]
    CsrMismatch(String),

    /// 请求不合法
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// CA未启用ACME
    #[error("ACME is not enabled for CA {0}")]
    Disabled(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(#[from] ValidationFailure),

    #[error(transparent)]
    Pki(#[from] PkiError),

    #[error(transparent)]
    Key(#[from] tessera_key::Error),
}

pub type Result<T> = std::result::Result<T, AcmeError>;

impl AcmeError {
    pub(crate) fn not_found(kind: &'static str, id: Uuid) -> Self {
        AcmeError::NotFound { kind, id }
    }

    pub(crate) fn transition(
        kind: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        AcmeError::InvalidTransition {
            kind,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
