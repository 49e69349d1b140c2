//! Tessera ACME - 自动化证书签发
//!
//! 订单、授权与挑战的状态机（RFC 8555），`http-01`验证，以及通过CA签发
//! 完成订单

pub mod error;
pub mod service;
pub mod state;
pub mod types;
pub mod validation;

pub use error::{AcmeError, Result, ValidationFailure};
pub use service::AcmeService;
pub use types::{
    dns_txt_value, key_authorization, Authorization, AuthorizationStatus, Challenge,
    ChallengeStatus, ChallengeType, Identifier, Order, OrderStatus,
};
pub use validation::{ChallengeFetcher, HttpFetcher};
