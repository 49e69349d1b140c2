//! # Tessera - 证书颁发机构工具集
//!
//! X.509证书签发、撤销与ACME自动化验证
//!
//! ## 模块
//!
//! - `tessera_key` - 签名密钥与算法
//! - `tessera_pki` - 扩展编解码、模板、签发、CRL与OCSP
//! - `tessera_acme` - ACME订单与挑战验证

// Re-export all sub-crates
pub use tessera_acme;
pub use tessera_key;
pub use tessera_pki;
