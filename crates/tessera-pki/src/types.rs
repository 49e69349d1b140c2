use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::PkiError;

/// 证书状态（OCSP视角）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    /// 有效
    Good,
    /// 已撤销
    Revoked {
        reason: RevocationReason,
        #[serde(with = "time::serde::rfc3339")]
        revoked_at: OffsetDateTime,
    },
    /// 未知（非本CA签发或从未签发）
    Unknown,
}

/// 撤销原因（RFC 5280 5.3.1）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// 未指定
    Unspecified,
    /// 密钥泄露
    KeyCompromise,
    /// CA密钥泄露
    CaCompromise,
    /// 从属关系改变
    AffiliationChanged,
    /// 被取代
    Superseded,
    /// 停止操作
    CessationOfOperation,
    /// 证书暂停
    CertificateHold,
    /// 从CRL中移除
    RemoveFromCrl,
    /// 特权撤销
    PrivilegeWithdrawn,
    /// AA泄露
    AaCompromise,
}

impl RevocationReason {
    pub const ALL: [RevocationReason; 10] = [
        RevocationReason::Unspecified,
        RevocationReason::KeyCompromise,
        RevocationReason::CaCompromise,
        RevocationReason::AffiliationChanged,
        RevocationReason::Superseded,
        RevocationReason::CessationOfOperation,
        RevocationReason::CertificateHold,
        RevocationReason::RemoveFromCrl,
        RevocationReason::PrivilegeWithdrawn,
        RevocationReason::AaCompromise,
    ];

    /// CRLReason枚举值（7未使用）
    pub fn code(&self) -> u32 {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::CaCompromise => 2,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
            RevocationReason::CertificateHold => 6,
            RevocationReason::RemoveFromCrl => 8,
            RevocationReason::PrivilegeWithdrawn => 9,
            RevocationReason::AaCompromise => 10,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.code() == code)
    }

    /// ReasonFlags中的位置；`unspecified`和`remove_from_crl`没有对应的位
    pub fn flag_bit(&self) -> Option<usize> {
        match self {
            RevocationReason::Unspecified | RevocationReason::RemoveFromCrl => None,
            RevocationReason::KeyCompromise => Some(1),
            RevocationReason::CaCompromise => Some(2),
            RevocationReason::AffiliationChanged => Some(3),
            RevocationReason::Superseded => Some(4),
            RevocationReason::CessationOfOperation => Some(5),
            RevocationReason::CertificateHold => Some(6),
            RevocationReason::PrivilegeWithdrawn => Some(7),
            RevocationReason::AaCompromise => Some(8),
        }
    }

    pub fn from_flag_bit(bit: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.flag_bit() == Some(bit))
    }

    pub fn name(&self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "key_compromise",
            RevocationReason::CaCompromise => "ca_compromise",
            RevocationReason::AffiliationChanged => "affiliation_changed",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessation_of_operation",
            RevocationReason::CertificateHold => "certificate_hold",
            RevocationReason::RemoveFromCrl => "remove_from_crl",
            RevocationReason::PrivilegeWithdrawn => "privilege_withdrawn",
            RevocationReason::AaCompromise => "aa_compromise",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RevocationReason {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.name() == s)
            .ok_or_else(|| PkiError::CertError(format!("unknown revocation reason: {s}")))
    }
}

/// 证书类别，决定证书出现在哪个范围的CRL中
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CertificateKind {
    /// 终端实体证书
    EndEntity,
    /// CA证书（中间CA）
    Ca,
}

/// 撤销记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Revocation {
    pub reason: RevocationReason,
    #[serde(with = "time::serde::rfc3339")]
    pub revoked_at: OffsetDateTime,
    /// 密钥泄露时间（CRL中的InvalidityDate）
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub compromised: Option<OffsetDateTime>,
}
