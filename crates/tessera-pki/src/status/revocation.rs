//! 撤销登记
//!
//! 每个CA一个登记表，按序列号保存该CA签发的证书记录。撤销是终态：
//! 对已撤销的证书再次撤销返回`CertificateRevoked`，原记录保持不变。

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    cert::Certificate,
    error::{PkiError, Result},
    types::{CertificateKind, CertificateStatus, RevocationReason},
};

/// CRL条目的来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    /// 大写十六进制序列号
    pub serial: String,
    pub reason: RevocationReason,
    #[serde(with = "time::serde::rfc3339")]
    pub revoked_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub compromised: Option<OffsetDateTime>,
    pub kind: CertificateKind,
    /// 证书过期后条目不再出现在CRL中
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
}

impl RevocationEntry {
    /// 已撤销证书对应的条目
    pub fn from_certificate(certificate: &Certificate) -> Option<Self> {
        certificate.revocation.as_ref().map(|revocation| Self {
            serial: certificate.serial.clone(),
            reason: revocation.reason,
            revoked_at: revocation.revoked_at,
            compromised: revocation.compromised,
            kind: certificate.kind,
            not_after: certificate.not_after,
        })
    }

    /// 数值排序键：先比较长度再比较字典序
    pub(crate) fn sort_key(&self) -> (usize, &str) {
        let trimmed = self.serial.trim_start_matches('0');
        (trimmed.len(), trimmed)
    }
}

/// 单个CA的证书登记表
#[derive(Debug)]
pub struct RevocationRegistry {
    ca_id: Uuid,
    certificates: RwLock<BTreeMap<String, Certificate>>,
}

impl RevocationRegistry {
    pub fn new(ca_id: Uuid) -> Self {
        Self {
            ca_id,
            certificates: RwLock::new(BTreeMap::new()),
        }
    }

    /// 登记本CA签发的证书；序列号重复时报错
    pub fn register(&self, certificate: Certificate) -> Result<()> {
        if certificate.ca_id != self.ca_id {
            return Err(PkiError::CertError(format!(
                "certificate {} was not issued by CA {}",
                certificate.serial, self.ca_id
            )));
        }
        let mut certificates = self.certificates.write();
        if certificates.contains_key(&certificate.serial) {
            return Err(PkiError::CertError(format!(
                "serial {} is already registered",
                certificate.serial
            )));
        }
        certificates.insert(certificate.serial.clone(), certificate);
        Ok(())
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.certificates.read().contains_key(serial)
    }

    pub fn get(&self, serial: &str) -> Option<Certificate> {
        self.certificates.read().get(serial).cloned()
    }

    pub fn len(&self) -> usize {
        self.certificates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.read().is_empty()
    }

    /// 撤销证书
    pub fn revoke(
        &self,
        serial: &str,
        reason: RevocationReason,
        compromised: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<RevocationEntry> {
        let mut certificates = self.certificates.write();
        let certificate = certificates
            .get_mut(serial)
            .ok_or_else(|| PkiError::CertificateNotFound(serial.to_string()))?;
        certificate.revoke(reason, compromised, now)?;
        RevocationEntry::from_certificate(certificate).ok_or_else(|| {
            PkiError::CertError(format!("revocation of {serial} was not recorded"))
        })
    }

    /// OCSP视角的状态；未登记的序列号为`Unknown`
    pub fn status(&self, serial: &str) -> CertificateStatus {
        match self.certificates.read().get(serial) {
            None => CertificateStatus::Unknown,
            Some(certificate) => match &certificate.revocation {
                None => CertificateStatus::Good,
                Some(revocation) => CertificateStatus::Revoked {
                    reason: revocation.reason,
                    revoked_at: revocation.revoked_at,
                },
            },
        }
    }

    /// 所有撤销条目，按序列号数值排序
    pub fn entries(&self) -> Vec<RevocationEntry> {
        let mut entries: Vec<_> = self
            .certificates
            .read()
            .values()
            .filter_map(RevocationEntry::from_certificate)
            .collect();
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        entries
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tessera_key::P256Key;
    use time::macros::datetime;

    use super::*;
    use crate::{ca::CertificateAuthority, settings::Settings};

    fn registry_with_intermediates(count: usize) -> (RevocationRegistry, Vec<String>) {
        let root = CertificateAuthority::init_root(
            "Registry Root",
            "CN=Registry Root".parse().unwrap(),
            Arc::new(P256Key::generate().unwrap()),
            3650,
            None,
            Arc::new(Settings::default()),
        )
        .unwrap();
        let registry = RevocationRegistry::new(root.id());
        let mut serials = Vec::new();
        for i in 0..count {
            let intermediate = root
                .init_intermediate(
                    &format!("Sub {i}"),
                    format!("CN=Sub {i}").parse().unwrap(),
                    Arc::new(P256Key::generate().unwrap()),
                    365,
                    None,
                )
                .unwrap();
            let record = intermediate.certificate_record().unwrap();
            serials.push(record.serial.clone());
            registry.register(record).unwrap();
        }
        (registry, serials)
    }

    #[test]
    fn test_status_transitions() {
        let (registry, serials) = registry_with_intermediates(1);
        let serial = &serials[0];
        assert_eq!(registry.status(serial), CertificateStatus::Good);
        assert_eq!(registry.status("FFFF"), CertificateStatus::Unknown);

        let at = datetime!(2030-05-01 12:00 UTC);
        let entry = registry
            .revoke(serial, RevocationReason::CaCompromise, None, at)
            .unwrap();
        assert_eq!(entry.kind, CertificateKind::Ca);
        assert_eq!(
            registry.status(serial),
            CertificateStatus::Revoked {
                reason: RevocationReason::CaCompromise,
                revoked_at: at,
            }
        );

        let err = registry
            .revoke(serial, RevocationReason::Superseded, None, OffsetDateTime::now_utc())
            .unwrap_err();
        assert!(matches!(err, PkiError::CertificateRevoked(_)));
        assert_eq!(registry.entries()[0].reason, RevocationReason::CaCompromise);

        assert!(matches!(
            registry.revoke("ABC", RevocationReason::Unspecified, None, at),
            Err(PkiError::CertificateNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_and_foreign_registration() {
        let (registry, serials) = registry_with_intermediates(1);
        let duplicate = registry.get(&serials[0]).unwrap();
        assert!(registry.register(duplicate.clone()).is_err());

        let mut foreign = duplicate;
        foreign.ca_id = Uuid::new_v4();
        foreign.serial = "FFFF".to_string();
        assert!(registry.register(foreign).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_entries_are_sorted_numerically() {
        let entry = |serial: &str| RevocationEntry {
            serial: serial.to_string(),
            reason: RevocationReason::Unspecified,
            revoked_at: datetime!(2030-01-01 00:00 UTC),
            compromised: None,
            kind: CertificateKind::EndEntity,
            not_after: datetime!(2031-01-01 00:00 UTC),
        };
        let mut entries = vec![entry("10"), entry("9"), entry("A"), entry("2")];
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let serials: Vec<_> = entries.iter().map(|e| e.serial.as_str()).collect();
        assert_eq!(serials, vec!["2", "9", "A", "10"]);

        let (registry, _) = registry_with_intermediates(3);
        for serial in ["2", "3", "4"] {
            registry
                .revoke(serial, RevocationReason::Superseded, None, OffsetDateTime::now_utc())
                .unwrap();
        }
        let serials: Vec<_> = registry.entries().into_iter().map(|e| e.serial).collect();
        assert_eq!(serials, vec!["2", "3", "4"]);
    }
}
