//! 证书状态服务
//!
//! `StatusManager`持有一个CA的证书登记表，并以缓存的方式提供CRL与OCSP
//! 响应。签名是昂贵操作：
//!
//! - OCSP响应按序列号和CertID摘要缓存，状态变化时失效，接近过期时重签
//! - CRL按配置名称缓存，按`refresh_seconds`节奏重签，撤销后标记为过时
//! - 每个CRL范围有独立的CRL编号，从0开始递增

mod cache;
mod crl;
mod ocsp;
mod revocation;

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

pub use self::{
    cache::{Artifact, ArtifactCache, Freshness},
    crl::{build_crl, CrlScope, SignedCrl},
    ocsp::{
        build_response, error_response, parse_basic_response, CertIdHash, OcspQuery,
        OcspResponder, SignedOcspResponse,
    },
    revocation::{RevocationEntry, RevocationRegistry},
};
use crate::{
    asn1::OcspResponseStatus,
    builder::IssueRequest,
    ca::CertificateAuthority,
    cert::Certificate,
    error::{PkiError, Result},
    types::{CertificateStatus, RevocationReason},
};

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

/// OCSP缓存键：同一序列号在不同CertID摘要下分别缓存
fn ocsp_key(serial: &str, hash: CertIdHash) -> String {
    format!("{serial}/{}", hash.name())
}

/// 单个CA的撤销状态、CRL与OCSP
#[derive(Debug)]
pub struct StatusManager {
    ca: Arc<CertificateAuthority>,
    registry: RevocationRegistry,
    crl_numbers: Mutex<BTreeMap<CrlScope, u64>>,
    crls: ArtifactCache<String, SignedCrl>,
    ocsp: ArtifactCache<String, SignedOcspResponse>,
    responder: RwLock<Option<Arc<OcspResponder>>>,
}

impl StatusManager {
    pub fn new(ca: Arc<CertificateAuthority>) -> Self {
        let registry = RevocationRegistry::new(ca.id());
        Self {
            ca,
            registry,
            crl_numbers: Mutex::new(BTreeMap::new()),
            crls: ArtifactCache::new("crl"),
            ocsp: ArtifactCache::new("ocsp"),
            responder: RwLock::new(None),
        }
    }

    pub fn ca(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    pub fn registry(&self) -> &RevocationRegistry {
        &self.registry
    }

    /// 登记本CA签发的证书（包括下级CA证书）
    pub fn register(&self, certificate: Certificate) -> Result<()> {
        self.registry.register(certificate)
    }

    /// 签发并登记
    pub fn issue(&self, request: &IssueRequest) -> Result<Certificate> {
        let certificate = self.ca.issue(request)?;
        self.registry.register(certificate.clone())?;
        Ok(certificate)
    }

    pub fn certificate(&self, serial: &str) -> Option<Certificate> {
        self.registry.get(serial)
    }

    pub fn status_of(&self, serial: &str) -> CertificateStatus {
        self.registry.status(serial)
    }

    pub fn revoke(
        &self,
        serial: &str,
        reason: RevocationReason,
        compromised: Option<OffsetDateTime>,
    ) -> Result<RevocationEntry> {
        self.revoke_at(serial, reason, compromised, OffsetDateTime::now_utc())
    }

    /// 撤销证书：该序列号的OCSP响应失效，所有CRL标记为过时
    pub fn revoke_at(
        &self,
        serial: &str,
        reason: RevocationReason,
        compromised: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<RevocationEntry> {
        let entry = self.registry.revoke(serial, reason, compromised, now)?;
        for hash in CertIdHash::ALL {
            self.ocsp.invalidate(&ocsp_key(&entry.serial, hash));
        }
        self.crls.mark_all_stale();
        info!(
            ca = %self.ca.name(),
            serial = %entry.serial,
            reason = %entry.reason,
            "Certificate revoked"
        );
        Ok(entry)
    }

    /// 已配置的CRL名称
    pub fn crl_names(&self) -> Vec<String> {
        self.ca.settings().crl_profiles.keys().cloned().collect()
    }

    pub fn crl(&self, name: &str) -> Result<Arc<SignedCrl>> {
        self.crl_at(name, OffsetDateTime::now_utc())
    }

    /// 按名称取得CRL，必要时重新签名
    pub fn crl_at(&self, name: &str, now: OffsetDateTime) -> Result<Arc<SignedCrl>> {
        let profile = self
            .ca
            .settings()
            .crl_profiles
            .get(name)
            .cloned()
            .ok_or_else(|| PkiError::ConfigError(format!("unknown CRL profile '{name}'")))?;

        self.crls.get_or_build(&name.to_string(), now, || {
            let next_update = now + seconds(profile.expires_seconds);
            // 编号只在签名成功后前进
            let mut numbers = self.crl_numbers.lock();
            let number = numbers.get(&profile.scope).copied().unwrap_or(0);
            let crl = build_crl(
                &self.ca,
                profile.scope,
                &self.registry.entries(),
                number,
                now,
                next_update,
            )?;
            numbers.insert(profile.scope, number + 1);
            Ok(Artifact {
                value: crl,
                refresh_at: now + seconds(profile.refresh_seconds),
                expires_at: next_update,
            })
        })
    }

    /// 设置委托响应器；已缓存的响应全部失效
    pub fn set_responder(&self, responder: Option<OcspResponder>) {
        *self.responder.write() = responder.map(Arc::new);
        self.ocsp.invalidate_all();
    }

    fn current_responder(&self, now: OffsetDateTime) -> Option<Arc<OcspResponder>> {
        let responder = self.responder.read().clone()?;
        if responder.not_after() <= now {
            warn!(
                ca = %self.ca.name(),
                "Delegated OCSP responder certificate expired, signing with the CA key"
            );
            return None;
        }
        Some(responder)
    }

    fn sign_response(
        &self,
        query: &OcspQuery,
        status: &CertificateStatus,
        now: OffsetDateTime,
    ) -> Result<SignedOcspResponse> {
        let responder = self.current_responder(now);
        build_response(
            &self.ca,
            responder.as_deref(),
            query,
            status,
            now,
            now + seconds(self.ca.settings().ocsp.response_validity_seconds),
        )
    }

    pub fn answer_ocsp(&self, query: &OcspQuery) -> Result<Arc<SignedOcspResponse>> {
        self.answer_ocsp_at(query, OffsetDateTime::now_utc())
    }

    /// 回答单个状态查询
    ///
    /// 签发者不匹配或从未签发的序列号回答`unknown`，这类响应不缓存。
    pub fn answer_ocsp_at(
        &self,
        query: &OcspQuery,
        now: OffsetDateTime,
    ) -> Result<Arc<SignedOcspResponse>> {
        let status = if query.matches_issuer(&self.ca)? {
            self.registry.status(&query.serial)
        } else {
            CertificateStatus::Unknown
        };
        if status == CertificateStatus::Unknown {
            return Ok(Arc::new(self.sign_response(query, &status, now)?));
        }

        let response = self.cached_response(query, &status, now)?;
        if response.status == status {
            return Ok(response);
        }
        self.ocsp.invalidate(&ocsp_key(&query.serial, query.hash));
        self.cached_response(query, &status, now)
    }

    fn cached_response(
        &self,
        query: &OcspQuery,
        status: &CertificateStatus,
        now: OffsetDateTime,
    ) -> Result<Arc<SignedOcspResponse>> {
        let margin = seconds(self.ca.settings().ocsp.refresh_margin_seconds);
        self.ocsp.get_or_build(&ocsp_key(&query.serial, query.hash), now, || {
            let response = self.sign_response(query, status, now)?;
            Ok(Artifact {
                refresh_at: response.next_update - margin,
                expires_at: response.next_update,
                value: response,
            })
        })
    }

    /// 回答DER编码的OCSPRequest，返回DER编码的OCSPResponse
    ///
    /// 无法解析的请求回答`malformedRequest`。
    pub fn answer_ocsp_der(&self, request: &[u8]) -> Result<Vec<u8>> {
        match OcspQuery::from_der(request) {
            Ok(query) => Ok(self.answer_ocsp(&query)?.der().to_vec()),
            Err(e) => {
                warn!(ca = %self.ca.name(), error = %e, "Malformed OCSP request");
                error_response(OcspResponseStatus::MalformedRequest)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tessera_key::{Ed25519Key, Key, P256Key};
    use x509_cert::crl::CertificateList;

    use super::*;
    use crate::{asn1::CertStatus, builder::SubjectKey, settings::Settings};

    fn manager() -> StatusManager {
        let ca = CertificateAuthority::init_root(
            "Status Root",
            "CN=Status Root".parse().unwrap(),
            Arc::new(P256Key::generate().unwrap()),
            36500,
            None,
            Arc::new(Settings::default()),
        )
        .unwrap();
        StatusManager::new(Arc::new(ca))
    }

    fn issue(manager: &StatusManager, cn: &str) -> Certificate {
        let key = SubjectKey::Spki(Ed25519Key::generate().unwrap().spki_der().unwrap());
        let request = IssueRequest::new(format!("CN={cn}").parse().unwrap(), key);
        manager.issue(&request).unwrap()
    }

    fn serials(crl: &CertificateList) -> Vec<String> {
        crl.tbs_cert_list
            .revoked_certificates
            .iter()
            .flatten()
            .map(|revoked| crate::asn1::serial_to_hex(&revoked.serial_number))
            .collect()
    }

    #[test]
    fn test_ocsp_response_is_cached_until_revocation() {
        let now = OffsetDateTime::now_utc();
        let manager = manager();
        let certificate = issue(&manager, "cached.example.com");
        let query = OcspQuery::for_serial(manager.ca(), &certificate.serial).unwrap();

        let first = manager.answer_ocsp_at(&query, now).unwrap();
        let second = manager
            .answer_ocsp_at(&query, now + Duration::minutes(5))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.status, CertificateStatus::Good);

        manager
            .revoke_at(
                &certificate.serial,
                RevocationReason::KeyCompromise,
                None,
                now + Duration::minutes(6),
            )
            .unwrap();
        let revoked = manager
            .answer_ocsp_at(&query, now + Duration::minutes(7))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &revoked));
        assert!(matches!(
            revoked.status,
            CertificateStatus::Revoked {
                reason: RevocationReason::KeyCompromise,
                ..
            }
        ));
        let basic = revoked.basic_response().unwrap();
        assert!(matches!(
            basic.tbs_response_data.responses[0].cert_status,
            CertStatus::Revoked(_)
        ));
    }

    #[test]
    fn test_ocsp_refresh_margin_and_expiry() {
        let now = OffsetDateTime::now_utc();
        let manager = manager();
        let certificate = issue(&manager, "refresh.example.com");
        let query = OcspQuery::for_serial(manager.ca(), &certificate.serial).unwrap();

        let first = manager.answer_ocsp_at(&query, now).unwrap();
        // 3600s validity, 300s margin
        let before_margin = manager
            .answer_ocsp_at(&query, now + Duration::seconds(3299))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &before_margin));
        let in_margin = manager
            .answer_ocsp_at(&query, now + Duration::seconds(3300))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &in_margin));
        assert_eq!(in_margin.this_update, now + Duration::seconds(3300));
    }

    #[test]
    fn test_unknown_answers_are_not_cached() {
        let now = OffsetDateTime::now_utc();
        let manager = manager();
        let query = OcspQuery::for_serial(manager.ca(), "ABCDEF").unwrap();
        let first = manager.answer_ocsp_at(&query, now).unwrap();
        let second = manager.answer_ocsp_at(&query, now).unwrap();
        assert_eq!(first.status, CertificateStatus::Unknown);
        assert!(!Arc::ptr_eq(&first, &second));

        let other = foreign_issuer_query(&manager);
        assert_eq!(
            manager.answer_ocsp_at(&other, now).unwrap().status,
            CertificateStatus::Unknown
        );
    }

    fn foreign_issuer_query(manager: &StatusManager) -> OcspQuery {
        let certificate = issue(manager, "foreign.example.com");
        let mut query = OcspQuery::for_serial(manager.ca(), &certificate.serial).unwrap();
        query.issuer_key_hash = vec![0; 32];
        query
    }

    #[test]
    fn test_der_interface_answers_malformed_requests() {
        let manager = manager();
        let certificate = issue(&manager, "der.example.com");
        let request = OcspQuery::for_serial(manager.ca(), &certificate.serial)
            .unwrap()
            .to_request_der()
            .unwrap();
        let response = manager.answer_ocsp_der(&request).unwrap();
        assert!(parse_basic_response(&response).is_ok());

        let malformed = manager.answer_ocsp_der(b"not der").unwrap();
        assert_eq!(
            malformed,
            error_response(OcspResponseStatus::MalformedRequest).unwrap()
        );
    }

    #[test]
    fn test_sha1_queries_are_cached_separately_and_invalidated_together() {
        let now = OffsetDateTime::now_utc();
        let manager = manager();
        let certificate = issue(&manager, "sha1.example.com");
        let sha1 = OcspQuery::for_serial_with(manager.ca(), &certificate.serial, CertIdHash::Sha1)
            .unwrap();
        let sha256 = OcspQuery::for_serial(manager.ca(), &certificate.serial).unwrap();

        let der = manager
            .answer_ocsp_der(&sha1.to_request_der().unwrap())
            .unwrap();
        let basic = parse_basic_response(&der).unwrap();
        let single = &basic.tbs_response_data.responses[0];
        assert_eq!(single.cert_id, sha1.cert_id().unwrap());
        assert!(matches!(single.cert_status, CertStatus::Good(_)));

        let first_sha1 = manager.answer_ocsp_at(&sha1, now).unwrap();
        let first_sha256 = manager.answer_ocsp_at(&sha256, now).unwrap();
        assert!(!Arc::ptr_eq(&first_sha1, &first_sha256));
        assert!(Arc::ptr_eq(
            &first_sha1,
            &manager.answer_ocsp_at(&sha1, now + Duration::minutes(1)).unwrap()
        ));

        manager
            .revoke_at(
                &certificate.serial,
                RevocationReason::CessationOfOperation,
                None,
                now + Duration::minutes(2),
            )
            .unwrap();
        for query in [&sha1, &sha256] {
            let response = manager
                .answer_ocsp_at(query, now + Duration::minutes(3))
                .unwrap();
            assert!(matches!(response.status, CertificateStatus::Revoked { .. }));
        }
    }

    #[test]
    fn test_revocation_marks_crls_stale_and_advances_number() {
        let now = OffsetDateTime::now_utc();
        let manager = manager();
        let certificate = issue(&manager, "crl.example.com");

        let first = manager.crl_at("user", now).unwrap();
        assert_eq!(first.number, 0);
        assert_eq!(first.entries, 0);
        let cached = manager.crl_at("user", now + Duration::minutes(1)).unwrap();
        assert!(Arc::ptr_eq(&first, &cached));

        manager
            .revoke_at(
                &certificate.serial,
                RevocationReason::Superseded,
                None,
                now + Duration::minutes(2),
            )
            .unwrap();
        let rebuilt = manager.crl_at("user", now + Duration::minutes(3)).unwrap();
        assert_eq!(rebuilt.number, 1);
        assert_eq!(serials(&rebuilt.parse().unwrap()), vec![certificate.serial]);

        // the "ca" scope keeps its own counter
        assert_eq!(manager.crl_at("ca", now).unwrap().number, 0);
    }

    #[test]
    fn test_crl_refresh_cadence() {
        let now = OffsetDateTime::now_utc();
        let manager = manager();
        let first = manager.crl_at("user", now).unwrap();
        let refreshed = manager.crl_at("user", now + Duration::hours(1)).unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(refreshed.number, 1);
        assert_eq!(refreshed.this_update, now + Duration::hours(1));

        assert!(matches!(
            manager.crl_at("missing", now),
            Err(PkiError::ConfigError(_))
        ));
    }

    #[test]
    fn test_user_scope_excludes_ca_certificates() {
        let manager = manager();
        let end_entity = issue(&manager, "user.example.com");
        let intermediate = manager
            .ca()
            .init_intermediate(
                "Status Sub",
                "CN=Status Sub".parse().unwrap(),
                Arc::new(P256Key::generate().unwrap()),
                365,
                None,
            )
            .unwrap();
        let record = intermediate.certificate_record().unwrap();
        let ca_serial = record.serial.clone();
        manager.register(record).unwrap();

        let at = OffsetDateTime::now_utc();
        for serial in [&end_entity.serial, &ca_serial] {
            manager
                .revoke_at(serial, RevocationReason::Unspecified, None, at)
                .unwrap();
        }

        let user = manager.crl_at("user", at).unwrap().parse().unwrap();
        assert_eq!(serials(&user), vec![end_entity.serial.clone()]);
        let ca = manager.crl_at("ca", at).unwrap().parse().unwrap();
        assert_eq!(serials(&ca), vec![ca_serial]);
    }
}
