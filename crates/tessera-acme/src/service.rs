//! ACME服务
//!
//! `AcmeService`持有一个CA的订单、授权和挑战记录。挑战验证期间不持有锁，
//! 不同挑战的验证可以并发进行。

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::RwLock;
use tessera_pki::{
    extension::{ExtensionOverride, ExtensionValue, GeneralName},
    Csr, IssueRequest, StatusManager, Subject, SubjectKey,
};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{AcmeError, Result},
    types::{
        new_token, Authorization, AuthorizationStatus, Challenge, ChallengeStatus, ChallengeType,
        Identifier, Order, OrderStatus,
    },
    validation::{self, ChallengeFetcher},
};

/// 每个授权提供的挑战类型
const OFFERED_CHALLENGES: [ChallengeType; 2] = [ChallengeType::Http01, ChallengeType::Dns01];

#[derive(Debug, Default)]
struct Records {
    orders: HashMap<Uuid, Order>,
    authorizations: HashMap<Uuid, Authorization>,
    challenges: HashMap<Uuid, Challenge>,
}

impl Records {
    fn order_mut(&mut self, id: Uuid) -> Result<&mut Order> {
        self.orders
            .get_mut(&id)
            .ok_or_else(|| AcmeError::not_found("order", id))
    }

    fn authorization_mut(&mut self, id: Uuid) -> Result<&mut Authorization> {
        self.authorizations
            .get_mut(&id)
            .ok_or_else(|| AcmeError::not_found("authorization", id))
    }

    fn challenge_mut(&mut self, id: Uuid) -> Result<&mut Challenge> {
        self.challenges
            .get_mut(&id)
            .ok_or_else(|| AcmeError::not_found("challenge", id))
    }

    /// 根据挑战更新授权，再根据授权更新订单
    fn propagate(&mut self, authorization_id: Uuid) -> Result<()> {
        let statuses: Vec<ChallengeStatus> = self
            .authorizations
            .get(&authorization_id)
            .ok_or_else(|| AcmeError::not_found("authorization", authorization_id))?
            .challenges
            .iter()
            .filter_map(|id| self.challenges.get(id).map(|challenge| challenge.status))
            .collect();
        let authorization = self.authorization_mut(authorization_id)?;
        authorization.apply_challenges(&statuses);
        let order_id = authorization.order_id;
        self.refresh_order(order_id)
    }

    fn refresh_order(&mut self, order_id: Uuid) -> Result<()> {
        let statuses: Vec<AuthorizationStatus> = self
            .orders
            .get(&order_id)
            .ok_or_else(|| AcmeError::not_found("order", order_id))?
            .authorizations
            .iter()
            .filter_map(|id| self.authorizations.get(id).map(|authz| authz.status))
            .collect();
        let order = self.order_mut(order_id)?;
        let before = order.status;
        let after = order.apply_authorizations(&statuses);
        if before != after {
            info!(order = %order_id, from = %before, to = %after, "Order status changed");
        }
        Ok(())
    }
}

/// 单个CA的ACME状态机
pub struct AcmeService {
    status: Arc<StatusManager>,
    fetcher: Arc<dyn ChallengeFetcher>,
    records: RwLock<Records>,
}

impl std::fmt::Debug for AcmeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeService")
            .field("ca", &self.status.ca().name())
            .finish_non_exhaustive()
    }
}

impl AcmeService {
    /// CA必须启用了ACME
    pub fn new(status: Arc<StatusManager>, fetcher: Arc<dyn ChallengeFetcher>) -> Result<Self> {
        if !status.ca().config().acme_enabled {
            return Err(AcmeError::Disabled(status.ca().name().to_string()));
        }
        Ok(Self {
            status,
            fetcher,
            records: RwLock::new(Records::default()),
        })
    }

    pub fn status_manager(&self) -> &Arc<StatusManager> {
        &self.status
    }

    fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.status.ca().settings().acme.validation_timeout_seconds)
    }

    pub fn create_order(&self, thumbprint: &str, identifiers: &[String]) -> Result<Order> {
        self.create_order_at(thumbprint, identifiers, OffsetDateTime::now_utc())
    }

    /// 创建订单：每个标识符一个授权，每个授权提供`http-01`和`dns-01`挑战
    pub fn create_order_at(
        &self,
        thumbprint: &str,
        identifiers: &[String],
        now: OffsetDateTime,
    ) -> Result<Order> {
        if identifiers.is_empty() {
            return Err(AcmeError::Malformed("order has no identifiers".to_string()));
        }
        let mut unique: Vec<Identifier> = Vec::new();
        for value in identifiers {
            GeneralName::parse_typed("DNS", value).map_err(AcmeError::Malformed)?;
            let identifier = Identifier::dns(value.as_str());
            if !unique.contains(&identifier) {
                unique.push(identifier);
            }
        }

        let validity = self.status.ca().settings().acme.order_validity_seconds;
        let expires = now + time::Duration::seconds(i64::try_from(validity).unwrap_or(i64::MAX));
        let mut order = Order {
            id: Uuid::new_v4(),
            account_thumbprint: thumbprint.to_string(),
            status: OrderStatus::Pending,
            expires,
            identifiers: unique.clone(),
            authorizations: Vec::new(),
            certificate_serial: None,
            certificate_pem: None,
        };

        let mut records = self.records.write();
        for identifier in unique {
            let mut authorization = Authorization {
                id: Uuid::new_v4(),
                order_id: order.id,
                identifier,
                status: AuthorizationStatus::Pending,
                expires,
                challenges: Vec::new(),
            };
            for kind in OFFERED_CHALLENGES {
                let challenge = Challenge {
                    id: Uuid::new_v4(),
                    authorization_id: authorization.id,
                    kind,
                    status: ChallengeStatus::Pending,
                    token: new_token(),
                    validated: None,
                    error: None,
                };
                authorization.challenges.push(challenge.id);
                records.challenges.insert(challenge.id, challenge);
            }
            order.authorizations.push(authorization.id);
            records
                .authorizations
                .insert(authorization.id, authorization);
        }
        records.orders.insert(order.id, order.clone());

        info!(
            ca = %self.status.ca().name(),
            order = %order.id,
            identifiers = order.identifiers.len(),
            "ACME order created"
        );
        Ok(order)
    }

    pub fn order(&self, id: Uuid) -> Result<Order> {
        self.records
            .read()
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| AcmeError::not_found("order", id))
    }

    pub fn authorization(&self, id: Uuid) -> Result<Authorization> {
        self.records
            .read()
            .authorizations
            .get(&id)
            .cloned()
            .ok_or_else(|| AcmeError::not_found("authorization", id))
    }

    pub fn challenge(&self, id: Uuid) -> Result<Challenge> {
        self.records
            .read()
            .challenges
            .get(&id)
            .cloned()
            .ok_or_else(|| AcmeError::not_found("challenge", id))
    }

    /// 授权下的挑战
    pub fn challenges_of(&self, authorization_id: Uuid) -> Result<Vec<Challenge>> {
        let records = self.records.read();
        let authorization = records
            .authorizations
            .get(&authorization_id)
            .ok_or_else(|| AcmeError::not_found("authorization", authorization_id))?;
        Ok(authorization
            .challenges
            .iter()
            .filter_map(|id| records.challenges.get(id).cloned())
            .collect())
    }

    /// 触发挑战验证，返回验证后的挑战
    ///
    /// 验证失败不会作为错误返回，而是体现在挑战的`invalid`状态中。
    pub async fn trigger_challenge(&self, id: Uuid) -> Result<Challenge> {
        let (kind, host, token, thumbprint) = {
            let mut records = self.records.write();
            let challenge = records.challenges.get(&id).ok_or_else(|| AcmeError::not_found("challenge", id))?;
            let authorization = records
                .authorizations
                .get(&challenge.authorization_id)
                .ok_or_else(|| AcmeError::not_found("authorization", challenge.authorization_id))?;
            if authorization.status != AuthorizationStatus::Pending {
                return Err(AcmeError::transition(
                    "authorization",
                    authorization.status,
                    "validation",
                ));
            }
            let thumbprint = records
                .orders
                .get(&authorization.order_id)
                .ok_or_else(|| AcmeError::not_found("order", authorization.order_id))?
                .account_thumbprint
                .clone();
            let host = authorization.identifier.value.clone();
            let challenge = records.challenge_mut(id)?;
            challenge.begin_validation()?;
            (challenge.kind, host, challenge.token.clone(), thumbprint)
        };

        let outcome = validation::validate(
            self.fetcher.as_ref(),
            kind,
            &host,
            &token,
            &thumbprint,
            self.validation_timeout(),
        )
        .await;
        if let Err(failure) = &outcome {
            warn!(challenge = %id, host = %host, error = %failure, "ACME validation failed");
        }

        let mut records = self.records.write();
        let challenge = records.challenge_mut(id)?;
        challenge.complete_validation(outcome, OffsetDateTime::now_utc())?;
        let (authorization_id, challenge) = (challenge.authorization_id, challenge.clone());
        records.propagate(authorization_id)?;
        Ok(challenge)
    }

    /// 客户端停用授权；所属订单随之失效
    pub fn deactivate_authorization(&self, id: Uuid) -> Result<Authorization> {
        let mut records = self.records.write();
        let authorization = records.authorization_mut(id)?;
        authorization.deactivate()?;
        let (order_id, authorization) = (authorization.order_id, authorization.clone());
        records.refresh_order(order_id)?;
        info!(authorization = %id, "ACME authorization deactivated");
        Ok(authorization)
    }

    /// 将过期的订单和授权标记为失效，返回变化的记录数
    pub fn sweep_expired(&self, now: OffsetDateTime) -> usize {
        let mut records = self.records.write();
        let mut changed = 0;
        for authorization in records.authorizations.values_mut() {
            if authorization.expire(now) {
                changed += 1;
            }
        }
        for order in records.orders.values_mut() {
            if order.expire(now) {
                changed += 1;
            }
        }
        if changed > 0 {
            info!(changed, "Expired ACME records swept");
        }
        changed
    }

    pub fn finalize(&self, order_id: Uuid, csr: &[u8]) -> Result<Order> {
        self.finalize_at(order_id, csr, OffsetDateTime::now_utc())
    }

    /// 完成订单：CSR请求的DNS名称必须与订单标识符完全一致
    ///
    /// CSR不匹配时订单保持`ready`；签发失败时订单变为`invalid`。
    pub fn finalize_at(&self, order_id: Uuid, csr: &[u8], now: OffsetDateTime) -> Result<Order> {
        let order = self.order(order_id)?;
        if order.status != OrderStatus::Ready {
            return Err(AcmeError::OrderNotReady(order_id));
        }
        if order.is_expired_at(now) {
            return Err(AcmeError::OrderExpired(order_id));
        }

        let csr = Csr::parse(csr)?;
        let mut requested = csr.requested_dns_names()?;
        requested.sort();
        requested.dedup();
        let mut expected: Vec<String> = order
            .identifiers
            .iter()
            .map(|identifier| identifier.value.clone())
            .collect();
        expected.sort();
        if requested != expected {
            return Err(AcmeError::CsrMismatch(format!(
                "requested {:?}, order has {:?}",
                requested, expected
            )));
        }

        self.records.write().order_mut(order_id)?.begin_processing(now)?;

        let ca = self.status.ca();
        let names = order
            .identifiers
            .iter()
            .map(|identifier| GeneralName::Dns(identifier.value.clone()))
            .collect();
        let mut request = IssueRequest::new(
            Subject::new().with("CN", order.identifiers[0].value.as_str())?,
            SubjectKey::Csr(Box::new(csr)),
        )
        .with_extension(ExtensionOverride::new(
            ExtensionValue::SubjectAlternativeName(names),
        ))
        .with_validity_days(ca.settings().acme.default_cert_validity_days);
        if let Some(profile) = &ca.config().acme_profile {
            request = request.with_profile(profile.as_str());
        }

        let issued = self.status.issue(&request);
        let mut records = self.records.write();
        let order = records.order_mut(order_id)?;
        match issued {
            Ok(certificate) => {
                order.complete(certificate.serial.clone(), certificate.to_pem())?;
                info!(
                    ca = %ca.name(),
                    order = %order_id,
                    serial = %certificate.serial,
                    "ACME order finalized"
                );
                Ok(order.clone())
            }
            Err(e) => {
                order.fail()?;
                warn!(ca = %ca.name(), order = %order_id, error = %e, "ACME issuance failed");
                Err(e.into())
            }
        }
    }
}
