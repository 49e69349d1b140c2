//! 状态转换
//!
//! 转换函数只修改传入的记录，不读取全局状态；由调用者决定记录的保存方式。

use time::OffsetDateTime;
use tracing::info;

use crate::{
    error::{AcmeError, Result, ValidationFailure},
    types::{
        Authorization, AuthorizationStatus, Challenge, ChallengeStatus, Order, OrderStatus,
    },
};

impl Challenge {
    /// 客户端声明已准备好：`pending -> processing`
    pub fn begin_validation(&mut self) -> Result<()> {
        if self.status != ChallengeStatus::Pending {
            return Err(AcmeError::transition(
                "challenge",
                self.status,
                ChallengeStatus::Processing,
            ));
        }
        self.status = ChallengeStatus::Processing;
        Ok(())
    }

    /// 记录验证结果：`processing -> valid | invalid`
    pub fn complete_validation(
        &mut self,
        outcome: std::result::Result<(), ValidationFailure>,
        now: OffsetDateTime,
    ) -> Result<ChallengeStatus> {
        if self.status != ChallengeStatus::Processing {
            let to = if outcome.is_ok() {
                ChallengeStatus::Valid
            } else {
                ChallengeStatus::Invalid
            };
            return Err(AcmeError::transition("challenge", self.status, to));
        }
        match outcome {
            Ok(()) => {
                self.status = ChallengeStatus::Valid;
                self.validated = Some(now);
            }
            Err(failure) => {
                self.status = ChallengeStatus::Invalid;
                self.error = Some(failure.to_string());
            }
        }
        info!(challenge = %self.id, kind = %self.kind, status = %self.status, "Challenge validated");
        Ok(self.status)
    }
}

impl Authorization {
    /// 根据挑战结果更新授权
    ///
    /// 任一挑战`valid`则授权`valid`；没有`valid`挑战而有挑战失败则授权`invalid`。
    /// 已离开`pending`的授权不再变化。
    pub fn apply_challenges<'a>(
        &mut self,
        challenges: impl IntoIterator<Item = &'a ChallengeStatus>,
    ) -> AuthorizationStatus {
        if self.status != AuthorizationStatus::Pending {
            return self.status;
        }
        let mut failed = false;
        for status in challenges {
            match status {
                ChallengeStatus::Valid => {
                    self.status = AuthorizationStatus::Valid;
                    return self.status;
                }
                ChallengeStatus::Invalid => failed = true,
                _ => {}
            }
        }
        if failed {
            self.status = AuthorizationStatus::Invalid;
        }
        self.status
    }

    /// 客户端停用授权：`pending | valid -> deactivated`
    pub fn deactivate(&mut self) -> Result<()> {
        match self.status {
            AuthorizationStatus::Pending | AuthorizationStatus::Valid => {
                self.status = AuthorizationStatus::Deactivated;
                Ok(())
            }
            from => Err(AcmeError::transition(
                "authorization",
                from,
                AuthorizationStatus::Deactivated,
            )),
        }
    }

    /// 过期的`pending`或`valid`授权变为`expired`；返回是否发生变化
    pub fn expire(&mut self, now: OffsetDateTime) -> bool {
        let live = matches!(
            self.status,
            AuthorizationStatus::Pending | AuthorizationStatus::Valid
        );
        if live && now >= self.expires {
            self.status = AuthorizationStatus::Expired;
            return true;
        }
        false
    }
}

impl Order {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires
    }

    /// 根据授权状态更新订单
    ///
    /// 所有授权`valid`时`pending -> ready`；任一授权失败或被停用时订单`invalid`。
    pub fn apply_authorizations<'a>(
        &mut self,
        authorizations: impl IntoIterator<Item = &'a AuthorizationStatus>,
    ) -> OrderStatus {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Ready) {
            return self.status;
        }
        let mut all_valid = true;
        for status in authorizations {
            match status {
                AuthorizationStatus::Valid => {}
                AuthorizationStatus::Pending => all_valid = false,
                _ => {
                    self.status = OrderStatus::Invalid;
                    return self.status;
                }
            }
        }
        if all_valid && self.status == OrderStatus::Pending {
            self.status = OrderStatus::Ready;
        }
        self.status
    }

    /// 开始签发：`ready -> processing`
    pub fn begin_processing(&mut self, now: OffsetDateTime) -> Result<()> {
        if self.status != OrderStatus::Ready {
            return Err(AcmeError::OrderNotReady(self.id));
        }
        if self.is_expired_at(now) {
            return Err(AcmeError::OrderExpired(self.id));
        }
        self.status = OrderStatus::Processing;
        Ok(())
    }

    /// 签发完成：`processing -> valid`
    pub fn complete(&mut self, serial: String, pem: String) -> Result<()> {
        if self.status != OrderStatus::Processing {
            return Err(AcmeError::transition("order", self.status, OrderStatus::Valid));
        }
        self.status = OrderStatus::Valid;
        self.certificate_serial = Some(serial);
        self.certificate_pem = Some(pem);
        Ok(())
    }

    /// 签发失败：`processing -> invalid`
    pub fn fail(&mut self) -> Result<()> {
        if self.status != OrderStatus::Processing {
            return Err(AcmeError::transition("order", self.status, OrderStatus::Invalid));
        }
        self.status = OrderStatus::Invalid;
        Ok(())
    }

    /// 过期的`pending`或`ready`订单变为`invalid`；返回是否发生变化
    pub fn expire(&mut self, now: OffsetDateTime) -> bool {
        let open = matches!(self.status, OrderStatus::Pending | OrderStatus::Ready);
        if open && self.is_expired_at(now) {
            self.status = OrderStatus::Invalid;
            return true;
        }
        false
    }
}
