//! # Withdrawal Ledger
//!
//! Creator balance is derived on every read from paid orders and
//! committed withdrawals; nothing is cached. The one-pending-withdrawal
//! rule lives in the store insert, so two concurrent requests cannot both
//! pass it.

use crate::collaborators::{AuditEntry, Collaborators, NotificationKind};
use crate::config::MarketSettings;
use crate::error::{MarketError, MarketResult};
use crate::lifecycle::Transition;
use crate::store::{BoxedStore, SaveResult};
use crate::withdrawal::{BalanceSummary, PayoutMethod, Withdrawal, WithdrawalStatus, WithdrawalUpdate};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

pub struct WithdrawalLedger {
    store: BoxedStore,
    collaborators: Collaborators,
    settings: MarketSettings,
}

impl WithdrawalLedger {
    pub fn new(store: BoxedStore, collaborators: Collaborators, settings: MarketSettings) -> Self {
        Self {
            store,
            collaborators,
            settings,
        }
    }

    pub async fn balance(&self, creator_id: &str) -> MarketResult<BalanceSummary> {
        let earnings = self.store.creator_paid_earnings(creator_id).await?;
        let withdrawn = self
            .store
            .withdrawals_total(creator_id, &[WithdrawalStatus::Completed])
            .await?;
        let in_flight = self
            .store
            .withdrawals_total(creator_id, &WithdrawalStatus::IN_FLIGHT)
            .await?;
        Ok(BalanceSummary::compute(earnings, withdrawn, in_flight))
    }

    /// Newest first
    pub async fn list_withdrawals(&self, creator_id: &str) -> MarketResult<Vec<Withdrawal>> {
        self.store.list_withdrawals(creator_id).await
    }

    #[instrument(skip(self, details))]
    pub async fn request_withdrawal(
        &self,
        creator_id: &str,
        amount: i64,
        method: PayoutMethod,
        details: HashMap<String, String>,
    ) -> MarketResult<Withdrawal> {
        if amount < self.settings.min_withdrawal {
            return Err(MarketError::validation(format!(
                "Minimum withdrawal is {} cents",
                self.settings.min_withdrawal
            )));
        }
        let balance = self.balance(creator_id).await?;
        if amount > balance.available {
            return Err(MarketError::validation(format!(
                "Insufficient balance: {} cents available",
                balance.available
            )));
        }

        let withdrawal = Withdrawal::pending(creator_id, amount, method, details);
        match self.store.insert_pending_withdrawal(withdrawal.clone()).await? {
            SaveResult::Inserted => {}
            SaveResult::AlreadyExists => return Err(MarketError::DuplicatePendingWithdrawal),
        }
        info!(withdrawal_id = %withdrawal.id, amount, "Withdrawal requested");

        self.notify(
            creator_id,
            NotificationKind::WithdrawalRequested,
            json!({ "withdrawalId": withdrawal.id, "amount": amount }),
        )
        .await;
        Ok(withdrawal)
    }

    #[instrument(skip(self, note))]
    pub async fn approve_withdrawal(
        &self,
        id: &str,
        admin_id: &str,
        note: Option<String>,
    ) -> MarketResult<Withdrawal> {
        let withdrawal = self
            .move_to(
                id,
                &[WithdrawalStatus::Pending],
                WithdrawalStatus::Approved,
                WithdrawalUpdate::by(admin_id).with_note(note),
            )
            .await?;
        self.notify(
            &withdrawal.creator_id,
            NotificationKind::WithdrawalApproved,
            json!({ "withdrawalId": withdrawal.id, "amount": withdrawal.amount }),
        )
        .await;
        Ok(withdrawal)
    }

    #[instrument(skip(self, note))]
    pub async fn reject_withdrawal(&self, id: &str, admin_id: &str, note: &str) -> MarketResult<Withdrawal> {
        let note = note.trim();
        if note.is_empty() {
            return Err(MarketError::validation("A note is required when rejecting a withdrawal"));
        }
        let withdrawal = self
            .move_to(
                id,
                &[WithdrawalStatus::Pending],
                WithdrawalStatus::Rejected,
                WithdrawalUpdate::by(admin_id).with_note(Some(note.to_string())),
            )
            .await?;
        self.notify(
            &withdrawal.creator_id,
            NotificationKind::WithdrawalRejected,
            json!({ "withdrawalId": withdrawal.id, "amount": withdrawal.amount, "note": note }),
        )
        .await;
        Ok(withdrawal)
    }

    #[instrument(skip(self))]
    pub async fn mark_processing(&self, id: &str, admin_id: &str) -> MarketResult<Withdrawal> {
        self.move_to(
            id,
            &[WithdrawalStatus::Approved],
            WithdrawalStatus::Processing,
            WithdrawalUpdate::by(admin_id),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn complete_withdrawal(
        &self,
        id: &str,
        admin_id: &str,
        transfer_id: Option<String>,
    ) -> MarketResult<Withdrawal> {
        let withdrawal = self
            .move_to(
                id,
                &[WithdrawalStatus::Approved, WithdrawalStatus::Processing],
                WithdrawalStatus::Completed,
                WithdrawalUpdate::by(admin_id).with_transfer(transfer_id),
            )
            .await?;
        self.notify(
            &withdrawal.creator_id,
            NotificationKind::WithdrawalCompleted,
            json!({ "withdrawalId": withdrawal.id, "amount": withdrawal.amount }),
        )
        .await;
        Ok(withdrawal)
    }

    /// Compare-and-set `from -> to`, then audit
    async fn move_to(
        &self,
        id: &str,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        update: WithdrawalUpdate,
    ) -> MarketResult<Withdrawal> {
        let admin_id = update.admin_id.clone();
        let withdrawal = match self.store.transition_withdrawal(id, from, to, update).await? {
            Transition::Applied(w) => w,
            Transition::Skipped(w) => {
                return Err(MarketError::InvalidTransition {
                    entity: "withdrawal",
                    from: w.status.to_string(),
                    to: to.to_string(),
                });
            }
        };

        let entry = AuditEntry::new(
            Some(admin_id.as_str()),
            format!("withdrawal.{}", to),
            "withdrawal",
            &withdrawal.id,
            json!({
                "creatorId": withdrawal.creator_id,
                "amount": withdrawal.amount,
                "note": withdrawal.admin_note,
                "transferId": withdrawal.transfer_id,
            }),
        );
        if let Err(e) = self.collaborators.audit.append(entry).await {
            warn!(withdrawal_id = %withdrawal.id, error = %e, "Audit append failed");
        }
        info!(withdrawal_id = %withdrawal.id, status = %to, admin_id = %admin_id, "Withdrawal updated");
        Ok(withdrawal)
    }

    /// Failure is logged; the transition already happened
    async fn notify(&self, user_id: &str, kind: NotificationKind, payload: serde_json::Value) {
        if let Err(e) = self.collaborators.notifier.notify(user_id, kind, payload).await {
            warn!(user_id, ?kind, error = %e, "Withdrawal notification failed");
        }
    }
}
