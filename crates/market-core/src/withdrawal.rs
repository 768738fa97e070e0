//! # Withdrawals
//!
//! Creator requests to turn ledger balance into a real payout.
//! `pending -> approved -> processing -> completed`, or `pending -> rejected`.

use crate::error::MarketResult;
use crate::lifecycle::Lifecycle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Processing,
    Completed,
    Rejected,
}

impl WithdrawalStatus {
    /// Statuses whose amount is deducted from the available balance
    pub const COMMITTED: [WithdrawalStatus; 4] = [
        WithdrawalStatus::Pending,
        WithdrawalStatus::Approved,
        WithdrawalStatus::Processing,
        WithdrawalStatus::Completed,
    ];

    /// Committed but not yet paid out
    pub const IN_FLIGHT: [WithdrawalStatus; 3] = [
        WithdrawalStatus::Pending,
        WithdrawalStatus::Approved,
        WithdrawalStatus::Processing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Lifecycle for WithdrawalStatus {
    const ENTITY: &'static str = "withdrawal";

    fn allowed_next(&self) -> &'static [Self] {
        use WithdrawalStatus::*;
        match self {
            Pending => &[Approved, Rejected],
            Approved => &[Processing, Completed],
            Processing => &[Completed],
            Completed | Rejected => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    BankTransfer,
    Paypal,
    StripeConnect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: String,

    pub creator_id: String,

    /// Minor units
    pub amount: i64,

    pub status: WithdrawalStatus,

    pub method: PayoutMethod,

    /// Account details as submitted (snapshot)
    #[serde(default)]
    pub details: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_note: Option<String>,

    /// Admin who last moved this withdrawal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,

    /// Out-of-band transfer reference recorded at completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,

    pub requested_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    pub fn pending(
        creator_id: impl Into<String>,
        amount: i64,
        method: PayoutMethod,
        details: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            creator_id: creator_id.into(),
            amount,
            status: WithdrawalStatus::Pending,
            method,
            details,
            admin_note: None,
            processed_by: None,
            transfer_id: None,
            requested_at: Utc::now(),
            processed_at: None,
            completed_at: None,
        }
    }

    /// Move to `next` and stamp the admin fields
    pub fn apply(&mut self, next: WithdrawalStatus, update: &WithdrawalUpdate) -> MarketResult<()> {
        self.status.ensure_transition(next)?;
        let now = Utc::now();
        self.status = next;
        self.processed_by = Some(update.admin_id.clone());
        if update.admin_note.is_some() {
            self.admin_note = update.admin_note.clone();
        }
        match next {
            WithdrawalStatus::Completed => {
                self.completed_at = Some(now);
                if update.transfer_id.is_some() {
                    self.transfer_id = update.transfer_id.clone();
                }
            }
            _ => self.processed_at = Some(now),
        }
        Ok(())
    }
}

/// Admin-supplied fields written alongside a transition
#[derive(Debug, Clone, Default)]
pub struct WithdrawalUpdate {
    pub admin_id: String,
    pub admin_note: Option<String>,
    pub transfer_id: Option<String>,
}

impl WithdrawalUpdate {
    pub fn by(admin_id: impl Into<String>) -> Self {
        Self {
            admin_id: admin_id.into(),
            ..Self::default()
        }
    }

    /// Builder: attach admin note
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.admin_note = note;
        self
    }

    /// Builder: attach transfer reference
    pub fn with_transfer(mut self, transfer_id: Option<String>) -> Self {
        self.transfer_id = transfer_id;
        self
    }
}

/// Derived balance. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    /// Creator payouts over paid orders
    pub total_earnings: i64,
    /// Completed withdrawals
    pub total_withdrawn: i64,
    /// Pending, approved and processing withdrawals
    pub pending_withdrawals: i64,
    pub available: i64,
}

impl BalanceSummary {
    pub fn compute(total_earnings: i64, total_withdrawn: i64, pending_withdrawals: i64) -> Self {
        Self {
            total_earnings,
            total_withdrawn,
            pending_withdrawals,
            available: total_earnings - total_withdrawn - pending_withdrawals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketError;

    #[test]
    fn test_transition_table() {
        use WithdrawalStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Approved.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Completed));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_apply_complete_stamps_transfer() {
        let mut w = Withdrawal::pending("cr_1", 5000, PayoutMethod::BankTransfer, HashMap::new());
        w.apply(WithdrawalStatus::Approved, &WithdrawalUpdate::by("admin_1"))
            .unwrap();
        assert!(w.processed_at.is_some());

        w.apply(
            WithdrawalStatus::Completed,
            &WithdrawalUpdate::by("admin_2").with_transfer(Some("tr_42".into())),
        )
        .unwrap();
        assert_eq!(w.status, WithdrawalStatus::Completed);
        assert_eq!(w.transfer_id.as_deref(), Some("tr_42"));
        assert_eq!(w.processed_by.as_deref(), Some("admin_2"));
        assert!(w.completed_at.is_some());
    }

    #[test]
    fn test_apply_rejects_illegal_move() {
        let mut w = Withdrawal::pending("cr_1", 5000, PayoutMethod::Paypal, HashMap::new());
        let err = w
            .apply(WithdrawalStatus::Completed, &WithdrawalUpdate::by("admin"))
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));
        assert_eq!(w.status, WithdrawalStatus::Pending);
    }

    #[test]
    fn test_balance_summary() {
        let b = BalanceSummary::compute(10_000, 3_000, 2_000);
        assert_eq!(b.available, 5_000);
    }
}
