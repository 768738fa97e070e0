//! # Collaborators
//!
//! Interfaces to services owned by other parts of the marketplace:
//! notifications, transactional email, the audit log and coupons.
//! The in-memory implementations back simulate mode and the tests.

use crate::error::{MarketError, MarketResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

// =============================================================================
// Notifications
// =============================================================================

/// In-app notification kinds emitted by the payment pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderPaid,
    SaleMade,
    OrderExpired,
    PaymentFailed,
    OrderRefunded,
    ServiceOrderPaid,
    ServiceOrderReceived,
    ServiceOrderCancelled,
    WithdrawalRequested,
    WithdrawalApproved,
    WithdrawalRejected,
    WithdrawalCompleted,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, kind: NotificationKind, payload: Value) -> MarketResult<()>;
}

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub payload: Value,
}

/// Records notifications in memory
#[derive(Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<RwLock<Vec<SentNotification>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.read().await.clone()
    }

    pub async fn count(&self, user_id: &str, kind: NotificationKind) -> usize {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id && n.kind == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, user_id: &str, kind: NotificationKind, payload: Value) -> MarketResult<()> {
        debug!(user_id, ?kind, "notification");
        self.sent.write().await.push(SentNotification {
            user_id: user_id.to_string(),
            kind,
            payload,
        });
        Ok(())
    }
}

// =============================================================================
// Email
// =============================================================================

/// A transactional email; rendering happens in the mail service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub template: String,
    pub subject: String,
    pub data: Value,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> MarketResult<()>;
}

/// Records emails in memory
#[derive(Default, Clone)]
pub struct MemoryMailer {
    outbox: Arc<RwLock<Vec<OutgoingEmail>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn outbox(&self) -> Vec<OutgoingEmail> {
        self.outbox.read().await.clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: OutgoingEmail) -> MarketResult<()> {
        info!(to = %email.to, template = %email.template, "email queued");
        self.outbox.write().await.push(email);
        Ok(())
    }
}

// =============================================================================
// Audit log
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// `None` for system actions (webhooks)
    pub actor_id: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: Option<&str>,
        action: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            actor_id: actor_id.map(String::from),
            action: action.into(),
            target_type: target_type.into(),
            target_id: target_id.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> MarketResult<()>;
}

/// Append-only in-memory audit log
#[derive(Default, Clone)]
pub struct MemoryAuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    pub async fn actions_for(&self, target_id: &str) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.target_id == target_id)
            .map(|e| e.action.clone())
            .collect()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> MarketResult<()> {
        info!(
            actor = ?entry.actor_id,
            action = %entry.action,
            target = %format!("{}:{}", entry.target_type, entry.target_id),
            "audit"
        );
        self.entries.write().await.push(entry);
        Ok(())
    }
}

// =============================================================================
// Coupons
// =============================================================================

/// Outcome of validating a coupon code against a cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponValidation {
    pub valid: bool,
    /// Discount in minor units
    pub discount: i64,
    pub coupon_id: Option<String>,
    /// Buyer-facing reason when invalid
    pub message: Option<String>,
}

impl CouponValidation {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            discount: 0,
            coupon_id: None,
            message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait CouponService: Send + Sync {
    async fn validate(
        &self,
        buyer_id: &str,
        code: &str,
        subtotal: i64,
        category: &str,
    ) -> MarketResult<CouponValidation>;

    async fn record_usage(
        &self,
        coupon_id: &str,
        buyer_id: &str,
        order_id: &str,
        discount: i64,
    ) -> MarketResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponKind {
    /// `value` is a percentage
    Percent,
    /// `value` is an amount in minor units
    Fixed,
}

/// Coupon definition (created elsewhere, seeded from config here)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: String,
    pub code: String,
    pub kind: CouponKind,
    pub value: i64,
    #[serde(default)]
    pub min_subtotal: i64,
    /// Restrict to one category; empty = any
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default = "default_true")]
    pub once_per_buyer: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Coupon {
    fn discount_for(&self, subtotal: i64) -> i64 {
        match self.kind {
            CouponKind::Percent => (subtotal * self.value.clamp(0, 100) + 50) / 100,
            CouponKind::Fixed => self.value.min(subtotal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponUsage {
    pub coupon_id: String,
    pub buyer_id: String,
    pub order_id: String,
    pub discount: i64,
}

/// Coupon table and usage history in memory
#[derive(Default, Clone)]
pub struct MemoryCouponService {
    coupons: Arc<RwLock<HashMap<String, Coupon>>>,
    usages: Arc<RwLock<Vec<CouponUsage>>>,
}

impl MemoryCouponService {
    pub fn new(coupons: impl IntoIterator<Item = Coupon>) -> Self {
        let table = coupons
            .into_iter()
            .map(|c| (c.code.to_uppercase(), c))
            .collect();
        Self {
            coupons: Arc::new(RwLock::new(table)),
            usages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn usages(&self) -> Vec<CouponUsage> {
        self.usages.read().await.clone()
    }
}

#[async_trait]
impl CouponService for MemoryCouponService {
    async fn validate(
        &self,
        buyer_id: &str,
        code: &str,
        subtotal: i64,
        category: &str,
    ) -> MarketResult<CouponValidation> {
        let coupons = self.coupons.read().await;
        let Some(coupon) = coupons.get(&code.trim().to_uppercase()) else {
            return Ok(CouponValidation::invalid(format!("Coupon {} does not exist", code)));
        };
        if !coupon.active {
            return Ok(CouponValidation::invalid("This coupon is no longer active"));
        }
        if subtotal < coupon.min_subtotal {
            return Ok(CouponValidation::invalid(format!(
                "This coupon requires a minimum purchase of {} cents",
                coupon.min_subtotal
            )));
        }
        if !coupon.category.is_empty() && coupon.category != category {
            return Ok(CouponValidation::invalid(format!(
                "This coupon only applies to {} items",
                coupon.category
            )));
        }

        let usages = self.usages.read().await;
        let used = usages.iter().filter(|u| u.coupon_id == coupon.id);
        if let Some(max) = coupon.max_uses {
            if used.clone().count() >= max as usize {
                return Ok(CouponValidation::invalid("This coupon has reached its usage limit"));
            }
        }
        if coupon.once_per_buyer && used.clone().any(|u| u.buyer_id == buyer_id) {
            return Ok(CouponValidation::invalid("You have already used this coupon"));
        }

        Ok(CouponValidation {
            valid: true,
            discount: coupon.discount_for(subtotal),
            coupon_id: Some(coupon.id.clone()),
            message: None,
        })
    }

    async fn record_usage(
        &self,
        coupon_id: &str,
        buyer_id: &str,
        order_id: &str,
        discount: i64,
    ) -> MarketResult<()> {
        if discount < 0 {
            return Err(MarketError::validation("coupon discount cannot be negative"));
        }
        self.usages.write().await.push(CouponUsage {
            coupon_id: coupon_id.to_string(),
            buyer_id: buyer_id.to_string(),
            order_id: order_id.to_string(),
            discount,
        });
        Ok(())
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// Shared handles to every collaborator the pipeline calls
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn Notifier>,
    pub mailer: Arc<dyn Mailer>,
    pub audit: Arc<dyn AuditLog>,
    pub coupons: Arc<dyn CouponService>,
}

impl Collaborators {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        mailer: Arc<dyn Mailer>,
        audit: Arc<dyn AuditLog>,
        coupons: Arc<dyn CouponService>,
    ) -> Self {
        Self {
            notifier,
            mailer,
            audit,
            coupons,
        }
    }

    /// All in-memory implementations, coupons seeded from `coupons`
    pub fn in_memory(coupons: impl IntoIterator<Item = Coupon>) -> Self {
        Self::new(
            Arc::new(MemoryNotifier::new()),
            Arc::new(MemoryMailer::new()),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(MemoryCouponService::new(coupons)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupon(code: &str, kind: CouponKind, value: i64) -> Coupon {
        Coupon {
            id: format!("cpn_{}", code.to_lowercase()),
            code: code.into(),
            kind,
            value,
            min_subtotal: 0,
            category: String::new(),
            max_uses: None,
            once_per_buyer: true,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_percent_coupon() {
        let svc = MemoryCouponService::new([coupon("SAVE10", CouponKind::Percent, 10)]);
        let v = svc.validate("b1", "save10", 4900, "").await.unwrap();
        assert!(v.valid);
        assert_eq!(v.discount, 490);
        assert_eq!(v.coupon_id.as_deref(), Some("cpn_save10"));
    }

    #[tokio::test]
    async fn test_unknown_coupon_message() {
        let svc = MemoryCouponService::new([]);
        let v = svc.validate("b1", "NOPE", 4900, "").await.unwrap();
        assert!(!v.valid);
        assert_eq!(v.message.as_deref(), Some("Coupon NOPE does not exist"));
    }

    #[tokio::test]
    async fn test_once_per_buyer() {
        let svc = MemoryCouponService::new([coupon("WELCOME", CouponKind::Fixed, 500)]);
        svc.record_usage("cpn_welcome", "b1", "ord_1", 500).await.unwrap();

        let again = svc.validate("b1", "WELCOME", 4900, "").await.unwrap();
        assert!(!again.valid);

        let other = svc.validate("b2", "WELCOME", 4900, "").await.unwrap();
        assert!(other.valid);
        assert_eq!(other.discount, 500);
    }

    #[tokio::test]
    async fn test_category_and_minimum() {
        let mut c = coupon("DESIGN", CouponKind::Percent, 20);
        c.category = "design".into();
        c.min_subtotal = 2000;
        let svc = MemoryCouponService::new([c]);

        assert!(!svc.validate("b1", "DESIGN", 4900, "code").await.unwrap().valid);
        assert!(!svc.validate("b1", "DESIGN", 1000, "design").await.unwrap().valid);
        assert!(svc.validate("b1", "DESIGN", 4900, "design").await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_memory_notifier_counts() {
        let notifier = MemoryNotifier::new();
        notifier
            .notify("u1", NotificationKind::OrderPaid, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(notifier.count("u1", NotificationKind::OrderPaid).await, 1);
        assert_eq!(notifier.count("u1", NotificationKind::SaleMade).await, 0);
    }
}
