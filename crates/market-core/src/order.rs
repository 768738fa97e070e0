//! # Order Types
//!
//! Template orders, service orders and provider checkout sessions.
//! Prices on an order are a snapshot taken when the session was created;
//! they are never re-derived from the live catalog.

use crate::catalog::Currency;
use crate::error::{MarketError, MarketResult};
use crate::lifecycle::Lifecycle;
use crate::pricing::OrderDraft;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate `<prefix>-<epoch-ms>-<5-digit-random>`. Display only; ids stay the key.
pub fn generate_order_number(prefix: &str) -> String {
    let suffix = 10_000 + (Uuid::new_v4().as_u128() % 90_000) as u32;
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), suffix)
}

/// What a line item refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Template,
    Service,
}

/// A priced line on an order (snapshot)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub kind: LineItemKind,

    /// Catalog item or service package id
    pub reference_id: String,

    /// Title at checkout time
    pub title: String,

    /// Price at checkout time, minor units
    pub price: i64,

    pub creator_id: String,

    pub platform_fee: i64,

    pub creator_payout: i64,

    /// Category at checkout time (coupon scoping)
    #[serde(default)]
    pub category: String,
}

/// Template order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Expired,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Expired => "expired",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Lifecycle for OrderStatus {
    const ENTITY: &'static str = "order";

    fn allowed_next(&self) -> &'static [Self] {
        use OrderStatus::*;
        match self {
            Pending => &[Paid, Expired, Failed],
            // A captured payment outranks an earlier expiry/failure signal
            Expired | Failed => &[Paid],
            Paid => &[Refunded],
            Refunded => &[],
        }
    }
}

/// A buyer's purchase of one or more templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,

    /// Human-facing `<PREFIX>-<epoch-ms>-<5-digit>`
    pub order_number: String,

    pub buyer_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_email: Option<String>,

    pub items: Vec<OrderItem>,

    pub currency: Currency,

    pub subtotal: i64,

    pub discount: i64,

    pub total: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<String>,

    pub status: OrderStatus,

    /// Provider checkout session id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Provider payment reference (payment intent or charge id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Build a pending order from a priced draft
    pub fn from_draft(
        order_number: impl Into<String>,
        buyer_id: impl Into<String>,
        buyer_email: Option<String>,
        currency: Currency,
        draft: OrderDraft,
    ) -> Self {
        let now = Utc::now();
        let (coupon_code, coupon_id) = match draft.coupon {
            Some(c) => (Some(c.code), Some(c.coupon_id)),
            None => (None, None),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            order_number: order_number.into(),
            buyer_id: buyer_id.into(),
            buyer_email,
            items: draft.lines,
            currency,
            subtotal: draft.subtotal,
            discount: draft.discount,
            total: draft.total,
            coupon_code,
            coupon_id,
            status: OrderStatus::Pending,
            session_id: None,
            charge_id: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            refunded_at: None,
        }
    }

    /// Move to `next`, stamping the matching timestamp.
    ///
    /// The charge id is only recorded on the transition to `paid` and
    /// never overwrites one already stored.
    pub fn apply_status(&mut self, next: OrderStatus, charge_id: Option<&str>) -> MarketResult<()> {
        self.status.ensure_transition(next)?;
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        match next {
            OrderStatus::Paid => {
                self.paid_at = Some(now);
                if self.charge_id.is_none() {
                    self.charge_id = charge_id.map(String::from);
                }
            }
            OrderStatus::Refunded => self.refunded_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid
    }

    /// Distinct creators on this order, in line order
    pub fn creator_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for item in &self.items {
            if !ids.contains(&item.creator_id.as_str()) {
                ids.push(&item.creator_id);
            }
        }
        ids
    }

    /// Sum of creator payouts for one creator on this order
    pub fn payout_for(&self, creator_id: &str) -> i64 {
        self.items
            .iter()
            .filter(|i| i.creator_id == creator_id)
            .map(|i| i.creator_payout)
            .sum()
    }
}

/// Commissioned-work status. Payment is tracked separately in `is_paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOrderStatus {
    Requested,
    Accepted,
    Rejected,
    InProgress,
    Delivered,
    RevisionRequested,
    Completed,
    Disputed,
    Cancelled,
}

impl ServiceOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceOrderStatus::Requested => "requested",
            ServiceOrderStatus::Accepted => "accepted",
            ServiceOrderStatus::Rejected => "rejected",
            ServiceOrderStatus::InProgress => "in_progress",
            ServiceOrderStatus::Delivered => "delivered",
            ServiceOrderStatus::RevisionRequested => "revision_requested",
            ServiceOrderStatus::Completed => "completed",
            ServiceOrderStatus::Disputed => "disputed",
            ServiceOrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ServiceOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Lifecycle for ServiceOrderStatus {
    const ENTITY: &'static str = "service order";

    fn allowed_next(&self) -> &'static [Self] {
        use ServiceOrderStatus::*;
        match self {
            Requested => &[Accepted, Rejected, Cancelled],
            Accepted => &[InProgress, Cancelled],
            InProgress => &[Delivered, Cancelled, Disputed],
            Delivered => &[Completed, RevisionRequested, Disputed],
            RevisionRequested => &[InProgress, Delivered, Disputed],
            Disputed => &[Completed, Cancelled],
            Completed | Rejected | Cancelled => &[],
        }
    }
}

/// A buyer's commission of a creator's service package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOrder {
    pub id: String,

    pub order_number: String,

    pub buyer_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_email: Option<String>,

    pub package_id: String,

    pub creator_id: String,

    pub title: String,

    pub currency: Currency,

    pub price: i64,

    pub platform_fee: i64,

    pub creator_payout: i64,

    pub delivery_days: u32,

    pub revisions: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,

    pub status: ServiceOrderStatus,

    pub is_paid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,

    /// First payment failure reported while unpaid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_failed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl ServiceOrder {
    /// Create a `requested`, unpaid service order from a priced line
    pub fn requested(
        order_number: impl Into<String>,
        buyer_id: impl Into<String>,
        buyer_email: Option<String>,
        currency: Currency,
        line: OrderItem,
        delivery_days: u32,
        revisions: u32,
        requirements: Option<String>,
    ) -> MarketResult<Self> {
        if line.kind != LineItemKind::Service {
            return Err(MarketError::Internal(
                "service order built from a non-service line".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            order_number: order_number.into(),
            buyer_id: buyer_id.into(),
            buyer_email,
            package_id: line.reference_id,
            creator_id: line.creator_id,
            title: line.title,
            currency,
            price: line.price,
            platform_fee: line.platform_fee,
            creator_payout: line.creator_payout,
            delivery_days,
            revisions,
            requirements,
            status: ServiceOrderStatus::Requested,
            is_paid: false,
            session_id: None,
            charge_id: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            payment_failed_at: None,
            refunded_at: None,
        })
    }

    pub fn apply_status(&mut self, next: ServiceOrderStatus) -> MarketResult<()> {
        self.status.ensure_transition(next)?;
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Flip `is_paid`; returns false when it was already set
    pub fn mark_paid(&mut self, charge_id: Option<&str>) -> bool {
        if self.is_paid {
            return false;
        }
        let now = Utc::now();
        self.is_paid = true;
        self.paid_at = Some(now);
        self.updated_at = now;
        if self.charge_id.is_none() {
            self.charge_id = charge_id.map(String::from);
        }
        true
    }

    /// Record a payment failure; false once paid or already recorded
    pub fn mark_payment_failed(&mut self) -> bool {
        if self.is_paid || self.payment_failed_at.is_some() {
            return false;
        }
        let now = Utc::now();
        self.payment_failed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Record a refund; false when unpaid or already refunded
    pub fn mark_refunded(&mut self) -> bool {
        if !self.is_paid || self.refunded_at.is_some() {
            return false;
        }
        let now = Utc::now();
        self.refunded_at = Some(now);
        self.updated_at = now;
        true
    }
}

/// A checkout session opened with a payment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider's session ID
    pub session_id: String,

    /// Our order or service order id
    pub reference_id: String,

    /// Provider name (e.g., "stripe")
    pub provider: String,

    /// URL to redirect customer to for payment
    pub checkout_url: String,

    /// When the session expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Payment intent ID, when the provider creates it up front
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn new(
        session_id: impl Into<String>,
        reference_id: impl Into<String>,
        provider: impl Into<String>,
        checkout_url: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            reference_id: reference_id.into(),
            provider: provider.into(),
            checkout_url: checkout_url.into(),
            expires_at: None,
            payment_intent_id: None,
            created_at: Utc::now(),
        }
    }

    /// Check if session is still open for payment
    pub fn is_active(&self) -> bool {
        self.expires_at.map(|exp| exp > Utc::now()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::OrderDraft;

    fn item(price: i64, fee: i64, creator: &str) -> OrderItem {
        OrderItem {
            kind: LineItemKind::Template,
            reference_id: format!("tpl_{}", price),
            title: "Template".into(),
            price,
            creator_id: creator.into(),
            platform_fee: fee,
            creator_payout: price - fee,
            category: String::new(),
        }
    }

    fn pending_order() -> Order {
        let draft = OrderDraft::from_lines(vec![item(4900, 1470, "cr_1"), item(1000, 300, "cr_2")]);
        Order::from_draft("TM-1-12345", "buyer_1", None, Currency::USD, draft)
    }

    #[test]
    fn test_order_number_format() {
        let number = generate_order_number("TM");
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TM");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 5);
        assert!(parts[2].parse::<u32>().unwrap() >= 10_000);
    }

    #[test]
    fn test_order_transition_table() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Expired));
        assert!(Expired.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Expired));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(Refunded.is_terminal());
    }

    #[test]
    fn test_apply_paid_stamps_charge_once() {
        let mut order = pending_order();
        order.apply_status(OrderStatus::Paid, Some("pi_1")).unwrap();
        assert!(order.is_paid());
        assert!(order.paid_at.is_some());
        assert_eq!(order.charge_id.as_deref(), Some("pi_1"));

        let err = order.apply_status(OrderStatus::Paid, Some("pi_2")).unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));
        assert_eq!(order.charge_id.as_deref(), Some("pi_1"));
    }

    #[test]
    fn test_order_creator_payouts() {
        let order = pending_order();
        assert_eq!(order.creator_ids(), vec!["cr_1", "cr_2"]);
        assert_eq!(order.payout_for("cr_1"), 3430);
        assert_eq!(order.total, 5900);
    }

    #[test]
    fn test_service_order_lifecycle() {
        use ServiceOrderStatus::*;
        assert!(Requested.can_transition_to(Accepted));
        assert!(Delivered.can_transition_to(RevisionRequested));
        assert!(!Requested.can_transition_to(Completed));
        assert!(Cancelled.is_terminal());

        let mut line = item(25000, 5000, "cr_1");
        line.kind = LineItemKind::Service;
        let mut so = ServiceOrder::requested("SO-1-10000", "b", None, Currency::USD, line, 7, 2, None)
            .unwrap();
        assert!(!so.is_paid);
        assert!(so.mark_paid(Some("pi_9")));
        assert!(!so.mark_paid(Some("pi_10")));
        assert_eq!(so.charge_id.as_deref(), Some("pi_9"));
        assert_eq!(so.status, Requested);
    }

    #[test]
    fn test_service_order_markers_apply_once() {
        let mut line = item(25000, 5000, "cr_1");
        line.kind = LineItemKind::Service;
        let mut so = ServiceOrder::requested("SO-1-10001", "b", None, Currency::USD, line, 7, 2, None)
            .unwrap();

        assert!(!so.mark_refunded());
        assert!(so.mark_payment_failed());
        assert!(!so.mark_payment_failed());

        assert!(so.mark_paid(Some("pi_1")));
        assert!(so.mark_refunded());
        assert!(!so.mark_refunded());
        assert!(so.refunded_at.is_some());
    }

    #[test]
    fn test_checkout_session_active() {
        let session = CheckoutSession::new("cs_123", "ord_456", "stripe", "https://checkout.stripe.com/...");
        assert!(session.is_active());
    }
}
