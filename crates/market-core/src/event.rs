//! # Webhook Events
//!
//! Provider-neutral view of a verified payment-processor event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key carrying the template order id
pub const META_ORDER_ID: &str = "orderId";
/// Metadata key carrying the service order id
pub const META_SERVICE_ORDER_ID: &str = "serviceOrderId";
/// Metadata key carrying the purchase type
pub const META_TYPE: &str = "type";

pub const PURCHASE_TYPE_TEMPLATE: &str = "template_purchase";
pub const PURCHASE_TYPE_SERVICE: &str = "service_purchase";

/// Webhook event kinds the pipeline reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// Payment session completed (or delayed payment succeeded)
    CheckoutCompleted,
    /// Payment session expired unpaid
    CheckoutExpired,
    /// Payment attempt failed
    PaymentFailed,
    /// Charge (partially or fully) refunded
    ChargeRefunded,
    /// Buyer opened a dispute
    DisputeCreated,
    /// Unknown event (passthrough)
    Unknown(String),
}

impl WebhookEventType {
    pub fn label(&self) -> &str {
        match self {
            WebhookEventType::CheckoutCompleted => "checkout_completed",
            WebhookEventType::CheckoutExpired => "checkout_expired",
            WebhookEventType::PaymentFailed => "payment_failed",
            WebhookEventType::ChargeRefunded => "charge_refunded",
            WebhookEventType::DisputeCreated => "dispute_created",
            WebhookEventType::Unknown(other) => other,
        }
    }
}

/// Dispute fields carried by a `DisputeCreated` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeDetails {
    pub dispute_id: String,
    pub reason: String,
    /// Disputed amount in minor units
    pub amount: i64,
}

/// Which order an event points at, from session metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseTarget {
    Template(String),
    Service(String),
}

/// A verified, parsed webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event ID from provider
    pub event_id: String,

    pub event_type: WebhookEventType,

    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Payment reference used for refund/dispute lookups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_id: Option<String>,

    /// Provider payment status for session events ("paid", "unpaid", ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute: Option<DisputeDetails>,

    /// Raw event data (for debugging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(event_id: impl Into<String>, event_type: WebhookEventType, provider: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            event_type,
            provider: provider.into(),
            session_id: None,
            charge_id: None,
            payment_status: None,
            metadata: HashMap::new(),
            dispute: None,
            raw_data: None,
            timestamp: Utc::now(),
        }
    }

    /// Builder: add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builder: set charge reference
    pub fn with_charge(mut self, charge_id: impl Into<String>) -> Self {
        self.charge_id = Some(charge_id.into());
        self
    }

    /// Resolve the order this event refers to.
    ///
    /// The `type` key decides; without it, whichever id key is present wins.
    pub fn purchase_target(&self) -> Option<PurchaseTarget> {
        let order_id = self.metadata.get(META_ORDER_ID).filter(|s| !s.is_empty());
        let service_id = self.metadata.get(META_SERVICE_ORDER_ID).filter(|s| !s.is_empty());
        match self.metadata.get(META_TYPE).map(String::as_str) {
            Some(PURCHASE_TYPE_SERVICE) => service_id.cloned().map(PurchaseTarget::Service),
            Some(PURCHASE_TYPE_TEMPLATE) => order_id.cloned().map(PurchaseTarget::Template),
            _ => order_id
                .cloned()
                .map(PurchaseTarget::Template)
                .or_else(|| service_id.cloned().map(PurchaseTarget::Service)),
        }
    }

    /// False only when the provider explicitly says the money has not arrived
    pub fn is_payment_settled(&self) -> bool {
        !matches!(self.payment_status.as_deref(), Some("unpaid"))
    }
}
