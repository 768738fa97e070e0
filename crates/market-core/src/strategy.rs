//! # Payment Strategy Trait
//!
//! Strategy pattern trait for the payment provider behind checkout.
//! When no strategy is configured the pipeline runs in simulate mode.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PaymentStrategy (trait)                  │
//! │  ├── create_checkout()                                      │
//! │  ├── verify_webhook()                                       │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                    ┌───────┴───────┐
//!                    │StripeCheckout │
//!                    │   Strategy    │
//!                    └───────────────┘
//! ```

use crate::catalog::Currency;
use crate::error::MarketResult;
use crate::event::{WebhookEvent, META_ORDER_ID, META_SERVICE_ORDER_ID, META_TYPE, PURCHASE_TYPE_SERVICE, PURCHASE_TYPE_TEMPLATE};
use crate::order::{CheckoutSession, Order, ServiceOrder};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One line shown on the provider's hosted checkout page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLineItem {
    pub name: String,
    /// Unit amount in minor units
    pub amount: i64,
    pub quantity: u32,
}

/// Everything a provider needs to open a checkout session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Order or service order id
    pub reference_id: String,
    pub line_items: Vec<SessionLineItem>,
    pub currency: Currency,
    pub customer_email: Option<String>,
    /// Echoed back on every webhook for this session
    pub metadata: HashMap<String, String>,
    pub idempotency_key: String,
}

impl SessionRequest {
    /// Session for a template order.
    ///
    /// With a discount the provider sees one combined line for the
    /// discounted total, so the charged amount always equals `order.total`.
    pub fn for_order(order: &Order) -> Self {
        let line_items = if order.discount > 0 {
            let titles: Vec<&str> = order.items.iter().map(|i| i.title.as_str()).collect();
            let code = order.coupon_code.as_deref().unwrap_or_default();
            vec![SessionLineItem {
                name: format!("{} (coupon {})", titles.join(", "), code),
                amount: order.total,
                quantity: 1,
            }]
        } else {
            order
                .items
                .iter()
                .map(|i| SessionLineItem {
                    name: i.title.clone(),
                    amount: i.price,
                    quantity: 1,
                })
                .collect()
        };

        let metadata = HashMap::from([
            (META_ORDER_ID.to_string(), order.id.clone()),
            (META_TYPE.to_string(), PURCHASE_TYPE_TEMPLATE.to_string()),
        ]);

        Self {
            reference_id: order.id.clone(),
            line_items,
            currency: order.currency,
            customer_email: order.buyer_email.clone(),
            metadata,
            idempotency_key: format!("checkout:{}", order.id),
        }
    }

    /// Session for a service order
    pub fn for_service_order(order: &ServiceOrder) -> Self {
        let metadata = HashMap::from([
            (META_SERVICE_ORDER_ID.to_string(), order.id.clone()),
            (META_TYPE.to_string(), PURCHASE_TYPE_SERVICE.to_string()),
        ]);

        Self {
            reference_id: order.id.clone(),
            line_items: vec![SessionLineItem {
                name: order.title.clone(),
                amount: order.price,
                quantity: 1,
            }],
            currency: order.currency,
            customer_email: order.buyer_email.clone(),
            metadata,
            idempotency_key: format!("checkout:{}", order.id),
        }
    }

    pub fn total(&self) -> i64 {
        self.line_items.iter().map(|l| l.amount * l.quantity as i64).sum()
    }
}

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentStrategy: Send + Sync {
    /// Open a hosted checkout session and return its redirect URL.
    async fn create_checkout(
        &self,
        request: &SessionRequest,
        success_url: &str,
        cancel_url: &str,
    ) -> MarketResult<CheckoutSession>;

    /// Verify a webhook signature and parse the event.
    ///
    /// Returns `WebhookVerificationFailed` for a bad signature and
    /// `WebhookParseError` for a payload that cannot be understood.
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> MarketResult<WebhookEvent>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a boxed payment strategy (dynamic dispatch)
pub type BoxedPaymentStrategy = Arc<dyn PaymentStrategy>;

/// Configuration for URLs used in checkout
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the application (e.g., "https://templates.example.com")
    pub base_url: String,
    /// Success page path (e.g., "/checkout/success")
    pub success_path: String,
    /// Cancel page path (e.g., "/checkout/cancel")
    pub cancel_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            success_path: "/checkout/success".to_string(),
            cancel_path: "/checkout/cancel".to_string(),
        }
    }

    pub fn success_url(&self) -> String {
        format!("{}{}", self.base_url, self.success_path)
    }

    pub fn cancel_url(&self) -> String {
        format!("{}{}", self.base_url, self.cancel_path)
    }

    /// Success URL with the provider's session placeholder appended
    pub fn success_url_with_session(&self) -> String {
        format!("{}?session_id={{CHECKOUT_SESSION_ID}}", self.success_url())
    }

    /// Landing URL returned when fulfillment happened in-process
    pub fn simulated_success_url(&self, order_id: &str) -> String {
        format!("{}?order_id={}&simulated=true", self.success_url(), order_id)
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}
