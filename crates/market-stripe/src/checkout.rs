//! # Stripe Checkout Sessions
//!
//! Hosted checkout for template and service purchases.

use crate::client::{metadata_params, StripeClient, PROVIDER};
use crate::config::StripeConfig;
use crate::webhook;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{
    CheckoutSession, MarketError, MarketResult, PaymentStrategy, SessionRequest, WebhookEvent,
};
use serde::Deserialize;
use tracing::{debug, info, instrument};

/// Stripe Checkout Session strategy
///
/// Uses Stripe's hosted checkout page, so card data never touches the API.
pub struct StripeCheckoutStrategy {
    client: StripeClient,
}

impl StripeCheckoutStrategy {
    pub fn new(config: StripeConfig) -> MarketResult<Self> {
        Ok(Self {
            client: StripeClient::new(config)?,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> MarketResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    /// Form params for `POST /v1/checkout/sessions`.
    ///
    /// Metadata goes on both the session and its payment intent so that
    /// payment-intent and charge events can be traced back to the order.
    fn form_params(request: &SessionRequest, success_url: &str, cancel_url: &str) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            ("client_reference_id".to_string(), request.reference_id.clone()),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            params.push((
                format!("line_items[{}][price_data][currency]", i),
                request.currency.as_str().to_string(),
            ));
            params.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                item.amount.to_string(),
            ));
            params.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                item.name.clone(),
            ));
            params.push((format!("line_items[{}][quantity]", i), item.quantity.to_string()));
        }

        if let Some(ref email) = request.customer_email {
            params.push(("customer_email".to_string(), email.clone()));
        }

        params.extend(metadata_params("metadata", &request.metadata));
        params.extend(metadata_params("payment_intent_data[metadata]", &request.metadata));
        params
    }
}

#[async_trait]
impl PaymentStrategy for StripeCheckoutStrategy {
    #[instrument(skip(self, request), fields(reference_id = %request.reference_id))]
    async fn create_checkout(
        &self,
        request: &SessionRequest,
        success_url: &str,
        cancel_url: &str,
    ) -> MarketResult<CheckoutSession> {
        if request.line_items.is_empty() {
            return Err(MarketError::validation("Checkout has no items"));
        }

        let params = Self::form_params(request, success_url, cancel_url);
        debug!(items = request.line_items.len(), total = request.total(), "Creating Stripe checkout session");

        let response: StripeCheckoutSessionResponse = self
            .client
            .post_form("/v1/checkout/sessions", &params, &request.idempotency_key)
            .await?;

        info!(session_id = %response.id, "Created Stripe checkout session");

        let mut session = CheckoutSession::new(response.id, &request.reference_id, PROVIDER, response.url);
        session.expires_at = response.expires_at.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
        session.payment_intent_id = response.payment_intent;
        Ok(session)
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> MarketResult<WebhookEvent> {
        webhook::verify_signature(
            &self.client.config().webhook_secret,
            payload,
            signature,
            Utc::now().timestamp(),
        )?;
        webhook::parse_event(payload)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    url: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}
