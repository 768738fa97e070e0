//! # Request Handlers
//!
//! Axum request handlers for checkout, webhooks and withdrawals.

use crate::auth::{AdminUser, CurrentUser};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use market_core::{
    BalanceSummary, CheckoutOutcome, MarketError, PayoutMethod, Withdrawal, WebhookOutcome,
};
use market_stripe::SIGNATURE_HEADER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateCheckoutRequest {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub catalog_item_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCheckoutRequest {
    pub package_id: String,
    #[serde(default)]
    pub requirements: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCheckoutResponse {
    pub session_url: String,
    pub service_order_id: String,
    pub order_number: String,
    pub simulated: bool,
}

impl From<CheckoutOutcome> for ServiceCheckoutResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        Self {
            session_url: outcome.session_url,
            service_order_id: outcome.order_id,
            order_number: outcome.order_number,
            simulated: outcome.simulated,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequestBody {
    /// Minor units
    pub amount: i64,
    pub method: PayoutMethod,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct WithdrawalList {
    pub withdrawals: Vec<Withdrawal>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveBody {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteBody {
    #[serde(default)]
    pub transfer_id: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// The single mapping from `MarketError` to an HTTP error body
pub fn market_error_to_response(err: MarketError) -> ApiError {
    let code = err.status_code();
    let mut response = ErrorResponse::new(err.to_string(), code);
    match &err {
        MarketError::ProviderError { provider, .. } => {
            response = response.with_details(format!("provider={}", provider));
        }
        MarketError::InvalidTransition { from, to, .. } => {
            response = response.with_details(format!("{} -> {}", from, to));
        }
        _ => {}
    }
    if code >= 500 {
        error!(code, "{}", err);
    }
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "template-market",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": state.mode(),
    }))
}

#[instrument(skip(state, user, request), fields(buyer = %user.id, items = request.items.len()))]
pub async fn create_template_checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<TemplateCheckoutRequest>,
) -> Result<Json<CheckoutOutcome>, ApiError> {
    let item_ids: Vec<String> = request.items.into_iter().map(|i| i.catalog_item_id).collect();
    let coupon = non_empty(request.coupon_code);

    let outcome = state
        .checkout
        .create_template_checkout(&user.id, user.email.as_deref(), &item_ids, coupon.as_deref())
        .await
        .map_err(market_error_to_response)?;

    info!(order_id = %outcome.order_id, simulated = outcome.simulated, "Template checkout created");
    Ok(Json(outcome))
}

#[instrument(skip(state, user, request), fields(buyer = %user.id, package_id = %request.package_id))]
pub async fn create_service_checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ServiceCheckoutRequest>,
) -> Result<Json<ServiceCheckoutResponse>, ApiError> {
    let outcome = state
        .checkout
        .create_service_checkout(
            &user.id,
            user.email.as_deref(),
            &request.package_id,
            request.requirements.as_deref(),
        )
        .await
        .map_err(market_error_to_response)?;

    info!(service_order_id = %outcome.order_id, simulated = outcome.simulated, "Service checkout created");
    Ok(Json(outcome.into()))
}

/// Payment provider webhook. Unauthenticated; the signature is the credential.
#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let strategy = state.strategy.as_ref().ok_or_else(|| {
        warn!("Webhook received in simulate mode");
        market_error_to_response(MarketError::WebhookVerificationFailed(
            "No payment provider configured".to_string(),
        ))
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            market_error_to_response(MarketError::WebhookVerificationFailed(format!(
                "Missing {} header",
                SIGNATURE_HEADER
            )))
        })?;

    let outcome = state
        .webhooks
        .handle(strategy.as_ref(), &body, signature)
        .await
        .map_err(|e| {
            match &e {
                MarketError::WebhookVerificationFailed(_) | MarketError::WebhookParseError(_) => {
                    warn!("Rejected webhook: {}", e)
                }
                _ => error!(retryable = e.is_retryable(), "Webhook processing failed: {}", e),
            }
            market_error_to_response(e)
        })?;

    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

pub async fn withdrawal_balance(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<BalanceSummary>, ApiError> {
    let balance = state.ledger.balance(&user.id).await.map_err(market_error_to_response)?;
    Ok(Json(balance))
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<WithdrawalList>, ApiError> {
    let withdrawals = state
        .ledger
        .list_withdrawals(&user.id)
        .await
        .map_err(market_error_to_response)?;
    Ok(Json(WithdrawalList { withdrawals }))
}

#[instrument(skip(state, user, request), fields(creator = %user.id, amount = request.amount))]
pub async fn request_withdrawal(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<WithdrawalRequestBody>,
) -> Result<(StatusCode, Json<Withdrawal>), ApiError> {
    let withdrawal = state
        .ledger
        .request_withdrawal(&user.id, request.amount, request.method, request.details)
        .await
        .map_err(market_error_to_response)?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

pub async fn approve_withdrawal(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    body: Option<Json<ApproveBody>>,
) -> Result<Json<Withdrawal>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let withdrawal = state
        .ledger
        .approve_withdrawal(&id, &admin.id, non_empty(body.note))
        .await
        .map_err(market_error_to_response)?;
    Ok(Json(withdrawal))
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Result<Json<Withdrawal>, ApiError> {
    let withdrawal = state
        .ledger
        .reject_withdrawal(&id, &admin.id, &body.note)
        .await
        .map_err(market_error_to_response)?;
    Ok(Json(withdrawal))
}

pub async fn mark_withdrawal_processing(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Withdrawal>, ApiError> {
    let withdrawal = state
        .ledger
        .mark_processing(&id, &admin.id)
        .await
        .map_err(market_error_to_response)?;
    Ok(Json(withdrawal))
}

pub async fn complete_withdrawal(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    body: Option<Json<CompleteBody>>,
) -> Result<Json<Withdrawal>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let withdrawal = state
        .ledger
        .complete_withdrawal(&id, &admin.id, non_empty(body.transfer_id))
        .await
        .map_err(market_error_to_response)?;
    Ok(Json(withdrawal))
}

/// Keep only characters that can appear in provider and order ids
fn display_id(raw: Option<&String>) -> String {
    raw.map(|s| {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .take(128)
            .collect::<String>()
    })
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| "unknown".to_string())
}

/// Checkout success page
pub async fn checkout_success(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let (label, reference) = match params.get("order_id") {
        Some(order_id) => ("Order", display_id(Some(order_id))),
        None => ("Session", display_id(params.get("session_id"))),
    };
    Html(format!(r#"
<!DOCTYPE html>
<html>
<head><title>Payment Successful</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #f4f1ea;">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <h1>Thanks for your purchase!</h1>
        <p>{}: <code>{}</code></p>
        <p style="color: #666;">Your licenses will appear in your library shortly.</p>
    </div>
</body>
</html>
"#, label, reference))
}

/// Checkout cancel page
pub async fn checkout_cancel() -> impl IntoResponse {
    Html(r#"
<!DOCTYPE html>
<html>
<head><title>Payment Cancelled</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #f4f1ea;">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <h1>Checkout Cancelled</h1>
        <p style="color: #666;">No charges were made. Your cart is still waiting.</p>
    </div>
</body>
</html>
"#)
}
