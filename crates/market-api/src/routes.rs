//! # Routes
//!
//! Axum router configuration for the marketplace API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Checkout:
///   - POST /checkout/template - Buy templates
///   - POST /checkout/service - Commission a service package
///   - GET  /checkout/success, /checkout/cancel - Landing pages
///
/// - Webhooks:
///   - POST /webhooks/payment - Signature-verified provider events
///
/// - Withdrawals (creator):
///   - GET  /withdrawals/balance
///   - GET  /withdrawals
///   - POST /withdrawals/request
///
/// - Withdrawals (admin):
///   - POST /withdrawals/admin/{id}/approve | reject | processing | complete
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let checkout_routes = Router::new()
        .route("/template", post(handlers::create_template_checkout))
        .route("/service", post(handlers::create_service_checkout))
        .route("/success", get(handlers::checkout_success))
        .route("/cancel", get(handlers::checkout_cancel));

    // Raw body: the signature covers the exact bytes
    let webhook_routes = Router::new().route("/payment", post(handlers::payment_webhook));

    let withdrawal_routes = Router::new()
        .route("/", get(handlers::list_withdrawals))
        .route("/balance", get(handlers::withdrawal_balance))
        .route("/request", post(handlers::request_withdrawal))
        .route("/admin/{id}/approve", post(handlers::approve_withdrawal))
        .route("/admin/{id}/reject", post(handlers::reject_withdrawal))
        .route("/admin/{id}/processing", post(handlers::mark_withdrawal_processing))
        .route("/admin/{id}/complete", post(handlers::complete_withdrawal));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/checkout", checkout_routes)
        .nest("/webhooks", webhook_routes)
        .nest("/withdrawals", withdrawal_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppConfig, Providers};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use market_core::{CatalogItem, CatalogSeed, Creator, ServicePackage, SimulatedPayoutGateway};
    use market_stripe::{webhook::sign_payload, StripeCheckoutStrategy, StripeConfig};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const WEBHOOK_SECRET: &str = "whsec_routes";

    fn seed() -> CatalogSeed {
        CatalogSeed {
            creators: vec![Creator::new("cr_1", "Ava").with_payout_account("acct_cr1")],
            items: vec![CatalogItem::new("tpl_1", "Notion Planner", "cr_1", 4900)],
            packages: vec![ServicePackage::new("pkg_1", "Custom Dashboard", "cr_1", 25000, 7)],
            coupons: vec![],
        }
    }

    fn simulated() -> AppState {
        AppState::build(AppConfig::default(), &seed(), None)
    }

    fn with_stripe() -> AppState {
        let config = StripeConfig::new("sk_test_routes", "pk_test_routes", WEBHOOK_SECRET)
            .with_api_base_url("http://127.0.0.1:9");
        let providers = Providers {
            strategy: Arc::new(StripeCheckoutStrategy::new(config).unwrap()),
            payouts: Arc::new(SimulatedPayoutGateway::new()),
        };
        AppState::build(AppConfig::default(), &seed(), Some(providers))
    }

    fn request(method: &str, uri: &str, user: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = user {
            builder = builder
                .header("x-user-id", id)
                .header("x-user-email", format!("{}@example.com", id))
                .header("x-user-role", role);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&simulated(), request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "simulate");
    }

    #[tokio::test]
    async fn test_checkout_requires_identity() {
        let req = request(
            "POST",
            "/checkout/template",
            None,
            Some(json!({ "items": [{ "catalogItemId": "tpl_1" }] })),
        );
        let (status, body) = send(&simulated(), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
    }

    #[tokio::test]
    async fn test_simulated_template_checkout_credits_creator() {
        let state = simulated();
        let req = request(
            "POST",
            "/checkout/template",
            Some(("buyer_1", "buyer")),
            Some(json!({ "items": [{ "catalogItemId": "tpl_1" }] })),
        );
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["simulated"], true);
        assert!(body["orderNumber"].as_str().unwrap().starts_with("TM-"));
        assert!(body["sessionUrl"].as_str().unwrap().contains("simulated=true"));

        state.background.flush().await;

        let (status, balance) = send(&state, request("GET", "/withdrawals/balance", Some(("cr_1", "creator")), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(balance["totalEarnings"], 3430);
        assert_eq!(balance["available"], 3430);

        // Second purchase of the same template is refused
        let again = request(
            "POST",
            "/checkout/template",
            Some(("buyer_1", "buyer")),
            Some(json!({ "items": [{ "catalogItemId": "tpl_1" }] })),
        );
        let (status, body) = send(&state, again).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "You already own Notion Planner");
    }

    #[tokio::test]
    async fn test_service_checkout_response_shape() {
        let req = request(
            "POST",
            "/checkout/service",
            Some(("buyer_1", "buyer")),
            Some(json!({ "packageId": "pkg_1", "requirements": "Dark theme" })),
        );
        let (status, body) = send(&simulated(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["serviceOrderId"].is_string());
        assert!(body["orderNumber"].as_str().unwrap().starts_with("SO-"));

        let unknown = request(
            "POST",
            "/checkout/service",
            Some(("buyer_1", "buyer")),
            Some(json!({ "packageId": "pkg_missing" })),
        );
        let (status, _) = send(&simulated(), unknown).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_withdrawal_flow_over_http() {
        let state = simulated();
        let buy = request(
            "POST",
            "/checkout/template",
            Some(("buyer_1", "buyer")),
            Some(json!({ "items": [{ "catalogItemId": "tpl_1" }] })),
        );
        assert_eq!(send(&state, buy).await.0, StatusCode::OK);

        let below_min = request(
            "POST",
            "/withdrawals/request",
            Some(("cr_1", "creator")),
            Some(json!({ "amount": 500, "method": "bank_transfer" })),
        );
        let (status, body) = send(&state, below_min).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Minimum withdrawal is 1000 cents");

        let ok = request(
            "POST",
            "/withdrawals/request",
            Some(("cr_1", "creator")),
            Some(json!({ "amount": 2000, "method": "paypal", "details": { "email": "ava@example.com" } })),
        );
        let (status, withdrawal) = send(&state, ok).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = withdrawal["id"].as_str().unwrap().to_string();

        let dup = request(
            "POST",
            "/withdrawals/request",
            Some(("cr_1", "creator")),
            Some(json!({ "amount": 1000, "method": "paypal" })),
        );
        let (status, body) = send(&state, dup).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "You already have a pending withdrawal");

        let as_creator = request(
            "POST",
            &format!("/withdrawals/admin/{}/approve", id),
            Some(("cr_1", "creator")),
            Some(json!({})),
        );
        assert_eq!(send(&state, as_creator).await.0, StatusCode::FORBIDDEN);

        let approve = request(
            "POST",
            &format!("/withdrawals/admin/{}/approve", id),
            Some(("admin_1", "admin")),
            Some(json!({ "note": "looks good" })),
        );
        let (status, body) = send(&state, approve).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "approved");

        let reject_late = request(
            "POST",
            &format!("/withdrawals/admin/{}/reject", id),
            Some(("admin_1", "admin")),
            Some(json!({ "note": "changed my mind" })),
        );
        assert_eq!(send(&state, reject_late).await.0, StatusCode::CONFLICT);

        let complete = request(
            "POST",
            &format!("/withdrawals/admin/{}/complete", id),
            Some(("admin_1", "admin")),
            Some(json!({ "transferId": "tr_manual_1" })),
        );
        let (status, body) = send(&state, complete).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");

        let (_, balance) = send(&state, request("GET", "/withdrawals/balance", Some(("cr_1", "creator")), None)).await;
        assert_eq!(balance["totalWithdrawn"], 2000);
        assert_eq!(balance["available"], 1430);

        let (_, list) = send(&state, request("GET", "/withdrawals", Some(("cr_1", "creator")), None)).await;
        assert_eq!(list["withdrawals"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_disabled_in_simulate_mode() {
        let req = Request::builder()
            .method("POST")
            .uri("/webhooks/payment")
            .header("stripe-signature", "t=1,v1=abc")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(&simulated(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_signed_webhook_is_processed_once() {
        let state = with_stripe();
        let payload = json!({
            "id": "evt_route_1",
            "type": "checkout.session.expired",
            "created": 1_700_000_000,
            "data": { "object": { "id": "cs_1", "metadata": { "orderId": "ord_unknown" } } }
        })
        .to_string();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let signature = sign_payload(WEBHOOK_SECRET, payload.as_bytes(), now).unwrap();

        let deliver = || {
            Request::builder()
                .method("POST")
                .uri("/webhooks/payment")
                .header("stripe-signature", signature.clone())
                .body(Body::from(payload.clone()))
                .unwrap()
        };

        let (status, body) = send(&state, deliver()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
        assert_eq!(body["outcome"], "ignored");

        let (status, body) = send(&state, deliver()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "duplicate");
    }

    #[tokio::test]
    async fn test_webhook_bad_signature() {
        let state = with_stripe();
        let missing = Request::builder()
            .method("POST")
            .uri("/webhooks/payment")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(send(&state, missing).await.0, StatusCode::BAD_REQUEST);

        let forged = Request::builder()
            .method("POST")
            .uri("/webhooks/payment")
            .header("stripe-signature", "t=1,v1=deadbeef")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(&state, forged).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Webhook verification failed"));
    }

    #[tokio::test]
    async fn test_success_page() {
        let response = create_router(simulated())
            .oneshot(request("GET", "/checkout/success?order_id=ord_1&simulated=true", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&html).contains("ord_1"));
    }
}
