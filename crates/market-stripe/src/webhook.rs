//! # Stripe Webhook Handling
//!
//! Signature verification and translation of Stripe events into the
//! provider-neutral `WebhookEvent`.
//!
//! Stripe signs `"{timestamp}.{payload}"` with HMAC-SHA256 and sends the
//! result in the `Stripe-Signature` header as `t=...,v1=...`.

use chrono::{DateTime, Utc};
use market_core::{DisputeDetails, MarketError, MarketResult, WebhookEvent, WebhookEventType};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::PROVIDER;

/// Header Stripe puts the signature in
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Maximum age of a signed payload, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook events to enable in the Stripe Dashboard
pub const REQUIRED_WEBHOOK_EVENTS: &[&str] = &[
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
    "checkout.session.async_payment_failed",
    "checkout.session.expired",
    "payment_intent.payment_failed",
    "charge.refunded",
    "charge.dispute.created",
];

/// Map a Stripe event type onto the pipeline's event kinds
pub fn map_event_type(stripe_type: &str) -> WebhookEventType {
    match stripe_type {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            WebhookEventType::CheckoutCompleted
        }
        "checkout.session.expired" => WebhookEventType::CheckoutExpired,
        "payment_intent.payment_failed" | "checkout.session.async_payment_failed" => {
            WebhookEventType::PaymentFailed
        }
        "charge.refunded" => WebhookEventType::ChargeRefunded,
        "charge.dispute.created" => WebhookEventType::DisputeCreated,
        other => WebhookEventType::Unknown(other.to_string()),
    }
}

/// Check a `Stripe-Signature` header against the raw payload.
///
/// `now` is a unix timestamp; payloads signed more than
/// `SIGNATURE_TOLERANCE_SECS` away from it are refused.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str, now: i64) -> MarketResult<()> {
    let parts = parse_signature_header(header)?;

    if (now - parts.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(MarketError::WebhookVerificationFailed(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let signed_payload = format!("{}.{}", parts.timestamp, String::from_utf8_lossy(payload));
    let expected = compute_hmac_sha256(secret, &signed_payload)?;

    if !parts.signatures.iter().any(|sig| constant_time_compare(sig, &expected)) {
        return Err(MarketError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ));
    }

    Ok(())
}

/// Produce a `Stripe-Signature` header value for `payload`.
///
/// Used by local tooling and tests to send events the way Stripe does.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> MarketResult<String> {
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let signature = compute_hmac_sha256(secret, &signed_payload)?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// Parse a verified payload into a `WebhookEvent`
pub fn parse_event(payload: &[u8]) -> MarketResult<WebhookEvent> {
    let event: StripeWebhookEvent = serde_json::from_slice(payload)
        .map_err(|e| MarketError::WebhookParseError(format!("Failed to parse webhook: {}", e)))?;

    debug!(event_id = %event.id, "Verified Stripe webhook: type={}", event.event_type);

    let object = event.data.object;
    let mut parsed = WebhookEvent::new(event.id, map_event_type(&event.event_type), PROVIDER);

    if event.event_type.starts_with("checkout.session.") {
        parsed.session_id = str_field(&object, "id");
        parsed.charge_id = str_field(&object, "payment_intent");
        parsed.payment_status = str_field(&object, "payment_status");
    } else if event.event_type.starts_with("payment_intent.") {
        parsed.charge_id = str_field(&object, "id");
    } else if event.event_type == "charge.dispute.created" {
        parsed.charge_id = str_field(&object, "payment_intent").or_else(|| str_field(&object, "charge"));
        parsed.dispute = Some(DisputeDetails {
            dispute_id: str_field(&object, "id").unwrap_or_default(),
            reason: str_field(&object, "reason").unwrap_or_else(|| "unknown".to_string()),
            amount: object.get("amount").and_then(Value::as_i64).unwrap_or(0),
        });
    } else if event.event_type.starts_with("charge.") {
        // Orders store the payment intent, fall back to the charge id
        parsed.charge_id = str_field(&object, "payment_intent").or_else(|| str_field(&object, "id"));
    }

    if let Some(metadata) = object.get("metadata").and_then(Value::as_object) {
        parsed.metadata = metadata
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
    }

    parsed.timestamp = DateTime::from_timestamp(event.created, 0).unwrap_or_else(Utc::now);
    parsed.raw_data = Some(Value::Object(object));
    Ok(parsed)
}

fn str_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(String::from)
}

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Map<String, Value>,
}

// =============================================================================
// Signature helpers
// =============================================================================

#[derive(Debug)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> MarketResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        MarketError::WebhookVerificationFailed("Missing timestamp in signature".to_string())
    })?;

    if signatures.is_empty() {
        return Err(MarketError::WebhookVerificationFailed(
            "No v1 signature found".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn compute_hmac_sha256(secret: &str, message: &str) -> MarketResult<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| MarketError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::PurchaseTarget;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    #[test]
    fn test_parse_signature_header() {
        let parsed = parse_signature_header("t=1234567890,v1=abc123,v1=def456,v0=old").unwrap();
        assert_eq!(parsed.timestamp, 1234567890);
        assert_eq!(parsed.signatures, vec!["abc123", "def456"]);

        assert!(parse_signature_header("v1=abc").is_err());
        assert!(parse_signature_header("t=1").is_err());
    }

    #[test]
    fn test_signature_round_trip_and_tamper() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign_payload(SECRET, payload, 1_700_000_000).unwrap();

        assert!(verify_signature(SECRET, payload, &header, 1_700_000_010).is_ok());
        assert!(verify_signature("whsec_other", payload, &header, 1_700_000_010).is_err());
        assert!(verify_signature(SECRET, br#"{"id":"evt_2"}"#, &header, 1_700_000_010).is_err());
    }

    #[test]
    fn test_stale_signature_rejected() {
        let payload = b"{}";
        let header = sign_payload(SECRET, payload, 1_700_000_000).unwrap();
        let err = verify_signature(SECRET, payload, &header, 1_700_000_000 + 301).unwrap_err();
        assert!(matches!(err, MarketError::WebhookVerificationFailed(_)));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc123", "abc123"));
        assert!(!constant_time_compare("abc123", "abc124"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_event_type_mapping() {
        assert_eq!(map_event_type("checkout.session.completed"), WebhookEventType::CheckoutCompleted);
        assert_eq!(
            map_event_type("checkout.session.async_payment_succeeded"),
            WebhookEventType::CheckoutCompleted
        );
        assert_eq!(
            map_event_type("checkout.session.async_payment_failed"),
            WebhookEventType::PaymentFailed
        );
        assert_eq!(map_event_type("charge.dispute.created"), WebhookEventType::DisputeCreated);
        assert_eq!(
            map_event_type("invoice.paid"),
            WebhookEventType::Unknown("invoice.paid".to_string())
        );
        for name in REQUIRED_WEBHOOK_EVENTS {
            assert!(!matches!(map_event_type(name), WebhookEventType::Unknown(_)), "{name}");
        }
    }

    #[test]
    fn test_parse_checkout_completed() {
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": {
                "id": "cs_1",
                "object": "checkout.session",
                "payment_intent": "pi_1",
                "payment_status": "paid",
                "metadata": { "orderId": "ord_1", "type": "template_purchase" }
            }}
        });
        let event = parse_event(payload.to_string().as_bytes()).unwrap();

        assert_eq!(event.event_type, WebhookEventType::CheckoutCompleted);
        assert_eq!(event.session_id.as_deref(), Some("cs_1"));
        assert_eq!(event.charge_id.as_deref(), Some("pi_1"));
        assert!(event.is_payment_settled());
        assert_eq!(event.purchase_target(), Some(PurchaseTarget::Template("ord_1".into())));
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_refund_falls_back_to_charge_id() {
        let payload = json!({
            "id": "evt_2",
            "type": "charge.refunded",
            "created": 1_700_000_000,
            "data": { "object": { "id": "ch_1", "object": "charge", "payment_intent": null } }
        });
        let event = parse_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_type, WebhookEventType::ChargeRefunded);
        assert_eq!(event.charge_id.as_deref(), Some("ch_1"));
    }

    #[test]
    fn test_parse_dispute() {
        let payload = json!({
            "id": "evt_3",
            "type": "charge.dispute.created",
            "created": 1_700_000_000,
            "data": { "object": {
                "id": "dp_1",
                "object": "dispute",
                "charge": "ch_9",
                "payment_intent": "pi_9",
                "reason": "fraudulent",
                "amount": 4900
            }}
        });
        let event = parse_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.charge_id.as_deref(), Some("pi_9"));
        assert_eq!(
            event.dispute,
            Some(DisputeDetails {
                dispute_id: "dp_1".into(),
                reason: "fraudulent".into(),
                amount: 4900,
            })
        );
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_event(b"not json").unwrap_err();
        assert!(matches!(err, MarketError::WebhookParseError(_)));
    }
}
