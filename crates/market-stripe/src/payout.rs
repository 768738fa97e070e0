//! # Stripe Connect Payouts
//!
//! Creator payouts as Connect transfers to the creator's account.

use crate::client::{metadata_params, StripeClient};
use crate::config::StripeConfig;
use async_trait::async_trait;
use market_core::{MarketResult, PayoutGateway, TransferReceipt, TransferRequest};
use serde::Deserialize;
use tracing::{info, instrument, warn};

pub struct StripePayoutGateway {
    client: StripeClient,
}

impl StripePayoutGateway {
    pub fn new(config: StripeConfig) -> MarketResult<Self> {
        Ok(Self {
            client: StripeClient::new(config)?,
        })
    }

    /// Charge to fund the transfer from. Orders carry the payment intent,
    /// so `pi_` ids are resolved to their latest charge.
    async fn source_charge(&self, charge_id: Option<&str>) -> Option<String> {
        let id = charge_id?;
        if id.starts_with("ch_") {
            return Some(id.to_string());
        }
        if !id.starts_with("pi_") {
            return None;
        }
        match self
            .client
            .get_json::<StripePaymentIntent>(&format!("/v1/payment_intents/{}", id))
            .await
        {
            Ok(intent) => intent.latest_charge,
            Err(e) => {
                warn!(payment_intent = id, error = %e, "Could not resolve charge, transferring from balance");
                None
            }
        }
    }

    fn form_params(request: &TransferRequest, source_charge: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.as_str().to_string()),
            ("destination".to_string(), request.destination_account.clone()),
        ];

        if let Some(charge) = source_charge {
            params.push(("source_transaction".to_string(), charge.to_string()));
        }

        params.extend(metadata_params("metadata", &request.metadata));
        params
    }
}

#[async_trait]
impl PayoutGateway for StripePayoutGateway {
    #[instrument(skip(self, request), fields(destination = %request.destination_account, amount = request.amount))]
    async fn transfer(&self, request: TransferRequest) -> MarketResult<TransferReceipt> {
        request.validate()?;

        let source = self.source_charge(request.charge_id.as_deref()).await;
        let response: StripeTransferResponse = self
            .client
            .post_form(
                "/v1/transfers",
                &Self::form_params(&request, source.as_deref()),
                &request.idempotency_key(),
            )
            .await?;

        info!(transfer_id = %response.id, source = ?source, "Created Stripe transfer");

        Ok(TransferReceipt {
            transfer_id: response.id,
            amount: response.amount,
            destination_account: response.destination,
        })
    }

    fn gateway_name(&self) -> &'static str {
        "stripe_connect"
    }
}

#[derive(Debug, Deserialize)]
struct StripeTransferResponse {
    id: String,
    amount: i64,
    destination: String,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    latest_charge: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::{Currency, MarketError};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> StripePayoutGateway {
        let config = StripeConfig::new("sk_test_abc", "pk_test_abc", "whsec_test").with_api_base_url(server.uri());
        StripePayoutGateway::new(config).unwrap()
    }

    #[test]
    fn test_source_transaction_param() {
        let request = TransferRequest::new("acct_1", 3430, Currency::USD);
        assert!(!StripePayoutGateway::form_params(&request, None)
            .iter()
            .any(|(k, _)| k == "source_transaction"));
        assert!(StripePayoutGateway::form_params(&request, Some("ch_1"))
            .contains(&("source_transaction".to_string(), "ch_1".to_string())));
    }

    #[tokio::test]
    async fn test_transfer_resolves_intent_to_charge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_1",
                "object": "payment_intent",
                "latest_charge": "ch_1"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transfers"))
            .and(body_string_contains("source_transaction=ch_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tr_2",
                "amount": 3430,
                "destination": "acct_cr1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = TransferRequest::new("acct_cr1", 3430, Currency::USD).with_charge(Some("pi_1".into()));
        let receipt = gateway(&server).transfer(request).await.unwrap();
        assert_eq!(receipt.transfer_id, "tr_2");
    }

    #[tokio::test]
    async fn test_unresolved_intent_transfers_from_balance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "message": "No such payment_intent: 'pi_gone'" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transfers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tr_3",
                "amount": 3430,
                "destination": "acct_cr1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = TransferRequest::new("acct_cr1", 3430, Currency::USD).with_charge(Some("pi_gone".into()));
        gateway(&server).transfer(request).await.unwrap();

        let requests = server.received_requests().await.unwrap_or_default();
        let transfer = requests.iter().find(|r| r.url.path() == "/v1/transfers").unwrap();
        assert!(!String::from_utf8_lossy(&transfer.body).contains("source_transaction"));
    }

    #[tokio::test]
    async fn test_transfer() {
        let server = MockServer::start().await;
        let request = TransferRequest::new("acct_cr1", 3430, Currency::USD).with_metadata("orderId", "ord_1");

        Mock::given(method("POST"))
            .and(path("/v1/transfers"))
            .and(body_string_contains("destination=acct_cr1"))
            .and(body_string_contains("amount=3430"))
            .and(wiremock::matchers::header("Idempotency-Key", request.idempotency_key().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tr_1",
                "object": "transfer",
                "amount": 3430,
                "destination": "acct_cr1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = gateway(&server).transfer(request).await.unwrap();
        assert_eq!(receipt.transfer_id, "tr_1");
        assert_eq!(receipt.amount, 3430);
    }

    #[tokio::test]
    async fn test_transfer_rejected_by_stripe() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transfers"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "Insufficient funds in Stripe account." }
            })))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .transfer(TransferRequest::new("acct_cr1", 3430, Currency::USD))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::ProviderError { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_zero_amount_not_sent() {
        let server = MockServer::start().await;
        let err = gateway(&server)
            .transfer(TransferRequest::new("acct_cr1", 0, Currency::USD))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
