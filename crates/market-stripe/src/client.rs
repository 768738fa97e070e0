//! Thin form-encoded client shared by checkout and payouts.

use crate::config::StripeConfig;
use market_core::{MarketError, MarketResult};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::error;

pub(crate) const PROVIDER: &str = "stripe";

pub(crate) struct StripeClient {
    config: StripeConfig,
    http: Client,
}

impl StripeClient {
    pub(crate) fn new(config: StripeConfig) -> MarketResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MarketError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub(crate) fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// POST form params to `path`, parsing either the success body or
    /// Stripe's error envelope.
    pub(crate) async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
        idempotency_key: &str,
    ) -> MarketResult<T> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let request = self
            .http
            .post(&url)
            .header("Idempotency-Key", idempotency_key)
            .form(params);
        self.send(request, path).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> MarketResult<T> {
        let url = format!("{}{}", self.config.api_base_url, path);
        self.send(self.http.get(&url), path).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str) -> MarketResult<T> {
        let response = request
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .send()
            .await
            .map_err(|e| MarketError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MarketError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            error!(%status, path, "Stripe API error: {}", body);

            let message = match serde_json::from_str::<StripeErrorResponse>(&body) {
                Ok(parsed) => parsed.error.message,
                Err(_) => format!("HTTP {}: {}", status, body),
            };
            return Err(MarketError::ProviderError {
                provider: PROVIDER.to_string(),
                message,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| MarketError::Serialization(format!("Failed to parse Stripe response: {}", e)))
    }
}

/// Flatten a string map into `prefix[key]=value` form params, sorted by key
pub(crate) fn metadata_params(prefix: &str, metadata: &std::collections::HashMap<String, String>) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = metadata
        .iter()
        .map(|(k, v)| (format!("{}[{}]", prefix, k), v.clone()))
        .collect();
    params.sort();
    params
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
}
