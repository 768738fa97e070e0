//! # Stripe Configuration
//!
//! Configuration management for Stripe integration.
//! All secrets are loaded from environment variables.

use market_core::{MarketError, MarketResult};
use std::env;

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";
const DEFAULT_API_VERSION: &str = "2024-12-18.acacia";

/// Stripe API configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: String,

    /// Publishable key (pk_test_... or pk_live_...), handed to the frontend
    pub publishable_key: String,

    /// Webhook signing secret (whsec_...)
    pub webhook_secret: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// API version
    pub api_version: String,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `STRIPE_SECRET_KEY`
    /// - `STRIPE_PUBLISHABLE_KEY`
    /// - `STRIPE_WEBHOOK_SECRET`
    ///
    /// Optional: `STRIPE_API_BASE_URL`
    pub fn from_env() -> MarketResult<Self> {
        dotenvy::dotenv().ok();

        let secret_key = env::var("STRIPE_SECRET_KEY")
            .map_err(|_| MarketError::Configuration("STRIPE_SECRET_KEY not set".to_string()))?;

        let publishable_key = env::var("STRIPE_PUBLISHABLE_KEY")
            .map_err(|_| MarketError::Configuration("STRIPE_PUBLISHABLE_KEY not set".to_string()))?;

        let webhook_secret = env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| MarketError::Configuration("STRIPE_WEBHOOK_SECRET not set".to_string()))?;

        let mut config = Self::new(secret_key, publishable_key, webhook_secret);
        if let Ok(base) = env::var("STRIPE_API_BASE_URL") {
            config = config.with_api_base_url(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Like `from_env`, but an absent or empty `STRIPE_SECRET_KEY` means
    /// "no provider" (simulate mode) instead of an error.
    pub fn from_env_optional() -> MarketResult<Option<Self>> {
        dotenvy::dotenv().ok();

        match env::var("STRIPE_SECRET_KEY") {
            Ok(key) if !key.trim().is_empty() => Self::from_env().map(Some),
            _ => Ok(None),
        }
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        secret_key: impl Into<String>,
        publishable_key: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            secret_key: secret_key.into(),
            publishable_key: publishable_key.into(),
            webhook_secret: webhook_secret.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Check key formats
    pub fn validate(&self) -> MarketResult<()> {
        if !self.secret_key.starts_with("sk_test_") && !self.secret_key.starts_with("sk_live_") {
            return Err(MarketError::Configuration(
                "STRIPE_SECRET_KEY must start with sk_test_ or sk_live_".to_string(),
            ));
        }

        if !self.publishable_key.starts_with("pk_test_") && !self.publishable_key.starts_with("pk_live_") {
            return Err(MarketError::Configuration(
                "STRIPE_PUBLISHABLE_KEY must start with pk_test_ or pk_live_".to_string(),
            ));
        }

        if !self.webhook_secret.starts_with("whsec_") {
            return Err(MarketError::Configuration(
                "STRIPE_WEBHOOK_SECRET must start with whsec_".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if using test keys
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_")
    }

    /// Check if using live keys
    pub fn is_live_mode(&self) -> bool {
        self.secret_key.starts_with("sk_live_")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = StripeConfig::new("sk_test_abc123", "pk_test_xyz789", "whsec_secret");
        assert!(config.validate().is_ok());
        assert!(config.is_test_mode());
        assert!(!config.is_live_mode());

        let config = StripeConfig::new("sk_live_abc123", "pk_live_xyz789", "whsec_secret");
        assert!(config.validate().is_ok());
        assert!(config.is_live_mode());
    }

    #[test]
    fn test_rejects_malformed_keys() {
        let err = StripeConfig::new("pk_test_abc", "pk_test_abc", "whsec_secret").validate().unwrap_err();
        assert!(err.to_string().contains("STRIPE_SECRET_KEY"));

        let err = StripeConfig::new("sk_test_abc", "pk_test_abc", "secret").validate().unwrap_err();
        assert!(err.to_string().contains("STRIPE_WEBHOOK_SECRET"));

        let err = StripeConfig::new("sk_test_abc", "sk_test_abc", "whsec_secret").validate().unwrap_err();
        assert!(err.to_string().contains("STRIPE_PUBLISHABLE_KEY"));
    }

    #[test]
    fn test_auth_header() {
        let config = StripeConfig::new("sk_test_abc123", "pk_test_xyz789", "whsec_secret");
        assert_eq!(config.auth_header(), "Bearer sk_test_abc123");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = StripeConfig::new("sk_test_abc", "pk_test_abc", "whsec_x").with_api_base_url("http://127.0.0.1:9999/");
        assert_eq!(config.api_base_url, "http://127.0.0.1:9999");
    }

    #[test]
    fn test_missing_key_means_simulate_mode() {
        env::remove_var("STRIPE_SECRET_KEY");

        assert!(StripeConfig::from_env_optional().unwrap().is_none());
        assert!(StripeConfig::from_env().is_err());
    }
}
