//! # Application State
//!
//! Shared state for the Axum application: the wired payment pipeline plus
//! configuration.

use anyhow::{anyhow, bail, Context};
use market_core::{
    Background, BoxedPaymentStrategy, BoxedPayoutGateway, BoxedStore, CatalogSeed,
    CheckoutSessionBuilder, CheckoutUrls, Collaborators, Currency, FulfillmentEngine,
    MarketSettings, MemoryStore, SimulatedPayoutGateway, WebhookEventProcessor, WithdrawalLedger,
};
use market_stripe::{StripeCheckoutStrategy, StripeConfig, StripePayoutGateway};
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for callbacks
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Fees, minimum withdrawal, identifier prefixes
    pub settings: MarketSettings,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = MarketSettings::default();
        let template_fee: f64 = env_or("TEMPLATE_FEE_PERCENT", defaults.template_fee.percent())?;
        let service_fee: f64 = env_or("SERVICE_FEE_PERCENT", defaults.service_fee.percent())?;
        for (key, value) in [("TEMPLATE_FEE_PERCENT", template_fee), ("SERVICE_FEE_PERCENT", service_fee)] {
            if !(0.0..=100.0).contains(&value) {
                bail!("{} must be between 0 and 100, got {}", key, value);
            }
        }

        let min_withdrawal: i64 = env_or("MIN_WITHDRAWAL_CENTS", defaults.min_withdrawal)?;
        if min_withdrawal <= 0 {
            bail!("MIN_WITHDRAWAL_CENTS must be positive, got {}", min_withdrawal);
        }

        let currency = match env::var("MARKET_CURRENCY") {
            Ok(code) if !code.trim().is_empty() => Currency::parse(code.trim())
                .ok_or_else(|| anyhow!("Unsupported MARKET_CURRENCY: {}", code))?,
            _ => defaults.currency,
        };

        let settings = MarketSettings {
            currency,
            order_prefix: env_or("ORDER_NUMBER_PREFIX", defaults.order_prefix.clone())?,
            service_order_prefix: env_or(
                "SERVICE_ORDER_NUMBER_PREFIX",
                defaults.service_order_prefix.clone(),
            )?,
            license_prefix: env_or("LICENSE_KEY_PREFIX", defaults.license_prefix.clone())?,
            ..defaults
        }
        .with_fees(template_fee, service_fee)
        .with_min_withdrawal(min_withdrawal);

        Ok(Self {
            host: env_or("HOST", "127.0.0.1".to_string())?,
            port: env_or("PORT", 8080)?,
            base_url: env_or("BASE_URL", "http://localhost:8080".to_string())?,
            environment: env_or("ENVIRONMENT", "development".to_string())?,
            settings,
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid socket address {}:{}", self.host, self.port))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            environment: "development".to_string(),
            settings: MarketSettings::default(),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {}={:?}: {}", key, raw, e)),
        _ => Ok(default),
    }
}

/// Payment provider pair. Absent in simulate mode.
#[derive(Clone)]
pub struct Providers {
    pub strategy: BoxedPaymentStrategy,
    pub payouts: BoxedPayoutGateway,
}

impl Providers {
    /// Stripe checkout plus Connect payouts, if `STRIPE_SECRET_KEY` is set
    pub fn stripe_from_env() -> anyhow::Result<Option<Self>> {
        let Some(config) = StripeConfig::from_env_optional().context("Invalid Stripe configuration")? else {
            return Ok(None);
        };

        if config.is_live_mode() {
            info!("Stripe configured with live keys");
        }

        Ok(Some(Self {
            strategy: Arc::new(StripeCheckoutStrategy::new(config.clone())?),
            payouts: Arc::new(StripePayoutGateway::new(config)?),
        }))
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutSessionBuilder>,
    pub webhooks: Arc<WebhookEventProcessor>,
    pub ledger: Arc<WithdrawalLedger>,
    /// Verifies webhooks; `None` in simulate mode
    pub strategy: Option<BoxedPaymentStrategy>,
    /// Outstanding fire-and-forget effects
    pub background: Background,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Build state from environment and `config/catalog.toml`
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let seed = load_catalog_seed()?;
        let providers = Providers::stripe_from_env()?;
        Ok(Self::build(config, &seed, providers))
    }

    /// Wire the pipeline around an in-memory store
    pub fn build(config: AppConfig, seed: &CatalogSeed, providers: Option<Providers>) -> Self {
        let store: BoxedStore = Arc::new(MemoryStore::from_seed(seed));
        let collaborators = Collaborators::in_memory(seed.coupons.clone());
        let background = Background::new();
        let settings = config.settings.clone();

        let (strategy, payouts) = match providers {
            Some(p) => (Some(p.strategy), p.payouts),
            None => (None, Arc::new(SimulatedPayoutGateway::new()) as BoxedPayoutGateway),
        };

        let fulfillment = Arc::new(FulfillmentEngine::new(
            store.clone(),
            payouts,
            collaborators.clone(),
            settings.clone(),
            background.clone(),
        ));

        let checkout = CheckoutSessionBuilder::new(
            store.clone(),
            strategy.clone(),
            fulfillment.clone(),
            collaborators.clone(),
            settings.clone(),
            CheckoutUrls::new(&config.base_url),
        );

        let webhooks = WebhookEventProcessor::new(
            store.clone(),
            fulfillment,
            collaborators.clone(),
            background.clone(),
        );

        let ledger = WithdrawalLedger::new(store, collaborators, settings);

        Self {
            checkout: Arc::new(checkout),
            webhooks: Arc::new(webhooks),
            ledger: Arc::new(ledger),
            strategy,
            background,
            config,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.strategy.is_none()
    }

    /// Provider name for logs and health checks
    pub fn mode(&self) -> &'static str {
        self.strategy
            .as_ref()
            .map(|s| s.provider_name())
            .unwrap_or("simulate")
    }
}

/// Load seed data from `config/catalog.toml`
pub fn load_catalog_seed() -> anyhow::Result<CatalogSeed> {
    let config_paths = [
        "config/catalog.toml",
        "../config/catalog.toml",
        "../../config/catalog.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let seed = CatalogSeed::from_toml(&content).with_context(|| format!("Failed to parse {}", path))?;
            info!(
                items = seed.items.len(),
                packages = seed.packages.len(),
                creators = seed.creators.len(),
                coupons = seed.coupons.len(),
                "Loaded catalog from {}",
                path
            );
            return Ok(seed);
        }
    }

    warn!("No catalog found, using empty catalog");
    Ok(CatalogSeed::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_from_env() {
        for key in ["HOST", "PORT", "BASE_URL", "MARKET_CURRENCY", "SERVICE_FEE_PERCENT"] {
            env::remove_var(key);
        }
        env::set_var("TEMPLATE_FEE_PERCENT", "25");
        env::set_var("MIN_WITHDRAWAL_CENTS", "500");
        env::set_var("ORDER_NUMBER_PREFIX", "MK");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.settings.template_fee.basis_points(), 2500);
        assert_eq!(config.settings.service_fee.basis_points(), 2000);
        assert_eq!(config.settings.min_withdrawal, 500);
        assert_eq!(config.settings.order_prefix, "MK");

        env::set_var("TEMPLATE_FEE_PERCENT", "140");
        assert!(AppConfig::from_env().is_err());

        env::set_var("TEMPLATE_FEE_PERCENT", "thirty");
        assert!(AppConfig::from_env().is_err());

        for key in ["TEMPLATE_FEE_PERCENT", "MIN_WITHDRAWAL_CENTS", "ORDER_NUMBER_PREFIX"] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_socket_addr() {
        let config = AppConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
            ..AppConfig::default()
        };
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:3000");

        let bad = AppConfig {
            host: "not a host".to_string(),
            ..AppConfig::default()
        };
        assert!(bad.socket_addr().is_err());
    }

    #[test]
    fn test_shipped_catalog_parses() {
        let seed = CatalogSeed::from_toml(include_str!("../../../config/catalog.toml")).unwrap();
        assert!(seed.items.iter().any(|i| i.is_purchasable()));
        assert!(!seed.coupons.is_empty());
    }

    #[test]
    fn test_build_without_provider_is_simulated() {
        let state = AppState::build(AppConfig::default(), &CatalogSeed::default(), None);
        assert!(state.is_simulated());
        assert_eq!(state.mode(), "simulate");
    }
}
