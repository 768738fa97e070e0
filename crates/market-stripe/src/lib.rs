//! # market-stripe
//!
//! Stripe integration for template-market.
//!
//! - **StripeCheckoutStrategy**: hosted Checkout Sessions plus webhook
//!   signature verification, implementing `PaymentStrategy`
//! - **StripePayoutGateway**: Connect transfers to creator accounts,
//!   implementing `PayoutGateway`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use market_stripe::{StripeCheckoutStrategy, StripeConfig, StripePayoutGateway};
//!
//! // None when STRIPE_SECRET_KEY is unset: run in simulate mode
//! if let Some(config) = StripeConfig::from_env_optional()? {
//!     let strategy = StripeCheckoutStrategy::new(config.clone())?;
//!     let payouts = StripePayoutGateway::new(config)?;
//! }
//! ```
//!
//! Webhooks are verified against the `Stripe-Signature` header; the
//! events to enable in the dashboard are listed in
//! [`webhook::REQUIRED_WEBHOOK_EVENTS`].

pub mod checkout;
mod client;
pub mod config;
pub mod payout;
pub mod webhook;

// Re-exports
pub use checkout::StripeCheckoutStrategy;
pub use config::StripeConfig;
pub use payout::StripePayoutGateway;
pub use webhook::{REQUIRED_WEBHOOK_EVENTS, SIGNATURE_HEADER};
