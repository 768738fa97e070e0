//! # market-core
//!
//! Core types and engines for the template-market payment pipeline.
//!
//! This crate provides:
//! - `PricingSnapshot` and `OrderDraft` for fee splits and coupon discounts
//! - `CheckoutSessionBuilder` for pending orders and provider sessions
//! - `WebhookEventProcessor` for idempotent handling of provider events
//! - `FulfillmentEngine` for licenses, stats, payouts and confirmations
//! - `WithdrawalLedger` for derived balances and the withdrawal state machine
//! - `PaymentStrategy` and `PayoutGateway` traits for the provider seams
//! - Storage traits plus an in-memory `MemoryStore`
//! - `MarketError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use market_core::*;
//!
//! let store: BoxedStore = Arc::new(MemoryStore::from_seed(&seed));
//! let collaborators = Collaborators::in_memory(seed.coupons.clone());
//! let background = Background::new();
//! let fulfillment = Arc::new(FulfillmentEngine::new(
//!     store.clone(),
//!     Arc::new(SimulatedPayoutGateway::new()),
//!     collaborators.clone(),
//!     settings.clone(),
//!     background.clone(),
//! ));
//!
//! // No strategy configured: simulate mode fulfills immediately
//! let checkout = CheckoutSessionBuilder::new(store, None, fulfillment, collaborators, settings, urls);
//! let outcome = checkout
//!     .create_template_checkout("buyer_1", None, &["tpl_1".into()], None)
//!     .await?;
//! ```

pub mod background;
pub mod catalog;
pub mod checkout;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event;
pub mod fulfillment;
pub mod ledger;
pub mod license;
pub mod lifecycle;
pub mod order;
pub mod payout;
pub mod pricing;
pub mod store;
pub mod strategy;
pub mod webhook;
pub mod withdrawal;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use background::Background;
pub use catalog::{CatalogItem, CatalogSeed, Creator, Currency, FeeRate, ItemStatus, Price, ServicePackage};
pub use checkout::{CheckoutOutcome, CheckoutSessionBuilder};
pub use collaborators::{
    AuditEntry, AuditLog, Collaborators, Coupon, CouponKind, CouponService, CouponValidation,
    Mailer, MemoryAuditLog, MemoryCouponService, MemoryMailer, MemoryNotifier, NotificationKind,
    Notifier, OutgoingEmail,
};
pub use config::MarketSettings;
pub use error::{MarketError, MarketResult};
pub use event::{DisputeDetails, PurchaseTarget, WebhookEvent, WebhookEventType};
pub use fulfillment::{FulfillmentEngine, FulfillmentOutcome, SharedFulfillment};
pub use ledger::WithdrawalLedger;
pub use license::{License, LicenseKey};
pub use lifecycle::{Lifecycle, Transition};
pub use order::{
    CheckoutSession, LineItemKind, Order, OrderItem, OrderStatus, ServiceOrder, ServiceOrderStatus,
};
pub use payout::{BoxedPayoutGateway, PayoutGateway, SimulatedPayoutGateway, TransferReceipt, TransferRequest};
pub use pricing::{AppliedCoupon, OrderDraft, PricingSnapshot};
pub use store::{BoxedStore, MarketStore, MemoryStore, SaveResult};
pub use strategy::{BoxedPaymentStrategy, CheckoutUrls, PaymentStrategy, SessionLineItem, SessionRequest};
pub use webhook::{WebhookEventProcessor, WebhookOutcome};
pub use withdrawal::{BalanceSummary, PayoutMethod, Withdrawal, WithdrawalStatus, WithdrawalUpdate};
