//! # Storage
//!
//! Repository traits for everything the pipeline persists. Guards that
//! protect money and entitlements live *inside* these calls:
//!
//! - status changes are compare-and-set against the persisted status
//! - counters are increments, never read-modify-write in the caller
//! - `insert_pending_withdrawal` enforces one pending withdrawal per creator
//!
//! A SQL implementation maps these to `UPDATE ... WHERE status = ANY($n)`,
//! `SET n = n + $1` and a partial unique index
//! `ON withdrawals(creator_id) WHERE status = 'pending'`.

mod memory;

pub use memory::MemoryStore;

use crate::catalog::{CatalogItem, Creator, ServicePackage};
use crate::error::MarketResult;
use crate::license::License;
use crate::lifecycle::Transition;
use crate::order::{Order, OrderStatus, ServiceOrder, ServiceOrderStatus};
use crate::withdrawal::{Withdrawal, WithdrawalStatus, WithdrawalUpdate};
use async_trait::async_trait;
use std::sync::Arc;

/// Result of an insert guarded by a uniqueness rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Row was written
    Inserted,
    /// The uniqueness rule rejected the row
    AlreadyExists,
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn get_catalog_item(&self, item_id: &str) -> MarketResult<Option<CatalogItem>>;

    async fn get_service_package(&self, package_id: &str) -> MarketResult<Option<ServicePackage>>;

    async fn get_creator(&self, creator_id: &str) -> MarketResult<Option<Creator>>;

    /// purchase_count += 1, revenue += amount
    async fn increment_item_stats(&self, item_id: &str, revenue: i64) -> MarketResult<()>;

    /// order_count += 1
    async fn increment_package_orders(&self, package_id: &str) -> MarketResult<()>;

    /// total_sales += sales, total_revenue += revenue
    async fn increment_creator_stats(&self, creator_id: &str, sales: u64, revenue: i64) -> MarketResult<()>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: Order) -> MarketResult<()>;

    async fn get_order(&self, order_id: &str) -> MarketResult<Option<Order>>;

    async fn find_order_by_charge(&self, charge_id: &str) -> MarketResult<Option<Order>>;

    async fn set_order_session(&self, order_id: &str, session_id: &str) -> MarketResult<()>;

    /// Move the order to `to` only if its persisted status is in `from`.
    /// `NotFound` when the order does not exist.
    async fn transition_order(
        &self,
        order_id: &str,
        from: &[OrderStatus],
        to: OrderStatus,
        charge_id: Option<&str>,
    ) -> MarketResult<Transition<Order>>;

    async fn insert_service_order(&self, order: ServiceOrder) -> MarketResult<()>;

    async fn get_service_order(&self, id: &str) -> MarketResult<Option<ServiceOrder>>;

    async fn find_service_order_by_charge(&self, charge_id: &str) -> MarketResult<Option<ServiceOrder>>;

    async fn set_service_order_session(&self, id: &str, session_id: &str) -> MarketResult<()>;

    /// Set `is_paid` only if it is still false
    async fn mark_service_order_paid(
        &self,
        id: &str,
        charge_id: Option<&str>,
    ) -> MarketResult<Transition<ServiceOrder>>;

    /// Stamp `payment_failed_at` only while unpaid and not yet stamped
    async fn mark_service_order_payment_failed(&self, id: &str) -> MarketResult<Transition<ServiceOrder>>;

    /// Stamp `refunded_at` only while paid and not yet stamped
    async fn mark_service_order_refunded(&self, id: &str) -> MarketResult<Transition<ServiceOrder>>;

    /// Move the status only if it is in `from` (and, with `unpaid_only`,
    /// only while `is_paid` is false)
    async fn transition_service_order(
        &self,
        id: &str,
        from: &[ServiceOrderStatus],
        to: ServiceOrderStatus,
        unpaid_only: bool,
    ) -> MarketResult<Transition<ServiceOrder>>;

    /// Σ creator_payout over items of `paid` orders belonging to `creator_id`
    async fn creator_paid_earnings(&self, creator_id: &str) -> MarketResult<i64>;
}

#[async_trait]
pub trait LicenseRepository: Send + Sync {
    /// Unique on license key
    async fn insert_license(&self, license: License) -> MarketResult<SaveResult>;

    async fn has_active_license(&self, buyer_id: &str, catalog_item_id: &str) -> MarketResult<bool>;

    async fn licenses_for_order(&self, order_id: &str) -> MarketResult<Vec<License>>;

    /// Returns how many licenses flipped from active to inactive
    async fn deactivate_licenses_for_order(&self, order_id: &str) -> MarketResult<usize>;
}

#[async_trait]
pub trait WithdrawalRepository: Send + Sync {
    /// `AlreadyExists` when the creator already has a pending withdrawal
    async fn insert_pending_withdrawal(&self, withdrawal: Withdrawal) -> MarketResult<SaveResult>;

    async fn get_withdrawal(&self, id: &str) -> MarketResult<Option<Withdrawal>>;

    /// Newest first
    async fn list_withdrawals(&self, creator_id: &str) -> MarketResult<Vec<Withdrawal>>;

    async fn transition_withdrawal(
        &self,
        id: &str,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        update: WithdrawalUpdate,
    ) -> MarketResult<Transition<Withdrawal>>;

    /// Σ amount over the creator's withdrawals with status in `statuses`
    async fn withdrawals_total(&self, creator_id: &str, statuses: &[WithdrawalStatus]) -> MarketResult<i64>;
}

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    async fn webhook_event_seen(&self, event_id: &str) -> MarketResult<bool>;

    /// Unique on event id
    async fn record_webhook_event(&self, event_id: &str, event_type: &str) -> MarketResult<SaveResult>;
}

/// Everything the pipeline needs from storage
pub trait MarketStore:
    CatalogRepository + OrderRepository + LicenseRepository + WithdrawalRepository + WebhookEventRepository
{
}

impl<T> MarketStore for T where
    T: CatalogRepository + OrderRepository + LicenseRepository + WithdrawalRepository + WebhookEventRepository
{
}

/// Type alias for a shared store (dynamic dispatch)
pub type BoxedStore = Arc<dyn MarketStore>;
