//! In-memory store. All tables sit behind one lock so every trait method
//! is a single atomic step.

use super::{
    CatalogRepository, LicenseRepository, OrderRepository, SaveResult, WebhookEventRepository,
    WithdrawalRepository,
};
use crate::catalog::{CatalogItem, CatalogSeed, Creator, ServicePackage};
use crate::error::{MarketError, MarketResult};
use crate::license::License;
use crate::lifecycle::Transition;
use crate::order::{Order, OrderStatus, ServiceOrder, ServiceOrderStatus};
use crate::withdrawal::{Withdrawal, WithdrawalStatus, WithdrawalUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    items: HashMap<String, CatalogItem>,
    packages: HashMap<String, ServicePackage>,
    creators: HashMap<String, Creator>,
    orders: HashMap<String, Order>,
    service_orders: HashMap<String, ServiceOrder>,
    licenses: HashMap<String, License>,
    withdrawals: HashMap<String, Withdrawal>,
    webhook_events: HashMap<String, (String, DateTime<Utc>)>,
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with catalog seed data
    pub fn from_seed(seed: &CatalogSeed) -> Self {
        let tables = Tables {
            items: seed.items.iter().map(|i| (i.id.clone(), i.clone())).collect(),
            packages: seed.packages.iter().map(|p| (p.id.clone(), p.clone())).collect(),
            creators: seed.creators.iter().map(|c| (c.id.clone(), c.clone())).collect(),
            ..Tables::default()
        };
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    pub async fn put_catalog_item(&self, item: CatalogItem) {
        self.tables.write().await.items.insert(item.id.clone(), item);
    }

    pub async fn put_service_package(&self, package: ServicePackage) {
        self.tables.write().await.packages.insert(package.id.clone(), package);
    }

    pub async fn put_creator(&self, creator: Creator) {
        self.tables.write().await.creators.insert(creator.id.clone(), creator);
    }

    pub async fn license_count(&self) -> usize {
        self.tables.read().await.licenses.len()
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn get_catalog_item(&self, item_id: &str) -> MarketResult<Option<CatalogItem>> {
        Ok(self.tables.read().await.items.get(item_id).cloned())
    }

    async fn get_service_package(&self, package_id: &str) -> MarketResult<Option<ServicePackage>> {
        Ok(self.tables.read().await.packages.get(package_id).cloned())
    }

    async fn get_creator(&self, creator_id: &str) -> MarketResult<Option<Creator>> {
        Ok(self.tables.read().await.creators.get(creator_id).cloned())
    }

    async fn increment_item_stats(&self, item_id: &str, revenue: i64) -> MarketResult<()> {
        let mut tables = self.tables.write().await;
        let item = tables
            .items
            .get_mut(item_id)
            .ok_or_else(|| MarketError::not_found("Catalog item", item_id))?;
        item.purchase_count += 1;
        item.revenue += revenue;
        Ok(())
    }

    async fn increment_package_orders(&self, package_id: &str) -> MarketResult<()> {
        let mut tables = self.tables.write().await;
        let package = tables
            .packages
            .get_mut(package_id)
            .ok_or_else(|| MarketError::not_found("Service package", package_id))?;
        package.order_count += 1;
        Ok(())
    }

    async fn increment_creator_stats(&self, creator_id: &str, sales: u64, revenue: i64) -> MarketResult<()> {
        let mut tables = self.tables.write().await;
        let creator = tables
            .creators
            .get_mut(creator_id)
            .ok_or_else(|| MarketError::not_found("Creator", creator_id))?;
        creator.total_sales += sales;
        creator.total_revenue += revenue;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: Order) -> MarketResult<()> {
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order.id) {
            return Err(MarketError::Storage(format!("duplicate order id {}", order.id)));
        }
        tables.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> MarketResult<Option<Order>> {
        Ok(self.tables.read().await.orders.get(order_id).cloned())
    }

    async fn find_order_by_charge(&self, charge_id: &str) -> MarketResult<Option<Order>> {
        Ok(self
            .tables
            .read()
            .await
            .orders
            .values()
            .find(|o| o.charge_id.as_deref() == Some(charge_id))
            .cloned())
    }

    async fn set_order_session(&self, order_id: &str, session_id: &str) -> MarketResult<()> {
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(order_id)
            .ok_or_else(|| MarketError::not_found("Order", order_id))?;
        order.session_id = Some(session_id.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_order(
        &self,
        order_id: &str,
        from: &[OrderStatus],
        to: OrderStatus,
        charge_id: Option<&str>,
    ) -> MarketResult<Transition<Order>> {
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(order_id)
            .ok_or_else(|| MarketError::not_found("Order", order_id))?;
        if !from.contains(&order.status) {
            return Ok(Transition::Skipped(order.clone()));
        }
        order.apply_status(to, charge_id)?;
        Ok(Transition::Applied(order.clone()))
    }

    async fn insert_service_order(&self, order: ServiceOrder) -> MarketResult<()> {
        let mut tables = self.tables.write().await;
        if tables.service_orders.contains_key(&order.id) {
            return Err(MarketError::Storage(format!("duplicate service order id {}", order.id)));
        }
        tables.service_orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get_service_order(&self, id: &str) -> MarketResult<Option<ServiceOrder>> {
        Ok(self.tables.read().await.service_orders.get(id).cloned())
    }

    async fn find_service_order_by_charge(&self, charge_id: &str) -> MarketResult<Option<ServiceOrder>> {
        Ok(self
            .tables
            .read()
            .await
            .service_orders
            .values()
            .find(|o| o.charge_id.as_deref() == Some(charge_id))
            .cloned())
    }

    async fn set_service_order_session(&self, id: &str, session_id: &str) -> MarketResult<()> {
        let mut tables = self.tables.write().await;
        let order = tables
            .service_orders
            .get_mut(id)
            .ok_or_else(|| MarketError::not_found("Service order", id))?;
        order.session_id = Some(session_id.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_service_order_paid(
        &self,
        id: &str,
        charge_id: Option<&str>,
    ) -> MarketResult<Transition<ServiceOrder>> {
        let mut tables = self.tables.write().await;
        let order = tables
            .service_orders
            .get_mut(id)
            .ok_or_else(|| MarketError::not_found("Service order", id))?;
        if order.mark_paid(charge_id) {
            Ok(Transition::Applied(order.clone()))
        } else {
            Ok(Transition::Skipped(order.clone()))
        }
    }

    async fn mark_service_order_payment_failed(&self, id: &str) -> MarketResult<Transition<ServiceOrder>> {
        let mut tables = self.tables.write().await;
        let order = tables
            .service_orders
            .get_mut(id)
            .ok_or_else(|| MarketError::not_found("Service order", id))?;
        if order.mark_payment_failed() {
            Ok(Transition::Applied(order.clone()))
        } else {
            Ok(Transition::Skipped(order.clone()))
        }
    }

    async fn mark_service_order_refunded(&self, id: &str) -> MarketResult<Transition<ServiceOrder>> {
        let mut tables = self.tables.write().await;
        let order = tables
            .service_orders
            .get_mut(id)
            .ok_or_else(|| MarketError::not_found("Service order", id))?;
        if order.mark_refunded() {
            Ok(Transition::Applied(order.clone()))
        } else {
            Ok(Transition::Skipped(order.clone()))
        }
    }

    async fn transition_service_order(
        &self,
        id: &str,
        from: &[ServiceOrderStatus],
        to: ServiceOrderStatus,
        unpaid_only: bool,
    ) -> MarketResult<Transition<ServiceOrder>> {
        let mut tables = self.tables.write().await;
        let order = tables
            .service_orders
            .get_mut(id)
            .ok_or_else(|| MarketError::not_found("Service order", id))?;
        if !from.contains(&order.status) || (unpaid_only && order.is_paid) {
            return Ok(Transition::Skipped(order.clone()));
        }
        order.apply_status(to)?;
        Ok(Transition::Applied(order.clone()))
    }

    async fn creator_paid_earnings(&self, creator_id: &str) -> MarketResult<i64> {
        Ok(self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Paid)
            .map(|o| o.payout_for(creator_id))
            .sum())
    }
}

#[async_trait]
impl LicenseRepository for MemoryStore {
    async fn insert_license(&self, license: License) -> MarketResult<SaveResult> {
        let mut tables = self.tables.write().await;
        let key = license.key.as_str().to_string();
        if tables.licenses.contains_key(&key) {
            return Ok(SaveResult::AlreadyExists);
        }
        tables.licenses.insert(key, license);
        Ok(SaveResult::Inserted)
    }

    async fn has_active_license(&self, buyer_id: &str, catalog_item_id: &str) -> MarketResult<bool> {
        Ok(self
            .tables
            .read()
            .await
            .licenses
            .values()
            .any(|l| l.is_active && l.buyer_id == buyer_id && l.catalog_item_id == catalog_item_id))
    }

    async fn licenses_for_order(&self, order_id: &str) -> MarketResult<Vec<License>> {
        let mut licenses: Vec<License> = self
            .tables
            .read()
            .await
            .licenses
            .values()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect();
        licenses.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(licenses)
    }

    async fn deactivate_licenses_for_order(&self, order_id: &str) -> MarketResult<usize> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .licenses
            .values_mut()
            .filter(|l| l.order_id == order_id)
            .map(|l| l.deactivate())
            .filter(|changed| *changed)
            .count())
    }
}

#[async_trait]
impl WithdrawalRepository for MemoryStore {
    async fn insert_pending_withdrawal(&self, withdrawal: Withdrawal) -> MarketResult<SaveResult> {
        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(MarketError::Internal(
                "only pending withdrawals can be inserted".to_string(),
            ));
        }
        let mut tables = self.tables.write().await;
        let has_pending = tables
            .withdrawals
            .values()
            .any(|w| w.creator_id == withdrawal.creator_id && w.status == WithdrawalStatus::Pending);
        if has_pending {
            return Ok(SaveResult::AlreadyExists);
        }
        tables.withdrawals.insert(withdrawal.id.clone(), withdrawal);
        Ok(SaveResult::Inserted)
    }

    async fn get_withdrawal(&self, id: &str) -> MarketResult<Option<Withdrawal>> {
        Ok(self.tables.read().await.withdrawals.get(id).cloned())
    }

    async fn list_withdrawals(&self, creator_id: &str) -> MarketResult<Vec<Withdrawal>> {
        let mut list: Vec<Withdrawal> = self
            .tables
            .read()
            .await
            .withdrawals
            .values()
            .filter(|w| w.creator_id == creator_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(list)
    }

    async fn transition_withdrawal(
        &self,
        id: &str,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        update: WithdrawalUpdate,
    ) -> MarketResult<Transition<Withdrawal>> {
        let mut tables = self.tables.write().await;
        let withdrawal = tables
            .withdrawals
            .get_mut(id)
            .ok_or_else(|| MarketError::not_found("Withdrawal", id))?;
        if !from.contains(&withdrawal.status) {
            return Ok(Transition::Skipped(withdrawal.clone()));
        }
        withdrawal.apply(to, &update)?;
        Ok(Transition::Applied(withdrawal.clone()))
    }

    async fn withdrawals_total(&self, creator_id: &str, statuses: &[WithdrawalStatus]) -> MarketResult<i64> {
        Ok(self
            .tables
            .read()
            .await
            .withdrawals
            .values()
            .filter(|w| w.creator_id == creator_id && statuses.contains(&w.status))
            .map(|w| w.amount)
            .sum())
    }
}

#[async_trait]
impl WebhookEventRepository for MemoryStore {
    async fn webhook_event_seen(&self, event_id: &str) -> MarketResult<bool> {
        Ok(self.tables.read().await.webhook_events.contains_key(event_id))
    }

    async fn record_webhook_event(&self, event_id: &str, event_type: &str) -> MarketResult<SaveResult> {
        let mut tables = self.tables.write().await;
        if tables.webhook_events.contains_key(event_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        tables
            .webhook_events
            .insert(event_id.to_string(), (event_type.to_string(), Utc::now()));
        Ok(SaveResult::Inserted)
    }
}
