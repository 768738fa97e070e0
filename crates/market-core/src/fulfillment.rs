//! # Fulfillment Engine
//!
//! Turns "payment succeeded" into durable effects exactly once. The guard
//! is the compare-and-set to `paid` (or `is_paid = true`) at the storage
//! layer: whichever caller wins it performs the effects, everyone else
//! gets `AlreadyFulfilled`. Simulate-mode checkout and the webhook path
//! both call into here.

use crate::background::Background;
use crate::catalog::Price;
use crate::collaborators::{AuditEntry, Collaborators, NotificationKind, OutgoingEmail};
use crate::config::MarketSettings;
use crate::error::{MarketError, MarketResult};
use crate::license::License;
use crate::lifecycle::Transition;
use crate::order::{LineItemKind, Order, OrderStatus, ServiceOrder, ServiceOrderStatus};
use crate::payout::{BoxedPayoutGateway, TransferRequest};
use crate::store::{BoxedStore, SaveResult};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of a fulfillment call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    /// This call performed the effects
    Fulfilled,
    /// An earlier call already did; nothing was touched
    AlreadyFulfilled,
}

pub struct FulfillmentEngine {
    store: BoxedStore,
    payouts: BoxedPayoutGateway,
    collaborators: Collaborators,
    settings: MarketSettings,
    background: Background,
}

impl FulfillmentEngine {
    pub fn new(
        store: BoxedStore,
        payouts: BoxedPayoutGateway,
        collaborators: Collaborators,
        settings: MarketSettings,
        background: Background,
    ) -> Self {
        Self {
            store,
            payouts,
            collaborators,
            settings,
            background,
        }
    }

    /// Mark a template order paid and run its side effects.
    ///
    /// `expired` and `failed` orders are still fulfilled: a captured
    /// payment is authoritative. A `refunded` order is refused.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn fulfill_template_order(
        &self,
        order_id: &str,
        charge_id: Option<&str>,
    ) -> MarketResult<FulfillmentOutcome> {
        let transition = self
            .store
            .transition_order(
                order_id,
                &[OrderStatus::Pending, OrderStatus::Expired, OrderStatus::Failed],
                OrderStatus::Paid,
                charge_id,
            )
            .await?;

        let order = match transition {
            Transition::Applied(order) => order,
            Transition::Skipped(order) if order.status == OrderStatus::Paid => {
                info!(order_number = %order.order_number, "Order already fulfilled");
                return Ok(FulfillmentOutcome::AlreadyFulfilled);
            }
            Transition::Skipped(order) => {
                return Err(MarketError::InvalidTransition {
                    entity: "order",
                    from: order.status.to_string(),
                    to: OrderStatus::Paid.to_string(),
                });
            }
        };

        let license_keys = self.issue_licenses(&order).await?;
        self.bump_item_stats(&order).await;
        self.trigger_payouts(&order).await;
        self.bump_creator_stats(&order).await;

        if let Some(coupon_id) = order.coupon_id.as_deref() {
            if let Err(e) = self
                .collaborators
                .coupons
                .record_usage(coupon_id, &order.buyer_id, &order.id, order.discount)
                .await
            {
                warn!(coupon_id, error = %e, "Failed to record coupon usage");
            }
        }

        self.send_order_confirmations(&order, license_keys);

        info!(
            order_number = %order.order_number,
            total = order.total,
            items = order.items.len(),
            "Template order fulfilled"
        );
        Ok(FulfillmentOutcome::Fulfilled)
    }

    /// Flip `is_paid` on a service order and notify both parties.
    /// Creator payout for services is released after delivery, not here.
    #[instrument(skip(self), fields(service_order_id = %service_order_id))]
    pub async fn fulfill_service_order(
        &self,
        service_order_id: &str,
        charge_id: Option<&str>,
    ) -> MarketResult<FulfillmentOutcome> {
        let order = match self
            .store
            .mark_service_order_paid(service_order_id, charge_id)
            .await?
        {
            Transition::Applied(order) => order,
            Transition::Skipped(order) => {
                info!(order_number = %order.order_number, "Service order already paid");
                return Ok(FulfillmentOutcome::AlreadyFulfilled);
            }
        };

        if order.status == ServiceOrderStatus::Cancelled {
            warn!(order_number = %order.order_number, "Payment captured for a cancelled service order");
            let entry = AuditEntry::new(
                None,
                "service_order.paid_after_cancel",
                "service_order",
                &order.id,
                json!({ "chargeId": order.charge_id, "price": order.price }),
            );
            if let Err(e) = self.collaborators.audit.append(entry).await {
                warn!(error = %e, "Audit append failed");
            }
        }

        if let Err(e) = self.store.increment_package_orders(&order.package_id).await {
            warn!(package_id = %order.package_id, error = %e, "Failed to bump package order count");
        }

        self.send_service_confirmations(&order);

        info!(order_number = %order.order_number, price = order.price, "Service order paid");
        Ok(FulfillmentOutcome::Fulfilled)
    }

    async fn issue_licenses(&self, order: &Order) -> MarketResult<Vec<String>> {
        let mut keys = Vec::new();
        for item in order.items.iter().filter(|i| i.kind == LineItemKind::Template) {
            let license = License::issue(
                &self.settings.license_prefix,
                &order.buyer_id,
                &item.reference_id,
                &order.id,
            );
            let key = license.key.to_string();
            match self.store.insert_license(license).await? {
                SaveResult::Inserted => keys.push(key),
                SaveResult::AlreadyExists => {
                    return Err(MarketError::Internal(format!("license key collision: {}", key)));
                }
            }
        }
        Ok(keys)
    }

    async fn bump_item_stats(&self, order: &Order) {
        for item in order.items.iter().filter(|i| i.kind == LineItemKind::Template) {
            if let Err(e) = self.store.increment_item_stats(&item.reference_id, item.price).await {
                warn!(item_id = %item.reference_id, error = %e, "Failed to bump item stats");
            }
        }
    }

    async fn bump_creator_stats(&self, order: &Order) {
        for creator_id in order.creator_ids() {
            let sales = order.items.iter().filter(|i| i.creator_id == creator_id).count() as u64;
            let earned = order.payout_for(creator_id);
            if let Err(e) = self.store.increment_creator_stats(creator_id, sales, earned).await {
                warn!(creator_id, error = %e, "Failed to bump creator stats");
            }
        }
    }

    /// One transfer per line item, on the background spawner
    async fn trigger_payouts(&self, order: &Order) {
        for item in &order.items {
            if item.creator_payout <= 0 {
                continue;
            }
            let account = match self.store.get_creator(&item.creator_id).await {
                Ok(Some(creator)) => creator.payout_account_id,
                Ok(None) => None,
                Err(e) => {
                    warn!(creator_id = %item.creator_id, error = %e, "Creator lookup failed, payout skipped");
                    continue;
                }
            };
            let Some(account) = account else {
                warn!(creator_id = %item.creator_id, "No connected payout account, payout skipped");
                continue;
            };

            let request = TransferRequest::new(account, item.creator_payout, order.currency)
                .with_charge(order.charge_id.clone())
                .with_metadata("orderId", &order.id)
                .with_metadata("catalogItemId", &item.reference_id)
                .with_metadata("creatorId", &item.creator_id);

            let gateway = self.payouts.clone();
            let audit = self.collaborators.audit.clone();
            let order_id = order.id.clone();
            self.background.spawn("payout.transfer", async move {
                match gateway.transfer(request.clone()).await {
                    Ok(receipt) => {
                        info!(
                            transfer_id = %receipt.transfer_id,
                            amount = receipt.amount,
                            gateway = gateway.gateway_name(),
                            "Payout transfer created"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        audit
                            .append(AuditEntry::new(
                                None,
                                "payout.transfer_failed",
                                "order",
                                order_id,
                                json!({
                                    "destination": request.destination_account,
                                    "amount": request.amount,
                                    "chargeId": request.charge_id,
                                    "error": e.to_string(),
                                }),
                            ))
                            .await?;
                        Err(e)
                    }
                }
            });
        }
    }

    fn send_order_confirmations(&self, order: &Order, license_keys: Vec<String>) {
        if let Some(email) = order.buyer_email.clone() {
            let mailer = self.collaborators.mailer.clone();
            let message = OutgoingEmail {
                to: email,
                template: "order_confirmation".to_string(),
                subject: format!("Your order {} is confirmed", order.order_number),
                data: json!({
                    "orderNumber": order.order_number,
                    "total": order.total,
                    "totalDisplay": Price::from_cents(order.total, order.currency).display(),
                    "currency": order.currency.as_str(),
                    "items": order.items.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(),
                    "licenseKeys": license_keys,
                }),
            };
            self.background
                .spawn("email.order_confirmation", async move { mailer.send(message).await });
        }

        let notifier = self.collaborators.notifier.clone();
        let buyer_id = order.buyer_id.clone();
        let payload = json!({ "orderId": order.id, "orderNumber": order.order_number, "total": order.total });
        self.background.spawn("notify.order_paid", async move {
            notifier.notify(&buyer_id, NotificationKind::OrderPaid, payload).await
        });

        for creator_id in order.creator_ids() {
            let notifier = self.collaborators.notifier.clone();
            let creator_id = creator_id.to_string();
            let payload = json!({
                "orderId": order.id,
                "orderNumber": order.order_number,
                "earned": order.payout_for(&creator_id),
            });
            self.background.spawn("notify.sale_made", async move {
                notifier.notify(&creator_id, NotificationKind::SaleMade, payload).await
            });
        }
    }

    fn send_service_confirmations(&self, order: &ServiceOrder) {
        let payload = json!({
            "serviceOrderId": order.id,
            "orderNumber": order.order_number,
            "title": order.title,
            "price": order.price,
        });

        let notifier = self.collaborators.notifier.clone();
        let buyer_id = order.buyer_id.clone();
        let buyer_payload = payload.clone();
        self.background.spawn("notify.service_order_paid", async move {
            notifier
                .notify(&buyer_id, NotificationKind::ServiceOrderPaid, buyer_payload)
                .await
        });

        let notifier = self.collaborators.notifier.clone();
        let creator_id = order.creator_id.clone();
        self.background.spawn("notify.service_order_received", async move {
            notifier
                .notify(&creator_id, NotificationKind::ServiceOrderReceived, payload)
                .await
        });

        if let Some(email) = order.buyer_email.clone() {
            let mailer = self.collaborators.mailer.clone();
            let message = OutgoingEmail {
                to: email,
                template: "service_order_confirmation".to_string(),
                subject: format!("Your service order {} is confirmed", order.order_number),
                data: json!({
                    "orderNumber": order.order_number,
                    "title": order.title,
                    "price": order.price,
                    "priceDisplay": Price::from_cents(order.price, order.currency).display(),
                    "deliveryDays": order.delivery_days,
                }),
            };
            self.background
                .spawn("email.service_order_confirmation", async move { mailer.send(message).await });
        }
    }
}

/// Shared handle used by checkout and the webhook processor
pub type SharedFulfillment = Arc<FulfillmentEngine>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CatalogRepository, LicenseRepository, OrderRepository};
    use crate::testing::Harness;

    #[tokio::test]
    async fn test_fulfill_issues_licenses_and_payouts_once() {
        let h = Harness::new();
        let order = h.pending_order("buyer_1", &["tpl_1"]).await;
        let engine = h.fulfillment();

        let first = engine.fulfill_template_order(&order.id, Some("pi_1")).await.unwrap();
        let second = engine.fulfill_template_order(&order.id, Some("pi_1")).await.unwrap();
        h.background.flush().await;

        assert_eq!(first, FulfillmentOutcome::Fulfilled);
        assert_eq!(second, FulfillmentOutcome::AlreadyFulfilled);
        assert_eq!(h.store.licenses_for_order(&order.id).await.unwrap().len(), 1);

        let item = h.store.get_catalog_item("tpl_1").await.unwrap().unwrap();
        assert_eq!(item.purchase_count, 1);
        assert_eq!(item.revenue, 4900);

        let attempts = h.payouts.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].amount, 3430);
        assert_eq!(attempts[0].destination_account, "acct_cr1");
        assert_eq!(attempts[0].charge_id.as_deref(), Some("pi_1"));

        let stored = h.store.get_order(&order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert!(stored.paid_at.is_some());

        assert_eq!(h.notifier.count("buyer_1", NotificationKind::OrderPaid).await, 1);
        assert_eq!(h.notifier.count("cr_1", NotificationKind::SaleMade).await, 1);
        let outbox = h.mailer.outbox().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].data["totalDisplay"], "$49.00");
    }

    #[tokio::test]
    async fn test_creator_without_account_is_skipped() {
        let h = Harness::new();
        let order = h.pending_order("buyer_1", &["tpl_1", "tpl_2"]).await;

        h.fulfillment()
            .fulfill_template_order(&order.id, None)
            .await
            .unwrap();
        h.background.flush().await;

        // cr_2 has no connected account
        assert_eq!(h.payouts.attempts().await.len(), 1);
        assert_eq!(h.store.licenses_for_order(&order.id).await.unwrap().len(), 2);
        let creator = h.store.get_creator("cr_2").await.unwrap().unwrap();
        assert_eq!(creator.total_sales, 1);
        assert_eq!(creator.total_revenue, 700);
    }

    #[tokio::test]
    async fn test_payout_failure_is_audited_not_propagated() {
        let h = Harness::new();
        h.payouts.set_failing(true);
        let order = h.pending_order("buyer_1", &["tpl_1"]).await;

        let outcome = h
            .fulfillment()
            .fulfill_template_order(&order.id, Some("ch_1"))
            .await
            .unwrap();
        h.background.flush().await;

        assert_eq!(outcome, FulfillmentOutcome::Fulfilled);
        assert_eq!(h.store.licenses_for_order(&order.id).await.unwrap().len(), 1);
        assert_eq!(
            h.audit.actions_for(&order.id).await,
            vec!["payout.transfer_failed".to_string()]
        );
    }

    #[tokio::test]
    async fn test_coupon_usage_recorded_once() {
        let h = Harness::new();
        let order = h.pending_order_with_coupon("buyer_1", &["tpl_1"], "SAVE10").await;
        let engine = h.fulfillment();

        engine.fulfill_template_order(&order.id, None).await.unwrap();
        engine.fulfill_template_order(&order.id, None).await.unwrap();

        let usages = h.coupons.usages().await;
        assert_eq!(usages.len(), 1);
        assert_eq!(usages[0].order_id, order.id);
        assert_eq!(usages[0].discount, 490);
    }

    #[tokio::test]
    async fn test_expired_order_still_fulfills() {
        let h = Harness::new();
        let order = h.pending_order("buyer_1", &["tpl_1"]).await;
        h.store
            .transition_order(&order.id, &[OrderStatus::Pending], OrderStatus::Expired, None)
            .await
            .unwrap();

        let outcome = h
            .fulfillment()
            .fulfill_template_order(&order.id, Some("pi_late"))
            .await
            .unwrap();
        assert_eq!(outcome, FulfillmentOutcome::Fulfilled);
    }

    #[tokio::test]
    async fn test_refunded_order_is_refused() {
        let h = Harness::new();
        let order = h.pending_order("buyer_1", &["tpl_1"]).await;
        let engine = h.fulfillment();
        engine.fulfill_template_order(&order.id, None).await.unwrap();
        h.store
            .transition_order(&order.id, &[OrderStatus::Paid], OrderStatus::Refunded, None)
            .await
            .unwrap();

        let err = engine.fulfill_template_order(&order.id, None).await.unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let h = Harness::new();
        let err = h
            .fulfillment()
            .fulfill_template_order("missing", None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_service_order_paid_once() {
        let h = Harness::new();
        let so = h.requested_service_order("buyer_1", "pkg_1").await;
        let engine = h.fulfillment();

        assert_eq!(
            engine.fulfill_service_order(&so.id, Some("pi_s")).await.unwrap(),
            FulfillmentOutcome::Fulfilled
        );
        assert_eq!(
            engine.fulfill_service_order(&so.id, Some("pi_s")).await.unwrap(),
            FulfillmentOutcome::AlreadyFulfilled
        );
        h.background.flush().await;

        let package = h.store.get_service_package("pkg_1").await.unwrap().unwrap();
        assert_eq!(package.order_count, 1);
        assert!(h.payouts.attempts().await.is_empty());
        assert_eq!(h.notifier.count("cr_1", NotificationKind::ServiceOrderReceived).await, 1);
    }

    #[tokio::test]
    async fn test_payment_after_cancel_is_audited() {
        let h = Harness::new();
        let so = h.requested_service_order("buyer_1", "pkg_1").await;
        h.store
            .transition_service_order(&so.id, &[ServiceOrderStatus::Requested], ServiceOrderStatus::Cancelled, true)
            .await
            .unwrap();

        let outcome = h.fulfillment().fulfill_service_order(&so.id, Some("pi_late")).await.unwrap();
        assert_eq!(outcome, FulfillmentOutcome::Fulfilled);

        let stored = h.store.get_service_order(&so.id).await.unwrap().unwrap();
        assert!(stored.is_paid);
        assert_eq!(stored.status, ServiceOrderStatus::Cancelled);
        assert_eq!(
            h.audit.actions_for(&so.id).await,
            vec!["service_order.paid_after_cancel".to_string()]
        );
    }
}
