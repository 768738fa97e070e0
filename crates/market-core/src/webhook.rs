//! # Webhook Event Processor
//!
//! Entry point for verified payment-provider events. Every handler is
//! idempotent through the storage compare-and-set; the processed-event log
//! additionally short-circuits exact redeliveries by event id.
//!
//! Unresolvable targets are acknowledged: the sender retrying would not
//! make an unknown order appear. Storage failures are returned so the
//! HTTP layer answers 5xx and the sender retries.

use crate::background::Background;
use crate::collaborators::{AuditEntry, Collaborators, NotificationKind};
use crate::error::{MarketError, MarketResult};
use crate::event::{PurchaseTarget, WebhookEvent, WebhookEventType};
use crate::fulfillment::{FulfillmentOutcome, SharedFulfillment};
use crate::lifecycle::Transition;
use crate::order::{OrderStatus, ServiceOrderStatus};
use crate::store::BoxedStore;
use crate::strategy::PaymentStrategy;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

/// How an event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// State changed
    Processed,
    /// Event id already recorded; nothing dispatched
    Duplicate,
    /// Acknowledged without effect (no-op guard, unknown target or kind)
    Ignored,
}

pub struct WebhookEventProcessor {
    store: BoxedStore,
    fulfillment: SharedFulfillment,
    collaborators: Collaborators,
    background: Background,
}

impl WebhookEventProcessor {
    pub fn new(
        store: BoxedStore,
        fulfillment: SharedFulfillment,
        collaborators: Collaborators,
        background: Background,
    ) -> Self {
        Self {
            store,
            fulfillment,
            collaborators,
            background,
        }
    }

    /// Verify with the provider strategy, then process
    pub async fn handle(
        &self,
        strategy: &dyn PaymentStrategy,
        payload: &[u8],
        signature: &str,
    ) -> MarketResult<WebhookOutcome> {
        let event = strategy.verify_webhook(payload, signature).await?;
        self.process(&event).await
    }

    #[instrument(skip(self, event), fields(event_id = %event.event_id, kind = %event.event_type.label()))]
    pub async fn process(&self, event: &WebhookEvent) -> MarketResult<WebhookOutcome> {
        if self.store.webhook_event_seen(&event.event_id).await? {
            info!("Duplicate webhook delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = match &event.event_type {
            WebhookEventType::CheckoutCompleted => self.on_checkout_completed(event).await?,
            WebhookEventType::CheckoutExpired => self.on_checkout_expired(event).await?,
            WebhookEventType::PaymentFailed => self.on_payment_failed(event).await?,
            WebhookEventType::ChargeRefunded => self.on_charge_refunded(event).await?,
            WebhookEventType::DisputeCreated => self.on_dispute_created(event).await?,
            WebhookEventType::Unknown(kind) => {
                debug!(kind = %kind, "Unhandled webhook event type");
                WebhookOutcome::Ignored
            }
        };

        self.store
            .record_webhook_event(&event.event_id, event.event_type.label())
            .await?;
        info!(outcome = ?outcome, "Webhook processed");
        Ok(outcome)
    }

    async fn on_checkout_completed(&self, event: &WebhookEvent) -> MarketResult<WebhookOutcome> {
        let Some(target) = event.purchase_target() else {
            warn!("Completed session without order metadata");
            return Ok(WebhookOutcome::Ignored);
        };
        if !event.is_payment_settled() {
            info!(target = ?target, "Session completed but payment not settled yet");
            return Ok(WebhookOutcome::Ignored);
        }

        let charge = event.charge_id.as_deref();
        let result = match &target {
            PurchaseTarget::Template(id) => self.fulfillment.fulfill_template_order(id, charge).await,
            PurchaseTarget::Service(id) => self.fulfillment.fulfill_service_order(id, charge).await,
        };

        match result {
            Ok(FulfillmentOutcome::Fulfilled) => Ok(WebhookOutcome::Processed),
            Ok(FulfillmentOutcome::AlreadyFulfilled) => Ok(WebhookOutcome::Ignored),
            Err(MarketError::NotFound { entity, id }) => {
                warn!(entity, id = %id, "Completed session for unknown order");
                Ok(WebhookOutcome::Ignored)
            }
            Err(e @ MarketError::InvalidTransition { .. }) => {
                warn!(target = ?target, error = %e, "Payment arrived for an order that cannot be fulfilled");
                Ok(WebhookOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    async fn on_checkout_expired(&self, event: &WebhookEvent) -> MarketResult<WebhookOutcome> {
        let Some(target) = event.purchase_target() else {
            warn!("Expired session without order metadata");
            return Ok(WebhookOutcome::Ignored);
        };

        match target {
            PurchaseTarget::Template(id) => {
                let Some(Transition::Applied(order)) = self
                    .guard_not_found(
                        self.store
                            .transition_order(&id, &[OrderStatus::Pending], OrderStatus::Expired, None)
                            .await,
                    )?
                else {
                    return Ok(WebhookOutcome::Ignored);
                };
                self.notify(
                    &order.buyer_id,
                    NotificationKind::OrderExpired,
                    json!({ "orderId": order.id, "orderNumber": order.order_number }),
                );
                info!(order_number = %order.order_number, "Order expired");
            }
            PurchaseTarget::Service(id) => {
                let Some(Transition::Applied(order)) = self
                    .guard_not_found(
                        self.store
                            .transition_service_order(
                                &id,
                                &[ServiceOrderStatus::Requested],
                                ServiceOrderStatus::Cancelled,
                                true,
                            )
                            .await,
                    )?
                else {
                    return Ok(WebhookOutcome::Ignored);
                };
                self.notify(
                    &order.buyer_id,
                    NotificationKind::ServiceOrderCancelled,
                    json!({ "serviceOrderId": order.id, "orderNumber": order.order_number }),
                );
                info!(order_number = %order.order_number, "Unpaid service order cancelled");
            }
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn on_payment_failed(&self, event: &WebhookEvent) -> MarketResult<WebhookOutcome> {
        let Some(target) = event.purchase_target() else {
            warn!("Payment failure without order metadata");
            return Ok(WebhookOutcome::Ignored);
        };

        match target {
            PurchaseTarget::Template(id) => {
                let Some(Transition::Applied(order)) = self
                    .guard_not_found(
                        self.store
                            .transition_order(&id, &[OrderStatus::Pending], OrderStatus::Failed, None)
                            .await,
                    )?
                else {
                    return Ok(WebhookOutcome::Ignored);
                };
                self.notify(
                    &order.buyer_id,
                    NotificationKind::PaymentFailed,
                    json!({ "orderId": order.id, "orderNumber": order.order_number }),
                );
                info!(order_number = %order.order_number, "Order payment failed");
            }
            PurchaseTarget::Service(id) => {
                let Some(Transition::Applied(order)) =
                    self.guard_not_found(self.store.mark_service_order_payment_failed(&id).await)?
                else {
                    return Ok(WebhookOutcome::Ignored);
                };
                self.notify(
                    &order.buyer_id,
                    NotificationKind::PaymentFailed,
                    json!({ "serviceOrderId": order.id, "orderNumber": order.order_number }),
                );
                info!(order_number = %order.order_number, "Service order payment failed");
            }
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn on_charge_refunded(&self, event: &WebhookEvent) -> MarketResult<WebhookOutcome> {
        let Some(charge_id) = event.charge_id.as_deref() else {
            warn!("Refund without charge reference");
            return Ok(WebhookOutcome::Ignored);
        };

        if let Some(order) = self.store.find_order_by_charge(charge_id).await? {
            let order = match self
                .store
                .transition_order(&order.id, &[OrderStatus::Paid], OrderStatus::Refunded, None)
                .await?
            {
                Transition::Applied(order) => order,
                Transition::Skipped(order) => {
                    debug!(order_number = %order.order_number, status = %order.status, "Refund already applied");
                    return Ok(WebhookOutcome::Ignored);
                }
            };

            let deactivated = self.store.deactivate_licenses_for_order(&order.id).await?;
            self.audit(
                "order.refunded",
                "order",
                &order.id,
                json!({ "chargeId": charge_id, "licensesDeactivated": deactivated }),
            )
            .await;
            self.notify(
                &order.buyer_id,
                NotificationKind::OrderRefunded,
                json!({ "orderId": order.id, "orderNumber": order.order_number, "total": order.total }),
            );
            info!(order_number = %order.order_number, deactivated, "Order refunded");
            return Ok(WebhookOutcome::Processed);
        }

        if let Some(order) = self.store.find_service_order_by_charge(charge_id).await? {
            let order = match self.store.mark_service_order_refunded(&order.id).await? {
                Transition::Applied(order) => order,
                Transition::Skipped(order) => {
                    debug!(order_number = %order.order_number, "Service refund already applied");
                    return Ok(WebhookOutcome::Ignored);
                }
            };
            self.audit(
                "service_order.refunded",
                "service_order",
                &order.id,
                json!({ "chargeId": charge_id, "status": order.status }),
            )
            .await;
            self.notify(
                &order.buyer_id,
                NotificationKind::OrderRefunded,
                json!({ "serviceOrderId": order.id, "orderNumber": order.order_number }),
            );
            info!(order_number = %order.order_number, "Service order refunded");
            return Ok(WebhookOutcome::Processed);
        }

        warn!(charge_id, "Refund for unknown charge");
        Ok(WebhookOutcome::Ignored)
    }

    /// Recorded for manual review; status is left alone
    async fn on_dispute_created(&self, event: &WebhookEvent) -> MarketResult<WebhookOutcome> {
        let Some(charge_id) = event.charge_id.as_deref() else {
            warn!("Dispute without charge reference");
            return Ok(WebhookOutcome::Ignored);
        };

        let (target_type, target_id) = if let Some(order) = self.store.find_order_by_charge(charge_id).await? {
            ("order", order.id)
        } else if let Some(order) = self.store.find_service_order_by_charge(charge_id).await? {
            ("service_order", order.id)
        } else {
            warn!(charge_id, "Dispute for unknown charge");
            return Ok(WebhookOutcome::Ignored);
        };

        let details = match &event.dispute {
            Some(d) => json!({
                "chargeId": charge_id,
                "disputeId": d.dispute_id,
                "reason": d.reason,
                "amount": d.amount,
            }),
            None => json!({ "chargeId": charge_id }),
        };
        self.audit("payment.dispute_created", target_type, &target_id, details)
            .await;
        warn!(target_type, target_id = %target_id, "Payment disputed");
        Ok(WebhookOutcome::Processed)
    }

    /// Treat a missing order as "nothing to do"
    fn guard_not_found<T>(&self, result: MarketResult<T>) -> MarketResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(MarketError::NotFound { entity, id }) => {
                warn!(entity, id = %id, "Webhook for unknown target");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn notify(&self, user_id: &str, kind: NotificationKind, payload: Value) {
        let notifier = self.collaborators.notifier.clone();
        let user_id = user_id.to_string();
        self.background.spawn("webhook.notify", async move {
            notifier.notify(&user_id, kind, payload).await
        });
    }

    async fn audit(&self, action: &str, target_type: &str, target_id: &str, details: Value) {
        let entry = AuditEntry::new(None, action, target_type, target_id, details);
        if let Err(e) = self.collaborators.audit.append(entry).await {
            warn!(action, error = %e, "Audit append failed");
        }
    }
}
