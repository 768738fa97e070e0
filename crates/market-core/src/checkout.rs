//! # Checkout Session Builder
//!
//! Validates a purchase, persists a pending order (or a requested service
//! order) and opens a provider session. Without a provider the order is
//! fulfilled in-process through the same engine the webhook path uses.

use crate::collaborators::Collaborators;
use crate::config::MarketSettings;
use crate::error::{MarketError, MarketResult};
use crate::fulfillment::SharedFulfillment;
use crate::order::{generate_order_number, Order, OrderStatus, ServiceOrder, ServiceOrderStatus};
use crate::store::BoxedStore;
use crate::strategy::{BoxedPaymentStrategy, CheckoutUrls, SessionRequest};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

/// What the buyer's client needs to continue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    /// Provider redirect, or our success page when fulfilled in-process
    pub session_url: String,
    /// Order or service order id
    pub order_id: String,
    pub order_number: String,
    /// True when no provider is configured
    pub simulated: bool,
}

pub struct CheckoutSessionBuilder {
    store: BoxedStore,
    strategy: Option<BoxedPaymentStrategy>,
    fulfillment: SharedFulfillment,
    collaborators: Collaborators,
    settings: MarketSettings,
    urls: CheckoutUrls,
}

impl CheckoutSessionBuilder {
    pub fn new(
        store: BoxedStore,
        strategy: Option<BoxedPaymentStrategy>,
        fulfillment: SharedFulfillment,
        collaborators: Collaborators,
        settings: MarketSettings,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            store,
            strategy,
            fulfillment,
            collaborators,
            settings,
            urls,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.strategy.is_none()
    }

    #[instrument(skip(self, buyer_email), fields(items = item_ids.len()))]
    pub async fn create_template_checkout(
        &self,
        buyer_id: &str,
        buyer_email: Option<&str>,
        item_ids: &[String],
        coupon_code: Option<&str>,
    ) -> MarketResult<CheckoutOutcome> {
        if item_ids.is_empty() {
            return Err(MarketError::validation("At least one item is required"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = item_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(MarketError::validation(format!("Duplicate item in cart: {}", dup)));
        }

        let mut items = Vec::with_capacity(item_ids.len());
        for id in item_ids {
            let item = self
                .store
                .get_catalog_item(id)
                .await?
                .ok_or_else(|| MarketError::not_found("Catalog item", id))?;
            if !item.is_purchasable() {
                return Err(MarketError::validation(format!(
                    "{} is not available for purchase",
                    item.title
                )));
            }
            if self.store.has_active_license(buyer_id, &item.id).await? {
                return Err(MarketError::validation(format!("You already own {}", item.title)));
            }
            items.push(item);
        }

        let mut draft = self.settings.template_pricing().draft(items.iter());
        if let Some(code) = coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            let validation = self
                .collaborators
                .coupons
                .validate(buyer_id, code, draft.subtotal, draft.primary_category())
                .await?;
            draft = draft.with_coupon(code, validation)?;
        }

        let order = Order::from_draft(
            generate_order_number(&self.settings.order_prefix),
            buyer_id,
            buyer_email.map(String::from),
            self.settings.currency,
            draft,
        );
        self.store.insert_order(order.clone()).await?;
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = order.total,
            discount = order.discount,
            "Pending order created"
        );

        let strategy = match &self.strategy {
            Some(strategy) if order.total > 0 => strategy,
            _ => {
                self.fulfillment.fulfill_template_order(&order.id, None).await?;
                return Ok(CheckoutOutcome {
                    session_url: self.urls.simulated_success_url(&order.id),
                    order_id: order.id,
                    order_number: order.order_number,
                    simulated: self.is_simulated(),
                });
            }
        };

        let request = SessionRequest::for_order(&order);
        let session = match strategy
            .create_checkout(&request, &self.urls.success_url_with_session(), &self.urls.cancel_url())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Checkout session failed");
                if let Err(mark) = self
                    .store
                    .transition_order(&order.id, &[OrderStatus::Pending], OrderStatus::Failed, None)
                    .await
                {
                    warn!(order_id = %order.id, error = %mark, "Failed to mark order failed");
                }
                return Err(e);
            }
        };
        self.store.set_order_session(&order.id, &session.session_id).await?;

        Ok(CheckoutOutcome {
            session_url: session.checkout_url,
            order_id: order.id,
            order_number: order.order_number,
            simulated: false,
        })
    }

    #[instrument(skip(self, buyer_email, requirements))]
    pub async fn create_service_checkout(
        &self,
        buyer_id: &str,
        buyer_email: Option<&str>,
        package_id: &str,
        requirements: Option<&str>,
    ) -> MarketResult<CheckoutOutcome> {
        let package = self
            .store
            .get_service_package(package_id)
            .await?
            .ok_or_else(|| MarketError::not_found("Service package", package_id))?;
        if !package.active {
            return Err(MarketError::validation(format!(
                "{} is not available for purchase",
                package.title
            )));
        }
        if package.creator_id == buyer_id {
            return Err(MarketError::validation("You cannot purchase your own service package"));
        }

        let line = self.settings.service_pricing().price_package(&package);
        let requirements = requirements
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from);
        let order = ServiceOrder::requested(
            generate_order_number(&self.settings.service_order_prefix),
            buyer_id,
            buyer_email.map(String::from),
            self.settings.currency,
            line,
            package.delivery_days,
            package.revisions,
            requirements,
        )?;
        self.store.insert_service_order(order.clone()).await?;
        info!(
            service_order_id = %order.id,
            order_number = %order.order_number,
            price = order.price,
            "Service order requested"
        );

        let Some(strategy) = &self.strategy else {
            self.fulfillment.fulfill_service_order(&order.id, None).await?;
            return Ok(CheckoutOutcome {
                session_url: self.urls.simulated_success_url(&order.id),
                order_id: order.id,
                order_number: order.order_number,
                simulated: true,
            });
        };

        let request = SessionRequest::for_service_order(&order);
        let session = match strategy
            .create_checkout(&request, &self.urls.success_url_with_session(), &self.urls.cancel_url())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(service_order_id = %order.id, error = %e, "Checkout session failed");
                if let Err(mark) = self
                    .store
                    .transition_service_order(
                        &order.id,
                        &[ServiceOrderStatus::Requested],
                        ServiceOrderStatus::Cancelled,
                        true,
                    )
                    .await
                {
                    warn!(service_order_id = %order.id, error = %mark, "Failed to cancel service order");
                }
                return Err(e);
            }
        };
        self.store
            .set_service_order_session(&order.id, &session.session_id)
            .await?;

        Ok(CheckoutOutcome {
            session_url: session.checkout_url,
            order_id: order.id,
            order_number: order.order_number,
            simulated: false,
        })
    }
}
