//! Shared fixtures for the engine tests.

use crate::background::Background;
use crate::catalog::{CatalogItem, CatalogSeed, Creator, ItemStatus, ServicePackage};
use crate::checkout::CheckoutSessionBuilder;
use crate::collaborators::{
    Collaborators, Coupon, CouponKind, CouponService, MemoryAuditLog, MemoryCouponService,
    MemoryMailer, MemoryNotifier,
};
use crate::config::MarketSettings;
use crate::error::{MarketError, MarketResult};
use crate::event::WebhookEvent;
use crate::fulfillment::FulfillmentEngine;
use crate::ledger::WithdrawalLedger;
use crate::order::{generate_order_number, CheckoutSession, Order, ServiceOrder};
use crate::payout::SimulatedPayoutGateway;
use crate::store::{BoxedStore, CatalogRepository, MemoryStore, OrderRepository};
use crate::strategy::{BoxedPaymentStrategy, CheckoutUrls, PaymentStrategy, SessionRequest};
use crate::webhook::WebhookEventProcessor;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub(crate) struct Harness {
    pub store: MemoryStore,
    pub notifier: MemoryNotifier,
    pub mailer: MemoryMailer,
    pub audit: MemoryAuditLog,
    pub coupons: MemoryCouponService,
    pub payouts: SimulatedPayoutGateway,
    pub background: Background,
    pub settings: MarketSettings,
}

impl Harness {
    /// cr_1 has a connected account, cr_2 does not
    pub fn new() -> Self {
        let seed = CatalogSeed {
            creators: vec![
                Creator::new("cr_1", "Ada").with_payout_account("acct_cr1"),
                Creator::new("cr_2", "Grace"),
            ],
            items: vec![
                CatalogItem::new("tpl_1", "Notion Planner", "cr_1", 4900).with_category("productivity"),
                CatalogItem::new("tpl_2", "Budget Sheet", "cr_2", 1000).with_category("finance"),
                CatalogItem::new("tpl_draft", "Unreleased", "cr_1", 2000).with_status(ItemStatus::Draft),
            ],
            packages: vec![ServicePackage::new("pkg_1", "Custom Dashboard", "cr_1", 25000, 7).with_revisions(2)],
            coupons: vec![],
        };
        let coupon = Coupon {
            id: "cpn_save10".into(),
            code: "SAVE10".into(),
            kind: CouponKind::Percent,
            value: 10,
            min_subtotal: 0,
            category: String::new(),
            max_uses: None,
            once_per_buyer: true,
            active: true,
        };

        Self {
            store: MemoryStore::from_seed(&seed),
            notifier: MemoryNotifier::new(),
            mailer: MemoryMailer::new(),
            audit: MemoryAuditLog::new(),
            coupons: MemoryCouponService::new([coupon]),
            payouts: SimulatedPayoutGateway::new(),
            background: Background::new(),
            settings: MarketSettings::default(),
        }
    }

    pub fn boxed_store(&self) -> BoxedStore {
        Arc::new(self.store.clone())
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            Arc::new(self.notifier.clone()),
            Arc::new(self.mailer.clone()),
            Arc::new(self.audit.clone()),
            Arc::new(self.coupons.clone()),
        )
    }

    pub fn fulfillment(&self) -> Arc<FulfillmentEngine> {
        Arc::new(FulfillmentEngine::new(
            self.boxed_store(),
            Arc::new(self.payouts.clone()),
            self.collaborators(),
            self.settings.clone(),
            self.background.clone(),
        ))
    }

    pub fn checkout(&self, strategy: Option<BoxedPaymentStrategy>) -> CheckoutSessionBuilder {
        CheckoutSessionBuilder::new(
            self.boxed_store(),
            strategy,
            self.fulfillment(),
            self.collaborators(),
            self.settings.clone(),
            CheckoutUrls::new("https://market.test"),
        )
    }

    pub fn webhooks(&self) -> WebhookEventProcessor {
        WebhookEventProcessor::new(
            self.boxed_store(),
            self.fulfillment(),
            self.collaborators(),
            self.background.clone(),
        )
    }

    pub fn ledger(&self) -> WithdrawalLedger {
        WithdrawalLedger::new(self.boxed_store(), self.collaborators(), self.settings.clone())
    }

    /// Insert a pending order directly, bypassing checkout
    pub async fn pending_order(&self, buyer_id: &str, item_ids: &[&str]) -> Order {
        let mut items = Vec::new();
        for id in item_ids {
            items.push(self.store.get_catalog_item(id).await.unwrap().unwrap());
        }
        let draft = self.settings.template_pricing().draft(items.iter());
        let order = Order::from_draft(
            generate_order_number("TM"),
            buyer_id,
            Some(format!("{}@buyers.test", buyer_id)),
            self.settings.currency,
            draft,
        );
        self.store.insert_order(order.clone()).await.unwrap();
        order
    }

    pub async fn pending_order_with_coupon(&self, buyer_id: &str, item_ids: &[&str], code: &str) -> Order {
        let mut items = Vec::new();
        for id in item_ids {
            items.push(self.store.get_catalog_item(id).await.unwrap().unwrap());
        }
        let draft = self.settings.template_pricing().draft(items.iter());
        let validation = self
            .coupons
            .validate(buyer_id, code, draft.subtotal, draft.primary_category())
            .await
            .unwrap();
        let draft = draft.with_coupon(code, validation).unwrap();
        let order = Order::from_draft(generate_order_number("TM"), buyer_id, None, self.settings.currency, draft);
        self.store.insert_order(order.clone()).await.unwrap();
        order
    }

    pub async fn requested_service_order(&self, buyer_id: &str, package_id: &str) -> ServiceOrder {
        let package = self.store.get_service_package(package_id).await.unwrap().unwrap();
        let line = self.settings.service_pricing().price_package(&package);
        let order = ServiceOrder::requested(
            generate_order_number("SO"),
            buyer_id,
            None,
            self.settings.currency,
            line,
            package.delivery_days,
            package.revisions,
            None,
        )
        .unwrap();
        self.store.insert_service_order(order.clone()).await.unwrap();
        order
    }
}

/// Provider double: hands out `cs_test_<n>` sessions and accepts any
/// JSON-encoded `WebhookEvent` signed with the literal "valid"
#[derive(Default)]
pub(crate) struct StubStrategy {
    pub requests: Mutex<Vec<SessionRequest>>,
    /// Record the request, then fail session creation
    pub unavailable: bool,
}

impl StubStrategy {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl PaymentStrategy for StubStrategy {
    async fn create_checkout(
        &self,
        request: &SessionRequest,
        _success_url: &str,
        _cancel_url: &str,
    ) -> MarketResult<CheckoutSession> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        if self.unavailable {
            return Err(MarketError::ProviderError {
                provider: "stub".into(),
                message: "service unavailable".into(),
            });
        }
        let session_id = format!("cs_test_{}", requests.len());
        let url = format!("https://pay.test/{}", session_id);
        Ok(CheckoutSession::new(session_id, &request.reference_id, "stub", url))
    }

    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> MarketResult<WebhookEvent> {
        if signature != "valid" {
            return Err(MarketError::WebhookVerificationFailed("Signature mismatch".into()));
        }
        serde_json::from_slice(payload).map_err(|e| MarketError::WebhookParseError(e.to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "stub"
    }
}
