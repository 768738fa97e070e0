//! # Payout Gateway
//!
//! "Move N minor units to a creator's connected account." Callers treat a
//! transfer as a background effect: a failure is logged and audit-logged,
//! never propagated into the order or license state.

use crate::catalog::Currency;
use crate::error::{MarketError, MarketResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Payment the funds come from, when known
    pub charge_id: Option<String>,
    /// Connected account id of the creator
    pub destination_account: String,
    /// Minor units, must be positive
    pub amount: i64,
    pub currency: Currency,
    pub metadata: HashMap<String, String>,
}

impl TransferRequest {
    pub fn new(destination_account: impl Into<String>, amount: i64, currency: Currency) -> Self {
        Self {
            charge_id: None,
            destination_account: destination_account.into(),
            amount,
            currency,
            metadata: HashMap::new(),
        }
    }

    /// Builder: set source charge
    pub fn with_charge(mut self, charge_id: Option<String>) -> Self {
        self.charge_id = charge_id;
        self
    }

    /// Builder: add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Stable key so a provider can dedupe a replayed transfer
    pub fn idempotency_key(&self) -> String {
        let mut parts: Vec<String> = self
            .metadata
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        parts.sort();
        format!("transfer:{}:{}:{}", self.destination_account, self.amount, parts.join("&"))
    }

    pub fn validate(&self) -> MarketResult<()> {
        if self.amount <= 0 {
            return Err(MarketError::validation("transfer amount must be positive"));
        }
        if self.destination_account.trim().is_empty() {
            return Err(MarketError::validation("transfer destination is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub amount: i64,
    pub destination_account: String,
}

#[async_trait]
pub trait PayoutGateway: Send + Sync {
    async fn transfer(&self, request: TransferRequest) -> MarketResult<TransferReceipt>;

    fn gateway_name(&self) -> &'static str;
}

/// Type alias for a shared payout gateway (dynamic dispatch)
pub type BoxedPayoutGateway = Arc<dyn PayoutGateway>;

/// Gateway used when no provider is configured: logs and records attempts
#[derive(Default, Clone)]
pub struct SimulatedPayoutGateway {
    attempts: Arc<RwLock<Vec<TransferRequest>>>,
    fail: Arc<AtomicBool>,
}

impl SimulatedPayoutGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following transfer fail (outage simulation)
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub async fn attempts(&self) -> Vec<TransferRequest> {
        self.attempts.read().await.clone()
    }
}

#[async_trait]
impl PayoutGateway for SimulatedPayoutGateway {
    async fn transfer(&self, request: TransferRequest) -> MarketResult<TransferReceipt> {
        request.validate()?;
        self.attempts.write().await.push(request.clone());

        if self.fail.load(Ordering::SeqCst) {
            return Err(MarketError::NetworkError("simulated payout outage".to_string()));
        }

        let transfer_id = format!("tr_sim_{}", Uuid::new_v4().simple());
        info!(
            transfer_id = %transfer_id,
            destination = %request.destination_account,
            amount = request.amount,
            "Simulated payout transfer"
        );
        Ok(TransferReceipt {
            transfer_id,
            amount: request.amount,
            destination_account: request.destination_account,
        })
    }

    fn gateway_name(&self) -> &'static str {
        "simulated"
    }
}
