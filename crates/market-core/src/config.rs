//! Deployment-wide pricing and ledger settings.

use crate::catalog::{Currency, FeeRate};
use crate::pricing::PricingSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSettings {
    /// Single settlement currency
    pub currency: Currency,

    /// Platform fee on template sales
    pub template_fee: FeeRate,

    /// Platform fee on service orders
    pub service_fee: FeeRate,

    /// Smallest withdrawal a creator may request, minor units
    pub min_withdrawal: i64,

    pub order_prefix: String,

    pub service_order_prefix: String,

    pub license_prefix: String,
}

impl MarketSettings {
    pub fn template_pricing(&self) -> PricingSnapshot {
        PricingSnapshot::new(self.template_fee)
    }

    pub fn service_pricing(&self) -> PricingSnapshot {
        PricingSnapshot::new(self.service_fee)
    }

    /// Builder: set fee percents
    pub fn with_fees(mut self, template_percent: f64, service_percent: f64) -> Self {
        self.template_fee = FeeRate::from_percent(template_percent);
        self.service_fee = FeeRate::from_percent(service_percent);
        self
    }

    /// Builder: set minimum withdrawal
    pub fn with_min_withdrawal(mut self, amount: i64) -> Self {
        self.min_withdrawal = amount;
        self
    }
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            currency: Currency::USD,
            template_fee: FeeRate::from_percent(30.0),
            service_fee: FeeRate::from_percent(20.0),
            min_withdrawal: 1000,
            order_prefix: "TM".to_string(),
            service_order_prefix: "SO".to_string(),
            license_prefix: "TPL".to_string(),
        }
    }
}
