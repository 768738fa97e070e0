//! # Catalog Types
//!
//! Templates, service packages and creators as seen by the payment pipeline.
//! Catalog CRUD lives elsewhere; this crate only reads entries and bumps
//! their counters. Seed data is loaded from `config/catalog.toml`.

use crate::collaborators::Coupon;
use serde::{Deserialize, Serialize};

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    JPY,
    CAD,
    AUD,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::GBP => "gbp",
            Currency::JPY => "jpy",
            Currency::CAD => "cad",
            Currency::AUD => "aud",
        }
    }

    /// Parse a currency code, case-insensitive
    pub fn parse(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "usd" => Some(Currency::USD),
            "eur" => Some(Currency::EUR),
            "gbp" => Some(Currency::GBP),
            "jpy" => Some(Currency::JPY),
            "cad" => Some(Currency::CAD),
            "aud" => Some(Currency::AUD),
            _ => None,
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, most others have 2)
    pub fn decimal_places(&self) -> u8 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Convert a decimal amount to the smallest currency unit (cents, etc.)
    pub fn to_smallest_unit(&self, amount: f64) -> i64 {
        let multiplier = 10_f64.powi(self.decimal_places() as i32);
        (amount * multiplier).round() as i64
    }

    /// Convert from smallest unit back to decimal
    pub fn from_smallest_unit(&self, amount: i64) -> f64 {
        let divisor = 10_f64.powi(self.decimal_places() as i32);
        amount as f64 / divisor
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::USD
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit (cents for USD)
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a new price from decimal amount
    pub fn new(amount: f64, currency: Currency) -> Self {
        Self {
            amount: currency.to_smallest_unit(amount),
            currency,
        }
    }

    /// Create a price from smallest unit (cents)
    pub fn from_cents(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Get the decimal amount
    pub fn as_decimal(&self) -> f64 {
        self.currency.from_smallest_unit(self.amount)
    }

    /// Format for display (e.g., "$10.00")
    pub fn display(&self) -> String {
        let symbol = match self.currency {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::JPY => "¥",
            Currency::CAD => "C$",
            Currency::AUD => "A$",
        };
        if self.currency.decimal_places() == 0 {
            format!("{}{}", symbol, self.amount)
        } else {
            format!("{}{:.2}", symbol, self.as_decimal())
        }
    }
}

/// Platform fee expressed in basis points (1% = 100 bps)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    basis_points: u32,
}

impl FeeRate {
    pub fn from_basis_points(basis_points: u32) -> Self {
        Self {
            basis_points: basis_points.min(10_000),
        }
    }

    /// `30.0` means thirty percent
    pub fn from_percent(percent: f64) -> Self {
        Self::from_basis_points((percent * 100.0).round().max(0.0) as u32)
    }

    pub fn basis_points(&self) -> u32 {
        self.basis_points
    }

    pub fn percent(&self) -> f64 {
        self.basis_points as f64 / 100.0
    }

    /// Split a price into `(platform_fee, creator_payout)`.
    ///
    /// The fee is rounded half-up to the nearest minor unit; the payout
    /// is the remainder so the two always sum to `amount`.
    pub fn split(&self, amount: i64) -> (i64, i64) {
        let amount = amount.max(0);
        let fee = (amount * self.basis_points as i64 + 5_000) / 10_000;
        (fee, amount - fee)
    }
}

/// Listing status of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Draft,
    Published,
    Unlisted,
    Suspended,
}

impl Default for ItemStatus {
    fn default() -> Self {
        ItemStatus::Published
    }
}

/// A purchasable template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,

    pub title: String,

    /// Owning creator
    pub creator_id: String,

    /// Current list price in minor units
    pub price: i64,

    /// Category slug, passed to coupon validation
    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub status: ItemStatus,

    /// Incremented atomically on fulfillment
    #[serde(default)]
    pub purchase_count: u64,

    /// Gross revenue in minor units, incremented atomically on fulfillment
    #[serde(default)]
    pub revenue: i64,
}

impl CatalogItem {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        creator_id: impl Into<String>,
        price: i64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            creator_id: creator_id.into(),
            price,
            category: String::new(),
            status: ItemStatus::Published,
            purchase_count: 0,
            revenue: 0,
        }
    }

    /// Builder: set category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Builder: set status
    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    /// Only published templates can be bought
    pub fn is_purchasable(&self) -> bool {
        self.status == ItemStatus::Published
    }
}

/// A commissioned-work package offered by a creator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePackage {
    pub id: String,

    pub title: String,

    pub creator_id: String,

    pub price: i64,

    pub delivery_days: u32,

    #[serde(default)]
    pub revisions: u32,

    #[serde(default)]
    pub category: String,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub order_count: u64,
}

fn default_true() -> bool {
    true
}

impl ServicePackage {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        creator_id: impl Into<String>,
        price: i64,
        delivery_days: u32,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            creator_id: creator_id.into(),
            price,
            delivery_days,
            revisions: 0,
            category: String::new(),
            active: true,
            order_count: 0,
        }
    }

    /// Builder: set included revisions
    pub fn with_revisions(mut self, revisions: u32) -> Self {
        self.revisions = revisions;
        self
    }
}

/// Seller profile fields the payout path needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,

    pub display_name: String,

    #[serde(default)]
    pub email: Option<String>,

    /// Connected payout account (e.g. Stripe `acct_...`)
    #[serde(default)]
    pub payout_account_id: Option<String>,

    #[serde(default)]
    pub total_sales: u64,

    #[serde(default)]
    pub total_revenue: i64,
}

impl Creator {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            email: None,
            payout_account_id: None,
            total_sales: 0,
            total_revenue: 0,
        }
    }

    /// Builder: set connected payout account
    pub fn with_payout_account(mut self, account_id: impl Into<String>) -> Self {
        self.payout_account_id = Some(account_id.into());
        self
    }

    /// Builder: set email
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Seed data for the in-memory store (loaded from config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub creators: Vec<Creator>,
    #[serde(default)]
    pub items: Vec<CatalogItem>,
    #[serde(default)]
    pub packages: Vec<ServicePackage>,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
}

impl CatalogSeed {
    /// Load seed data from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}
