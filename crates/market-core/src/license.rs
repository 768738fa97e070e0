//! # Licenses
//!
//! Proof that a buyer may use a template. Minted once per paid line item,
//! deactivated (never deleted) on refund.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// License key: `<PREFIX>-<32 uppercase hex>`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Generate a fresh key
    pub fn generate(prefix: &str) -> Self {
        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        Self(format!("{}-{}", prefix, id))
    }

    /// Parse from string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A buyer's entitlement to one catalog item
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct License {
    pub key: LicenseKey,

    pub buyer_id: String,

    pub catalog_item_id: String,

    pub order_id: String,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl License {
    pub fn issue(
        prefix: &str,
        buyer_id: impl Into<String>,
        catalog_item_id: impl Into<String>,
        order_id: impl Into<String>,
    ) -> Self {
        Self {
            key: LicenseKey::generate(prefix),
            buyer_id: buyer_id.into(),
            catalog_item_id: catalog_item_id.into(),
            order_id: order_id.into(),
            is_active: true,
            created_at: Utc::now(),
            deactivated_at: None,
        }
    }

    /// Returns false if already inactive
    pub fn deactivate(&mut self) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.deactivated_at = Some(Utc::now());
        true
    }
}
