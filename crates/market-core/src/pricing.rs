//! # Pricing Snapshot
//!
//! Turns catalog entries into priced lines (fee split included) and an
//! immutable order draft. Read-only: nothing here touches storage.

use crate::catalog::{CatalogItem, FeeRate, ServicePackage};
use crate::collaborators::CouponValidation;
use crate::error::{MarketError, MarketResult};
use crate::order::{LineItemKind, OrderItem};
use serde::{Deserialize, Serialize};

/// Coupon applied to a draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub coupon_id: String,
    pub discount: i64,
}

/// Priced, not yet persisted order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub lines: Vec<OrderItem>,
    pub subtotal: i64,
    pub discount: i64,
    pub total: i64,
    pub coupon: Option<AppliedCoupon>,
}

impl OrderDraft {
    pub fn from_lines(lines: Vec<OrderItem>) -> Self {
        let subtotal = lines.iter().map(|l| l.price).sum();
        Self {
            lines,
            subtotal,
            discount: 0,
            total: subtotal,
            coupon: None,
        }
    }

    /// Apply a coupon validation result.
    ///
    /// An invalid coupon is an error carrying the coupon service's
    /// message. The discount is clamped to the subtotal. Line-level fee
    /// and payout are untouched: the platform absorbs the discount.
    pub fn with_coupon(mut self, code: &str, validation: CouponValidation) -> MarketResult<Self> {
        if !validation.valid {
            let message = validation
                .message
                .unwrap_or_else(|| format!("Coupon {} is not valid", code));
            return Err(MarketError::Validation(message));
        }
        let coupon_id = validation.coupon_id.ok_or_else(|| {
            MarketError::Internal(format!("coupon service returned no id for {}", code))
        })?;
        let discount = validation.discount.clamp(0, self.subtotal);
        self.discount = discount;
        self.total = self.subtotal - discount;
        self.coupon = Some(AppliedCoupon {
            code: code.to_string(),
            coupon_id,
            discount,
        });
        Ok(self)
    }

    /// Category used for coupon scoping (first line wins)
    pub fn primary_category(&self) -> &str {
        self.lines.first().map(|l| l.category.as_str()).unwrap_or("")
    }
}

/// Prices catalog entries with a fixed fee rate
#[derive(Debug, Clone, Copy)]
pub struct PricingSnapshot {
    fee_rate: FeeRate,
}

impl PricingSnapshot {
    pub fn new(fee_rate: FeeRate) -> Self {
        Self { fee_rate }
    }

    pub fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    pub fn price_template(&self, item: &CatalogItem) -> OrderItem {
        let (platform_fee, creator_payout) = self.fee_rate.split(item.price);
        OrderItem {
            kind: LineItemKind::Template,
            reference_id: item.id.clone(),
            title: item.title.clone(),
            price: item.price,
            creator_id: item.creator_id.clone(),
            platform_fee,
            creator_payout,
            category: item.category.clone(),
        }
    }

    pub fn price_package(&self, package: &ServicePackage) -> OrderItem {
        let (platform_fee, creator_payout) = self.fee_rate.split(package.price);
        OrderItem {
            kind: LineItemKind::Service,
            reference_id: package.id.clone(),
            title: package.title.clone(),
            price: package.price,
            creator_id: package.creator_id.clone(),
            platform_fee,
            creator_payout,
            category: package.category.clone(),
        }
    }

    /// Price a set of templates into a draft
    pub fn draft<'a>(&self, items: impl IntoIterator<Item = &'a CatalogItem>) -> OrderDraft {
        OrderDraft::from_lines(items.into_iter().map(|i| self.price_template(i)).collect())
    }
}
