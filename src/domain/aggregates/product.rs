//! Product Aggregate
//!
//! The product is the authoritative inventory record. Its stock numbers live in
//! [`StockLevel`], whose status is always derived from the numbers and never
//! stored independently.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Sku;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub sku: Sku,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub original_price: Option<Decimal>,
    #[serde(default)]
    pub primary_image: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub stock: StockLevel,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool { true }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    LowStock,
    #[default]
    OutOfStock,
    Discontinued,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::LowStock => "low_stock",
            Self::OutOfStock => "out_of_stock",
            Self::Discontinued => "discontinued",
        }
    }
}

/// On-hand and reserved quantities for one product.
///
/// Invariant: `reserved <= quantity`. Every mutator keeps it; the serde
/// representation rejects documents that break it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StockRecord", into = "StockRecord")]
pub struct StockLevel {
    quantity: u32,
    reserved: u32,
    low_stock_threshold: u32,
    discontinued: bool,
}

/// Persisted shape of a stock level. `status` is written for readers of the
/// document and ignored on the way back in.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StockRecord {
    quantity: u32,
    #[serde(default)]
    reserved: u32,
    #[serde(default = "default_threshold")]
    low_stock_threshold: u32,
    #[serde(default)]
    discontinued: bool,
    #[serde(default, skip_deserializing)]
    status: StockStatus,
}

fn default_threshold() -> u32 { 5 }

impl TryFrom<StockRecord> for StockLevel {
    type Error = StockShortfall;

    fn try_from(record: StockRecord) -> Result<Self, Self::Error> {
        StockLevel::restore(record.quantity, record.reserved, record.low_stock_threshold, record.discontinued)
    }
}

impl From<StockLevel> for StockRecord {
    fn from(level: StockLevel) -> Self {
        Self {
            quantity: level.quantity,
            reserved: level.reserved,
            low_stock_threshold: level.low_stock_threshold,
            discontinued: level.discontinued,
            status: level.status(),
        }
    }
}

/// A stock mutation could not be applied; `available` is the quantity that was on offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("requested {requested}, only {available} available")]
pub struct StockShortfall {
    pub requested: u32,
    pub available: u32,
}

impl StockLevel {
    pub fn new(quantity: u32, low_stock_threshold: u32) -> Self {
        Self { quantity, reserved: 0, low_stock_threshold, discontinued: false }
    }

    /// Rebuilds a stored level, refusing one where reserved exceeds quantity.
    pub fn restore(quantity: u32, reserved: u32, low_stock_threshold: u32, discontinued: bool) -> Result<Self, StockShortfall> {
        let mut level = Self::new(quantity, low_stock_threshold);
        level.discontinued = discontinued;
        level.reserve(reserved)?;
        Ok(level)
    }

    pub fn quantity(&self) -> u32 { self.quantity }
    pub fn reserved(&self) -> u32 { self.reserved }
    pub fn low_stock_threshold(&self) -> u32 { self.low_stock_threshold }
    pub fn is_discontinued(&self) -> bool { self.discontinued }
    pub fn available_quantity(&self) -> u32 { self.quantity - self.reserved }

    /// Status is a function of on-hand quantity; `discontinued` overrides it.
    pub fn status(&self) -> StockStatus {
        if self.discontinued {
            StockStatus::Discontinued
        } else if self.quantity == 0 {
            StockStatus::OutOfStock
        } else if self.quantity <= self.low_stock_threshold {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    pub fn reserve(&mut self, qty: u32) -> Result<(), StockShortfall> {
        let available = self.available_quantity();
        if qty > available {
            return Err(StockShortfall { requested: qty, available });
        }
        self.reserved += qty;
        Ok(())
    }

    /// Clamps at zero; returns how much was actually released.
    pub fn release(&mut self, qty: u32) -> u32 {
        let released = qty.min(self.reserved);
        self.reserved -= released;
        released
    }

    /// Converts a reservation into a permanent deduction.
    pub fn commit(&mut self, qty: u32) -> Result<(), StockShortfall> {
        if qty > self.quantity {
            return Err(StockShortfall { requested: qty, available: self.quantity });
        }
        self.quantity -= qty;
        self.reserved = self.reserved.saturating_sub(qty).min(self.quantity);
        Ok(())
    }

    pub fn restock(&mut self, qty: u32) {
        self.quantity = self.quantity.saturating_add(qty);
    }

    pub fn discontinue(&mut self) { self.discontinued = true; }
}

impl Product {
    pub fn create(sku: Sku, name: impl Into<String>, price: Decimal, stock: StockLevel) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), sku, name: name.into(), price, original_price: None,
            primary_image: None, active: true, stock, created_at: now, updated_at: now,
        }
    }

    pub fn available_quantity(&self) -> u32 { self.stock.available_quantity() }

    /// Sellable right now: active, plainly in stock and not fully reserved.
    pub fn is_available(&self) -> bool {
        self.active && self.stock.status() == StockStatus::InStock && self.available_quantity() > 0
    }

    /// Listed in the catalog at all; deactivated or discontinued products are not.
    pub fn is_listed(&self) -> bool {
        self.active && !self.stock.is_discontinued()
    }

    /// Whole-percent discount against `original_price`, or 0 when not on sale.
    pub fn discount_percentage(&self) -> u32 {
        match self.original_price {
            Some(original) if original > self.price && original > Decimal::ZERO => {
                ((original - self.price) / original * Decimal::ONE_HUNDRED)
                    .round()
                    .to_u32()
                    .unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn deactivate(&mut self) { self.active = false; self.touch(); }

    pub fn touch(&mut self) { self.updated_at = Utc::now(); }
}
