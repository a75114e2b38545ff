//! Cart Aggregate
//!
//! A cart is owned by one browser session and is never authoritative: every
//! line carries a snapshot of the product as it looked when it was added, and
//! the checkout validator reconciles those snapshots against the stock ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;
use crate::domain::aggregates::product::{Product, StockStatus};
use crate::domain::value_objects::Sku;
use crate::{CommerceError, Result};

/// Catalog data captured when a product is put in the cart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: Uuid,
    pub name: String,
    pub sku: Sku,
    pub price: Decimal,
    #[serde(default)]
    pub primary_image: Option<String>,
    #[serde(default)]
    pub is_available: bool,
    #[serde(default)]
    pub available_quantity: u32,
    #[serde(default)]
    pub stock_status: StockStatus,
}

impl From<&Product> for ProductSnapshot {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.id,
            name: product.name.clone(),
            sku: product.sku.clone(),
            price: product.price,
            primary_image: product.primary_image.clone(),
            is_available: product.is_available(),
            available_quantity: product.available_quantity(),
            stock_status: product.stock.status(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product: ProductSnapshot,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    pub fn product_id(&self) -> Uuid { self.product.product_id }
    pub fn line_total(&self) -> Decimal { self.product.price * Decimal::from(self.quantity) }
}

/// Tax and shipping rules applied to cart and order totals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(75, 3),
            free_shipping_threshold: Decimal::from(50_000),
            flat_shipping_fee: Decimal::from(2_500),
        }
    }
}

impl PricingPolicy {
    pub fn tax_for(&self, subtotal: Decimal) -> Decimal { (subtotal * self.tax_rate).round_dp(2) }

    /// Free once the subtotal is strictly above the threshold.
    pub fn shipping_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal > self.free_shipping_threshold { Decimal::ZERO } else { self.flat_shipping_fee }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CartSummary {
    pub item_count: u32,
    pub line_count: usize,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub has_items: bool,
}

/// Where the serialized line list lives between visits (browser storage, a file, ...).
pub trait CartStorage {
    fn load(&self) -> Option<String>;
    fn save(&self, payload: &str) -> std::io::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryCartStorage {
    payload: Mutex<Option<String>>,
}

impl InMemoryCartStorage {
    pub fn with_payload(payload: impl Into<String>) -> Self {
        Self { payload: Mutex::new(Some(payload.into())) }
    }
}

impl CartStorage for InMemoryCartStorage {
    fn load(&self) -> Option<String> {
        self.payload.lock().ok().and_then(|p| p.clone())
    }

    fn save(&self, payload: &str) -> std::io::Result<()> {
        let mut slot = self.payload.lock().map_err(|_| std::io::Error::other("cart storage poisoned"))?;
        *slot = Some(payload.to_string());
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    pub fn from_lines(lines: Vec<CartLine>) -> Self {
        let mut cart = Self::new();
        cart.merge_lines(lines);
        cart
    }

    /// Restores a cart from storage. Anything that is not a valid line list
    /// yields an empty cart.
    pub fn load(storage: &dyn CartStorage) -> Self {
        let Some(payload) = storage.load() else { return Self::new() };
        match serde_json::from_str::<Vec<CartLine>>(&payload) {
            Ok(lines) => Self::from_lines(lines),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable cart payload");
                Self::new()
            }
        }
    }

    pub fn save(&self, storage: &dyn CartStorage) -> Result<()> {
        let payload = serde_json::to_string(&self.lines)
            .map_err(|e| CommerceError::Storage(e.to_string()))?;
        storage.save(&payload).map_err(|e| CommerceError::Storage(e.to_string()))
    }

    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn line(&self, product_id: Uuid) -> Option<&CartLine> { self.lines.iter().find(|l| l.product_id() == product_id) }
    pub fn contains(&self, product_id: Uuid) -> bool { self.line(product_id).is_some() }
    pub fn line_count(&self) -> usize { self.lines.len() }
    pub fn total_quantity(&self) -> u32 { self.lines.iter().map(|l| l.quantity).sum() }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    pub fn add(&mut self, product: &Product, qty: u32) -> Result<()> {
        self.add_at(product, qty, Utc::now())
    }

    pub fn add_at(&mut self, product: &Product, qty: u32, now: DateTime<Utc>) -> Result<()> {
        if qty < 1 { return Err(CommerceError::InvalidQuantity(qty)); }
        if !product.is_available() { return Err(CommerceError::ProductUnavailable(product.id)); }

        let existing = self.line(product.id).map(|l| l.quantity).unwrap_or(0);
        let requested = existing.saturating_add(qty);
        let available = product.available_quantity();
        if requested > available {
            return Err(CommerceError::InsufficientStock { product_id: product.id, requested, available });
        }

        match self.lines.iter_mut().find(|l| l.product_id() == product.id) {
            Some(line) => line.quantity = requested,
            None => self.lines.push(CartLine { product: ProductSnapshot::from(product), quantity: qty, added_at: now }),
        }
        Ok(())
    }

    pub fn remove(&mut self, product_id: Uuid) -> Option<CartLine> {
        let index = self.lines.iter().position(|l| l.product_id() == product_id)?;
        Some(self.lines.remove(index))
    }

    /// Zero removes the line. Asking for more than the snapshot says is
    /// available is an error; the quantity is never clamped here.
    pub fn set_quantity(&mut self, product_id: Uuid, qty: u32) -> Result<()> {
        if qty < 1 {
            self.remove(product_id);
            return Ok(());
        }
        let line = self.lines.iter_mut().find(|l| l.product_id() == product_id)
            .ok_or(CommerceError::CartLineNotFound(product_id))?;
        let available = line.product.available_quantity;
        if qty > available {
            return Err(CommerceError::InsufficientStock { product_id, requested: qty, available });
        }
        line.quantity = qty;
        Ok(())
    }

    pub fn clear(&mut self) { self.lines.clear(); }

    /// Merges lines from another source (wishlist, a saved cart). Lines with
    /// zero quantity are dropped. Returns how many lines were accepted.
    pub fn import_lines(&mut self, lines: Vec<CartLine>) -> usize {
        let before = self.lines.len();
        let accepted = lines.iter().filter(|l| l.quantity > 0).count();
        self.merge_lines(lines);
        tracing::debug!(accepted, new_lines = self.lines.len() - before, "imported cart lines");
        accepted
    }

    /// Replaces the lines with the reconciled ones from checkout validation.
    pub fn apply_validation(&mut self, reconciled: Vec<CartLine>) {
        self.lines.clear();
        self.merge_lines(reconciled);
    }

    /// True when some line was added while its product was not plainly in stock.
    pub fn needs_attention(&self) -> bool {
        self.lines.iter().any(|l| !l.product.is_available || l.product.stock_status != StockStatus::InStock)
    }

    pub fn summary(&self, policy: &PricingPolicy) -> CartSummary {
        let subtotal: Decimal = self.lines.iter().map(CartLine::line_total).sum();
        let item_count = self.total_quantity();
        let tax = policy.tax_for(subtotal);
        let shipping = if self.lines.is_empty() { Decimal::ZERO } else { policy.shipping_for(subtotal) };
        CartSummary {
            item_count,
            line_count: self.lines.len(),
            subtotal,
            tax,
            shipping,
            total: subtotal + tax + shipping,
            has_items: item_count > 0,
        }
    }

    fn merge_lines(&mut self, lines: Vec<CartLine>) {
        for incoming in lines.into_iter().filter(|l| l.quantity > 0) {
            match self.lines.iter_mut().find(|l| l.product_id() == incoming.product_id()) {
                Some(line) => line.quantity = line.quantity.saturating_add(incoming.quantity),
                None => self.lines.push(incoming),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::StockLevel;

    fn product(name: &str, price: i64, quantity: u32) -> Product {
        Product::create(Sku::new(name).unwrap(), name, Decimal::from(price), StockLevel::new(quantity, 2))
    }

    #[test]
    fn test_add_merges_lines() {
        let necklace = product("NCK-1", 1000, 10);
        let mut cart = Cart::new();
        cart.add(&necklace, 1).unwrap();
        cart.add(&necklace, 2).unwrap();
        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.line(necklace.id).unwrap().quantity, 3);

        let mut once = Cart::new();
        once.add(&necklace, 3).unwrap();
        assert_eq!(once.total_quantity(), cart.total_quantity());
    }

    #[test]
    fn test_add_zero_is_rejected_and_leaves_cart_unchanged() {
        let necklace = product("NCK-1", 1000, 10);
        let mut cart = Cart::new();
        cart.add(&necklace, 2).unwrap();
        let before = cart.clone();
        assert!(matches!(cart.add(&necklace, 0), Err(CommerceError::InvalidQuantity(0))));
        assert!(matches!(cart.add(&necklace, 0), Err(CommerceError::InvalidQuantity(0))));
        assert_eq!(cart, before);
    }

    #[test]
    fn test_add_checks_stock_including_existing_line() {
        let ring = product("RNG-1", 500, 5);
        let mut cart = Cart::new();
        cart.add(&ring, 4).unwrap();
        let err = cart.add(&ring, 2).unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientStock { requested: 6, available: 5, .. }));
        assert_eq!(cart.line(ring.id).unwrap().quantity, 4);
    }

    #[test]
    fn test_add_requires_available_product() {
        let mut ring = product("RNG-1", 500, 5);
        ring.deactivate();
        assert!(matches!(Cart::new().add(&ring, 1), Err(CommerceError::ProductUnavailable(_))));
        let low = product("RNG-2", 500, 2);
        assert!(matches!(Cart::new().add(&low, 1), Err(CommerceError::ProductUnavailable(_))));
    }

    #[test]
    fn test_set_quantity() {
        let ring = product("RNG-1", 500, 5);
        let mut cart = Cart::new();
        cart.add(&ring, 1).unwrap();
        cart.set_quantity(ring.id, 5).unwrap();
        assert_eq!(cart.total_quantity(), 5);
        assert!(matches!(cart.set_quantity(ring.id, 6), Err(CommerceError::InsufficientStock { .. })));
        assert_eq!(cart.total_quantity(), 5);
        cart.set_quantity(ring.id, 0).unwrap();
        assert!(cart.is_empty());
        assert!(matches!(cart.set_quantity(ring.id, 1), Err(CommerceError::CartLineNotFound(_))));
    }

    #[test]
    fn test_summary_shipping_threshold() {
        let policy = PricingPolicy::default();
        let cheap = product("CHN-1", 10_000, 10);
        let mut cart = Cart::new();
        cart.add(&cheap, 2).unwrap();
        let summary = cart.summary(&policy);
        assert_eq!(summary.subtotal, Decimal::from(20_000));
        assert_eq!(summary.tax, Decimal::from(1_500));
        assert_eq!(summary.shipping, Decimal::from(2_500));
        assert_eq!(summary.total, Decimal::from(24_000));

        cart.set_quantity(cheap.id, 6).unwrap();
        let summary = cart.summary(&policy);
        assert_eq!(summary.shipping, Decimal::ZERO);
        assert_eq!(summary.item_count, 6);

        assert_eq!(Cart::new().summary(&policy).total, Decimal::ZERO);
    }

    #[test]
    fn test_load_discards_corrupt_payloads() {
        for payload in ["{not json", "{\"lines\": 3}", "42", "\"cart\""] {
            let storage = InMemoryCartStorage::with_payload(payload);
            assert!(Cart::load(&storage).is_empty(), "payload {payload} should load empty");
        }
        assert!(Cart::load(&InMemoryCartStorage::default()).is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let storage = InMemoryCartStorage::default();
        let ring = product("RNG-1", 500, 5);
        let mut cart = Cart::new();
        cart.add(&ring, 2).unwrap();
        cart.save(&storage).unwrap();
        assert_eq!(Cart::load(&storage), cart);
    }

    #[test]
    fn test_import_merges_and_drops_empty_lines() {
        let ring = product("RNG-1", 500, 5);
        let pendant = product("PND-1", 800, 5);
        let mut cart = Cart::new();
        cart.add(&ring, 1).unwrap();
        let mut empty = CartLine { product: ProductSnapshot::from(&pendant), quantity: 0, added_at: Utc::now() };
        let extra = CartLine { product: ProductSnapshot::from(&ring), quantity: 2, added_at: Utc::now() };
        assert_eq!(cart.import_lines(vec![extra, empty.clone()]), 1);
        assert_eq!(cart.line(ring.id).unwrap().quantity, 3);
        assert!(!cart.contains(pendant.id));
        empty.quantity = 1;
        cart.import_lines(vec![empty]);
        assert_eq!(cart.line_count(), 2);
    }

    #[test]
    fn test_needs_attention() {
        let ring = product("RNG-1", 500, 5);
        let mut cart = Cart::new();
        cart.add(&ring, 1).unwrap();
        assert!(!cart.needs_attention());
        let mut stale = cart.lines()[0].clone();
        stale.product.is_available = false;
        cart.apply_validation(vec![stale]);
        assert!(cart.needs_attention());
    }
}
