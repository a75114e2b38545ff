//! Stock ledger: the only writer of stock numbers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use crate::domain::aggregates::{OrderItem, Product, StockEffect, StockStatus};
use crate::domain::events::{DomainEvent, StockEvent};
use crate::events::EventBus;
use crate::store::{StockUpdate, Store};
use crate::{CommerceError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub product_id: Uuid,
    pub quantity: u32,
}

/// Live view of one product as seen by checkout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub product_id: Uuid,
    /// Product exists, is active and is not discontinued.
    pub listed: bool,
    /// Listed and at least the requested quantity is free.
    pub available: bool,
    pub available_quantity: u32,
    pub current_price: Option<Decimal>,
    pub status: Option<StockStatus>,
    pub name: Option<String>,
}

impl Availability {
    fn missing(product_id: Uuid) -> Self {
        Self { product_id, listed: false, available: false, available_quantity: 0, current_price: None, status: None, name: None }
    }

    fn of(product: &Product, requested: u32) -> Self {
        let listed = product.is_listed();
        let available_quantity = if listed { product.available_quantity() } else { 0 };
        Self {
            product_id: product.id,
            listed,
            available: listed && available_quantity > 0 && available_quantity >= requested,
            available_quantity,
            current_price: Some(product.price),
            status: Some(product.stock.status()),
            name: Some(product.name.clone()),
        }
    }
}

#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn Store>,
    events: EventBus,
}

impl StockLedger {
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self { Self { store, events } }

    pub async fn product(&self, id: Uuid) -> Result<Product> {
        self.store.get_product(id).await?.ok_or(CommerceError::ProductNotFound(id))
    }

    pub async fn check_availability(&self, items: &[AvailabilityQuery]) -> Result<Vec<Availability>> {
        let checked = self.lookup(items).await?;
        Ok(checked.into_iter().map(|(availability, _)| availability).collect())
    }

    /// Availability of each query together with the product record it was
    /// read from, `None` when the product does not exist.
    pub async fn lookup(&self, items: &[AvailabilityQuery]) -> Result<Vec<(Availability, Option<Product>)>> {
        let mut result = Vec::with_capacity(items.len());
        for item in items {
            let checked = match self.store.get_product(item.product_id).await? {
                Some(product) => (Availability::of(&product, item.quantity), Some(product)),
                None => (Availability::missing(item.product_id), None),
            };
            result.push(checked);
        }
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, id: Uuid, qty: u32) -> Result<Product> {
        if qty < 1 { return Err(CommerceError::InvalidQuantity(qty)); }
        match self.store.reserve_stock(id, qty).await? {
            StockUpdate::Applied(product) => {
                tracing::info!(reserved = product.stock.reserved(), "stock reserved");
                self.events.publish(DomainEvent::Stock(StockEvent::Reserved {
                    product_id: id, quantity: qty, reserved: product.stock.reserved(),
                })).await;
                Ok(product)
            }
            StockUpdate::Rejected(product) => {
                let available = product.available_quantity();
                tracing::info!(available, "reservation rejected");
                Err(CommerceError::InsufficientStock { product_id: id, requested: qty, available })
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(&self, id: Uuid, qty: u32) -> Result<Product> {
        let product = match self.store.release_stock(id, qty).await? {
            StockUpdate::Applied(product) | StockUpdate::Rejected(product) => product,
        };
        self.events.publish(DomainEvent::Stock(StockEvent::Released {
            product_id: id, quantity: qty, reserved: product.stock.reserved(),
        })).await;
        Ok(product)
    }

    /// A failed commit means a reservation went missing upstream; it is
    /// reported as a consistency violation, never as a stock shortage.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, id: Uuid, qty: u32) -> Result<Product> {
        match self.store.commit_stock(id, qty).await? {
            StockUpdate::Applied(product) => {
                self.events.publish(DomainEvent::Stock(StockEvent::Committed {
                    product_id: id, quantity: qty, on_hand: product.stock.quantity(),
                })).await;
                Ok(product)
            }
            StockUpdate::Rejected(product) => {
                let on_hand = product.stock.quantity();
                tracing::error!(on_hand, "commit exceeds on-hand quantity");
                Err(CommerceError::ConsistencyViolation(format!(
                    "commit of {qty} for product {id} exceeds on-hand quantity {on_hand}"
                )))
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn restock(&self, id: Uuid, qty: u32) -> Result<Product> {
        let product = match self.store.restock(id, qty).await? {
            StockUpdate::Applied(product) | StockUpdate::Rejected(product) => product,
        };
        self.events.publish(DomainEvent::Stock(StockEvent::Restocked {
            product_id: id, quantity: qty, on_hand: product.stock.quantity(),
        })).await;
        Ok(product)
    }

    /// Reserves every line or none: on the first failure the lines already
    /// reserved are released and the failure is returned.
    pub async fn reserve_all(&self, lines: &[(Uuid, u32)]) -> Result<()> {
        for (index, &(id, qty)) in lines.iter().enumerate() {
            if let Err(e) = self.reserve(id, qty).await {
                tracing::warn!(product_id = %id, error = %e, rolled_back = index, "reservation failed, compensating");
                self.release_lines(&lines[..index]).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Best effort: every line is attempted even if one fails.
    pub async fn release_lines(&self, lines: &[(Uuid, u32)]) {
        for &(id, qty) in lines {
            if let Err(e) = self.release(id, qty).await {
                tracing::error!(product_id = %id, quantity = qty, error = %e, "failed to release reservation");
            }
        }
    }

    /// Applies what an order status change means for stock to every item.
    pub async fn apply_effect(&self, effect: StockEffect, items: &[OrderItem]) -> Result<()> {
        let lines: Vec<(Uuid, u32)> = items.iter().map(|i| (i.product_id, i.quantity)).collect();
        match effect {
            StockEffect::None => Ok(()),
            StockEffect::Release => {
                self.release_lines(&lines).await;
                Ok(())
            }
            StockEffect::Restock => {
                for &(id, qty) in &lines {
                    if let Err(e) = self.restock(id, qty).await {
                        tracing::error!(product_id = %id, quantity = qty, error = %e, "failed to restock");
                    }
                }
                Ok(())
            }
            StockEffect::Commit => {
                let mut failures = Vec::new();
                for &(id, qty) in &lines {
                    if let Err(e) = self.commit(id, qty).await {
                        failures.push(e.to_string());
                    }
                }
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(CommerceError::ConsistencyViolation(failures.join("; ")))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::StockLevel;
    use crate::domain::value_objects::Sku;
    use crate::store::MemoryStore;

    fn product(sku: &str, quantity: u32, threshold: u32) -> Product {
        Product::create(Sku::new(sku).unwrap(), sku, Decimal::from(1_000), StockLevel::new(quantity, threshold))
    }

    fn ledger_with(products: Vec<Product>) -> (StockLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_products(products));
        (StockLedger::new(store.clone(), EventBus::disabled()), store)
    }

    #[tokio::test]
    async fn test_reserve_scenario() {
        let ring = product("RNG-1", 10, 5);
        let (ledger, _) = ledger_with(vec![ring.clone()]);

        let after = ledger.reserve(ring.id, 7).await.unwrap();
        assert_eq!(after.stock.reserved(), 7);
        assert_eq!(after.stock.status(), StockStatus::InStock);

        let err = ledger.reserve(ring.id, 5).await.unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientStock { requested: 5, available: 3, .. }));
        assert_eq!(ledger.product(ring.id).await.unwrap().stock.reserved(), 7);
    }

    #[tokio::test]
    async fn test_release_and_commit() {
        let ring = product("RNG-1", 10, 5);
        let (ledger, _) = ledger_with(vec![ring.clone()]);
        ledger.reserve(ring.id, 4).await.unwrap();
        assert_eq!(ledger.release(ring.id, 10).await.unwrap().stock.reserved(), 0);

        ledger.reserve(ring.id, 6).await.unwrap();
        let committed = ledger.commit(ring.id, 6).await.unwrap();
        assert_eq!((committed.stock.quantity(), committed.stock.reserved()), (4, 0));
        assert_eq!(committed.stock.status(), StockStatus::LowStock);

        assert!(matches!(ledger.commit(ring.id, 5).await, Err(CommerceError::ConsistencyViolation(_))));
        assert_eq!(ledger.restock(ring.id, 3).await.unwrap().stock.quantity(), 7);
    }

    #[tokio::test]
    async fn test_reserve_all_compensates() {
        let a = product("A-1", 5, 1);
        let b = product("B-1", 5, 1);
        let c = product("C-1", 1, 0);
        let (ledger, _) = ledger_with(vec![a.clone(), b.clone(), c.clone()]);

        let err = ledger.reserve_all(&[(a.id, 2), (b.id, 3), (c.id, 2)]).await.unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientStock { product_id, .. } if product_id == c.id));
        for id in [a.id, b.id, c.id] {
            assert_eq!(ledger.product(id).await.unwrap().stock.reserved(), 0);
        }
    }

    #[tokio::test]
    async fn test_check_availability() {
        let ring = product("RNG-1", 4, 1);
        let mut retired = product("OLD-1", 4, 1);
        retired.deactivate();
        let (ledger, _) = ledger_with(vec![ring.clone(), retired.clone()]);
        let ghost = Uuid::new_v4();
        let result = ledger.check_availability(&[
            AvailabilityQuery { product_id: ring.id, quantity: 2 },
            AvailabilityQuery { product_id: retired.id, quantity: 1 },
            AvailabilityQuery { product_id: ghost, quantity: 1 },
        ]).await.unwrap();
        assert!(result[0].available && result[0].listed);
        assert_eq!(result[0].available_quantity, 4);
        assert_eq!(result[0].current_price, Some(Decimal::from(1_000)));
        assert!(!result[1].listed);
        assert!(!result[2].listed && result[2].current_price.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversell() {
        let ring = product("RNG-1", 10, 5);
        let (ledger, store) = ledger_with(vec![ring.clone()]);
        let ledger = Arc::new(ledger);
        let id = ring.id;

        let first = { let l = ledger.clone(); tokio::spawn(async move { l.reserve(id, 6).await }) };
        let second = { let l = ledger.clone(); tokio::spawn(async move { l.reserve(id, 6).await }) };
        let results = [first.await.unwrap(), second.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(CommerceError::InsufficientStock { .. }))));
        let stock = store.get_product(ring.id).await.unwrap().unwrap().stock;
        assert_eq!(stock.reserved(), 6);
        assert!(stock.reserved() <= stock.quantity());
    }
}
