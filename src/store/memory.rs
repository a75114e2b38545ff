use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use uuid::Uuid;
use crate::domain::aggregates::{Order, Product, StockLevel};
use crate::store::{StockUpdate, Store};
use crate::{CommerceError, Result};

/// In-process store. Each operation holds the relevant lock for its whole
/// read-modify-write, which gives the same single-document atomicity the
/// Postgres store gets from conditional updates.
#[derive(Debug, Default)]
pub struct MemoryStore {
    products: RwLock<HashMap<Uuid, Product>>,
    orders: RwLock<HashMap<Uuid, Order>>,
    sequences: Mutex<HashMap<NaiveDate, u32>>,
}

fn poisoned<T>(_: T) -> CommerceError {
    CommerceError::Storage("memory store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.products.write() {
            map.extend(products.into_iter().map(|p| (p.id, p)));
        }
        store
    }

    fn mutate_stock<F>(&self, id: Uuid, apply: F) -> Result<StockUpdate>
    where
        F: FnOnce(&mut StockLevel) -> bool,
    {
        let mut products = self.products.write().map_err(poisoned)?;
        let product = products.get_mut(&id).ok_or(CommerceError::ProductNotFound(id))?;
        let mut stock = product.stock.clone();
        if !apply(&mut stock) {
            return Ok(StockUpdate::Rejected(product.clone()));
        }
        product.stock = stock;
        product.updated_at = Utc::now();
        Ok(StockUpdate::Applied(product.clone()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.products.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        self.products.write().map_err(poisoned)?.insert(product.id, product.clone());
        Ok(())
    }

    async fn reserve_stock(&self, id: Uuid, qty: u32) -> Result<StockUpdate> {
        self.mutate_stock(id, |stock| stock.reserve(qty).is_ok())
    }

    async fn release_stock(&self, id: Uuid, qty: u32) -> Result<StockUpdate> {
        self.mutate_stock(id, |stock| { stock.release(qty); true })
    }

    async fn commit_stock(&self, id: Uuid, qty: u32) -> Result<StockUpdate> {
        self.mutate_stock(id, |stock| stock.commit(qty).is_ok())
    }

    async fn restock(&self, id: Uuid, qty: u32) -> Result<StockUpdate> {
        self.mutate_stock(id, |stock| { stock.restock(qty); true })
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().map_err(poisoned)?;
        if orders.values().any(|o| o.order_number() == order.order_number()) {
            return Err(CommerceError::Conflict(format!("order number {} already exists", order.order_number())));
        }
        if orders.contains_key(&order.id()) {
            return Err(CommerceError::Conflict(format!("order {} already exists", order.id())));
        }
        orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn find_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().map_err(poisoned)?
            .values()
            .find(|o| o.order_number().as_str() == order_number)
            .cloned())
    }

    async fn update_order(&self, order: &Order, expected_version: u64) -> Result<()> {
        let mut orders = self.orders.write().map_err(poisoned)?;
        let stored = orders.get_mut(&order.id()).ok_or_else(|| CommerceError::OrderNotFound(order.id().to_string()))?;
        if stored.version() != expected_version {
            return Err(CommerceError::Conflict(format!(
                "order {} is at version {}, expected {}",
                order.order_number(), stored.version(), expected_version
            )));
        }
        *stored = order.clone();
        Ok(())
    }

    async fn next_order_sequence(&self, day: NaiveDate) -> Result<u32> {
        let mut sequences = self.sequences.lock().map_err(poisoned)?;
        let next = sequences.entry(day).or_insert(0);
        *next += 1;
        Ok(*next)
    }
}
