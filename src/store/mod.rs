//! Persistence port.
//!
//! The store is assumed to give atomic read-modify-write on a single document
//! and nothing more. Every stock mutation is one conditional update; order
//! updates are compare-and-set on the order's `version`.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;
use crate::domain::aggregates::{Order, Product};
use crate::Result;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of a conditional stock update. `Rejected` carries the product as
/// it stood when the condition failed; nothing was written.
#[derive(Clone, Debug)]
pub enum StockUpdate {
    Applied(Product),
    Rejected(Product),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;

    /// Catalog writes (seeding, admin edits). Not a stock mutation path.
    async fn upsert_product(&self, product: &Product) -> Result<()>;

    /// Adds `qty` to reserved only if `quantity - reserved >= qty`.
    async fn reserve_stock(&self, id: Uuid, qty: u32) -> Result<StockUpdate>;

    /// Subtracts up to `qty` from reserved, clamping at zero. Always applies.
    async fn release_stock(&self, id: Uuid, qty: u32) -> Result<StockUpdate>;

    /// Subtracts `qty` from quantity and reserved only if `quantity >= qty`.
    async fn commit_stock(&self, id: Uuid, qty: u32) -> Result<StockUpdate>;

    /// Adds `qty` back to on-hand quantity.
    async fn restock(&self, id: Uuid, qty: u32) -> Result<StockUpdate>;

    /// Fails with `Conflict` if the order number is already taken.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;

    async fn find_order_by_number(&self, order_number: &str) -> Result<Option<Order>>;

    /// Writes `order` only if the stored version still equals `expected_version`.
    async fn update_order(&self, order: &Order, expected_version: u64) -> Result<()>;

    /// Atomically increments and returns the order counter for `day`, starting at 1.
    async fn next_order_sequence(&self, day: NaiveDate) -> Result<u32>;
}
