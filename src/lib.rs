//! Jewelry storefront commerce core
//!
//! Inventory-aware order and cart consistency for a single-store catalog.
//!
//! ## Features
//! - Stock ledger with atomic reserve / release / commit
//! - Client-held carts with snapshot reconciliation at checkout
//! - Order lifecycle state machine with append-only status history
//! - Cumulative partial and full refunds
//! - Per-day order numbering backed by an atomic counter

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub mod api;
pub mod config;
pub mod domain;
pub mod events;
pub mod services;
pub mod store;

pub use domain::aggregates::{Cart, CartLine, Order, OrderStatus, Owner, PaymentStatus, PricingPolicy, Product, StockLevel, StockStatus};
pub use services::checkout::{CheckoutIssue, CheckoutValidation, CheckoutValidator};
pub use services::orders::{CreateOrder, OrderService, OrderSettings};
pub use services::refunds::RefundProcessor;
pub use services::stock::StockLedger;
pub use store::{MemoryStore, Store};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: Uuid, requested: u32, available: u32 },

    #[error("Product {0} is unavailable")]
    ProductUnavailable(Uuid),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Return window expired: delivered {days_since_delivery} days ago, window is {window_days} days")]
    ReturnWindowExpired { days_since_delivery: i64, window_days: i64 },

    #[error("Refund of {requested} exceeds refundable amount {refundable}")]
    RefundExceedsTotal { requested: Decimal, refundable: Decimal },

    #[error("Stock consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Product {0} is not in the cart")]
    CartLineNotFound(Uuid),

    #[error("Checkout blocked by {} issue(s)", .0.len())]
    CheckoutBlocked(Vec<CheckoutIssue>),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for CommerceError {
    fn from(err: sqlx::Error) -> Self { Self::Storage(err.to_string()) }
}

impl From<validator::ValidationErrors> for CommerceError {
    fn from(err: validator::ValidationErrors) -> Self { Self::ValidationError(err.to_string()) }
}

impl From<domain::value_objects::ValueError> for CommerceError {
    fn from(err: domain::value_objects::ValueError) -> Self { Self::ValidationError(err.to_string()) }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
