//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::{Product, StockLevel, StockShortfall, StockStatus};
pub use order::{
    Discount, NewOrder, Order, OrderItem, OrderStatus, Owner, PaymentDetails, PaymentMethod, PaymentStatus,
    RefundRecord, ShippingAddress, ShippingMethod, StatusChange, StockEffect,
};
pub use cart::{Cart, CartLine, CartStorage, CartSummary, InMemoryCartStorage, PricingPolicy, ProductSnapshot};
