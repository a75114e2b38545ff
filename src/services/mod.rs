//! Application services over the domain and the store port.
pub mod checkout;
pub mod orders;
pub mod refunds;
pub mod stock;
