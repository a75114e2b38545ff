//! Domain events
use crate::domain::aggregates::order::{OrderStatus, PaymentStatus};
use crate::domain::value_objects::OrderNumber;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Stock(StockEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StockEvent {
    Reserved { product_id: Uuid, quantity: u32, reserved: u32 },
    Released { product_id: Uuid, quantity: u32, reserved: u32 },
    Committed { product_id: Uuid, quantity: u32, on_hand: u32 },
    Restocked { product_id: Uuid, quantity: u32, on_hand: u32 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: OrderNumber, total: Decimal },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus, actor: String },
    PaymentRecorded { order_id: Uuid, status: PaymentStatus },
    RefundProcessed { order_id: Uuid, amount: Decimal, refunded_total: Decimal, payment_status: PaymentStatus },
}

impl DomainEvent {
    /// Subject suffix used when the event is published.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stock(StockEvent::Reserved { .. }) => "stock.reserved",
            Self::Stock(StockEvent::Released { .. }) => "stock.released",
            Self::Stock(StockEvent::Committed { .. }) => "stock.committed",
            Self::Stock(StockEvent::Restocked { .. }) => "stock.restocked",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Order(OrderEvent::PaymentRecorded { .. }) => "order.payment_recorded",
            Self::Order(OrderEvent::RefundProcessed { .. }) => "order.refund_processed",
        }
    }
}
