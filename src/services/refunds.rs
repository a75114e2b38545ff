use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;
use crate::domain::aggregates::{Order, OrderStatus, StockEffect};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::events::EventBus;
use crate::services::orders::load_order;
use crate::services::stock::StockLedger;
use crate::store::Store;
use crate::Result;

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct RefundRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[validate(length(min = 1))]
    pub processed_by: String,
}

/// Applies cumulative refunds to captured orders.
#[derive(Clone)]
pub struct RefundProcessor {
    store: Arc<dyn Store>,
    ledger: StockLedger,
    events: EventBus,
}

impl RefundProcessor {
    pub fn new(store: Arc<dyn Store>, ledger: StockLedger, events: EventBus) -> Self {
        Self { store, ledger, events }
    }

    /// A refund that reaches the order total also moves a live order to
    /// `refunded`, which releases or restocks its items the same way a
    /// cancellation would.
    #[tracing::instrument(skip(self, reason))]
    pub async fn process_refund(&self, reference: &str, amount: Decimal, reason: &str, actor: &str) -> Result<Order> {
        let mut order = load_order(self.store.as_ref(), reference).await?;
        let expected = order.version();

        let outcome = order.apply_refund(amount, reason, actor, Utc::now())?;
        self.store.update_order(&order, expected).await?;

        tracing::info!(
            order_number = %order.order_number(),
            refunded_total = %order.refunded_amount(),
            payment_status = %order.payment_status(),
            "refund processed"
        );
        self.events.publish(DomainEvent::Order(OrderEvent::RefundProcessed {
            order_id: order.id(),
            amount,
            refunded_total: order.refunded_amount(),
            payment_status: order.payment_status(),
        })).await;

        if outcome.status_changed {
            self.events.publish(DomainEvent::Order(OrderEvent::StatusChanged {
                order_id: order.id(),
                from: outcome.previous_status,
                to: OrderStatus::Refunded,
                actor: actor.to_string(),
            })).await;
            let effect = StockEffect::between(outcome.previous_status, OrderStatus::Refunded);
            self.ledger.apply_effect(effect, order.items()).await?;
        }
        Ok(order)
    }
}
