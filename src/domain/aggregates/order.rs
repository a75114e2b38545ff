//! Order Aggregate
//!
//! Totals are computed once in [`Order::place`] and never touched again.
//! Status moves along a fixed graph, every move appends to an append-only
//! history, and refunds accumulate as a list of records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::cart::{PricingPolicy, ProductSnapshot};
use crate::domain::value_objects::{Email, OrderNumber, Sku};
use crate::{CommerceError, Result};

/// Who the order belongs to. Exactly one of the two, never both or neither.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Owner {
    Registered(Uuid),
    Guest(Email),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled, Refunded }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded, PartiallyRefunded }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { Card, BankTransfer, #[default] CashOnDelivery, Wallet }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod { #[default] Standard, Express, Overnight, Pickup }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Cancelled | Self::Refunded) }

    /// Edges of the lifecycle graph reachable through a status update.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Delivered, Refunded)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// What a status change means for the reserved / on-hand stock of each line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockEffect {
    None,
    /// Reservation becomes a permanent deduction.
    Commit,
    /// Reservation is dropped; nothing was deducted yet.
    Release,
    /// Stock was already deducted and goes back on hand.
    Restock,
}

impl StockEffect {
    pub fn between(from: OrderStatus, to: OrderStatus) -> Self {
        use OrderStatus::*;
        match (from, to) {
            (Pending, Confirmed) => Self::Commit,
            (Pending, Cancelled | Refunded) => Self::Release,
            (Confirmed, Cancelled | Refunded) => Self::Restock,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1))]
    pub first_name: String,
    #[validate(length(min = 1))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 5))]
    pub phone: String,
    #[validate(length(min = 1))]
    pub street: String,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub state: String,
    #[validate(length(min = 1))]
    pub zip_code: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String { "Nigeria".to_string() }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub sku: Sku,
    #[serde(default)]
    pub image: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl OrderItem {
    pub fn from_snapshot(snapshot: &ProductSnapshot, quantity: u32) -> Result<Self> {
        if quantity < 1 { return Err(CommerceError::InvalidQuantity(quantity)); }
        if snapshot.price < Decimal::ZERO {
            return Err(CommerceError::ValidationError(format!("negative price for {}", snapshot.product_id)));
        }
        Ok(Self {
            product_id: snapshot.product_id,
            name: snapshot.name.clone(),
            sku: snapshot.sku.clone(),
            image: snapshot.primary_image.clone(),
            quantity,
            unit_price: snapshot.price,
            line_total: snapshot.price * Decimal::from(quantity),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub amount: Decimal,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub transaction_id: String,
    pub gateway: String,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub amount: Decimal,
    pub reason: String,
    pub processed_at: DateTime<Utc>,
    pub processed_by: String,
}

/// Everything needed to build an order apart from its number.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub owner: Owner,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub shipping_method: ShippingMethod,
    pub payment_method: PaymentMethod,
    pub discount: Discount,
    pub currency: String,
    pub customer_note: Option<String>,
    pub placed_by: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    order_number: OrderNumber,
    owner: Owner,
    items: Vec<OrderItem>,
    subtotal: Decimal,
    shipping_cost: Decimal,
    tax: Decimal,
    discount: Discount,
    total_amount: Decimal,
    currency: String,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    payment: Option<PaymentDetails>,
    shipping_address: ShippingAddress,
    shipping_method: ShippingMethod,
    tracking_number: Option<String>,
    delivered_at: Option<DateTime<Utc>>,
    customer_note: Option<String>,
    status_history: Vec<StatusChange>,
    refunds: Vec<RefundRecord>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Result of applying a refund to an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefundOutcome {
    pub previous_status: OrderStatus,
    pub status_changed: bool,
}

impl Order {
    /// Builds a pending order and fixes its totals. This is the only place
    /// totals are computed.
    pub fn place(new: NewOrder, order_number: OrderNumber, pricing: &PricingPolicy, now: DateTime<Utc>) -> Result<Self> {
        if new.items.is_empty() {
            return Err(CommerceError::ValidationError("order has no items".into()));
        }
        if new.discount.amount < Decimal::ZERO {
            return Err(CommerceError::ValidationError("discount cannot be negative".into()));
        }

        let subtotal: Decimal = new.items.iter().map(|i| i.line_total).sum();
        let shipping_cost = match new.shipping_method {
            ShippingMethod::Pickup => Decimal::ZERO,
            _ => pricing.shipping_for(subtotal),
        };
        let tax = pricing.tax_for(subtotal);
        let total_amount = (subtotal + shipping_cost + tax - new.discount.amount).max(Decimal::ZERO);

        Ok(Self {
            id: Uuid::now_v7(),
            order_number,
            owner: new.owner,
            items: new.items,
            subtotal,
            shipping_cost,
            tax,
            discount: new.discount,
            total_amount,
            currency: new.currency,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: new.payment_method,
            payment: None,
            shipping_address: new.shipping_address,
            shipping_method: new.shipping_method,
            tracking_number: None,
            delivered_at: None,
            customer_note: new.customer_note,
            status_history: vec![StatusChange {
                status: OrderStatus::Pending,
                timestamp: now,
                actor: new.placed_by,
                note: Some("Order placed".into()),
            }],
            refunds: vec![],
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &OrderNumber { &self.order_number }
    pub fn owner(&self) -> &Owner { &self.owner }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn subtotal(&self) -> Decimal { self.subtotal }
    pub fn shipping_cost(&self) -> Decimal { self.shipping_cost }
    pub fn tax(&self) -> Decimal { self.tax }
    pub fn discount(&self) -> &Discount { &self.discount }
    pub fn total_amount(&self) -> Decimal { self.total_amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn payment(&self) -> Option<&PaymentDetails> { self.payment.as_ref() }
    pub fn shipping_address(&self) -> &ShippingAddress { &self.shipping_address }
    pub fn shipping_method(&self) -> ShippingMethod { self.shipping_method }
    pub fn tracking_number(&self) -> Option<&str> { self.tracking_number.as_deref() }
    pub fn delivered_at(&self) -> Option<DateTime<Utc>> { self.delivered_at }
    pub fn customer_note(&self) -> Option<&str> { self.customer_note.as_deref() }
    pub fn status_history(&self) -> &[StatusChange] { &self.status_history }
    pub fn refunds(&self) -> &[RefundRecord] { &self.refunds }
    pub fn version(&self) -> u64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn customer_email(&self) -> &str {
        match &self.owner {
            Owner::Guest(email) => email.as_str(),
            Owner::Registered(_) => &self.shipping_address.email,
        }
    }

    pub fn customer_name(&self) -> String {
        format!("{} {}", self.shipping_address.first_name, self.shipping_address.last_name)
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 { (now - self.created_at).num_days() }

    pub fn can_be_cancelled(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn can_be_returned(&self, now: DateTime<Utc>, window_days: i64) -> bool {
        self.status == OrderStatus::Delivered && self.days_since_delivery(now).is_some_and(|d| d <= window_days)
    }

    fn days_since_delivery(&self, now: DateTime<Utc>) -> Option<i64> {
        self.delivered_at.map(|at| (now - at).num_days())
    }

    pub fn refunded_amount(&self) -> Decimal { self.refunds.iter().map(|r| r.amount).sum() }

    /// What can still be refunded; zero unless payment has been captured.
    pub fn refundable_amount(&self) -> Decimal {
        match self.payment_status {
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded => {
                (self.total_amount - self.refunded_amount()).max(Decimal::ZERO)
            }
            _ => Decimal::ZERO,
        }
    }

    /// Moves the order along the lifecycle graph. Fails without touching the
    /// order when the edge does not exist or the return window has passed.
    pub fn transition(
        &mut self,
        to: OrderStatus,
        actor: &str,
        note: Option<String>,
        now: DateTime<Utc>,
        return_window_days: i64,
    ) -> Result<StockEffect> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(CommerceError::InvalidTransition { from: from.to_string(), to: to.to_string() });
        }
        if to == OrderStatus::Refunded {
            let days = self.days_since_delivery(now).unwrap_or(i64::MAX);
            if days > return_window_days {
                return Err(CommerceError::ReturnWindowExpired { days_since_delivery: days, window_days: return_window_days });
            }
        }
        if to == OrderStatus::Delivered {
            self.delivered_at = Some(now);
        }
        self.record_status(to, actor, note, now);
        Ok(StockEffect::between(from, to))
    }

    pub fn cancel(&mut self, reason: Option<String>, actor: &str, now: DateTime<Utc>) -> Result<StockEffect> {
        if !self.can_be_cancelled() {
            return Err(CommerceError::InvalidTransition {
                from: self.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }
        self.transition(OrderStatus::Cancelled, actor, reason, now, 0)
    }

    pub fn ship(&mut self, tracking_number: Option<String>, actor: &str, now: DateTime<Utc>) -> Result<StockEffect> {
        let effect = self.transition(OrderStatus::Shipped, actor, None, now, 0)?;
        self.tracking_number = tracking_number;
        Ok(effect)
    }

    pub fn record_payment(&mut self, details: PaymentDetails, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.payment_status, PaymentStatus::Pending | PaymentStatus::Failed) || self.status.is_terminal() {
            return Err(CommerceError::InvalidTransition {
                from: self.payment_status.to_string(),
                to: PaymentStatus::Paid.to_string(),
            });
        }
        self.payment_status = PaymentStatus::Paid;
        self.payment = Some(PaymentDetails { paid_at: details.paid_at.or(Some(now)), ..details });
        self.touch(now);
        Ok(())
    }

    pub fn record_payment_failure(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.payment_status != PaymentStatus::Pending {
            return Err(CommerceError::InvalidTransition {
                from: self.payment_status.to_string(),
                to: PaymentStatus::Failed.to_string(),
            });
        }
        self.payment_status = PaymentStatus::Failed;
        self.touch(now);
        Ok(())
    }

    /// Applies one refund. The running total may never exceed the order total.
    /// Reaching the total marks the payment refunded and, unless the order is
    /// already terminal, moves it to `refunded`.
    pub fn apply_refund(&mut self, amount: Decimal, reason: &str, actor: &str, now: DateTime<Utc>) -> Result<RefundOutcome> {
        let refundable = self.refundable_amount();
        if amount <= Decimal::ZERO || amount > refundable {
            return Err(CommerceError::RefundExceedsTotal { requested: amount, refundable });
        }

        self.refunds.push(RefundRecord {
            amount,
            reason: reason.to_string(),
            processed_at: now,
            processed_by: actor.to_string(),
        });

        let previous_status = self.status;
        let mut status_changed = false;
        if self.refunded_amount() >= self.total_amount {
            self.payment_status = PaymentStatus::Refunded;
            if !self.status.is_terminal() {
                self.record_status(OrderStatus::Refunded, actor, Some(reason.to_string()), now);
                status_changed = true;
            }
        } else {
            self.payment_status = PaymentStatus::PartiallyRefunded;
        }
        self.touch(now);
        Ok(RefundOutcome { previous_status, status_changed })
    }

    fn record_status(&mut self, status: OrderStatus, actor: &str, note: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.status_history.push(StatusChange { status, timestamp: now, actor: actor.to_string(), note });
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}
