//! Order lifecycle: creation with all-or-nothing reservation, status
//! transitions with their stock effects, cancellation and payment capture.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{
    Cart, CartLine, Discount, NewOrder, Order, OrderItem, OrderStatus, Owner, PaymentDetails, PaymentMethod, PricingPolicy,
    ProductSnapshot, ShippingAddress, ShippingMethod, StockEffect,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::OrderNumber;
use crate::events::EventBus;
use crate::services::checkout::{CheckoutIssue, CheckoutValidator};
use crate::services::stock::StockLedger;
use crate::store::Store;
use crate::{CommerceError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderSettings {
    pub currency: String,
    pub return_window_days: i64,
    pub order_number_prefix: String,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self { currency: "NGN".into(), return_window_days: 30, order_number_prefix: "TA".into() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct OrderLine {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: u32,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CreateOrder {
    pub owner: Owner,
    #[validate(length(min = 1))]
    pub items: Vec<OrderLine>,
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub discount: Option<Discount>,
    #[serde(default)]
    pub customer_note: Option<String>,
}

impl CreateOrder {
    fn validate_all(&self) -> Result<()> {
        self.validate()?;
        self.shipping_address.validate()?;
        for line in &self.items {
            line.validate()?;
        }
        Ok(())
    }

    /// Folds repeated product ids into one line, keeping first-seen order.
    fn merged_lines(&self) -> Vec<(Uuid, u32)> {
        let mut lines: Vec<(Uuid, u32)> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match lines.iter_mut().find(|(id, _)| *id == item.product_id) {
                Some((_, qty)) => *qty = qty.saturating_add(item.quantity),
                None => lines.push((item.product_id, item.quantity)),
            }
        }
        lines
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub owner: Owner,
    #[validate(length(min = 1))]
    pub lines: Vec<CartLine>,
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub customer_note: Option<String>,
}

/// A placed order plus the advisory corrections applied on the way.
#[derive(Clone, Debug, Serialize)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub adjustments: Vec<CheckoutIssue>,
}

/// Looks an order up by id, falling back to its order number.
pub(crate) async fn load_order(store: &dyn Store, reference: &str) -> Result<Order> {
    let found = match Uuid::parse_str(reference) {
        Ok(id) => store.get_order(id).await?,
        Err(_) => store.find_order_by_number(reference).await?,
    };
    found.ok_or_else(|| CommerceError::OrderNotFound(reference.to_string()))
}

fn owner_label(owner: &Owner) -> String {
    match owner {
        Owner::Registered(id) => id.to_string(),
        Owner::Guest(email) => email.to_string(),
    }
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    ledger: StockLedger,
    validator: CheckoutValidator,
    events: EventBus,
    pricing: PricingPolicy,
    settings: OrderSettings,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, events: EventBus, pricing: PricingPolicy, settings: OrderSettings) -> Self {
        let ledger = StockLedger::new(store.clone(), events.clone());
        let validator = CheckoutValidator::new(ledger.clone());
        Self { store, ledger, validator, events, pricing, settings }
    }

    pub fn ledger(&self) -> &StockLedger { &self.ledger }
    pub fn validator(&self) -> &CheckoutValidator { &self.validator }
    pub fn pricing(&self) -> &PricingPolicy { &self.pricing }
    pub fn settings(&self) -> &OrderSettings { &self.settings }

    pub async fn get_order(&self, reference: &str) -> Result<Order> {
        load_order(self.store.as_ref(), reference).await
    }

    /// Prices every line from the ledger, reserves all of it, then persists a
    /// pending order.
    pub async fn create_order(&self, request: CreateOrder) -> Result<Order> {
        request.validate_all()?;

        let mut items = Vec::with_capacity(request.items.len());
        for (product_id, quantity) in request.merged_lines() {
            let product = match self.ledger.product(product_id).await {
                Err(CommerceError::ProductNotFound(id)) => return Err(CommerceError::ProductUnavailable(id)),
                other => other?,
            };
            if !product.is_listed() {
                return Err(CommerceError::ProductUnavailable(product_id));
            }
            items.push(OrderItem::from_snapshot(&ProductSnapshot::from(&product), quantity)?);
        }

        let placed_by = owner_label(&request.owner);
        let new = NewOrder {
            owner: request.owner,
            items,
            shipping_address: request.shipping_address,
            shipping_method: request.shipping_method,
            payment_method: request.payment_method,
            discount: request.discount.unwrap_or_default(),
            currency: self.settings.currency.clone(),
            customer_note: request.customer_note,
            placed_by,
        };
        self.place(new).await
    }

    /// Validates the cart, aborts on blocking issues, and places the order
    /// from the reconciled lines.
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        request.validate()?;
        request.shipping_address.validate()?;

        let cart = Cart::from_lines(request.lines);
        let validation = self.validator.validate(cart.lines()).await?;
        if !validation.valid {
            let blocking: Vec<CheckoutIssue> = validation.blocking_issues().cloned().collect();
            tracing::info!(blocking = blocking.len(), "checkout blocked");
            return Err(CommerceError::CheckoutBlocked(blocking));
        }

        let items = validation
            .reconciled_lines
            .iter()
            .map(|line| OrderItem::from_snapshot(&line.product, line.quantity))
            .collect::<Result<Vec<_>>>()?;
        let adjustments: Vec<CheckoutIssue> = validation.advisory_issues().cloned().collect();

        let placed_by = owner_label(&request.owner);
        let order = self.place(NewOrder {
            owner: request.owner,
            items,
            shipping_address: request.shipping_address,
            shipping_method: request.shipping_method,
            payment_method: request.payment_method,
            discount: Discount::default(),
            currency: self.settings.currency.clone(),
            customer_note: request.customer_note,
            placed_by,
        }).await?;

        Ok(CheckoutReceipt { order, adjustments })
    }

    async fn place(&self, new: NewOrder) -> Result<Order> {
        let lines: Vec<(Uuid, u32)> = new.items.iter().map(|i| (i.product_id, i.quantity)).collect();
        self.ledger.reserve_all(&lines).await?;

        match self.persist_new(new).await {
            Ok(order) => {
                tracing::info!(
                    order_number = %order.order_number(),
                    total = %order.total_amount(),
                    items = order.items().len(),
                    "order placed"
                );
                self.events.publish(DomainEvent::Order(OrderEvent::Placed {
                    order_id: order.id(),
                    order_number: order.order_number().clone(),
                    total: order.total_amount(),
                })).await;
                Ok(order)
            }
            Err(e) => {
                tracing::warn!(error = %e, "order could not be persisted, releasing reservations");
                self.ledger.release_lines(&lines).await;
                Err(e)
            }
        }
    }

    async fn persist_new(&self, new: NewOrder) -> Result<Order> {
        let now = Utc::now();
        let day = now.date_naive();
        let sequence = self.store.next_order_sequence(day).await?;
        let number = OrderNumber::new(&self.settings.order_number_prefix, day, sequence);
        let order = Order::place(new, number, &self.pricing, now)?;
        self.store.insert_order(&order).await?;
        Ok(order)
    }

    pub async fn update_order_status(
        &self,
        reference: &str,
        status: OrderStatus,
        note: Option<String>,
        actor: &str,
        tracking_number: Option<String>,
    ) -> Result<Order> {
        let window = self.settings.return_window_days;
        self.transition(reference, actor, |order, now| match status {
            OrderStatus::Shipped => order.ship(tracking_number, actor, now),
            OrderStatus::Cancelled => order.cancel(note, actor, now),
            _ => order.transition(status, actor, note, now, window),
        })
        .await
    }

    pub async fn cancel_order(&self, reference: &str, reason: Option<String>, actor: &str) -> Result<Order> {
        self.transition(reference, actor, |order, now| order.cancel(reason, actor, now)).await
    }

    /// Loads, applies `change`, writes back only if nobody else wrote in
    /// between, and then applies the stock effect of the move.
    async fn transition<F>(&self, reference: &str, actor: &str, change: F) -> Result<Order>
    where
        F: FnOnce(&mut Order, chrono::DateTime<Utc>) -> Result<StockEffect>,
    {
        let mut order = load_order(self.store.as_ref(), reference).await?;
        let expected = order.version();
        let from = order.status();

        let effect = change(&mut order, Utc::now())?;
        self.store.update_order(&order, expected).await?;

        tracing::info!(order_number = %order.order_number(), %from, to = %order.status(), actor, "order status changed");
        self.events.publish(DomainEvent::Order(OrderEvent::StatusChanged {
            order_id: order.id(),
            from,
            to: order.status(),
            actor: actor.to_string(),
        })).await;

        if let Err(e) = self.ledger.apply_effect(effect, order.items()).await {
            tracing::error!(order_number = %order.order_number(), error = %e, "stock out of step with order");
            return Err(e);
        }
        Ok(order)
    }

    pub async fn record_payment(&self, reference: &str, details: PaymentDetails, actor: &str) -> Result<Order> {
        let mut order = load_order(self.store.as_ref(), reference).await?;
        let expected = order.version();
        order.record_payment(details, Utc::now())?;
        self.store.update_order(&order, expected).await?;
        tracing::info!(order_number = %order.order_number(), actor, "payment recorded");
        self.events.publish(DomainEvent::Order(OrderEvent::PaymentRecorded {
            order_id: order.id(),
            status: order.payment_status(),
        })).await;
        Ok(order)
    }

    pub async fn record_payment_failure(&self, reference: &str, actor: &str) -> Result<Order> {
        let mut order = load_order(self.store.as_ref(), reference).await?;
        let expected = order.version();
        order.record_payment_failure(Utc::now())?;
        self.store.update_order(&order, expected).await?;
        tracing::warn!(order_number = %order.order_number(), actor, "payment failed");
        self.events.publish(DomainEvent::Order(OrderEvent::PaymentRecorded {
            order_id: order.id(),
            status: order.payment_status(),
        })).await;
        Ok(order)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::aggregates::{PaymentStatus, Product, StockLevel};
    use crate::domain::value_objects::{Email, Sku};
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;
    use std::collections::HashSet;

    pub(crate) fn address() -> ShippingAddress {
        ShippingAddress {
            first_name: "Chioma".into(), last_name: "Eze".into(), email: "chioma@example.com".into(),
            phone: "08031234567".into(), street: "12 Allen Avenue".into(), city: "Ikeja".into(),
            state: "Lagos".into(), zip_code: "100271".into(), country: "Nigeria".into(),
        }
    }

    pub(crate) fn product(sku: &str, price: i64, quantity: u32) -> Product {
        Product::create(Sku::new(sku).unwrap(), format!("Item {sku}"), Decimal::from(price), StockLevel::new(quantity, 1))
    }

    pub(crate) fn service_with(products: Vec<Product>) -> (OrderService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_products(products));
        let service = OrderService::new(store.clone(), EventBus::disabled(), PricingPolicy::default(), OrderSettings::default());
        (service, store)
    }

    pub(crate) fn request(lines: &[(Uuid, u32)]) -> CreateOrder {
        CreateOrder {
            owner: Owner::Guest(Email::parse("guest@example.com").unwrap()),
            items: lines.iter().map(|&(product_id, quantity)| OrderLine { product_id, quantity }).collect(),
            shipping_address: address(),
            shipping_method: ShippingMethod::Standard,
            payment_method: PaymentMethod::Card,
            discount: None,
            customer_note: None,
        }
    }

    async fn stock_of(store: &MemoryStore, id: Uuid) -> StockLevel {
        store.get_product(id).await.unwrap().unwrap().stock
    }

    #[tokio::test]
    async fn test_create_order_reserves_and_prices_from_ledger() {
        let ring = product("RNG-1", 20_000, 10);
        let chain = product("CHN-1", 5_000, 10);
        let (service, store) = service_with(vec![ring.clone(), chain.clone()]);

        let order = service.create_order(request(&[(ring.id, 2), (chain.id, 1), (ring.id, 1)])).await.unwrap();
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.items()[0].quantity, 3);
        assert_eq!(order.subtotal(), Decimal::from(65_000));
        assert_eq!(order.shipping_cost(), Decimal::ZERO);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert!(order.order_number().as_str().starts_with("TA"));
        assert_eq!(stock_of(&store, ring.id).await.reserved(), 3);
        assert_eq!(stock_of(&store, chain.id).await.reserved(), 1);
    }

    #[tokio::test]
    async fn test_create_order_is_all_or_nothing() {
        let ring = product("RNG-1", 1_000, 10);
        let scarce = product("SCR-1", 1_000, 1);
        let (service, store) = service_with(vec![ring.clone(), scarce.clone()]);

        let err = service.create_order(request(&[(ring.id, 4), (scarce.id, 2)])).await.unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientStock { product_id, .. } if product_id == scarce.id));
        assert_eq!(stock_of(&store, ring.id).await.reserved(), 0);
        assert_eq!(stock_of(&store, scarce.id).await.reserved(), 0);
    }

    #[tokio::test]
    async fn test_create_order_validation() {
        let ring = product("RNG-1", 1_000, 10);
        let (service, _) = service_with(vec![ring.clone()]);

        assert!(matches!(service.create_order(request(&[])).await, Err(CommerceError::ValidationError(_))));
        assert!(matches!(service.create_order(request(&[(ring.id, 0)])).await, Err(CommerceError::ValidationError(_))));
        let mut bad_address = request(&[(ring.id, 1)]);
        bad_address.shipping_address.email = "nope".into();
        assert!(matches!(service.create_order(bad_address).await, Err(CommerceError::ValidationError(_))));
        assert!(matches!(
            service.create_order(request(&[(Uuid::new_v4(), 1)])).await,
            Err(CommerceError::ProductUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_confirm_commits_and_cancel_restocks() {
        let ring = product("RNG-1", 1_000, 10);
        let (service, store) = service_with(vec![ring.clone()]);
        let order = service.create_order(request(&[(ring.id, 3)])).await.unwrap();
        let number = order.order_number().to_string();

        service.update_order_status(&number, OrderStatus::Confirmed, None, "admin", None).await.unwrap();
        let stock = stock_of(&store, ring.id).await;
        assert_eq!((stock.quantity(), stock.reserved()), (7, 0));

        let cancelled = service.cancel_order(&order.id().to_string(), Some("customer request".into()), "admin").await.unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(stock_of(&store, ring.id).await.quantity(), 10);
        assert_eq!(cancelled.status_history().len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_pending_releases() {
        let ring = product("RNG-1", 1_000, 10);
        let (service, store) = service_with(vec![ring.clone()]);
        let order = service.create_order(request(&[(ring.id, 4)])).await.unwrap();
        service.cancel_order(&order.id().to_string(), None, "guest").await.unwrap();
        let stock = stock_of(&store, ring.id).await;
        assert_eq!((stock.quantity(), stock.reserved()), (10, 0));
    }

    #[tokio::test]
    async fn test_cannot_cancel_shipped_order() {
        let ring = product("RNG-1", 1_000, 10);
        let (service, store) = service_with(vec![ring.clone()]);
        let order = service.create_order(request(&[(ring.id, 1)])).await.unwrap();
        let id = order.id().to_string();
        for status in [OrderStatus::Confirmed, OrderStatus::Processing] {
            service.update_order_status(&id, status, None, "admin", None).await.unwrap();
        }
        let shipped = service.update_order_status(&id, OrderStatus::Shipped, None, "admin", Some("TRK-1".into())).await.unwrap();
        assert_eq!(shipped.tracking_number(), Some("TRK-1"));

        let before = store.get_order(order.id()).await.unwrap().unwrap();
        assert!(matches!(service.cancel_order(&id, None, "admin").await, Err(CommerceError::InvalidTransition { .. })));
        let after = store.get_order(order.id()).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_pending_cannot_be_delivered() {
        let ring = product("RNG-1", 1_000, 10);
        let (service, _) = service_with(vec![ring.clone()]);
        let order = service.create_order(request(&[(ring.id, 1)])).await.unwrap();
        let err = service
            .update_order_status(&order.id().to_string(), OrderStatus::Delivered, None, "admin", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let ring = product("RNG-1", 1_000, 10);
        let (service, store) = service_with(vec![ring.clone()]);
        let order = service.create_order(request(&[(ring.id, 1)])).await.unwrap();
        let stale = order.clone();
        service.update_order_status(&order.id().to_string(), OrderStatus::Confirmed, None, "admin", None).await.unwrap();
        assert!(matches!(store.update_order(&stale, stale.version()).await, Err(CommerceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_checkout_blocks_and_reconciles() {
        let mut ring = product("RNG-1", 1_000, 10);
        let gone = product("GON-1", 1_000, 10);
        let mut cart = Cart::new();
        cart.add(&ring, 4).unwrap();
        let (service, _) = service_with(vec![]);

        ring.price = Decimal::from(1_100);
        ring.stock.reserve(7).unwrap();
        service.store.upsert_product(&ring).await.unwrap();

        let checkout = |lines: Vec<CartLine>| CheckoutRequest {
            owner: Owner::Registered(Uuid::new_v4()),
            lines,
            shipping_address: address(),
            shipping_method: ShippingMethod::Pickup,
            payment_method: PaymentMethod::BankTransfer,
            customer_note: None,
        };

        let receipt = service.checkout(checkout(cart.lines().to_vec())).await.unwrap();
        assert_eq!(receipt.adjustments.len(), 2);
        assert_eq!(receipt.order.items()[0].quantity, 3);
        assert_eq!(receipt.order.items()[0].unit_price, Decimal::from(1_100));
        assert_eq!(receipt.order.shipping_cost(), Decimal::ZERO);
        assert_eq!(receipt.order.items()[0].name, ring.name);
        assert_eq!(receipt.order.items()[0].sku, ring.sku);

        let mut blocked_cart = Cart::new();
        blocked_cart.add(&gone, 1).unwrap();
        match service.checkout(checkout(blocked_cart.lines().to_vec())).await {
            Err(CommerceError::CheckoutBlocked(issues)) => assert!(matches!(issues.as_slice(), [CheckoutIssue::Unavailable { .. }])),
            other => panic!("expected blocked checkout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_checkout_ignores_client_catalog_fields() {
        let tiara = product("TRA-1", 90_000, 2);
        let (service, _) = service_with(vec![tiara.clone()]);
        let mut cart = Cart::new();
        cart.add(&tiara, 1).unwrap();

        let mut lines = cart.lines().to_vec();
        lines[0].product.name = "Forged Diamond Tiara".into();
        lines[0].product.sku = Sku::new("FAKE-999").unwrap();
        lines[0].product.primary_image = Some("https://attacker.example/x.jpg".into());

        let receipt = service
            .checkout(CheckoutRequest {
                owner: Owner::Guest(Email::parse("ada@example.com").unwrap()),
                lines,
                shipping_address: address(),
                shipping_method: ShippingMethod::Standard,
                payment_method: PaymentMethod::Card,
                customer_note: None,
            })
            .await
            .unwrap();

        assert!(receipt.adjustments.is_empty());
        let item = &receipt.order.items()[0];
        assert_eq!(item.name, tiara.name);
        assert_eq!(item.sku, tiara.sku);
        assert_eq!(item.image, None);
        assert_eq!(item.unit_price, tiara.price);
    }

    #[tokio::test]
    async fn test_payment_capture() {
        let ring = product("RNG-1", 1_000, 10);
        let (service, _) = service_with(vec![ring.clone()]);
        let order = service.create_order(request(&[(ring.id, 1)])).await.unwrap();
        let id = order.id().to_string();
        let details = PaymentDetails { transaction_id: "PSK-1".into(), gateway: "paystack".into(), paid_at: None };
        let paid = service.record_payment(&id, details.clone(), "webhook").await.unwrap();
        assert_eq!(paid.payment_status(), PaymentStatus::Paid);
        assert!(matches!(service.record_payment(&id, details, "webhook").await, Err(CommerceError::InvalidTransition { .. })));
        assert!(matches!(service.record_payment_failure(&id, "webhook").await, Err(CommerceError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let (service, _) = service_with(vec![]);
        assert!(matches!(service.get_order("TA20260101-001").await, Err(CommerceError::OrderNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_orders_get_distinct_numbers() {
        let ring = product("RNG-1", 1_000, 100);
        let (service, _) = service_with(vec![ring.clone()]);
        let service = Arc::new(service);
        let id = ring.id;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.create_order(request(&[(id, 1)])).await })
            })
            .collect();

        let mut numbers = HashSet::new();
        for handle in handles {
            let order = handle.await.unwrap().unwrap();
            assert!(numbers.insert(order.order_number().to_string()));
        }
        assert_eq!(numbers.len(), 20);
    }
}
