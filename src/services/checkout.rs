//! Checkout validation: reconciles client-held cart lines against the ledger.
//!
//! Missing or out-of-stock products block checkout. A short quantity or a
//! changed price is corrected in the reconciled lines and reported.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{CartLine, ProductSnapshot};
use crate::services::stock::{AvailabilityQuery, StockLedger};
use crate::Result;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutIssue {
    Unavailable { product_id: Uuid, product_name: String },
    OutOfStock { product_id: Uuid, product_name: String },
    QuantityAdjusted { product_id: Uuid, product_name: String, from: u32, to: u32 },
    PriceChanged { product_id: Uuid, product_name: String, from: Decimal, to: Decimal },
}

impl CheckoutIssue {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::OutOfStock { .. })
    }

    pub fn product_id(&self) -> Uuid {
        match self {
            Self::Unavailable { product_id, .. }
            | Self::OutOfStock { product_id, .. }
            | Self::QuantityAdjusted { product_id, .. }
            | Self::PriceChanged { product_id, .. } => *product_id,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Unavailable { product_name, .. } => format!("{product_name} is no longer available"),
            Self::OutOfStock { product_name, .. } => format!("{product_name} is out of stock"),
            Self::QuantityAdjusted { product_name, from, to, .. } => {
                format!("{product_name}: quantity adjusted from {from} to {to}")
            }
            Self::PriceChanged { product_name, from, to, .. } => {
                format!("{product_name}: price updated from {from} to {to}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckoutValidation {
    pub valid: bool,
    pub issues: Vec<CheckoutIssue>,
    pub reconciled_lines: Vec<CartLine>,
}

impl CheckoutValidation {
    pub fn blocking_issues(&self) -> impl Iterator<Item = &CheckoutIssue> {
        self.issues.iter().filter(|i| i.is_blocking())
    }

    pub fn advisory_issues(&self) -> impl Iterator<Item = &CheckoutIssue> {
        self.issues.iter().filter(|i| !i.is_blocking())
    }
}

#[derive(Clone)]
pub struct CheckoutValidator {
    ledger: StockLedger,
}

impl CheckoutValidator {
    pub fn new(ledger: StockLedger) -> Self { Self { ledger } }

    /// Re-reads every product; the availability flags cached in the cart
    /// snapshots are never consulted.
    pub async fn validate(&self, lines: &[CartLine]) -> Result<CheckoutValidation> {
        if lines.is_empty() {
            return Ok(CheckoutValidation { valid: true, issues: vec![], reconciled_lines: vec![] });
        }

        let queries: Vec<AvailabilityQuery> = lines
            .iter()
            .map(|l| AvailabilityQuery { product_id: l.product_id(), quantity: l.quantity })
            .collect();
        let live = self.ledger.lookup(&queries).await?;

        let mut issues = Vec::new();
        let mut reconciled_lines = Vec::with_capacity(lines.len());

        for (line, (check, product)) in lines.iter().zip(live) {
            let product_id = line.product_id();
            let product_name = line.product.name.clone();

            let Some(product) = product.filter(|_| check.listed) else {
                issues.push(CheckoutIssue::Unavailable { product_id, product_name });
                continue;
            };
            if check.available_quantity == 0 {
                issues.push(CheckoutIssue::OutOfStock { product_id, product_name });
                continue;
            }

            let mut quantity = line.quantity;
            if line.quantity > check.available_quantity {
                quantity = check.available_quantity;
                issues.push(CheckoutIssue::QuantityAdjusted {
                    product_id,
                    product_name: product_name.clone(),
                    from: line.quantity,
                    to: check.available_quantity,
                });
            }
            if product.price != line.product.price {
                issues.push(CheckoutIssue::PriceChanged { product_id, product_name, from: line.product.price, to: product.price });
            }
            // Catalog fields always come from the ledger, never from the client's snapshot.
            reconciled_lines.push(CartLine { product: ProductSnapshot::from(&product), quantity, added_at: line.added_at });
        }

        let valid = !issues.iter().any(CheckoutIssue::is_blocking);
        tracing::debug!(lines = lines.len(), issues = issues.len(), valid, "cart validated");
        Ok(CheckoutValidation { valid, issues, reconciled_lines })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Cart, Product, StockLevel};
    use crate::domain::value_objects::Sku;
    use crate::events::EventBus;
    use crate::store::{MemoryStore, Store};
    use std::sync::Arc;

    fn product(sku: &str, price: i64, quantity: u32) -> Product {
        Product::create(Sku::new(sku).unwrap(), format!("Item {sku}"), Decimal::from(price), StockLevel::new(quantity, 0))
    }

    fn validator(store: Arc<MemoryStore>) -> CheckoutValidator {
        CheckoutValidator::new(StockLedger::new(store, EventBus::disabled()))
    }

    #[tokio::test]
    async fn test_advisory_issues_reconcile_without_blocking() {
        let mut pendant = product("PND-1", 1_000, 5);
        let mut cart = Cart::new();
        cart.add(&pendant, 2).unwrap();

        pendant.price = Decimal::from(1_200);
        pendant.stock.reserve(4).unwrap();
        let store = Arc::new(MemoryStore::with_products([pendant.clone()]));

        let result = validator(store).validate(cart.lines()).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.issues, vec![
            CheckoutIssue::QuantityAdjusted { product_id: pendant.id, product_name: "Item PND-1".into(), from: 2, to: 1 },
            CheckoutIssue::PriceChanged { product_id: pendant.id, product_name: "Item PND-1".into(), from: Decimal::from(1_000), to: Decimal::from(1_200) },
        ]);
        let line = &result.reconciled_lines[0];
        assert_eq!((line.quantity, line.product.price), (1, Decimal::from(1_200)));
        assert_eq!(result.advisory_issues().count(), 2);
    }

    #[tokio::test]
    async fn test_blocking_issues() {
        let gone = product("GON-1", 500, 5);
        let sold_out = product("OUT-1", 500, 5);
        let fine = product("OK-1", 500, 5);
        let mut cart = Cart::new();
        for p in [&gone, &sold_out, &fine] {
            cart.add(p, 1).unwrap();
        }

        let mut drained = sold_out.clone();
        drained.stock.reserve(5).unwrap();
        let store = Arc::new(MemoryStore::with_products([drained, fine.clone()]));

        let result = validator(store).validate(cart.lines()).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.blocking_issues().count(), 2);
        assert!(matches!(result.issues[0], CheckoutIssue::Unavailable { product_id, .. } if product_id == gone.id));
        assert!(matches!(result.issues[1], CheckoutIssue::OutOfStock { product_id, .. } if product_id == sold_out.id));
        assert_eq!(result.reconciled_lines.len(), 1);
        assert_eq!(result.reconciled_lines[0].product_id(), fine.id);
    }

    #[tokio::test]
    async fn test_deactivated_product_is_unavailable() {
        let mut earring = product("EAR-1", 500, 5);
        let mut cart = Cart::new();
        cart.add(&earring, 1).unwrap();
        earring.deactivate();
        let store = Arc::new(MemoryStore::new());
        store.upsert_product(&earring).await.unwrap();

        let result = validator(store).validate(cart.lines()).await.unwrap();
        assert!(matches!(result.issues.as_slice(), [CheckoutIssue::Unavailable { .. }]));
        assert!(result.issues[0].message().contains("no longer available"));
    }

    #[tokio::test]
    async fn test_reconciled_lines_carry_catalog_fields() {
        let mut tiara = product("TRA-1", 90_000, 3);
        tiara.primary_image = Some("https://cdn.example.com/tra-1.jpg".into());
        let mut cart = Cart::new();
        cart.add(&tiara, 1).unwrap();

        let mut lines = cart.lines().to_vec();
        lines[0].product.name = "Forged Diamond Tiara".into();
        lines[0].product.sku = Sku::new("FAKE-999").unwrap();
        lines[0].product.primary_image = Some("https://attacker.example/x.jpg".into());
        let store = Arc::new(MemoryStore::with_products([tiara.clone()]));

        let result = validator(store).validate(&lines).await.unwrap();
        assert!(result.valid && result.issues.is_empty());
        let snapshot = &result.reconciled_lines[0].product;
        assert_eq!(snapshot.name, "Item TRA-1");
        assert_eq!(snapshot.sku, tiara.sku);
        assert_eq!(snapshot.primary_image, tiara.primary_image);
        assert_eq!(result.reconciled_lines[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_empty_cart_is_valid() {
        let result = validator(Arc::new(MemoryStore::new())).validate(&[]).await.unwrap();
        assert!(result.valid && result.issues.is_empty());
    }
}
