use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;
use crate::domain::aggregates::{Order, Product, StockLevel};
use crate::domain::value_objects::Sku;
use crate::store::{StockUpdate, Store};
use crate::{CommerceError, Result};

const PRODUCT_COLUMNS: &str = "id, sku, name, price, original_price, primary_image, active, \
     stock_quantity, stock_reserved, low_stock_threshold, discontinued, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    sku: String,
    name: String,
    price: Decimal,
    original_price: Option<Decimal>,
    primary_image: Option<String>,
    active: bool,
    stock_quantity: i32,
    stock_reserved: i32,
    low_stock_threshold: i32,
    discontinued: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = CommerceError;

    fn try_from(row: ProductRow) -> Result<Self> {
        let stock = StockLevel::restore(
            from_db(row.stock_quantity)?,
            from_db(row.stock_reserved)?,
            from_db(row.low_stock_threshold)?,
            row.discontinued,
        )
        .map_err(|e| CommerceError::ConsistencyViolation(format!("product {}: {e}", row.id)))?;
        Ok(Product {
            id: row.id,
            sku: Sku::new(row.sku)?,
            name: row.name,
            price: row.price,
            original_price: row.original_price,
            primary_image: row.primary_image,
            active: row.active,
            stock,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn from_db(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| CommerceError::Storage(format!("negative stock column value {value}")))
}

fn to_db(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| CommerceError::ValidationError(format!("quantity {value} out of range")))
}

/// Postgres-backed store. Stock changes are single conditional `UPDATE`s so
/// concurrent callers can never both win against the same units.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CommerceError::Storage(e.to_string()))
    }

    async fn conditional_stock_update(&self, sql: &str, id: Uuid, qty: u32) -> Result<StockUpdate> {
        let updated = sqlx::query_as::<_, ProductRow>(sql)
            .bind(id)
            .bind(to_db(qty)?)
            .fetch_optional(&self.pool)
            .await?;
        match updated {
            Some(row) => Ok(StockUpdate::Applied(row.try_into()?)),
            None => self.get_product(id).await?
                .map(StockUpdate::Rejected)
                .ok_or(CommerceError::ProductNotFound(id)),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Product::try_from)
            .transpose()
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (id, sku, name, price, original_price, primary_image, active, stock_quantity, stock_reserved, low_stock_threshold, discontinued, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET sku = $2, name = $3, price = $4, original_price = $5, primary_image = $6, active = $7, \
             stock_quantity = $8, stock_reserved = $9, low_stock_threshold = $10, discontinued = $11, updated_at = $13",
        )
        .bind(product.id)
        .bind(product.sku.as_str())
        .bind(&product.name)
        .bind(product.price)
        .bind(product.original_price)
        .bind(&product.primary_image)
        .bind(product.active)
        .bind(to_db(product.stock.quantity())?)
        .bind(to_db(product.stock.reserved())?)
        .bind(to_db(product.stock.low_stock_threshold())?)
        .bind(product.stock.is_discontinued())
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reserve_stock(&self, id: Uuid, qty: u32) -> Result<StockUpdate> {
        let sql = format!(
            "UPDATE products SET stock_reserved = stock_reserved + $2, updated_at = NOW() \
             WHERE id = $1 AND stock_quantity - stock_reserved >= $2 RETURNING {PRODUCT_COLUMNS}"
        );
        self.conditional_stock_update(&sql, id, qty).await
    }

    async fn release_stock(&self, id: Uuid, qty: u32) -> Result<StockUpdate> {
        let sql = format!(
            "UPDATE products SET stock_reserved = GREATEST(stock_reserved - $2, 0), updated_at = NOW() \
             WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        self.conditional_stock_update(&sql, id, qty).await
    }

    async fn commit_stock(&self, id: Uuid, qty: u32) -> Result<StockUpdate> {
        let sql = format!(
            "UPDATE products SET stock_quantity = stock_quantity - $2, \
             stock_reserved = LEAST(GREATEST(stock_reserved - $2, 0), stock_quantity - $2), updated_at = NOW() \
             WHERE id = $1 AND stock_quantity >= $2 RETURNING {PRODUCT_COLUMNS}"
        );
        self.conditional_stock_update(&sql, id, qty).await
    }

    async fn restock(&self, id: Uuid, qty: u32) -> Result<StockUpdate> {
        let sql = format!(
            "UPDATE products SET stock_quantity = stock_quantity + $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        self.conditional_stock_update(&sql, id, qty).await
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO orders (id, order_number, status, payment_status, version, document, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(order.id())
        .bind(order.order_number().as_str())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(version_to_db(order.version())?)
        .bind(Json(order))
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(CommerceError::Conflict(format!(
                "order number {} already exists",
                order.order_number()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        let document = sqlx::query_scalar::<_, Json<Order>>("SELECT document FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document.map(|Json(order)| order))
    }

    async fn find_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let document = sqlx::query_scalar::<_, Json<Order>>("SELECT document FROM orders WHERE order_number = $1")
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document.map(|Json(order)| order))
    }

    async fn update_order(&self, order: &Order, expected_version: u64) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE orders SET status = $3, payment_status = $4, version = $5, document = $6, updated_at = $7 \
             WHERE id = $1 AND version = $2",
        )
        .bind(order.id())
        .bind(version_to_db(expected_version)?)
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(version_to_db(order.version())?)
        .bind(Json(order))
        .bind(order.updated_at())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }
        match self.get_order(order.id()).await? {
            Some(current) => Err(CommerceError::Conflict(format!(
                "order {} is at version {}, expected {}",
                order.order_number(), current.version(), expected_version
            ))),
            None => Err(CommerceError::OrderNotFound(order.id().to_string())),
        }
    }

    async fn next_order_sequence(&self, day: NaiveDate) -> Result<u32> {
        let value: i32 = sqlx::query_scalar(
            "INSERT INTO order_sequences (day, last_value) VALUES ($1, 1) \
             ON CONFLICT (day) DO UPDATE SET last_value = order_sequences.last_value + 1 \
             RETURNING last_value",
        )
        .bind(day)
        .fetch_one(&self.pool)
        .await?;
        from_db(value)
    }
}

fn version_to_db(version: u64) -> Result<i64> {
    i64::try_from(version).map_err(|_| CommerceError::Storage(format!("order version {version} out of range")))
}
