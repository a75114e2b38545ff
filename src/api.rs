//! HTTP surface over the commerce services.

use axum::{extract::{Path, State}, http::StatusCode, response::{IntoResponse, Response}, routing::{get, post, put}, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{Cart, CartLine, CartSummary, Order, OrderStatus, PaymentDetails, PricingPolicy, Product};
use crate::events::EventBus;
use crate::services::checkout::CheckoutValidation;
use crate::services::orders::{CheckoutReceipt, CheckoutRequest, CreateOrder, OrderService, OrderSettings};
use crate::services::refunds::{RefundProcessor, RefundRequest};
use crate::services::stock::{Availability, AvailabilityQuery};
use crate::store::Store;
use crate::{CommerceError, Result};

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub refunds: RefundProcessor,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, events: EventBus, pricing: PricingPolicy, settings: OrderSettings) -> Self {
        let orders = OrderService::new(store.clone(), events.clone(), pricing, settings);
        let refunds = RefundProcessor::new(store, orders.ledger().clone(), events);
        Self { orders, refunds }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "jewelry-commerce"})) }))
        .route("/api/v1/products/:id", get(get_product))
        .route("/api/v1/products/availability", post(check_availability))
        .route("/api/v1/cart/validate", post(validate_cart))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/status", put(update_status))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/payment", post(record_payment))
        .route("/api/v1/orders/:id/refund", post(process_refund))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl CommerceError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ProductNotFound(_) | Self::OrderNotFound(_) | Self::CartLineNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidQuantity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InsufficientStock { .. }
            | Self::ProductUnavailable(_)
            | Self::InvalidTransition { .. }
            | Self::ReturnWindowExpired { .. }
            | Self::RefundExceedsTotal { .. }
            | Self::CheckoutBlocked(_)
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ConsistencyViolation(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::ProductUnavailable(_) => "product_unavailable",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ReturnWindowExpired { .. } => "return_window_expired",
            Self::RefundExceedsTotal { .. } => "refund_exceeds_total",
            Self::ConsistencyViolation(_) => "consistency_violation",
            Self::ProductNotFound(_) | Self::OrderNotFound(_) | Self::CartLineNotFound(_) => "not_found",
            Self::CheckoutBlocked(_) => "checkout_blocked",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let mut body = json!({"error": self.code(), "message": self.to_string()});
        if let Self::CheckoutBlocked(issues) = &self {
            body["issues"] = json!(issues);
        }
        (status, Json(body)).into_response()
    }
}

fn default_actor() -> String { "system".to_string() }

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub items: Vec<AvailabilityQuery>,
}

#[derive(Debug, Deserialize)]
pub struct CartRequest {
    pub lines: Vec<CartLine>,
}

#[derive(Debug, Serialize)]
pub struct CartValidationResponse {
    #[serde(flatten)]
    pub validation: CheckoutValidation,
    pub summary: CartSummary,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default = "default_actor")]
    #[validate(length(min = 1))]
    pub actor: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[serde(default = "default_actor")]
    #[validate(length(min = 1))]
    pub actor: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentUpdate {
    Paid {
        transaction_id: String,
        gateway: String,
        #[serde(default)]
        paid_at: Option<DateTime<Utc>>,
        #[serde(default = "default_actor")]
        actor: String,
    },
    Failed {
        #[serde(default = "default_actor")]
        actor: String,
    },
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    s.orders.ledger().product(id).await.map(Json)
}

async fn check_availability(State(s): State<AppState>, Json(r): Json<AvailabilityRequest>) -> Result<Json<Vec<Availability>>> {
    s.orders.ledger().check_availability(&r.items).await.map(Json)
}

async fn validate_cart(State(s): State<AppState>, Json(r): Json<CartRequest>) -> Result<Json<CartValidationResponse>> {
    let mut cart = Cart::from_lines(r.lines);
    let validation = s.orders.validator().validate(cart.lines()).await?;
    cart.apply_validation(validation.reconciled_lines.clone());
    let summary = cart.summary(s.orders.pricing());
    Ok(Json(CartValidationResponse { validation, summary }))
}

async fn checkout(State(s): State<AppState>, Json(r): Json<CheckoutRequest>) -> Result<(StatusCode, Json<CheckoutReceipt>)> {
    let receipt = s.orders.checkout(r).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn create_order(State(s): State<AppState>, Json(r): Json<CreateOrder>) -> Result<(StatusCode, Json<Order>)> {
    let order = s.orders.create_order(r).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<String>) -> Result<Json<Order>> {
    s.orders.get_order(&id).await.map(Json)
}

async fn update_status(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<StatusUpdateRequest>) -> Result<Json<Order>> {
    r.validate()?;
    s.orders.update_order_status(&id, r.status, r.note, &r.actor, r.tracking_number).await.map(Json)
}

async fn cancel_order(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<CancelRequest>) -> Result<Json<Order>> {
    r.validate()?;
    s.orders.cancel_order(&id, r.reason, &r.actor).await.map(Json)
}

async fn record_payment(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<PaymentUpdate>) -> Result<Json<Order>> {
    match r {
        PaymentUpdate::Paid { transaction_id, gateway, paid_at, actor } => {
            let details = PaymentDetails { transaction_id, gateway, paid_at };
            s.orders.record_payment(&id, details, &actor).await
        }
        PaymentUpdate::Failed { actor } => s.orders.record_payment_failure(&id, &actor).await,
    }
    .map(Json)
}

async fn process_refund(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<RefundRequest>) -> Result<Json<Order>> {
    r.validate()?;
    s.refunds.process_refund(&id, r.amount, &r.reason, &r.processed_by).await.map(Json)
}
