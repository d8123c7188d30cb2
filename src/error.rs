use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::response::{ApiResponse, Meta};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::NotFound(resource.into())
    }

    pub fn insufficient_stock(product_id: Uuid, requested: i32, available: i32) -> Self {
        AppError::Conflict(format!(
            "insufficient stock for product {product_id}: requested {requested}, available {available}"
        ))
    }

    pub fn inactive_product(product_id: Uuid) -> Self {
        AppError::Conflict(format!("product {product_id} is inactive"))
    }

    pub fn invalid_transition(from: &str, to: &str) -> Self {
        AppError::Conflict(format!("invalid order status transition {from} -> {to}"))
    }

    pub fn order_not_editable(status: &str) -> Self {
        AppError::Conflict(format!("order is not editable in status {status}"))
    }

    pub fn order_not_cancellable(status: &str) -> Self {
        AppError::Conflict(format!("order is not cancellable in status {status}"))
    }

    pub fn order_not_payable(status: &str) -> Self {
        AppError::Conflict(format!("order is not payable in status {status}"))
    }

    pub fn overpayment(amount: i64, remaining: i64) -> Self {
        AppError::Conflict(format!(
            "payment of {amount} exceeds remaining balance of {remaining}"
        ))
    }

    pub fn underpayment(amount: i64, remaining: i64) -> Self {
        AppError::Conflict(format!(
            "payment of {amount} does not cover remaining balance of {remaining}"
        ))
    }

    pub fn payment_not_refundable(status: &str) -> Self {
        AppError::Conflict(format!("payment is not refundable in status {status}"))
    }

    pub fn refund_exceeds_payment(refund: i64, amount: i64) -> Self {
        AppError::Conflict(format!(
            "refund of {refund} exceeds payment amount of {amount}"
        ))
    }

    pub fn duplicate(resource: &str, value: &str) -> Self {
        AppError::Conflict(format!("{resource} '{value}' already exists"))
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Gateway(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::DbError(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::OrmError(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = ApiResponse {
            message,
            data: Some(ErrorData {
                error: self.to_string(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
