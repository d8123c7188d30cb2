use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::payments::{CreatePaymentRequest, PaymentList, RefundPaymentRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Payment,
    response::ApiResponse,
    routes::params::PaymentListQuery,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_payment))
        .route("/", get(list_payments))
        .route("/{id}", get(get_payment))
        .route("/{id}/refund", post(refund_payment))
}

#[utoipa::path(
    post,
    path = "/api/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Create payment and dispatch to gateway", body = ApiResponse<Payment>),
        (status = 400, description = "Invalid amount or method"),
        (status = 404, description = "Order or customer not found"),
        (status = 409, description = "Order not payable, over- or underpayment"),
        (status = 502, description = "Gateway charge failed"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreatePaymentRequest>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let resp = payment_service::create_payment(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("order_id" = Option<Uuid>, Query, description = "Filter by order"),
        ("status" = Option<String>, Query, description = "Filter by status")
    ),
    responses(
        (status = 200, description = "List payments", body = ApiResponse<PaymentList>),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PaymentListQuery>,
) -> AppResult<Json<ApiResponse<PaymentList>>> {
    let resp = payment_service::list_payments(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Get payment", body = ApiResponse<Payment>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let resp = payment_service::get_payment(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/refund",
    params(("id" = Uuid, Path, description = "Payment ID")),
    request_body = RefundPaymentRequest,
    responses(
        (status = 200, description = "Refund payment (admin only)", body = ApiResponse<Payment>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Not refundable or refund exceeds payment"),
        (status = 502, description = "Gateway refund failed"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundPaymentRequest>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let resp = payment_service::refund_payment(&state, &user, id, payload).await?;
    Ok(Json(resp))
}
