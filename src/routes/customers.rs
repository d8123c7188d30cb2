use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, put},
};
use uuid::Uuid;

use crate::{
    dto::customers::{CustomerList, UpdateCustomerRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Customer,
    response::ApiResponse,
    routes::params::CustomerListQuery,
    services::customer_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_customers))
        .route("/me", get(get_own_profile))
        .route("/{id}", get(get_customer))
        .route("/{id}", put(update_customer))
        .route("/{id}", delete(deactivate_customer))
}

#[utoipa::path(
    get,
    path = "/api/customers",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("q" = Option<String>, Query, description = "Search in first/last name"),
        ("vip" = Option<bool>, Query, description = "Filter by VIP flag"),
        ("active" = Option<bool>, Query, description = "Filter by active flag")
    ),
    responses(
        (status = 200, description = "List customers (admin only)", body = ApiResponse<CustomerList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Customers"
)]
pub async fn list_customers(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CustomerListQuery>,
) -> AppResult<Json<ApiResponse<CustomerList>>> {
    let resp = customer_service::list_customers(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/customers/me",
    responses(
        (status = 200, description = "Own customer profile", body = ApiResponse<Customer>),
        (status = 404, description = "No profile"),
    ),
    security(("bearer_auth" = [])),
    tag = "Customers"
)]
pub async fn get_own_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<Customer>>> {
    let resp = customer_service::get_own_profile(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/customers/{id}",
    params(("id" = Uuid, Path, description = "Customer ID")),
    responses(
        (status = 200, description = "Get customer", body = ApiResponse<Customer>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Customers"
)]
pub async fn get_customer(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Customer>>> {
    let resp = customer_service::get_customer(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/customers/{id}",
    params(("id" = Uuid, Path, description = "Customer ID")),
    request_body = UpdateCustomerRequest,
    responses(
        (status = 200, description = "Update customer", body = ApiResponse<Customer>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Customers"
)]
pub async fn update_customer(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCustomerRequest>,
) -> AppResult<Json<ApiResponse<Customer>>> {
    let resp = customer_service::update_customer(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/customers/{id}",
    params(("id" = Uuid, Path, description = "Customer ID")),
    responses(
        (status = 200, description = "Deactivate customer (admin only)", body = ApiResponse<Customer>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Customers"
)]
pub async fn deactivate_customer(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Customer>>> {
    let resp = customer_service::deactivate_customer(&state, &user, id).await?;
    Ok(Json(resp))
}
