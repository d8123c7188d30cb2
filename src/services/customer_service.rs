use chrono::Utc;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::customers::{CustomerList, UpdateCustomerRequest},
    entity::customers::{
        ActiveModel as CustomerActive, Column as CustomerCol, Entity as Customers,
        Model as CustomerModel,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Customer,
    response::{ApiResponse, Meta},
    routes::params::CustomerListQuery,
    state::AppState,
};

pub async fn list_customers(
    state: &AppState,
    user: &AuthUser,
    query: CustomerListQuery,
) -> AppResult<ApiResponse<CustomerList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(CustomerCol::FirstName).ilike(pattern.clone()))
                .add(Expr::col(CustomerCol::LastName).ilike(pattern)),
        );
    }
    if let Some(vip) = query.vip {
        condition = condition.add(CustomerCol::Vip.eq(vip));
    }
    if let Some(active) = query.active {
        condition = condition.add(CustomerCol::Active.eq(active));
    }

    let finder = Customers::find()
        .filter(condition)
        .order_by_desc(CustomerCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(customer_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Customers",
        CustomerList { items },
        Some(meta),
    ))
}

pub async fn get_customer(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Customer>> {
    let customer = Customers::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("customer"))?;

    if !user.is_admin() && customer.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    Ok(ApiResponse::success(
        "Customer",
        customer_from_entity(customer),
        Some(Meta::empty()),
    ))
}

pub async fn get_own_profile(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Customer>> {
    let customer = find_by_user_id(state, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("customer profile"))?;
    Ok(ApiResponse::success(
        "Customer",
        customer_from_entity(customer),
        Some(Meta::empty()),
    ))
}

pub async fn update_customer(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCustomerRequest,
) -> AppResult<ApiResponse<Customer>> {
    let existing = Customers::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("customer"))?;

    let is_owner = existing.user_id == user.user_id;
    if !user.is_admin() && !is_owner {
        return Err(AppError::Forbidden);
    }
    // Credit, loyalty, VIP and active are back-office attributes.
    let touches_admin_fields = payload.credit_limit.is_some()
        || payload.loyalty_points.is_some()
        || payload.vip.is_some()
        || payload.active.is_some();
    if touches_admin_fields && !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    if let Some(limit) = payload.credit_limit
        && limit < 0
    {
        return Err(AppError::BadRequest("credit limit must not be negative".into()));
    }

    let mut active: CustomerActive = existing.into();
    if let Some(first_name) = payload.first_name {
        active.first_name = Set(first_name);
    }
    if let Some(last_name) = payload.last_name {
        active.last_name = Set(last_name);
    }
    if let Some(phone) = payload.phone {
        active.phone = Set(Some(phone));
    }
    if let Some(shipping_address) = payload.shipping_address {
        active.shipping_address = Set(Some(shipping_address));
    }
    if let Some(billing_address) = payload.billing_address {
        active.billing_address = Set(Some(billing_address));
    }
    if let Some(preferences) = payload.preferences {
        active.preferences = Set(Some(preferences));
    }
    if let Some(credit_limit) = payload.credit_limit {
        active.credit_limit = Set(credit_limit);
    }
    if let Some(loyalty_points) = payload.loyalty_points {
        active.loyalty_points = Set(loyalty_points);
    }
    if let Some(vip) = payload.vip {
        active.vip = Set(vip);
    }
    if let Some(is_active) = payload.active {
        active.active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());
    let customer = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "customer_update",
        Some("customers"),
        Some(serde_json::json!({ "customer_id": customer.id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Customer updated",
        customer_from_entity(customer),
        Some(Meta::empty()),
    ))
}

/// Soft deactivation; customer rows referenced by orders are never deleted.
pub async fn deactivate_customer(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Customer>> {
    ensure_admin(user)?;
    let existing = Customers::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("customer"))?;

    let mut active: CustomerActive = existing.into();
    active.active = Set(false);
    active.updated_at = Set(Utc::now().into());
    let customer = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "customer_deactivate",
        Some("customers"),
        Some(serde_json::json!({ "customer_id": customer.id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Customer deactivated",
        customer_from_entity(customer),
        Some(Meta::empty()),
    ))
}

/// Create the empty profile that backs a freshly registered customer user.
pub async fn create_profile(
    state: &AppState,
    user_id: Uuid,
    first_name: String,
    last_name: String,
) -> AppResult<CustomerModel> {
    let profile = CustomerActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        first_name: Set(first_name),
        last_name: Set(last_name),
        phone: Set(None),
        shipping_address: Set(None),
        billing_address: Set(None),
        preferences: Set(None),
        credit_limit: Set(0),
        loyalty_points: Set(0),
        vip: Set(false),
        active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(profile)
}

pub async fn find_by_user_id(
    state: &AppState,
    user_id: Uuid,
) -> AppResult<Option<CustomerModel>> {
    Ok(Customers::find()
        .filter(CustomerCol::UserId.eq(user_id))
        .one(&state.orm)
        .await?)
}

pub fn customer_from_entity(model: CustomerModel) -> Customer {
    Customer {
        id: model.id,
        user_id: model.user_id,
        first_name: model.first_name,
        last_name: model.last_name,
        phone: model.phone,
        shipping_address: model.shipping_address,
        billing_address: model.billing_address,
        preferences: model.preferences,
        credit_limit: model.credit_limit,
        loyalty_points: model.loyalty_points,
        vip: model.vip,
        active: model.active,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
