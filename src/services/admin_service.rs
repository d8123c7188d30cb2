use sea_orm::{EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait};
use sea_orm::ColumnTrait;
use uuid::Uuid;

use crate::{
    audit,
    dto::products::ProductList,
    entity::products::{Column as ProdCol, Entity as Products},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    routes::admin::{InventoryAdjustRequest, LowStockQuery},
    services::{inventory, product_service::product_from_entity},
    state::AppState,
};

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(5);
    let (page, limit, offset) = query.pagination.normalize();

    let finder = Products::find()
        .filter(ProdCol::Stock.lte(threshold))
        .filter(ProdCol::Active.eq(true))
        .order_by_asc(ProdCol::Stock)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    let data = ProductList { items };
    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Low stock", data, Some(meta)))
}

/// Manual stock correction through the inventory ledger.
pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let txn = state.orm.begin().await?;
    let updated = inventory::adjust(&txn, id, payload.delta).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "inventory_adjust",
        Some("products"),
        Some(serde_json::json!({ "product_id": updated.id, "delta": payload.delta })),
    )
    .await;

    Ok(ApiResponse::success(
        "Inventory updated",
        product_from_entity(updated),
        Some(Meta::empty()),
    ))
}
