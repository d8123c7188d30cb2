//! Stock mutations for the product ledger. Every operation runs inside the
//! caller's transaction and takes a row lock on the product before the
//! read-check-write, so concurrent reservations against the same product
//! serialize instead of overselling.

use sea_orm::sea_query::LockType;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, EntityTrait, QuerySelect};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    entity::products::{ActiveModel as ProductActive, Entity as Products, Model as ProductModel},
    error::{AppError, AppResult},
};

async fn load_locked(txn: &DatabaseTransaction, product_id: Uuid) -> AppResult<ProductModel> {
    Products::find_by_id(product_id)
        .lock(LockType::Update)
        .one(txn)
        .await?
        .ok_or_else(|| AppError::not_found("product"))
}

async fn store_stock(
    txn: &DatabaseTransaction,
    product: ProductModel,
    new_stock: i32,
) -> AppResult<ProductModel> {
    let mut active: ProductActive = product.into();
    active.stock = Set(new_stock);
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(txn).await?)
}

/// Commit `quantity` units of a product to an order. Fails without mutating
/// when the product is inactive or the stock would go negative.
pub async fn reserve(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<i32> {
    let product = load_locked(txn, product_id).await?;
    if !product.active {
        return Err(AppError::inactive_product(product_id));
    }
    if quantity > product.stock {
        return Err(AppError::insufficient_stock(
            product_id,
            quantity,
            product.stock,
        ));
    }
    let new_stock = product.stock - quantity;
    let updated = store_stock(txn, product, new_stock).await?;
    Ok(updated.stock)
}

/// Return previously reserved units, e.g. on cancellation. No upper bound:
/// the ledger trusts its callers to release at most what they reserved.
pub async fn release(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<i32> {
    let product = load_locked(txn, product_id).await?;
    let new_stock = product.stock + quantity;
    let updated = store_stock(txn, product, new_stock).await?;
    Ok(updated.stock)
}

/// Signed manual adjustment. Subtracting below zero is refused.
pub async fn adjust(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    delta: i32,
) -> AppResult<ProductModel> {
    let product = load_locked(txn, product_id).await?;
    let new_stock = product.stock + delta;
    if new_stock < 0 {
        return Err(AppError::insufficient_stock(
            product_id,
            -delta,
            product.stock,
        ));
    }
    store_stock(txn, product, new_stock).await
}
