use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseTransaction, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    domain::order::{OrderStatus, OrderTotals, generate_order_number},
    dto::orders::{
        CancelOrderRequest, CreateOrderRequest, OrderList, OrderWithItems, UpdateOrderRequest,
        UpdateOrderStatusRequest,
    },
    entity::{
        customers::{Entity as Customers, Model as CustomerModel},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        products::Entity as Products,
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderItem},
    notify::{Notification, kind},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{customer_service, inventory},
    state::AppState,
};

const ORDER_NUMBER_ATTEMPTS: usize = 4;

pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let customer = require_customer(state, payload.customer_id).await?;
    if !user.is_admin() && customer.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    if payload.items.is_empty() {
        return Err(AppError::BadRequest(
            "order must contain at least one item".into(),
        ));
    }
    if payload.shipping_address.trim().is_empty() || payload.billing_address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "shipping and billing addresses are required".into(),
        ));
    }

    let txn = state.orm.begin().await?;

    // Snapshot products under row locks; the same locks cover the stock
    // decrement below, so a failed reservation rolls back the whole order.
    struct Line {
        product_id: Uuid,
        product_name: String,
        quantity: i32,
        unit_price: i64,
        total_price: i64,
    }
    let mut lines: Vec<Line> = Vec::with_capacity(payload.items.len());
    let mut subtotal: i64 = 0;
    for item in &payload.items {
        if item.quantity <= 0 {
            return Err(AppError::BadRequest("quantity must be positive".into()));
        }
        let product = Products::find_by_id(item.product_id)
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::not_found("product"))?;
        if !product.active {
            return Err(AppError::inactive_product(product.id));
        }
        if item.quantity > product.stock {
            return Err(AppError::insufficient_stock(
                product.id,
                item.quantity,
                product.stock,
            ));
        }
        let total_price = product.price * i64::from(item.quantity);
        subtotal += total_price;
        lines.push(Line {
            product_id: product.id,
            product_name: product.name,
            quantity: item.quantity,
            unit_price: product.price,
            total_price,
        });
    }

    let totals = OrderTotals::from_subtotal(subtotal);

    // The column is unique; regenerate on the rare collision.
    let mut order_number = generate_order_number(Utc::now());
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let taken = Orders::find()
            .filter(OrderCol::OrderNumber.eq(order_number.clone()))
            .one(&txn)
            .await?
            .is_some();
        if !taken {
            break;
        }
        order_number = generate_order_number(Utc::now());
    }

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        order_number: Set(order_number),
        customer_id: Set(customer.id),
        status: Set(OrderStatus::Pending.as_str().into()),
        subtotal: Set(totals.subtotal),
        tax: Set(totals.tax),
        shipping: Set(totals.shipping),
        discount: Set(totals.discount),
        total_amount: Set(totals.total),
        shipping_address: Set(payload.shipping_address),
        billing_address: Set(payload.billing_address),
        notes: Set(payload.notes),
        expected_delivery_date: Set(None),
        delivered_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::with_capacity(lines.len());
    for line in &lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            product_name: Set(line.product_name.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            total_price: Set(line.total_price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(order_item_from_entity(item));

        inventory::reserve(&txn, line.product_id, line.quantity).await?;
    }

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_create",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "order_number": order.order_number })),
    )
    .await;

    let event = serde_json::json!({
        "order_id": order.id,
        "order_number": order.order_number,
        "customer_id": order.customer_id,
        "total_amount": order.total_amount,
        "items": items
            .iter()
            .map(|i| serde_json::json!({ "product_id": i.product_id, "quantity": i.quantity }))
            .collect::<Vec<_>>(),
    });
    state
        .notifier
        .notify(Notification::customer(customer.user_id, kind::ORDER_CREATED, event.clone()));
    state
        .notifier
        .notify(Notification::admins(kind::ADMIN_ORDER_PLACED, event));

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if user.is_admin() {
        if let Some(customer_id) = query.customer_id {
            condition = condition.add(OrderCol::CustomerId.eq(customer_id));
        }
    } else {
        let own = customer_service::find_by_user_id(state, user.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("customer profile"))?;
        if let Some(customer_id) = query.customer_id
            && customer_id != own.id
        {
            return Err(AppError::Forbidden);
        }
        condition = condition.add(OrderCol::CustomerId.eq(own.id));
    }

    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = OrderStatus::parse(status)
            .ok_or_else(|| AppError::BadRequest(format!("unknown order status '{status}'")))?;
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }
    if let Some(start) = query.start_date {
        condition = condition.add(OrderCol::CreatedAt.gte(start));
    }
    if let Some(end) = query.end_date {
        condition = condition.add(OrderCol::CreatedAt.lte(end));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("order"))?;
    ensure_order_access(state, user, &order).await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Order",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Address, notes and expected-delivery changes; pending orders only.
pub async fn update_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderRequest,
) -> AppResult<ApiResponse<Order>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("order"))?;
    ensure_order_access(state, user, &order).await?;

    let status = parse_stored_status(&order.status)?;
    if status != OrderStatus::Pending {
        return Err(AppError::order_not_editable(status.as_str()));
    }

    let mut active: OrderActive = order.into();
    if let Some(shipping_address) = payload.shipping_address {
        active.shipping_address = Set(shipping_address);
    }
    if let Some(billing_address) = payload.billing_address {
        active.billing_address = Set(billing_address);
    }
    if let Some(notes) = payload.notes {
        active.notes = Set(Some(notes));
    }
    if let Some(expected) = payload.expected_delivery_date {
        active.expected_delivery_date = Set(Some(expected));
    }
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

/// Drive the status state machine. Transitions to `cancelled` go through the
/// same stock-release path as an explicit cancel.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let next = OrderStatus::parse(&payload.status).ok_or_else(|| {
        AppError::BadRequest(format!("unknown order status '{}'", payload.status))
    })?;

    let txn = state.orm.begin().await?;
    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("order"))?;
    let current = parse_stored_status(&order.status)?;
    if !current.can_transition(next) {
        return Err(AppError::invalid_transition(current.as_str(), next.as_str()));
    }

    if next == OrderStatus::Cancelled {
        release_order_stock(&txn, order.id).await?;
    }

    let mut active: OrderActive = order.into();
    active.status = Set(next.as_str().into());
    if next == OrderStatus::Delivered {
        active.delivered_at = Set(Some(Utc::now().into()));
    }
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;
    txn.commit().await?;

    notify_status_change(state, &order, current, next).await;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": order.status })),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

/// Cancel from pending/confirmed, fold the reason into the notes, and return
/// the reserved stock to the ledger.
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: CancelOrderRequest,
) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;
    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("order"))?;
    ensure_order_access(state, user, &order).await?;

    let current = parse_stored_status(&order.status)?;
    if !current.is_cancellable() {
        return Err(AppError::order_not_cancellable(current.as_str()));
    }

    release_order_stock(&txn, order.id).await?;

    let notes = match (order.notes.clone(), payload.reason.as_deref()) {
        (Some(notes), Some(reason)) => Some(format!("{notes}\ncancelled: {reason}")),
        (None, Some(reason)) => Some(format!("cancelled: {reason}")),
        (existing, None) => existing,
    };

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled.as_str().into());
    active.notes = Set(notes);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;
    txn.commit().await?;

    notify_status_change(state, &order, current, OrderStatus::Cancelled).await;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "reason": payload.reason })),
    )
    .await;

    Ok(ApiResponse::success(
        "Order cancelled",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

/// Hard delete; pending orders only. Items go with the order.
pub async fn delete_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("order"))?;
    ensure_order_access(state, user, &order).await?;

    let status = parse_stored_status(&order.status)?;
    if status != OrderStatus::Pending {
        return Err(AppError::Conflict(
            "only pending orders can be deleted".into(),
        ));
    }

    Orders::delete_by_id(order.id).exec(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_delete",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Customer must exist, be active, and be backed by an active customer-role
/// user.
async fn require_customer(state: &AppState, customer_id: Uuid) -> AppResult<CustomerModel> {
    let customer = Customers::find_by_id(customer_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("customer"))?;
    let backing_user = Users::find_by_id(customer.user_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("customer"))?;
    if backing_user.role != "customer" {
        return Err(AppError::not_found("customer"));
    }
    if !backing_user.active || !customer.active {
        return Err(AppError::Conflict("customer account is inactive".into()));
    }
    Ok(customer)
}

async fn ensure_order_access(
    state: &AppState,
    user: &AuthUser,
    order: &OrderModel,
) -> AppResult<()> {
    if user.is_admin() {
        return Ok(());
    }
    let own = customer_service::find_by_user_id(state, user.user_id)
        .await?
        .ok_or(AppError::Forbidden)?;
    if order.customer_id != own.id {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

async fn release_order_stock(txn: &DatabaseTransaction, order_id: Uuid) -> AppResult<()> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(txn)
        .await?;
    for item in items {
        inventory::release(txn, item.product_id, item.quantity).await?;
    }
    Ok(())
}

async fn notify_status_change(
    state: &AppState,
    order: &OrderModel,
    from: OrderStatus,
    to: OrderStatus,
) {
    let event = serde_json::json!({
        "order_id": order.id,
        "order_number": order.order_number,
        "from": from.as_str(),
        "status": to.as_str(),
    });
    match Customers::find_by_id(order.customer_id).one(&state.orm).await {
        Ok(Some(customer)) => {
            state.notifier.notify(Notification::customer(
                customer.user_id,
                kind::ORDER_STATUS_UPDATED,
                event.clone(),
            ));
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(error = %err, order_id = %order.id, "status notification skipped");
        }
    }
    state
        .notifier
        .notify(Notification::admins(kind::ADMIN_ORDER_STATUS_CHANGED, event));
}

fn parse_stored_status(value: &str) -> AppResult<OrderStatus> {
    OrderStatus::parse(value).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("unrecognized order status '{value}' in storage"))
    })
}

pub fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        order_number: model.order_number,
        customer_id: model.customer_id,
        status: model.status,
        subtotal: model.subtotal,
        tax: model.tax,
        shipping: model.shipping,
        discount: model.discount,
        total_amount: model.total_amount,
        shipping_address: model.shipping_address,
        billing_address: model.billing_address,
        notes: model.notes,
        expected_delivery_date: model.expected_delivery_date,
        delivered_at: model.delivered_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name: model.product_name,
        quantity: model.quantity,
        unit_price: model.unit_price,
        total_price: model.total_price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
