use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    domain::payment::{PaymentMethod, PaymentStatus},
    dto::payments::{CreatePaymentRequest, PaymentList, RefundPaymentRequest},
    entity::{
        customers::Entity as Customers,
        orders::Entity as Orders,
        payments::{
            ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments,
            Model as PaymentModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Payment,
    notify::{Notification, kind},
    response::{ApiResponse, Meta},
    routes::params::PaymentListQuery,
    services::customer_service,
    state::AppState,
};

use crate::domain::order::OrderStatus;

/// Accept a payment against an order. The order row is locked for the
/// balance check and the payment insert, so concurrent attempts against the
/// same order serialize; pending and processing payments count against the
/// balance until they fail, which keeps the completed sum under the order
/// total even though the gateway call happens after commit.
pub async fn create_payment(
    state: &AppState,
    user: &AuthUser,
    payload: CreatePaymentRequest,
) -> AppResult<ApiResponse<Payment>> {
    let method = PaymentMethod::parse(&payload.payment_method).ok_or_else(|| {
        AppError::BadRequest(format!("unknown payment method '{}'", payload.payment_method))
    })?;
    let currency = payload.currency.unwrap_or_else(|| "USD".to_string());

    let customer = Customers::find_by_id(payload.customer_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("customer"))?;
    if !user.is_admin() && customer.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let txn = state.orm.begin().await?;
    let order = Orders::find_by_id(payload.order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("order"))?;
    if order.customer_id != customer.id {
        return Err(AppError::BadRequest(
            "customer does not own this order".into(),
        ));
    }

    let order_status = OrderStatus::parse(&order.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unrecognized order status '{}' in storage",
            order.status
        ))
    })?;
    if !order_status.is_payable() {
        return Err(AppError::order_not_payable(order_status.as_str()));
    }

    if payload.amount <= 0 {
        return Err(AppError::BadRequest(
            "payment amount must be positive".into(),
        ));
    }

    let reserved: i64 = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .all(&txn)
        .await?
        .iter()
        .filter(|p| {
            PaymentStatus::parse(&p.status).is_some_and(|s| s.reserves_balance())
        })
        .map(|p| p.amount)
        .sum();
    let remaining = order.total_amount - reserved;

    if payload.amount > remaining {
        return Err(AppError::overpayment(payload.amount, remaining));
    }
    // The observed system requires a single payment to clear the whole
    // balance; installments are rejected rather than supported.
    if payload.amount < remaining {
        return Err(AppError::underpayment(payload.amount, remaining));
    }

    let payment = PaymentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        customer_id: Set(customer.id),
        amount: Set(payload.amount),
        currency: Set(currency.clone()),
        method: Set(method.as_str().into()),
        status: Set(PaymentStatus::Pending.as_str().into()),
        transaction_id: Set(None),
        gateway_response: Set(None),
        error_message: Set(None),
        refund_amount: Set(None),
        refunded_at: Set(None),
        metadata: Set(payload.metadata),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "payment_create",
        Some("payments"),
        Some(serde_json::json!({
            "payment_id": payment.id,
            "order_id": order.id,
            "amount": payment.amount,
            "method": payment.method,
        })),
    )
    .await;

    let payment = match state.gateways.for_method(method) {
        Some(adapter) => {
            dispatch_charge(state, payment, adapter.as_ref(), customer.user_id, &currency).await?
        }
        // Manual methods stay pending until confirmed out of band.
        None => payment,
    };

    Ok(ApiResponse::success(
        "Payment recorded",
        payment_from_entity(payment),
        Some(Meta::empty()),
    ))
}

/// Charge through the gateway adapter and settle the payment row. The
/// payment id doubles as the idempotency key.
async fn dispatch_charge(
    state: &AppState,
    payment: PaymentModel,
    adapter: &dyn crate::gateway::PaymentGateway,
    customer_user_id: Uuid,
    currency: &str,
) -> AppResult<PaymentModel> {
    let payment_id = payment.id;
    let amount = payment.amount;

    let mut active: PaymentActive = payment.into();
    active.status = Set(PaymentStatus::Processing.as_str().into());
    active.updated_at = Set(Utc::now().into());
    let payment = active.update(&state.orm).await?;

    match adapter
        .charge(amount, currency, &payment_id.to_string())
        .await
    {
        Ok(charge) => {
            let mut active: PaymentActive = payment.into();
            active.status = Set(PaymentStatus::Completed.as_str().into());
            active.transaction_id = Set(Some(charge.transaction_id));
            active.gateway_response = Set(Some(charge.raw_response));
            active.updated_at = Set(Utc::now().into());
            let payment = active.update(&state.orm).await?;

            state.notifier.notify(Notification::customer(
                customer_user_id,
                kind::PAYMENT_COMPLETED,
                serde_json::json!({
                    "payment_id": payment.id,
                    "order_id": payment.order_id,
                    "amount": payment.amount,
                    "status": payment.status,
                }),
            ));

            Ok(payment)
        }
        Err(err) => {
            let mut active: PaymentActive = payment.into();
            active.status = Set(PaymentStatus::Failed.as_str().into());
            active.error_message = Set(Some(err.to_string()));
            active.updated_at = Set(Utc::now().into());
            let payment = active.update(&state.orm).await?;

            let event = serde_json::json!({
                "payment_id": payment.id,
                "order_id": payment.order_id,
                "amount": payment.amount,
                "error": err.to_string(),
            });
            state.notifier.notify(Notification::customer(
                customer_user_id,
                kind::PAYMENT_FAILED,
                event.clone(),
            ));
            state
                .notifier
                .notify(Notification::admins(kind::ADMIN_PAYMENT_FAILED, event));

            Err(AppError::Gateway(err.to_string()))
        }
    }
}

/// Refund a completed payment, fully or partially.
pub async fn refund_payment(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: RefundPaymentRequest,
) -> AppResult<ApiResponse<Payment>> {
    ensure_admin(user)?;

    let payment = Payments::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("payment"))?;

    let status = PaymentStatus::parse(&payment.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unrecognized payment status '{}' in storage",
            payment.status
        ))
    })?;
    if status != PaymentStatus::Completed {
        return Err(AppError::payment_not_refundable(status.as_str()));
    }

    let refund_amount = payload.amount.unwrap_or(payment.amount);
    if refund_amount <= 0 {
        return Err(AppError::BadRequest(
            "refund amount must be positive".into(),
        ));
    }
    if refund_amount > payment.amount {
        return Err(AppError::refund_exceeds_payment(refund_amount, payment.amount));
    }

    let method = PaymentMethod::parse(&payment.method).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unrecognized payment method '{}' in storage",
            payment.method
        ))
    })?;
    if let Some(adapter) = state.gateways.for_method(method) {
        let transaction_id = payment.transaction_id.as_deref().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("completed gateway payment has no transaction id"))
        })?;
        adapter
            .refund(transaction_id, refund_amount)
            .await
            .map_err(|err| AppError::Gateway(format!("refund failed: {err}")))?;
    }

    let next_status = if refund_amount == payment.amount {
        PaymentStatus::Refunded
    } else {
        PaymentStatus::PartiallyRefunded
    };

    let metadata = match (payment.metadata.clone(), payload.reason.as_deref()) {
        (Some(mut value), Some(reason)) => {
            if let Some(map) = value.as_object_mut() {
                map.insert("refund_reason".into(), reason.into());
            }
            Some(value)
        }
        (None, Some(reason)) => Some(serde_json::json!({ "refund_reason": reason })),
        (existing, None) => existing,
    };

    let customer_id = payment.customer_id;
    let mut active: PaymentActive = payment.into();
    active.status = Set(next_status.as_str().into());
    active.refund_amount = Set(Some(refund_amount));
    active.refunded_at = Set(Some(Utc::now().into()));
    active.metadata = Set(metadata);
    active.updated_at = Set(Utc::now().into());
    let payment = active.update(&state.orm).await?;

    if let Ok(Some(customer)) = Customers::find_by_id(customer_id).one(&state.orm).await {
        state.notifier.notify(Notification::customer(
            customer.user_id,
            kind::PAYMENT_REFUNDED,
            serde_json::json!({
                "payment_id": payment.id,
                "order_id": payment.order_id,
                "refund_amount": refund_amount,
                "status": payment.status,
            }),
        ));
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "payment_refund",
        Some("payments"),
        Some(serde_json::json!({
            "payment_id": payment.id,
            "refund_amount": refund_amount,
            "reason": payload.reason,
        })),
    )
    .await;

    Ok(ApiResponse::success(
        "Refund processed",
        payment_from_entity(payment),
        Some(Meta::empty()),
    ))
}

pub async fn list_payments(
    state: &AppState,
    user: &AuthUser,
    query: PaymentListQuery,
) -> AppResult<ApiResponse<PaymentList>> {
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if !user.is_admin() {
        let own = customer_service::find_by_user_id(state, user.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("customer profile"))?;
        condition = condition.add(PaymentCol::CustomerId.eq(own.id));
    }
    if let Some(order_id) = query.order_id {
        condition = condition.add(PaymentCol::OrderId.eq(order_id));
    }
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = PaymentStatus::parse(status)
            .ok_or_else(|| AppError::BadRequest(format!("unknown payment status '{status}'")))?;
        condition = condition.add(PaymentCol::Status.eq(status.as_str()));
    }

    let finder = Payments::find()
        .filter(condition)
        .order_by_desc(PaymentCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(payment_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Payments",
        PaymentList { items },
        Some(meta),
    ))
}

pub async fn get_payment(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Payment>> {
    let payment = Payments::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("payment"))?;

    if !user.is_admin() {
        let own = customer_service::find_by_user_id(state, user.user_id)
            .await?
            .ok_or(AppError::Forbidden)?;
        if payment.customer_id != own.id {
            return Err(AppError::Forbidden);
        }
    }

    Ok(ApiResponse::success(
        "Payment",
        payment_from_entity(payment),
        Some(Meta::empty()),
    ))
}

pub fn payment_from_entity(model: PaymentModel) -> Payment {
    Payment {
        id: model.id,
        order_id: model.order_id,
        customer_id: model.customer_id,
        amount: model.amount,
        currency: model.currency,
        method: model.method,
        status: model.status,
        transaction_id: model.transaction_id,
        gateway_response: model.gateway_response,
        error_message: model.error_message,
        refund_amount: model.refund_amount,
        refunded_at: model.refunded_at.map(|dt| dt.with_timezone(&Utc)),
        metadata: model.metadata,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
