use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Payment;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub amount: i64,
    pub payment_method: String,
    pub currency: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundPaymentRequest {
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentList {
    pub items: Vec<Payment>,
}
