use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::models::Customer;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCustomerRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub shipping_address: Option<String>,
    pub billing_address: Option<String>,
    pub preferences: Option<Value>,
    pub credit_limit: Option<i64>,
    pub loyalty_points: Option<i32>,
    pub vip: Option<bool>,
    pub active: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CustomerList {
    pub items: Vec<Customer>,
}
