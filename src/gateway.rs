use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::domain::payment::PaymentMethod;

#[derive(Debug, Clone, Error)]
#[error("{provider}: {message}")]
pub struct GatewayError {
    pub provider: &'static str,
    pub message: String,
}

/// Result of a successful charge at the external processor.
#[derive(Debug, Clone)]
pub struct Charge {
    pub transaction_id: String,
    pub raw_response: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RefundReceipt {
    pub raw_response: serde_json::Value,
}

/// Boundary around a third-party payment processor. Only the call contract
/// (amount, currency, idempotency key) is modeled; provider SDKs live behind
/// implementations of this trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn charge(
        &self,
        amount: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<Charge, GatewayError>;

    async fn refund(
        &self,
        transaction_id: &str,
        amount: i64,
    ) -> Result<RefundReceipt, GatewayError>;
}

/// Deterministic in-process stand-in for a real processor. Transaction ids
/// derive from the idempotency key, so a retried charge yields the same id.
/// Amounts whose cent remainder is 99 are declined, which gives tests a
/// stable failure trigger.
pub struct SimulatedGateway {
    provider: &'static str,
}

impl SimulatedGateway {
    pub fn new(provider: &'static str) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    fn provider(&self) -> &'static str {
        self.provider
    }

    async fn charge(
        &self,
        amount: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<Charge, GatewayError> {
        if amount <= 0 {
            return Err(GatewayError {
                provider: self.provider,
                message: "amount must be positive".into(),
            });
        }
        if amount % 100 == 99 {
            return Err(GatewayError {
                provider: self.provider,
                message: "card declined".into(),
            });
        }

        let transaction_id = format!("{}_ch_{}", self.provider, idempotency_key);
        info!(provider = self.provider, %transaction_id, amount, currency, "charge accepted");
        Ok(Charge {
            raw_response: serde_json::json!({
                "provider": self.provider,
                "id": transaction_id,
                "amount": amount,
                "currency": currency,
                "status": "succeeded",
            }),
            transaction_id,
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: i64,
    ) -> Result<RefundReceipt, GatewayError> {
        if !transaction_id.starts_with(self.provider) {
            return Err(GatewayError {
                provider: self.provider,
                message: format!("unknown transaction {transaction_id}"),
            });
        }
        info!(provider = self.provider, %transaction_id, amount, "refund accepted");
        Ok(RefundReceipt {
            raw_response: serde_json::json!({
                "provider": self.provider,
                "transaction_id": transaction_id,
                "amount": amount,
                "status": "refunded",
            }),
        })
    }
}

/// Maps gateway-backed payment methods to their adapter. Injected through
/// `AppState`; manual methods (cash, bank transfer) have no adapter.
pub struct GatewayRegistry {
    card: Arc<dyn PaymentGateway>,
    paypal: Arc<dyn PaymentGateway>,
    maya: Arc<dyn PaymentGateway>,
}

impl GatewayRegistry {
    pub fn new(
        card: Arc<dyn PaymentGateway>,
        paypal: Arc<dyn PaymentGateway>,
        maya: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self { card, paypal, maya }
    }

    pub fn simulated() -> Self {
        Self::new(
            Arc::new(SimulatedGateway::new("stripe")),
            Arc::new(SimulatedGateway::new("paypal")),
            Arc::new(SimulatedGateway::new("maya")),
        )
    }

    pub fn for_method(&self, method: PaymentMethod) -> Option<&Arc<dyn PaymentGateway>> {
        match method {
            PaymentMethod::Card => Some(&self.card),
            PaymentMethod::Paypal => Some(&self.paypal),
            PaymentMethod::Maya => Some(&self.maya),
            PaymentMethod::Cash | PaymentMethod::BankTransfer => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn charge_is_deterministic_per_idempotency_key() {
        let gw = SimulatedGateway::new("stripe");
        let a = gw.charge(5_000, "USD", "pay-1").await.unwrap();
        let b = gw.charge(5_000, "USD", "pay-1").await.unwrap();
        assert_eq!(a.transaction_id, b.transaction_id);
        assert_eq!(a.transaction_id, "stripe_ch_pay-1");
    }

    #[tokio::test]
    async fn declined_amounts_fail() {
        let gw = SimulatedGateway::new("stripe");
        let err = gw.charge(1_099, "USD", "pay-2").await.unwrap_err();
        assert!(err.message.contains("declined"));
        assert!(gw.charge(0, "USD", "pay-3").await.is_err());
    }

    #[tokio::test]
    async fn refund_requires_known_transaction() {
        let gw = SimulatedGateway::new("maya");
        let charge = gw.charge(2_000, "PHP", "pay-4").await.unwrap();
        assert!(gw.refund(&charge.transaction_id, 2_000).await.is_ok());
        assert!(gw.refund("stripe_ch_other", 2_000).await.is_err());
    }

    #[test]
    fn registry_routes_gateway_methods_only() {
        let registry = GatewayRegistry::simulated();
        assert!(registry.for_method(PaymentMethod::Card).is_some());
        assert!(registry.for_method(PaymentMethod::Paypal).is_some());
        assert!(registry.for_method(PaymentMethod::Maya).is_some());
        assert!(registry.for_method(PaymentMethod::Cash).is_none());
        assert!(registry.for_method(PaymentMethod::BankTransfer).is_none());
    }
}
