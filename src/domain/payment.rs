/// Payment lifecycle. Gateway-backed payments move pending -> processing ->
/// completed/failed synchronously; manual methods stay pending until
/// confirmed out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            "partially_refunded" => Some(PaymentStatus::PartiallyRefunded),
            _ => None,
        }
    }

    /// Statuses that count against an order's remaining balance. Pending and
    /// processing payments reserve their amount so that concurrent attempts
    /// cannot jointly overpay; failed payments free it again.
    pub fn reserves_balance(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Completed
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Card,
    Paypal,
    Maya,
    Cash,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::Maya => "maya",
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "card" => Some(PaymentMethod::Card),
            "paypal" => Some(PaymentMethod::Paypal),
            "maya" => Some(PaymentMethod::Maya),
            "cash" => Some(PaymentMethod::Cash),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            _ => None,
        }
    }

    /// Whether an external gateway adapter handles the charge.
    pub fn is_gateway_backed(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Card | PaymentMethod::Paypal | PaymentMethod::Maya
        )
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_through_strings() {
        use PaymentMethod::*;
        for method in [Card, Paypal, Maya, Cash, BankTransfer] {
            assert_eq!(PaymentMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(PaymentMethod::parse("bitcoin"), None);
    }

    #[test]
    fn gateway_backed_split() {
        assert!(PaymentMethod::Card.is_gateway_backed());
        assert!(PaymentMethod::Paypal.is_gateway_backed());
        assert!(PaymentMethod::Maya.is_gateway_backed());
        assert!(!PaymentMethod::Cash.is_gateway_backed());
        assert!(!PaymentMethod::BankTransfer.is_gateway_backed());
    }

    #[test]
    fn balance_reservation_statuses() {
        assert!(PaymentStatus::Pending.reserves_balance());
        assert!(PaymentStatus::Processing.reserves_balance());
        assert!(PaymentStatus::Completed.reserves_balance());
        assert!(!PaymentStatus::Failed.reserves_balance());
        assert!(!PaymentStatus::Refunded.reserves_balance());
        assert!(!PaymentStatus::PartiallyRefunded.reserves_balance());
    }
}
