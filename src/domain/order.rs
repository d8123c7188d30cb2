use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Order lifecycle. Transitions outside [`OrderStatus::allowed_transitions`]
/// are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
            OrderStatus::Confirmed => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered => &[OrderStatus::Refunded],
            OrderStatus::Cancelled | OrderStatus::Refunded => &[],
        }
    }

    pub fn can_transition(&self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Orders accept payments only before fulfilment starts.
    pub fn is_payable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const TAX_RATE_PERCENT: i64 = 10;
/// Orders strictly above this subtotal (in cents) ship free.
pub const FREE_SHIPPING_THRESHOLD: i64 = 10_000;
pub const FLAT_SHIPPING_FEE: i64 = 1_000;

/// Monetary breakdown of an order, all in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub discount: i64,
    pub total: i64,
}

impl OrderTotals {
    /// total = subtotal + tax + shipping - discount. There is no discount
    /// engine, so discount is always zero here.
    pub fn from_subtotal(subtotal: i64) -> Self {
        let tax = subtotal * TAX_RATE_PERCENT / 100;
        let shipping = if subtotal > FREE_SHIPPING_THRESHOLD {
            0
        } else {
            FLAT_SHIPPING_FEE
        };
        let discount = 0;
        Self {
            subtotal,
            tax,
            shipping,
            discount,
            total: subtotal + tax + shipping - discount,
        }
    }
}

/// `ORD-YYYYMMDD-NNNNNN`, the numeric suffix drawn from a fresh UUID. The
/// orders table carries a unique constraint on the column and callers retry
/// on collision.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let raw = Uuid::new_v4();
    let b = raw.as_bytes();
    let suffix = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) % 1_000_000;
    format!("ORD-{}-{:06}", now.format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_exact() {
        use OrderStatus::*;
        assert!(Pending.can_transition(Confirmed));
        assert!(Pending.can_transition(Cancelled));
        assert!(!Pending.can_transition(Delivered));
        assert!(!Pending.can_transition(Shipped));
        assert!(Confirmed.can_transition(Shipped));
        assert!(Confirmed.can_transition(Cancelled));
        assert!(!Confirmed.can_transition(Delivered));
        assert!(Shipped.can_transition(Delivered));
        assert!(!Shipped.can_transition(Cancelled));
        assert!(Delivered.can_transition(Refunded));
        assert!(Cancelled.is_terminal());
        assert!(Refunded.is_terminal());
    }

    #[test]
    fn happy_path_reaches_refunded() {
        use OrderStatus::*;
        let path = [Pending, Confirmed, Shipped, Delivered, Refunded];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        use OrderStatus::*;
        for status in [Pending, Confirmed, Shipped, Delivered, Cancelled, Refunded] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("paid"), None);
    }

    #[test]
    fn totals_below_free_shipping_threshold() {
        // 5 x 10.00 = 50.00 subtotal, 10% tax, flat shipping
        let t = OrderTotals::from_subtotal(5_000);
        assert_eq!(t.tax, 500);
        assert_eq!(t.shipping, FLAT_SHIPPING_FEE);
        assert_eq!(t.discount, 0);
        assert_eq!(t.total, 5_000 + 500 + 1_000);
        assert_eq!(t.total, t.subtotal + t.tax + t.shipping - t.discount);
    }

    #[test]
    fn totals_above_free_shipping_threshold() {
        let t = OrderTotals::from_subtotal(25_000);
        assert_eq!(t.tax, 2_500);
        assert_eq!(t.shipping, 0);
        assert_eq!(t.total, 27_500);
    }

    #[test]
    fn totals_at_threshold_still_charge_shipping() {
        let t = OrderTotals::from_subtotal(FREE_SHIPPING_THRESHOLD);
        assert_eq!(t.shipping, FLAT_SHIPPING_FEE);
    }

    #[test]
    fn order_number_shape() {
        let now = "2026-08-05T12:00:00Z".parse().unwrap();
        let number = generate_order_number(now);
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1], "20260805");
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
    }
}
