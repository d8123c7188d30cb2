use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event names pushed over the notification channel.
pub mod kind {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_STATUS_UPDATED: &str = "order.status_updated";
    pub const PAYMENT_COMPLETED: &str = "payment.completed";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const PAYMENT_REFUNDED: &str = "payment.refunded";
    pub const ADMIN_ORDER_PLACED: &str = "admin.order.placed";
    pub const ADMIN_ORDER_STATUS_CHANGED: &str = "admin.order.status_changed";
    pub const ADMIN_PAYMENT_FAILED: &str = "admin.payment.failed";
}

/// Who a notification is addressed to. Customers receive only their own
/// traffic; admin connections receive the `Admins` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Customer(Uuid),
    Admins,
}

impl Audience {
    pub fn matches(&self, user_id: Uuid, role: &str) -> bool {
        match self {
            Audience::Customer(id) => *id == user_id,
            Audience::Admins => role == "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: &'static str,
    #[serde(skip)]
    pub audience: Audience,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn customer(user_id: Uuid, kind: &'static str, payload: serde_json::Value) -> Self {
        Self {
            kind,
            audience: Audience::Customer(user_id),
            payload,
        }
    }

    pub fn admins(kind: &'static str, payload: serde_json::Value) -> Self {
        Self {
            kind,
            audience: Audience::Admins,
            payload,
        }
    }
}

/// Fire-and-forget fan-out hub over a tokio broadcast channel. Send errors
/// mean nobody is connected, which is fine.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_matching() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(Audience::Customer(user).matches(user, "customer"));
        assert!(!Audience::Customer(user).matches(other, "customer"));
        assert!(Audience::Admins.matches(other, "admin"));
        assert!(!Audience::Admins.matches(user, "customer"));
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let notifier = Notifier::new(8);
        let mut rx = notifier.subscribe();
        let user = Uuid::new_v4();
        notifier.notify(Notification::customer(
            user,
            kind::ORDER_CREATED,
            serde_json::json!({ "order_id": "x" }),
        ));
        let n = rx.recv().await.unwrap();
        assert_eq!(n.kind, kind::ORDER_CREATED);
        assert_eq!(n.audience, Audience::Customer(user));
    }

    #[test]
    fn notify_without_subscribers_is_silent() {
        let notifier = Notifier::new(8);
        notifier.notify(Notification::admins(
            kind::ADMIN_ORDER_PLACED,
            serde_json::json!({}),
        ));
    }
}
