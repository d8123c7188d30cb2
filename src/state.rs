use std::sync::Arc;

use crate::db::{DbPool, OrmConn};
use crate::gateway::GatewayRegistry;
use crate::notify::Notifier;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub notifier: Notifier,
    pub gateways: Arc<GatewayRegistry>,
}
