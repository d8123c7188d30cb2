use axum::Router;

use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod customers;
pub mod doc;
pub mod health;
pub mod orders;
pub mod params;
pub mod payments;
pub mod products;
pub mod ws;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/products", products::router())
        .nest("/auth", auth::router())
        .nest("/customers", customers::router())
        .nest("/orders", orders::router())
        .nest("/payments", payments::router())
        .nest("/admin", admin::router())
        .nest("/ws", ws::router())
}
