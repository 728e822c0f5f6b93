pub mod alerts;
pub mod audit;
pub mod auth;
pub mod checkout;
pub mod crm;
pub mod dashboard;
pub mod inventory;
pub mod operations;
pub mod orders;
pub mod products;
pub mod reviews;
pub mod settings;
pub mod subscriptions;
pub mod webhooks;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness plus a cheap database round trip.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "ok",
        Err(e) => {
            log::warn!("Health check could not reach the database: {}", e);
            "unavailable"
        }
    };

    Json(json!({
        "status": "ok",
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
