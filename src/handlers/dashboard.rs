use axum::{
    extract::{Query, State},
    Json,
};
use tower_cookies::Cookies;

use crate::{
    error::AppResult,
    handlers::operations::fetch_operations,
    ledger::{dashboard, Dashboard},
    middleware::require_permission,
    models::{InventoryItem, OperationFilters, Order, OrderItem},
    state::AppState,
};

/// Business analytics over the ledger, web orders and inventory. The date filters of the
/// ledger listing apply to both ledger rows and orders.
pub async fn analytics(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<OperationFilters>,
) -> AppResult<Json<Dashboard>> {
    require_permission(&cookies, &state, "operations:read").await?;

    let ops = fetch_operations(&state.db, &filters).await?;

    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE ($1::date IS NULL OR created_at::date >= $1)
          AND ($2::date IS NULL OR created_at::date <= $2)
        "#,
    )
    .bind(filters.date_from.as_deref().and_then(crate::utils::parse_date_safe))
    .bind(filters.date_to.as_deref().and_then(crate::utils::parse_date_safe))
    .fetch_all(&state.db)
    .await?;

    let order_ids: Vec<uuid::Uuid> = orders.iter().map(|o| o.id).collect();
    let items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = ANY($1)")
        .bind(&order_ids)
        .fetch_all(&state.db)
        .await?;

    let inventory = sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_items")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(dashboard(&ops, &orders, &items, &inventory)))
}
