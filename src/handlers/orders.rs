use axum::{
    extract::{Path, Query, State},
    Json,
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    error::{AppError, AppResult},
    handlers::audit,
    middleware::require_permission,
    models::{Order, OrderFilters, OrderItem, OrderStatus, OrderStatusUpdate, OrderWithItems},
    services::email,
    state::AppState,
    utils::is_blank,
};

pub(crate) async fn load_items(db: &Database, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
    let items = sqlx::query_as::<_, OrderItem>(
        "SELECT * FROM order_items WHERE order_id = $1 ORDER BY title",
    )
    .bind(order_id)
    .fetch_all(db)
    .await?;
    Ok(items)
}

async fn load_order(db: &Database, id: Uuid) -> AppResult<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {}", id)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<OrderFilters>,
) -> AppResult<Json<Vec<Order>>> {
    require_permission(&cookies, &state, "orders:read").await?;

    let status = match filters.status.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Some(s.parse::<OrderStatus>().map_err(AppError::Validation)?),
        _ => None,
    };

    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at DESC
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<OrderWithItems>> {
    require_permission(&cookies, &state, "orders:read").await?;

    let order = load_order(&state.db, id).await?;
    let items = load_items(&state.db, id).await?;
    Ok(Json(OrderWithItems { order, items }))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Json(update): Json<OrderStatusUpdate>,
) -> AppResult<Json<Order>> {
    let user = require_permission(&cookies, &state, "orders:write").await?;

    let order = load_order(&state.db, id).await?;
    let current: OrderStatus = order.status.parse().map_err(AppError::Internal)?;

    if !current.can_transition_to(update.status) {
        return Err(AppError::Validation(format!(
            "Cannot move order from {} to {}",
            current, update.status
        )));
    }
    if update.status == OrderStatus::Shipped && is_blank(&update.tracking_note) {
        return Err(AppError::Validation(
            "A tracking note is required to mark an order as shipped".to_string(),
        ));
    }

    let tracking_note = update
        .tracking_note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    // Guard on the status we validated against so concurrent edits do not skip the check
    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = $3, tracking_note = COALESCE($4, tracking_note), updated_at = NOW()
        WHERE id = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(current.as_str())
    .bind(update.status.as_str())
    .bind(tracking_note)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::Validation(format!("Order {} changed meanwhile, reload it", id)))?;

    log::info!("Order {} moved from {} to {}", id, current, update.status);
    audit::record(&state.db, user.id, "update_status", "order", Some(id), &updated).await;

    if update.status == OrderStatus::Shipped {
        state
            .mailer
            .send_logged(email::shipping_update(&updated, &state.config.site_url))
            .await;
    }

    Ok(Json(updated))
}
