use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    error::AppResult,
    middleware::require_permission,
    models::{AuditFilters, AuditLog},
    state::AppState,
};

const DEFAULT_LIMIT: i64 = 100;

/// Writes an audit row. Failures are logged and swallowed so they never fail the write
/// being audited.
pub async fn record<T: Serialize>(
    db: &Database,
    user_id: Uuid,
    action: &str,
    resource_type: &str,
    resource_id: Option<Uuid>,
    values: &T,
) {
    let new_values = serde_json::to_value(values).ok().map(sqlx::types::Json);

    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs (user_id, action, resource_type, resource_id, new_values)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(new_values)
    .execute(db)
    .await;

    if let Err(e) = result {
        log::warn!("Failed to write audit log for {} {}: {}", action, resource_type, e);
    }
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<AuditFilters>,
) -> AppResult<Json<Vec<AuditLog>>> {
    require_permission(&cookies, &state, "audit:read").await?;

    let limit = filters.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 1000);

    let logs = sqlx::query_as::<_, AuditLog>(
        r#"
        SELECT * FROM audit_logs
        WHERE ($1::text IS NULL OR resource_type = $1)
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(filters.resource_type)
    .bind(limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(logs))
}
