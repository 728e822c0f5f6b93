use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tower_cookies::Cookies;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    handlers::audit,
    middleware::require_permission,
    models::{AlertFilters, AlertInput, DispatchReport, PendingAlert},
    services::EmailMessage,
    state::AppState,
};

pub async fn list_alerts(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<AlertFilters>,
) -> AppResult<Json<Vec<PendingAlert>>> {
    require_permission(&cookies, &state, "alerts:read").await?;

    let alerts = sqlx::query_as::<_, PendingAlert>(
        r#"
        SELECT * FROM pending_alerts
        WHERE ($1 OR sent_at IS NULL)
        ORDER BY due_at
        "#,
    )
    .bind(filters.include_sent.unwrap_or(false))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(alerts))
}

pub async fn create_alert(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<AlertInput>,
) -> AppResult<(StatusCode, Json<PendingAlert>)> {
    let user = require_permission(&cookies, &state, "alerts:write").await?;
    form.validate()?;

    let alert = sqlx::query_as::<_, PendingAlert>(
        r#"
        INSERT INTO pending_alerts (kind, recipient_email, subject, body, due_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(form.kind.as_str())
    .bind(form.recipient_email.trim())
    .bind(form.subject.trim())
    .bind(&form.body)
    .bind(form.due_at)
    .fetch_one(&state.db)
    .await?;

    audit::record(&state.db, user.id, "create", "alert", Some(alert.id), &alert).await;

    Ok((StatusCode::CREATED, Json(alert)))
}

pub async fn delete_alert(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let user = require_permission(&cookies, &state, "alerts:write").await?;

    let result = sqlx::query("DELETE FROM pending_alerts WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Alert {}", id)));
    }

    audit::record(&state.db, user.id, "delete", "alert", Some(id), &json!({ "id": id })).await;

    Ok(Json(json!({ "success": true })))
}

/// Sends every alert that is due. Meant to be called by cron; an alert whose e-mail fails
/// stays pending and is retried on the next run.
pub async fn dispatch_alerts(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<DispatchReport>> {
    require_permission(&cookies, &state, "alerts:write").await?;

    let due = sqlx::query_as::<_, PendingAlert>(
        "SELECT * FROM pending_alerts WHERE sent_at IS NULL AND due_at <= NOW() ORDER BY due_at",
    )
    .fetch_all(&state.db)
    .await?;

    let mut report = DispatchReport { sent: 0, failed: 0 };

    for alert in due {
        let message = EmailMessage {
            to: alert.recipient_email.clone(),
            subject: alert.subject.clone(),
            html: alert.body.clone(),
        };

        match state.mailer.send(&message).await {
            Ok(()) => {
                sqlx::query("UPDATE pending_alerts SET sent_at = NOW() WHERE id = $1")
                    .bind(alert.id)
                    .execute(&state.db)
                    .await?;
                report.sent += 1;
            }
            Err(e) => {
                log::error!("Alert {} to {} failed: {}", alert.id, alert.recipient_email, e);
                report.failed += 1;
            }
        }
    }

    log::info!("Dispatched alerts: {} sent, {} failed", report.sent, report.failed);
    Ok(Json(report))
}
