use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    error::{AppError, AppResult},
    handlers::{audit, settings::load_settings},
    ledger::{
        derive_cost, money::check_total, profit_by_cut, register_payment, stock_by_plot, CutProfit, PaymentStatus,
        StockSummary,
    },
    middleware::require_permission,
    models::{AlertKind, Operation, OperationFilters, OperationInput, PaymentInput},
    services::email,
    state::AppState,
    utils::parse_date_safe,
};

/// Hour of the due date at which payment reminders fire.
const REMINDER_HOUR: u32 = 9;

fn filter_date(raw: &Option<String>, field: &str) -> AppResult<Option<NaiveDate>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_date_safe(value)
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("{} must be a YYYY-MM-DD date", field))),
    }
}

fn non_blank(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) async fn fetch_operations(
    db: &Database,
    filters: &OperationFilters,
) -> AppResult<Vec<Operation>> {
    let date_from = filter_date(&filters.date_from, "date_from")?;
    let date_to = filter_date(&filters.date_to, "date_to")?;

    let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM operations WHERE 1 = 1");

    if let Some(category) = non_blank(&filters.category) {
        query.push(" AND category = ").push_bind(category.to_string());
    }
    if let Some(pano) = non_blank(&filters.pano_id) {
        query.push(" AND pano_id = ").push_bind(pano.to_string());
    }
    if let Some(corte) = non_blank(&filters.corte_id) {
        query.push(" AND corte_id = ").push_bind(corte.to_string());
    }
    if let Some(from) = date_from {
        query.push(" AND operation_date >= ").push_bind(from);
    }
    if let Some(to) = date_to {
        query.push(" AND operation_date <= ").push_bind(to);
    }
    query.push(" ORDER BY operation_date DESC, created_at DESC");

    let operations = query.build_query_as::<Operation>().fetch_all(db).await?;
    Ok(operations)
}

pub async fn list_operations(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<OperationFilters>,
) -> AppResult<Json<Vec<Operation>>> {
    require_permission(&cookies, &state, "operations:read").await?;
    Ok(Json(fetch_operations(&state.db, &filters).await?))
}

/// Amounts and payment status of an entry about to be written.
struct Resolved {
    unit_cost: Decimal,
    total_cost: Decimal,
    amount_paid: Decimal,
    status: PaymentStatus,
}

fn resolve(input: &OperationInput, settings: &crate::models::Settings) -> AppResult<Resolved> {
    if input.quantity < Decimal::ZERO {
        return Err(AppError::Validation("Quantity cannot be negative".to_string()));
    }

    let cost = derive_cost(
        input.category,
        input.subcategory.as_deref(),
        input.quantity,
        input.unit_cost,
        input.total_cost,
        settings,
    )?;
    if cost.total_cost < Decimal::ZERO || cost.unit_cost < Decimal::ZERO {
        return Err(AppError::Validation("Amounts cannot be negative".to_string()));
    }

    // Yield and withdrawals have nothing to collect or pay later
    if !input.category.tracks_payment() {
        return Ok(Resolved {
            unit_cost: cost.unit_cost,
            total_cost: cost.total_cost,
            amount_paid: cost.total_cost,
            status: PaymentStatus::Paid,
        });
    }

    if input.amount_paid < Decimal::ZERO {
        return Err(AppError::Validation("Amount paid cannot be negative".to_string()));
    }
    check_total("Amount paid", input.amount_paid)?;
    if input.amount_paid > cost.total_cost {
        return Err(AppError::Validation(format!(
            "Amount paid {} exceeds the total of {}",
            input.amount_paid, cost.total_cost
        )));
    }

    Ok(Resolved {
        unit_cost: cost.unit_cost,
        total_cost: cost.total_cost,
        amount_paid: input.amount_paid,
        status: PaymentStatus::derive(input.amount_paid, cost.total_cost),
    })
}

async fn clear_reminders(conn: &mut PgConnection, operation_id: Uuid) -> AppResult<()> {
    sqlx::query("DELETE FROM pending_alerts WHERE operation_id = $1 AND sent_at IS NULL")
        .bind(operation_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Queues a payment reminder for an unpaid entry with a due date.
async fn schedule_reminder(
    conn: &mut PgConnection,
    op: &Operation,
    recipient: Option<&str>,
) -> AppResult<()> {
    let (Some(due), Some(recipient)) = (op.payment_due_date, recipient) else {
        return Ok(());
    };
    if op.payment_status == PaymentStatus::Paid.as_str() {
        return Ok(());
    }

    let description = op
        .description
        .clone()
        .or_else(|| op.subcategory.clone())
        .unwrap_or_else(|| op.category.clone());
    let message = email::payment_reminder(
        recipient,
        &description,
        op.total_cost - op.amount_paid,
        &due.format("%d-%m-%Y").to_string(),
    )?;
    let Some(due_at) = due.and_hms_opt(REMINDER_HOUR, 0, 0) else {
        return Ok(());
    };

    sqlx::query(
        r#"
        INSERT INTO pending_alerts (kind, recipient_email, subject, body, due_at, operation_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(AlertKind::PaymentReminder.as_str())
    .bind(&message.to)
    .bind(&message.subject)
    .bind(&message.html)
    .bind(due_at.and_utc())
    .bind(op.id)
    .execute(conn)
    .await?;

    Ok(())
}

fn reminder_recipient<'a>(state: &'a AppState, input: &'a OperationInput) -> Option<&'a str> {
    non_blank(&input.reminder_email).or(state.config.admin_email.as_deref())
}

pub async fn create_operation(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(input): Json<OperationInput>,
) -> AppResult<(StatusCode, Json<Operation>)> {
    let user = require_permission(&cookies, &state, "operations:write").await?;

    let settings = load_settings(&state.db).await?;
    let resolved = resolve(&input, &settings)?;

    let mut tx = state.db.begin().await?;

    let op = sqlx::query_as::<_, Operation>(
        r#"
        INSERT INTO operations (
            category, subcategory, description, quantity, unit_cost, total_cost,
            operation_date, pano_id, corte_id, amount_paid, payment_status,
            payment_due_date, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(input.category.as_str())
    .bind(non_blank(&input.subcategory))
    .bind(non_blank(&input.description))
    .bind(input.quantity)
    .bind(resolved.unit_cost)
    .bind(resolved.total_cost)
    .bind(input.operation_date)
    .bind(non_blank(&input.pano_id))
    .bind(non_blank(&input.corte_id))
    .bind(resolved.amount_paid)
    .bind(resolved.status.as_str())
    .bind(input.payment_due_date)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    schedule_reminder(&mut tx, &op, reminder_recipient(&state, &input)).await?;
    tx.commit().await?;

    log::info!(
        "Recorded {} of {} ({})",
        op.category, op.total_cost, op.payment_status
    );
    audit::record(&state.db, user.id, "create", "operation", Some(op.id), &op).await;

    Ok((StatusCode::CREATED, Json(op)))
}

pub async fn update_operation(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Json(input): Json<OperationInput>,
) -> AppResult<Json<Operation>> {
    let user = require_permission(&cookies, &state, "operations:write").await?;

    let settings = load_settings(&state.db).await?;
    let resolved = resolve(&input, &settings)?;

    let mut tx = state.db.begin().await?;

    let op = sqlx::query_as::<_, Operation>(
        r#"
        UPDATE operations SET
            category = $2, subcategory = $3, description = $4, quantity = $5,
            unit_cost = $6, total_cost = $7, operation_date = $8, pano_id = $9,
            corte_id = $10, amount_paid = $11, payment_status = $12,
            payment_due_date = $13, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(input.category.as_str())
    .bind(non_blank(&input.subcategory))
    .bind(non_blank(&input.description))
    .bind(input.quantity)
    .bind(resolved.unit_cost)
    .bind(resolved.total_cost)
    .bind(input.operation_date)
    .bind(non_blank(&input.pano_id))
    .bind(non_blank(&input.corte_id))
    .bind(resolved.amount_paid)
    .bind(resolved.status.as_str())
    .bind(input.payment_due_date)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Operation {}", id)))?;

    clear_reminders(&mut tx, op.id).await?;
    schedule_reminder(&mut tx, &op, reminder_recipient(&state, &input)).await?;
    tx.commit().await?;

    audit::record(&state.db, user.id, "update", "operation", Some(id), &op).await;

    Ok(Json(op))
}

pub async fn delete_operation(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let user = require_permission(&cookies, &state, "operations:delete").await?;

    let result = sqlx::query("DELETE FROM operations WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Operation {}", id)));
    }

    audit::record(&state.db, user.id, "delete", "operation", Some(id), &json!({ "id": id })).await;

    Ok(Json(json!({ "success": true })))
}

pub async fn record_payment(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Json(input): Json<PaymentInput>,
) -> AppResult<Json<Operation>> {
    let user = require_permission(&cookies, &state, "operations:write").await?;

    let mut tx = state.db.begin().await?;

    let current = sqlx::query_as::<_, Operation>("SELECT * FROM operations WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Operation {}", id)))?;

    if !current.category().map_or(false, |c| c.tracks_payment()) {
        return Err(AppError::Validation(format!(
            "{} entries do not take payments",
            current.category
        )));
    }

    let (amount_paid, status) = register_payment(current.amount_paid, input.amount, current.total_cost)?;

    let op = sqlx::query_as::<_, Operation>(
        r#"
        UPDATE operations SET amount_paid = $2, payment_status = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(amount_paid)
    .bind(status.as_str())
    .fetch_one(&mut *tx)
    .await?;

    if status == PaymentStatus::Paid {
        clear_reminders(&mut tx, id).await?;
    }
    tx.commit().await?;

    log::info!("Payment of {} on operation {} -> {}", input.amount, id, status);
    audit::record(
        &state.db,
        user.id,
        "payment",
        "operation",
        Some(id),
        &json!({ "amount": input.amount, "amount_paid": amount_paid, "status": status }),
    )
    .await;

    Ok(Json(op))
}

pub async fn stock_summary(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<OperationFilters>,
) -> AppResult<Json<StockSummary>> {
    require_permission(&cookies, &state, "operations:read").await?;
    let ops = fetch_operations(&state.db, &filters).await?;
    Ok(Json(stock_by_plot(&ops)))
}

pub async fn cut_profits(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<OperationFilters>,
) -> AppResult<Json<Vec<CutProfit>>> {
    require_permission(&cookies, &state, "operations:read").await?;
    let ops = fetch_operations(&state.db, &filters).await?;
    Ok(Json(profit_by_cut(&ops)))
}
