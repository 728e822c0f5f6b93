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
    ledger::loyalty::{adjust_balance, profile_complete},
    middleware::require_permission,
    models::{Customer, CustomerDetail, CustomerInput, CustomerSearch, LoyaltyAdjustment, Order},
    state::AppState,
};

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Normalised copy of a CRM form plus its completeness flag.
struct CustomerFields {
    email: String,
    full_name: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    city: Option<String>,
    region: Option<String>,
    notes: Option<String>,
    is_complete: bool,
}

impl CustomerFields {
    fn from_input(form: &CustomerInput) -> AppResult<Self> {
        form.validate()?;

        let full_name = trimmed(&form.full_name);
        let phone = trimmed(&form.phone);
        let address = trimmed(&form.address);
        let city = trimmed(&form.city);
        let region = trimmed(&form.region);
        let is_complete = profile_complete(&full_name, &phone, &address, &city, &region);

        Ok(Self {
            email: form.email.trim().to_lowercase(),
            full_name,
            phone,
            address,
            city,
            region,
            notes: trimmed(&form.notes),
            is_complete,
        })
    }
}

pub async fn list_customers(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(search): Query<CustomerSearch>,
) -> AppResult<Json<Vec<Customer>>> {
    require_permission(&cookies, &state, "crm:read").await?;

    let pattern = trimmed(&search.q).map(|q| format!("%{}%", q));

    let customers = sqlx::query_as::<_, Customer>(
        r#"
        SELECT * FROM customers
        WHERE ($1::text IS NULL
               OR email ILIKE $1
               OR full_name ILIKE $1
               OR phone ILIKE $1
               OR city ILIKE $1)
          AND ($2 = false OR is_complete = false)
        ORDER BY created_at DESC
        "#,
    )
    .bind(pattern)
    .bind(search.incomplete_only.unwrap_or(false))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(customers))
}

pub async fn get_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CustomerDetail>> {
    require_permission(&cookies, &state, "crm:read").await?;

    let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Customer {}", id)))?;

    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE customer_id = $1 ORDER BY created_at DESC",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(CustomerDetail { customer, orders }))
}

pub async fn create_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<CustomerInput>,
) -> AppResult<(StatusCode, Json<Customer>)> {
    let user = require_permission(&cookies, &state, "crm:write").await?;
    let fields = CustomerFields::from_input(&form)?;

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (email, full_name, phone, address, city, region, notes, is_complete)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (email) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(&fields.email)
    .bind(&fields.full_name)
    .bind(&fields.phone)
    .bind(&fields.address)
    .bind(&fields.city)
    .bind(&fields.region)
    .bind(&fields.notes)
    .bind(fields.is_complete)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::Validation(format!("A customer with {} already exists", fields.email)))?;

    audit::record(&state.db, user.id, "create", "customer", Some(customer.id), &customer).await;

    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn update_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Json(form): Json<CustomerInput>,
) -> AppResult<Json<Customer>> {
    let user = require_permission(&cookies, &state, "crm:write").await?;
    let fields = CustomerFields::from_input(&form)?;

    let taken: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM customers WHERE email = $1 AND id <> $2")
            .bind(&fields.email)
            .bind(id)
            .fetch_optional(&state.db)
            .await?;
    if taken.is_some() {
        return Err(AppError::Validation(format!(
            "{} belongs to another customer",
            fields.email
        )));
    }

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        UPDATE customers SET
            email = $2, full_name = $3, phone = $4, address = $5, city = $6,
            region = $7, notes = $8, is_complete = $9, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&fields.email)
    .bind(&fields.full_name)
    .bind(&fields.phone)
    .bind(&fields.address)
    .bind(&fields.city)
    .bind(&fields.region)
    .bind(&fields.notes)
    .bind(fields.is_complete)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Customer {}", id)))?;

    audit::record(&state.db, user.id, "update", "customer", Some(id), &customer).await;

    Ok(Json(customer))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let user = require_permission(&cookies, &state, "crm:delete").await?;

    // Orders keep their guest e-mail and lose the link
    let result = sqlx::query("DELETE FROM customers WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Customer {}", id)));
    }

    audit::record(&state.db, user.id, "delete", "customer", Some(id), &json!({ "id": id })).await;

    Ok(Json(json!({ "success": true })))
}

pub async fn adjust_loyalty(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Json(adjustment): Json<LoyaltyAdjustment>,
) -> AppResult<Json<Customer>> {
    let user = require_permission(&cookies, &state, "crm:write").await?;

    if adjustment.points == 0 {
        return Err(AppError::Validation("Adjustment cannot be zero".to_string()));
    }

    let mut tx = state.db.begin().await?;

    let current: (i32,) =
        sqlx::query_as("SELECT loyalty_points FROM customers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Customer {}", id)))?;

    let balance = adjust_balance(current.0, adjustment.points);

    let customer = sqlx::query_as::<_, Customer>(
        "UPDATE customers SET loyalty_points = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(balance)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    audit::record(
        &state.db,
        user.id,
        "adjust_loyalty",
        "customer",
        Some(id),
        &json!({
            "points": adjustment.points,
            "reason": adjustment.reason,
            "balance": customer.loyalty_points,
        }),
    )
    .await;

    Ok(Json(customer))
}
