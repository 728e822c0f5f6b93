use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tower_cookies::Cookies;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    handlers::audit,
    middleware::require_permission,
    models::{
        Product, SubscribeRequest, SubscribeResponse, Subscription, SubscriptionFilters,
        SubscriptionStatus,
    },
    services::payments::{AutoRecurring, PreapprovalRequest},
    state::AppState,
};

pub async fn subscribe(
    State(state): State<AppState>,
    Json(form): Json<SubscribeRequest>,
) -> AppResult<(StatusCode, Json<SubscribeResponse>)> {
    form.validate()?;

    let product = sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE id = $1 AND is_active = true",
    )
    .bind(form.product_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Product {}", form.product_id)))?;

    let amount = product.subscription_price.ok_or_else(|| {
        AppError::Validation(format!("'{}' has no subscription plan", product.title))
    })?;

    let email = form.email.trim().to_lowercase();
    let full_name = form
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let mut tx = state.db.begin().await?;

    let (customer_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO customers (email, full_name)
        VALUES ($1, $2)
        ON CONFLICT (email) DO UPDATE SET
            full_name = COALESCE(NULLIF(TRIM(customers.full_name), ''), EXCLUDED.full_name),
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(&email)
    .bind(full_name)
    .fetch_one(&mut *tx)
    .await?;

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (customer_id, product_id, payer_email, status, amount)
        VALUES ($1, $2, $3, 'pending', $4)
        RETURNING *
        "#,
    )
    .bind(customer_id)
    .bind(product.id)
    .bind(&email)
    .bind(amount)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let request = PreapprovalRequest {
        reason: format!("Suscripción mensual {}", product.title),
        payer_email: email.clone(),
        external_reference: subscription.id.to_string(),
        back_url: format!("{}/suscripcion/{}", state.config.site_url, subscription.id),
        auto_recurring: AutoRecurring::monthly(amount),
        status: "pending",
    };

    let preapproval = match state.payments.create_preapproval(&request).await {
        Ok(preapproval) => preapproval,
        Err(e) => {
            log::error!("Preapproval for subscription {} failed: {}", subscription.id, e);
            mark_cancelled(&state, subscription.id).await?;
            return Err(e);
        }
    };

    let Some(init_point) = preapproval.init_point.clone() else {
        mark_cancelled(&state, subscription.id).await?;
        return Err(AppError::Gateway(format!(
            "Preapproval {} came back without a checkout link",
            preapproval.id
        )));
    };

    sqlx::query(
        "UPDATE subscriptions SET mp_preapproval_id = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(subscription.id)
    .bind(&preapproval.id)
    .execute(&state.db)
    .await?;

    log::info!("Subscription {} started for {} on '{}'", subscription.id, email, product.title);

    Ok((
        StatusCode::CREATED,
        Json(SubscribeResponse {
            subscription_id: subscription.id,
            init_point,
        }),
    ))
}

async fn mark_cancelled(state: &AppState, id: Uuid) -> AppResult<Subscription> {
    let subscription = sqlx::query_as::<_, Subscription>(
        "UPDATE subscriptions SET status = 'cancelled', updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(subscription)
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<SubscriptionFilters>,
) -> AppResult<Json<Vec<Subscription>>> {
    require_permission(&cookies, &state, "subscriptions:read").await?;

    let subscriptions = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT * FROM subscriptions
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at DESC
        "#,
    )
    .bind(filters.status.as_deref().map(str::trim).filter(|s| !s.is_empty()))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(subscriptions))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Subscription>> {
    let user = require_permission(&cookies, &state, "subscriptions:write").await?;

    let subscription = sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subscription {}", id)))?;

    if subscription.status == SubscriptionStatus::Cancelled.as_str() {
        return Err(AppError::Validation("Subscription is already cancelled".to_string()));
    }

    // Stop billing at the gateway before recording the cancellation locally
    if let Some(preapproval_id) = subscription.mp_preapproval_id.as_deref() {
        state.payments.cancel_preapproval(preapproval_id).await?;
    }

    let cancelled = mark_cancelled(&state, id).await?;

    log::info!("Subscription {} cancelled by {}", id, user.email);
    audit::record(&state.db, user.id, "cancel", "subscription", Some(id), &cancelled).await;

    Ok(Json(cancelled))
}
