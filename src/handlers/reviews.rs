use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tower_cookies::Cookies;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    handlers::{audit, products::find_active_by_slug},
    middleware::require_permission,
    models::{Review, ReviewInput},
    state::AppState,
};

pub async fn list_product_reviews(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<Vec<Review>>> {
    let product = find_active_by_slug(&state, &slug).await?;

    let reviews = sqlx::query_as::<_, Review>(
        r#"
        SELECT * FROM reviews
        WHERE product_id = $1 AND is_approved = true
        ORDER BY created_at DESC
        "#,
    )
    .bind(product.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(reviews))
}

/// Stores a review held for moderation.
pub async fn submit_review(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(form): Json<ReviewInput>,
) -> AppResult<(StatusCode, Json<Review>)> {
    form.validate()?;
    let product = find_active_by_slug(&state, &slug).await?;

    let review = sqlx::query_as::<_, Review>(
        r#"
        INSERT INTO reviews (product_id, customer_name, rating, comment)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(product.id)
    .bind(form.customer_name.trim())
    .bind(form.rating)
    .bind(form.comment.as_deref().map(str::trim).filter(|c| !c.is_empty()))
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn list_pending_reviews(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Vec<Review>>> {
    require_permission(&cookies, &state, "reviews:moderate").await?;

    let reviews = sqlx::query_as::<_, Review>(
        "SELECT * FROM reviews WHERE is_approved = false ORDER BY created_at",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(reviews))
}

pub async fn approve_review(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Review>> {
    let user = require_permission(&cookies, &state, "reviews:moderate").await?;

    let review = sqlx::query_as::<_, Review>(
        "UPDATE reviews SET is_approved = true WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Review {}", id)))?;

    audit::record(&state.db, user.id, "approve", "review", Some(id), &review).await;

    Ok(Json(review))
}

pub async fn delete_review(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let user = require_permission(&cookies, &state, "reviews:moderate").await?;

    let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Review {}", id)));
    }

    audit::record(&state.db, user.id, "delete", "review", Some(id), &json!({ "id": id })).await;

    Ok(Json(json!({ "success": true })))
}
