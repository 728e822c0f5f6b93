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
    handlers::{audit, settings::load_settings},
    ledger::{money::check_amount, one_time_price},
    middleware::require_permission,
    models::{Product, ProductInput, ProductQuery},
    state::AppState,
    utils::slugify,
};

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> AppResult<Json<Vec<Product>>> {
    let products = sqlx::query_as::<_, Product>(
        r#"
        SELECT * FROM products
        WHERE is_active = true AND ($1::text IS NULL OR category = $1)
        ORDER BY title
        "#,
    )
    .bind(query.category.filter(|c| !c.trim().is_empty()))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<Product>> {
    let product = find_active_by_slug(&state, &slug).await?;
    Ok(Json(product))
}

pub(crate) async fn find_active_by_slug(state: &AppState, slug: &str) -> AppResult<Product> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE slug = $1 AND is_active = true")
        .bind(slug)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Product '{}'", slug)))
}

pub async fn admin_list_products(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Vec<Product>>> {
    require_permission(&cookies, &state, "catalog:read").await?;

    let products = sqlx::query_as::<_, Product>("SELECT * FROM products ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(products))
}

/// Fields resolved from a product form before it is written.
struct ResolvedProduct {
    slug: String,
    price: rust_decimal::Decimal,
}

async fn resolve(state: &AppState, form: &ProductInput) -> AppResult<ResolvedProduct> {
    form.validate()?;

    let slug = match form.slug.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => slugify(s),
        _ => slugify(&form.title),
    };
    if slug.is_empty() {
        return Err(AppError::Validation(
            "Title must contain letters or digits".to_string(),
        ));
    }

    let price = match (form.price, form.subscription_price) {
        (Some(price), _) => price,
        (None, Some(subscription_price)) => {
            let settings = load_settings(&state.db).await?;
            one_time_price(subscription_price, settings.subscription_markup)?
        }
        (None, None) => {
            return Err(AppError::Validation(
                "Either price or subscription_price is required".to_string(),
            ))
        }
    };

    if price.is_sign_negative() || form.subscription_price.map_or(false, |p| p.is_sign_negative()) {
        return Err(AppError::Validation("Prices cannot be negative".to_string()));
    }
    check_amount("Price", price)?;
    if let Some(subscription_price) = form.subscription_price {
        check_amount("Subscription price", subscription_price)?;
    }

    Ok(ResolvedProduct { slug, price })
}

async fn ensure_slug_free(state: &AppState, slug: &str, except: Option<Uuid>) -> AppResult<()> {
    let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE slug = $1")
        .bind(slug)
        .fetch_optional(&state.db)
        .await?;

    match existing {
        Some((id,)) if Some(id) != except => Err(AppError::Validation(format!(
            "Slug '{}' is already used by another product",
            slug
        ))),
        _ => Ok(()),
    }
}

pub async fn create_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<ProductInput>,
) -> AppResult<(StatusCode, Json<Product>)> {
    let user = require_permission(&cookies, &state, "catalog:write").await?;
    let resolved = resolve(&state, &form).await?;
    ensure_slug_free(&state, &resolved.slug, None).await?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (
            title, slug, description, category, price, subscription_price,
            mp_plan_id, stock, image_url, is_active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(form.title.trim())
    .bind(&resolved.slug)
    .bind(&form.description)
    .bind(&form.category)
    .bind(resolved.price)
    .bind(form.subscription_price)
    .bind(&form.mp_plan_id)
    .bind(form.stock.unwrap_or(0))
    .bind(&form.image_url)
    .bind(form.is_active.unwrap_or(true))
    .fetch_one(&state.db)
    .await?;

    log::info!("Created product {} ({})", product.title, product.slug);
    audit::record(&state.db, user.id, "create", "product", Some(product.id), &product).await;

    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Json(form): Json<ProductInput>,
) -> AppResult<Json<Product>> {
    let user = require_permission(&cookies, &state, "catalog:write").await?;
    let resolved = resolve(&state, &form).await?;
    ensure_slug_free(&state, &resolved.slug, Some(id)).await?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products SET
            title = $2,
            slug = $3,
            description = $4,
            category = $5,
            price = $6,
            subscription_price = $7,
            mp_plan_id = $8,
            stock = COALESCE($9, stock),
            image_url = $10,
            is_active = COALESCE($11, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(form.title.trim())
    .bind(&resolved.slug)
    .bind(&form.description)
    .bind(&form.category)
    .bind(resolved.price)
    .bind(form.subscription_price)
    .bind(&form.mp_plan_id)
    .bind(form.stock)
    .bind(&form.image_url)
    .bind(form.is_active)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Product {}", id)))?;

    audit::record(&state.db, user.id, "update", "product", Some(product.id), &product).await;

    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let user = require_permission(&cookies, &state, "catalog:delete").await?;

    let result = sqlx::query("DELETE FROM products WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Product {}", id)));
    }

    audit::record(&state.db, user.id, "delete", "product", Some(id), &json!({ "id": id })).await;

    Ok(Json(json!({ "success": true })))
}
