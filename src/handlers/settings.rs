use axum::{extract::State, Json};
use tower_cookies::Cookies;

use crate::{
    error::{AppError, AppResult},
    handlers::audit,
    middleware::require_permission,
    models::{Settings, SettingsUpdate},
    state::AppState,
};

pub async fn load_settings<'e, E>(executor: E) -> AppResult<Settings>
where
    E: sqlx::PgExecutor<'e>,
{
    let settings = sqlx::query_as::<_, Settings>(
        r#"
        SELECT tractor_cost_per_bale, irrigation_cost_per_day, shipping_cost,
               free_shipping_threshold, loyalty_points_per_unit, loyalty_reward_threshold,
               subscription_markup, updated_at
        FROM settings WHERE id = 1
        "#,
    )
    .fetch_optional(executor)
    .await?;

    Ok(settings.unwrap_or_default())
}

pub async fn get_settings(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Settings>> {
    require_permission(&cookies, &state, "operations:read").await?;
    Ok(Json(load_settings(&state.db).await?))
}

pub async fn update_settings(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(update): Json<SettingsUpdate>,
) -> AppResult<Json<Settings>> {
    let user = require_permission(&cookies, &state, "settings:write").await?;

    let current = load_settings(&state.db).await?;
    let merged = update.apply(&current).map_err(AppError::Validation)?;

    let saved = sqlx::query_as::<_, Settings>(
        r#"
        INSERT INTO settings (
            id, tractor_cost_per_bale, irrigation_cost_per_day, shipping_cost,
            free_shipping_threshold, loyalty_points_per_unit, loyalty_reward_threshold,
            subscription_markup, updated_at
        )
        VALUES (1, $1, $2, $3, $4, $5, $6, $7, NOW())
        ON CONFLICT (id) DO UPDATE SET
            tractor_cost_per_bale = EXCLUDED.tractor_cost_per_bale,
            irrigation_cost_per_day = EXCLUDED.irrigation_cost_per_day,
            shipping_cost = EXCLUDED.shipping_cost,
            free_shipping_threshold = EXCLUDED.free_shipping_threshold,
            loyalty_points_per_unit = EXCLUDED.loyalty_points_per_unit,
            loyalty_reward_threshold = EXCLUDED.loyalty_reward_threshold,
            subscription_markup = EXCLUDED.subscription_markup,
            updated_at = NOW()
        RETURNING tractor_cost_per_bale, irrigation_cost_per_day, shipping_cost,
                  free_shipping_threshold, loyalty_points_per_unit, loyalty_reward_threshold,
                  subscription_markup, updated_at
        "#,
    )
    .bind(merged.tractor_cost_per_bale)
    .bind(merged.irrigation_cost_per_day)
    .bind(merged.shipping_cost)
    .bind(merged.free_shipping_threshold)
    .bind(merged.loyalty_points_per_unit)
    .bind(merged.loyalty_reward_threshold)
    .bind(merged.subscription_markup)
    .fetch_one(&state.db)
    .await?;

    audit::record(&state.db, user.id, "update", "settings", None, &saved).await;

    Ok(Json(saved))
}
