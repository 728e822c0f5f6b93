use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tower_cookies::{Cookie, Cookies};
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    handlers::audit,
    middleware::{get_current_user, require_permission, CurrentUser, AUTH_COOKIE},
    models::{CreateUser, LoginRequest, User, UserResponse},
    state::AppState,
    utils::{create_token, hash_password, verify_password, auth::TOKEN_TTL_HOURS},
};

pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<LoginRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = authenticate_user(&state, &form.email, &form.password)
        .await
        .ok_or_else(|| AppError::Unauthorized("Invalid email or password".to_string()))?;

    let token = create_token(
        &state.config.jwt_secret,
        user.id,
        user.email.clone(),
        user.role.clone(),
    )?;

    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    // HTTP-only cookie carrying the JWT
    let cookie = Cookie::build((AUTH_COOKIE, token))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::hours(TOKEN_TTL_HOURS))
        .build();
    cookies.add(cookie);

    log::info!("User {} signed in", user.email);
    Ok(Json(UserResponse::from(user)))
}

pub async fn logout(cookies: Cookies) -> Json<Value> {
    let mut cookie = Cookie::from(AUTH_COOKIE);
    cookie.set_path("/");
    cookies.remove(cookie);
    Json(json!({ "success": true }))
}

pub async fn me(State(state): State<AppState>, cookies: Cookies) -> AppResult<Json<CurrentUser>> {
    get_current_user(&cookies, &state)
        .await
        .map(Json)
        .ok_or_else(|| AppError::Unauthorized("Sign in required".to_string()))
}

pub async fn list_users(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Vec<UserResponse>>> {
    require_permission(&cookies, &state, "team:write").await?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<CreateUser>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let admin = require_permission(&cookies, &state, "team:write").await?;
    form.validate()?;

    let role = form.role.as_deref().unwrap_or("staff");
    if !matches!(role, "admin" | "staff") {
        return Err(AppError::Validation(format!("Unknown role '{}'", role)));
    }

    let email = form.email.trim().to_lowercase();
    let taken: Option<(uuid::Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if taken.is_some() {
        return Err(AppError::Validation(format!("{} is already registered", email)));
    }

    let password_hash = hash_password(&form.password)?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, full_name, role)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(form.full_name.trim())
    .bind(role)
    .fetch_one(&state.db)
    .await?;

    let response = UserResponse::from(user);
    audit::record(&state.db, admin.id, "create", "user", Some(response.id), &response).await;

    Ok((StatusCode::CREATED, Json(response)))
}

async fn authenticate_user(state: &AppState, email: &str, password: &str) -> Option<User> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE email = $1 AND is_active = true",
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(&state.db)
    .await
    .ok()??;

    match verify_password(password, &user.password_hash) {
        Ok(true) => Some(user),
        _ => None,
    }
}
