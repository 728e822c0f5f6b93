use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::User,
    state::AppState,
    utils::verify_token,
};

pub const AUTH_COOKIE: &str = "auth_token";

const STAFF_PERMISSIONS: &[&str] = &[
    "catalog:read",
    "catalog:write",
    "orders:read",
    "orders:write",
    "crm:read",
    "crm:write",
    "operations:read",
    "operations:write",
    "inventory:read",
    "inventory:write",
    "subscriptions:read",
    "reviews:moderate",
    "alerts:read",
];

const ADMIN_ONLY_PERMISSIONS: &[&str] = &[
    "catalog:delete",
    "crm:delete",
    "operations:delete",
    "inventory:delete",
    "subscriptions:write",
    "alerts:write",
    "settings:write",
    "audit:read",
    "team:write",
];

/// Permission keys granted to a role.
pub fn permissions_for_role(role: &str) -> Vec<String> {
    let mut permissions: Vec<String> = match role {
        "admin" | "staff" => STAFF_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
        _ => Vec::new(),
    };
    if role == "admin" {
        permissions.extend(ADMIN_ONLY_PERMISSIONS.iter().map(|p| p.to_string()));
    }
    permissions
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub permissions: Vec<String>,
}

impl CurrentUser {
    pub fn from_user(user: User) -> Self {
        let permissions = permissions_for_role(&user.role);
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            permissions,
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

pub async fn get_current_user(cookies: &Cookies, state: &AppState) -> Option<CurrentUser> {
    // JWT lives in the auth_token cookie
    let token = cookies.get(AUTH_COOKIE)?.value().to_string();
    let claims = verify_token(&state.config.jwt_secret, &token).ok()?;
    let user_id = Uuid::parse_str(&claims.sub).ok()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND is_active = true")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await
        .ok()??;

    Some(CurrentUser::from_user(user))
}

/// Resolves the signed-in staff member and checks one permission key.
pub async fn require_permission(
    cookies: &Cookies,
    state: &AppState,
    permission: &str,
) -> AppResult<CurrentUser> {
    // Reject before touching the database when no session cookie is present
    if cookies.get(AUTH_COOKIE).is_none() {
        return Err(AppError::Unauthorized("Sign in required".to_string()));
    }

    let user = get_current_user(cookies, state)
        .await
        .ok_or_else(|| AppError::Unauthorized("Session expired or invalid".to_string()))?;

    if !user.has_permission(permission) {
        return Err(AppError::Forbidden(format!("Missing permission {}", permission)));
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_has_every_staff_permission() {
        let admin = permissions_for_role("admin");
        for permission in STAFF_PERMISSIONS {
            assert!(admin.iter().any(|p| p == permission));
        }
        assert!(admin.iter().any(|p| p == "settings:write"));
    }

    #[test]
    fn staff_cannot_change_settings_or_delete() {
        let staff = permissions_for_role("staff");
        assert!(staff.iter().any(|p| p == "operations:write"));
        assert!(!staff.iter().any(|p| p == "settings:write"));
        assert!(!staff.iter().any(|p| p == "operations:delete"));
    }

    #[test]
    fn unknown_roles_get_nothing() {
        assert!(permissions_for_role("customer").is_empty());
    }
}
