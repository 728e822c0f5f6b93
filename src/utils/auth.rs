use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;

pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, email: String, role: String) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(TOKEN_TTL_HOURS);

        Self {
            sub: user_id.to_string(),
            email,
            role,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }
}

pub fn create_token(secret: &str, user_id: Uuid, email: String, role: String) -> AppResult<String> {
    let claims = Claims::new(user_id, email, role);

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

pub fn verify_token(secret: &str, token: &str) -> AppResult<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

pub fn hash_password(password: &str) -> AppResult<String> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    Ok(bcrypt::verify(password, hash)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip_keeps_subject_and_role() {
        let id = Uuid::new_v4();
        let token = create_token("secret", id, "admin@fardo.cl".into(), "admin".into()).unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, id.to_string());
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = create_token("secret", Uuid::new_v4(), "a@b.cl".into(), "staff".into()).unwrap();
        assert!(verify_token("another", &token).is_err());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = bcrypt::hash("fardos", 4).unwrap();
        assert!(verify_password("fardos", &hash).unwrap());
        assert!(!verify_password("alfalfa", &hash).unwrap());
    }
}
