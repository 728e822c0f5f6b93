use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

use crate::error::AppResult;
use crate::utils::hash_password;

pub type Database = Pool<Postgres>;

pub async fn create_database_pool(database_url: &str) -> AppResult<Database> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    log::info!("Connected to database successfully");
    Ok(pool)
}

pub async fn run_migrations(db: &Database) -> AppResult<()> {
    sqlx::migrate!("./migrations").run(db).await?;
    log::info!("Database migrations applied");
    Ok(())
}

/// Creates the first admin account when the users table is empty and credentials are configured.
pub async fn seed_admin(db: &Database, email: Option<&str>, password: Option<&str>) -> AppResult<()> {
    let (Some(email), Some(password)) = (email, password) else {
        return Ok(());
    };

    let user_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(db)
        .await?;
    if user_count > 0 {
        return Ok(());
    }

    let password_hash = hash_password(password)?;
    sqlx::query(
        "INSERT INTO users (email, password_hash, full_name, role) VALUES ($1, $2, 'Administrador', 'admin')",
    )
    .bind(email)
    .bind(password_hash)
    .execute(db)
    .await?;

    log::info!("Seeded admin user {}", email);
    Ok(())
}
