use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::Database;
use crate::error::AppResult;
use crate::services::{Mailer, MercadoPago};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<AppConfig>,
    pub payments: MercadoPago,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(db: Database, config: AppConfig) -> AppResult<Self> {
        let payments = MercadoPago::new(&config)?;
        let mailer = Mailer::new(&config)?;
        Ok(Self {
            db,
            config: Arc::new(config),
            payments,
            mailer,
        })
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}
