use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PaymentReminder,
    LoyaltyNotice,
    Custom,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::PaymentReminder => "payment_reminder",
            AlertKind::LoyaltyNotice => "loyalty_notice",
            AlertKind::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingAlert {
    pub id: Uuid,
    pub kind: String,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    pub due_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub operation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AlertInput {
    pub kind: AlertKind,
    #[validate(email)]
    pub recipient_email: String,
    #[validate(length(min = 1, max = 200))]
    pub subject: String,
    #[validate(length(min = 1))]
    pub body: String,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AlertFilters {
    pub include_sent: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}
