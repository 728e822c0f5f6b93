use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Maps a MercadoPago preapproval status onto ours.
    pub fn from_gateway(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(SubscriptionStatus::Pending),
            "authorized" => Some(SubscriptionStatus::Active),
            "paused" => Some(SubscriptionStatus::Paused),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub payer_email: String,
    pub mp_preapproval_id: Option<String>,
    pub status: String,
    pub amount: Decimal,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub last_payment_id: Option<String>,
    pub last_charged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubscribeRequest {
    pub product_id: Uuid,
    #[validate(email)]
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub subscription_id: Uuid,
    pub init_point: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionFilters {
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_statuses_map() {
        assert_eq!(
            SubscriptionStatus::from_gateway("authorized"),
            Some(SubscriptionStatus::Active)
        );
        assert_eq!(
            SubscriptionStatus::from_gateway("cancelled"),
            Some(SubscriptionStatus::Cancelled)
        );
        assert_eq!(SubscriptionStatus::from_gateway("weird"), None);
    }
}
