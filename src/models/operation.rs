use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ledger entry categories as stored in the `operations.category` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationCategory {
    #[serde(rename = "Rendimiento")]
    Yield,
    #[serde(rename = "Venta")]
    Sale,
    #[serde(rename = "Costo Operacional")]
    OperatingCost,
    #[serde(rename = "Retiro de Utilidad")]
    ProfitWithdrawal,
}

impl OperationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationCategory::Yield => "Rendimiento",
            OperationCategory::Sale => "Venta",
            OperationCategory::OperatingCost => "Costo Operacional",
            OperationCategory::ProfitWithdrawal => "Retiro de Utilidad",
        }
    }

    /// Categories that carry a payable amount and therefore a payment status.
    pub fn tracks_payment(&self) -> bool {
        matches!(
            self,
            OperationCategory::Sale | OperationCategory::OperatingCost
        )
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Rendimiento" => Ok(OperationCategory::Yield),
            "Venta" => Ok(OperationCategory::Sale),
            "Costo Operacional" => Ok(OperationCategory::OperatingCost),
            "Retiro de Utilidad" => Ok(OperationCategory::ProfitWithdrawal),
            other => Err(format!("unknown operation category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Operation {
    pub id: Uuid,
    pub category: String,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub operation_date: NaiveDate,
    pub pano_id: Option<String>,
    pub corte_id: Option<String>,
    pub amount_paid: Decimal,
    pub payment_status: String,
    pub payment_due_date: Option<NaiveDate>,
    pub order_id: Option<Uuid>,
    pub inventory_movement_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn category(&self) -> Option<OperationCategory> {
        self.category.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
pub struct OperationInput {
    pub category: OperationCategory,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub total_cost: Option<Decimal>,
    pub operation_date: NaiveDate,
    pub pano_id: Option<String>,
    pub corte_id: Option<String>,
    #[serde(default)]
    pub amount_paid: Decimal,
    pub payment_due_date: Option<NaiveDate>,
    // Where the payment reminder goes when a due date is set
    pub reminder_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OperationFilters {
    pub category: Option<String>,
    pub pano_id: Option<String>,
    pub corte_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentInput {
    pub amount: Decimal,
}
