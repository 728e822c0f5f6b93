use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Material,
    Tool,
    Equipment,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Material => "material",
            ItemKind::Tool => "tool",
            ItemKind::Equipment => "equipment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Purchase,
    Usage,
    Loss,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Purchase => "purchase",
            MovementKind::Usage => "usage",
            MovementKind::Loss => "loss",
        }
    }

    /// Signed stock change this movement applies to the item.
    pub fn stock_delta(&self, quantity: Decimal) -> Decimal {
        match self {
            MovementKind::Purchase => quantity,
            MovementKind::Usage | MovementKind::Loss => -quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryItem {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub unit: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub min_stock: Decimal,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn is_low_stock(&self) -> bool {
        self.is_active && self.quantity <= self.min_stock
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryMovement {
    pub id: Uuid,
    pub item_id: Uuid,
    pub kind: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub movement_date: NaiveDate,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ItemInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub kind: ItemKind,
    pub unit: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
    pub min_stock: Option<Decimal>,
    pub notes: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ItemFilters {
    pub low_stock: Option<bool>,
    pub kind: Option<ItemKind>,
}

#[derive(Debug, Deserialize)]
pub struct MovementInput {
    pub kind: MovementKind,
    pub quantity: Decimal,
    // Required for purchases; usage and loss are valued at the item's current cost
    pub unit_cost: Option<Decimal>,
    pub movement_date: NaiveDate,
    pub notes: Option<String>,
    pub pano_id: Option<String>,
    pub corte_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MovementResult {
    pub movement: InventoryMovement,
    pub item: InventoryItem,
    pub operation_id: Option<Uuid>,
}
