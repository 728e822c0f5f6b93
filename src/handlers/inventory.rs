use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgConnection;
use tower_cookies::Cookies;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    handlers::audit,
    ledger::money::{check_amount, checked_sum, checked_total, max_amount},
    middleware::require_permission,
    models::{
        InventoryItem, InventoryMovement, ItemFilters, ItemInput, MovementInput, MovementKind,
        MovementResult, OperationCategory,
    },
    state::AppState,
};

/// Ledger subcategory for purchases of farm inputs.
pub const SUPPLIES_SUBCATEGORY: &str = "Insumos";

const DEFAULT_UNIT: &str = "unidad";

fn check_amounts(form: &ItemInput) -> AppResult<()> {
    let negative = [form.quantity, form.unit_cost, form.min_stock]
        .into_iter()
        .flatten()
        .any(|v| v < Decimal::ZERO);
    if negative {
        return Err(AppError::Validation(
            "Quantity, unit cost and minimum stock cannot be negative".to_string(),
        ));
    }
    Ok(())
}

pub async fn list_items(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<ItemFilters>,
) -> AppResult<Json<Vec<InventoryItem>>> {
    require_permission(&cookies, &state, "inventory:read").await?;

    let items = sqlx::query_as::<_, InventoryItem>(
        r#"
        SELECT * FROM inventory_items
        WHERE ($1::text IS NULL OR kind = $1)
        ORDER BY name
        "#,
    )
    .bind(filters.kind.map(|k| k.as_str()))
    .fetch_all(&state.db)
    .await?;

    let items = if filters.low_stock.unwrap_or(false) {
        items.into_iter().filter(InventoryItem::is_low_stock).collect()
    } else {
        items
    };

    Ok(Json(items))
}

pub async fn create_item(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<ItemInput>,
) -> AppResult<(StatusCode, Json<InventoryItem>)> {
    let user = require_permission(&cookies, &state, "inventory:write").await?;
    form.validate()?;
    check_amounts(&form)?;

    let item = sqlx::query_as::<_, InventoryItem>(
        r#"
        INSERT INTO inventory_items (name, kind, unit, quantity, unit_cost, min_stock, notes, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(form.name.trim())
    .bind(form.kind.as_str())
    .bind(form.unit.as_deref().map(str::trim).filter(|u| !u.is_empty()).unwrap_or(DEFAULT_UNIT))
    .bind(form.quantity.unwrap_or(Decimal::ZERO))
    .bind(form.unit_cost.unwrap_or(Decimal::ZERO))
    .bind(form.min_stock.unwrap_or(Decimal::ZERO))
    .bind(&form.notes)
    .bind(form.is_active.unwrap_or(true))
    .fetch_one(&state.db)
    .await?;

    audit::record(&state.db, user.id, "create", "inventory_item", Some(item.id), &item).await;

    Ok((StatusCode::CREATED, Json(item)))
}

/// Edits item details. Quantity only changes through movements, so it is ignored here.
pub async fn update_item(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Json(form): Json<ItemInput>,
) -> AppResult<Json<InventoryItem>> {
    let user = require_permission(&cookies, &state, "inventory:write").await?;
    form.validate()?;
    check_amounts(&form)?;

    let item = sqlx::query_as::<_, InventoryItem>(
        r#"
        UPDATE inventory_items SET
            name = $2,
            kind = $3,
            unit = COALESCE($4, unit),
            unit_cost = COALESCE($5, unit_cost),
            min_stock = COALESCE($6, min_stock),
            notes = $7,
            is_active = COALESCE($8, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(form.name.trim())
    .bind(form.kind.as_str())
    .bind(form.unit.as_deref().map(str::trim).filter(|u| !u.is_empty()))
    .bind(form.unit_cost)
    .bind(form.min_stock)
    .bind(&form.notes)
    .bind(form.is_active)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Inventory item {}", id)))?;

    audit::record(&state.db, user.id, "update", "inventory_item", Some(id), &item).await;

    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let user = require_permission(&cookies, &state, "inventory:delete").await?;

    let result = sqlx::query("DELETE FROM inventory_items WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Inventory item {}", id)));
    }

    audit::record(&state.db, user.id, "delete", "inventory_item", Some(id), &json!({ "id": id })).await;

    Ok(Json(json!({ "success": true })))
}

pub async fn list_movements(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<InventoryMovement>>> {
    require_permission(&cookies, &state, "inventory:read").await?;

    let movements = sqlx::query_as::<_, InventoryMovement>(
        r#"
        SELECT * FROM inventory_movements
        WHERE item_id = $1
        ORDER BY movement_date DESC, created_at DESC
        "#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(movements))
}

/// Valuation and resulting stock of a movement against the current item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MovementPlan {
    unit_cost: Decimal,
    total_cost: Decimal,
    new_quantity: Decimal,
}

fn plan_movement(item: &InventoryItem, input: &MovementInput) -> AppResult<MovementPlan> {
    if input.quantity <= Decimal::ZERO {
        return Err(AppError::Validation("Quantity must be positive".to_string()));
    }
    let quantity = check_amount("Quantity", input.quantity)?;

    let unit_cost = match input.kind {
        MovementKind::Purchase => {
            let cost = input.unit_cost.ok_or_else(|| {
                AppError::Validation("Purchases need a unit cost".to_string())
            })?;
            if cost < Decimal::ZERO {
                return Err(AppError::Validation("Unit cost cannot be negative".to_string()));
            }
            check_amount("Unit cost", cost)?
        }
        MovementKind::Usage | MovementKind::Loss => item.unit_cost,
    };

    let new_quantity = checked_sum(
        "Resulting stock",
        item.quantity,
        input.kind.stock_delta(quantity),
        max_amount(),
    )?;
    if new_quantity < Decimal::ZERO {
        return Err(AppError::Validation(format!(
            "Only {} {} of '{}' in stock",
            item.quantity, item.unit, item.name
        )));
    }

    Ok(MovementPlan {
        unit_cost,
        total_cost: checked_total(quantity, unit_cost)?,
        new_quantity,
    })
}

/// `Costo Operacional` row posted alongside a purchase.
#[derive(Debug, Clone, PartialEq)]
struct SuppliesCost {
    description: String,
    quantity: Decimal,
    unit_cost: Decimal,
    total_cost: Decimal,
    pano_id: Option<String>,
    corte_id: Option<String>,
}

/// Only purchases cost money; usage and loss draw down stock that was already paid for.
fn supplies_cost(item: &InventoryItem, input: &MovementInput, plan: &MovementPlan) -> Option<SuppliesCost> {
    if input.kind != MovementKind::Purchase {
        return None;
    }
    let tag = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Some(SuppliesCost {
        description: format!("Compra de {}", item.name),
        quantity: input.quantity,
        unit_cost: plan.unit_cost,
        total_cost: plan.total_cost,
        pano_id: tag(&input.pano_id),
        corte_id: tag(&input.corte_id),
    })
}

/// Records a movement on an item: the movement row, the item's new stock and cost, and
/// for purchases the linked ledger row. The caller owns the transaction.
pub(crate) async fn apply_movement(
    conn: &mut PgConnection,
    item_id: Uuid,
    input: &MovementInput,
    user_id: Option<Uuid>,
) -> AppResult<MovementResult> {
    let item = sqlx::query_as::<_, InventoryItem>(
        "SELECT * FROM inventory_items WHERE id = $1 FOR UPDATE",
    )
    .bind(item_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Inventory item {}", item_id)))?;

    let plan = plan_movement(&item, input)?;
    let cost = supplies_cost(&item, input, &plan);

    let movement = sqlx::query_as::<_, InventoryMovement>(
        r#"
        INSERT INTO inventory_movements (
            item_id, kind, quantity, unit_cost, total_cost, movement_date, notes, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(item.id)
    .bind(input.kind.as_str())
    .bind(input.quantity)
    .bind(plan.unit_cost)
    .bind(plan.total_cost)
    .bind(input.movement_date)
    .bind(&input.notes)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    // Purchases also set the item's current cost
    let item = sqlx::query_as::<_, InventoryItem>(
        r#"
        UPDATE inventory_items SET
            quantity = $2,
            unit_cost = CASE WHEN $3 THEN $4 ELSE unit_cost END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(item.id)
    .bind(plan.new_quantity)
    .bind(input.kind == MovementKind::Purchase)
    .bind(plan.unit_cost)
    .fetch_one(&mut *conn)
    .await?;

    let operation_id = match cost {
        Some(cost) => {
            let (op_id,): (Uuid,) = sqlx::query_as(
                r#"
                INSERT INTO operations (
                    category, subcategory, description, quantity, unit_cost, total_cost,
                    operation_date, pano_id, corte_id, amount_paid, payment_status,
                    inventory_movement_id, created_by
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $6, 'paid', $10, $11)
                RETURNING id
                "#,
            )
            .bind(OperationCategory::OperatingCost.as_str())
            .bind(SUPPLIES_SUBCATEGORY)
            .bind(&cost.description)
            .bind(cost.quantity)
            .bind(cost.unit_cost)
            .bind(cost.total_cost)
            .bind(input.movement_date)
            .bind(&cost.pano_id)
            .bind(&cost.corte_id)
            .bind(movement.id)
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;
            Some(op_id)
        }
        None => None,
    };

    Ok(MovementResult {
        movement,
        item,
        operation_id,
    })
}

pub async fn record_movement(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Json(input): Json<MovementInput>,
) -> AppResult<(StatusCode, Json<MovementResult>)> {
    let user = require_permission(&cookies, &state, "inventory:write").await?;

    let mut tx = state.db.begin().await?;
    let result = apply_movement(&mut tx, id, &input, Some(user.id)).await?;
    tx.commit().await?;

    let item = &result.item;
    log::info!(
        "{} of {} {} on '{}', stock now {}",
        input.kind.as_str(),
        input.quantity,
        item.unit,
        item.name,
        item.quantity
    );
    if item.is_low_stock() {
        log::warn!("'{}' is at or below its minimum stock", item.name);
    }

    audit::record(&state.db, user.id, "movement", "inventory_item", Some(id), &result).await;

    Ok((StatusCode::CREATED, Json(result)))
}
