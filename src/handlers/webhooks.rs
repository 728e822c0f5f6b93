use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    handlers::settings::load_settings,
    ledger::loyalty::{crossed_reward, points_for},
    models::{Customer, OperationCategory, Order, OrderItem, Subscription, SubscriptionStatus},
    services::{email, payments::Payment},
    state::AppState,
};

/// Subcategory of the ledger rows created for paid web orders.
pub const WEB_SALE_SUBCATEGORY: &str = "Venta web";

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub topic: Option<String>,
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationData {
    id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    data: Option<NotificationData>,
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// MercadoPago notification endpoint. Accepts both the `type`/`data.id` and the legacy
/// `topic`/`id` shapes, with the same fields optionally repeated in the JSON body.
pub async fn mercadopago_webhook(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let body: NotificationBody = serde_json::from_slice(&body).unwrap_or_default();

    let topic = query
        .kind
        .or(query.topic)
        .or(body.kind)
        .unwrap_or_default();
    let resource_id = query
        .data_id
        .or(query.id)
        .or_else(|| body.data.and_then(|d| d.id).as_ref().and_then(value_to_id))
        .unwrap_or_default();

    if !state.payments.verify_signature(
        header(&headers, "x-signature"),
        header(&headers, "x-request-id"),
        &resource_id,
    ) {
        log::warn!("Rejected webhook with invalid signature (topic '{}')", topic);
        return Err(AppError::Unauthorized("Invalid webhook signature".to_string()));
    }

    match topic.as_str() {
        "payment" if !resource_id.is_empty() => handle_payment(&state, &resource_id).await?,
        "subscription_preapproval" | "preapproval" if !resource_id.is_empty() => {
            handle_preapproval(&state, &resource_id).await?
        }
        other => log::debug!("Ignoring webhook topic '{}'", other),
    }

    Ok(Json(json!({ "received": true })))
}

async fn handle_payment(state: &AppState, payment_id: &str) -> AppResult<()> {
    let payment = state.payments.get_payment(payment_id).await?;

    let Some(reference) = payment
        .external_reference
        .as_deref()
        .and_then(|r| Uuid::parse_str(r).ok())
    else {
        log::warn!("Payment {} has no order reference", payment.id);
        return Ok(());
    };

    let mut conn = state.db.acquire().await?;

    // Recurring preapproval charges reference the subscription, not an order
    let subscription: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM subscriptions WHERE id = $1")
        .bind(reference)
        .fetch_optional(&mut *conn)
        .await?;
    if subscription.is_some() {
        if !payment.is_approved() {
            log::info!("Charge {} for subscription {} is {}", payment.id, reference, payment.status);
        } else if record_subscription_charge(&mut conn, reference, &payment).await?.is_some() {
            log::info!("Charge {} recorded for subscription {}", payment.id, reference);
        } else {
            log::debug!("Charge {} already recorded for subscription {}", payment.id, reference);
        }
        return Ok(());
    }
    drop(conn);

    if payment.is_approved() {
        mark_paid(state, reference, &payment).await
    } else if payment.is_failed() {
        let result = sqlx::query(
            "UPDATE orders SET status = 'cancelled', updated_at = NOW() WHERE id = $1 AND status = 'pending'",
        )
        .bind(reference)
        .execute(&state.db)
        .await?;
        if result.rows_affected() > 0 {
            log::info!("Order {} cancelled after payment {} was {}", reference, payment.id, payment.status);
        }
        Ok(())
    } else {
        log::info!("Payment {} for order {} is {}", payment.id, reference, payment.status);
        Ok(())
    }
}

/// Stores the latest approved charge on a subscription. Returns `None` when that charge
/// was already recorded.
pub(crate) async fn record_subscription_charge(
    conn: &mut PgConnection,
    subscription_id: Uuid,
    payment: &Payment,
) -> AppResult<Option<Subscription>> {
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET last_payment_id = $2, last_charged_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND last_payment_id IS DISTINCT FROM $2
        RETURNING *
        "#,
    )
    .bind(subscription_id)
    .bind(payment.id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(subscription)
}

/// Ledger row posted for one line of a paid web order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SaleEntry {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
}

/// One `Venta` row per order line, valued at the price the customer paid.
pub(crate) fn sale_entries(order_id: Uuid, items: &[OrderItem]) -> Vec<SaleEntry> {
    items
        .iter()
        .map(|item| SaleEntry {
            description: format!("{} (pedido {})", item.title, order_id),
            quantity: Decimal::from(item.quantity),
            unit_price: item.unit_price,
            total: item.line_total,
        })
        .collect()
}

/// An order whose payment was just applied, with what the caller still has to notify.
pub(crate) struct PaidOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Set when the order pushed the customer's balance past a reward threshold.
    pub loyalty_due: Option<Customer>,
}

/// Applies an approved payment to an order: stock, ledger rows and customer totals move
/// together with the status change. An order that already carries a payment id is left
/// alone and `None` is returned.
pub(crate) async fn apply_approved_payment(
    conn: &mut PgConnection,
    order_id: Uuid,
    payment: &Payment,
) -> AppResult<Option<PaidOrder>> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders SET
            status = CASE WHEN status IN ('pending', 'cancelled') THEN 'paid' ELSE status END,
            mp_payment_id = $2,
            updated_at = NOW()
        WHERE id = $1 AND mp_payment_id IS NULL
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(payment.id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(order) = order else {
        return Ok(None);
    };

    if let Some(amount) = payment.transaction_amount {
        if amount != order.total_amount {
            log::warn!(
                "Payment {} amount {} differs from order {} total {}",
                payment.id, amount, order.id, order.total_amount
            );
        }
    }

    let items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = $1")
        .bind(order.id)
        .fetch_all(&mut *conn)
        .await?;

    for item in &items {
        let Some(product_id) = item.product_id else {
            continue;
        };
        sqlx::query(
            "UPDATE products SET stock = GREATEST(stock - $2, 0), updated_at = NOW() WHERE id = $1",
        )
        .bind(product_id)
        .bind(item.quantity)
        .execute(&mut *conn)
        .await?;
    }

    let today = Utc::now().date_naive();
    for entry in sale_entries(order.id, &items) {
        sqlx::query(
            r#"
            INSERT INTO operations (
                category, subcategory, description, quantity, unit_cost, total_cost,
                operation_date, amount_paid, payment_status, order_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $6, 'paid', $8)
            "#,
        )
        .bind(OperationCategory::Sale.as_str())
        .bind(WEB_SALE_SUBCATEGORY)
        .bind(&entry.description)
        .bind(entry.quantity)
        .bind(entry.unit_price)
        .bind(entry.total)
        .bind(today)
        .bind(order.id)
        .execute(&mut *conn)
        .await?;
    }

    let mut loyalty_due = None;
    if let Some(customer_id) = order.customer_id {
        let settings = load_settings(&mut *conn).await?;
        let earned = points_for(order.total_amount, settings.loyalty_points_per_unit);

        let customer = sqlx::query_as::<_, Customer>(
            r#"
            UPDATE customers SET
                total_orders = total_orders + 1,
                total_spent = total_spent + $2,
                loyalty_points = loyalty_points + $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(customer_id)
        .bind(order.total_amount)
        .bind(earned)
        .fetch_optional(&mut *conn)
        .await?;

        loyalty_due = customer.filter(|c| {
            crossed_reward(c.loyalty_points - earned, c.loyalty_points, settings.loyalty_reward_threshold)
        });
    }

    Ok(Some(PaidOrder {
        order,
        items,
        loyalty_due,
    }))
}

async fn mark_paid(state: &AppState, order_id: Uuid, payment: &Payment) -> AppResult<()> {
    let mut tx = state.db.begin().await?;
    let Some(paid) = apply_approved_payment(&mut tx, order_id, payment).await? else {
        log::info!("Order {} already has a payment, ignoring payment {}", order_id, payment.id);
        return Ok(());
    };
    tx.commit().await?;
    log::info!("Order {} paid with payment {}", paid.order.id, payment.id);

    state
        .mailer
        .send_logged(email::order_confirmation(&paid.order, &paid.items, &state.config.site_url))
        .await;
    if let Some(customer) = paid.loyalty_due {
        state
            .mailer
            .send_logged(email::loyalty_notice(
                &customer.email,
                customer.full_name.as_deref(),
                customer.loyalty_points,
            ))
            .await;
    }

    Ok(())
}

async fn handle_preapproval(state: &AppState, preapproval_id: &str) -> AppResult<()> {
    let preapproval = state.payments.get_preapproval(preapproval_id).await?;

    let Some(status) = SubscriptionStatus::from_gateway(&preapproval.status) else {
        log::warn!(
            "Preapproval {} has unmapped status '{}'",
            preapproval.id, preapproval.status
        );
        return Ok(());
    };

    let reference = preapproval
        .external_reference
        .as_deref()
        .and_then(|r| Uuid::parse_str(r).ok());

    let result = sqlx::query(
        r#"
        UPDATE subscriptions SET
            status = $3,
            mp_preapproval_id = $1,
            next_billing_date = COALESCE($4, next_billing_date),
            updated_at = NOW()
        WHERE mp_preapproval_id = $1 OR id = $2
        "#,
    )
    .bind(&preapproval.id)
    .bind(reference)
    .bind(status.as_str())
    .bind(preapproval.next_payment_date)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        log::warn!("No subscription matches preapproval {}", preapproval.id);
    } else {
        log::info!("Subscription for preapproval {} is now {}", preapproval.id, status.as_str());
    }

    Ok(())
}
