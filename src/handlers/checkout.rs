use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    handlers::{orders::load_items, settings::load_settings},
    ledger::{loyalty::profile_complete, quote_cart, CartQuote},
    models::{
        CartLine, CartRequest, CheckoutRequest, CheckoutResponse, Customer, Order,
        OrderLookupQuery, OrderWithItems, Product,
    },
    services::payments::{BackUrls, Payer, PreferenceItem, PreferenceRequest},
    state::AppState,
};

async fn price_cart(state: &AppState, lines: &[CartLine]) -> AppResult<CartQuote> {
    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let products = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_all(&state.db)
        .await?;
    let settings = load_settings(&state.db).await?;

    quote_cart(lines, &products, &settings)
}

pub async fn quote(
    State(state): State<AppState>,
    Json(cart): Json<CartRequest>,
) -> AppResult<Json<CartQuote>> {
    cart.validate()?;
    Ok(Json(price_cart(&state, &cart.items).await?))
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Creates or refreshes the CRM record for a checkout e-mail. Fields already on file win;
/// checkout data only fills the blanks.
async fn upsert_customer(
    conn: &mut PgConnection,
    email: &str,
    form: &CheckoutRequest,
) -> AppResult<Customer> {
    let customer = sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (email, full_name, phone, address, city, region)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (email) DO UPDATE SET
            full_name = COALESCE(NULLIF(TRIM(customers.full_name), ''), EXCLUDED.full_name),
            phone = COALESCE(NULLIF(TRIM(customers.phone), ''), EXCLUDED.phone),
            address = COALESCE(NULLIF(TRIM(customers.address), ''), EXCLUDED.address),
            city = COALESCE(NULLIF(TRIM(customers.city), ''), EXCLUDED.city),
            region = COALESCE(NULLIF(TRIM(customers.region), ''), EXCLUDED.region),
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(email)
    .bind(form.full_name.trim())
    .bind(clean(&form.phone))
    .bind(form.shipping_address.trim())
    .bind(clean(&form.city))
    .bind(clean(&form.region))
    .fetch_one(&mut *conn)
    .await?;

    let complete = profile_complete(
        &customer.full_name,
        &customer.phone,
        &customer.address,
        &customer.city,
        &customer.region,
    );
    if complete == customer.is_complete {
        return Ok(customer);
    }

    let customer = sqlx::query_as::<_, Customer>(
        "UPDATE customers SET is_complete = $2 WHERE id = $1 RETURNING *",
    )
    .bind(customer.id)
    .bind(complete)
    .fetch_one(&mut *conn)
    .await?;

    Ok(customer)
}

fn preference_for(state: &AppState, order: &Order, quote: &CartQuote) -> PreferenceRequest {
    let site = &state.config.site_url;

    let mut items: Vec<PreferenceItem> = quote
        .lines
        .iter()
        .map(|line| {
            PreferenceItem::new(
                line.product_id.to_string(),
                line.title.clone(),
                line.quantity,
                line.unit_price,
            )
        })
        .collect();
    if quote.shipping_cost > Decimal::ZERO {
        items.push(PreferenceItem::new(
            "shipping".to_string(),
            "Despacho".to_string(),
            1,
            quote.shipping_cost,
        ));
    }

    let order_page = format!("{}/pedido/{}", site, order.id);
    PreferenceRequest {
        items,
        payer: Payer {
            email: order.guest_email.clone(),
            name: Some(order.guest_name.clone()),
        },
        external_reference: order.id.to_string(),
        back_urls: BackUrls {
            success: format!("{}?estado=aprobado", order_page),
            failure: format!("{}?estado=rechazado", order_page),
            pending: format!("{}?estado=pendiente", order_page),
        },
        auto_return: "approved",
        notification_url: format!("{}/api/webhooks/mercadopago", site),
    }
}

/// Writes the CRM customer, the pending order and its items. The caller owns the
/// transaction so the three land together.
pub(crate) async fn place_order(
    conn: &mut PgConnection,
    email: &str,
    form: &CheckoutRequest,
    quote: &CartQuote,
) -> AppResult<Order> {
    let customer = upsert_customer(conn, email, form).await?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (
            customer_id, guest_email, guest_name, phone, shipping_address, city, region,
            status, subtotal, shipping_cost, total_amount, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(customer.id)
    .bind(email)
    .bind(form.full_name.trim())
    .bind(clean(&form.phone))
    .bind(form.shipping_address.trim())
    .bind(clean(&form.city))
    .bind(clean(&form.region))
    .bind(quote.subtotal)
    .bind(quote.shipping_cost)
    .bind(quote.total_amount)
    .bind(clean(&form.notes))
    .fetch_one(&mut *conn)
    .await?;

    for line in &quote.lines {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, title, quantity, unit_price, line_total)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id)
        .bind(line.product_id)
        .bind(&line.title)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.line_total)
        .execute(&mut *conn)
        .await?;
    }

    Ok(order)
}

pub async fn checkout(
    State(state): State<AppState>,
    Json(form): Json<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<CheckoutResponse>)> {
    form.validate()?;

    let quote = price_cart(&state, &form.items).await?;
    let email = form.email.trim().to_lowercase();

    let mut tx = state.db.begin().await?;
    let order = place_order(&mut tx, &email, &form, &quote).await?;
    tx.commit().await?;
    log::info!("Order {} created for {} ({})", order.id, email, order.total_amount);

    let preference = match state
        .payments
        .create_preference(&preference_for(&state, &order, &quote))
        .await
    {
        Ok(preference) => preference,
        Err(e) => {
            log::error!("Preference for order {} failed: {}", order.id, e);
            sqlx::query("UPDATE orders SET status = 'cancelled', updated_at = NOW() WHERE id = $1")
                .bind(order.id)
                .execute(&state.db)
                .await?;
            return Err(e);
        }
    };

    sqlx::query("UPDATE orders SET mp_preference_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(order.id)
        .bind(&preference.id)
        .execute(&state.db)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_id: order.id,
            preference_id: preference.id,
            init_point: preference.init_point,
            total_amount: order.total_amount,
        }),
    ))
}

/// Guest order tracking. A wrong e-mail looks exactly like a missing order.
pub async fn lookup_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<OrderLookupQuery>,
) -> AppResult<Json<OrderWithItems>> {
    let order = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE id = $1 AND LOWER(guest_email) = LOWER($2)",
    )
    .bind(id)
    .bind(query.email.trim())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order {}", id)))?;

    let items = load_items(&state.db, order.id).await?;
    Ok(Json(OrderWithItems { order, items }))
}
