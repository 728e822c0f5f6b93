//! Database-backed checks of the transactional flows: checkout, payment approval,
//! recurring charges and inventory purchases. Each test gets a fresh database with the
//! migrations applied.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AppError,
    handlers::{
        checkout::place_order,
        inventory::{apply_movement, SUPPLIES_SUBCATEGORY},
        webhooks::{apply_approved_payment, record_subscription_charge, WEB_SALE_SUBCATEGORY},
    },
    ledger::{quote_cart, CartQuote},
    models::{
        CartLine, CheckoutRequest, Customer, MovementInput, MovementKind, Operation,
        OperationCategory, Order, Product, Settings,
    },
    services::payments::Payment,
};

async fn product(pool: &PgPool, title: &str, price: i64, stock: i32) -> Product {
    sqlx::query_as::<_, Product>(
        "INSERT INTO products (title, slug, price, stock) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(title)
    .bind(crate::utils::slugify(title))
    .bind(Decimal::from(price))
    .bind(stock)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn checkout_form(lines: Vec<CartLine>) -> CheckoutRequest {
    CheckoutRequest {
        items: lines,
        email: "ana@correo.cl".to_string(),
        full_name: "Ana Pérez".to_string(),
        phone: Some("+56 9 1234 5678".to_string()),
        shipping_address: "Camino Real 123".to_string(),
        city: Some("Talca".to_string()),
        region: Some("Maule".to_string()),
        notes: None,
    }
}

fn quote(form: &CheckoutRequest, products: &[Product]) -> CartQuote {
    quote_cart(&form.items, products, &Settings::default()).unwrap()
}

/// Places a committed order for 5 × `alfalfa` and 1 × `avena`, both at 2000.
async fn order_for(pool: &PgPool, alfalfa: &Product, avena: &Product) -> Order {
    let form = checkout_form(vec![
        CartLine { product_id: alfalfa.id, quantity: 5 },
        CartLine { product_id: avena.id, quantity: 1 },
    ]);
    let quote = quote(&form, &[alfalfa.clone(), avena.clone()]);

    let mut tx = pool.begin().await.unwrap();
    let order = place_order(&mut tx, "ana@correo.cl", &form, &quote).await.unwrap();
    tx.commit().await.unwrap();
    order
}

fn approved(id: i64, order: &Order) -> Payment {
    Payment {
        id,
        status: "approved".to_string(),
        status_detail: Some("accredited".to_string()),
        external_reference: Some(order.id.to_string()),
        transaction_amount: Some(order.total_amount),
    }
}

async fn sale_rows(pool: &PgPool, order_id: Uuid) -> Vec<Operation> {
    sqlx::query_as::<_, Operation>("SELECT * FROM operations WHERE order_id = $1 ORDER BY quantity")
        .bind(order_id)
        .fetch_all(pool)
        .await
        .unwrap()
}

async fn stock_of(pool: &PgPool, id: Uuid) -> i32 {
    sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn checkout_writes_customer_order_and_items_together(pool: PgPool) {
    let alfalfa = product(&pool, "Fardo Alfalfa", 2000, 10).await;
    let avena = product(&pool, "Fardo Avena", 2000, 10).await;
    let form = checkout_form(vec![
        CartLine { product_id: alfalfa.id, quantity: 5 },
        CartLine { product_id: avena.id, quantity: 1 },
    ]);
    let quote = quote(&form, &[alfalfa.clone(), avena.clone()]);

    // Nothing survives a rolled back checkout
    let mut tx = pool.begin().await.unwrap();
    place_order(&mut tx, "ana@correo.cl", &form, &quote).await.unwrap();
    tx.rollback().await.unwrap();
    let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(orders, 0);

    let order = order_for(&pool, &alfalfa, &avena).await;
    assert_eq!(order.status, "pending");
    assert_eq!(order.total_amount, Decimal::from(12000));

    let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items WHERE order_id = $1")
        .bind(order.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(items, 2);

    let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE email = $1")
        .bind("ana@correo.cl")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(order.customer_id, Some(customer.id));
    assert!(customer.is_complete);
}

#[sqlx::test]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn approved_payment_is_applied_once(pool: PgPool) {
    let alfalfa = product(&pool, "Fardo Alfalfa", 2000, 10).await;
    let avena = product(&pool, "Fardo Avena", 2000, 50).await;
    sqlx::query("INSERT INTO customers (email, loyalty_points) VALUES ($1, 95)")
        .bind("ana@correo.cl")
        .execute(&pool)
        .await
        .unwrap();

    let order = order_for(&pool, &alfalfa, &avena).await;

    // Another sale took most of the alfalfa before the payment landed
    sqlx::query("UPDATE products SET stock = 3 WHERE id = $1")
        .bind(alfalfa.id)
        .execute(&pool)
        .await
        .unwrap();

    let payment = approved(555, &order);
    let mut tx = pool.begin().await.unwrap();
    let paid = apply_approved_payment(&mut tx, order.id, &payment)
        .await
        .unwrap()
        .expect("first approval applies");
    tx.commit().await.unwrap();

    assert_eq!(paid.order.status, "paid");
    assert_eq!(paid.order.mp_payment_id.as_deref(), Some("555"));
    assert_eq!(paid.items.len(), 2);

    let rows = sale_rows(&pool, order.id).await;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.category, OperationCategory::Sale.as_str());
        assert_eq!(row.subcategory.as_deref(), Some(WEB_SALE_SUBCATEGORY));
        assert_eq!(row.payment_status, "paid");
        assert_eq!(row.amount_paid, row.total_cost);
    }
    assert_eq!(rows[1].quantity, Decimal::from(5));
    assert_eq!(rows[1].total_cost, Decimal::from(10000));

    assert_eq!(stock_of(&pool, alfalfa.id).await, 0);
    assert_eq!(stock_of(&pool, avena.id).await, 49);

    // 12000 at one point per 1000 takes 95 past the reward threshold of 100
    let customer = paid.loyalty_due.expect("loyalty notice is due");
    assert_eq!(customer.loyalty_points, 107);
    assert_eq!(customer.total_orders, 1);
    assert_eq!(customer.total_spent, Decimal::from(12000));

    // Redelivery of the same notification, and a second payment for the same order
    let mut conn = pool.acquire().await.unwrap();
    assert!(apply_approved_payment(&mut conn, order.id, &payment).await.unwrap().is_none());
    assert!(apply_approved_payment(&mut conn, order.id, &approved(556, &order))
        .await
        .unwrap()
        .is_none());
    assert_eq!(sale_rows(&pool, order.id).await.len(), 2);
    assert_eq!(stock_of(&pool, avena.id).await, 49);
}

#[sqlx::test]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn order_moved_without_payment_still_gets_its_sale(pool: PgPool) {
    let alfalfa = product(&pool, "Fardo Alfalfa", 2000, 10).await;
    let avena = product(&pool, "Fardo Avena", 2000, 10).await;
    let order = order_for(&pool, &alfalfa, &avena).await;

    sqlx::query("UPDATE orders SET status = 'processing' WHERE id = $1")
        .bind(order.id)
        .execute(&pool)
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    let paid = apply_approved_payment(&mut tx, order.id, &approved(777, &order))
        .await
        .unwrap()
        .expect("an order without a payment id takes the payment");
    tx.commit().await.unwrap();

    assert_eq!(paid.order.status, "processing");
    assert_eq!(sale_rows(&pool, order.id).await.len(), 2);
    assert_eq!(stock_of(&pool, alfalfa.id).await, 5);
}

#[sqlx::test]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn recurring_charge_is_recorded_on_the_subscription(pool: PgPool) {
    let subscription_id: Uuid = sqlx::query_scalar(
        "INSERT INTO subscriptions (payer_email, amount, status) VALUES ($1, $2, 'active') RETURNING id",
    )
    .bind("ana@correo.cl")
    .bind(Decimal::from(8490))
    .fetch_one(&pool)
    .await
    .unwrap();

    let charge = Payment {
        id: 9001,
        status: "approved".to_string(),
        status_detail: None,
        external_reference: Some(subscription_id.to_string()),
        transaction_amount: Some(Decimal::from(8490)),
    };

    let mut conn = pool.acquire().await.unwrap();
    let subscription = record_subscription_charge(&mut conn, subscription_id, &charge)
        .await
        .unwrap()
        .expect("first charge is recorded");
    assert_eq!(subscription.last_payment_id.as_deref(), Some("9001"));
    assert!(subscription.last_charged_at.is_some());
    assert_eq!(subscription.status, "active");

    assert!(record_subscription_charge(&mut conn, subscription_id, &charge)
        .await
        .unwrap()
        .is_none());

    let ledger_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM operations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(ledger_rows, 0);
}

fn movement(kind: MovementKind, quantity: i64, unit_cost: Option<i64>) -> MovementInput {
    MovementInput {
        kind,
        quantity: Decimal::from(quantity),
        unit_cost: unit_cost.map(Decimal::from),
        movement_date: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
        notes: None,
        pano_id: Some("P2".to_string()),
        corte_id: None,
    }
}

#[sqlx::test]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn purchase_posts_a_supplies_cost_row(pool: PgPool) {
    let item_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO inventory_items (name, kind, unit, quantity, unit_cost, min_stock)
        VALUES ('Hilo enfardadora', 'material', 'rollo', 3, 9000, 2)
        RETURNING id
        "#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    let mut tx = pool.begin().await.unwrap();
    let result = apply_movement(&mut tx, item_id, &movement(MovementKind::Purchase, 4, Some(2500)), None)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(result.item.quantity, Decimal::from(7));
    assert_eq!(result.item.unit_cost, Decimal::from(2500));
    assert_eq!(result.movement.total_cost, Decimal::from(10000));

    let operation_id = result.operation_id.expect("purchases post a cost");
    let op = sqlx::query_as::<_, Operation>("SELECT * FROM operations WHERE id = $1")
        .bind(operation_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(op.category, OperationCategory::OperatingCost.as_str());
    assert_eq!(op.subcategory.as_deref(), Some(SUPPLIES_SUBCATEGORY));
    assert_eq!(op.total_cost, Decimal::from(10000));
    assert_eq!(op.payment_status, "paid");
    assert_eq!(op.pano_id.as_deref(), Some("P2"));
    assert_eq!(op.inventory_movement_id, Some(result.movement.id));

    // Usage beyond stock writes nothing
    let mut tx = pool.begin().await.unwrap();
    let err = apply_movement(&mut tx, item_id, &movement(MovementKind::Usage, 8, None), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    drop(tx);

    let movements: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory_movements WHERE item_id = $1")
        .bind(item_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(movements, 1);
}
