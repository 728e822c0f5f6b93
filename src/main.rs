mod config;
mod database;
mod error;
mod handlers;
mod ledger;
mod middleware;
mod models;
mod services;
mod state;
mod utils;

#[cfg(test)]
mod flow_tests;
#[cfg(test)]
mod router_tests;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use dotenvy::dotenv;
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use config::AppConfig;
use database::{create_database_pool, run_migrations, seed_admin};
use error::AppResult;
use state::AppState;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    if let Err(e) = run().await {
        log::error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let config = AppConfig::from_env()?;

    let db = create_database_pool(&config.database_url).await?;
    run_migrations(&db).await?;
    seed_admin(&db, config.admin_email.as_deref(), config.admin_password.as_deref()).await?;

    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(db, config)?;
    let app = create_router(state);

    log::info!("Fardo server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| error::AppError::Internal(format!("cannot bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::Internal(format!("server error: {}", e)))?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))

        // Storefront
        .route("/api/products", get(handlers::products::list_products))
        .route("/api/products/:slug", get(handlers::products::get_product))
        .route(
            "/api/products/:slug/reviews",
            get(handlers::reviews::list_product_reviews).post(handlers::reviews::submit_review),
        )
        .route("/api/cart/quote", post(handlers::checkout::quote))
        .route("/api/checkout", post(handlers::checkout::checkout))
        .route("/api/orders/:id", get(handlers::checkout::lookup_order))
        .route("/api/subscriptions", post(handlers::subscriptions::subscribe))
        .route("/api/webhooks/mercadopago", post(handlers::webhooks::mercadopago_webhook))

        // Session
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/me", get(handlers::auth::me))

        // Catalog admin
        .route(
            "/api/admin/products",
            get(handlers::products::admin_list_products).post(handlers::products::create_product),
        )
        .route(
            "/api/admin/products/:id",
            put(handlers::products::update_product).delete(handlers::products::delete_product),
        )
        .route("/api/admin/reviews", get(handlers::reviews::list_pending_reviews))
        .route("/api/admin/reviews/:id/approve", post(handlers::reviews::approve_review))
        .route("/api/admin/reviews/:id", delete(handlers::reviews::delete_review))

        // Orders
        .route("/api/admin/orders", get(handlers::orders::list_orders))
        .route("/api/admin/orders/:id", get(handlers::orders::get_order))
        .route("/api/admin/orders/:id/status", put(handlers::orders::update_order_status))

        // CRM
        .route(
            "/api/admin/customers",
            get(handlers::crm::list_customers).post(handlers::crm::create_customer),
        )
        .route(
            "/api/admin/customers/:id",
            get(handlers::crm::get_customer)
                .put(handlers::crm::update_customer)
                .delete(handlers::crm::delete_customer),
        )
        .route("/api/admin/customers/:id/loyalty", post(handlers::crm::adjust_loyalty))

        // Operations ledger
        .route(
            "/api/admin/operations",
            get(handlers::operations::list_operations).post(handlers::operations::create_operation),
        )
        .route("/api/admin/operations/stock", get(handlers::operations::stock_summary))
        .route("/api/admin/operations/profit-by-cut", get(handlers::operations::cut_profits))
        .route(
            "/api/admin/operations/:id",
            put(handlers::operations::update_operation).delete(handlers::operations::delete_operation),
        )
        .route("/api/admin/operations/:id/payments", post(handlers::operations::record_payment))
        .route("/api/admin/dashboard", get(handlers::dashboard::analytics))

        // Inventory
        .route(
            "/api/admin/inventory",
            get(handlers::inventory::list_items).post(handlers::inventory::create_item),
        )
        .route(
            "/api/admin/inventory/:id",
            put(handlers::inventory::update_item).delete(handlers::inventory::delete_item),
        )
        .route(
            "/api/admin/inventory/:id/movements",
            get(handlers::inventory::list_movements).post(handlers::inventory::record_movement),
        )

        // Subscriptions
        .route("/api/admin/subscriptions", get(handlers::subscriptions::list_subscriptions))
        .route(
            "/api/admin/subscriptions/:id/cancel",
            post(handlers::subscriptions::cancel_subscription),
        )

        // Alerts, settings, audit, team
        .route(
            "/api/admin/alerts",
            get(handlers::alerts::list_alerts).post(handlers::alerts::create_alert),
        )
        .route("/api/admin/alerts/dispatch", post(handlers::alerts::dispatch_alerts))
        .route("/api/admin/alerts/:id", delete(handlers::alerts::delete_alert))
        .route(
            "/api/admin/settings",
            get(handlers::settings::get_settings).put(handlers::settings::update_settings),
        )
        .route("/api/admin/audit", get(handlers::audit::list_audit_logs))
        .route(
            "/api/admin/users",
            get(handlers::auth::list_users).post(handlers::auth::create_user),
        )

        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CookieManagerLayer::new())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(1024 * 1024)),
        )
        .with_state(state)
}
