use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::ledger::money::check_amount;
use crate::models::{CartLine, Product, Settings};

/// Price of a single purchase derived from the recurring price: `subscription_price × markup`,
/// rounded to whole pesos.
pub fn one_time_price(subscription_price: Decimal, markup: Decimal) -> AppResult<Decimal> {
    let price = check_amount("Subscription price", subscription_price)?
        .checked_mul(markup)
        .map(|p| p.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .ok_or_else(|| AppError::Validation("Price is out of range".to_string()))?;
    check_amount("Price", price)
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotedLine {
    pub product_id: Uuid,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartQuote {
    pub lines: Vec<QuotedLine>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total_amount: Decimal,
}

/// Flat shipping, waived once the subtotal reaches a positive free-shipping threshold.
pub fn shipping_for(subtotal: Decimal, settings: &Settings) -> Decimal {
    let threshold = settings.free_shipping_threshold;
    if threshold > Decimal::ZERO && subtotal >= threshold {
        Decimal::ZERO
    } else {
        settings.shipping_cost
    }
}

/// Prices a cart against the current catalog. Repeated products are merged into one line.
pub fn quote_cart(lines: &[CartLine], products: &[Product], settings: &Settings) -> AppResult<CartQuote> {
    if lines.is_empty() {
        return Err(AppError::Validation("Cart is empty".to_string()));
    }

    // Merge duplicates keeping first-seen order
    let mut merged: Vec<(Uuid, i32)> = Vec::new();
    for line in lines {
        if line.quantity <= 0 {
            return Err(AppError::Validation(format!(
                "Quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        match merged.iter_mut().find(|(id, _)| *id == line.product_id) {
            Some((_, qty)) => *qty = qty.saturating_add(line.quantity),
            None => merged.push((line.product_id, line.quantity)),
        }
    }

    let catalog: HashMap<Uuid, &Product> = products.iter().map(|p| (p.id, p)).collect();

    let mut quoted = Vec::with_capacity(merged.len());
    for (product_id, quantity) in merged {
        let product = catalog
            .get(&product_id)
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::NotFound(format!("Product {}", product_id)))?;

        if product.stock < quantity {
            return Err(AppError::Validation(format!(
                "Only {} units of '{}' are available",
                product.stock, product.title
            )));
        }

        quoted.push(QuotedLine {
            product_id,
            title: product.title.clone(),
            quantity,
            unit_price: product.price,
            line_total: product.price * Decimal::from(quantity),
        });
    }

    let subtotal: Decimal = quoted.iter().map(|l| l.line_total).sum();
    let shipping_cost = shipping_for(subtotal, settings);

    Ok(CartQuote {
        lines: quoted,
        subtotal,
        shipping_cost,
        total_amount: subtotal + shipping_cost,
    })
}
