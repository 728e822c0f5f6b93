//! Range-checked arithmetic for amounts that come from request bodies and end up in
//! `NUMERIC` columns.

use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};

/// Largest value of a `NUMERIC(12, 2)` column: quantities, unit prices, single payments.
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

/// Largest value of a `NUMERIC(14, 2)` column: line and entry totals.
pub fn max_total() -> Decimal {
    Decimal::new(99_999_999_999_999, 2)
}

fn out_of_range(field: &str) -> AppError {
    AppError::Validation(format!("{} is out of range", field))
}

/// Rejects a submitted quantity, price or payment that does not fit its column.
pub fn check_amount(field: &str, value: Decimal) -> AppResult<Decimal> {
    if value.abs() > max_amount() {
        return Err(out_of_range(field));
    }
    Ok(value)
}

/// Rejects a submitted total that does not fit its column.
pub fn check_total(field: &str, value: Decimal) -> AppResult<Decimal> {
    if value.abs() > max_total() {
        return Err(out_of_range(field));
    }
    Ok(value)
}

/// `quantity × unit`, refused when it overflows or does not fit a total column.
pub fn checked_total(quantity: Decimal, unit: Decimal) -> AppResult<Decimal> {
    quantity
        .checked_mul(unit)
        .filter(|total| total.abs() <= max_total())
        .ok_or_else(|| out_of_range("Total"))
}

/// `a + b`, refused when the result exceeds `limit`.
pub fn checked_sum(field: &str, a: Decimal, b: Decimal, limit: Decimal) -> AppResult<Decimal> {
    a.checked_add(b)
        .filter(|sum| sum.abs() <= limit)
        .ok_or_else(|| out_of_range(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn column_limits() {
        assert_eq!(max_amount(), Decimal::from_str("9999999999.99").unwrap());
        assert_eq!(max_total(), Decimal::from_str("999999999999.99").unwrap());
    }

    #[test]
    fn amounts_outside_the_column_are_rejected() {
        assert!(check_amount("quantity", Decimal::from(320)).is_ok());
        assert!(check_amount("quantity", Decimal::from(u64::MAX)).is_err());
        assert!(check_amount("quantity", -Decimal::from(u64::MAX)).is_err());
        assert!(check_total("total_cost", Decimal::from(10_000_000_000_000_i64)).is_err());
    }

    #[test]
    fn products_that_overflow_are_validation_errors() {
        assert_eq!(
            checked_total(Decimal::from(320), Decimal::from(450)).unwrap(),
            Decimal::from(144000)
        );

        // Overflows the 96-bit mantissa
        let err = checked_total(Decimal::MAX, Decimal::from(2)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Fits a Decimal but not the column
        let big = Decimal::from(10_000_000_000_i64);
        assert!(checked_total(big, big).is_err());
    }

    #[test]
    fn sums_are_bounded() {
        assert_eq!(
            checked_sum("stock", Decimal::from(3), Decimal::from(5), max_amount()).unwrap(),
            Decimal::from(8)
        );
        assert!(checked_sum("stock", Decimal::MAX, Decimal::ONE, max_total()).is_err());
        assert!(checked_sum("stock", max_amount(), Decimal::ONE, max_amount()).is_err());
    }
}
