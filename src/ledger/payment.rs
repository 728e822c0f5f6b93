use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::ledger::money::{check_amount, checked_sum, max_total};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    /// `paid` once the full amount is covered, `partial` for any positive shortfall payment.
    pub fn derive(amount_paid: Decimal, total_cost: Decimal) -> Self {
        if amount_paid >= total_cost {
            PaymentStatus::Paid
        } else if amount_paid > Decimal::ZERO {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "partial" => Ok(PaymentStatus::Partial),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Adds a payment to an entry, returning the new paid amount and status.
pub fn register_payment(
    amount_paid: Decimal,
    payment: Decimal,
    total_cost: Decimal,
) -> AppResult<(Decimal, PaymentStatus)> {
    if payment <= Decimal::ZERO {
        return Err(AppError::Validation(
            "Payment amount must be positive".to_string(),
        ));
    }

    let payment = check_amount("Payment amount", payment)?;

    let outstanding = checked_sum("Outstanding balance", total_cost, -amount_paid, max_total())?;
    if payment > outstanding {
        return Err(AppError::Validation(format!(
            "Payment of {} exceeds the outstanding balance of {}",
            payment, outstanding
        )));
    }

    let new_paid = checked_sum("Amount paid", amount_paid, payment, max_total())?;
    Ok((new_paid, PaymentStatus::derive(new_paid, total_cost)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn status_follows_amount_paid() {
        assert_eq!(PaymentStatus::derive(d(0), d(100)), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::derive(d(1), d(100)), PaymentStatus::Partial);
        assert_eq!(PaymentStatus::derive(d(99), d(100)), PaymentStatus::Partial);
        assert_eq!(PaymentStatus::derive(d(100), d(100)), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::derive(d(150), d(100)), PaymentStatus::Paid);
    }

    #[test]
    fn zero_total_counts_as_paid() {
        assert_eq!(PaymentStatus::derive(d(0), d(0)), PaymentStatus::Paid);
    }

    #[test]
    fn registering_payments_accumulates() {
        let (paid, status) = register_payment(d(0), d(40000), d(100000)).unwrap();
        assert_eq!(paid, d(40000));
        assert_eq!(status, PaymentStatus::Partial);

        let (paid, status) = register_payment(paid, d(60000), d(100000)).unwrap();
        assert_eq!(paid, d(100000));
        assert_eq!(status, PaymentStatus::Paid);
    }

    #[test]
    fn overpayment_and_non_positive_payments_are_rejected() {
        assert!(register_payment(d(90000), d(20000), d(100000)).is_err());
        assert!(register_payment(d(0), d(0), d(100000)).is_err());
        assert!(register_payment(d(0), d(-5), d(100000)).is_err());
    }

    #[test]
    fn oversized_payment_is_a_validation_error() {
        let err = register_payment(d(0), Decimal::MAX, d(100000)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
