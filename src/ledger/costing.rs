use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::AppResult;
use crate::ledger::money::{check_amount, check_total, checked_total};
use crate::models::{OperationCategory, Settings};
use crate::utils::normalize_key;

/// Cost lines priced from admin settings instead of typed-in amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCost {
    /// Baling with the tractor, charged per bale.
    Tractor,
    /// Irrigation, charged per day.
    Irrigation,
}

impl AutoCost {
    pub fn detect(subcategory: Option<&str>) -> Option<Self> {
        match normalize_key(subcategory?).as_str() {
            "tractor" | "enfardado" => Some(AutoCost::Tractor),
            "riego" => Some(AutoCost::Irrigation),
            _ => None,
        }
    }

    pub fn rate(&self, settings: &Settings) -> Decimal {
        match self {
            AutoCost::Tractor => settings.tractor_cost_per_bale,
            AutoCost::Irrigation => settings.irrigation_cost_per_day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedCost {
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
}

/// Resolves unit and total cost for a ledger entry.
///
/// Operating costs whose subcategory is a known auto-cost line (tractor, irrigation) and
/// that arrive without explicit amounts are priced as `quantity × configured rate`.
/// Everything else keeps the submitted total, falling back to `quantity × unit_cost`.
/// Amounts that do not fit their columns are validation errors.
pub fn derive_cost(
    category: OperationCategory,
    subcategory: Option<&str>,
    quantity: Decimal,
    unit_cost: Option<Decimal>,
    total_cost: Option<Decimal>,
    settings: &Settings,
) -> AppResult<DerivedCost> {
    let quantity = check_amount("Quantity", quantity)?;
    let unit_cost = unit_cost.map(|u| check_amount("Unit cost", u)).transpose()?;
    let total_cost = total_cost.map(|t| check_total("Total cost", t)).transpose()?;

    if category == OperationCategory::OperatingCost && unit_cost.is_none() && total_cost.is_none() {
        if let Some(auto) = AutoCost::detect(subcategory) {
            let rate = auto.rate(settings);
            return Ok(DerivedCost {
                unit_cost: rate,
                total_cost: checked_total(quantity, rate)?,
            });
        }
    }

    let cost = match (unit_cost, total_cost) {
        (Some(unit), Some(total)) => DerivedCost {
            unit_cost: unit,
            total_cost: total,
        },
        (Some(unit), None) => DerivedCost {
            unit_cost: unit,
            total_cost: checked_total(quantity, unit)?,
        },
        (None, Some(total)) => DerivedCost {
            unit_cost: unit_from_total(total, quantity)?,
            total_cost: total,
        },
        (None, None) => DerivedCost {
            unit_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
        },
    };
    Ok(cost)
}

fn unit_from_total(total: Decimal, quantity: Decimal) -> AppResult<Decimal> {
    if quantity.is_zero() {
        return check_amount("Unit cost", total);
    }
    let unit = (total / quantity).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    check_amount("Unit cost", unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> Settings {
        Settings {
            tractor_cost_per_bale: Decimal::from(450),
            irrigation_cost_per_day: Decimal::from(18000),
            ..Settings::default()
        }
    }

    #[test]
    fn tractor_cost_is_bales_times_rate() {
        let cost = derive_cost(
            OperationCategory::OperatingCost,
            Some("Tractor"),
            Decimal::from(320),
            None,
            None,
            &rates(),
        )
        .unwrap();
        assert_eq!(cost.unit_cost, Decimal::from(450));
        assert_eq!(cost.total_cost, Decimal::from(144000));
    }

    #[test]
    fn irrigation_cost_is_days_times_rate() {
        let cost = derive_cost(
            OperationCategory::OperatingCost,
            Some(" RIEGO "),
            Decimal::from(6),
            None,
            None,
            &rates(),
        )
        .unwrap();
        assert_eq!(cost.total_cost, Decimal::from(108000));
    }

    #[test]
    fn explicit_amounts_override_auto_costing() {
        let cost = derive_cost(
            OperationCategory::OperatingCost,
            Some("Tractor"),
            Decimal::from(100),
            Some(Decimal::from(500)),
            None,
            &rates(),
        )
        .unwrap();
        assert_eq!(cost.total_cost, Decimal::from(50000));
    }

    #[test]
    fn auto_costing_only_applies_to_operating_costs() {
        let cost = derive_cost(
            OperationCategory::Sale,
            Some("Tractor"),
            Decimal::from(10),
            None,
            None,
            &rates(),
        )
        .unwrap();
        assert_eq!(cost.total_cost, Decimal::ZERO);
    }

    #[test]
    fn unit_cost_is_derived_from_total() {
        let cost = derive_cost(
            OperationCategory::OperatingCost,
            Some("Fertilizante"),
            Decimal::from(3),
            None,
            Some(Decimal::from(100)),
            &rates(),
        )
        .unwrap();
        assert_eq!(cost.unit_cost, Decimal::new(3333, 2));
        assert_eq!(cost.total_cost, Decimal::from(100));
    }

    #[test]
    fn oversized_amounts_are_refused_instead_of_overflowing() {
        let huge = Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0);
        let err = derive_cost(
            OperationCategory::OperatingCost,
            Some("Fertilizante"),
            huge,
            Some(huge),
            None,
            &rates(),
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::AppError::Validation(_)));

        // Each factor fits but the product does not
        let big = Decimal::from(9_000_000_000_i64);
        assert!(derive_cost(
            OperationCategory::OperatingCost,
            Some("Tractor"),
            big,
            Some(big),
            None,
            &rates(),
        )
        .is_err());
    }

    #[test]
    fn detect_ignores_unknown_subcategories() {
        assert_eq!(AutoCost::detect(Some("Semillas")), None);
        assert_eq!(AutoCost::detect(None), None);
        assert_eq!(AutoCost::detect(Some("enfardado")), Some(AutoCost::Tractor));
    }
}
