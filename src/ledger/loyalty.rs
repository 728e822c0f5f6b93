use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::utils::is_blank;

/// Points earned for an order: one point per `per_unit` pesos, rounded down.
pub fn points_for(total_amount: Decimal, per_unit: Decimal) -> i32 {
    if per_unit <= Decimal::ZERO || total_amount <= Decimal::ZERO {
        return 0;
    }
    (total_amount / per_unit).floor().to_i32().unwrap_or(i32::MAX)
}

/// True when going from `before` to `after` passes a multiple of `threshold`.
pub fn crossed_reward(before: i32, after: i32, threshold: i32) -> bool {
    threshold > 0 && after > before && after / threshold > before.max(0) / threshold
}

/// New balance after a manual adjustment; never below zero.
pub fn adjust_balance(current: i32, delta: i32) -> i32 {
    current.saturating_add(delta).max(0)
}

/// A CRM profile is complete once every delivery field is filled in.
pub fn profile_complete(
    full_name: &Option<String>,
    phone: &Option<String>,
    address: &Option<String>,
    city: &Option<String>,
    region: &Option<String>,
) -> bool {
    [full_name, phone, address, city, region]
        .iter()
        .all(|field| !is_blank(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_round_down() {
        let per_unit = Decimal::from(1000);
        assert_eq!(points_for(Decimal::from(17200), per_unit), 17);
        assert_eq!(points_for(Decimal::from(999), per_unit), 0);
        assert_eq!(points_for(Decimal::from(5000), Decimal::ZERO), 0);
    }

    #[test]
    fn reward_crossing() {
        assert!(crossed_reward(95, 105, 100));
        assert!(crossed_reward(90, 100, 100));
        assert!(!crossed_reward(100, 150, 100));
        assert!(crossed_reward(150, 310, 100));
        assert!(!crossed_reward(10, 20, 0));
    }

    #[test]
    fn adjustments_floor_at_zero() {
        assert_eq!(adjust_balance(40, -100), 0);
        assert_eq!(adjust_balance(40, 10), 50);
    }

    #[test]
    fn completeness_requires_every_field() {
        let filled = Some("x".to_string());
        assert!(profile_complete(&filled, &filled, &filled, &filled, &filled));
        assert!(!profile_complete(&filled, &None, &filled, &filled, &filled));
        assert!(!profile_complete(
            &filled,
            &filled,
            &Some("  ".to_string()),
            &filled,
            &filled
        ));
    }
}
