use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Global admin-configured rates. Stored as the single row `id = 1`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Settings {
    pub tractor_cost_per_bale: Decimal,
    pub irrigation_cost_per_day: Decimal,
    pub shipping_cost: Decimal,
    pub free_shipping_threshold: Decimal,
    pub loyalty_points_per_unit: Decimal,
    pub loyalty_reward_threshold: i32,
    pub subscription_markup: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tractor_cost_per_bale: Decimal::ZERO,
            irrigation_cost_per_day: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            free_shipping_threshold: Decimal::ZERO,
            loyalty_points_per_unit: Decimal::from(1000),
            loyalty_reward_threshold: 100,
            subscription_markup: Decimal::new(118, 2),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub tractor_cost_per_bale: Option<Decimal>,
    pub irrigation_cost_per_day: Option<Decimal>,
    pub shipping_cost: Option<Decimal>,
    pub free_shipping_threshold: Option<Decimal>,
    pub loyalty_points_per_unit: Option<Decimal>,
    pub loyalty_reward_threshold: Option<i32>,
    pub subscription_markup: Option<Decimal>,
}

impl SettingsUpdate {
    /// Applies the present fields over `current` and checks the result.
    pub fn apply(self, current: &Settings) -> Result<Settings, String> {
        let merged = Settings {
            tractor_cost_per_bale: self.tractor_cost_per_bale.unwrap_or(current.tractor_cost_per_bale),
            irrigation_cost_per_day: self
                .irrigation_cost_per_day
                .unwrap_or(current.irrigation_cost_per_day),
            shipping_cost: self.shipping_cost.unwrap_or(current.shipping_cost),
            free_shipping_threshold: self
                .free_shipping_threshold
                .unwrap_or(current.free_shipping_threshold),
            loyalty_points_per_unit: self
                .loyalty_points_per_unit
                .unwrap_or(current.loyalty_points_per_unit),
            loyalty_reward_threshold: self
                .loyalty_reward_threshold
                .unwrap_or(current.loyalty_reward_threshold),
            subscription_markup: self.subscription_markup.unwrap_or(current.subscription_markup),
            updated_at: current.updated_at,
        };

        let rates = [
            ("tractor_cost_per_bale", merged.tractor_cost_per_bale),
            ("irrigation_cost_per_day", merged.irrigation_cost_per_day),
            ("shipping_cost", merged.shipping_cost),
            ("free_shipping_threshold", merged.free_shipping_threshold),
        ];
        if let Some((name, _)) = rates.iter().find(|(_, v)| *v < Decimal::ZERO) {
            return Err(format!("{} must not be negative", name));
        }
        if merged.loyalty_points_per_unit <= Decimal::ZERO {
            return Err("loyalty_points_per_unit must be positive".to_string());
        }
        if merged.loyalty_reward_threshold <= 0 {
            return Err("loyalty_reward_threshold must be positive".to_string());
        }
        if merged.subscription_markup < Decimal::ONE {
            return Err("subscription_markup must be at least 1".to_string());
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_update() -> SettingsUpdate {
        SettingsUpdate {
            tractor_cost_per_bale: None,
            irrigation_cost_per_day: None,
            shipping_cost: None,
            free_shipping_threshold: None,
            loyalty_points_per_unit: None,
            loyalty_reward_threshold: None,
            subscription_markup: None,
        }
    }

    #[test]
    fn partial_update_keeps_other_rates() {
        let current = Settings {
            tractor_cost_per_bale: Decimal::from(350),
            ..Settings::default()
        };
        let update = SettingsUpdate {
            irrigation_cost_per_day: Some(Decimal::from(12000)),
            ..empty_update()
        };
        let merged = update.apply(&current).unwrap();
        assert_eq!(merged.tractor_cost_per_bale, Decimal::from(350));
        assert_eq!(merged.irrigation_cost_per_day, Decimal::from(12000));
    }

    #[test]
    fn negative_rates_are_rejected() {
        let update = SettingsUpdate {
            shipping_cost: Some(Decimal::from(-1)),
            ..empty_update()
        };
        let err = update.apply(&Settings::default()).unwrap_err();
        assert!(err.contains("shipping_cost"));
    }

    #[test]
    fn markup_below_one_is_rejected() {
        let update = SettingsUpdate {
            subscription_markup: Some(Decimal::new(95, 2)),
            ..empty_update()
        };
        assert!(update.apply(&Settings::default()).is_err());
    }
}
