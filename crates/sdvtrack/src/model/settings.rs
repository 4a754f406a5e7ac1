use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Per-company inputs of the review-time estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationSettings {
    /// Minutes a reviewer needs to verify one field.
    pub minutes_per_field: f64,
    /// Working hours in a review day.
    pub hours_per_day: f64,
}

impl CalculationSettings {
    pub fn new(minutes_per_field: f64, hours_per_day: f64) -> Result<Self, SettingsError> {
        let settings = Self {
            minutes_per_field,
            hours_per_day,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.minutes_per_field.is_finite() || self.minutes_per_field < 0.0 {
            return Err(SettingsError::Invalid {
                message: format!(
                    "minutesPerField must be a non-negative number, got {}",
                    self.minutes_per_field
                ),
            });
        }
        if !self.hours_per_day.is_finite() || self.hours_per_day <= 0.0 {
            return Err(SettingsError::Invalid {
                message: format!(
                    "hoursPerDay must be greater than zero, got {}",
                    self.hours_per_day
                ),
            });
        }
        Ok(())
    }
}

impl Default for CalculationSettings {
    fn default() -> Self {
        Self {
            minutes_per_field: 5.0,
            hours_per_day: 8.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_settings() {
        let settings = CalculationSettings::new(60.0, 7.0).unwrap();
        assert_eq!(settings.minutes_per_field, 60.0);
        assert!(CalculationSettings::new(0.0, 0.5).is_ok());
    }

    #[test]
    fn test_rejects_non_positive_hours_per_day() {
        assert!(CalculationSettings::new(5.0, 0.0).is_err());
        assert!(CalculationSettings::new(5.0, -1.0).is_err());
        assert!(CalculationSettings::new(5.0, f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_negative_minutes() {
        let err = CalculationSettings::new(-2.0, 8.0).unwrap_err();
        assert!(err.to_string().contains("minutesPerField"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_string(&CalculationSettings::default()).unwrap();
        assert!(json.contains("minutesPerField"));
        assert!(json.contains("hoursPerDay"));
    }
}
