use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Manufacturer families and decode bounds the size parser depends on.
///
/// Family entries are compared with the matching-policy alias check, so
/// "dentium" covers "Dentium", "DENTIUM Co." and the like.
///
/// The numeric-code bounds are empirical. Keep them as they are; a code
/// that decodes near the boundary should be reported, not reinterpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotationRules {
    /// Manufacturers whose sizes are compact 4/6-digit codes
    pub numeric_code_manufacturers: Vec<String>,

    /// Manufacturers whose legacy D/L and cuff notations are rewritten
    /// into the unified `C<cuff> Φ<d> X <l>` form
    pub legacy_notation_manufacturers: Vec<String>,

    /// Exclusive upper bound for a decoded diameter (mm)
    pub max_diameter: f64,

    /// Exclusive upper bound for a decoded length (mm)
    pub max_length: f64,
}

impl Default for NotationRules {
    fn default() -> Self {
        Self {
            numeric_code_manufacturers: vec!["dentium".to_string()],
            legacy_notation_manufacturers: vec!["ibs".to_string()],
            max_diameter: 10.0,
            max_length: 30.0,
        }
    }
}

impl NotationRules {
    /// Load rules from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let rules: NotationRules = serde_json::from_str(json)?;
        rules.validate()?;
        Ok(rules)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_diameter > 0.0) {
            return Err(ConfigError::InvalidBound {
                field: "max_diameter",
                value: self.max_diameter,
            });
        }
        if !(self.max_length > 0.0) {
            return Err(ConfigError::InvalidBound {
                field: "max_length",
                value: self.max_length,
            });
        }
        Ok(())
    }

    /// Decoded dimensions must fall strictly inside (0, max).
    pub fn in_range(&self, diameter: f64, length: f64) -> bool {
        diameter > 0.0 && diameter < self.max_diameter && length > 0.0 && length < self.max_length
    }
}

/// Settings for a bounded registration run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Upper bound on simultaneously running workers, clamped to queue length
    pub concurrency: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self { concurrency: 6 }
    }
}

impl RegistrationConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RegistrationConfig = serde_json::from_str(json)?;
        let concurrency = config.concurrency;
        Ok(config.with_concurrency(concurrency))
    }

    /// Number of workers for a queue of `queue_len` items.
    pub fn worker_count(&self, queue_len: usize) -> usize {
        self.concurrency.max(1).min(queue_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let rules = NotationRules::default();
        assert_eq!(rules.max_diameter, 10.0);
        assert_eq!(rules.max_length, 30.0);
        assert_eq!(rules.numeric_code_manufacturers, vec!["dentium"]);
    }

    #[test]
    fn test_rules_from_partial_json() {
        let rules =
            NotationRules::from_json(r#"{"numeric_code_manufacturers": ["dentium", "dio"]}"#)
                .unwrap();
        assert_eq!(rules.numeric_code_manufacturers.len(), 2);
        assert_eq!(rules.legacy_notation_manufacturers, vec!["ibs"]);
        assert_eq!(rules.max_length, 30.0);
    }

    #[test]
    fn test_rules_reject_non_positive_bound() {
        let err = NotationRules::from_json(r#"{"max_diameter": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidBound {
                field: "max_diameter",
                ..
            }
        ));
    }

    #[test]
    fn test_rules_reject_malformed_json() {
        assert!(matches!(
            NotationRules::from_json("{not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_range_is_exclusive() {
        let rules = NotationRules::default();
        assert!(rules.in_range(3.5, 7.0));
        assert!(!rules.in_range(10.0, 7.0));
        assert!(!rules.in_range(3.5, 30.0));
        assert!(!rules.in_range(0.0, 7.0));
    }

    #[test]
    fn test_worker_count_clamped_to_queue() {
        let config = RegistrationConfig::default();
        assert_eq!(config.concurrency, 6);
        assert_eq!(config.worker_count(3), 3);
        assert_eq!(config.worker_count(20), 6);
        assert_eq!(config.worker_count(0), 0);
    }

    #[test]
    fn test_registration_config_from_json_clamps_zero() {
        let config = RegistrationConfig::from_json(r#"{"concurrency": 0}"#).unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_registration_config_from_json_keeps_value() {
        let config = RegistrationConfig::from_json(r#"{"concurrency": 3}"#).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.worker_count(10), 3);
    }
}
