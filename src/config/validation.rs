//! Config validation: range checks on the loaded `PipelineConfig`.
//!
//! Mirrors the "never break on a bad config" discipline: a value outside
//! its documented range is reported as a warning and replaced with the
//! built-in default rather than failing startup.

use super::PipelineConfig;

/// A non-fatal config warning (out-of-range value, replaced with its default).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a loaded config, returning the (possibly corrected) config and
/// any warnings raised along the way.
pub fn validate(mut config: PipelineConfig) -> (PipelineConfig, Vec<ValidationWarning>) {
    let mut warnings = Vec::new();

    macro_rules! check_range {
        ($field:expr, $name:literal, $min:expr, $max:expr, $default:expr) => {
            if $field < $min || $field > $max {
                warnings.push(ValidationWarning {
                    field: $name.to_string(),
                    message: format!(
                        "value {:?} outside [{:?}, {:?}], using default {:?}",
                        $field, $min, $max, $default
                    ),
                });
                $field = $default;
            }
        };
    }

    check_range!(
        config.crm.failure_threshold,
        "crm.failure_threshold",
        1,
        100,
        super::defaults::FAILURE_THRESHOLD
    );
    check_range!(
        config.crm.backoff_multiplier,
        "crm.backoff_multiplier",
        1.0,
        10.0,
        super::defaults::BACKOFF_MULTIPLIER
    );
    check_range!(
        config.das.min_sources,
        "das.min_sources",
        1,
        64,
        super::defaults::MIN_SOURCES
    );
    check_range!(
        config.das.conflict_threshold,
        "das.conflict_threshold",
        0.0,
        1.0,
        super::defaults::CONFLICT_THRESHOLD
    );
    check_range!(
        config.ted.confidence_threshold,
        "ted.confidence_threshold",
        0.0,
        1.0,
        super::defaults::CONFIDENCE_THRESHOLD
    );
    check_range!(
        config.wsm.rate_limit_max,
        "wsm.rate_limit_max",
        1,
        1_000_000,
        super::defaults::RATE_LIMIT_MAX
    );
    check_range!(
        config.eb.batch_size,
        "eb.batch_size",
        1,
        1_000_000,
        super::defaults::BATCH_SIZE
    );

    for warning in &warnings {
        tracing::warn!(%warning, "pipeline config value out of range, using default");
    }

    (config, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_value_is_replaced_with_default() {
        let mut config = PipelineConfig::default();
        config.das.min_sources = 0;
        let (fixed, warnings) = validate(config);
        assert_eq!(fixed.das.min_sources, super::super::defaults::MIN_SOURCES);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn in_range_config_is_unchanged() {
        let config = PipelineConfig::default();
        let (fixed, warnings) = validate(config.clone());
        assert!(warnings.is_empty());
        assert_eq!(fixed.das.min_sources, config.das.min_sources);
    }
}
