//! Configuration validation
//!
//! Problems are collected rather than returned one at a time so that startup
//! reports everything that is wrong in a single error.

use super::ConfigError;
use crate::core::realtime::openai::build_realtime_url;

/// Accumulates missing and invalid settings.
#[derive(Debug, Default)]
pub(crate) struct Problems {
    missing: Vec<String>,
    invalid: Vec<ConfigError>,
}

impl Problems {
    pub(crate) fn missing(&mut self, name: &str) {
        self.missing.push(name.to_string());
    }

    pub(crate) fn invalid(&mut self, name: &str, value: &str, reason: impl Into<String>) {
        self.invalid.push(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        });
    }

    /// `Ok` when nothing was recorded, otherwise one error naming every problem.
    pub(crate) fn into_result(self) -> Result<(), ConfigError> {
        let Problems {
            missing,
            mut invalid,
        } = self;

        match (missing.is_empty(), invalid.len()) {
            (true, 0) => Ok(()),
            (false, 0) => Err(ConfigError::MissingVariables(missing)),
            (true, 1) => Err(invalid.remove(0)),
            (false, _) => {
                let mut all = vec![ConfigError::MissingVariables(missing)];
                all.extend(invalid);
                Err(ConfigError::Multiple(all))
            }
            (true, _) => Err(ConfigError::Multiple(invalid)),
        }
    }
}

/// The upstream endpoint must be a ws:// or wss:// URL.
pub(crate) fn validate_realtime_url(url: &str, model: &str) -> Result<(), String> {
    build_realtime_url(url, model)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Unit-interval thresholds.
pub(crate) fn validate_unit_interval(value: f32) -> Result<(), String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err("must be between 0.0 and 1.0".to_string())
    }
}

/// Energy levels on the 0-100 scale.
pub(crate) fn validate_level(value: f32) -> Result<(), String> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err("must be between 0 and 100".to_string())
    }
}
