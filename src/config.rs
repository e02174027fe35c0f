//! Throttling configuration for input pipelines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Debounce window used when nothing else is configured.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// How a stream of input values is throttled before it reaches a consumer.
///
/// ```
/// # use formflow::PipelineConfig;
/// let config = PipelineConfig::from_toml_str("debounce_ms = 500").unwrap();
/// assert_eq!(config.debounce_ms, 500);
/// assert!(config.distinct);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Quiet window in milliseconds; `0` disables debouncing.
    pub debounce_ms: u64,
    /// Drop values equal to the last forwarded one.
    pub distinct: bool,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig { debounce_ms: DEFAULT_DEBOUNCE_MS, distinct: true }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(input: &str) -> Result<PipelineConfig> {
        Ok(toml::from_str(input)?)
    }

    pub fn debounce(&self) -> Option<Duration> {
        (self.debounce_ms > 0).then(|| Duration::from_millis(self.debounce_ms))
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::error::FormError;

    #[test]
    fn empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.debounce(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn zero_window_disables_debounce() {
        let config = PipelineConfig::from_toml_str("debounce_ms = 0\ndistinct = false").unwrap();
        assert_eq!(config.debounce(), None);
        assert!(!config.distinct);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = PipelineConfig::from_toml_str("debounce = 3").unwrap_err();
        assert!(matches!(error, FormError::Config(_)));
    }
}
