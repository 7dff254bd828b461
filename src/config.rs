use crate::error::{PipelineError, Result};
use std::time::Duration;

/// Tunables for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum number of values held between drains
    pub capacity: usize,
    /// Period of the background drain
    pub drain_interval: Duration,
    /// Added to `drain_interval` to bound the shutdown wait
    pub grace_margin: Duration,
    /// Consecutive failed reads after which the input counts as exhausted
    pub max_read_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            drain_interval: Duration::from_secs(5),
            grace_margin: Duration::from_secs(1),
            max_read_failures: 32,
        }
    }
}

impl PipelineConfig {
    /// Upper bound on how long shutdown waits for stages before the final drain
    pub fn grace_period(&self) -> Duration {
        self.drain_interval + self.grace_margin
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PipelineError::Config("capacity must be positive".into()));
        }
        if self.drain_interval.is_zero() {
            return Err(PipelineError::Config("drain interval must be positive".into()));
        }
        if self.max_read_failures == 0 {
            return Err(PipelineError::Config(
                "max read failures must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.grace_period(), Duration::from_secs(6));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_values() {
        let config = PipelineConfig {
            capacity: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = PipelineConfig {
            drain_interval: Duration::ZERO,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = PipelineConfig {
            max_read_failures: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
