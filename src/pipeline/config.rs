//! Run configuration.
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PipeError;

/// Sizing of a single pipeline run. Missing fields fall back to [`Default`]
/// when deserialized.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of items in flight between producers and consumers.
    pub queue_capacity: usize,
    pub producer_count: usize,
    pub consumer_count: usize,
    /// Upper bound on how long a producer blocked on a full queue takes to
    /// notice an abort.
    pub cancel_poll_ms: u64,
    /// Simulated generation cost per item. Zero disables pacing.
    pub producer_pace_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            producer_count: 1,
            consumer_count: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            cancel_poll_ms: 50,
            producer_pace_ms: 0,
        }
    }
}

impl PipelineConfig {
    /// Validated configuration with the remaining knobs at their defaults.
    pub fn new(
        queue_capacity: usize,
        producer_count: usize,
        consumer_count: usize,
    ) -> Result<Self, PipeError> {
        let config = Self {
            queue_capacity,
            producer_count,
            consumer_count,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_producers(mut self, producer_count: usize) -> Self {
        self.producer_count = producer_count;
        self
    }

    pub fn with_consumers(mut self, consumer_count: usize) -> Self {
        self.consumer_count = consumer_count;
        self
    }

    pub fn with_cancel_poll(mut self, poll: Duration) -> Self {
        self.cancel_poll_ms = poll.as_millis() as u64;
        self
    }

    pub fn with_producer_pace(mut self, pace: Duration) -> Self {
        self.producer_pace_ms = pace.as_millis() as u64;
        self
    }

    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms.max(1))
    }

    pub fn producer_pace(&self) -> Option<Duration> {
        (self.producer_pace_ms > 0).then(|| Duration::from_millis(self.producer_pace_ms))
    }

    /// Reject sizes that could never make progress.
    pub fn validate(&self) -> Result<(), PipeError> {
        if self.queue_capacity == 0 {
            return Err(PipeError::InvalidConfiguration(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.producer_count == 0 {
            return Err(PipeError::InvalidConfiguration(
                "producer_count must be greater than 0".to_string(),
            ));
        }
        if self.consumer_count == 0 {
            return Err(PipeError::InvalidConfiguration(
                "consumer_count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.producer_count, 1);
        assert!(config.consumer_count >= 1);
        assert!(config.validate().is_ok());
        assert_eq!(config.producer_pace(), None);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(PipelineConfig::new(0, 1, 1).is_err());
        assert!(PipelineConfig::new(1, 0, 1).is_err());
        assert!(PipelineConfig::new(1, 1, 0).is_err());
        assert!(PipelineConfig::new(1, 1, 1).is_ok());
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "queue_capacity": 4, "consumer_count": 3 }"#).unwrap();
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.consumer_count, 3);
        assert_eq!(config.producer_count, 1);
        assert_eq!(config.cancel_poll(), Duration::from_millis(50));
    }

    #[test]
    fn loaded_zero_capacity_fails_validation() {
        let config: PipelineConfig = serde_json::from_str(r#"{ "queue_capacity": 0 }"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(PipeError::InvalidConfiguration(_))
        ));
    }
}
