//! Embedder-supplied dispatch policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dispatch configuration
///
/// All limits default to "off": no timeout, unbounded batches, unbounded
/// batch fan-out, suppressed internal detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-call handler timeout
    #[serde(with = "option_duration_millis")]
    pub call_timeout: Option<Duration>,

    /// Largest batch accepted; larger batches are rejected whole
    pub max_batch_size: Option<usize>,

    /// Most batch elements executing at once
    pub max_batch_concurrency: Option<usize>,

    /// Attach internal failure detail to `error.data`
    pub verbose_errors: bool,
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn max_batch_concurrency(mut self, limit: usize) -> Self {
        self.max_batch_concurrency = Some(limit.max(1));
        self
    }

    pub fn verbose_errors(mut self, enable: bool) -> Self {
        self.verbose_errors = enable;
        self
    }
}

pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_impose_no_policy() {
        let config = DispatchConfig::default();
        assert!(config.call_timeout.is_none());
        assert!(config.max_batch_size.is_none());
        assert!(config.max_batch_concurrency.is_none());
        assert!(!config.verbose_errors);
    }

    #[test]
    fn test_builder() {
        let config = DispatchConfig::new()
            .call_timeout(Duration::from_millis(250))
            .max_batch_size(10)
            .max_batch_concurrency(0)
            .verbose_errors(true);

        assert_eq!(config.call_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.max_batch_size, Some(10));
        assert_eq!(config.max_batch_concurrency, Some(1));
        assert!(config.verbose_errors);
    }

    #[test]
    fn test_serde_uses_millis() {
        let config = DispatchConfig::new().call_timeout(Duration::from_secs(2));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["call_timeout"], 2000);

        let parsed: DispatchConfig =
            serde_json::from_value(json!({"max_batch_size": 5})).unwrap();
        assert_eq!(parsed.max_batch_size, Some(5));
        assert!(parsed.call_timeout.is_none());
    }
}
