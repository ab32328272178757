use std::time::Duration;

use serde::Deserialize;

const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 300_000;

/// Coordinator tuning.
///
/// Deserializes from a `[coordinator]` table with millisecond fields:
///
/// ```toml
/// backoff_base_ms = 1000
/// max_backoff_ms = 300000
/// retain_completed = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    backoff_base_ms: u64,
    max_backoff_ms: u64,
    retain_completed: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            retain_completed: false,
        }
    }
}

impl CoordinatorConfig {
    /// Delay before the first retry; doubled for every later one.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Keep COMPLETED instances in the active table until `cleanup`.
    #[must_use]
    pub fn retain_completed(&self) -> bool {
        self.retain_completed
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base_ms = duration_millis(base);
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff_ms = duration_millis(max);
        self
    }

    #[must_use]
    pub fn with_retain_completed(mut self, retain: bool) -> Self {
        self.retain_completed = retain;
        self
    }

    /// Sleep before retrying after failed attempt number `attempt` (1-based):
    /// `backoff_base * 2^(attempt - 1)`, capped at `max_backoff`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let millis = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_doubles_from_one_second() {
        let config = CoordinatorConfig::default();

        assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let config = CoordinatorConfig::default()
            .with_backoff_base(Duration::from_millis(100))
            .with_max_backoff(Duration::from_millis(250));

        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(250));
        assert_eq!(config.backoff_delay(200), Duration::from_millis(250));
    }

    #[test]
    fn attempt_zero_uses_base_delay() {
        let config = CoordinatorConfig::default();

        assert_eq!(config.backoff_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn deserializes_partial_table_with_defaults() -> anyhow::Result<()> {
        let config: CoordinatorConfig = toml::from_str("backoff_base_ms = 10\n")?;

        assert_eq!(config.backoff_base(), Duration::from_millis(10));
        assert_eq!(config.max_backoff(), Duration::from_secs(300));
        assert!(!config.retain_completed());
        Ok(())
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<CoordinatorConfig, _> = toml::from_str("backoff_seconds = 1\n");

        assert!(result.is_err());
    }
}
