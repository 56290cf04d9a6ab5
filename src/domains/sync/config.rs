use std::env;
use std::time::Duration;

use rand::Rng;

use crate::errors::{ServiceError, ServiceResult};

/// Tunables for the sync engine and its HTTP adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Base URL of the remote authority, e.g. `https://revenue.example.org/api`.
    pub api_endpoint: String,
    /// Upper bound on each pull or push round trip.
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Randomise each backoff delay by up to +/- 20%.
    pub backoff_jitter: bool,
    /// Consecutive referential or unique-conflict failures applying a pull before they are logged at error level.
    pub referential_alert_threshold: u32,
    /// Send locally created records under `updated` so retried creates are upserts on the server.
    pub send_created_as_updated: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_endpoint: "http://localhost:8080/api".to_string(),
            request_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            backoff_jitter: true,
            referential_alert_threshold: 3,
            send_created_as_updated: true,
        }
    }
}

impl SyncSettings {
    pub fn new(api_endpoint: &str) -> Self {
        Self {
            api_endpoint: api_endpoint.to_string(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.backoff_jitter = jitter;
        self
    }

    pub fn with_referential_alert_threshold(mut self, threshold: u32) -> Self {
        self.referential_alert_threshold = threshold;
        self
    }

    pub fn with_send_created_as_updated(mut self, enabled: bool) -> Self {
        self.send_created_as_updated = enabled;
        self
    }

    /// Read `REVENUE_SYNC_*` overrides (loading `.env` first if present).
    ///
    /// | variable | meaning |
    /// |---|---|
    /// | `REVENUE_SYNC_API_ENDPOINT` | base URL |
    /// | `REVENUE_SYNC_TIMEOUT_SECS` | request timeout |
    /// | `REVENUE_SYNC_BACKOFF_BASE_MS` / `REVENUE_SYNC_BACKOFF_CAP_MS` | backoff bounds |
    /// | `REVENUE_SYNC_BACKOFF_JITTER` | `true`/`false` |
    /// | `REVENUE_SYNC_REFERENTIAL_ALERT_THRESHOLD` | count |
    /// | `REVENUE_SYNC_SEND_CREATED_AS_UPDATED` | `true`/`false` |
    pub fn from_env() -> ServiceResult<Self> {
        dotenv::dotenv().ok();
        let mut settings = Self::default();

        if let Ok(endpoint) = env::var("REVENUE_SYNC_API_ENDPOINT") {
            settings.api_endpoint = endpoint;
        }
        if let Some(secs) = parse_var::<u64>("REVENUE_SYNC_TIMEOUT_SECS")? {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>("REVENUE_SYNC_BACKOFF_BASE_MS")? {
            settings.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("REVENUE_SYNC_BACKOFF_CAP_MS")? {
            settings.backoff_cap = Duration::from_millis(ms);
        }
        if let Some(jitter) = parse_var::<bool>("REVENUE_SYNC_BACKOFF_JITTER")? {
            settings.backoff_jitter = jitter;
        }
        if let Some(threshold) = parse_var::<u32>("REVENUE_SYNC_REFERENTIAL_ALERT_THRESHOLD")? {
            settings.referential_alert_threshold = threshold;
        }
        if let Some(flag) = parse_var::<bool>("REVENUE_SYNC_SEND_CREATED_AS_UPDATED")? {
            settings.send_created_as_updated = flag;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.api_endpoint.trim().is_empty() {
            return Err(ServiceError::Configuration("api_endpoint must not be empty".to_string()));
        }
        if self.backoff_base.is_zero() || self.backoff_cap < self.backoff_base {
            return Err(ServiceError::Configuration(format!(
                "invalid backoff bounds: base {:?}, cap {:?}",
                self.backoff_base, self.backoff_cap
            )));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let delay = self.backoff_base.saturating_mul(factor).min(self.backoff_cap);
        if !self.backoff_jitter {
            return delay;
        }
        let spread = rand::rng().random_range(0.8..=1.2);
        delay.mul_f64(spread).min(self.backoff_cap)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> ServiceResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ServiceError::Configuration(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settings = SyncSettings::default()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(1_000))
            .with_jitter(false);
        assert_eq!(settings.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(settings.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(settings.backoff_delay(3), Duration::from_millis(800));
        assert_eq!(settings.backoff_delay(4), Duration::from_millis(1_000));
        assert_eq!(settings.backoff_delay(40), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let settings = SyncSettings::default().with_backoff(Duration::from_millis(1_000), Duration::from_secs(60));
        for _ in 0..50 {
            let delay = settings.backoff_delay(1);
            assert!(delay >= Duration::from_millis(1_600) && delay <= Duration::from_millis(2_400));
        }
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let settings = SyncSettings::default().with_backoff(Duration::from_secs(10), Duration::from_secs(1));
        assert!(matches!(settings.validate(), Err(ServiceError::Configuration(_))));
        assert!(SyncSettings::new("").validate().is_err());
        assert!(SyncSettings::new("https://revenue.example.org").validate().is_ok());
    }
}
