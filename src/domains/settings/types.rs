use serde::{Deserialize, Serialize};
use std::env;
use uuid::Uuid;

use crate::domains::sync::SyncSettings;
use crate::errors::{ServiceError, ServiceResult};

/// Everything needed to bring the core up on one device.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreSettings {
    /// sqlx SQLite URL, e.g. `sqlite:///data/revenue.db`.
    pub database_url: String,
    /// Stable identifier of this installation; stamped on payment histories and login sessions.
    pub device_id: String,
    pub sync: SyncSettings,
}

/// Serializable device profile the host app persists between launches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_id: String,
    pub api_endpoint: String,
}

impl CoreSettings {
    pub fn new(database_url: &str, device_id: &str, sync: SyncSettings) -> Self {
        Self {
            database_url: database_url.to_string(),
            device_id: device_id.to_string(),
            sync,
        }
    }

    /// `REVENUE_DATABASE_URL` and `REVENUE_DEVICE_ID` plus the sync overrides.
    ///
    /// A missing device id gets a fresh UUID; hosts should persist it via [`CoreSettings::profile`].
    pub fn from_env() -> ServiceResult<Self> {
        dotenv::dotenv().ok();
        let database_url = env::var("REVENUE_DATABASE_URL")
            .map_err(|_| ServiceError::Configuration("REVENUE_DATABASE_URL is not set".to_string()))?;
        let device_id = env::var("REVENUE_DEVICE_ID").unwrap_or_else(|_| {
            let generated = Uuid::new_v4().to_string();
            log::warn!("REVENUE_DEVICE_ID not set, generated {}", generated);
            generated
        });

        let settings = Self::new(&database_url, &device_id, SyncSettings::from_env()?);
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_profile(database_url: &str, profile: &DeviceProfile) -> Self {
        Self::new(database_url, &profile.device_id, SyncSettings::new(&profile.api_endpoint))
    }

    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            device_id: self.device_id.clone(),
            api_endpoint: self.sync.api_endpoint.clone(),
        }
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if !self.database_url.starts_with("sqlite:") {
            return Err(ServiceError::Configuration(format!(
                "database_url must be a sqlite URL, got {}",
                self.database_url
            )));
        }
        if self.device_id.trim().is_empty() {
            return Err(ServiceError::Configuration("device_id must not be empty".to_string()));
        }
        self.sync.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let sync = SyncSettings::new("https://revenue.example.org/api");
        assert!(CoreSettings::new("sqlite://revenue.db", "tablet-01", sync.clone()).validate().is_ok());
        assert!(CoreSettings::new("postgres://x", "tablet-01", sync.clone()).validate().is_err());
        assert!(CoreSettings::new("sqlite://revenue.db", " ", sync).validate().is_err());
    }

    #[test]
    fn test_profile_round_trip() {
        let settings = CoreSettings::new("sqlite://a.db", "tablet-02", SyncSettings::new("https://r.example.org"));
        let json = serde_json::to_string(&settings.profile()).unwrap();
        let profile: DeviceProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(CoreSettings::from_profile("sqlite://a.db", &profile), settings);
    }
}
