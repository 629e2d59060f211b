use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::Duration;
use crate::Error;

/// Engine-wide configuration: payment windows, renewal timing, and the
/// reconciliation lease. Loaded the way the teacher's `Config` loads
/// (`from_toml`/`from_env`, falling back to `Default`, validated on load).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default payment window for new transactions (spec.md §6).
    #[serde(default = "default_purchase_expires_after", with = "duration_secs")]
    pub purchase_expires_after: Duration,

    /// How early before `expiresAt` a subscription enters the renewal window.
    #[serde(default = "default_renewal_before", with = "duration_secs")]
    pub renewal_before: Duration,

    /// Whether a transaction expiring while its originating subscription is
    /// still `pending` cascades to cancel the subscription, or leaves it
    /// `pending` (the source behavior; see DESIGN.md §9.1).
    #[serde(default = "default_cascade_cancel")]
    pub cascade_cancel_on_transaction_expiry: bool,

    /// TTL of the single-flight reconciliation lease (spec.md §5).
    #[serde(default = "default_lease_ttl", with = "duration_secs")]
    pub lease_ttl: Duration,

    /// Bounded retry count for optimistic-lock conflicts (spec.md §7).
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            purchase_expires_after: default_purchase_expires_after(),
            renewal_before: default_renewal_before(),
            cascade_cancel_on_transaction_expiry: default_cascade_cancel(),
            lease_ttl: default_lease_ttl(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

fn default_purchase_expires_after() -> Duration {
    Duration::minutes(30)
}

fn default_renewal_before() -> Duration {
    Duration::hours(24)
}

fn default_cascade_cancel() -> bool {
    true
}

fn default_lease_ttl() -> Duration {
    Duration::minutes(5)
}

fn default_conflict_retries() -> u32 {
    3
}

mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.as_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::seconds(i64::deserialize(d)?))
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("failed to read config file: {}", e)))?;

        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to
    /// `ORBITPAY_CONFIG` pointing at a TOML file, then to [`Default`].
    pub fn from_env() -> Result<Self, Error> {
        if let Ok(config_path) = std::env::var("ORBITPAY_CONFIG") {
            return Self::from_toml(config_path);
        }
        Ok(Self::default())
    }

    /// Validate configuration values for internal consistency.
    pub fn validate(&self) -> Result<(), Error> {
        if self.purchase_expires_after.as_seconds() <= 0 {
            return Err(Error::config("purchase_expires_after must be > 0"));
        }
        if self.renewal_before.as_seconds() < 0 {
            return Err(Error::config("renewal_before must be >= 0"));
        }
        if self.lease_ttl.as_seconds() <= 0 {
            return Err(Error::config("lease_ttl must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_purchase_window() {
        let mut config = EngineConfig::default();
        config.purchase_expires_after = Duration::seconds(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_from_toml() {
        let toml_src = r#"
            purchase_expires_after = 120
            renewal_before = 86400
            cascade_cancel_on_transaction_expiry = false
            lease_ttl = 60
            conflict_retries = 5
        "#;
        let config: EngineConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.purchase_expires_after.as_seconds(), 120);
        assert!(!config.cascade_cancel_on_transaction_expiry);
    }
}
