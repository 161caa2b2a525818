use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("scan_interval_secs must be greater than 0")]
    InvalidScanInterval,

    #[error("release_messages.poll_interval_ms must be greater than 0")]
    InvalidPollInterval,
}

fn default_scan_interval_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_enabled() -> bool {
    true
}

/// Gray release rule engine configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Delay between the end of one full scan and the start of the next
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Admin service serving the rule rows and release messages
    pub admin_service: AdminService,
    #[serde(default)]
    pub release_messages: ReleaseMessages,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scan_interval_secs == 0 {
            return Err(ValidationError::InvalidScanInterval);
        }
        self.release_messages.validate()
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AdminService {
    pub url: Url,
}

/// Polling of release messages for incremental updates
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ReleaseMessages {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ReleaseMessages {
    fn default() -> Self {
        ReleaseMessages {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ReleaseMessages {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::InvalidPollInterval);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
admin_service:
    url: "http://127.0.0.1:8090"
"#,
        )
        .unwrap();
        assert_eq!(config.scan_interval(), Duration::from_secs(60));
        assert!(config.release_messages.enabled);
        assert_eq!(config.release_messages.poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config: Config = serde_yaml::from_str(
            r#"
scan_interval_secs: 0
admin_service: {url: "http://127.0.0.1:8090"}
release_messages: {enabled: false, poll_interval_ms: 250}
"#,
        )
        .unwrap();
        assert!(!config.release_messages.enabled);
        assert_eq!(config.validate(), Err(ValidationError::InvalidScanInterval));

        config.scan_interval_secs = 5;
        config.release_messages.poll_interval_ms = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPollInterval));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(serde_yaml::from_str::<Config>(r#"admin_service: {url: "not a url"}"#).is_err());

        // Negative intervals
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
scan_interval_secs: -1
admin_service: {url: "http://127.0.0.1:8090"}
"#
            )
            .is_err()
        );

        // Missing admin service
        assert!(serde_yaml::from_str::<Config>("scan_interval_secs: 10").is_err());
    }
}
