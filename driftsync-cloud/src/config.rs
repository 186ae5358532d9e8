//! Sync configuration.

use crate::error::{CloudError, CloudResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Configuration for the sync orchestrator and its HTTP clients.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the identity provider (e.g., "https://accounts.driftsync.io/v1").
    pub identity_server_url: String,

    /// Token server endpoint that exchanges assertions for storage tokens.
    pub token_server_url: String,

    /// Remote assertion verifier used only for diagnostics.
    pub verifier_url: String,

    /// Audience the assertion is minted for. Empty means "origin of the token server".
    pub audience: String,

    /// Lifetime requested for signed certificates (seconds).
    pub certificate_duration_secs: u64,

    /// Lifetime of each generated assertion (seconds).
    pub assertion_duration_secs: u64,

    /// Minimum spacing between sync attempts, applied before each attempt (seconds).
    pub scheduler_rate_limit_secs: u64,

    /// Periodic interval when this is the only device on the account (seconds).
    pub single_device_interval_secs: u64,

    /// Periodic interval when other devices share the account (seconds).
    pub multi_device_interval_secs: u64,

    /// Periodic interval while the account waits on verification (seconds).
    pub unverified_interval_secs: u64,

    /// Upper bound on login state machine steps within one attempt.
    pub max_login_steps: usize,

    /// TCP connect timeout (seconds).
    pub connect_timeout_secs: u64,

    /// Whole-request timeout (seconds).
    pub request_timeout_secs: u64,

    /// Also call the remote verifier with each generated assertion.
    pub debug_assertions: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            identity_server_url: "https://accounts.driftsync.io/v1".to_string(),
            token_server_url: "https://token.driftsync.io/1.0/sync/1.5".to_string(),
            verifier_url: "https://verifier.driftsync.io/v2".to_string(),
            audience: String::new(),
            certificate_duration_secs: 12 * 60 * 60,
            assertion_duration_secs: 15 * 60,
            scheduler_rate_limit_secs: 30,
            single_device_interval_secs: 24 * 60 * 60,
            multi_device_interval_secs: 60 * 60,
            unverified_interval_secs: 5 * 60,
            max_login_steps: 8,
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
            debug_assertions: false,
        }
    }
}

impl SyncConfig {
    /// Loads configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> CloudResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| CloudError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(json: &str) -> CloudResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks URLs parse and durations are usable.
    pub fn validate(&self) -> CloudResult<()> {
        for (name, value) in [
            ("identity_server_url", &self.identity_server_url),
            ("token_server_url", &self.token_server_url),
            ("verifier_url", &self.verifier_url),
        ] {
            Url::parse(value).map_err(|e| CloudError::Config(format!("{name}: {e}")))?;
        }
        if self.certificate_duration_secs == 0 || self.assertion_duration_secs == 0 {
            return Err(CloudError::Config(
                "certificate and assertion durations must be positive".into(),
            ));
        }
        if self.max_login_steps == 0 {
            return Err(CloudError::Config("max_login_steps must be at least 1".into()));
        }
        Ok(())
    }

    /// Audience for generated assertions: the configured value, or the
    /// scheme://host[:port] origin of the token server.
    pub fn assertion_audience(&self) -> CloudResult<String> {
        if !self.audience.is_empty() {
            return Ok(self.audience.clone());
        }
        let url = Url::parse(&self.token_server_url)?;
        Ok(url.origin().ascii_serialization())
    }

    /// Hostname of the token server, used to key skew and backoff.
    pub fn token_server_host(&self) -> CloudResult<String> {
        let url = Url::parse(&self.token_server_url)?;
        url.host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| CloudError::Config("token_server_url has no host".into()))
    }

    pub fn certificate_duration(&self) -> Duration {
        Duration::from_secs(self.certificate_duration_secs)
    }

    pub fn assertion_duration(&self) -> Duration {
        Duration::from_secs(self.assertion_duration_secs)
    }

    pub fn scheduler_rate_limit(&self) -> Duration {
        Duration::from_secs(self.scheduler_rate_limit_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Creates a config pointing every endpoint at a local test server.
    pub fn for_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            identity_server_url: format!("{base}/v1"),
            token_server_url: format!("{base}/1.0/sync/1.5"),
            verifier_url: format!("{base}/v2"),
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates() {
        SyncConfig::default().validate().unwrap();
    }

    #[test]
    fn audience_defaults_to_token_server_origin() {
        let config = SyncConfig {
            token_server_url: "https://token.example.com:8443/1.0/sync/1.5".into(),
            ..SyncConfig::default()
        };
        assert_eq!(config.assertion_audience().unwrap(), "https://token.example.com:8443");
    }

    #[test]
    fn explicit_audience_wins() {
        let config = SyncConfig {
            audience: "https://aud.example.com".into(),
            ..SyncConfig::default()
        };
        assert_eq!(config.assertion_audience().unwrap(), "https://aud.example.com");
    }
}
