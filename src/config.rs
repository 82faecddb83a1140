// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving server settings.

use anyhow::Result;
use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::bluetooth::{CapabilityVersion, RecordProfile};
use crate::service::{ServiceOptions, DEFAULT_RELEASE_POWER_DELAY, DEFAULT_USER_TIMEOUT};

const APP_DIR: &str = "pbap-server";

/// Get a sanitized hostname suitable for a Bluetooth name.
/// Bluetooth names should only contain alphanumeric chars, spaces, and hyphens.
fn get_sanitized_hostname() -> String {
    let hostname = gethostname().to_string_lossy().to_string();
    let sanitized: String = hostname
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == ' ' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "Desktop".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the access policy.
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub power: PowerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name advertised in the discovery record.
    pub service_name: String,

    /// RFCOMM channel to listen on.
    pub rfcomm_channel: u8,

    /// Advertise only the local phonebook with the PBAP 1.1 feature set.
    pub aosp_features_only: bool,

    /// Local name handed to clients.
    /// This is always computed at runtime from the system hostname.
    #[serde(skip)]
    pub local_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service_name: "OBEX Phonebook Access Server".to_string(),
            rfcomm_channel: 19,
            aosp_features_only: false,
            local_name: get_sanitized_hostname(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time the user has to answer an access or session key prompt.
    pub user_confirm_ms: u64,

    /// Idle time before the sleep inhibitor is dropped.
    pub release_power_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            user_confirm_ms: DEFAULT_USER_TIMEOUT.as_millis() as u64,
            release_power_ms: DEFAULT_RELEASE_POWER_DELAY.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Block system sleep while a session is active.
    pub inhibit_sleep: bool,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            inhibit_sleep: true,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            timeouts: TimeoutConfig::default(),
            power: PowerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self::load_from(&config_dir, default_data_dir())
    }

    /// Load `config.toml` from `config_dir`, writing defaults if missing.
    pub fn load_from(config_dir: &Path, data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(config_dir)?;

        let config_path = config_dir.join("config.toml");

        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&config_path, content)?;
            config
        };

        config.data_dir = data_dir;
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    pub fn record_profile(&self) -> RecordProfile {
        if self.server.aosp_features_only {
            RecordProfile::AospOnly
        } else {
            RecordProfile::Full
        }
    }

    /// Options for one run of the service.
    pub fn service_options(
        &self,
        adapter_enabled: bool,
        capability_version: Arc<CapabilityVersion>,
    ) -> ServiceOptions {
        ServiceOptions {
            service_name: self.server.service_name.clone(),
            local_name: self.server.local_name.clone(),
            record_profile: self.record_profile(),
            user_timeout: Duration::from_millis(self.timeouts.user_confirm_ms),
            release_power_delay: Duration::from_millis(self.timeouts.release_power_ms),
            adapter_enabled,
            capability_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_written_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        let config = Config::load_from(&config_dir, dir.path().join("data")).unwrap();

        assert!(config_dir.join("config.toml").exists());
        assert!(dir.path().join("data").is_dir());
        assert_eq!(config.server.rfcomm_channel, 19);
        assert_eq!(config.timeouts.user_confirm_ms, 30_000);
        assert_eq!(config.timeouts.release_power_ms, 10_000);
        assert!(config.power.inhibit_sleep);
        assert!(!config.server.local_name.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[server]\naosp_features_only = true\n",
        )
        .unwrap();

        let config = Config::load_from(dir.path(), dir.path().join("data")).unwrap();
        assert_eq!(config.record_profile(), RecordProfile::AospOnly);
        assert_eq!(config.server.service_name, "OBEX Phonebook Access Server");

        let options = config.service_options(true, Arc::new(CapabilityVersion::default()));
        assert_eq!(options.user_timeout, Duration::from_millis(30_000));
        assert_eq!(options.record_profile, RecordProfile::AospOnly);
    }
}
