//! Client configuration: TOML file with environment variable overrides.
//!
//! Mirrors the layered loading shape used elsewhere in this workspace —
//! defaults baked in via `#[serde(default = ...)]`, a TOML file read from
//! `CONFIG_PATH` (or `client.toml` in the CWD), then a narrow set of env
//! vars applied on top for secrets and deployment-specific values.

use serde::Deserialize;
use tessera_shared::constants;

use crate::error::ClientError;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    #[serde(default = "default_local_db_path")]
    pub local_db_path: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// PBKDF2 iteration count for the identity/prekey sealing blob.
    /// Only ever lowered away from the production default in tests, where
    /// the production iteration count would make fixtures unbearably slow.
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,

    #[serde(default = "default_pre_key_low_water_mark")]
    pub pre_key_low_water_mark: u32,

    #[serde(default = "default_pre_key_replenish_batch_size")]
    pub pre_key_replenish_batch_size: u32,

    #[serde(default = "default_attachment_chunk_threshold_bytes")]
    pub attachment_chunk_threshold_bytes: usize,

    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: usize,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_reconnect_base_secs")]
    pub reconnect_base_secs: u64,

    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,

    /// Device display name advertised in DEVICE_ANNOUNCE frames. Falls back
    /// to the host name at runtime if left blank.
    #[serde(default)]
    pub device_name: String,
}

fn default_gateway_url() -> String {
    "ws://localhost:3001/gateway".to_string()
}
fn default_rest_base_url() -> String {
    "http://localhost:3000/api/v1".to_string()
}
fn default_local_db_path() -> String {
    "./tessera-client.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_pbkdf2_iterations() -> u32 {
    constants::PBKDF2_ITERATIONS
}
fn default_pre_key_low_water_mark() -> u32 {
    constants::PRE_KEY_LOW_WATER_MARK
}
fn default_pre_key_replenish_batch_size() -> u32 {
    constants::PRE_KEY_REPLENISH_BATCH_SIZE
}
fn default_attachment_chunk_threshold_bytes() -> usize {
    constants::ATTACHMENT_CHUNK_THRESHOLD_BYTES
}
fn default_max_file_size_bytes() -> usize {
    constants::MAX_FILE_SIZE_BYTES
}
fn default_heartbeat_secs() -> u64 {
    constants::GATEWAY_HEARTBEAT_SECS
}
fn default_reconnect_base_secs() -> u64 {
    constants::GATEWAY_RECONNECT_BASE_SECS
}
fn default_reconnect_max_secs() -> u64 {
    constants::GATEWAY_RECONNECT_MAX_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            rest_base_url: default_rest_base_url(),
            local_db_path: default_local_db_path(),
            log_level: default_log_level(),
            pbkdf2_iterations: default_pbkdf2_iterations(),
            pre_key_low_water_mark: default_pre_key_low_water_mark(),
            pre_key_replenish_batch_size: default_pre_key_replenish_batch_size(),
            attachment_chunk_threshold_bytes: default_attachment_chunk_threshold_bytes(),
            max_file_size_bytes: default_max_file_size_bytes(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            reconnect_base_secs: default_reconnect_base_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
            device_name: String::new(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from `CONFIG_PATH` (default `client.toml` in the
    /// CWD), then apply environment variable overrides.
    pub fn load() -> Result<Self, ClientError> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "client.toml".to_string());
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| ClientError::Config(format!("reading {path}: {e}")))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ClientError> {
        let mut config: ClientConfig =
            toml::from_str(toml_str).map_err(|e| ClientError::Config(e.to_string()))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ClientError> {
        if let Ok(val) = std::env::var("GATEWAY_URL") {
            self.gateway_url = val;
        }
        if let Ok(val) = std::env::var("REST_BASE_URL") {
            self.rest_base_url = val;
        }
        if let Ok(val) = std::env::var("LOCAL_DB_PATH") {
            self.local_db_path = val;
        }
        if let Ok(val) = std::env::var("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = std::env::var("PBKDF2_ITERATIONS") {
            self.pbkdf2_iterations = val
                .parse()
                .map_err(|_| ClientError::Config(format!("invalid PBKDF2_ITERATIONS: {val}")))?;
        }
        if let Ok(val) = std::env::var("DEVICE_NAME") {
            self.device_name = val;
        }
        Ok(())
    }

    /// Resolve the device name to advertise, falling back to the host name.
    pub fn resolved_device_name(&self) -> String {
        if !self.device_name.is_empty() {
            return self.device_name.clone();
        }
        gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "unknown-device".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn loads_defaults_from_empty_toml() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.gateway_url, "ws://localhost:3001/gateway");
        assert_eq!(config.pbkdf2_iterations, constants::PBKDF2_ITERATIONS);
        assert_eq!(
            config.attachment_chunk_threshold_bytes,
            constants::ATTACHMENT_CHUNK_THRESHOLD_BYTES
        );
    }

    #[test]
    fn parses_explicit_fields() {
        let toml = r#"
            gateway_url = "wss://gateway.example.com"
            rest_base_url = "https://api.example.com"
            pbkdf2_iterations = 10
        "#;
        let config = ClientConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.gateway_url, "wss://gateway.example.com");
        assert_eq!(config.rest_base_url, "https://api.example.com");
        assert_eq!(config.pbkdf2_iterations, 10);
    }

    #[test]
    #[serial]
    fn env_override_takes_precedence_over_toml() {
        std::env::set_var("GATEWAY_URL", "wss://overridden.example.com");
        let config = ClientConfig::from_toml_str(r#"gateway_url = "wss://original""#).unwrap();
        assert_eq!(config.gateway_url, "wss://overridden.example.com");
        std::env::remove_var("GATEWAY_URL");
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let result = ClientConfig::from_toml_str("not = [[[valid");
        assert!(result.is_err());
    }

    #[test]
    fn resolved_device_name_falls_back_to_hostname_when_blank() {
        let config = ClientConfig::default();
        assert!(!config.resolved_device_name().is_empty());
    }

    #[test]
    fn resolved_device_name_prefers_configured_value() {
        let mut config = ClientConfig::default();
        config.device_name = "alices-laptop".to_string();
        assert_eq!(config.resolved_device_name(), "alices-laptop");
    }
}
