//! Configuration handling for the bouncer client.
//!
//! Settings come from a YAML file, then environment variables, then
//! command-line flags (applied in `main`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use vulp_session::ClientConfig;
use vulp_wire::DEFAULT_MAX_PAYLOAD;

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Bouncer address, `host:port`
    pub server: String,
    /// Protocol version announced at login
    pub protocol_version: u32,
    /// Delay before reconnecting after the stream drops; `None` disables reconnects
    #[serde(with = "humantime_opt")]
    pub reconnect_delay: Option<Duration>,
    /// Largest payload accepted from the bouncer
    pub max_payload_len: usize,
    /// TLS configuration
    pub tls: TlsSettings,
}

/// TLS configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Whether TLS is enabled
    pub enabled: bool,
    /// Server name for SNI; defaults to the host part of `server`
    pub sni: Option<String>,
    /// Path to the CA bundle (PEM)
    pub ca_file: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server: "localhost:5454".to_string(),
            protocol_version: 1,
            reconnect_delay: Some(Duration::from_secs(5)),
            max_payload_len: DEFAULT_MAX_PAYLOAD,
            tls: TlsSettings::default(),
        }
    }
}

impl ClientSettings {
    /// Load settings from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Self {
        let path = config_path.as_ref();
        let mut settings = match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_yaml(&content) {
                Ok(settings) => {
                    info!("Loaded configuration from {:?}", path);
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({:#}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    /// Parse settings from YAML; missing keys take their defaults
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("invalid client settings")
    }

    /// Apply `VULP_*` overrides looked up through `lookup`
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup("VULP_SERVER") {
            info!("Server overridden by environment: {}", server);
            self.server = server;
        }

        if let Some(version) = lookup("VULP_PROTOCOL_VERSION") {
            match version.parse::<u32>() {
                Ok(version) => {
                    self.protocol_version = version;
                    info!("Protocol version overridden by environment: {}", version);
                }
                Err(_) => warn!("Ignoring invalid VULP_PROTOCOL_VERSION={}", version),
            }
        }

        if let Some(tls) = lookup("VULP_TLS") {
            self.tls.enabled = matches!(tls.to_lowercase().as_str(), "1" | "true" | "yes");
            info!("TLS overridden by environment: {}", self.tls.enabled);
        }
    }

    /// Host part of `server`, used as the default SNI name
    pub fn server_host(&self) -> &str {
        match self.server.rsplit_once(':') {
            Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
            None => &self.server,
        }
    }

    /// Protocol core configuration derived from these settings
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            protocol_version: self.protocol_version,
            max_payload_len: self.max_payload_len,
            ..ClientConfig::default()
        }
    }
}

/// `Option<Duration>` as a humantime string (`"5s"`, `"250ms"`), `null` or `"off"` to disable
mod humantime_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(delay) => serializer.serialize_str(&humantime::format_duration(*delay).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.eq_ignore_ascii_case("off") => Ok(None),
            Some(raw) => humantime::parse_duration(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_settings() {
        let settings = ClientSettings::default();
        assert_eq!(settings.server, "localhost:5454");
        assert_eq!(settings.protocol_version, 1);
        assert_eq!(settings.reconnect_delay, Some(Duration::from_secs(5)));
        assert!(!settings.tls.enabled);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
server: bouncer.example.net:7000
protocol_version: 2
reconnect_delay: 750ms
max_payload_len: 65536
tls:
  enabled: true
  ca_file: /etc/vulp/ca.pem
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let settings = ClientSettings::from_yaml(
            &std::fs::read_to_string(temp_file.path()).unwrap(),
        )
        .unwrap();

        assert_eq!(settings.server, "bouncer.example.net:7000");
        assert_eq!(settings.protocol_version, 2);
        assert_eq!(settings.reconnect_delay, Some(Duration::from_millis(750)));
        assert_eq!(settings.max_payload_len, 65536);
        assert!(settings.tls.enabled);
        assert_eq!(settings.tls.ca_file.as_deref(), Some("/etc/vulp/ca.pem"));
        assert_eq!(settings.tls.sni, None);
        assert_eq!(settings.client_config().max_payload_len, 65536);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = ClientSettings::from_yaml("reconnect_delay: off\n").unwrap();
        assert_eq!(settings.reconnect_delay, None);
        assert_eq!(settings.server, "localhost:5454");
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"server: [unterminated").unwrap();
        let settings = ClientSettings::load_from_file(temp_file.path());
        assert_eq!(settings.protocol_version, ClientSettings::default().protocol_version);
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("VULP_SERVER", "10.0.0.9:5454"),
            ("VULP_PROTOCOL_VERSION", "not-a-number"),
            ("VULP_TLS", "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut settings = ClientSettings::default();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.server, "10.0.0.9:5454");
        assert_eq!(settings.protocol_version, 1);
        assert!(settings.tls.enabled);
    }

    #[test]
    fn test_server_host() {
        let mut settings = ClientSettings::default();
        assert_eq!(settings.server_host(), "localhost");
        settings.server = "[::1]:5454".to_string();
        assert_eq!(settings.server_host(), "::1");
    }
}
