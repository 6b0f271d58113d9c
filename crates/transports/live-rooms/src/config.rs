//! Configuration types for live-room clients

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for a live-room client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveClientConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// Query parameter that carries the signaling credential
    pub token_query_param: String,

    /// REST endpoint issuing signaling credentials
    pub token_endpoint: String,

    /// Bearer token presented to the credential issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Credential role requested from the issuer
    pub role: CredentialRole,

    /// Optional channel name requested from the issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,

    /// Display name sent with `join_room`
    pub username: String,

    /// Broadcaster identity, required by `go_live`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Maximum peers in the mesh (default: 10, max: 10)
    pub max_peers: u32,

    /// Reconnect policy for the signaling socket
    pub reconnect: ReconnectConfig,

    /// Time allowed for the WebSocket upgrade to complete (default: 10000)
    pub connect_timeout_ms: u64,

    /// Room directory fallback poll interval while outside a room
    pub directory_poll_interval_ms: u64,

    /// How often the credential's remaining lifetime is checked
    pub credential_check_interval_secs: u64,

    /// Remaining lifetime below which the credential is renewed
    pub credential_renewal_floor_secs: u64,

    /// Rejoin the last room after the signaling socket reconnects
    pub rejoin_on_reconnect: bool,
}

/// Credential role requested from the issuer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialRole {
    /// Broadcaster publishing media
    Host,
    /// Viewer/listener
    Audience,
}

impl CredentialRole {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialRole::Host => "host",
            CredentialRole::Audience => "audience",
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Reconnect delay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt in milliseconds (default: 5000)
    pub delay_ms: u64,

    /// Growth factor applied per consecutive failure (default: 1.0, fixed delay)
    pub multiplier: f64,

    /// Upper bound on the delay in milliseconds (default: 30000)
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 5000,
            multiplier: 1.0,
            max_delay_ms: 30000,
        }
    }
}

impl Default for LiveClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/ws".to_string(),
            token_query_param: "token".to_string(),
            token_endpoint: "http://localhost:8000/api/live/token".to_string(),
            auth_token: None,
            role: CredentialRole::Audience,
            channel_name: None,
            username: "guest".to_string(),
            user_id: None,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            max_peers: 10,
            reconnect: ReconnectConfig::default(),
            connect_timeout_ms: 10_000,
            directory_poll_interval_ms: 8000,
            credential_check_interval_secs: 15 * 60,
            credential_renewal_floor_secs: 30 * 60,
            rejoin_on_reconnect: true,
        }
    }
}

impl LiveClientConfig {
    /// Load configuration from a YAML file
    ///
    /// Missing fields fall back to their defaults. The result is validated.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(text: &str) -> crate::Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| crate::Error::InvalidConfig(format!("Invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a valid WebSocket URL
    /// - `max_peers` is not in range 1-10
    /// - a delay or interval is zero
    /// - `reconnect.multiplier` is below 1.0
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }
        url::Url::parse(&self.signaling_url)
            .map_err(|e| Error::InvalidConfig(format!("signaling_url is not a URL: {}", e)))?;

        if self.token_query_param.is_empty() {
            return Err(Error::InvalidConfig(
                "token_query_param must not be empty".to_string(),
            ));
        }

        if self.max_peers == 0 || self.max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                self.max_peers
            )));
        }

        if self.reconnect.delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "reconnect.delay_ms must be greater than zero".to_string(),
            ));
        }

        if self.reconnect.multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "reconnect.multiplier must be >= 1.0, got {}",
                self.reconnect.multiplier
            )));
        }

        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.directory_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "directory_poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.credential_check_interval_secs == 0 || self.credential_renewal_floor_secs == 0 {
            return Err(Error::InvalidConfig(
                "credential check interval and renewal floor must be greater than zero"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Upgrade timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Directory poll interval as a Duration
    pub fn directory_poll_interval(&self) -> Duration {
        Duration::from_millis(self.directory_poll_interval_ms)
    }

    /// Credential check interval as a Duration
    pub fn credential_check_interval(&self) -> Duration {
        Duration::from_secs(self.credential_check_interval_secs)
    }

    /// Credential renewal floor as a Duration
    pub fn credential_renewal_floor(&self) -> Duration {
        Duration::from_secs(self.credential_renewal_floor_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LiveClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect.delay_ms, 5000);
        assert_eq!(config.credential_renewal_floor(), Duration::from_secs(1800));
    }

    #[test]
    fn test_invalid_signaling_url() {
        let config = LiveClientConfig {
            signaling_url: "http://localhost:8080".to_string(),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_invalid_max_peers() {
        let mut config = LiveClientConfig::default();
        config.max_peers = 0;
        assert!(config.validate().is_err());
        config.max_peers = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shrinking_reconnect_rejected() {
        let mut config = LiveClientConfig::default();
        config.reconnect.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let config = LiveClientConfig {
            connect_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config_error());
        assert_eq!(
            LiveClientConfig::default().connect_timeout(),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_yaml_partial_config() {
        let yaml = r#"
signaling_url: wss://live.example.com/ws
username: dj-kay
role: host
user_id: "42"
reconnect:
  delay_ms: 2500
"#;
        let config = LiveClientConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.signaling_url, "wss://live.example.com/ws");
        assert_eq!(config.role, CredentialRole::Host);
        assert_eq!(config.user_id.as_deref(), Some("42"));
        assert_eq!(config.reconnect.delay_ms, 2500);
        assert_eq!(config.reconnect.max_delay_ms, 30000);
        assert_eq!(config.max_peers, 10);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.yaml");
        let config = LiveClientConfig {
            username: "listener".to_string(),
            ..Default::default()
        };
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = LiveClientConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.username, "listener");
        assert_eq!(loaded.role, CredentialRole::Audience);
    }

    #[test]
    fn test_yaml_invalid_rejected() {
        let yaml = "signaling_url: ftp://nowhere\n";
        assert!(LiveClientConfig::from_yaml_str(yaml).is_err());
    }
}
