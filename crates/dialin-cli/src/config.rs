//! CLI configuration
//!
//! Settings come from three layers: command-line flags (with environment
//! variable fallbacks) take precedence over the optional YAML config file,
//! which takes precedence over built-in defaults.
//!
//! The workflow's secrets stay out of this tool entirely: the tunneling
//! agent is authenticated before `dialin` runs, so no token field exists
//! here and none is ever handed to the resolver.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use dialin_resolver::TunnelProtocol;

const DEFAULT_API_URL: &str = "http://127.0.0.1:4040/api/tunnels";
const DEFAULT_USER: &str = "root";
const DEFAULT_ATTEMPTS: u32 = 30;
const DEFAULT_INTERVAL_SECS: u64 = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Fully merged runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Agent status API URL
    pub api_url: String,
    /// Tunnel protocol to wait for
    pub protocol: TunnelProtocol,
    /// User name in the printed connection string
    pub user: String,
    /// Status poll budget
    pub attempts: u32,
    /// Wait between polls
    pub poll_interval: Duration,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// How long to keep the process alive after printing the endpoint
    pub hold: Duration,
}

/// Values given on the command line (`None` means "not given")
#[derive(Debug, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub protocol: Option<TunnelProtocol>,
    pub user: Option<String>,
    pub attempts: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub hold_secs: Option<u64>,
}

/// Configuration file format (YAML)
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Tunneling agent configuration
    #[serde(default)]
    pub agent: AgentSection,

    /// Connection string configuration
    #[serde(default)]
    pub ssh: SshSection,

    /// Polling policy
    #[serde(default)]
    pub poll: PollSection,

    /// Seconds to keep the process alive after printing the endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AgentSection {
    /// Status API URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Tunnel protocol to wait for (tcp, tls, http, https)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SshSection {
    /// User name in the printed connection string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PollSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

/// Load a YAML configuration file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

impl Settings {
    /// Merge CLI overrides over the config file over built-in defaults
    pub fn resolve(overrides: Overrides, file: ConfigFile) -> Result<Self> {
        let protocol = match (overrides.protocol, file.agent.protocol) {
            (Some(protocol), _) => protocol,
            (None, Some(raw)) => raw
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid protocol in config file")?,
            (None, None) => TunnelProtocol::Tcp,
        };

        Ok(Settings {
            api_url: overrides
                .api_url
                .or(file.agent.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            protocol,
            user: overrides
                .user
                .or(file.ssh.user)
                .unwrap_or_else(|| DEFAULT_USER.to_string()),
            attempts: overrides
                .attempts
                .or(file.poll.attempts)
                .unwrap_or(DEFAULT_ATTEMPTS),
            poll_interval: Duration::from_secs(
                overrides
                    .poll_interval_secs
                    .or(file.poll.interval_secs)
                    .unwrap_or(DEFAULT_INTERVAL_SECS),
            ),
            request_timeout: Duration::from_secs(
                overrides
                    .request_timeout_secs
                    .or(file.poll.request_timeout_secs)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            hold: Duration::from_secs(overrides.hold_secs.or(file.hold_secs).unwrap_or(0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(Overrides::default(), ConfigFile::default()).unwrap();

        assert_eq!(settings.api_url, DEFAULT_API_URL);
        assert_eq!(settings.protocol, TunnelProtocol::Tcp);
        assert_eq!(settings.user, "root");
        assert_eq!(settings.attempts, 30);
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert!(settings.hold.is_zero());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let file: ConfigFile = serde_yaml::from_str(
            r#"
agent:
  api_url: http://127.0.0.1:4041/api/tunnels
  protocol: tls
ssh:
  user: ci
poll:
  attempts: 5
  interval_secs: 1
hold_secs: 3600
"#,
        )
        .unwrap();

        let settings = Settings::resolve(Overrides::default(), file).unwrap();

        assert_eq!(settings.api_url, "http://127.0.0.1:4041/api/tunnels");
        assert_eq!(settings.protocol, TunnelProtocol::Tls);
        assert_eq!(settings.user, "ci");
        assert_eq!(settings.attempts, 5);
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.hold, Duration::from_secs(3600));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str(
            r#"
agent:
  protocol: tls
ssh:
  user: ci
"#,
        )
        .unwrap();

        let overrides = Overrides {
            protocol: Some(TunnelProtocol::Tcp),
            user: Some("runner".to_string()),
            ..Default::default()
        };

        let settings = Settings::resolve(overrides, file).unwrap();
        assert_eq!(settings.protocol, TunnelProtocol::Tcp);
        assert_eq!(settings.user, "runner");
    }

    #[test]
    fn test_invalid_protocol_in_file() {
        let file: ConfigFile = serde_yaml::from_str("agent:\n  protocol: udp\n").unwrap();
        assert!(Settings::resolve(Overrides::default(), file).is_err());
    }

    #[test]
    fn test_partial_file_parses() {
        let file: ConfigFile = serde_yaml::from_str("poll:\n  attempts: 2\n").unwrap();
        let settings = Settings::resolve(Overrides::default(), file).unwrap();

        assert_eq!(settings.attempts, 2);
        assert_eq!(settings.user, "root");
    }
}
