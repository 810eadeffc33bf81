//! Tunnel descriptors as self-reported by the agent status API
//!
//! Depending on the agent version the tunnel list arrives either as a bare
//! JSON array or wrapped in a `tunnels` field; both shapes are accepted.
//! Entries the agent reports for tunnel kinds this crate does not know are
//! skipped rather than failing the whole list.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Tunnel protocols the agent can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProtocol {
    Tcp,
    Tls,
    Http,
    Https,
}

impl TunnelProtocol {
    /// Transport port assumed when the public URL omits one.
    ///
    /// Raw TCP tunnels have no conventional port and must carry an explicit
    /// one in their public URL.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            TunnelProtocol::Http => Some(80),
            TunnelProtocol::Tls | TunnelProtocol::Https => Some(443),
            TunnelProtocol::Tcp => None,
        }
    }

    /// Wire name as it appears in the agent's `proto` field
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelProtocol::Tcp => "tcp",
            TunnelProtocol::Tls => "tls",
            TunnelProtocol::Http => "http",
            TunnelProtocol::Https => "https",
        }
    }
}

impl fmt::Display for TunnelProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TunnelProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(TunnelProtocol::Tcp),
            "tls" => Ok(TunnelProtocol::Tls),
            "http" => Ok(TunnelProtocol::Http),
            "https" => Ok(TunnelProtocol::Https),
            other => Err(format!(
                "unknown tunnel protocol '{}' (expected tcp, tls, http or https)",
                other
            )),
        }
    }
}

/// One active tunnel as reported by the agent.
///
/// Read-only to this crate; only `public_url` and `proto` drive resolution.
/// Unknown extra fields are ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelDescriptor {
    /// Publicly reachable URL, e.g. `tcp://3.relay.example.net:10022`
    pub public_url: String,

    /// Tunnel protocol, reported as `proto`
    #[serde(rename = "proto")]
    pub protocol: TunnelProtocol,

    /// Local address the tunnel forwards to (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_addr: Option<String>,
}

/// Parse a status API response body into tunnel descriptors.
///
/// Accepts a bare array or an object carrying a `tunnels` array. Entries
/// that do not parse as descriptors are skipped with a debug log.
pub(crate) fn parse_descriptors(body: &[u8]) -> Result<Vec<TunnelDescriptor>, String> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid JSON: {}", e))?;

    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut fields) => match fields.remove("tunnels") {
            Some(serde_json::Value::Array(entries)) => entries,
            Some(_) => return Err("`tunnels` field is not an array".to_string()),
            None => return Err("expected a tunnel array or a `tunnels` field".to_string()),
        },
        _ => return Err("expected a JSON array of tunnels".to_string()),
    };

    let mut descriptors = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<TunnelDescriptor>(entry) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => debug!("Skipping unrecognized tunnel entry: {}", e),
        }
    }

    Ok(descriptors)
}
