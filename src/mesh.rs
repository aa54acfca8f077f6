//! Overlay mesh status: the tailscale-style JSON blob flattened into a
//! device list, self node first, peers by name.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::exec::run_command;

#[derive(Debug, Clone, Serialize)]
pub struct MeshDevice {
    pub name: String,
    pub address: String,
    pub online: bool,
    pub os: String,
    pub last_seen: Option<String>,
    pub is_self: bool,
}

#[derive(Debug, Deserialize)]
struct StatusBlob {
    #[serde(rename = "Self")]
    self_node: Option<Node>,
    #[serde(rename = "Peer", default)]
    peers: HashMap<String, Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(rename = "HostName", default)]
    host_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    ips: Vec<String>,
    #[serde(rename = "Online", default)]
    online: bool,
    #[serde(rename = "OS", default)]
    os: String,
    #[serde(rename = "LastSeen")]
    last_seen: Option<String>,
}

impl Node {
    fn into_device(self, is_self: bool) -> MeshDevice {
        MeshDevice {
            name: self.host_name,
            address: self.ips.into_iter().next().unwrap_or_default(),
            online: self.online,
            os: self.os,
            last_seen: self.last_seen,
            is_self,
        }
    }
}

/// The only fallible step; the caller owns the degradation policy.
pub fn parse_mesh_status(raw: &str) -> Result<Vec<MeshDevice>, serde_json::Error> {
    let blob: StatusBlob = serde_json::from_str(raw)?;
    let mut devices = Vec::new();
    if let Some(node) = blob.self_node {
        devices.push(node.into_device(true));
    }
    let mut peers: Vec<Node> = blob.peers.into_values().collect();
    peers.sort_by(|a, b| a.host_name.cmp(&b.host_name));
    devices.extend(peers.into_iter().map(|node| node.into_device(false)));
    Ok(devices)
}

/// Runs the configured status command; a command failure or an
/// unparseable blob both yield an empty list.
pub async fn collect_mesh(command: &str, timeout_ms: u64) -> Vec<MeshDevice> {
    let Some(raw) = run_command(command, timeout_ms).await else {
        return Vec::new();
    };
    match parse_mesh_status(&raw) {
        Ok(devices) => devices,
        Err(err) => {
            warn!(error = %err, "mesh status blob unparseable");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOB: &str = r#"{
        "Self": {
            "HostName": "atlas",
            "TailscaleIPs": ["100.64.0.1"],
            "Online": true,
            "OS": "linux"
        },
        "Peer": {
            "key-b": {
                "HostName": "zephyr",
                "TailscaleIPs": ["100.64.0.3"],
                "Online": false,
                "OS": "macOS",
                "LastSeen": "2026-08-06T21:14:00Z"
            },
            "key-a": {
                "HostName": "brick",
                "TailscaleIPs": ["100.64.0.2"],
                "Online": true,
                "OS": "linux"
            }
        }
    }"#;

    #[test]
    fn self_first_then_peers_by_name() {
        let devices = parse_mesh_status(BLOB).unwrap();
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["atlas", "brick", "zephyr"]);
        assert!(devices[0].is_self);
        assert!(!devices[1].is_self);
        assert_eq!(devices[2].last_seen.as_deref(), Some("2026-08-06T21:14:00Z"));
        assert_eq!(devices[1].address, "100.64.0.2");
    }

    #[test]
    fn missing_fields_default() {
        let devices = parse_mesh_status(r#"{"Peer":{"k":{"HostName":"bare"}}}"#).unwrap();
        assert_eq!(devices.len(), 1);
        assert!(!devices[0].online);
        assert_eq!(devices[0].address, "");
        assert_eq!(devices[0].os, "");
    }

    #[test]
    fn malformed_blob_is_an_error() {
        assert!(parse_mesh_status("tailscale is stopped").is_err());
    }

    #[tokio::test]
    async fn failing_command_degrades_to_empty() {
        assert!(collect_mesh("", 1_000).await.is_empty());
        assert!(collect_mesh("false", 1_000).await.is_empty());
    }
}
