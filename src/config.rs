//! Kernel configuration. Every address, timeout and threshold the engine
//! uses flows from this value, so tests can run the whole stack against
//! fixtures.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// 0 (the `Default` value) means "use 8080"; see `listen_port()`.
    pub listen_port: u16,
    pub hosts: HashMap<String, HostConf>,
    pub services: HashMap<String, ServiceConf>,
    pub probes: ProbeConf,
    pub coordination: CoordinationConf,
    pub mesh: MeshConf,
    pub stores: StoresConf,
    pub models: ModelsConf,
}

/// One fleet machine: LAN address, optional overlay-mesh address, and the
/// status endpoint its agent serves.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostConf {
    pub primary: String,
    pub overlay: Option<String>,
    #[serde(default = "default_status_port")]
    pub port: u16,
    #[serde(default = "default_status_path")]
    pub path: String,
    pub user: Option<String>,
}

/// A local service worth probing (model router, media indexer, ...).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConf {
    #[serde(default = "default_service_host")]
    pub host: String,
    pub port: u16,
    #[serde(default = "default_service_path")]
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConf {
    pub timeout_ms: u64,
    pub inspect_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CoordinationConf {
    pub roster_path: String,
    pub sessions_dir: String,
    pub process_command: String,
    pub process_patterns: Vec<String>,
    pub recency_threshold_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MeshConf {
    pub status_command: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoresConf {
    pub notes_path: String,
    pub media_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelsConf {
    /// Name of the service whose probe data carries the model identifiers.
    pub service: String,
    /// Identifier prefix -> bucket name.
    pub buckets: HashMap<String, String>,
}

fn default_status_port() -> u16 {
    8088
}
fn default_status_path() -> String {
    "/status".into()
}
fn default_service_host() -> String {
    "127.0.0.1".into()
}
fn default_service_path() -> String {
    "/status".into()
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            inspect_timeout_ms: 8_000,
        }
    }
}

impl Default for CoordinationConf {
    fn default() -> Self {
        Self {
            roster_path: "coordination/ROSTER.md".into(),
            sessions_dir: "coordination/sessions".into(),
            process_command: "ps aux".into(),
            process_patterns: vec![
                "claude".into(),
                "codex".into(),
                "aider".into(),
                "agent".into(),
            ],
            recency_threshold_ms: crate::agents::DEFAULT_RECENCY_THRESHOLD_MS,
        }
    }
}

impl Default for MeshConf {
    fn default() -> Self {
        Self {
            status_command: "tailscale status --json".into(),
            timeout_ms: 5_000,
        }
    }
}

impl Default for StoresConf {
    fn default() -> Self {
        Self {
            notes_path: "data/notes.json".into(),
            media_path: "data/media.json".into(),
        }
    }
}

impl Default for ModelsConf {
    fn default() -> Self {
        let buckets = [
            ("claude", "anthropic"),
            ("gpt", "openai"),
            ("gemini", "google"),
            ("llama", "meta"),
            ("mistral", "mistral"),
        ]
        .into_iter()
        .map(|(prefix, bucket)| (prefix.to_string(), bucket.to_string()))
        .collect();
        Self {
            service: "router".into(),
            buckets,
        }
    }
}

impl FleetConfig {
    pub fn listen_port(&self) -> u16 {
        if self.listen_port == 0 {
            8080
        } else {
            self.listen_port
        }
    }
}

pub async fn load_config() -> FleetConfig {
    let path = std::env::var("MUSTER_CONFIG").unwrap_or_else(|_| "muster.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return FleetConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!(path, "invalid config, using defaults: {e}");
            FleetConfig::default()
        })
    } else {
        warn!(path, "no config file, using defaults");
        FleetConfig::default()
    }
}
