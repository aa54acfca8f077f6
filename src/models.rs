//! Serialized snapshot shapes. Every key is always present: a failed
//! source shows up as null / false / empty, never as a missing field.

use serde::Serialize;
use std::collections::HashMap;

use crate::agents::HealthSnapshot;
use crate::inspect::HostFacts;
use crate::mesh::MeshDevice;
use crate::probe::ProbeResult;

#[derive(Debug, Serialize)]
pub struct FleetSnapshot {
    pub generated_at: String,
    pub elapsed_ms: u64,
    pub hosts: HashMap<String, HostReport>,
    pub services: HashMap<String, ServiceReport>,
    pub models: ModelReport,
    pub mesh: Vec<MeshDevice>,
    pub agents: HealthSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HostReport {
    pub connectivity: Connectivity,
    /// Null unless the primary probe passed and the inspection answered.
    pub system: Option<HostFacts>,
}

#[derive(Debug, Serialize)]
pub struct Connectivity {
    pub primary: LinkStatus,
    /// Null when the host has no overlay address configured.
    pub overlay: Option<LinkStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub reachable: bool,
    pub latency_ms: u64,
    pub status: Option<u16>,
    pub timeout: bool,
}

impl From<&ProbeResult> for LinkStatus {
    fn from(result: &ProbeResult) -> Self {
        Self {
            reachable: result.ok,
            latency_ms: result.latency_ms,
            status: result.status,
            timeout: result.timeout,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceReport {
    pub up: bool,
    pub latency_ms: u64,
    pub status: Option<u16>,
}

impl From<&ProbeResult> for ServiceReport {
    fn from(result: &ProbeResult) -> Self {
        Self {
            up: result.ok,
            latency_ms: result.latency_ms,
            status: result.status,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ModelReport {
    /// Every reported identifier, bucketed or not.
    pub all: Vec<String>,
    /// Bucket name -> matching identifiers; configured buckets are
    /// present even when empty.
    pub buckets: HashMap<String, Vec<String>>,
}
