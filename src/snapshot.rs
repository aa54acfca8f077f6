//! Fleet snapshot builder. One call = one fresh read: fan-out probes,
//! gated inspection, source aggregation, bucket partitioning and the
//! overlay mesh, composed into a response that degrades per source and
//! never fails as a whole.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::agents::Aggregator;
use crate::config::FleetConfig;
use crate::inspect;
use crate::mesh;
use crate::models::{Connectivity, FleetSnapshot, HostReport, LinkStatus, ModelReport, ServiceReport};
use crate::probe::{ProbeResult, ProbeTarget, Prober};

/// What a queued probe belongs to, so results can be routed after the join.
enum Slot {
    HostPrimary(String),
    HostOverlay(String),
    Service(String),
}

pub async fn build_fleet_snapshot(
    cfg: &FleetConfig,
    prober: &Prober,
    aggregator: &Aggregator,
) -> FleetSnapshot {
    let started = Instant::now();

    // Stage 1: every probe is queued before any is awaited; each result
    // lands in its own slot, so nothing shared is written before the join.
    let mut slots = Vec::new();
    let mut targets = Vec::new();
    for (name, host) in &cfg.hosts {
        slots.push(Slot::HostPrimary(name.clone()));
        targets.push(ProbeTarget {
            host: host.primary.clone(),
            port: host.port,
            path: host.path.clone(),
            timeout_ms: cfg.probes.timeout_ms,
        });
        if let Some(overlay) = &host.overlay {
            slots.push(Slot::HostOverlay(name.clone()));
            targets.push(ProbeTarget {
                host: overlay.clone(),
                port: host.port,
                path: host.path.clone(),
                timeout_ms: cfg.probes.timeout_ms,
            });
        }
    }
    for (name, service) in &cfg.services {
        slots.push(Slot::Service(name.clone()));
        targets.push(ProbeTarget {
            host: service.host.clone(),
            port: service.port,
            path: service.path.clone(),
            timeout_ms: cfg.probes.timeout_ms,
        });
    }
    let results = prober.probe_all(&targets).await;

    let mut primaries: HashMap<String, ProbeResult> = HashMap::new();
    let mut overlays: HashMap<String, ProbeResult> = HashMap::new();
    let mut service_results: HashMap<String, ProbeResult> = HashMap::new();
    for (slot, result) in slots.into_iter().zip(results) {
        match slot {
            Slot::HostPrimary(name) => primaries.insert(name, result),
            Slot::HostOverlay(name) => overlays.insert(name, result),
            Slot::Service(name) => service_results.insert(name, result),
        };
    }

    // Stage 2: deep inspection, sequential and only where the cheap
    // probe passed.
    let mut hosts = HashMap::new();
    for (name, host) in &cfg.hosts {
        let primary = primaries
            .remove(name)
            .unwrap_or_else(ProbeResult::unprobed);
        let system = if primary.ok {
            inspect::inspect_host(host, cfg.probes.inspect_timeout_ms).await
        } else {
            debug!(host = %name, "primary probe failed, skipping inspection");
            None
        };
        let overlay = host.overlay.as_ref().map(|_| {
            overlays
                .remove(name)
                .map(|r| LinkStatus::from(&r))
                .unwrap_or_else(|| LinkStatus::from(&ProbeResult::unprobed()))
        });
        hosts.insert(
            name.clone(),
            HostReport {
                connectivity: Connectivity {
                    primary: LinkStatus::from(&primary),
                    overlay,
                },
                system,
            },
        );
    }

    // Stage 3: the three coordination sources, sequential and cheap.
    let agents = aggregator.collect().await;

    // Stage 4: model identifiers from the router service's probe data.
    let models = service_results
        .get(&cfg.models.service)
        .and_then(|result| result.data.as_ref())
        .map(|data| partition_models(&extract_model_ids(data), &cfg.models.buckets))
        .unwrap_or_else(|| empty_report(&cfg.models.buckets));

    // Stage 5: overlay mesh.
    let mesh = mesh::collect_mesh(&cfg.mesh.status_command, cfg.mesh.timeout_ms).await;

    let services = service_results
        .iter()
        .map(|(name, result)| (name.clone(), ServiceReport::from(result)))
        .collect();

    FleetSnapshot {
        generated_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        hosts,
        services,
        models,
        mesh,
        agents,
    }
}

/// Accepts the shapes local services actually report: a bare array, an
/// OpenAI-style `{"data": [{"id": ..}]}` or `{"models": [..]}`, with
/// string or object entries.
pub fn extract_model_ids(data: &Value) -> Vec<String> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("data").or_else(|| map.get("models")) {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("id")
                .or_else(|| obj.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

/// Prefix partition; the longest matching prefix wins, identifiers with
/// no matching prefix stay out of every bucket but remain in `all`.
pub fn partition_models(ids: &[String], prefixes: &HashMap<String, String>) -> ModelReport {
    let mut ordered: Vec<(&String, &String)> = prefixes.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));

    let mut report = empty_report(prefixes);
    report.all = ids.to_vec();
    for id in ids {
        if let Some((_, bucket)) = ordered.iter().find(|(prefix, _)| id.starts_with(prefix.as_str())) {
            report
                .buckets
                .entry((*bucket).clone())
                .or_default()
                .push(id.clone());
        }
    }
    report
}

fn empty_report(prefixes: &HashMap<String, String>) -> ModelReport {
    ModelReport {
        all: Vec::new(),
        buckets: prefixes
            .values()
            .map(|bucket| (bucket.clone(), Vec::new()))
            .collect(),
    }
}
