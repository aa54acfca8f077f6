//! Bounded-time HTTP probes with true fan-out. Every code path ends in a
//! `ProbeResult` value: reachability failure, timeout and an unparseable
//! body are all data, never errors, and one probe can never delay or
//! cancel a sibling.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cap on the raw-text fallback kept when a body is not JSON.
const RAW_BODY_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub timeout_ms: u64,
}

/// Terminal probe outcome; one attempt, no retries.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub latency_ms: u64,
    pub status: Option<u16>,
    pub data: Option<Value>,
    pub timeout: bool,
}

impl ProbeResult {
    /// Placeholder for a target that was never reached by a probe at all.
    pub fn unprobed() -> Self {
        Self {
            ok: false,
            latency_ms: 0,
            status: None,
            data: None,
            timeout: false,
        }
    }
}

#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Races the whole request/response against the target's deadline.
    pub async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        let url = format!("http://{}:{}{}", target.host, target.port, target.path);
        let started = Instant::now();
        let attempt = async {
            let response = self.client.get(&url).send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<(u16, String), reqwest::Error>((status, body))
        };

        match tokio::time::timeout(Duration::from_millis(target.timeout_ms), attempt).await {
            Ok(Ok((status, body))) => {
                let data = match serde_json::from_str::<Value>(&body) {
                    Ok(value) => value,
                    // Reachable but non-JSON: degrade the payload, not the probe.
                    Err(_) => Value::String(truncate(&body)),
                };
                ProbeResult {
                    ok: (200..300).contains(&status),
                    latency_ms: started.elapsed().as_millis() as u64,
                    status: Some(status),
                    data: Some(data),
                    timeout: false,
                }
            }
            Ok(Err(err)) => {
                debug!(%url, error = %err, "probe failed");
                ProbeResult {
                    ok: false,
                    latency_ms: started.elapsed().as_millis() as u64,
                    status: None,
                    data: None,
                    timeout: false,
                }
            }
            Err(_) => ProbeResult {
                ok: false,
                latency_ms: target.timeout_ms,
                status: None,
                data: None,
                timeout: true,
            },
        }
    }

    /// Issues every probe before awaiting any, then joins over all of
    /// them; wall-clock is close to max(timeout), not the sum.
    pub async fn probe_all(&self, targets: &[ProbeTarget]) -> Vec<ProbeResult> {
        let probes: Vec<_> = targets.iter().map(|target| self.probe(target)).collect();
        join_all(probes).await
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= RAW_BODY_CAP {
        return body.to_string();
    }
    let mut cut = RAW_BODY_CAP;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body[..cut].to_string()
}
