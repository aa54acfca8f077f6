//! Deep host inspection, the second stage of the tiered health check.
//! Stage one is the cheap HTTP probe in `probe.rs`; only a host that
//! passed it is worth an ssh round-trip, so callers gate on the probe
//! result before calling in here.

use serde::Serialize;

use crate::config::HostConf;
use crate::exec::run_command;

/// One labeled line per fact so each field can be picked independently.
const INSPECT_SCRIPT: &str = "echo HOSTNAME=$(hostname); echo UPTIME=$(uptime -p 2>/dev/null || uptime); echo DISK=$(df -h / | tail -n 1)";

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Serialize)]
pub struct HostFacts {
    pub hostname: String,
    pub uptime: String,
    pub disk: String,
}

/// Remainder of the first line carrying the marker, if any.
fn labeled_value(raw: &str, label: &str) -> Option<String> {
    raw.lines()
        .find_map(|line| line.trim().strip_prefix(label))
        .map(|rest| rest.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Tolerant `LABEL=value` extraction. A missing marker degrades that one
/// field to "unknown"; nothing here can fail the whole call.
pub fn parse_host_facts(raw: &str) -> HostFacts {
    HostFacts {
        hostname: labeled_value(raw, "HOSTNAME=").unwrap_or_else(|| UNKNOWN.into()),
        uptime: labeled_value(raw, "UPTIME=").unwrap_or_else(|| UNKNOWN.into()),
        disk: labeled_value(raw, "DISK=").unwrap_or_else(|| UNKNOWN.into()),
    }
}

/// Runs the inspection script on the host over ssh. Bounded by
/// `timeout_ms`; any execution failure is `None` and the host's system
/// sub-tree stays null.
pub async fn inspect_host(host: &HostConf, timeout_ms: u64) -> Option<HostFacts> {
    let target = match &host.user {
        Some(user) => format!("{user}@{}", host.primary),
        None => host.primary.clone(),
    };
    let connect_secs = (timeout_ms / 2_000).max(2);
    let command = format!(
        "ssh -o BatchMode=yes -o ConnectTimeout={connect_secs} {target} {INSPECT_SCRIPT}"
    );
    run_command(&command, timeout_ms)
        .await
        .map(|raw| parse_host_facts(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_all_fields() {
        let raw = "HOSTNAME=atlas\nUPTIME=up 3 days, 2 hours\nDISK=/dev/sda1 98G 42G 51G 46% /\n";
        let facts = parse_host_facts(raw);
        assert_eq!(facts.hostname, "atlas");
        assert_eq!(facts.uptime, "up 3 days, 2 hours");
        assert_eq!(facts.disk, "/dev/sda1 98G 42G 51G 46% /");
    }

    #[test]
    fn missing_marker_defaults_to_unknown() {
        let facts = parse_host_facts("HOSTNAME=atlas\n");
        assert_eq!(facts.hostname, "atlas");
        assert_eq!(facts.uptime, "unknown");
        assert_eq!(facts.disk, "unknown");
    }

    #[test]
    fn garbage_defaults_everything() {
        let facts = parse_host_facts("ssh: connect to host refused");
        assert_eq!(facts.hostname, "unknown");
        assert_eq!(facts.uptime, "unknown");
        assert_eq!(facts.disk, "unknown");
    }

    #[test]
    fn value_may_contain_the_separator() {
        let facts = parse_host_facts("UPTIME=load average: 0.52, 0.58\n");
        assert_eq!(facts.uptime, "load average: 0.52, 0.58");
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let facts = parse_host_facts("HOSTNAME=\nUPTIME=up 1 hour\n");
        assert_eq!(facts.hostname, "unknown");
        assert_eq!(facts.uptime, "up 1 hour");
    }
}
