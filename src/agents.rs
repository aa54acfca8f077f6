//! Agent health from three unrelated sources: the coordination roster
//! (a markdown table), the machine's process listing, and free-form
//! session log files. Each source is parsed on its own and degrades on
//! its own; fusion is a pure function over the structured results so it
//! can be tested without any parser in the loop.

use serde::Serialize;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::CoordinationConf;
use crate::exec::{list_directory, read_text_file, run_command};

pub const DEFAULT_RECENCY_THRESHOLD_MS: u64 = 3_600_000;

const PROCESS_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Active,
    Parked,
    Unknown,
}

/// Which source seeded a record. Enrichment never rewrites this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSource {
    Roster,
    SessionLog,
}

/// One fused identity. `name` is the raw parsed name; no normalization
/// beyond trimming happens anywhere in the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub name: String,
    pub state: AgentState,
    pub source: AgentSource,
    pub model: Option<String>,
    pub interface: Option<String>,
    pub focus: Option<String>,
    pub roster_status: Option<String>,
    pub last_activity: Option<String>,
    pub age_ms: Option<u64>,
    pub session_log: Option<String>,
}

/// A parsed roster table row.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterAgent {
    pub id: String,
    pub name: String,
    pub model: Option<String>,
    pub interface: Option<String>,
    pub status: String,
    pub focus: Option<String>,
}

/// Raw process evidence, surfaced alongside the records but never fused:
/// a command line carries no reliable identity key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub user: String,
    pub pid: u32,
    pub cpu: f32,
    pub mem: f32,
    pub command: String,
}

/// One session log artifact with its heuristically extracted fields.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub agent_name: String,
    pub status: Option<String>,
    pub focus: Option<String>,
    pub model: Option<String>,
    pub file: String,
    pub last_modified: Option<String>,
    pub age_ms: u64,
    pub recently_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSummary {
    pub total: usize,
    pub active: usize,
    pub parked: usize,
    pub recently_active: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub agents: Vec<AgentRecord>,
    pub processes: Vec<ProcessRecord>,
    pub summary: AgentSummary,
}

pub fn classify_state(status: &str) -> AgentState {
    let status = status.trim();
    if status.eq_ignore_ascii_case("active") {
        AgentState::Active
    } else if status.eq_ignore_ascii_case("parked") {
        AgentState::Parked
    } else {
        AgentState::Unknown
    }
}

/// Roster table rows: `| id | name | model | interface | status | focus |`.
/// Header and separator rows are skipped, short rows tolerated, rows
/// without a name dropped.
pub fn parse_roster(text: &str) -> Vec<RosterAgent> {
    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with('|') {
            continue;
        }
        let cells: Vec<&str> = line.trim_matches('|').split('|').map(str::trim).collect();
        if cells.len() < 2 {
            continue;
        }
        let is_separator = cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':'));
        if is_separator || cells[0].eq_ignore_ascii_case("id") {
            continue;
        }
        let cell = |i: usize| cells.get(i).map(|c| c.to_string()).unwrap_or_default();
        let opt = |i: usize| {
            cells
                .get(i)
                .filter(|c| !c.is_empty())
                .map(|c| c.to_string())
        };
        let name = cell(1);
        if name.is_empty() {
            continue;
        }
        rows.push(RosterAgent {
            id: cell(0),
            name,
            model: opt(2),
            interface: opt(3),
            status: cell(4),
            focus: opt(5),
        });
    }
    rows
}

/// Positional `ps aux` shape: USER PID %CPU %MEM ... COMMAND from field 10.
pub fn parse_process_line(line: &str) -> Option<ProcessRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 11 {
        return None;
    }
    Some(ProcessRecord {
        user: fields[0].to_string(),
        pid: fields[1].parse().ok()?,
        cpu: fields[2].parse().unwrap_or(0.0),
        mem: fields[3].parse().unwrap_or(0.0),
        command: fields[10..].join(" "),
    })
}

/// Case-insensitive substring filter against the configured vocabulary.
pub fn filter_processes(listing: &str, patterns: &[String]) -> Vec<ProcessRecord> {
    listing
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            patterns
                .iter()
                .any(|p| !p.is_empty() && lower.contains(&p.to_lowercase()))
        })
        .filter_map(parse_process_line)
        .collect()
}

const NAME_LABELS: &[&str] = &["agent:", "agent name:", "name:"];
const STATUS_LABELS: &[&str] = &["status:", "state:"];
const FOCUS_LABELS: &[&str] = &["focus:", "task:", "working on:"];
const MODEL_LABELS: &[&str] = &["model:"];

/// Labeled-line extraction: labels are tried in order and the first one
/// found anywhere in the text wins, so "agent:" beats "name:" even when
/// "name:" appears on an earlier line.
pub fn extract_labeled_field(text: &str, labels: &[&str]) -> Option<String> {
    for label in labels {
        for line in text.lines() {
            let line = line.trim().trim_start_matches(['-', '*', '#']).trim_start();
            let Some(head) = line.get(..label.len()) else {
                continue;
            };
            if head.eq_ignore_ascii_case(label) {
                let value = line[label.len()..].trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

async fn read_session_record(path: &Path, threshold_ms: u64) -> Option<SessionRecord> {
    let content = read_text_file(path).await?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session")
        .to_string();
    let file = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let modified = tokio::fs::metadata(path).await.ok().and_then(|m| m.modified().ok());
    let age_ms = modified
        .and_then(|m| m.elapsed().ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(u64::MAX);
    let last_modified = modified
        .map(OffsetDateTime::from)
        .and_then(|t| t.format(&Rfc3339).ok());
    Some(SessionRecord {
        agent_name: extract_labeled_field(&content, NAME_LABELS).unwrap_or(stem),
        status: extract_labeled_field(&content, STATUS_LABELS),
        focus: extract_labeled_field(&content, FOCUS_LABELS),
        model: extract_labeled_field(&content, MODEL_LABELS),
        file,
        last_modified,
        age_ms,
        recently_active: age_ms < threshold_ms,
    })
}

/// One record per readable file in the sessions directory.
pub async fn read_session_records(dir: &Path, threshold_ms: u64) -> Vec<SessionRecord> {
    let mut records = Vec::new();
    for path in list_directory(dir).await {
        if !path.is_file() {
            continue;
        }
        if let Some(record) = read_session_record(&path, threshold_ms).await {
            records.push(record);
        }
    }
    records
}

/// Identity fusion. Seeds from the roster in row order, then lets each
/// recently-active session enrich the first entry (insertion order) whose
/// name equals the session's agent name or is contained within it; a miss
/// inserts a new session-sourced entry. Running it twice over the same
/// inputs gives the same mapping and the same counts.
pub fn fuse(
    roster: &[RosterAgent],
    sessions: &[SessionRecord],
    threshold_ms: u64,
) -> (Vec<AgentRecord>, AgentSummary) {
    let mut records: Vec<AgentRecord> = Vec::new();
    for row in roster {
        // Duplicate roster names keep the first row.
        if records.iter().any(|r| r.name == row.name) {
            continue;
        }
        records.push(AgentRecord {
            name: row.name.clone(),
            state: classify_state(&row.status),
            source: AgentSource::Roster,
            model: row.model.clone(),
            interface: row.interface.clone(),
            focus: row.focus.clone(),
            roster_status: Some(row.status.clone()),
            last_activity: None,
            age_ms: None,
            session_log: None,
        });
    }

    for session in sessions.iter().filter(|s| s.recently_active) {
        let hit = records
            .iter_mut()
            .find(|r| r.name == session.agent_name || session.agent_name.contains(r.name.as_str()));
        match hit {
            Some(record) => {
                record.last_activity = session.last_modified.clone();
                record.session_log = Some(session.file.clone());
                record.age_ms = Some(session.age_ms);
            }
            None => records.push(AgentRecord {
                name: session.agent_name.clone(),
                state: session
                    .status
                    .as_deref()
                    .map(classify_state)
                    .unwrap_or(AgentState::Unknown),
                source: AgentSource::SessionLog,
                model: session.model.clone(),
                interface: None,
                focus: session.focus.clone(),
                roster_status: None,
                last_activity: session.last_modified.clone(),
                age_ms: Some(session.age_ms),
                session_log: Some(session.file.clone()),
            }),
        }
    }

    let summary = AgentSummary {
        total: records.len(),
        active: records.iter().filter(|r| r.state == AgentState::Active).count(),
        parked: records.iter().filter(|r| r.state == AgentState::Parked).count(),
        recently_active: records
            .iter()
            .filter(|r| r.age_ms.is_some_and(|a| a < threshold_ms))
            .count(),
    };
    (records, summary)
}

/// Drives the three sources for one fresh pass. No caching: every call
/// re-reads the roster, re-lists the sessions and re-runs the listing.
pub struct Aggregator {
    conf: CoordinationConf,
}

impl Aggregator {
    pub fn new(conf: CoordinationConf) -> Self {
        Self { conf }
    }

    pub async fn collect(&self) -> HealthSnapshot {
        let roster = match read_text_file(Path::new(&self.conf.roster_path)).await {
            Some(text) => parse_roster(&text),
            None => {
                debug!(path = %self.conf.roster_path, "roster unreadable");
                Vec::new()
            }
        };
        let sessions = read_session_records(
            Path::new(&self.conf.sessions_dir),
            self.conf.recency_threshold_ms,
        )
        .await;
        let processes = match run_command(&self.conf.process_command, PROCESS_TIMEOUT_MS).await {
            Some(listing) => filter_processes(&listing, &self.conf.process_patterns),
            None => Vec::new(),
        };
        let (agents, summary) = fuse(&roster, &sessions, self.conf.recency_threshold_ms);
        HealthSnapshot {
            agents,
            processes,
            summary,
        }
    }

    pub async fn sessions(&self, sub_dir: Option<&str>) -> Vec<SessionRecord> {
        let dir = match sub_dir {
            Some(sub) => Path::new(&self.conf.sessions_dir).join(sub),
            None => PathBuf::from(&self.conf.sessions_dir),
        };
        read_session_records(&dir, self.conf.recency_threshold_ms).await
    }

    pub fn session_path(&self, name: &str) -> PathBuf {
        Path::new(&self.conf.sessions_dir).join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = "\
# Fleet roster

| id | name | model | interface | status | focus |
|----|------|-------|-----------|--------|-------|
| a1 | Watcher | claude-sonnet | tmux | Active | inbox triage |
| a2 | Scribe | gpt-4o | cli | Parked | |
stray line
| a3 | | x | y | Active | orphan |
";

    fn session(name: &str, age_ms: u64, recently_active: bool) -> SessionRecord {
        SessionRecord {
            agent_name: name.to_string(),
            status: None,
            focus: None,
            model: None,
            file: format!("{name}.log"),
            last_modified: Some("2026-08-07T10:00:00Z".to_string()),
            age_ms,
            recently_active,
        }
    }

    #[test]
    fn roster_table_rows_parse() {
        let rows = parse_roster(ROSTER);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Watcher");
        assert_eq!(rows[0].model.as_deref(), Some("claude-sonnet"));
        assert_eq!(rows[0].status, "Active");
        assert_eq!(rows[1].focus, None);
    }

    #[test]
    fn process_lines_filter_and_parse() {
        let listing = "\
USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND
mark        4242  3.1  1.8 123456 7890 pts/0    Sl+  09:12   0:42 claude --session inbox
root         911  0.0  0.1  11111  222 ?        Ss   08:00   0:00 sshd: /usr/sbin/sshd
mark        5150  1.0  0.9  99999  888 pts/1    S+   09:30   0:05 codex-agent run
";
        let records = filter_processes(listing, &["claude".into(), "codex".into()]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user, "mark");
        assert_eq!(records[0].pid, 4242);
        assert_eq!(records[0].command, "claude --session inbox");
        assert_eq!(records[1].command, "codex-agent run");
    }

    #[test]
    fn first_label_wins_across_lines() {
        let text = "name: fallback\n- Agent: Watcher\nstatus: active\n";
        assert_eq!(
            extract_labeled_field(text, NAME_LABELS).as_deref(),
            Some("Watcher")
        );
        assert_eq!(
            extract_labeled_field(text, STATUS_LABELS).as_deref(),
            Some("active")
        );
        assert_eq!(extract_labeled_field(text, MODEL_LABELS), None);
    }

    #[test]
    fn substring_session_enriches_instead_of_duplicating() {
        let roster = vec![RosterAgent {
            id: "a1".into(),
            name: "Watcher".into(),
            model: None,
            interface: None,
            status: "Active".into(),
            focus: None,
        }];
        let sessions = vec![session("Watcher-session", 120_000, true)];
        let (records, summary) = fuse(&roster, &sessions, DEFAULT_RECENCY_THRESHOLD_MS);
        assert_eq!(summary.total, 1);
        assert_eq!(records[0].name, "Watcher");
        assert_eq!(records[0].source, AgentSource::Roster);
        assert_eq!(records[0].age_ms, Some(120_000));
        assert_eq!(records[0].session_log.as_deref(), Some("Watcher-session.log"));
        assert_eq!(summary.recently_active, 1);
    }

    #[test]
    fn unmatched_session_inserts_new_record() {
        let (records, summary) = fuse(&[], &[session("Drifter", 5_000, true)], 3_600_000);
        assert_eq!(summary.total, 1);
        assert_eq!(records[0].source, AgentSource::SessionLog);
        assert_eq!(records[0].roster_status, None);
        assert_eq!(records[0].state, AgentState::Unknown);
    }

    #[test]
    fn stale_sessions_are_ignored_by_fusion() {
        let roster = vec![RosterAgent {
            id: "a1".into(),
            name: "Watcher".into(),
            model: None,
            interface: None,
            status: "Parked".into(),
            focus: None,
        }];
        let sessions = vec![session("Watcher", 7_200_000, false)];
        let (records, summary) = fuse(&roster, &sessions, DEFAULT_RECENCY_THRESHOLD_MS);
        assert_eq!(records[0].age_ms, None);
        assert_eq!(summary.recently_active, 0);
        assert_eq!(summary.parked, 1);
    }

    #[test]
    fn fusion_is_idempotent_and_counts_are_consistent() {
        let roster = parse_roster(ROSTER);
        let sessions = vec![
            session("Watcher-session", 120_000, true),
            session("Drifter", 10_000, true),
            session("Old-hand", 9_999_999, false),
        ];
        let first = fuse(&roster, &sessions, DEFAULT_RECENCY_THRESHOLD_MS);
        let second = fuse(&roster, &sessions, DEFAULT_RECENCY_THRESHOLD_MS);
        assert_eq!(
            serde_json::to_value(&first.0).unwrap(),
            serde_json::to_value(&second.0).unwrap()
        );
        assert_eq!(first.1, second.1);
        assert!(first.1.active + first.1.parked <= first.1.total);
        assert_eq!(first.1.total, 3);
    }

    #[tokio::test]
    async fn session_records_come_from_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("watcher.md"),
            "# Session\nAgent: Watcher\nStatus: active\nModel: claude-sonnet\nFocus: inbox\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("bare.log"), "no labels here\n").unwrap();

        let records = read_session_records(dir.path(), DEFAULT_RECENCY_THRESHOLD_MS).await;
        assert_eq!(records.len(), 2);
        let named = records.iter().find(|r| r.agent_name == "Watcher").unwrap();
        assert_eq!(named.status.as_deref(), Some("active"));
        assert_eq!(named.model.as_deref(), Some("claude-sonnet"));
        assert!(named.recently_active);
        // Fallback name is the file stem.
        assert!(records.iter().any(|r| r.agent_name == "bare"));
    }
}
