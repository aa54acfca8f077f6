//! Narrow collaborators for everything that leaves the process: command
//! execution and filesystem reads. None of them propagate failures; a
//! failed read is `None` or an empty listing, and the caller degrades its
//! own sub-tree.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs `command` with a hard deadline. Returns stdout on a clean exit,
/// `None` on an empty command line, spawn failure, non-zero exit or
/// timeout.
pub async fn run_command(command: &str, timeout_ms: u64) -> Option<String> {
    let argv = shell_words::split(command).ok()?;
    let (program, args) = argv.split_first()?;
    debug!(command, timeout_ms, "running command");

    let output = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        debug!(command, code = output.status.code(), "command failed");
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub async fn read_text_file(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

/// Sorted entries of `path`; empty when the directory cannot be read.
pub async fn list_directory(path: &Path) -> Vec<PathBuf> {
    let mut entries = Vec::new();
    let Ok(mut dir) = tokio::fs::read_dir(path).await else {
        return entries;
    };
    while let Ok(Some(entry)) = dir.next_entry().await {
        entries.push(entry.path());
    }
    entries.sort();
    entries
}
