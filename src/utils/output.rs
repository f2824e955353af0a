//! Decoding restic output into typed statistics
//!
//! Every extractor returns [`ParseError`] on malformed input so a caller can
//! tell "restic failed" apart from "restic succeeded but said something we
//! could not read".

use crate::api::{FileStats, HostStats, RepositoryStats, SnapshotStats, TargetRef};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Conventional name of the hand-off file between backup and status update
pub const DEFAULT_OUTPUT_FILE_NAME: &str = "output.json";

/// Exact line restic prints when `check` finds nothing wrong
const CHECK_SUCCESS_LINE: &str = "no errors were found";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no summary message found in backup output")]
    NoSummary,

    #[error("malformed backup summary: {0}")]
    MalformedSummary(#[source] serde_json::Error),

    #[error("no snapshot groups found in forget output")]
    NoForgetGroups,

    #[error("malformed forget output: {0}")]
    MalformedForget(#[source] serde_json::Error),

    #[error("malformed stats output: {0}")]
    MalformedStats(#[source] serde_json::Error),

    #[error("malformed snapshot list: {0}")]
    MalformedSnapshots(#[source] serde_json::Error),
}

/// Terminal message of `restic backup --json`
#[derive(Debug, Deserialize)]
struct BackupSummary {
    #[serde(default)]
    files_new: Option<i64>,
    #[serde(default)]
    files_changed: Option<i64>,
    #[serde(default)]
    files_unmodified: Option<i64>,
    #[serde(default)]
    data_added: u64,
    #[serde(default)]
    total_files_processed: Option<i64>,
    #[serde(default)]
    total_bytes_processed: u64,
    #[serde(default)]
    total_duration: f64,
    snapshot_id: String,
}

#[derive(Debug, Deserialize)]
struct ForgetGroup {
    #[serde(default)]
    keep: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    remove: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct StatsContainer {
    total_size: u64,
}

/// Snapshot as listed by `restic snapshots --json`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub short_id: String,
    pub time: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Find the summary among the JSON lines of a backup run
///
/// Progress and status lines, and lines that are not JSON at all, are skipped.
pub fn extract_backup_info(output: &[u8], path: &str) -> Result<SnapshotStats, ParseError> {
    let text = String::from_utf8_lossy(output);
    let summary = text
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .find(|v| v.get("message_type").and_then(|t| t.as_str()) == Some("summary"))
        .ok_or(ParseError::NoSummary)?;

    let summary: BackupSummary =
        serde_json::from_value(summary).map_err(ParseError::MalformedSummary)?;

    Ok(SnapshotStats {
        name: summary.snapshot_id,
        path: path.to_string(),
        size: format_bytes(summary.total_bytes_processed),
        uploaded: format_bytes(summary.data_added),
        processing_time: format_seconds(summary.total_duration as u64),
        file_stats: FileStats {
            total_files: summary.total_files_processed,
            new_files: summary.files_new,
            modified_files: summary.files_changed,
            unmodified_files: summary.files_unmodified,
        },
    })
}

/// True only when restic printed its "no errors" line
pub fn extract_check_info(output: &[u8]) -> bool {
    String::from_utf8_lossy(output)
        .lines()
        .any(|l| l.trim() == CHECK_SUCCESS_LINE)
}

/// Sum kept and removed snapshots across all forget groups
///
/// Warnings may surround the JSON, so the array is located by its `[{`
/// and `}]` delimiters on a single line. An empty array means nothing matched.
pub fn extract_cleanup_info(output: &[u8]) -> Result<(i64, i64), ParseError> {
    let text = String::from_utf8_lossy(output);
    let mut json_part = None;
    for line in text.lines() {
        if line.trim() == "[]" {
            return Ok((0, 0));
        }
        if let (Some(start), Some(end)) = (line.find("[{"), line.rfind("}]")) {
            if start < end {
                json_part = Some(&line[start..end + 2]);
                break;
            }
        }
    }

    let json_part = json_part.ok_or(ParseError::NoForgetGroups)?;
    let groups: Vec<ForgetGroup> =
        serde_json::from_str(json_part).map_err(ParseError::MalformedForget)?;

    let (kept, removed) = groups.iter().fold((0i64, 0i64), |(k, r), g| {
        (
            k + g.keep.as_ref().map_or(0, |v| v.len() as i64),
            r + g.remove.as_ref().map_or(0, |v| v.len() as i64),
        )
    });
    debug!("Forget groups: {}, kept {}, removed {}", groups.len(), kept, removed);
    Ok((kept, removed))
}

/// Repository size from `restic stats --json`
pub fn extract_stats_info(output: &[u8]) -> Result<String, ParseError> {
    let stats: StatsContainer = serde_json::from_slice(output).map_err(ParseError::MalformedStats)?;
    Ok(format_bytes(stats.total_size))
}

pub fn extract_snapshots(output: &[u8]) -> Result<Vec<Snapshot>, ParseError> {
    let text = String::from_utf8_lossy(output);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).map_err(ParseError::MalformedSnapshots)
}

/// 1024-based size with three decimals, e.g. `1.000 MiB`
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1 << 10;
    const MIB: u64 = 1 << 20;
    const GIB: u64 = 1 << 30;
    const TIB: u64 = 1 << 40;

    let b = bytes as f64;
    if bytes >= TIB {
        format!("{:.3} TiB", b / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.3} GiB", b / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.3} MiB", b / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.3} KiB", b / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// `h:mm:ss`, or `m:ss` under an hour
pub fn format_seconds(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Human duration such as `1h2m3.500s` or `4.250s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs_f64();
    let hours = (total / 3600.0).floor() as u64;
    let minutes = ((total % 3600.0) / 60.0).floor() as u64;
    let secs = total % 60.0;
    match (hours, minutes) {
        (0, 0) => format!("{:.3}s", secs),
        (0, m) => format!("{}m{:.3}s", m, secs),
        (h, m) => format!("{}h{}m{:.3}s", h, m, secs),
    }
}

/// Inverse of [`format_duration`]
pub fn parse_duration(value: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    for c in value.trim().chars() {
        match c {
            '0'..='9' | '.' => number.push(c),
            'h' | 'm' | 's' => {
                let n: f64 = number.parse().ok()?;
                number.clear();
                total += match c {
                    'h' => n * 3600.0,
                    'm' => n * 60.0,
                    _ => n,
                };
            }
            _ => return None,
        }
    }
    number.is_empty().then_some(total)
}

/// Inverse of [`format_bytes`]
pub fn parse_size(value: &str) -> Option<f64> {
    let mut parts = value.split_whitespace();
    let number: f64 = parts.next()?.parse().ok()?;
    let factor = match parts.next().unwrap_or("B") {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(number * factor)
}

/// Inverse of [`format_seconds`]
pub fn parse_clock(value: &str) -> Option<f64> {
    value
        .split(':')
        .try_fold(0.0, |acc, part| part.parse::<f64>().ok().map(|n| acc * 60.0 + n))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    #[serde(rename = "ref")]
    pub target_ref: TargetRef,
    #[serde(default)]
    pub stats: Vec<HostStats>,
}

/// Result of a backup run, as handed to the status updater
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutput {
    pub target_status: TargetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_stats: Option<RepositoryStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutput {
    pub target_status: TargetStatus,
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write output file: {:?}", path))?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    use anyhow::Context;

    let data = fs::read(path).with_context(|| format!("Failed to read output file: {:?}", path))?;
    serde_json::from_slice(&data).with_context(|| format!("Failed to decode output file: {:?}", path))
}

impl BackupOutput {
    pub fn write_output(&self, path: &Path) -> anyhow::Result<()> {
        write_json(self, path)
    }
}

impl RestoreOutput {
    pub fn write_output(&self, path: &Path) -> anyhow::Result<()> {
        write_json(self, path)
    }
}

pub fn read_backup_output(path: &Path) -> anyhow::Result<BackupOutput> {
    read_json(path)
}

pub fn read_restore_output(path: &Path) -> anyhow::Result<RestoreOutput> {
    read_json(path)
}
