//! Prometheus metrics for finished backup and restore attempts
//!
//! Every emission builds a fresh registry, renders it in the text format and
//! sends it to whichever sinks are configured: a `<job>.prom` file for a
//! node-exporter textfile collector and/or a Pushgateway.

use crate::api::{HostPhase, HostStats, RepositoryStats, SessionPhase, SessionStatus};
use crate::config::{expand_tilde, MetricsConfig};
use crate::utils::output::{parse_clock, parse_duration, parse_size};
use anyhow::{Context, Result};
use chrono::Utc;
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct MetricsOptions {
    pub enabled: bool,
    pub pushgateway_url: Option<String>,
    pub metric_file_dir: Option<PathBuf>,
    pub job_name: String,
    pub labels: BTreeMap<String, String>,
}

impl MetricsOptions {
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self {
            enabled: config.enabled,
            pushgateway_url: config.pushgateway_url.clone(),
            metric_file_dir: config.metric_file_dir.as_deref().map(expand_tilde),
            job_name: config.job_name.clone(),
            labels: config.labels.clone(),
        }
    }
}

/// Who ran the session and against which repository
#[derive(Debug, Clone, Default)]
pub struct SessionLabels {
    pub invoker_kind: String,
    pub invoker_name: String,
    pub namespace: String,
    pub repository: String,
}

pub struct MetricsEmitter {
    opts: MetricsOptions,
}

/// Registry plus the const labels shared by its gauges
struct GaugeSet {
    registry: Registry,
    labels: HashMap<String, String>,
}

impl GaugeSet {
    fn new(opts: &MetricsOptions, session: &SessionLabels) -> Self {
        let mut labels: HashMap<String, String> = opts
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.insert("driver".to_string(), "restic".to_string());
        labels.insert("invoker_kind".to_string(), session.invoker_kind.clone());
        labels.insert("invoker_name".to_string(), session.invoker_name.clone());
        labels.insert("namespace".to_string(), session.namespace.clone());
        labels.insert("repository".to_string(), session.repository.clone());
        Self {
            registry: Registry::new(),
            labels,
        }
    }

    fn set(&self, name: &str, help: &str, value: f64) -> Result<()> {
        self.set_with(name, help, value, None)
    }

    fn set_for_host(&self, name: &str, help: &str, hostname: &str, value: f64) -> Result<()> {
        self.set_with(name, help, value, Some(hostname))
    }

    fn set_with(&self, name: &str, help: &str, value: f64, hostname: Option<&str>) -> Result<()> {
        let mut labels = self.labels.clone();
        if let Some(host) = hostname {
            labels.insert("hostname".to_string(), host.to_string());
        }
        let gauge = Gauge::with_opts(Opts::new(name, help).const_labels(labels))?;
        gauge.set(value);
        self.registry.register(Box::new(gauge))?;
        Ok(())
    }

    fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn bool_value(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Seconds the session has been running, from its duration string or start time
fn session_seconds(status: &SessionStatus) -> f64 {
    status
        .session_duration
        .as_deref()
        .and_then(parse_duration)
        .or_else(|| {
            status
                .start_time
                .map(|start| (Utc::now() - start).num_milliseconds() as f64 / 1000.0)
        })
        .unwrap_or_default()
}

fn host_seconds(host: &HostStats) -> f64 {
    host.duration
        .as_deref()
        .and_then(parse_duration)
        .unwrap_or_default()
}

impl MetricsEmitter {
    pub fn new(opts: MetricsOptions) -> Self {
        Self { opts }
    }

    pub fn disabled() -> Self {
        Self::new(MetricsOptions::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.opts.enabled
    }

    /// Text exposition of one backup host result
    pub fn render_backup(
        &self,
        labels: &SessionLabels,
        status: &SessionStatus,
        host: &HostStats,
        repository: Option<&RepositoryStats>,
    ) -> Result<String> {
        let set = GaugeSet::new(&self.opts, labels);
        let succeeded = status.phase == SessionPhase::Succeeded;

        set.set(
            "backup_session_success",
            "Whether the backup session succeeded",
            bool_value(succeeded),
        )?;
        set.set(
            "backup_session_duration_seconds",
            "Time taken by the backup session so far",
            session_seconds(status),
        )?;
        set.set(
            "backup_session_target_count_total",
            "Number of targets in the backup session",
            1.0,
        )?;
        if succeeded {
            set.set(
                "backup_session_last_success_time_seconds",
                "Unix time of the last successful backup session",
                Utc::now().timestamp() as f64,
            )?;
        }

        let h = &host.hostname;
        set.set_for_host(
            "backup_host_backup_success",
            "Whether the host backup succeeded",
            h,
            bool_value(host.phase == HostPhase::Succeeded),
        )?;
        set.set_for_host(
            "backup_host_backup_duration_seconds",
            "Time taken to back up the host",
            h,
            host_seconds(host),
        )?;

        let mut size = 0.0;
        let mut uploaded = 0.0;
        let mut processing = 0.0;
        let mut files = [0i64; 4];
        for snap in &host.snapshots {
            size += parse_size(&snap.size).unwrap_or_default();
            uploaded += parse_size(&snap.uploaded).unwrap_or_default();
            processing += parse_clock(&snap.processing_time).unwrap_or_default();
            let fs = &snap.file_stats;
            for (total, count) in files.iter_mut().zip([
                fs.total_files,
                fs.new_files,
                fs.modified_files,
                fs.unmodified_files,
            ]) {
                *total += count.unwrap_or_default();
            }
        }

        set.set_for_host("backup_host_data_size_bytes", "Size of the backed-up data", h, size)?;
        set.set_for_host(
            "backup_host_data_uploaded_bytes",
            "Data uploaded to the repository",
            h,
            uploaded,
        )?;
        set.set_for_host(
            "backup_host_data_processing_time_seconds",
            "Time restic spent processing the data",
            h,
            processing,
        )?;
        for (name, help, value) in [
            ("backup_host_files_total", "Files processed", files[0]),
            ("backup_host_files_new", "New files", files[1]),
            ("backup_host_files_modified", "Modified files", files[2]),
            ("backup_host_files_unmodified", "Unmodified files", files[3]),
        ] {
            set.set_for_host(name, help, h, value as f64)?;
        }

        if let Some(repo) = repository {
            if let Some(integrity) = repo.integrity {
                set.set(
                    "backup_repository_integrity",
                    "Result of the last repository check",
                    bool_value(integrity),
                )?;
            }
            set.set(
                "backup_repository_size_bytes",
                "Total repository size",
                parse_size(&repo.size).unwrap_or_default(),
            )?;
            set.set(
                "backup_repository_snapshot_count",
                "Snapshots in the repository",
                repo.snapshot_count as f64,
            )?;
            set.set(
                "backup_repository_snapshots_removed_last_cleanup",
                "Snapshots removed by the last retention run",
                repo.snapshots_removed_on_last_cleanup as f64,
            )?;
        }

        set.render()
    }

    /// Text exposition of one restore host result
    pub fn render_restore(
        &self,
        labels: &SessionLabels,
        status: &SessionStatus,
        host: &HostStats,
    ) -> Result<String> {
        let set = GaugeSet::new(&self.opts, labels);
        set.set(
            "restore_session_success",
            "Whether the restore session succeeded",
            bool_value(status.phase == SessionPhase::Succeeded),
        )?;
        set.set(
            "restore_session_duration_seconds",
            "Time taken by the restore session so far",
            session_seconds(status),
        )?;
        set.set_for_host(
            "restore_host_restore_success",
            "Whether the host restore succeeded",
            &host.hostname,
            bool_value(host.phase == HostPhase::Succeeded),
        )?;
        set.set_for_host(
            "restore_host_restore_duration_seconds",
            "Time taken to restore the host",
            &host.hostname,
            host_seconds(host),
        )?;
        set.render()
    }

    pub fn emit_backup(
        &self,
        labels: &SessionLabels,
        status: &SessionStatus,
        host: &HostStats,
        repository: Option<&RepositoryStats>,
    ) {
        if !self.is_enabled() {
            return;
        }
        match self.render_backup(labels, status, host, repository) {
            Ok(text) => self.publish(&text),
            Err(e) => warn!("Failed to build backup metrics: {:#}", e),
        }
    }

    pub fn emit_restore(&self, labels: &SessionLabels, status: &SessionStatus, host: &HostStats) {
        if !self.is_enabled() {
            return;
        }
        match self.render_restore(labels, status, host) {
            Ok(text) => self.publish(&text),
            Err(e) => warn!("Failed to build restore metrics: {:#}", e),
        }
    }

    /// Send to every configured sink; failures are logged only
    fn publish(&self, text: &str) {
        if let Some(ref dir) = self.opts.metric_file_dir {
            if let Err(e) = self.write_file(dir, text) {
                warn!("Failed to write metrics file: {:#}", e);
            }
        }
        if let Some(ref url) = self.opts.pushgateway_url {
            if let Err(e) = self.push(url, text) {
                warn!("Failed to push metrics to {}: {:#}", url, e);
            }
        }
    }

    fn write_file(&self, dir: &std::path::Path, text: &str) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create metrics directory: {:?}", dir))?;
        let path = dir.join(format!("{}.prom", self.opts.job_name));
        // Collectors may read at any time, so swap the file in whole
        let tmp = dir.join(format!(".{}.prom.tmp", self.opts.job_name));
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        debug!("Wrote metrics to {:?}", path);
        Ok(())
    }

    /// Blocking push; call from a blocking context
    fn push(&self, url: &str, text: &str) -> Result<()> {
        let endpoint = format!(
            "{}/metrics/job/{}",
            url.trim_end_matches('/'),
            self.opts.job_name
        );
        let client = reqwest::blocking::Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()?;
        let response = client
            .post(&endpoint)
            .header(reqwest::header::CONTENT_TYPE, TextEncoder::new().format_type())
            .body(text.to_string())
            .send()
            .with_context(|| format!("Failed to reach Pushgateway at {}", endpoint))?;
        if !response.status().is_success() {
            anyhow::bail!("Pushgateway returned {}", response.status());
        }
        debug!("Pushed metrics to {}", endpoint);
        Ok(())
    }
}
