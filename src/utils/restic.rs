//! Restic subprocess utilities
//!
//! Each primitive builds one [`Command`], runs it through a
//! [`CommandExecutor`] and turns the result into typed values. Credentials
//! reach restic only through the environment of the [`BackendConfig`].

use super::backend::BackendConfig;
use super::command::{self, Command, CommandOutput, ExecError};
use super::executor::CommandExecutor;
use super::output::{self, ParseError, Snapshot};
use super::retention;
use crate::api::{RetentionPolicy, SnapshotStats};
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_RESTIC_BINARY: &str = "restic";

/// Restore destination when none is configured
pub const DEFAULT_DESTINATION: &str = "/";

#[derive(Debug, thiserror::Error)]
pub enum ResticError {
    /// Non-zero exit; `message` is the most useful line of output
    #[error("{message}")]
    CommandFailed {
        message: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("restic timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl From<ExecError> for ResticError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Spawn { program, source } => ResticError::Spawn { program, source },
            ExecError::Timeout { timeout, .. } => ResticError::Timeout(timeout),
            upstream @ ExecError::Upstream { exit_code, .. } => ResticError::CommandFailed {
                message: format!("stdin source failed: {}", upstream),
                exit_code,
                stdout: String::new(),
                stderr: String::new(),
            },
        }
    }
}

impl ResticError {
    fn from_output(output: &CommandOutput) -> Self {
        let message = output.last_line().unwrap_or_else(|| match output.exit_code {
            Some(code) => format!("restic exited with code {}", code),
            None => "restic was terminated by a signal".to_string(),
        });
        ResticError::CommandFailed {
            message,
            exit_code: output.exit_code,
            stdout: output.stdout_str(),
            stderr: output.stderr_str(),
        }
    }
}

/// What a backup reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupSource {
    Paths(Vec<String>),
    /// Output of a shell command stored as one file
    Stdin { command: String, file_name: String },
}

impl Default for BackupSource {
    fn default() -> Self {
        BackupSource::Paths(Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupOptions {
    pub host: String,
    pub source: BackupSource,
    pub exclude: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Host whose snapshots are restored
    pub source_host: String,
    pub destination: Option<String>,
    pub snapshots: Vec<String>,
    pub paths: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// A restic invocation context bound to one backend
pub struct Restic<'a> {
    executor: &'a dyn CommandExecutor,
    binary: &'a str,
    backend: &'a BackendConfig,
    timeout: Option<Duration>,
}

impl<'a> Restic<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        binary: &'a str,
        backend: &'a BackendConfig,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            executor,
            binary,
            backend,
            timeout,
        }
    }

    /// Base command with backend flags, environment and redaction applied
    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = Command::new(self.binary).args(args);

        match self.backend.cache_dir {
            Some(ref dir) => cmd = cmd.arg("--cache-dir").arg(dir.display().to_string()),
            None => cmd = cmd.arg("--no-cache"),
        }
        if let Some(ref ca) = self.backend.ca_cert_file {
            cmd = cmd.arg("--cacert").arg(ca.display().to_string());
        }
        if let Some(ref option) = self.backend.max_connections_option {
            cmd = cmd.arg("--option").arg(option.clone());
        }

        cmd.envs(&self.backend.env)
            .timeout(self.timeout)
            .redact_all(self.backend.secret_values())
    }

    /// Apply nice/ionice if requested and available
    fn niced(&self, mut cmd: Command) -> Command {
        if let Some((class, data)) = self.backend.ionice {
            match which::which("ionice") {
                Ok(path) => {
                    cmd = cmd.wrap(
                        &path,
                        &["-c".into(), class.to_string(), "-n".into(), data.to_string()],
                    )
                }
                Err(_) => debug!("ionice not found, running without io priority"),
            }
        }
        if let Some(adjustment) = self.backend.nice {
            match which::which("nice") {
                Ok(path) => cmd = cmd.wrap(&path, &["-n".into(), adjustment.to_string()]),
                Err(_) => debug!("nice not found, running without cpu priority"),
            }
        }
        cmd
    }

    /// Run and fail on non-zero exit
    fn run(&self, cmd: Command) -> Result<CommandOutput, ResticError> {
        let cmd = self.niced(cmd);
        let output = self.executor.execute(&cmd)?;
        if output.success() {
            Ok(output)
        } else {
            Err(ResticError::from_output(&output))
        }
    }
}

/// Initialize the repository unless it already exists
pub fn ensure_repository(restic: &Restic) -> Result<(), ResticError> {
    let probe = restic.command(["snapshots", "--json", "--no-lock"]);
    match restic.run(probe) {
        Ok(_) => {
            debug!("Repository {} already initialized", restic.backend.provider);
            Ok(())
        }
        Err(ResticError::CommandFailed { .. }) => {
            info!("Initializing {} repository", restic.backend.provider);
            restic.run(restic.command(["init"]))?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Back up each path, or the stdin stream, and collect per-snapshot stats
pub fn backup(restic: &Restic, opts: &BackupOptions) -> Result<Vec<SnapshotStats>, ResticError> {
    let base = || {
        let mut args = vec![
            "backup".to_string(),
            "--quiet".to_string(),
            "--json".to_string(),
            "--host".to_string(),
            opts.host.clone(),
        ];
        for tag in &opts.tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }
        args
    };

    let mut stats = Vec::new();
    match opts.source {
        BackupSource::Paths(ref paths) => {
            if paths.is_empty() {
                warn!("No paths to backup");
            }
            for path in paths {
                info!("Backing up {}", path);
                let mut args = base();
                args.push(path.clone());
                for exclude in &opts.exclude {
                    args.push("--exclude".to_string());
                    args.push(exclude.clone());
                }
                let output = restic.run(restic.command(args))?;
                stats.push(output::extract_backup_info(&output.stdout, path)?);
            }
        }
        BackupSource::Stdin {
            ref command,
            ref file_name,
        } => {
            info!("Backing up stdin stream as {}", file_name);
            let (shell, flag) = command::shell();
            let mut args = base();
            args.push("--stdin".to_string());
            args.push("--stdin-filename".to_string());
            args.push(file_name.clone());

            let source = Command::new(shell)
                .arg(flag)
                .arg(command.clone())
                .envs(&restic.backend.env)
                .redact_all(restic.backend.secret_values());
            let output = restic.run(restic.command(args).stdin_from(source))?;
            stats.push(output::extract_backup_info(&output.stdout, file_name)?);
        }
    }

    Ok(stats)
}

/// Restore explicit snapshots, or the latest one of the source host
pub fn restore(restic: &Restic, opts: &RestoreOptions) -> Result<(), ResticError> {
    let destination = opts
        .destination
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_DESTINATION.to_string());

    if !opts.snapshots.is_empty() {
        for snapshot in &opts.snapshots {
            info!("Restoring snapshot {} to {}", snapshot, destination);
            let args = vec![
                "restore".to_string(),
                snapshot.clone(),
                "--target".to_string(),
                destination.clone(),
            ];
            restic.run(restic.command(args))?;
        }
        return Ok(());
    }

    // Backups take one snapshot per path and `--path` only matches snapshots
    // holding every given path, so each path is restored on its own.
    let paths: Vec<Option<&String>> = if opts.paths.is_empty() {
        vec![None]
    } else {
        opts.paths.iter().map(Some).collect()
    };

    for path in paths {
        info!(
            "Restoring latest snapshot of host {} ({}) to {}",
            opts.source_host,
            path.map(String::as_str).unwrap_or("all paths"),
            destination
        );
        let mut args = vec![
            "restore".to_string(),
            "latest".to_string(),
            "--host".to_string(),
            opts.source_host.clone(),
            "--target".to_string(),
            destination.clone(),
        ];
        if let Some(path) = path {
            args.push("--path".to_string());
            args.push(path.clone());
        }
        for (flag, values) in [("--include", &opts.include), ("--exclude", &opts.exclude)] {
            for value in values {
                args.push(flag.to_string());
                args.push(value.clone());
            }
        }
        restic.run(restic.command(args))?;
    }
    Ok(())
}

/// Verify repository integrity
///
/// A failing check is an answer, not an error: it is logged and reported
/// as `false`.
pub fn check(restic: &Restic) -> Result<bool, ResticError> {
    match restic.run(restic.command(["check"])) {
        Ok(output) => Ok(output::extract_check_info(&output.stdout)),
        Err(ResticError::CommandFailed { message, .. }) => {
            warn!("Repository check failed: {}", message);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Apply the retention policy to `host`'s snapshots; `None` when the policy
/// constrains nothing
pub fn cleanup(
    restic: &Restic,
    policy: &RetentionPolicy,
    host: &str,
) -> Result<Option<(i64, i64)>, ResticError> {
    let Some(policy_args) = retention::build_forget_args(policy) else {
        debug!("Retention policy '{}' is empty, skipping forget", policy.name);
        return Ok(None);
    };

    let mut args = vec![
        "forget".to_string(),
        "--quiet".to_string(),
        "--json".to_string(),
        "--host".to_string(),
        host.to_string(),
    ];
    args.extend(policy_args);
    let output = restic.run(restic.command(args))?;
    let (kept, removed) = output::extract_cleanup_info(&output.stdout)?;
    info!("Retention kept {} and removed {} snapshots", kept, removed);
    Ok(Some((kept, removed)))
}

/// Human-readable total repository size
pub fn stats(restic: &Restic) -> Result<String, ResticError> {
    let output = restic.run(restic.command(["stats", "--quiet", "--json"]))?;
    Ok(output::extract_stats_info(&output.stdout)?)
}

/// List snapshots, all of them when `ids` is empty
pub fn list_snapshots(restic: &Restic, ids: &[String]) -> Result<Vec<Snapshot>, ResticError> {
    let mut args = vec![
        "snapshots".to_string(),
        "--json".to_string(),
        "--quiet".to_string(),
        "--no-lock".to_string(),
    ];
    args.extend(ids.iter().cloned());
    let output = restic.run(restic.command(args))?;
    Ok(output::extract_snapshots(&output.stdout)?)
}

/// Forget and prune the given snapshots
pub fn delete_snapshots(restic: &Restic, ids: &[String]) -> Result<(), ResticError> {
    if ids.is_empty() {
        return Ok(());
    }
    let mut args = vec!["forget".to_string(), "--quiet".to_string(), "--prune".to_string()];
    args.extend(ids.iter().cloned());
    restic.run(restic.command(args))?;
    info!("Deleted {} snapshots", ids.len());
    Ok(())
}

/// Remove stale locks left by an interrupted run
pub fn unlock(restic: &Restic) -> Result<(), ResticError> {
    restic.run(restic.command(["unlock", "--remove-all"]))?;
    Ok(())
}
