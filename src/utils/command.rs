//! Subprocess invocation with captured output, timeouts and argument redaction

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::time::Duration;
use tracing::debug;

/// Placeholder shown instead of a redacted value
const REDACTED: &str = "***";

/// A program invocation
///
/// Everything that reaches a log goes through [`Command::display`], which
/// replaces registered secrets with `***`.
#[derive(Clone, Default)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub envs: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Command whose stdout is piped into this command's stdin
    pub stdin_from: Option<Box<Command>>,
    sensitive: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.envs
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stdin_from(mut self, source: Command) -> Self {
        self.stdin_from = Some(Box::new(source));
        self
    }

    /// Never show `value` when this command is displayed
    pub fn redact(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.sensitive.push(value);
        }
        self
    }

    pub fn redact_all<'a>(mut self, values: impl IntoIterator<Item = &'a String>) -> Self {
        for value in values {
            self = self.redact(value.clone());
        }
        self
    }

    /// Put `wrapper wrapper_args...` in front of the current program
    pub fn wrap(mut self, wrapper: &Path, wrapper_args: &[String]) -> Self {
        let mut args = wrapper_args.to_vec();
        args.push(std::mem::take(&mut self.program));
        args.append(&mut self.args);
        self.program = wrapper.display().to_string();
        self.args = args;
        self
    }

    /// Command line with secrets masked; environment values are never shown
    pub fn display(&self) -> String {
        let mut line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| self.mask(part))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(ref source) = self.stdin_from {
            line = format!("{} | {}", source.display(), line);
        }
        line
    }

    fn mask(&self, part: &str) -> String {
        self.sensitive
            .iter()
            .fold(part.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }

    fn to_std(&self) -> StdCommand {
        let mut cmd = StdCommand::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(&self.envs);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("line", &self.display())
            .field("env_keys", &self.envs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Last non-empty line of stderr, then stdout
    pub fn last_line(&self) -> Option<String> {
        last_non_empty_line(&self.stderr).or_else(|| last_non_empty_line(&self.stdout))
    }
}

fn last_non_empty_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// The command feeding stdin failed, so the consumer saw a partial stream
    #[error("{program} exited with {}", describe_exit(.exit_code))]
    Upstream { program: String, exit_code: Option<i32> },
}

fn describe_exit(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// Run a command to completion, capturing stdout and stderr
///
/// Non-zero exits are returned as output, not as errors; callers decide what
/// a failure means. With a timeout the child is killed once it expires.
pub fn run(command: &Command) -> Result<CommandOutput, ExecError> {
    debug!("Running command: {}", command.display());

    let spawn_err = |source: io::Error| ExecError::Spawn {
        program: command.program.clone(),
        source,
    };

    let mut cmd = command.to_std();
    let mut upstream = None;
    if let Some(ref source) = command.stdin_from {
        let mut child = source.to_std().stderr(Stdio::inherit()).spawn().map_err(|source_err| {
            ExecError::Spawn {
                program: source.program.clone(),
                source: source_err,
            }
        })?;
        if let Some(stdout) = child.stdout.take() {
            cmd.stdin(Stdio::from(stdout));
        }
        upstream = Some(child);
    }

    let result = match command.timeout {
        Some(timeout) => output_with_timeout(cmd, timeout).map_err(|e| match e {
            TimedOutput::Io(source) => spawn_err(source),
            TimedOutput::Elapsed => ExecError::Timeout {
                program: command.program.clone(),
                timeout,
            },
        }),
        None => cmd.output().map_err(spawn_err),
    };

    let upstream_status = match upstream {
        Some(mut child) => {
            if result.is_err() {
                let _ = child.kill();
            }
            Some(child.wait())
        }
        None => None,
    };

    let output = result?;

    let captured = CommandOutput {
        exit_code: output.status.code(),
        stdout: output.stdout,
        stderr: output.stderr,
    };

    // A consumer failure explains a broken pipe upstream, so it wins
    if let (true, Some(status), Some(source)) =
        (captured.success(), upstream_status, command.stdin_from.as_deref())
    {
        let status = status.map_err(|source_err| ExecError::Spawn {
            program: source.program.clone(),
            source: source_err,
        })?;
        if !status.success() {
            debug!("Stdin source failed with {:?}: {}", status.code(), source.display());
            return Err(ExecError::Upstream {
                program: source.display(),
                exit_code: status.code(),
            });
        }
    }

    if !captured.success() {
        debug!(
            "Command exited with {:?}: {}\nstdout:\n{}\nstderr:\n{}",
            captured.exit_code,
            command.display(),
            captured.stdout_str(),
            captured.stderr_str()
        );
    }

    Ok(captured)
}

enum TimedOutput {
    Io(io::Error),
    Elapsed,
}

/// Wait for the process on tokio so the deadline can kill it
fn output_with_timeout(cmd: StdCommand, timeout: Duration) -> Result<std::process::Output, TimedOutput> {
    let fut = async move {
        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(output) => output.map_err(TimedOutput::Io),
            Err(_) => Err(TimedOutput::Elapsed),
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.block_on(fut),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TimedOutput::Io)?
            .block_on(fut),
    }
}

/// Shell and flag used to run hook commands
pub fn shell() -> (&'static str, &'static str) {
    #[cfg(unix)]
    let shell = ("sh", "-c");

    #[cfg(windows)]
    let shell = ("cmd", "/C");

    shell
}
