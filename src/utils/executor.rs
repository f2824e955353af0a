//! Command execution abstraction for testability
//!
//! This module provides a trait-based abstraction for command execution,
//! enabling dependency injection and mocking for tests.

use super::command::{self, Command, CommandOutput, ExecError};
use std::path::Path;
use std::time::Duration;

/// Abstraction for command execution, enabling mocking in tests
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion; a non-zero exit is reported in the output
    fn execute(&self, command: &Command) -> Result<CommandOutput, ExecError>;

    /// Run a shell command (used for hooks)
    fn run_shell_command(
        &self,
        script: &str,
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecError> {
        let (shell, flag) = command::shell();
        let mut cmd = Command::new(shell).arg(flag).arg(script).timeout(timeout);
        if let Some(dir) = working_dir {
            cmd = cmd.current_dir(dir);
        }
        self.execute(&cmd)
    }
}

/// Default implementation using real subprocess calls
#[derive(Debug, Clone, Default)]
pub struct RealExecutor;

impl RealExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealExecutor {
    fn execute(&self, command: &Command) -> Result<CommandOutput, ExecError> {
        command::run(command)
    }
}

/// A mock executor for testing that records calls and returns configured responses
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Recorded command invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub program: String,
        pub args: Vec<String>,
        pub env_keys: Vec<String>,
        pub working_dir: Option<String>,
        /// Display line of the command piped into stdin, if any
        pub stdin_from: Option<String>,
    }

    impl CommandCall {
        /// First argument that is not a flag, e.g. `backup` for restic
        pub fn subcommand(&self) -> Option<&str> {
            self.args
                .iter()
                .map(String::as_str)
                .find(|a| !a.starts_with('-'))
        }
    }

    /// Response configuration for mock
    #[derive(Clone, Debug)]
    pub enum MockResponse {
        Success { stdout: String, stderr: String },
        Failure { stderr: String, exit_code: i32 },
        Timeout,
    }

    impl MockResponse {
        pub fn stdout(stdout: &str) -> Self {
            MockResponse::Success {
                stdout: stdout.to_string(),
                stderr: String::new(),
            }
        }

        pub fn failure(stderr: &str) -> Self {
            MockResponse::Failure {
                stderr: stderr.to_string(),
                exit_code: 1,
            }
        }
    }

    impl Default for MockResponse {
        fn default() -> Self {
            MockResponse::Success {
                stdout: String::new(),
                stderr: String::new(),
            }
        }
    }

    /// Mock executor for testing
    #[derive(Clone, Default)]
    pub struct MockExecutor {
        /// Recorded command invocations
        pub calls: Arc<Mutex<Vec<CommandCall>>>,
        /// Pre-configured responses: program or "program subcommand" -> response
        responses: Arc<Mutex<HashMap<String, MockResponse>>>,
        /// Default response when no specific response is configured
        default_response: Arc<Mutex<MockResponse>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Configure a response for a specific program
        pub fn expect(self, program: &str, response: MockResponse) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(program.to_string(), response);
            self
        }

        /// Configure a response for one subcommand of a program
        pub fn expect_subcommand(self, program: &str, subcommand: &str, response: MockResponse) -> Self {
            self.expect(&format!("{} {}", program, subcommand), response)
        }

        /// Set the default response for unconfigured programs
        pub fn with_default_response(self, response: MockResponse) -> Self {
            *self.default_response.lock().unwrap() = response;
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<CommandCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Check if a program was called
        pub fn was_called(&self, program: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| c.program == program)
        }

        /// Get number of calls to a specific program
        pub fn call_count(&self, program: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.program == program)
                .count()
        }

        /// Calls whose subcommand matches, in order
        pub fn calls_for(&self, subcommand: &str) -> Vec<CommandCall> {
            self.get_calls()
                .into_iter()
                .filter(|c| c.subcommand() == Some(subcommand))
                .collect()
        }

        fn record_call(&self, command: &Command) -> CommandCall {
            let call = CommandCall {
                program: command.program.clone(),
                args: command.args.clone(),
                env_keys: command.envs.keys().cloned().collect(),
                working_dir: command.working_dir.as_ref().map(|p| p.display().to_string()),
                stdin_from: command.stdin_from.as_ref().map(|c| c.display()),
            };
            self.calls.lock().unwrap().push(call.clone());
            call
        }

        fn get_response(&self, call: &CommandCall) -> MockResponse {
            let responses = self.responses.lock().unwrap();
            call.subcommand()
                .and_then(|sub| responses.get(&format!("{} {}", call.program, sub)))
                .or_else(|| responses.get(&call.program))
                .cloned()
                .unwrap_or_else(|| self.default_response.lock().unwrap().clone())
        }
    }

    impl CommandExecutor for MockExecutor {
        fn execute(&self, command: &Command) -> Result<CommandOutput, ExecError> {
            let call = self.record_call(command);
            match self.get_response(&call) {
                MockResponse::Success { stdout, stderr } => Ok(CommandOutput {
                    exit_code: Some(0),
                    stdout: stdout.into_bytes(),
                    stderr: stderr.into_bytes(),
                }),
                MockResponse::Failure { stderr, exit_code } => Ok(CommandOutput {
                    exit_code: Some(exit_code),
                    stdout: Vec::new(),
                    stderr: stderr.into_bytes(),
                }),
                MockResponse::Timeout => Err(ExecError::Timeout {
                    program: command.program.clone(),
                    timeout: command.timeout.unwrap_or_default(),
                }),
            }
        }
    }
}
