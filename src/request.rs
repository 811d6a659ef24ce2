use crate::sink::Output;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// What the child gets on stdin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdinPolicy {
    #[default]
    Ignore,
    Inherit,
}

/// Everything `Supervisor::spawn` needs to start one process.
///
/// Defaults: stdin ignored, stdout/stderr relayed to this process's own
/// streams, inherited environment, exit code checked.
#[derive(Debug, Default)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub clear_env: bool,
    pub stdin: StdinPolicy,
    pub stdout: Output,
    pub stderr: Output,
    pub ignore_exit_code: bool,
    pub display_name: Option<String>,
}

impl SpawnRequest {
    pub fn new(program: impl Into<String>) -> Self {
        SpawnRequest {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Whitespace split only: no quoting, no escapes.
    pub fn from_command_line(line: &str) -> Self {
        let mut words = split_command_line(line).into_iter();
        let program = words.next().unwrap_or_default();
        SpawnRequest::new(program).args(words)
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Start from an empty environment instead of inheriting ours.
    pub fn env_clear(mut self) -> Self {
        self.clear_env = true;
        self
    }

    pub fn stdin(mut self, policy: StdinPolicy) -> Self {
        self.stdin = policy;
        self
    }

    pub fn stdout(mut self, output: Output) -> Self {
        self.stdout = output;
        self
    }

    pub fn stderr(mut self, output: Output) -> Self {
        self.stderr = output;
        self
    }

    pub fn ignore_exit_code(mut self, ignore: bool) -> Self {
        self.ignore_exit_code = ignore;
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// The explicit name, or the program followed by its arguments.
    pub fn resolved_name(&self) -> String {
        match &self.display_name {
            Some(name) => name.clone(),
            None if self.args.is_empty() => self.program.clone(),
            None => format!("{} {}", self.program, self.args.join(" ")),
        }
    }
}

impl From<&str> for SpawnRequest {
    fn from(line: &str) -> Self {
        SpawnRequest::from_command_line(line)
    }
}

impl From<String> for SpawnRequest {
    fn from(line: String) -> Self {
        SpawnRequest::from_command_line(&line)
    }
}

pub fn split_command_line(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
