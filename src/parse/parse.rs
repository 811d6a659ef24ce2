use crate::request::{split_command_line, SpawnRequest, StdinPolicy};
use crate::sink::Output;
use anyhow::Context;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn default_log_dir() -> String { "logs".to_string() }
fn default_log_level() -> String { "info".to_string() }

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProgramConfig {
    pub cmd: String,
    #[serde(default)]
    pub args: Option<OneOrMany<String>>,
    pub workingdir: Option<String>,
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub stdin: StdinPolicy,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    #[serde(default)]
    pub ignore_exit_code: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub invalidate_on_error: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub programs: BTreeMap<String, ProgramConfig>,
}

/*
    @@@
    @parser();
    . Reads the content of the config file into a String. Any I/O error (file not found, permission denied, etc.) is returned as an Err.
    . Hands the raw YAML text to serde_yaml, which parses and maps it into the config struct. If the YAML is malformed, an error is returned.
*/
pub fn parser(path: &str) -> anyhow::Result<Config> {
    let yaml_file = fs::read_to_string(path)
        .with_context(|| format!("failed to read config `{}`", path))?;
    parse_str(&yaml_file).with_context(|| format!("invalid config `{}`", path))
}

pub fn parse_str(yaml: &str) -> anyhow::Result<Config> {
    let parsed_config: Config = serde_yaml::from_str(yaml)?;
    Ok(parsed_config)
}

impl ProgramConfig {
    /*
        @@@
        @to_request();
        . Without `args`, `cmd` is taken as a whole command line and split on whitespace.
        . A single-string `args` is split the same way; a list is used as is.
        . Opens the stdout/stderr files in append mode, so a bad path fails here rather than at spawn.
    */
    pub fn to_request(&self, name: &str) -> io::Result<SpawnRequest> {
        let mut request = match &self.args {
            None => SpawnRequest::from_command_line(&self.cmd),
            Some(OneOrMany::One(line)) => SpawnRequest::new(self.cmd.trim()).args(split_command_line(line)),
            Some(OneOrMany::Many(list)) => SpawnRequest::new(self.cmd.trim()).args(list.iter().cloned()),
        };

        if let Some(dir) = &self.workingdir {
            request = request.current_dir(dir);
        }
        if let Some(envs) = &self.env {
            for (k, v) in envs {
                request = request.env(k, v);
            }
        }
        if let Some(path) = &self.stdout {
            request = request.stdout(Output::append_file(path)?);
        }
        if let Some(path) = &self.stderr {
            request = request.stderr(Output::append_file(path)?);
        }

        Ok(request
            .stdin(self.stdin)
            .ignore_exit_code(self.ignore_exit_code)
            .display_name(name))
    }
}
