use rustyline::{Editor, Helper, Config, error::ReadlineError, Context};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use std::future::Future;
use std::path::Path;

const COMMANDS: [&str; 6] = ["status", "spawn ", "kill", "invalidate", "help", "exit"];

/*
    @@@
    @CmdCompleter;
    . Plugs into rustyline to provide simple tab-completion based on a fixed list of command names.
*/
struct CmdCompleter {
    commands: Vec<String>,
}
impl Helper for CmdCompleter {}
impl Hinter for CmdCompleter {
    type Hint = String;
}
impl Highlighter for CmdCompleter {}
impl Validator for CmdCompleter {}
impl Completer for CmdCompleter {
    type Candidate = Pair;
    fn complete(&self, line: &str, _pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>), ReadlineError> {
        let matches = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(line))
            .map(|cmd| Pair { display: cmd.clone(), replacement: cmd.clone() })
            .collect();
        Ok((0, matches))
    }
}

/// One parsed shell line.
#[derive(Debug, PartialEq, Eq)]
pub enum ShellCommand<'a> {
    Status,
    Spawn(&'a str),
    Kill,
    Invalidate,
    Help,
    Exit,
    Empty,
    Unknown(&'a str),
}

pub fn parse_command(line: &str) -> ShellCommand<'_> {
    let input = line.trim();
    match input {
        "" => ShellCommand::Empty,
        "status" => ShellCommand::Status,
        "kill" => ShellCommand::Kill,
        "invalidate" => ShellCommand::Invalidate,
        "help" => ShellCommand::Help,
        "spawn" => ShellCommand::Spawn(""),
        "exit" | "quit" => ShellCommand::Exit,
        cmd if cmd.starts_with("spawn ") => ShellCommand::Spawn(cmd["spawn ".len()..].trim()),
        other => ShellCommand::Unknown(other),
    }
}

/*
    @@@
    @run_shell();
    . Reads commands with history and tab-completion until `exit`, Ctrl-C or Ctrl-D.
    . Dispatches to the closures --status, spawn, kill, invalidate-- and awaits the future each returns.
    . Readline blocks, so it runs under `block_in_place`; needs the multi-thread runtime.
*/
pub async fn run_shell<SFut, SpFut, KFut, IFut, OnStatus, OnSpawn, OnKill, OnInvalidate>(
    history: &Path,
    mut on_status: OnStatus,
    mut on_spawn: OnSpawn,
    mut on_kill: OnKill,
    mut on_invalidate: OnInvalidate,
) -> rustyline::Result<()>
where
    OnStatus: FnMut() -> SFut,
    SFut: Future<Output = ()>,
    OnSpawn: FnMut(&str) -> SpFut,
    SpFut: Future<Output = ()>,
    OnKill: FnMut() -> KFut,
    KFut: Future<Output = ()>,
    OnInvalidate: FnMut() -> IFut,
    IFut: Future<Output = ()>,
{
    let config = Config::builder().build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(CmdCompleter {
        commands: COMMANDS.iter().map(|c| c.to_string()).collect(),
    }));
    let _ = rl.load_history(history);

    loop {
        let line = tokio::task::block_in_place(|| rl.readline("procvisor> "));
        match line {
            Ok(line) => {
                rl.add_history_entry(line.trim())?;
                match parse_command(&line) {
                    ShellCommand::Status => on_status().await,
                    ShellCommand::Spawn("") => println!("usage: spawn <command line>"),
                    ShellCommand::Spawn(cmdline) => on_spawn(cmdline).await,
                    ShellCommand::Kill => on_kill().await,
                    ShellCommand::Invalidate => on_invalidate().await,
                    ShellCommand::Help => println!("commands: status | spawn <command line> | kill | invalidate | exit"),
                    ShellCommand::Exit => break,
                    ShellCommand::Empty => {}
                    ShellCommand::Unknown(other) => println!("Unknown command: {}", other),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            },
        }
    }

    rl.save_history(history)?;
    Ok(())
}
