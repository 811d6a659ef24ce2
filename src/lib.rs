/* src/lib.rs */

pub mod control;
pub mod error;
pub mod future;
pub mod handle;
pub mod logger;
pub mod parse;
pub mod relay;
pub mod request;
pub mod runtime;
pub mod shell;
pub mod sink;

pub use control::ActiveProcess;
pub use error::ProcessError;
pub use future::{CancelToken, Outcome, ProcessFuture, ProcessResult};
pub use handle::{ProcessHandle, ProcessId};
pub use request::{split_command_line, SpawnRequest, StdinPolicy};
pub use runtime::Supervisor;
pub use sink::{Buffer, Discard, Output, Sink, Writer};

pub use nix::sys::signal::Signal;
