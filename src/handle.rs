use crate::future::KillRequest;
use crate::request::{SpawnRequest, StdinPolicy};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::future::Future;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// OS process id of a supervised child; the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u32);

impl ProcessId {
    pub fn as_raw(&self) -> u32 {
        self.0
    }

    fn pid(&self) -> Pid {
        Pid::from_raw(self.0 as i32)
    }
}

impl From<u32> for ProcessId {
    fn from(raw: u32) -> Self {
        ProcessId(raw)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One running child: its pid, its two output pipes and its exit.
#[derive(Debug)]
pub struct ProcessHandle {
    id: ProcessId,
    child: Child,
}

impl ProcessHandle {
    /*
        @@@
        @launch();
        . Builds the command from the request: args, working dir, environment and stdin policy.
        . Pipes stdout/stderr so the relay can forward them, and puts the child in its own process group.
        . Returns the OS error untouched when the program cannot be started.
    */
    pub fn launch(request: &SpawnRequest) -> io::Result<Self> {
        if request.program.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty program"));
        }

        let mut command = Command::new(&request.program);
        command.args(&request.args);

        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }
        if request.clear_env {
            command.env_clear();
        }
        command.envs(&request.env);

        command.stdin(match request.stdin {
            StdinPolicy::Ignore => Stdio::null(),
            StdinPolicy::Inherit => Stdio::inherit(),
        });
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        // pgid == pid, so killpg reaches anything the child forks
        command.process_group(0);
        command.kill_on_drop(true);

        let child = command.spawn()?;
        let raw = child.id().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "spawned child did not have a pid")
        })?;
        let id = ProcessId(raw);
        debug!(pid = raw, program = %request.program, "launched child");

        Ok(ProcessHandle { id, child })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Signals the process group.
    ///
    /// The pgid stays reserved while any member is alive, even after the
    /// leader is reaped; an empty group is a silent no-op.
    pub fn signal(&mut self, signal: Signal) -> nix::Result<()> {
        match killpg(self.id.pid(), signal) {
            Err(Errno::ESRCH) => Ok(()),
            other => other,
        }
    }

    /*
        @@@
        @wait_for_exit();
        . Waits for the child to exit while serving kill requests that arrive in the meantime.
        . Signals go out from the driver only, to the group of a child it still owns.
        . Returns the exit code, or 128 + signal number when the child was killed by a signal.
    */
    pub(crate) async fn wait_for_exit(
        &mut self,
        requests: &mut UnboundedReceiver<KillRequest>,
    ) -> io::Result<i32> {
        loop {
            tokio::select! {
                status = self.child.wait() => return status.map(exit_code),
                request = requests.recv() => match request {
                    Some(request) => self.deliver(request),
                    None => return self.child.wait().await.map(exit_code),
                },
            }
        }
    }

    /// Runs `work` to completion while still delivering kill requests.
    pub(crate) async fn serve_while<F: Future>(
        &mut self,
        requests: &mut UnboundedReceiver<KillRequest>,
        work: F,
    ) -> F::Output {
        tokio::pin!(work);
        let mut open = true;
        loop {
            tokio::select! {
                out = &mut work => return out,
                request = requests.recv(), if open => match request {
                    Some(request) => self.deliver(request),
                    None => open = false,
                },
            }
        }
    }

    fn deliver(&mut self, request: KillRequest) {
        let pid = self.id.as_raw();
        match self.signal(request.signal) {
            Ok(()) => info!(pid, signal = ?request.signal, "sent signal"),
            Err(e) => warn!(pid, signal = ?request.signal, error = %e, "failed to send signal"),
        }
        if let Some(ack) = request.ack {
            let _ = ack.send(());
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}
