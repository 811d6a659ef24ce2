use crate::error::ProcessError;
use crate::future::{CancelToken, KillRequest, Outcome, ProcessFuture, ProcessResult};
use crate::handle::{ProcessHandle, ProcessId};
use crate::relay::{relay_stderr, relay_stdout};
use crate::request::SpawnRequest;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Registry entry for one in-flight process.
#[derive(Debug)]
pub(crate) struct ProcessRecord {
    pub display_name: String,
    pub started_at: DateTime<Local>,
    pub token: CancelToken,
}

// Shared runtime data, one per supervisor
#[derive(Debug, Default)]
pub(crate) struct SupervisorState {
    pub invalid: bool,
    pub registry: HashMap<ProcessId, ProcessRecord>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub invalidate_on_error: bool,
    pub state: Mutex<SupervisorState>,
}

/// Starts external processes and keeps track of the ones still running.
///
/// Cheap to clone; clones share one registry. Each supervisor owns its own
/// registry, so independent supervisors never see each other's processes.
#[derive(Debug, Clone)]
pub struct Supervisor {
    pub(crate) inner: Arc<Inner>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Supervisor::new()
    }
}

/// Removes the record when the driver finishes, whichever way it finishes.
struct Registration {
    supervisor: Supervisor,
    id: ProcessId,
    token: CancelToken,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.supervisor.deregister(self.id, &self.token);
    }
}

struct Driver {
    handle: ProcessHandle,
    requests: UnboundedReceiver<KillRequest>,
    registration: Registration,
    display_name: String,
    ignore_exit_code: bool,
    stdout_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
    result: oneshot::Sender<ProcessResult>,
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor::with_invalidate_on_error(false)
    }

    /// With `true`, the first launch or exit failure invalidates the supervisor
    /// and kills every other registered process.
    pub fn with_invalidate_on_error(invalidate_on_error: bool) -> Self {
        Supervisor {
            inner: Arc::new(Inner {
                invalidate_on_error,
                state: Mutex::new(SupervisorState::default()),
            }),
        }
    }

    pub fn invalidates_on_error(&self) -> bool {
        self.inner.invalidate_on_error
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /*
        @@@
        @spawn();
        . Rejects right away with `Invalidated` once the supervisor is invalid; the OS is not touched.
        . Launches the child, registers it, then wires stdout/stderr to the request's sinks.
        . Hands the child to a driver task and returns the future that the driver resolves.
        . Must be called from within a tokio runtime.
    */
    pub fn spawn(&self, request: impl Into<SpawnRequest>) -> ProcessFuture {
        let request = request.into();
        let display_name = request.resolved_name();

        if self.is_invalid() {
            warn!(program = %display_name, "supervisor invalidated, refusing to spawn");
            let err = ProcessError::Invalidated { display_name: display_name.clone() };
            return ProcessFuture::failed(display_name, None, err);
        }

        let mut handle = match ProcessHandle::launch(&request) {
            Ok(handle) => handle,
            Err(cause) => {
                error!(program = %display_name, error = %cause, "failed to launch process");
                let err = ProcessError::launch(&display_name, None, cause);
                if self.inner.invalidate_on_error {
                    // flag is set before the caller can observe the failure
                    self.signal_all(true, nix::sys::signal::Signal::SIGKILL);
                }
                return ProcessFuture::failed(display_name, None, err);
            }
        };

        let id = handle.id();
        let (token, requests) = CancelToken::new();
        let invalidated_meanwhile = {
            let mut state = self.lock();
            state.registry.insert(
                id,
                ProcessRecord {
                    display_name: display_name.clone(),
                    started_at: Local::now(),
                    token: token.clone(),
                },
            );
            state.invalid
        };
        info!(pid = id.as_raw(), program = %display_name, "spawned process");

        if invalidated_meanwhile {
            warn!(pid = id.as_raw(), program = %display_name, "invalidated while launching, killing");
            token.cancel();
        }

        let SpawnRequest { stdout, stderr, ignore_exit_code, .. } = request;

        let stdout_task = handle.take_stdout().map(|pipe| {
            let sink = stdout.into_stdout_sink();
            let gate = self.clone();
            let gate_token = token.clone();
            tokio::spawn(relay_stdout(pipe, sink, id, move || gate.is_registered(id, &gate_token)))
        });
        let stderr_task = handle
            .take_stderr()
            .map(|pipe| tokio::spawn(relay_stderr(pipe, stderr.into_stderr_sink(), id)));

        let (result, receiver) = oneshot::channel();
        let driver = Driver {
            handle,
            requests,
            registration: Registration {
                supervisor: self.clone(),
                id,
                token: token.clone(),
            },
            display_name: display_name.clone(),
            ignore_exit_code,
            stdout_task,
            stderr_task,
            result,
        };
        tokio::spawn(self.clone().drive(driver));

        ProcessFuture::pending(display_name, id, token, receiver)
    }

    /*
        @@@
        @drive();
        . Waits for the child to exit, serving kill requests in the meantime.
        . Drains stderr fully; drains stdout too unless the process was cancelled. Kill
          requests are still delivered to the process group while the pipes drain.
        . Builds the result: success when the code is 0 or ignored, `Cancelled` when the
          token was cancelled before the exit was seen, `Exit` with the captured stderr otherwise.
        . Invalidates first when the failure trips `invalidate_on_error`, then deregisters,
          then delivers the result, so a resolved future is never listed as running.
    */
    async fn drive(self, driver: Driver) {
        let Driver {
            mut handle,
            mut requests,
            registration,
            display_name,
            ignore_exit_code,
            stdout_task,
            stderr_task,
            result,
        } = driver;
        let id = handle.id();
        let token = registration.token.clone();

        let exited = handle.wait_for_exit(&mut requests).await;
        // decided here: a kill that lands while the pipes drain does not relabel the exit
        let cancelled = token.is_cancelled();

        // grandchildren may still hold the pipes, so keep serving kills until they close
        let drain = async move {
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            if !cancelled {
                if let Some(task) = stdout_task {
                    let _ = task.await;
                }
            }
            stderr
        };
        let stderr = handle.serve_while(&mut requests, drain).await;
        // later kill requests fail fast instead of waiting on us
        drop(requests);

        let outcome = match exited {
            Err(cause) => {
                error!(pid = id.as_raw(), program = %display_name, error = %cause, "lost track of process");
                Err(ProcessError::launch(&display_name, Some(id), cause))
            }
            Ok(exit_code) if exit_code == 0 || ignore_exit_code => {
                info!(pid = id.as_raw(), program = %display_name, exit_code, "process exited");
                Ok(Outcome { exit_code, process_id: id })
            }
            Ok(exit_code) if cancelled => {
                info!(pid = id.as_raw(), program = %display_name, exit_code, "process cancelled");
                Err(ProcessError::Cancelled { display_name: display_name.clone() })
            }
            Ok(exit_code) => {
                warn!(pid = id.as_raw(), program = %display_name, exit_code, "process failed");
                Err(ProcessError::Exit {
                    display_name: display_name.clone(),
                    process_id: id,
                    exit_code,
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                })
            }
        };

        if self.inner.invalidate_on_error {
            if let Err(err) = &outcome {
                if err.invalidates() {
                    warn!(pid = id.as_raw(), program = %display_name, "failure invalidates supervisor");
                    self.invalidate().await;
                }
            }
        }

        drop(registration);
        let _ = result.send(outcome);
    }

    pub(crate) fn deregister(&self, id: ProcessId, token: &CancelToken) {
        let mut state = self.lock();
        let ours = state
            .registry
            .get(&id)
            .map_or(false, |record| record.token.same_as(token));
        if ours {
            state.registry.remove(&id);
        }
    }

    pub(crate) fn is_registered(&self, id: ProcessId, token: &CancelToken) -> bool {
        self.lock()
            .registry
            .get(&id)
            .map_or(false, |record| record.token.same_as(token))
    }
}
