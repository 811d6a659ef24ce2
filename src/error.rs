use crate::handle::ProcessId;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Why a supervised process did not produce an [`Outcome`](crate::Outcome).
///
/// Callers tell the cases apart by matching on the variant, never on the
/// rendered message.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The OS could not start the process, or stopped answering for it.
    #[error("error running [{display_name}]: {cause}")]
    Launch {
        display_name: String,
        process_id: Option<ProcessId>,
        #[source]
        cause: Arc<io::Error>,
    },

    /// The process ran and exited with a code that was not ignored.
    #[error("error running [{display_name}]\n\tExit Code = {exit_code}\n{stderr}")]
    Exit {
        display_name: String,
        process_id: ProcessId,
        exit_code: i32,
        stderr: String,
    },

    /// The process was terminated by `cancel`, `kill_remaining` or `invalidate`.
    #[error("process was cancelled: [{display_name}]")]
    Cancelled { display_name: String },

    /// The supervisor was invalidated before this spawn; nothing was started.
    #[error("supervisor has been invalidated, cannot spawn [{display_name}]")]
    Invalidated { display_name: String },

    /// The supervision task went away without reporting a result.
    #[error("supervision of [{display_name}] ended without a result")]
    Abandoned { display_name: String },
}

impl ProcessError {
    pub(crate) fn launch(display_name: &str, process_id: Option<ProcessId>, cause: io::Error) -> Self {
        ProcessError::Launch {
            display_name: display_name.to_string(),
            process_id,
            cause: Arc::new(cause),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ProcessError::Launch { display_name, .. }
            | ProcessError::Exit { display_name, .. }
            | ProcessError::Cancelled { display_name }
            | ProcessError::Invalidated { display_name }
            | ProcessError::Abandoned { display_name } => display_name,
        }
    }

    pub fn process_id(&self) -> Option<ProcessId> {
        match self {
            ProcessError::Launch { process_id, .. } => *process_id,
            ProcessError::Exit { process_id, .. } => Some(*process_id),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Exit { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Captured stderr, only present on `Exit`.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ProcessError::Exit { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }

    pub fn is_invalidated(&self) -> bool {
        matches!(self, ProcessError::Invalidated { .. })
    }

    /// Failures that trip `invalidate_on_error`.
    pub(crate) fn invalidates(&self) -> bool {
        matches!(self, ProcessError::Launch { .. } | ProcessError::Exit { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_display_carries_code_and_stderr() {
        let err = ProcessError::Exit {
            display_name: "false".into(),
            process_id: ProcessId::from(42),
            exit_code: 1,
            stderr: "boom".into(),
        };
        assert_eq!(err.to_string(), "error running [false]\n\tExit Code = 1\nboom");
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(err.process_id(), Some(ProcessId::from(42)));
        assert!(err.invalidates());
    }

    #[test]
    fn test_launch_keeps_os_cause() {
        let err = ProcessError::launch("nope", None, io::Error::from(io::ErrorKind::NotFound));
        match &err {
            ProcessError::Launch { cause, .. } => assert_eq!(cause.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected variant: {:?}", other),
        }
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.invalidates());
    }

    #[test]
    fn test_cancel_and_invalidate_do_not_invalidate() {
        let cancelled = ProcessError::Cancelled { display_name: "sleep 10".into() };
        let rejected = ProcessError::Invalidated { display_name: "true".into() };
        assert!(cancelled.is_cancelled() && !cancelled.invalidates());
        assert!(rejected.is_invalidated() && !rejected.invalidates());
        assert_eq!(rejected.display_name(), "true");
        assert_eq!(cancelled.process_id(), None);
    }
}
