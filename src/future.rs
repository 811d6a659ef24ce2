use crate::error::ProcessError;
use crate::handle::ProcessId;
use futures::future::FusedFuture;
use nix::sys::signal::Signal;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// A process that exited successfully (or whose exit code was ignored).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub exit_code: i32,
    pub process_id: ProcessId,
}

pub type ProcessResult = Result<Outcome, ProcessError>;

/// Signal request handed to the task that owns the child.
#[derive(Debug)]
pub(crate) struct KillRequest {
    pub signal: Signal,
    pub ack: Option<oneshot::Sender<()>>,
}

/// Shared cancellation state of one process.
///
/// The `cancelled` flag is set before any signal is queued, so the exit
/// handler reports `Cancelled` instead of a raw exit failure.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug)]
struct TokenInner {
    cancelled: AtomicBool,
    killed: AtomicBool,
    requests: UnboundedSender<KillRequest>,
}

impl CancelToken {
    pub(crate) fn new() -> (Self, UnboundedReceiver<KillRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancelToken {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                killed: AtomicBool::new(false),
                requests: tx,
            }),
        };
        (token, rx)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Marks the process cancelled and SIGKILLs it. Calling it again is a no-op,
    /// and so is calling it once the process has been fully handled.
    pub fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if self.inner.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.requests.send(KillRequest { signal: Signal::SIGKILL, ack: None });
    }

    /// Marks the process cancelled and queues `signal`.
    ///
    /// The returned receiver fires once the signal has been sent; `None` means
    /// the process has already been fully handled and nothing was queued.
    pub(crate) fn signal(&self, signal: Signal) -> Option<oneshot::Receiver<()>> {
        if self.is_finished() {
            return None;
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let (ack, done) = oneshot::channel();
        self.inner
            .requests
            .send(KillRequest { signal, ack: Some(ack) })
            .ok()
            .map(|_| done)
    }

    /// The driver no longer takes requests.
    pub(crate) fn is_finished(&self) -> bool {
        self.inner.requests.is_closed()
    }

    pub(crate) fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

enum State {
    Pending(oneshot::Receiver<ProcessResult>),
    Ready(ProcessResult),
    Done,
}

/// Eventual result of one `spawn`.
///
/// Resolves exactly once. The name and pid are available before it resolves,
/// and dropping it leaves the process running under supervision.
pub struct ProcessFuture {
    display_name: String,
    id: Option<ProcessId>,
    token: Option<CancelToken>,
    state: State,
}

impl ProcessFuture {
    pub(crate) fn pending(
        display_name: String,
        id: ProcessId,
        token: CancelToken,
        result: oneshot::Receiver<ProcessResult>,
    ) -> Self {
        ProcessFuture {
            display_name,
            id: Some(id),
            token: Some(token),
            state: State::Pending(result),
        }
    }

    pub(crate) fn failed(display_name: String, id: Option<ProcessId>, error: ProcessError) -> Self {
        ProcessFuture {
            display_name,
            id,
            token: None,
            state: State::Ready(Err(error)),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// `None` when no process was ever created (launch failure or invalidated supervisor).
    pub fn id(&self) -> Option<ProcessId> {
        self.id
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.token.as_ref()
    }

    pub fn cancel(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }
}

impl Future for ProcessFuture {
    type Output = ProcessResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = match std::mem::replace(&mut this.state, State::Done) {
            State::Pending(mut rx) => match Pin::new(&mut rx).poll(cx) {
                Poll::Pending => {
                    this.state = State::Pending(rx);
                    return Poll::Pending;
                }
                Poll::Ready(Ok(result)) => result,
                Poll::Ready(Err(_)) => Err(ProcessError::Abandoned {
                    display_name: this.display_name.clone(),
                }),
            },
            State::Ready(result) => result,
            State::Done => panic!("ProcessFuture polled after completion"),
        };
        Poll::Ready(result)
    }
}

impl FusedFuture for ProcessFuture {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Done)
    }
}

impl std::fmt::Debug for ProcessFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessFuture")
            .field("display_name", &self.display_name)
            .field("id", &self.id)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_resolves_once_with_sent_result() {
        let (token, _requests) = CancelToken::new();
        let (tx, rx) = oneshot::channel();
        let id = ProcessId::from(7);
        let mut fut = ProcessFuture::pending("job".into(), id, token, rx);
        assert!(!fut.is_terminated());

        tx.send(Ok(Outcome { exit_code: 0, process_id: id })).unwrap();
        let outcome = (&mut fut).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(fut.is_terminated());
        assert_eq!(fut.display_name(), "job");
    }

    #[tokio::test]
    async fn test_dropped_sender_is_abandoned() {
        let (token, _requests) = CancelToken::new();
        let (tx, rx) = oneshot::channel::<ProcessResult>();
        let fut = ProcessFuture::pending("job".into(), ProcessId::from(7), token, rx);
        drop(tx);
        assert!(matches!(fut.await, Err(ProcessError::Abandoned { .. })));
    }

    #[tokio::test]
    async fn test_shared_result_reaches_every_clone() {
        let fut = ProcessFuture::failed(
            "late".into(),
            None,
            ProcessError::Invalidated { display_name: "late".into() },
        )
        .shared();
        let (a, b) = futures::join!(fut.clone(), fut);
        assert!(a.unwrap_err().is_invalidated());
        assert!(b.unwrap_err().is_invalidated());
    }

    #[test]
    fn test_cancel_queues_a_single_kill() {
        let (token, mut requests) = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        let first = requests.try_recv().unwrap();
        assert_eq!(first.signal, Signal::SIGKILL);
        assert!(requests.try_recv().is_err());
    }

    #[test]
    fn test_signal_after_exit_returns_none() {
        let (token, requests) = CancelToken::new();
        drop(requests);
        assert!(token.is_finished());
        assert!(token.signal(Signal::SIGTERM).is_none());
        token.cancel();
        assert!(!token.is_cancelled());
    }
}
