use crate::future::CancelToken;
use crate::handle::ProcessId;
use crate::runtime::Supervisor;
use chrono::{DateTime, Local};
use futures::future::join_all;
use nix::sys::signal::Signal;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Point-in-time view of one registered process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveProcess {
    pub id: ProcessId,
    pub display_name: String,
    pub started_at: DateTime<Local>,
    pub cancelled: bool,
}

impl Supervisor {
    /// SIGKILLs every registered process.
    pub async fn kill_remaining(&self) {
        self.kill_remaining_with(Signal::SIGKILL).await
    }

    /*
        @@@
        @kill_remaining_with();
        . Marks every registered process cancelled, then sends it `signal`.
        . Returns once all signals have gone out; it does not wait for the processes to exit.
        . Records stay registered; each one is removed by its own driver when the exit comes in.
    */
    pub async fn kill_remaining_with(&self, signal: Signal) {
        let sent = self.signal_all(false, signal);
        join_all(sent).await;
    }

    /// Permanently refuses new spawns and kills everything still running.
    pub async fn invalidate(&self) {
        let sent = self.signal_all(true, Signal::SIGKILL);
        join_all(sent).await;
    }

    pub fn is_invalid(&self) -> bool {
        self.lock().invalid
    }

    pub fn running(&self) -> HashMap<ProcessId, String> {
        self.lock()
            .registry
            .iter()
            .map(|(id, record)| (*id, record.display_name.clone()))
            .collect()
    }

    /// Like `running`, with start times and cancellation state, oldest first.
    pub fn list_active(&self) -> Vec<ActiveProcess> {
        let mut active: Vec<ActiveProcess> = self
            .lock()
            .registry
            .iter()
            .map(|(id, record)| ActiveProcess {
                id: *id,
                display_name: record.display_name.clone(),
                started_at: record.started_at,
                cancelled: record.token.is_cancelled(),
            })
            .collect();
        active.sort_by_key(|p| (p.started_at, p.id));
        active
    }

    /*
        @@@
        @signal_all();
        . Snapshots the registry, setting the invalid flag under the same lock when asked to,
          so a spawn racing with invalidation either lands in the snapshot or sees the flag.
        . Queues `signal` for every snapshotted process outside the lock.
        . Records whose driver no longer takes requests are skipped silently: processes that
          exited since the snapshot, and the failing driver that is invalidating.
    */
    pub(crate) fn signal_all(&self, invalidate: bool, signal: Signal) -> Vec<oneshot::Receiver<()>> {
        let targets: Vec<(ProcessId, String, CancelToken)> = {
            let mut state = self.lock();
            if invalidate && !state.invalid {
                state.invalid = true;
                warn!(remaining = state.registry.len(), "invalidating supervisor");
            }
            state
                .registry
                .iter()
                .map(|(id, record)| (*id, record.display_name.clone(), record.token.clone()))
                .collect()
        };

        targets
            .into_iter()
            .filter(|(_, _, token)| !token.is_finished())
            .filter_map(|(id, name, token)| {
                info!(pid = id.as_raw(), program = %name, signal = ?signal, "killing process");
                token.signal(signal)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SpawnRequest;
    use crate::runtime::ProcessRecord;
    use crate::sink::Output;
    use std::time::Duration;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    fn sleeper(secs: &str) -> SpawnRequest {
        SpawnRequest::new("sleep").arg(secs).stdout(Output::Null).stderr(Output::Null)
    }

    #[tokio::test]
    async fn test_kill_remaining_on_empty_registry() {
        let sup = Supervisor::new();
        sup.kill_remaining().await;
        assert!(sup.running().is_empty());
        assert!(!sup.is_invalid());
    }

    #[tokio::test]
    async fn test_list_active_reports_cancelled_flag() {
        let sup = Supervisor::new();
        let fut = sup.spawn(sleeper("30"));
        let id = fut.id().unwrap();

        let active = sup.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
        assert_eq!(active[0].display_name, "sleep 30");
        assert!(!active[0].cancelled);

        sup.kill_remaining_with(Signal::SIGTERM).await;
        let err = timeout(Duration::from_secs(10), fut).await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(sup.list_active().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_finished_records_are_not_signalled() {
        let sup = Supervisor::new();
        let (token, requests) = CancelToken::new();
        drop(requests);
        sup.lock().registry.insert(
            ProcessId::from(1),
            ProcessRecord {
                display_name: "draining".into(),
                started_at: Local::now(),
                token: token.clone(),
            },
        );

        assert!(sup.signal_all(true, Signal::SIGKILL).is_empty());
        assert!(sup.is_invalid());
        assert!(!token.is_cancelled());
        assert!(!sup.list_active()[0].cancelled);
        assert!(!logs_contain("killing process"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_invalidate_is_logged_once() {
        let sup = Supervisor::new();
        let fut = sup.spawn(sleeper("30"));
        sup.invalidate().await;
        sup.invalidate().await;
        assert!(sup.is_invalid());
        assert!(timeout(Duration::from_secs(10), fut).await.unwrap().unwrap_err().is_cancelled());
        assert!(logs_contain("invalidating supervisor"));
        assert!(logs_contain("killing process"));
    }
}
