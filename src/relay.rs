use crate::handle::ProcessId;
use crate::sink::Sink;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

const CHUNK: usize = 8 * 1024;

/*
    @@@
    @pump();
    . Reads the pipe until EOF and hands every chunk to `admit` first, then to the sink when admitted.
    . A failing sink is logged and skipped; the pipe keeps being drained so the child never blocks on it.
*/
async fn pump<R, F>(mut reader: R, mut sink: Box<dyn Sink>, stream: &'static str, pid: ProcessId, mut admit: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]) -> bool,
{
    let mut buf = vec![0u8; CHUNK];
    let mut sink_ok = true;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(pid = pid.as_raw(), stream, error = %e, "read from child failed");
                break;
            }
        };
        let chunk = &buf[..n];
        if !admit(chunk) || !sink_ok {
            continue;
        }
        let written = match sink.write_chunk(chunk).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(pid = pid.as_raw(), stream, error = %e, "sink write failed, dropping further output");
            sink_ok = false;
        }
    }
    debug!(pid = pid.as_raw(), stream, "stream closed");
}

/// Forwards stdout while `live()` holds; chunks arriving after that are dropped.
pub async fn relay_stdout<R, L>(reader: R, sink: Box<dyn Sink>, pid: ProcessId, live: L)
where
    R: AsyncRead + Unpin,
    L: Fn() -> bool,
{
    pump(reader, sink, "stdout", pid, |_| live()).await
}

/// Forwards all of stderr and returns everything read, in order.
pub async fn relay_stderr<R>(reader: R, sink: Box<dyn Sink>, pid: ProcessId) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    pump(reader, sink, "stderr", pid, |chunk| {
        captured.extend_from_slice(chunk);
        true
    })
    .await;
    captured
}
