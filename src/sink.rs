use async_trait::async_trait;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Destination for a child's output.
///
/// Receives the raw chunks in the order the pipe produced them.
#[async_trait]
pub trait Sink: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory sink; clones share the same bytes.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

#[async_trait]
impl Sink for Buffer {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.bytes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(chunk);
        Ok(())
    }
}

/// Adapts any tokio writer (stdout, a file, a socket half...).
pub struct Writer<W>(pub W);

#[async_trait]
impl<W> Sink for Writer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.0.write_all(chunk).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.0.flush().await
    }
}

pub struct Discard;

#[async_trait]
impl Sink for Discard {
    async fn write_chunk(&mut self, _chunk: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// Where one output stream of a spawned process goes.
#[derive(Default)]
pub enum Output {
    /// Relay to this process's own stdout/stderr.
    #[default]
    Inherit,
    Null,
    Sink(Box<dyn Sink>),
}

impl Output {
    pub fn sink(sink: impl Sink + 'static) -> Self {
        Output::Sink(Box::new(sink))
    }

    pub fn buffer(buffer: &Buffer) -> Self {
        Output::sink(buffer.clone())
    }

    /*
        @@@
        @append_file();
        . Creates the parent directories if needed and opens the file in append mode.
        . The open happens here so a bad path is reported before anything is spawned.
    */
    pub fn append_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Output::sink(Writer(tokio::fs::File::from_std(file))))
    }

    pub(crate) fn into_stdout_sink(self) -> Box<dyn Sink> {
        self.into_sink(|| Box::new(Writer(tokio::io::stdout())))
    }

    pub(crate) fn into_stderr_sink(self) -> Box<dyn Sink> {
        self.into_sink(|| Box::new(Writer(tokio::io::stderr())))
    }

    fn into_sink(self, inherit: impl FnOnce() -> Box<dyn Sink>) -> Box<dyn Sink> {
        match self {
            Output::Inherit => inherit(),
            Output::Null => Box::new(Discard),
            Output::Sink(sink) => sink,
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Inherit => f.write_str("Inherit"),
            Output::Null => f.write_str("Null"),
            Output::Sink(_) => f.write_str("Sink(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffer_clones_share_bytes() {
        let buffer = Buffer::new();
        let mut writer = buffer.clone();
        writer.write_chunk(b"hel").await.unwrap();
        writer.write_chunk(b"lo").await.unwrap();
        assert_eq!(buffer.to_string_lossy(), "hello");
    }

    #[tokio::test]
    async fn test_append_file_keeps_previous_content() {
        let dir = std::env::temp_dir().join(format!("procvisor-sink-{}", std::process::id()));
        let path = dir.join("nested").join("out.log");
        let _ = std::fs::remove_dir_all(&dir);

        for chunk in [&b"one\n"[..], &b"two\n"[..]] {
            let mut sink = Output::append_file(&path).unwrap().into_stdout_sink();
            sink.write_chunk(chunk).await.unwrap();
            sink.flush().await.unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
