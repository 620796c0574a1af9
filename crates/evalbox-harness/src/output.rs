//! Bounded collection of candidate stdout/stderr.
//!
//! Streams are read to EOF so the child never stalls on a full pipe; only the
//! last `limit` bytes are kept.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    tail: Vec<u8>,
    total_bytes: usize,
}

impl CapturedOutput {
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn is_truncated(&self) -> bool {
        self.total_bytes > self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    /// Retained bytes as text, prefixed with a marker when earlier output was dropped.
    pub fn text(&self) -> String {
        let body = String::from_utf8_lossy(&self.tail);
        if self.is_truncated() {
            format!(
                "[... {} earlier bytes dropped ...]\n{}",
                self.total_bytes - self.tail.len(),
                body
            )
        } else {
            body.into_owned()
        }
    }

    #[cfg(test)]
    pub(crate) fn from_text(text: &str) -> Self {
        Self {
            tail: text.as_bytes().to_vec(),
            total_bytes: text.len(),
        }
    }

    fn push(&mut self, chunk: &[u8], limit: usize) {
        self.total_bytes += chunk.len();
        self.tail.extend_from_slice(chunk);
        if self.tail.len() > limit {
            let excess = self.tail.len() - limit;
            self.tail.drain(..excess);
        }
    }
}

async fn drain<R>(mut reader: R, limit: usize) -> CapturedOutput
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedOutput::default();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => captured.push(&buf[..n], limit),
            Err(e) => {
                tracing::debug!("Output stream closed with error: {}", e);
                break;
            }
        }
    }
    captured
}

/// Start draining `reader` on a background task.
pub fn spawn_drain<R>(reader: Option<R>, limit: usize) -> Option<JoinHandle<CapturedOutput>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|r| tokio::spawn(drain(r, limit)))
}

/// Wait up to `grace` for a drain task to hit EOF.
///
/// A process that escaped the candidate's group can keep the pipe open
/// forever; in that case the task is aborted and whatever was not yet
/// handed back is lost.
pub async fn collect(handle: Option<JoinHandle<CapturedOutput>>, grace: Duration) -> CapturedOutput {
    let Some(mut handle) = handle else {
        return CapturedOutput::default();
    };

    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            tracing::warn!("Output drain task failed: {}", e);
            CapturedOutput::default()
        }
        Err(_) => {
            tracing::warn!("Output pipe still open after {:?}, abandoning drain", grace);
            handle.abort();
            CapturedOutput::default()
        }
    }
}
