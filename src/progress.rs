//! Transfer statistics and the chunked copy loop behind streaming uploads.
//!
//! The copy loop pushes fixed-size chunks through a bounded byte pipe
//! (backpressure: the producer parks until the HTTP client drains it) and
//! records statistics at every chunk boundary. Progress publishing is
//! best-effort: a full or unobserved channel drops the sample instead of
//! stalling the upload.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use futures::SinkExt as _;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Chunk size of the copy loop; each chunk is a statistics callback point.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Chunk boundaries kept for the recent-speed window.
const SPEED_WINDOW: usize = 10;

/// Snapshots a slow consumer may lag behind before samples are dropped.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// One immutable progress report emitted during an upload.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Bytes pushed into the request body so far.
    pub transferred: u64,
    /// Total payload size.
    pub total: u64,
    /// Completion percentage, rounded to two decimals.
    pub percent: f64,
    /// Speed over the recent chunk window, in bytes per second.
    pub speed: f64,
    /// Average speed since the transfer started, in bytes per second.
    pub speed_avg: f64,
    /// Estimated time to completion; `None` while the average is zero.
    pub remaining: Option<Duration>,
    /// When the transfer started.
    pub started: Instant,
}

/// Rolling statistics over one transfer.
///
/// Keeps the last [`SPEED_WINDOW`] chunk boundaries so the instantaneous
/// speed reflects recent throughput rather than the whole transfer.
#[derive(Debug)]
pub struct TransferStats {
    total: u64,
    transferred: u64,
    started: Instant,
    history: VecDeque<(Instant, u64)>,
    last_percent: Option<f64>,
}

impl TransferStats {
    pub fn new(total: u64) -> Self {
        let started = Instant::now();
        let mut history = VecDeque::with_capacity(SPEED_WINDOW);
        history.push_back((started, 0));
        Self {
            total,
            transferred: 0,
            started,
            history,
            last_percent: None,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Record `n` more bytes.
    ///
    /// Returns a snapshot only when the rounded percent moved since the
    /// last emission, so a consumer is never flooded with duplicates.
    pub fn record(&mut self, n: u64) -> Option<ProgressSnapshot> {
        let now = Instant::now();
        self.transferred += n;
        if self.history.len() == SPEED_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back((now, self.transferred));

        let percent = self.percent();
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(self.snapshot_at(now, percent))
    }

    /// Terminal snapshot, or `None` when the last emission already covered
    /// the current state.
    pub fn finish(&mut self) -> Option<ProgressSnapshot> {
        let percent = self.percent();
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(self.snapshot_at(Instant::now(), percent))
    }

    /// Current state regardless of the emission gate.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(Instant::now(), self.percent())
    }

    fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.transferred as f64 / self.total as f64 * 10_000.0).round() / 100.0
    }

    fn snapshot_at(&self, now: Instant, percent: f64) -> ProgressSnapshot {
        let (window_start, window_base) = self
            .history
            .front()
            .copied()
            .unwrap_or((self.started, 0));
        let window_secs = now.duration_since(window_start).as_secs_f64();
        let speed = if window_secs > 0.0 {
            self.transferred.saturating_sub(window_base) as f64 / window_secs
        } else {
            0.0
        };

        let total_secs = now.duration_since(self.started).as_secs_f64();
        let speed_avg = if total_secs > 0.0 {
            self.transferred as f64 / total_secs
        } else {
            0.0
        };

        let remaining = if speed_avg > 0.0 {
            let left = self.total.saturating_sub(self.transferred);
            Some(Duration::from_secs_f64(left as f64 / speed_avg))
        } else {
            None
        };

        ProgressSnapshot {
            transferred: self.transferred,
            total: self.total,
            percent,
            speed,
            speed_avg,
            remaining,
            started: self.started,
        }
    }
}

/// Byte pipe feeding an upload body: chunks flow through, a source failure
/// flows through as the terminal item.
pub(crate) type BytePipe = futures::channel::mpsc::Sender<Result<Vec<u8>, io::Error>>;

/// Stream `source` into `pipe` in [`CHUNK_SIZE`] chunks, publishing a
/// snapshot after any chunk that moves the percentage.
///
/// A read failure is forwarded into the pipe so the request body errors
/// out and the transfer aborts. The progress channel closes when this
/// returns, in every case.
pub(crate) async fn copy_with_progress<R>(
    mut source: R,
    total: u64,
    mut pipe: BytePipe,
    progress: Option<mpsc::Sender<ProgressSnapshot>>,
) where
    R: AsyncRead + Unpin,
{
    let mut stats = TransferStats::new(total);
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if pipe.send(Ok(buf[..n].to_vec())).await.is_err() {
                    // Consumer hung up; the request is already gone.
                    break;
                }
                if let Some(snapshot) = stats.record(n as u64) {
                    if let Some(tx) = &progress {
                        let _ = tx.try_send(snapshot);
                    }
                }
            }
            Err(err) => {
                log::warn!("upload source read failed after {} bytes: {err}", stats.transferred());
                let _ = pipe.send(Err(err)).await;
                break;
            }
        }
    }

    if let Some(tx) = &progress {
        if let Some(snapshot) = stats.finish() {
            let _ = tx.try_send(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[test]
    fn test_percent_is_monotonic_without_duplicates() {
        let mut stats = TransferStats::new(100_000);
        let mut last = -1.0;
        for _ in 0..100 {
            if let Some(snapshot) = stats.record(1_000) {
                assert!(snapshot.percent > last);
                last = snapshot.percent;
            }
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn test_sub_percent_chunks_are_gated() {
        let mut stats = TransferStats::new(10 * 1024 * 1024);
        // The first boundary emits (nothing was emitted before it)...
        assert_eq!(stats.record(1).unwrap().percent, 0.0);
        // ...but later sub-0.01% chunks are gated.
        assert!(stats.record(1).is_none());
        assert!(stats.record(1).is_none());
    }

    #[test]
    fn test_remaining_is_none_before_any_bytes() {
        let stats = TransferStats::new(1_000);
        assert!(stats.snapshot().remaining.is_none());
    }

    #[test]
    fn test_finish_emits_once() {
        let mut stats = TransferStats::new(10);
        let first = stats.record(10);
        assert_eq!(first.unwrap().percent, 100.0);
        // The last record already covered 100.00.
        assert!(stats.finish().is_none());
    }

    #[test]
    fn test_finish_emits_when_nothing_was_recorded() {
        let mut stats = TransferStats::new(1000);
        let terminal = stats.finish().unwrap();
        assert_eq!(terminal.transferred, 0);
        assert_eq!(terminal.percent, 0.0);
    }

    #[test]
    fn test_zero_total_reports_complete() {
        let mut stats = TransferStats::new(0);
        let snapshot = stats.finish().unwrap();
        assert_eq!(snapshot.percent, 100.0);
        assert_eq!(snapshot.transferred, 0);
    }

    #[tokio::test]
    async fn test_copy_forwards_all_bytes_and_closes_progress() {
        use futures::StreamExt;

        let payload = vec![7u8; 100 * 1024];
        let (pipe_tx, mut pipe_rx) = futures::channel::mpsc::channel(1);
        let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let producer = tokio::spawn(copy_with_progress(
            Cursor::new(payload.clone()),
            payload.len() as u64,
            pipe_tx,
            Some(tx),
        ));

        let mut received = Vec::new();
        while let Some(chunk) = pipe_rx.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        producer.await.unwrap();
        assert_eq!(received, payload);

        let mut snapshots = Vec::new();
        while let Some(snapshot) = rx.recv().await {
            snapshots.push(snapshot);
        }
        let last = snapshots.last().expect("at least one snapshot");
        assert_eq!(last.transferred, payload.len() as u64);
        assert_eq!(last.percent, 100.0);
    }

    /// Reader that yields some bytes, then an error.
    struct FailingReader {
        remaining: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk on fire")));
            }
            let n = self.remaining.min(buf.remaining());
            buf.put_slice(&vec![1u8; n]);
            self.remaining -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_source_error_propagates_into_pipe_and_closes_progress() {
        use futures::StreamExt;

        let (pipe_tx, mut pipe_rx) = futures::channel::mpsc::channel(1);
        let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let producer = tokio::spawn(copy_with_progress(
            FailingReader {
                remaining: CHUNK_SIZE,
            },
            1024 * 1024,
            pipe_tx,
            Some(tx),
        ));

        let mut saw_error = false;
        while let Some(item) = pipe_rx.next().await {
            if item.is_err() {
                saw_error = true;
            }
        }
        producer.await.unwrap();
        assert!(saw_error);

        // The channel must close even though the copy failed; the partial
        // snapshot is the terminal emission.
        let mut last = None;
        while let Some(snapshot) = rx.recv().await {
            last = Some(snapshot);
        }
        let last = last.expect("terminal snapshot");
        assert_eq!(last.transferred, CHUNK_SIZE as u64);
        assert!(last.percent < 100.0);
    }
}
