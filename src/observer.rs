//! Progress reporting for downloads.
//!
//! The downloader pushes a [`ProgressSnapshot`] after every pacing tick to a
//! [`ProgressObserver`]. Observers must not block: the console path goes
//! through a bounded channel so a slow terminal can never stall the copy loop.
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Progress after one pacing tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Cumulative bytes written to disk so far.
    pub total_bytes_read: u64,
    /// Size announced by the server, if any.
    pub total_bytes: Option<u64>,
    /// Bytes moved in the last tick divided by the tick's measured duration.
    pub bytes_per_second: f64,
}

impl ProgressSnapshot {
    /// Completion percentage, available only when the total size is known and non-zero.
    pub fn percent(&self) -> Option<f64> {
        self.total_bytes
            .filter(|total| *total > 0)
            .map(|total| self.total_bytes_read as f64 / total as f64 * 100.0)
    }

    pub fn megabytes(&self) -> f64 {
        self.total_bytes_read as f64 / BYTES_PER_MEGABYTE
    }

    pub fn megabytes_per_second(&self) -> f64 {
        self.bytes_per_second / BYTES_PER_MEGABYTE
    }

    /// Human readable progress line, e.g. `"1.50 MB, 37.50%, 0.98 MB/s"`.
    pub fn render(&self) -> String {
        match self.percent() {
            Some(percent) => format!(
                "{:.2} MB, {:.2}%, {:.2} MB/s",
                self.megabytes(),
                percent,
                self.megabytes_per_second()
            ),
            None => format!(
                "{:.2} MB, {:.2} MB/s",
                self.megabytes(),
                self.megabytes_per_second()
            ),
        }
    }
}

/// Receives download progress. Implementations must return quickly.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, snapshot: ProgressSnapshot);

    /// Called once after the last snapshot of a successful download.
    fn on_finish(&self) {}
}

/// Discards all progress.
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _snapshot: ProgressSnapshot) {}
}

/// Renders progress on a single, in-place updated console line.
pub struct ConsoleObserver {
    pub pb: ProgressBar,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { pb }
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ConsoleObserver {
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        if let Some(total) = snapshot.total_bytes {
            self.pb.set_length(total);
        }
        self.pb.set_position(snapshot.total_bytes_read);
        self.pb.set_message(snapshot.render());
        self.pb.tick();
    }

    fn on_finish(&self) {
        self.pb.finish();
    }
}

/// Message carried from a [`ChannelObserver`] to its consumer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    Progress(ProgressSnapshot),
    Finished,
}

/// Forwards progress into a bounded channel without ever waiting.
///
/// When the consumer falls behind and the channel is full, the snapshot is
/// dropped. Later snapshots are cumulative, so nothing is lost but resolution.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.tx.try_send(ProgressEvent::Progress(snapshot))
        {
            tracing::trace!("progress consumer is lagging, snapshot dropped");
        }
    }

    fn on_finish(&self) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(ProgressEvent::Finished) {
            tracing::debug!("progress consumer is lagging, finish event dropped");
        }
    }
}

/// Spawns a task that drains a [`ChannelObserver`] into console progress lines.
///
/// Each download gets a fresh progress bar; the task ends once every sender is dropped.
pub fn console_channel(capacity: usize) -> (ChannelObserver, JoinHandle<()>) {
    let (observer, mut rx) = ChannelObserver::new(capacity);

    let handle = tokio::spawn(async move {
        let mut console: Option<ConsoleObserver> = None;
        let mut last_position = 0u64;

        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Progress(snapshot) => {
                    // a new download after a dropped finish starts below the old position
                    if snapshot.total_bytes_read < last_position
                        && let Some(stale) = console.take()
                    {
                        stale.on_finish();
                    }
                    last_position = snapshot.total_bytes_read;
                    console
                        .get_or_insert_with(ConsoleObserver::new)
                        .on_progress(snapshot);
                }
                ProgressEvent::Finished => {
                    last_position = 0;
                    if let Some(done) = console.take() {
                        done.on_finish();
                    }
                }
            }
        }
    });

    (observer, handle)
}
