//! Bandwidth-capped streaming downloader.
//!
//! Every tick copies one batch of chunks while a pacing delay runs alongside
//! it; the tick only completes once both have finished. Fast I/O is therefore
//! held back to the delay, slow I/O simply takes longer than the delay.
use crate::copier::{BatchOutcome, copy_chunks};
use crate::error::{Result, UpdateError};
use crate::observer::{ProgressObserver, ProgressSnapshot};
use futures_util::TryStreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::{Instant, sleep};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Tuning for a single download.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Size of one chunk, i.e. the most a single read may return.
    pub buffer_size_bytes: usize,
    /// Throughput ceiling in MB/s (1 MB = 1024 * 1024 bytes).
    pub max_megabytes_per_second: f64,
    /// Desired time between two progress reports.
    pub refresh_interval_seconds: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            buffer_size_bytes: 8 * 1024,
            max_megabytes_per_second: 1.0,
            refresh_interval_seconds: 0.5,
        }
    }
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size_bytes == 0 {
            return Err(UpdateError::configuration(
                "download.buffer_size_bytes must be greater than zero",
            ));
        }
        if !(self.max_megabytes_per_second.is_finite() && self.max_megabytes_per_second > 0.0) {
            return Err(UpdateError::configuration(
                "download.max_megabytes_per_second must be a positive number",
            ));
        }
        if !(self.refresh_interval_seconds.is_finite() && self.refresh_interval_seconds > 0.0) {
            return Err(UpdateError::configuration(
                "download.refresh_interval_seconds must be a positive number",
            ));
        }
        Pacing::new(self).map(|_| ())
    }
}

/// Pacing parameters derived from a [`DownloadConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    /// Minimum wall-clock time one full chunk must take to respect the ceiling.
    pub seconds_per_chunk: f64,
    /// Chunks copied per tick. Never zero, otherwise the first tick would look like end of stream.
    pub chunks_per_batch: usize,
    /// Minimum duration of a tick.
    pub batch_delay: Duration,
}

impl Pacing {
    /// Fails when the resulting tick duration cannot be represented, e.g. for a
    /// vanishingly small ceiling.
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let max_bytes_per_second = config.max_megabytes_per_second * BYTES_PER_MEGABYTE;
        let seconds_per_chunk = config.buffer_size_bytes as f64 / max_bytes_per_second;
        // keeps buffer_size_bytes * chunks_per_batch within usize
        let max_chunks = (usize::MAX / config.buffer_size_bytes.max(1)).max(1);
        let chunks_per_batch = ((config.refresh_interval_seconds / seconds_per_chunk).floor()
            as usize)
            .clamp(1, max_chunks);
        let batch_delay = Duration::try_from_secs_f64(seconds_per_chunk * chunks_per_batch as f64)
            .map_err(|e| {
                UpdateError::configuration(format!(
                    "download.max_megabytes_per_second {} gives an unusable pacing delay: {e}",
                    config.max_megabytes_per_second
                ))
            })?;

        Ok(Self {
            seconds_per_chunk,
            chunks_per_batch,
            batch_delay,
        })
    }

    /// Upper bound on the bytes a single tick can move.
    pub fn max_batch_bytes(&self, config: &DownloadConfig) -> u64 {
        (config.buffer_size_bytes as u64).saturating_mul(self.chunks_per_batch as u64)
    }
}

/// Result of a completed download.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadSummary {
    pub total_bytes: u64,
    /// Number of ticks, including the terminal zero-byte tick.
    pub batches: u64,
    pub elapsed: Duration,
}

impl DownloadSummary {
    pub fn average_bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Copies `reader` into `writer` under the ceiling described by `config`,
/// reporting progress after every tick.
///
/// The loop ends on the first tick that moves zero bytes. Once a tick has seen
/// the end of the stream the terminal tick runs without a pacing delay.
pub async fn copy_paced<R, W>(
    reader: &mut R,
    writer: &mut W,
    total_bytes: Option<u64>,
    config: &DownloadConfig,
    observer: &dyn ProgressObserver,
) -> std::io::Result<DownloadSummary>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let pacing = Pacing::new(config).map_err(std::io::Error::other)?;
    let mut buffer = vec![0u8; config.buffer_size_bytes];
    let mut total_bytes_read: u64 = 0;
    let mut batches: u64 = 0;
    let mut exhausted = false;
    let started = Instant::now();

    debug!(
        chunks_per_batch = pacing.chunks_per_batch,
        batch_delay_ms = pacing.batch_delay.as_millis() as u64,
        "pacing configured"
    );

    loop {
        let tick = Instant::now();

        let batch: BatchOutcome = if exhausted {
            copy_chunks(&mut *reader, &mut buffer, &mut *writer, pacing.chunks_per_batch).await?
        } else {
            let (copied, ()) = tokio::join!(
                copy_chunks(&mut *reader, &mut buffer, &mut *writer, pacing.chunks_per_batch),
                sleep(pacing.batch_delay)
            );
            copied?
        };

        let elapsed = tick.elapsed().as_secs_f64();
        batches += 1;
        total_bytes_read += batch.bytes_moved;

        let bytes_per_second = if elapsed > 0.0 {
            batch.bytes_moved as f64 / elapsed
        } else {
            0.0
        };

        observer.on_progress(ProgressSnapshot {
            total_bytes_read,
            total_bytes,
            bytes_per_second,
        });

        if batch.bytes_moved == 0 {
            break;
        }
        exhausted = batch.exhausted;
    }

    writer.flush().await?;
    observer.on_finish();

    Ok(DownloadSummary {
        total_bytes: total_bytes_read,
        batches,
        elapsed: started.elapsed(),
    })
}

/// Fetches artifacts over HTTP into local files at a bounded rate.
#[derive(Debug, Clone)]
pub struct RateLimitedDownloader {
    client: Client,
    config: DownloadConfig,
}

impl RateLimitedDownloader {
    pub fn new(client: Client, config: DownloadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Downloads `url` into `path`, truncating any existing file.
    ///
    /// On failure the partially written file is left on disk; the next
    /// attempt truncates it.
    pub async fn download(
        &self,
        url: &str,
        path: &Path,
        observer: &dyn ProgressObserver,
    ) -> Result<DownloadSummary> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(UpdateError::HttpStatus {
                status: response.status(),
                url: url.to_string(),
            });
        }

        let total_bytes = response.content_length();
        info!(
            url,
            path = %path.display(),
            total_bytes = ?total_bytes,
            "download started"
        );

        let file = tokio::fs::File::create(path).await?;
        let mut writer = BufWriter::new(file);

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(Box::pin(stream));

        let summary = copy_paced(
            &mut reader,
            &mut writer,
            total_bytes,
            &self.config,
            observer,
        )
        .await?;

        info!(
            path = %path.display(),
            bytes = summary.total_bytes,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "download finished"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        snapshots: Mutex<Vec<ProgressSnapshot>>,
        finished: Mutex<bool>,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_progress(&self, snapshot: ProgressSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot);
        }

        fn on_finish(&self) {
            *self.finished.lock().unwrap() = true;
        }
    }

    #[test]
    fn pacing_for_one_megabyte_per_second() {
        let config = DownloadConfig {
            buffer_size_bytes: 1024,
            max_megabytes_per_second: 1.0,
            refresh_interval_seconds: 0.5,
        };

        let pacing = Pacing::new(&config).unwrap();

        assert_eq!(pacing.seconds_per_chunk, 1.0 / 1024.0);
        assert_eq!(pacing.chunks_per_batch, 512);
        assert_eq!(pacing.batch_delay, Duration::from_millis(500));
        assert_eq!(pacing.max_batch_bytes(&config), 512 * 1024);
    }

    #[test]
    fn pacing_never_yields_an_empty_batch() {
        // one chunk alone takes longer than the refresh interval
        let config = DownloadConfig {
            buffer_size_bytes: 1024 * 1024,
            max_megabytes_per_second: 0.5,
            refresh_interval_seconds: 0.5,
        };

        let pacing = Pacing::new(&config).unwrap();

        assert_eq!(pacing.chunks_per_batch, 1);
        assert_eq!(pacing.batch_delay, Duration::from_secs(2));
    }

    #[test]
    fn rejects_non_positive_tuning() {
        let mut config = DownloadConfig::default();
        assert!(config.validate().is_ok());

        config.buffer_size_bytes = 0;
        assert!(config.validate().is_err());

        config = DownloadConfig {
            max_megabytes_per_second: 0.0,
            ..DownloadConfig::default()
        };
        assert!(config.validate().is_err());

        config = DownloadConfig {
            refresh_interval_seconds: f64::NAN,
            ..DownloadConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UpdateError::Configuration { .. })
        ));
    }

    #[test]
    fn rejects_ceilings_with_unrepresentable_delays() {
        let config = DownloadConfig {
            max_megabytes_per_second: 1e-300,
            ..DownloadConfig::default()
        };

        assert!(matches!(
            Pacing::new(&config),
            Err(UpdateError::Configuration { .. })
        ));
        assert!(config.validate().is_err());
        assert!(RateLimitedDownloader::new(Client::new(), config).is_err());
    }

    #[test]
    fn huge_refresh_interval_caps_the_batch() {
        let config = DownloadConfig {
            refresh_interval_seconds: 1e300,
            ..DownloadConfig::default()
        };

        let pacing = Pacing::new(&config).unwrap();

        assert_eq!(pacing.chunks_per_batch, usize::MAX / config.buffer_size_bytes);
        assert!(pacing.max_batch_bytes(&config) <= usize::MAX as u64);
        assert!(config.validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_pacing_fails_the_copy_instead_of_panicking() {
        let config = DownloadConfig {
            max_megabytes_per_second: 1e-300,
            ..DownloadConfig::default()
        };
        let source = vec![0u8; 16];
        let mut reader = source.as_slice();
        let mut sink = Vec::new();

        let result = copy_paced(&mut reader, &mut sink, None, &config, &NoopObserver).await;

        assert!(result.is_err());
        assert!(sink.is_empty());
    }

    /// Serves `chunk` for the first `good_reads` reads, then fails.
    struct FailingReader {
        chunk: Vec<u8>,
        good_reads: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.good_reads == 0 {
                return std::task::Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset mid-body",
                )));
            }
            self.good_reads -= 1;
            let n = self.chunk.len().min(buf.remaining());
            buf.put_slice(&self.chunk[..n]);
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_error_aborts_and_keeps_written_bytes() {
        // 3 KiB per tick, so the failure lands in the second tick
        let config = DownloadConfig {
            buffer_size_bytes: 1024,
            max_megabytes_per_second: 0.03,
            refresh_interval_seconds: 0.1,
        };
        assert_eq!(Pacing::new(&config).unwrap().chunks_per_batch, 3);

        let mut reader = FailingReader {
            chunk: vec![9u8; 1024],
            good_reads: 4,
        };
        let mut sink = Vec::new();
        let observer = RecordingObserver::default();

        let err = copy_paced(&mut reader, &mut sink, Some(8192), &config, &observer)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
        assert_eq!(sink.len(), 4 * 1024);
        assert!(sink.iter().all(|b| *b == 9));

        // only the completed first tick was reported, and no finish
        let snapshots = observer.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].total_bytes_read, 3 * 1024);
        assert!(!*observer.finished.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn small_source_finishes_with_one_terminal_empty_batch() {
        let config = DownloadConfig {
            buffer_size_bytes: 1024,
            max_megabytes_per_second: 1.0,
            refresh_interval_seconds: 0.5,
        };
        let source = vec![1u8; 10240];
        let mut reader = source.as_slice();
        let mut sink = Vec::new();
        let observer = RecordingObserver::default();

        let summary = copy_paced(&mut reader, &mut sink, Some(10240), &config, &observer)
            .await
            .unwrap();

        assert_eq!(summary.total_bytes, 10240);
        assert_eq!(summary.batches, 2);
        assert!(summary.elapsed >= Duration::from_millis(10));
        assert_eq!(sink.len(), 10240);

        let snapshots = observer.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].total_bytes_read, 10240);
        assert_eq!(snapshots[0].percent(), Some(100.0));
        // the terminal tick moves nothing
        assert_eq!(snapshots[1].total_bytes_read, 10240);
        assert_eq!(snapshots[1].bytes_per_second, 0.0);
        assert!(*observer.finished.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_stays_under_the_ceiling() {
        // 0.05 MB/s with 1 KiB chunks: 5 chunks per 0.1s tick
        let config = DownloadConfig {
            buffer_size_bytes: 1024,
            max_megabytes_per_second: 0.05,
            refresh_interval_seconds: 0.1,
        };
        let pacing = Pacing::new(&config).unwrap();
        assert_eq!(pacing.chunks_per_batch, 5);

        let source = vec![0u8; 20 * 1024];
        let mut reader = source.as_slice();
        let mut sink = Vec::new();

        let summary = copy_paced(&mut reader, &mut sink, None, &config, &NoopObserver)
            .await
            .unwrap();

        assert_eq!(summary.total_bytes, 20 * 1024);
        // four full ticks of 5 KiB, then the empty tick that finds end of stream
        assert_eq!(summary.batches, 5);
        assert!(summary.elapsed >= pacing.batch_delay * 4);

        let ceiling = config.max_megabytes_per_second * BYTES_PER_MEGABYTE;
        let burst = pacing.max_batch_bytes(&config) as f64;
        let allowed = ceiling + burst / summary.elapsed.as_secs_f64();
        assert!(summary.average_bytes_per_second() <= allowed);
        assert!(summary.average_bytes_per_second() <= ceiling * 1.001);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_measured_speed_not_nominal_delay() {
        let config = DownloadConfig {
            buffer_size_bytes: 1024,
            max_megabytes_per_second: 1.0,
            refresh_interval_seconds: 0.5,
        };
        let source = vec![0u8; 2048];
        let mut reader = source.as_slice();
        let mut sink = Vec::new();
        let observer = RecordingObserver::default();

        copy_paced(&mut reader, &mut sink, None, &config, &observer)
            .await
            .unwrap();

        let snapshots = observer.snapshots.lock().unwrap();
        // 2 KiB over a 0.5s tick
        assert!((snapshots[0].bytes_per_second - 4096.0).abs() < 1.0);
        assert_eq!(snapshots.last().unwrap().bytes_per_second, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_reports_a_single_empty_batch() {
        let config = DownloadConfig::default();
        let source: Vec<u8> = Vec::new();
        let mut reader = source.as_slice();
        let mut sink = Vec::new();
        let observer = RecordingObserver::default();

        let summary = copy_paced(&mut reader, &mut sink, Some(0), &config, &observer)
            .await
            .unwrap();

        assert_eq!(summary.total_bytes, 0);
        assert_eq!(summary.batches, 1);
        assert_eq!(observer.snapshots.lock().unwrap().len(), 1);
    }
}
