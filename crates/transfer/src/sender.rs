//! Sender side of the data-channel transfer.
//!
//! One [`TransferEngine`] drives any number of open channels at once. Each
//! file goes out as `file-metadata`, binary chunks in offset order, then
//! `file-end`, with identical frames on every channel. Pacing follows the
//! channel with the most bytes still queued.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use quickshare_protocol::{ControlMessage, FileEntry};

use crate::TransferError;
use crate::adaptive::{ChunkSizer, TransferTuning};
use crate::channel::DataChannelSink;
use crate::flow::{self, FlowDecision};
use crate::progress::{Direction, ProgressCallback, SpeedCalculator, TransferProgress, capped_percent};
use crate::source::FileSource;
use crate::wake_lock::{NoopWakeLock, WakeLock, WakeLockGuard};

/// Name, size and position of the file being transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    pub file_index: usize,
    pub total_files: usize,
}

impl FileDescriptor {
    pub fn metadata_message(&self) -> ControlMessage {
        ControlMessage::FileMetadata {
            name: self.name.clone(),
            size: self.size,
            file_index: self.file_index,
            total_files: self.total_files,
        }
    }
}

/// A local file offered for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl SourceFile {
    /// Stats `path` and uses its final component as the offered name.
    pub async fn from_path(path: &Path) -> Result<Self, TransferError> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(TransferError::NotAFile(path.to_path_buf()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::NotAFile(path.to_path_buf()))?;
        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: meta.len(),
        })
    }
}

/// Builds the `file-list` entries for `files`.
pub fn file_entries(files: &[SourceFile]) -> Vec<FileEntry> {
    files
        .iter()
        .enumerate()
        .map(|(index, f)| FileEntry {
            name: f.name.clone(),
            size: f.size,
            index,
        })
        .collect()
}

/// Outcome of one file broadcast.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub file_name: String,
    pub bytes_sent: u64,
    pub elapsed: Duration,
    /// Bytes per second over the whole file.
    pub average_throughput: f64,
    /// Largest buffered amount observed on any channel.
    pub peak_buffered: usize,
    /// Channels that received the whole file.
    pub completed: Vec<String>,
    /// Channels dropped before `file-end`.
    pub failed: Vec<String>,
}

/// Broadcasts files over open data channels with adaptive chunking.
pub struct TransferEngine {
    tuning: TransferTuning,
    wake_lock: Arc<dyn WakeLock>,
    on_progress: Option<ProgressCallback>,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(TransferTuning::default())
    }
}

impl TransferEngine {
    pub fn new(tuning: TransferTuning) -> Self {
        Self {
            tuning,
            wake_lock: Arc::new(NoopWakeLock),
            on_progress: None,
        }
    }

    pub fn with_wake_lock(mut self, lock: Arc<dyn WakeLock>) -> Self {
        self.wake_lock = lock;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Announces the available files. Returns how many channels got it.
    pub async fn send_file_list(
        &self,
        channels: &[Arc<dyn DataChannelSink>],
        files: &[FileEntry],
    ) -> Result<usize, TransferError> {
        let text = ControlMessage::FileList {
            files: files.to_vec(),
        }
        .to_json()?;
        let mut live = open_channels(channels);
        let mut failed = Vec::new();
        broadcast_text(&mut live, &mut failed, &text).await?;
        debug!(files = files.len(), channels = live.len(), "file list sent");
        Ok(live.len())
    }

    /// Sends every file in order, stopping at the first file that reaches
    /// no channel at all.
    pub async fn send_all(
        &self,
        channels: &[Arc<dyn DataChannelSink>],
        files: &[SourceFile],
    ) -> Result<Vec<TransferReport>, TransferError> {
        let mut live: Vec<Arc<dyn DataChannelSink>> = channels.to_vec();
        let mut reports = Vec::with_capacity(files.len());
        for index in 0..files.len() {
            let report = self.send_indexed(&live, files, index).await?;
            live.retain(|c| !report.failed.iter().any(|f| f == c.label()));
            reports.push(report);
        }
        Ok(reports)
    }

    /// Sends `files[index]` as part of a batch of `files.len()`.
    pub async fn send_indexed(
        &self,
        channels: &[Arc<dyn DataChannelSink>],
        files: &[SourceFile],
        index: usize,
    ) -> Result<TransferReport, TransferError> {
        let file = files
            .get(index)
            .ok_or(TransferError::FileIndexOutOfRange(index))?;
        let source = FileSource::open(&file.path).await?;
        let descriptor = FileDescriptor {
            name: file.name.clone(),
            size: source.size(),
            file_index: index,
            total_files: files.len(),
        };
        self.send_file(channels, &descriptor, source).await
    }

    /// Streams one file to every open channel.
    ///
    /// A channel that fails mid-transfer is dropped and listed in the
    /// report; the call only fails when no channel is left.
    pub async fn send_file<R>(
        &self,
        channels: &[Arc<dyn DataChannelSink>],
        descriptor: &FileDescriptor,
        mut source: FileSource<R>,
    ) -> Result<TransferReport, TransferError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut live = open_channels(channels);
        let mut failed: Vec<String> = channels
            .iter()
            .filter(|c| !c.is_open())
            .map(|c| c.label().to_string())
            .collect();
        if live.is_empty() {
            return Err(TransferError::NoOpenChannel);
        }

        let _wake = WakeLockGuard::acquire(Arc::clone(&self.wake_lock));
        let started = Instant::now();
        info!(
            file = %descriptor.name,
            size = descriptor.size,
            channels = live.len(),
            "starting transfer"
        );

        let metadata = descriptor.metadata_message().to_json()?;
        broadcast_text(&mut live, &mut failed, &metadata).await?;
        self.report(descriptor, 0, 0, 0.0);

        let mut sizer = ChunkSizer::starting_at(self.tuning.clone(), started);
        let mut speed = SpeedCalculator::default();
        speed.record_at(0, started);
        let mut sent: u64 = 0;
        let mut last_percent = 0u8;

        while sent < descriptor.size {
            prune_closed(&mut live, &mut failed)?;
            let buffered = max_buffered(&live).await;
            sizer.observe(buffered);

            if let FlowDecision::Wait(delay) = flow::decide(buffered, &mut sizer) {
                tokio::time::sleep(delay).await;
                continue;
            }

            let Some(chunk) = source.next_chunk(sizer.current()).await? else {
                break;
            };
            let len = chunk.len();
            broadcast_binary(&mut live, &mut failed, chunk).await?;
            sent += len as u64;

            let now = Instant::now();
            sizer.record_sent(len);
            speed.record_at(len as u64, now);
            let after = max_buffered(&live).await;
            sizer.maybe_retune(after, now);

            if after < sizer.tuning().low_threshold {
                source.prefetch(sizer.current());
            }

            let percent = capped_percent(sent, descriptor.size);
            if percent != last_percent {
                last_percent = percent;
                self.report(descriptor, sent, percent, speed.bytes_per_second());
            }
        }

        if sent != descriptor.size {
            return Err(TransferError::SizeMismatch {
                expected: descriptor.size,
                actual: sent,
            });
        }

        let end = ControlMessage::FileEnd.to_json()?;
        broadcast_text(&mut live, &mut failed, &end).await?;

        let elapsed = started.elapsed();
        let average_throughput = if elapsed.is_zero() {
            0.0
        } else {
            sent as f64 / elapsed.as_secs_f64()
        };
        self.report(descriptor, sent, 100, average_throughput);

        info!(
            file = %descriptor.name,
            mib_per_sec = format_args!("{:.2}", average_throughput / (1024.0 * 1024.0)),
            peak_buffer_kib = sizer.high_water_mark() / 1024,
            failed = failed.len(),
            "transfer complete"
        );

        Ok(TransferReport {
            file_name: descriptor.name.clone(),
            bytes_sent: sent,
            elapsed,
            average_throughput,
            peak_buffered: sizer.high_water_mark(),
            completed: live.iter().map(|c| c.label().to_string()).collect(),
            failed,
        })
    }

    fn report(&self, d: &FileDescriptor, bytes: u64, percent: u8, bytes_per_second: f64) {
        if let Some(cb) = &self.on_progress {
            cb(TransferProgress {
                direction: Direction::Send,
                file_name: d.name.clone(),
                file_index: d.file_index,
                total_files: d.total_files,
                bytes,
                total: d.size,
                percent,
                bytes_per_second,
            });
        }
    }
}

fn open_channels(channels: &[Arc<dyn DataChannelSink>]) -> Vec<Arc<dyn DataChannelSink>> {
    channels.iter().filter(|c| c.is_open()).cloned().collect()
}

/// Removes channels that closed since the last look, so a dead receiver
/// never holds the flow gate shut.
fn prune_closed(live: &mut Vec<Arc<dyn DataChannelSink>>, failed: &mut Vec<String>) -> Result<(), TransferError> {
    live.retain(|channel| {
        let open = channel.is_open();
        if !open {
            drop_channel(failed, channel, "closed");
        }
        open
    });
    ensure_live(live)
}

async fn max_buffered(live: &[Arc<dyn DataChannelSink>]) -> usize {
    let mut max = 0;
    for channel in live {
        max = max.max(channel.buffered_amount().await);
    }
    max
}

/// Sends `text` on every live channel, dropping the ones that fail.
async fn broadcast_text(
    live: &mut Vec<Arc<dyn DataChannelSink>>,
    failed: &mut Vec<String>,
    text: &str,
) -> Result<(), TransferError> {
    let mut survivors = Vec::with_capacity(live.len());
    for channel in live.drain(..) {
        if !channel.is_open() {
            drop_channel(failed, &channel, "closed");
            continue;
        }
        match channel.send_text(text.to_string()).await {
            Ok(()) => survivors.push(channel),
            Err(e) => drop_channel(failed, &channel, &e.to_string()),
        }
    }
    *live = survivors;
    ensure_live(live)
}

/// Sends one chunk on every live channel, dropping the ones that fail.
async fn broadcast_binary(
    live: &mut Vec<Arc<dyn DataChannelSink>>,
    failed: &mut Vec<String>,
    chunk: Bytes,
) -> Result<(), TransferError> {
    let mut survivors = Vec::with_capacity(live.len());
    for channel in live.drain(..) {
        if !channel.is_open() {
            drop_channel(failed, &channel, "closed");
            continue;
        }
        match channel.send_binary(chunk.clone()).await {
            Ok(()) => survivors.push(channel),
            Err(e) => drop_channel(failed, &channel, &e.to_string()),
        }
    }
    *live = survivors;
    ensure_live(live)
}

fn drop_channel(failed: &mut Vec<String>, channel: &Arc<dyn DataChannelSink>, reason: &str) {
    warn!(channel = channel.label(), reason, "dropping channel from transfer");
    failed.push(channel.label().to_string());
}

fn ensure_live(live: &[Arc<dyn DataChannelSink>]) -> Result<(), TransferError> {
    if live.is_empty() {
        Err(TransferError::AllChannelsClosed)
    } else {
        Ok(())
    }
}
