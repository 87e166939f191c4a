//! Receiver-side reconstruction of files arriving over a data channel.
//!
//! Frames arrive in the order the sender produced them: `file-metadata`,
//! zero or more binary chunks, `file-end`. Small files are kept in memory,
//! large ones stream into a `.part` file that is renamed on completion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use quickshare_protocol::constants::{CONSOLIDATE_EVERY, DISK_STREAM_THRESHOLD};
use quickshare_protocol::{ControlMessage, FileEntry};

use crate::TransferError;
use crate::progress::{Direction, SpeedCalculator, TransferProgress, capped_percent};
use crate::sender::FileDescriptor;
use crate::validation::sanitize_file_name;
use crate::wake_lock::{NoopWakeLock, WakeLock, WakeLockGuard};

/// Where incoming files are buffered.
#[derive(Debug, Clone)]
pub struct StoragePolicy {
    /// Directory for streamed files. `None` keeps everything in memory.
    pub output_dir: Option<PathBuf>,
    /// Files of at least this many bytes stream to disk when a directory is set.
    pub disk_threshold: u64,
    /// In-memory chunks are merged after this many arrive.
    pub consolidate_every: usize,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            output_dir: None,
            disk_threshold: DISK_STREAM_THRESHOLD,
            consolidate_every: CONSOLIDATE_EVERY,
        }
    }
}

impl StoragePolicy {
    pub fn streaming_to(dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: Some(dir.into()),
            ..Self::default()
        }
    }
}

/// Contents of a finished file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactData {
    Memory(Bytes),
    /// Already written to this path.
    Disk(PathBuf),
}

/// A fully received file.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub name: String,
    pub size: u64,
    pub file_index: usize,
    pub total_files: usize,
    /// Hex SHA-256 of the contents.
    pub sha256: String,
    pub data: ArtifactData,
}

impl ReceivedFile {
    /// Stores the artifact in `dir` under a name that does not clobber
    /// existing files, returning the final path.
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf, TransferError> {
        tokio::fs::create_dir_all(dir).await?;
        match &self.data {
            ArtifactData::Disk(path) if path.parent() == Some(dir) => Ok(path.clone()),
            ArtifactData::Disk(path) => {
                let target = unique_path(dir, &self.name).await?;
                tokio::fs::rename(path, &target).await?;
                Ok(target)
            }
            ArtifactData::Memory(bytes) => {
                let target = unique_path(dir, &self.name).await?;
                tokio::fs::write(&target, bytes).await?;
                Ok(target)
            }
        }
    }
}

/// A transfer that ended without `file-end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupted {
    pub name: String,
    pub received: u64,
    pub total: u64,
}

/// Something the caller should surface.
#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    FileList(Vec<FileEntry>),
    Started(FileDescriptor),
    /// New metadata arrived before `file-end`: the earlier file was
    /// discarded and `next` has started in its place.
    Superseded {
        interrupted: Interrupted,
        next: FileDescriptor,
    },
    Progress(TransferProgress),
    Completed(ReceivedFile),
}

// ---------------------------------------------------------------------------
// Buffers
// ---------------------------------------------------------------------------

struct MemoryBuffer {
    parts: Vec<Bytes>,
    pending: Vec<Bytes>,
    consolidate_every: usize,
}

impl MemoryBuffer {
    fn new(consolidate_every: usize) -> Self {
        Self {
            parts: Vec::new(),
            pending: Vec::new(),
            consolidate_every: consolidate_every.max(1),
        }
    }

    fn push(&mut self, chunk: Bytes) {
        self.pending.push(chunk);
        if self.pending.len() >= self.consolidate_every {
            self.consolidate();
        }
    }

    fn consolidate(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let len = self.pending.iter().map(Bytes::len).sum();
        let mut merged = BytesMut::with_capacity(len);
        for chunk in self.pending.drain(..) {
            merged.extend_from_slice(&chunk);
        }
        self.parts.push(merged.freeze());
    }

    fn finish(mut self) -> Bytes {
        self.consolidate();
        match self.parts.len() {
            0 => Bytes::new(),
            1 => self.parts.remove(0),
            _ => {
                self.consolidate_every = 1;
                self.pending = std::mem::take(&mut self.parts);
                self.consolidate();
                self.parts.remove(0)
            }
        }
    }
}

struct DiskBuffer {
    dir: PathBuf,
    part_path: PathBuf,
    writer: BufWriter<tokio::fs::File>,
}

impl DiskBuffer {
    async fn create(dir: &Path, name: &str) -> Result<Self, TransferError> {
        tokio::fs::create_dir_all(dir).await?;
        let part_path = dir.join(format!("{name}.part"));
        let file = tokio::fs::File::create(&part_path).await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            part_path,
            writer: BufWriter::new(file),
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        self.writer.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(mut self, name: &str) -> Result<PathBuf, TransferError> {
        self.writer.flush().await?;
        self.writer.into_inner().sync_all().await?;
        let target = unique_path(&self.dir, name).await?;
        tokio::fs::rename(&self.part_path, &target).await?;
        Ok(target)
    }

    async fn discard(self) {
        drop(self.writer);
        if let Err(e) = tokio::fs::remove_file(&self.part_path).await {
            warn!(path = %self.part_path.display(), error = %e, "failed to remove partial file");
        }
    }
}

enum Buffer {
    Memory(MemoryBuffer),
    Disk(DiskBuffer),
}

impl Buffer {
    async fn discard(self) {
        if let Buffer::Disk(disk) = self {
            disk.discard().await;
        }
    }
}

/// Picks `dir/name`, or `dir/stem (n).ext` if that is taken.
async fn unique_path(dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 1u32;
    loop {
        let file = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(file);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

// ---------------------------------------------------------------------------
// ReconstructionEngine
// ---------------------------------------------------------------------------

struct ActiveFile {
    descriptor: FileDescriptor,
    buffer: Buffer,
    received: u64,
    hasher: Sha256,
    speed: SpeedCalculator,
    last_percent: u8,
    _wake: WakeLockGuard,
}

/// Rebuilds files from the control and binary frames of one data channel.
pub struct ReconstructionEngine {
    policy: StoragePolicy,
    wake_lock: Arc<dyn WakeLock>,
    active: Option<ActiveFile>,
}

impl ReconstructionEngine {
    pub fn new(policy: StoragePolicy) -> Self {
        Self {
            policy,
            wake_lock: Arc::new(NoopWakeLock),
            active: None,
        }
    }

    pub fn with_wake_lock(mut self, lock: Arc<dyn WakeLock>) -> Self {
        self.wake_lock = lock;
        self
    }

    /// True between `file-metadata` and `file-end`.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Handles a text frame.
    pub async fn handle_text(&mut self, text: &str) -> Result<Option<ReceiverEvent>, TransferError> {
        match ControlMessage::parse(text)? {
            ControlMessage::FileList { files } => Ok(Some(ReceiverEvent::FileList(files))),
            ControlMessage::FileMetadata {
                name,
                size,
                file_index,
                total_files,
            } => {
                let descriptor = FileDescriptor {
                    name: sanitize_file_name(&name)?,
                    size,
                    file_index,
                    total_files,
                };
                self.start(descriptor).await.map(Some)
            }
            ControlMessage::FileEnd => self.finish().await.map(Some),
            ControlMessage::DownloadRequest { .. } => {
                Err(TransferError::UnexpectedControl("download-request".into()))
            }
        }
    }

    /// Appends a binary chunk to the active file.
    pub async fn handle_binary(&mut self, chunk: Bytes) -> Result<Option<ReceiverEvent>, TransferError> {
        let Some(active) = self.active.as_mut() else {
            return Err(TransferError::UnexpectedChunk);
        };

        let total = active.descriptor.size;
        let received = active.received + chunk.len() as u64;
        if received > total {
            let err = TransferError::SizeMismatch {
                expected: total,
                actual: received,
            };
            self.abort().await;
            return Err(err);
        }

        active.hasher.update(&chunk);
        active.speed.record(chunk.len() as u64);
        let write = match &mut active.buffer {
            Buffer::Memory(mem) => {
                mem.push(chunk);
                Ok(())
            }
            Buffer::Disk(disk) => disk.write(&chunk).await,
        };
        if let Err(e) = write {
            self.abort().await;
            return Err(e);
        }
        active.received = received;

        let percent = capped_percent(received, total);
        if percent == active.last_percent {
            return Ok(None);
        }
        active.last_percent = percent;
        Ok(Some(ReceiverEvent::Progress(TransferProgress {
            direction: Direction::Receive,
            file_name: active.descriptor.name.clone(),
            file_index: active.descriptor.file_index,
            total_files: active.descriptor.total_files,
            bytes: received,
            total,
            percent,
            bytes_per_second: active.speed.bytes_per_second(),
        })))
    }

    /// Discards the file in progress, if any.
    ///
    /// Called when the channel closes before `file-end`; partial data is
    /// never surfaced as a finished file.
    pub async fn abort(&mut self) -> Option<Interrupted> {
        let active = self.active.take()?;
        warn!(
            file = %active.descriptor.name,
            received = active.received,
            total = active.descriptor.size,
            "transfer interrupted, discarding partial data"
        );
        let interrupted = Interrupted {
            name: active.descriptor.name.clone(),
            received: active.received,
            total: active.descriptor.size,
        };
        active.buffer.discard().await;
        Some(interrupted)
    }

    async fn start(&mut self, descriptor: FileDescriptor) -> Result<ReceiverEvent, TransferError> {
        let superseded = self.abort().await;

        let buffer = match &self.policy.output_dir {
            Some(dir) if descriptor.size >= self.policy.disk_threshold => {
                Buffer::Disk(DiskBuffer::create(dir, &descriptor.name).await?)
            }
            _ => Buffer::Memory(MemoryBuffer::new(self.policy.consolidate_every)),
        };
        debug!(
            file = %descriptor.name,
            size = descriptor.size,
            streaming = matches!(buffer, Buffer::Disk(_)),
            "receiving file"
        );

        let mut speed = SpeedCalculator::default();
        speed.record(0);
        self.active = Some(ActiveFile {
            descriptor: descriptor.clone(),
            buffer,
            received: 0,
            hasher: Sha256::new(),
            speed,
            last_percent: 0,
            _wake: WakeLockGuard::acquire(Arc::clone(&self.wake_lock)),
        });
        Ok(match superseded {
            Some(interrupted) => ReceiverEvent::Superseded {
                interrupted,
                next: descriptor,
            },
            None => ReceiverEvent::Started(descriptor),
        })
    }

    async fn finish(&mut self) -> Result<ReceiverEvent, TransferError> {
        let Some(active) = self.active.take() else {
            return Err(TransferError::UnexpectedControl("file-end".into()));
        };
        let ActiveFile {
            descriptor,
            buffer,
            received,
            hasher,
            ..
        } = active;

        if received != descriptor.size {
            buffer.discard().await;
            return Err(TransferError::SizeMismatch {
                expected: descriptor.size,
                actual: received,
            });
        }

        let data = match buffer {
            Buffer::Memory(mem) => ArtifactData::Memory(mem.finish()),
            Buffer::Disk(disk) => ArtifactData::Disk(disk.finish(&descriptor.name).await?),
        };
        let sha256 = hex::encode(hasher.finalize());
        info!(file = %descriptor.name, size = received, sha256 = %sha256, "file received");

        Ok(ReceiverEvent::Completed(ReceivedFile {
            name: descriptor.name,
            size: received,
            file_index: descriptor.file_index,
            total_files: descriptor.total_files,
            sha256,
            data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DataChannelSink;
    use crate::channel::mock::{Frame, MemoryChannel};
    use crate::sender::TransferEngine;
    use crate::source::FileSource;
    use crate::wake_lock::testing::CountingWakeLock;
    use std::io::Cursor;

    fn data(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 13 % 256) as u8).collect()
    }

    fn metadata(name: &str, size: u64) -> String {
        ControlMessage::FileMetadata {
            name: name.into(),
            size,
            file_index: 0,
            total_files: 1,
        }
        .to_json()
        .unwrap()
    }

    fn end() -> String {
        ControlMessage::FileEnd.to_json().unwrap()
    }

    fn completed(event: Option<ReceiverEvent>) -> ReceivedFile {
        match event {
            Some(ReceiverEvent::Completed(file)) => file,
            other => panic!("expected completion, got {other:?}"),
        }
    }

    fn digest(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    #[tokio::test]
    async fn reassembles_in_memory() {
        let bytes = data(1000);
        let mut engine = ReconstructionEngine::new(StoragePolicy {
            consolidate_every: 3,
            ..StoragePolicy::default()
        });

        engine.handle_text(&metadata("a.bin", 1000)).await.unwrap();
        for chunk in bytes.chunks(64) {
            engine.handle_binary(Bytes::copy_from_slice(chunk)).await.unwrap();
        }
        let file = completed(engine.handle_text(&end()).await.unwrap());

        assert_eq!(file.data, ArtifactData::Memory(Bytes::from(bytes.clone())));
        assert_eq!(file.size, 1000);
        assert_eq!(file.sha256, digest(&bytes));
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn streams_large_files_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = data(5000);
        let mut engine = ReconstructionEngine::new(StoragePolicy {
            disk_threshold: 1024,
            ..StoragePolicy::streaming_to(dir.path())
        });

        engine.handle_text(&metadata("big.bin", 5000)).await.unwrap();
        assert!(dir.path().join("big.bin.part").exists());
        for chunk in bytes.chunks(700) {
            engine.handle_binary(Bytes::copy_from_slice(chunk)).await.unwrap();
        }
        let file = completed(engine.handle_text(&end()).await.unwrap());

        let ArtifactData::Disk(path) = &file.data else {
            panic!("expected disk artifact");
        };
        assert_eq!(path, &dir.path().join("big.bin"));
        assert_eq!(std::fs::read(path).unwrap(), bytes);
        assert!(!dir.path().join("big.bin.part").exists());
    }

    #[tokio::test]
    async fn existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dup.txt"), b"old").unwrap();
        let mut engine = ReconstructionEngine::new(StoragePolicy {
            disk_threshold: 0,
            ..StoragePolicy::streaming_to(dir.path())
        });

        engine.handle_text(&metadata("dup.txt", 3)).await.unwrap();
        engine.handle_binary(Bytes::from_static(b"new")).await.unwrap();
        let file = completed(engine.handle_text(&end()).await.unwrap());

        assert_eq!(file.data, ArtifactData::Disk(dir.path().join("dup (1).txt")));
        assert_eq!(std::fs::read(dir.path().join("dup.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn zero_byte_file_completes_without_chunks() {
        let mut engine = ReconstructionEngine::new(StoragePolicy::default());
        let started = engine.handle_text(&metadata("empty", 0)).await.unwrap();
        assert!(matches!(started, Some(ReceiverEvent::Started(_))));
        let file = completed(engine.handle_text(&end()).await.unwrap());
        assert_eq!(file.size, 0);
        assert_eq!(file.data, ArtifactData::Memory(Bytes::new()));
    }

    #[tokio::test]
    async fn abort_mid_transfer_discards_partial_data() {
        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(CountingWakeLock::default());
        let mut engine = ReconstructionEngine::new(StoragePolicy {
            disk_threshold: 0,
            ..StoragePolicy::streaming_to(dir.path())
        })
        .with_wake_lock(lock.clone());

        engine.handle_text(&metadata("movie.mkv", 1000)).await.unwrap();
        assert_eq!(lock.held(), 1);
        engine.handle_binary(Bytes::from(data(400))).await.unwrap();

        let interrupted = engine.abort().await.unwrap();
        assert_eq!(
            interrupted,
            Interrupted {
                name: "movie.mkv".into(),
                received: 400,
                total: 1000,
            }
        );
        assert!(!engine.is_active());
        assert_eq!(lock.held(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // Nothing left to finish.
        assert!(engine.handle_text(&end()).await.is_err());
        assert!(engine.abort().await.is_none());
    }

    #[tokio::test]
    async fn new_metadata_mid_file_reports_the_discarded_one() {
        let mut engine = ReconstructionEngine::new(StoragePolicy::default());
        engine.handle_text(&metadata("a.bin", 100)).await.unwrap();
        engine.handle_binary(Bytes::from(data(10))).await.unwrap();

        let event = engine.handle_text(&metadata("b.bin", 5)).await.unwrap();
        let Some(ReceiverEvent::Superseded { interrupted, next }) = event else {
            panic!("expected the first file to be superseded");
        };
        assert_eq!(
            interrupted,
            Interrupted {
                name: "a.bin".into(),
                received: 10,
                total: 100,
            }
        );
        assert_eq!(next.name, "b.bin");

        engine.handle_binary(Bytes::from(data(5))).await.unwrap();
        let file = completed(engine.handle_text(&end()).await.unwrap());
        assert_eq!(file.name, "b.bin");
        assert_eq!(file.size, 5);
    }

    #[tokio::test]
    async fn progress_is_capped_until_end() {
        let mut engine = ReconstructionEngine::new(StoragePolicy::default());
        engine.handle_text(&metadata("a", 100)).await.unwrap();

        let event = engine.handle_binary(Bytes::from(data(50))).await.unwrap();
        let Some(ReceiverEvent::Progress(p)) = event else {
            panic!("expected progress");
        };
        assert_eq!(p.percent, 50);
        assert_eq!(p.direction, Direction::Receive);

        let event = engine.handle_binary(Bytes::from(data(50))).await.unwrap();
        let Some(ReceiverEvent::Progress(p)) = event else {
            panic!("expected progress");
        };
        assert_eq!(p.percent, 99);
        assert_eq!(p.bytes, 100);
    }

    #[tokio::test]
    async fn overflow_and_short_files_are_errors() {
        let mut engine = ReconstructionEngine::new(StoragePolicy::default());
        engine.handle_text(&metadata("a", 4)).await.unwrap();
        let err = engine.handle_binary(Bytes::from(data(5))).await.unwrap_err();
        assert!(matches!(err, TransferError::SizeMismatch { expected: 4, actual: 5 }));
        assert!(!engine.is_active());

        engine.handle_text(&metadata("b", 4)).await.unwrap();
        engine.handle_binary(Bytes::from(data(2))).await.unwrap();
        let err = engine.handle_text(&end()).await.unwrap_err();
        assert!(matches!(err, TransferError::SizeMismatch { expected: 4, actual: 2 }));
    }

    #[tokio::test]
    async fn rejects_out_of_order_and_unknown_frames() {
        let mut engine = ReconstructionEngine::new(StoragePolicy::default());
        assert!(matches!(
            engine.handle_binary(Bytes::from_static(b"x")).await,
            Err(TransferError::UnexpectedChunk)
        ));
        assert!(matches!(
            engine.handle_text(r#"{"type":"bogus"}"#).await,
            Err(TransferError::Protocol(_))
        ));
        assert!(matches!(
            engine.handle_text(r#"{"type":"download-request","fileIndex":0}"#).await,
            Err(TransferError::UnexpectedControl(_))
        ));
    }

    #[tokio::test]
    async fn metadata_names_are_sanitized() {
        let mut engine = ReconstructionEngine::new(StoragePolicy::default());
        let event = engine.handle_text(&metadata("../../etc/passwd", 1)).await.unwrap();
        let Some(ReceiverEvent::Started(d)) = event else {
            panic!("expected start");
        };
        assert_eq!(d.name, "passwd");
        assert!(engine.handle_text(&metadata("..", 1)).await.is_err());
    }

    #[tokio::test]
    async fn file_list_is_passed_through() {
        let mut engine = ReconstructionEngine::new(StoragePolicy::default());
        let files = vec![FileEntry {
            name: "x".into(),
            size: 1,
            index: 0,
        }];
        let text = ControlMessage::FileList {
            files: files.clone(),
        }
        .to_json()
        .unwrap();
        let Some(ReceiverEvent::FileList(got)) = engine.handle_text(&text).await.unwrap() else {
            panic!("expected file list");
        };
        assert_eq!(got, files);
    }

    #[tokio::test]
    async fn sender_output_rebuilds_byte_for_byte() {
        let channel = Arc::new(MemoryChannel::new("r1"));
        let bytes = data(700 * 1024 + 17);
        let descriptor = FileDescriptor {
            name: "photo.raw".into(),
            size: bytes.len() as u64,
            file_index: 0,
            total_files: 1,
        };
        TransferEngine::default()
            .send_file(
                &[Arc::clone(&channel) as Arc<dyn DataChannelSink>],
                &descriptor,
                FileSource::new(Cursor::new(bytes.clone()), bytes.len() as u64),
            )
            .await
            .unwrap();

        let mut engine = ReconstructionEngine::new(StoragePolicy::default());
        let mut result = None;
        for frame in channel.frames() {
            let event = match frame {
                Frame::Text(t) => engine.handle_text(&t).await.unwrap(),
                Frame::Binary(b) => engine.handle_binary(b).await.unwrap(),
            };
            if let Some(ReceiverEvent::Completed(file)) = event {
                result = Some(file);
            }
        }

        let file = result.unwrap();
        assert_eq!(file.data, ArtifactData::Memory(Bytes::from(bytes.clone())));
        assert_eq!(file.sha256, digest(&bytes));
    }

    #[tokio::test]
    async fn save_to_writes_memory_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let file = ReceivedFile {
            name: "note.txt".into(),
            size: 2,
            file_index: 0,
            total_files: 1,
            sha256: digest(b"hi"),
            data: ArtifactData::Memory(Bytes::from_static(b"hi")),
        };
        let first = file.save_to(dir.path()).await.unwrap();
        let second = file.save_to(dir.path()).await.unwrap();
        assert_eq!(first, dir.path().join("note.txt"));
        assert_eq!(second, dir.path().join("note (1).txt"));
        assert_eq!(std::fs::read(second).unwrap(), b"hi");
    }
}
