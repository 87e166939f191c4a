//! Adaptive file transfer over ordered, reliable data channels.
//!
//! The sender side ([`TransferEngine`]) sizes chunks from measured
//! throughput and paces itself on the channel's buffered amount. The
//! receiver side ([`ReconstructionEngine`]) rebuilds each file in memory or
//! on disk and never reports a partial file as complete.

pub mod adaptive;
pub mod channel;
pub mod flow;
mod progress;
pub mod receiver;
pub mod sender;
mod source;
mod validation;
mod wake_lock;

use std::path::PathBuf;

use quickshare_protocol::ProtocolError;

pub use adaptive::{ChunkSizer, TransferTuning};
pub use channel::{ChannelFuture, DataChannelSink};
pub use flow::FlowDecision;
pub use progress::{Direction, ProgressCallback, SpeedCalculator, TransferProgress, capped_percent};
pub use receiver::{
    ArtifactData, Interrupted, ReceivedFile, ReceiverEvent, ReconstructionEngine, StoragePolicy,
};
pub use sender::{FileDescriptor, SourceFile, TransferEngine, TransferReport, file_entries};
pub use source::FileSource;
pub use validation::sanitize_file_name;
pub use wake_lock::{NoopWakeLock, WakeLock, WakeLockGuard};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("data channel closed: {0}")]
    ChannelClosed(String),

    #[error("data channel error: {0}")]
    Channel(String),

    #[error("no open data channel")]
    NoOpenChannel,

    #[error("every data channel closed during the transfer")]
    AllChannelsClosed,

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("binary chunk received outside a file transfer")]
    UnexpectedChunk,

    #[error("unexpected control message: {0}")]
    UnexpectedControl(String),

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("file index out of range: {0}")]
    FileIndexOutOfRange(usize),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),
}
