use std::time::Duration;

// ---------------------------------------------------------------------------
// Signaling transport
// ---------------------------------------------------------------------------

/// Time to wait for a pong response (or any incoming message).
///
/// Acts as a read deadline: if nothing arrives within this window the
/// signaling connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(25);

/// Maximum signaling message size in bytes (1 MiB).
///
/// SDP blobs with gathered candidates stay well below this.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Error message sent when a room code does not denote a live room.
pub const ERR_ROOM_NOT_FOUND: &str = "Room not found";

/// Error message sent when `create-room` names a code owned by another sender.
pub const ERR_ROOM_TAKEN: &str = "Room code already in use";

/// Error message sent when a connection relays into a room it never joined.
pub const ERR_NOT_MEMBER: &str = "Not a member of this room";

/// Error message sent for unrecognized signaling events.
pub const ERR_UNKNOWN_EVENT: &str = "Unknown message type";

// ---------------------------------------------------------------------------
// Peer connection
// ---------------------------------------------------------------------------

/// Label of the single reliable, ordered data channel.
pub const DATA_CHANNEL_LABEL: &str = "fileTransfer";

/// Grace period for ICE gathering before an offer or answer is sent.
pub const ICE_GATHERING_GRACE: Duration = Duration::from_secs(3);

/// Default wait for a data channel to reach `open`.
pub const DATA_CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(15);

/// A connection attempt that has not reached `connected` by now times out.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// ICE restart attempts after a `disconnected` transition.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Linear backoff step between ICE restarts (delay = step * attempt).
pub const RECONNECT_BACKOFF_STEP: Duration = Duration::from_secs(2);

/// Delay between `room-joined` and `request-offer` on the receiver side.
pub const OFFER_REQUEST_DELAY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Transfer engine
// ---------------------------------------------------------------------------

/// Smallest chunk the adaptive sizer will produce (16 KiB).
pub const MIN_CHUNK_SIZE: usize = 16 * 1024;

/// Initial chunk size (128 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Largest chunk the adaptive sizer will produce (512 KiB).
pub const MAX_CHUNK_SIZE: usize = 512 * 1024;

/// Buffered amount above which chunks shrink (512 KiB).
pub const OPTIMAL_BUFFER_SIZE: usize = 512 * 1024;

/// Hard ceiling for the channel's pending-send buffer (1 MiB).
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Buffered amount under which chunks are sent immediately (256 KiB).
pub const BUFFER_LOW_THRESHOLD: usize = 256 * 1024;

/// Geometric growth factor when the channel drains fast.
pub const RAMP_UP_FACTOR: f64 = 1.25;

/// Geometric shrink factor when the buffer is above optimal.
pub const RAMP_DOWN_FACTOR: f64 = 0.8;

/// Throughput (bytes/s) considered "high" for ramp-up decisions (2 MiB/s).
pub const HIGH_THROUGHPUT: f64 = 2.0 * 1024.0 * 1024.0;

/// Minimum measurement window before the chunk size is retuned.
pub const RETUNE_INTERVAL: Duration = Duration::from_millis(100);

/// The receiver folds its in-memory chunk list every this many chunks.
pub const CONSOLIDATE_EVERY: usize = 100;

/// Files above this size stream straight to disk on the receiver (50 MiB).
pub const DISK_STREAM_THRESHOLD: u64 = 50 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Characters a room code is drawn from.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
