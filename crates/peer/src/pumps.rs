//! WebSocket pumps for the signaling client.

pub(crate) mod read;
pub(crate) mod write;
