//! The data-channel seam the transfer engine drives.
//!
//! The engine only needs to know whether a channel is open, how many bytes
//! it still has queued, and how to push text and binary frames. The WebRTC
//! implementation lives in the peer crate.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::TransferError;

/// A boxed future returned by channel methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One reliable, ordered, already-negotiated data channel.
pub trait DataChannelSink: Send + Sync {
    /// Identifier used in logs and reports (the remote peer id).
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Bytes queued locally and not yet handed to the transport.
    fn buffered_amount(&self) -> ChannelFuture<'_, usize>;

    fn send_text(&self, text: String) -> ChannelFuture<'_, Result<(), TransferError>>;

    fn send_binary(&self, data: Bytes) -> ChannelFuture<'_, Result<(), TransferError>>;
}
