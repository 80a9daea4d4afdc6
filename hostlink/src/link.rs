//! Byte-stream link shared by both ends.
//!
//! Any ordered, reliable duplex stream works: a UART or SPI driver exposed as
//! `AsyncRead + AsyncWrite`, a socket, or `tokio::io::duplex` in tests. Each
//! end splits the stream; outbound frames funnel through one writer task so
//! frames never interleave on the wire.

use std::io;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;

use crate::bridge::frame::{Frame, FrameCodec, FrameError};

/// Ordered duplex byte stream carrying frames.
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Link for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("link closed")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Write queued frames until every sender is dropped or the stream fails.
///
/// Frames that cannot be encoded are logged and skipped. Returns the number
/// of frames written.
pub(crate) async fn run_writer<W>(writer: W, mut outbound: mpsc::UnboundedReceiver<Frame>) -> u64
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, FrameCodec::new());
    let mut written = 0u64;

    while let Some(frame) = outbound.recv().await {
        let class = frame.class;
        match framed.send(frame).await {
            Ok(()) => written += 1,
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                tracing::warn!(?class, error = %e, "Dropping unencodable frame");
            }
            Err(e) => {
                tracing::error!(error = %e, "Link write failed");
                break;
            }
        }
    }

    tracing::debug!(written, "Link writer exiting");
    written
}
