//! Data-plane handoff.
//!
//! Data frames bypass the command path entirely. The receive dispatcher hands
//! each one to a [`DataPlane`] keyed by the interface id in the frame header.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Consumer of data-plane frames, usually a virtual network device.
///
/// `forward` runs on the receive dispatcher and must not block.
pub trait DataPlane: Send + Sync + 'static {
    fn forward(&self, interface: u8, payload: Bytes);
}

/// Drops every data frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardDataPlane;

impl DataPlane for DiscardDataPlane {
    fn forward(&self, interface: u8, payload: Bytes) {
        tracing::trace!(interface, len = payload.len(), "Discarding data frame");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub interface: u8,
    pub payload: Bytes,
}

impl DataPlane for mpsc::UnboundedSender<DataFrame> {
    fn forward(&self, interface: u8, payload: Bytes) {
        if self.send(DataFrame { interface, payload }).is_err() {
            tracing::debug!(interface, "Data plane receiver dropped - discarding frame");
        }
    }
}
