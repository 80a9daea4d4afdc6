//! Controller-side receive dispatcher.
//!
//! Routes every inbound frame by header class alone: command responses to
//! the transaction manager, events to the event channel, data frames to the
//! data plane. Nothing a frame carries can stop the loop; only the link
//! closing or losing sync ends it, and that fails every outstanding command.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::bridge::frame::{Frame, FrameClass, FrameCodec};
use crate::data::DataPlane;
use crate::events::{EventRecord, EventSender};
use crate::slot::SlotHandle;
use crate::transaction::{CommandError, TransactionManager};

/// Where a frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Response(SlotHandle),
    Event,
    Data,
    Discarded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub responses: u64,
    pub events: u64,
    pub data: u64,
    pub discarded: u64,
}

impl DispatchStats {
    fn record(&mut self, routed: Routed) {
        match routed {
            Routed::Response(_) => self.responses += 1,
            Routed::Event => self.events += 1,
            Routed::Data => self.data += 1,
            Routed::Discarded => self.discarded += 1,
        }
    }
}

pub struct ReceiveDispatcher {
    manager: TransactionManager,
    events: EventSender,
    data_plane: Arc<dyn DataPlane>,
}

impl ReceiveDispatcher {
    pub fn new(
        manager: TransactionManager,
        events: EventSender,
        data_plane: Arc<dyn DataPlane>,
    ) -> Self {
        Self {
            manager,
            events,
            data_plane,
        }
    }

    pub fn route(&self, frame: Frame) -> Routed {
        match frame.class {
            FrameClass::CommandResponse => match self.manager.complete_active(frame.payload) {
                Ok(slot) => Routed::Response(slot),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unmatched command response");
                    Routed::Discarded
                }
            },
            FrameClass::Event => {
                let record = EventRecord::new(frame.interface, frame.payload);
                if self.events.send(record).is_err() {
                    tracing::debug!(
                        interface = frame.interface,
                        "Event worker gone, dropping event"
                    );
                    return Routed::Discarded;
                }
                Routed::Event
            }
            FrameClass::Data => {
                self.data_plane.forward(frame.interface, frame.payload);
                Routed::Data
            }
        }
    }

    /// Route frames until the link closes.
    pub async fn run<R>(self, mut reader: FramedRead<R, FrameCodec>) -> DispatchStats
    where
        R: AsyncRead + Unpin,
    {
        let mut stats = DispatchStats::default();

        loop {
            match reader.next().await {
                Some(Ok(Ok(frame))) => {
                    let routed = self.route(frame);
                    stats.record(routed);
                }
                Some(Ok(Err(e))) => {
                    tracing::warn!(error = %e, "Discarding malformed frame");
                    stats.discarded += 1;
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Link read failed");
                    break;
                }
                None => {
                    tracing::info!("Link closed by peer");
                    break;
                }
            }
        }

        self.manager.fail_all(CommandError::LinkClosed);
        tracing::debug!(?stats, "Receive dispatcher exiting");
        stats
    }
}
