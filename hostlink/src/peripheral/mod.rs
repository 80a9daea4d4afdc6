//! Peripheral side of the link.
//!
//! # Architecture
//!
//! - **dispatch**: request message type → handler table
//! - **handlers**: WiFi command handlers and the station connect state machine
//! - **wifi**: the injected WiFi capability trait
//! - **sim**: in-memory capability for hosts without a radio
//!
//! [`Peripheral::run`] owns the link. Requests are handled one at a time by a
//! single handler task, so each request's response is written before the next
//! request is decoded. WiFi events are forwarded as event frames as they
//! happen, independent of the request queue.

pub mod dispatch;
pub mod handlers;
pub mod sim;
pub mod wifi;

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use crate::bridge::envelope::Event;
use crate::bridge::frame::{Frame, FrameClass, FrameCodec};
use crate::config::PeripheralConfig;
use crate::data::{DataPlane, DiscardDataPlane};
use crate::link::{Link, run_writer};

pub use dispatch::{CommandHandler, DispatchTable, HandlerError};
pub use handlers::{LinkState, WifiCommands, register_wifi_handlers};
pub use sim::SimulatedWifi;
pub use wifi::{WifiCapability, WifiError};

/// Counters returned when the link closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeripheralStats {
    /// Requests read off the link.
    pub requests: u64,
    /// Responses written back.
    pub responses: u64,
    pub events: u64,
    pub data: u64,
    pub discarded: u64,
}

pub struct Peripheral {
    table: DispatchTable,
    wifi: Arc<dyn WifiCapability>,
    commands: Option<Arc<WifiCommands>>,
    config: PeripheralConfig,
    data_plane: Arc<dyn DataPlane>,
}

impl Peripheral {
    /// Peripheral serving `table`. Events from `wifi` are still forwarded.
    pub fn new(
        table: DispatchTable,
        wifi: Arc<dyn WifiCapability>,
        config: PeripheralConfig,
    ) -> Self {
        Self {
            table,
            wifi,
            commands: None,
            config,
            data_plane: Arc::new(DiscardDataPlane),
        }
    }

    /// Peripheral with the WiFi command handlers registered.
    pub fn with_wifi(wifi: Arc<dyn WifiCapability>, config: PeripheralConfig) -> Self {
        let commands = Arc::new(WifiCommands::new(Arc::clone(&wifi), config.clone()));
        let mut table = DispatchTable::new();
        register_wifi_handlers(&mut table, Arc::clone(&commands));

        let mut peripheral = Self::new(table, wifi, config);
        peripheral.commands = Some(commands);
        peripheral
    }

    pub fn with_data_plane(mut self, data_plane: Arc<dyn DataPlane>) -> Self {
        self.data_plane = data_plane;
        self
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// For registering additional command families before `run`.
    pub fn table_mut(&mut self) -> &mut DispatchTable {
        &mut self.table
    }

    /// WiFi handlers, when built with [`with_wifi`](Self::with_wifi).
    pub fn wifi_commands(&self) -> Option<&Arc<WifiCommands>> {
        self.commands.as_ref()
    }

    pub fn spawn<L: Link>(self, link: L) -> JoinHandle<PeripheralStats> {
        tokio::spawn(self.run(link))
    }

    /// Serve requests until the controller closes the link.
    pub async fn run<L: Link>(self, link: L) -> PeripheralStats {
        let Self {
            table,
            wifi,
            config,
            data_plane,
            ..
        } = self;
        let (read_half, write_half) = tokio::io::split(link);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(write_half, outbound_rx));

        let (request_tx, request_rx) = mpsc::channel::<Bytes>(config.request_queue.max(1));
        let handler = tokio::spawn(handle_requests(table, request_rx, outbound_tx.clone()));
        let (stop_tx, stop_rx) = oneshot::channel();
        let forwarder = tokio::spawn(forward_events(wifi.subscribe(), outbound_tx, stop_rx));

        let mut stats = PeripheralStats::default();
        let mut reader = FramedRead::new(read_half, FrameCodec::new());

        loop {
            match reader.next().await {
                Some(Ok(Ok(frame))) => match frame.class {
                    FrameClass::CommandResponse => {
                        stats.requests += 1;
                        if request_tx.send(frame.payload).await.is_err() {
                            tracing::error!("Request handler exited - closing link");
                            break;
                        }
                    }
                    FrameClass::Data => {
                        stats.data += 1;
                        data_plane.forward(frame.interface, frame.payload);
                    }
                    FrameClass::Event => {
                        tracing::warn!("Controller sent an event frame - discarding");
                        stats.discarded += 1;
                    }
                },
                Some(Ok(Err(e))) => {
                    tracing::warn!(error = %e, "Discarding malformed frame");
                    stats.discarded += 1;
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Link read failed");
                    break;
                }
                None => {
                    tracing::info!("Controller closed the link");
                    break;
                }
            }
        }

        // Drain queued requests, then let the writer run dry.
        drop(request_tx);
        stats.responses = handler.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Request handler task failed");
            0
        });
        let _ = stop_tx.send(());
        stats.events = forwarder.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Event forwarder task failed");
            0
        });
        if let Err(e) = writer.await {
            tracing::error!(error = %e, "Link writer task failed");
        }

        tracing::debug!(?stats, "Peripheral exiting");
        stats
    }
}

impl std::fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripheral")
            .field("table", &self.table)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn handle_requests(
    table: DispatchTable,
    mut requests: mpsc::Receiver<Bytes>,
    outbound: mpsc::UnboundedSender<Frame>,
) -> u64 {
    let mut responses = 0u64;
    while let Some(request) = requests.recv().await {
        let response = table.dispatch_frame(&request).await;
        if outbound.send(Frame::command(response)).is_err() {
            tracing::warn!("Link writer gone - dropping response");
            break;
        }
        responses += 1;
    }
    responses
}

/// Forward WiFi events until `stop` fires; the event stream never ends on its own.
async fn forward_events(
    mut events: broadcast::Receiver<Event>,
    outbound: mpsc::UnboundedSender<Frame>,
    mut stop: oneshot::Receiver<()>,
) -> u64 {
    let mut forwarded = 0u64;

    loop {
        let received = tokio::select! {
            biased;
            _ = &mut stop => break,
            received = events.recv() => received,
        };

        match received {
            Ok(event) => {
                let payload = match event.encode() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(?event, error = %e, "Failed to encode event");
                        continue;
                    }
                };
                tracing::debug!(msg_type = event.msg_type(), "Forwarding event");
                if outbound.send(Frame::event(payload)).is_err() {
                    break;
                }
                forwarded += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event forwarder lagged - events lost");
            }
            Err(RecvError::Closed) => break,
        }
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use futures::SinkExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::bridge::envelope::{RequestEnvelope, ResponseEnvelope};
    use crate::bridge::protocol::{FailureStatus, MacAddress, WifiInterface};
    use crate::data::DataFrame;

    const MAC: MacAddress = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

    async fn next_frame<R: tokio::io::AsyncRead + Unpin>(
        reader: &mut FramedRead<R, FrameCodec>,
    ) -> Frame {
        reader.next().await.unwrap().unwrap().unwrap()
    }

    #[tokio::test]
    async fn answers_requests_in_order() {
        let wifi = Arc::new(SimulatedWifi::new(MAC));
        let peripheral = Peripheral::with_wifi(wifi, PeripheralConfig::new());
        let (near, far) = tokio::io::duplex(4096);
        let task = peripheral.spawn(far);

        let (read_half, write_half) = tokio::io::split(near);
        let mut writer = FramedWrite::new(write_half, FrameCodec::new());
        let mut reader = FramedRead::new(read_half, FrameCodec::new());

        for request in [
            RequestEnvelope::GetMacAddress {
                interface: WifiInterface::Station,
            },
            RequestEnvelope::DisconnectAp,
        ] {
            writer
                .send(Frame::command(request.encode().unwrap()))
                .await
                .unwrap();
        }

        let first = ResponseEnvelope::decode(&next_frame(&mut reader).await.payload).unwrap();
        assert_eq!(
            first,
            ResponseEnvelope::GetMacAddress {
                mac: "aa:bb:cc:dd:ee:ff".to_string()
            }
        );
        let second = ResponseEnvelope::decode(&next_frame(&mut reader).await.payload).unwrap();
        assert!(matches!(
            second,
            ResponseEnvelope::Failure {
                request: 14,
                status: FailureStatus::InvalidState,
                ..
            }
        ));

        drop(writer);
        drop(reader);
        let stats = task.await.unwrap();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.responses, 2);
    }

    #[tokio::test]
    async fn forwards_wifi_events_and_data() {
        let wifi = Arc::new(SimulatedWifi::new(MAC));
        let (data_tx, mut data_rx) = mpsc::unbounded_channel::<DataFrame>();
        let peripheral = Peripheral::with_wifi(wifi.clone(), PeripheralConfig::new())
            .with_data_plane(Arc::new(data_tx));
        let (near, far) = tokio::io::duplex(4096);
        let task = peripheral.spawn(far);

        let (read_half, write_half) = tokio::io::split(near);
        let mut writer = FramedWrite::new(write_half, FrameCodec::new());
        let mut reader = FramedRead::new(read_half, FrameCodec::new());

        writer.send(Frame::data(1, vec![1, 2, 3])).await.unwrap();
        assert_eq!(
            data_rx.recv().await.unwrap(),
            DataFrame {
                interface: 1,
                payload: Bytes::from_static(&[1, 2, 3])
            }
        );

        // A round trip proves `run` has subscribed to the event stream.
        writer
            .send(Frame::command(RequestEnvelope::GetWifiMode.encode().unwrap()))
            .await
            .unwrap();
        let frame = next_frame(&mut reader).await;
        assert_eq!(frame.class, FrameClass::CommandResponse);

        let peer = MacAddress::new([2, 0, 0, 0, 0, 9]);
        wifi.join_station(peer, 1);
        let frame = next_frame(&mut reader).await;
        assert_eq!(frame.class, FrameClass::Event);
        assert_eq!(
            Event::decode(&frame.payload).unwrap(),
            Event::SoftApStationJoined { mac: peer, aid: 1 }
        );

        drop(writer);
        drop(reader);
        let stats = task.await.unwrap();
        assert_eq!(stats.data, 1);
        assert_eq!(stats.events, 1);
    }

    #[tokio::test]
    async fn unknown_command_still_answered() {
        let wifi = Arc::new(SimulatedWifi::new(MAC));
        let peripheral = Peripheral::new(DispatchTable::new(), wifi, PeripheralConfig::new());
        let (near, far) = tokio::io::duplex(4096);
        let task = peripheral.spawn(far);

        let (read_half, write_half) = tokio::io::split(near);
        let mut writer = FramedWrite::new(write_half, FrameCodec::new());
        let mut reader = FramedRead::new(read_half, FrameCodec::new());

        writer
            .send(Frame::command(RequestEnvelope::GetWifiMode.encode().unwrap()))
            .await
            .unwrap();
        let response = ResponseEnvelope::decode(&next_frame(&mut reader).await.payload).unwrap();
        assert_eq!(
            response,
            ResponseEnvelope::failure(2, FailureStatus::UnknownCommand, "unknown command 0x02")
        );

        drop(writer);
        drop(reader);
        task.await.unwrap();
    }
}
