//! Controller side of the link.
//!
//! [`Controller::spawn`] splits the link and starts three tasks: the link
//! writer, the receive dispatcher and the event worker. Commands go through
//! the [`TransactionManager`]; the typed methods below encode the request,
//! wait for the response and unwrap the expected variant.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use crate::bridge::envelope::{Event, RequestEnvelope, ResponseEnvelope};
use crate::bridge::frame::{Frame, FrameCodec, FrameError, MAX_PAYLOAD_LEN};
use crate::bridge::protocol::{
    ApInfo, SoftApConfig, StationConfig, WifiInterface, WifiMode,
};
use crate::config::ControllerConfig;
use crate::data::DataPlane;
use crate::events::{EventSubscribers, event_channel, run_event_worker};
use crate::link::{Link, LinkError, run_writer};
use crate::receiver::{DispatchStats, ReceiveDispatcher};
use crate::transaction::{CommandError, CommandHandle, TransactionManager, TransactionSnapshot};

struct Tasks {
    writer: JoinHandle<u64>,
    dispatcher: JoinHandle<DispatchStats>,
    events: JoinHandle<u64>,
}

impl Tasks {
    fn abort(&self) {
        self.writer.abort();
        self.dispatcher.abort();
        self.events.abort();
    }
}

pub struct Controller {
    manager: TransactionManager,
    subscribers: EventSubscribers,
    outbound: mpsc::UnboundedSender<Frame>,
    config: ControllerConfig,
    tasks: Option<Tasks>,
}

impl Controller {
    /// Take ownership of `link` and start serving it. Must be called inside a
    /// Tokio runtime.
    pub fn spawn<L: Link>(
        link: L,
        config: ControllerConfig,
        data_plane: Arc<dyn DataPlane>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(link);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let manager = TransactionManager::new(config.command_slots, outbound.clone());
        let writer = tokio::spawn(run_writer(write_half, outbound_rx));

        let (event_tx, event_rx) = event_channel();
        let subscribers = EventSubscribers::new();
        let events = tokio::spawn(run_event_worker(event_rx, subscribers.clone()));

        let dispatcher = ReceiveDispatcher::new(manager.clone(), event_tx, data_plane);
        let dispatcher =
            tokio::spawn(dispatcher.run(FramedRead::new(read_half, FrameCodec::new())));

        tracing::info!(
            slots = config.command_slots,
            timeout = ?config.command_timeout,
            "Controller started"
        );

        Self {
            manager,
            subscribers,
            outbound,
            config,
            tasks: Some(Tasks {
                writer,
                dispatcher,
                events,
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub fn snapshot(&self) -> TransactionSnapshot {
        self.manager.snapshot()
    }

    /// Call `callback` on the event worker for every decoded event.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.register(callback);
    }

    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<Event> {
        self.subscribers.subscribe()
    }

    /// Queue `request` without waiting for its response.
    pub fn submit(&self, request: &RequestEnvelope) -> Result<CommandHandle, CommandError> {
        let payload = request.encode()?;
        self.manager.submit(request.code().as_u8(), payload)
    }

    pub async fn execute(
        &self,
        request: RequestEnvelope,
    ) -> Result<ResponseEnvelope, CommandError> {
        self.execute_with_timeout(request, self.config.command_timeout)
            .await
    }

    /// Run one command. A failure response becomes [`CommandError::Failed`].
    pub async fn execute_with_timeout(
        &self,
        request: RequestEnvelope,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, CommandError> {
        let raw = self.submit(&request)?.wait(timeout).await?;
        match ResponseEnvelope::decode(&raw)? {
            ResponseEnvelope::Failure {
                status, message, ..
            } => {
                tracing::debug!(
                    code = %request.code(),
                    %status,
                    %message,
                    "Command failed on peripheral"
                );
                Err(CommandError::Failed { status, message })
            }
            response => Ok(response),
        }
    }

    pub async fn get_mac_address(&self, interface: WifiInterface) -> Result<String, CommandError> {
        match self
            .execute(RequestEnvelope::GetMacAddress { interface })
            .await?
        {
            ResponseEnvelope::GetMacAddress { mac } => Ok(mac),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_wifi_mode(&self) -> Result<WifiMode, CommandError> {
        match self.execute(RequestEnvelope::GetWifiMode).await? {
            ResponseEnvelope::GetWifiMode { mode } => Ok(mode),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the mode the peripheral reports after the change.
    pub async fn set_wifi_mode(&self, mode: WifiMode) -> Result<WifiMode, CommandError> {
        match self.execute(RequestEnvelope::SetWifiMode { mode }).await? {
            ResponseEnvelope::SetWifiMode { mode } => Ok(mode),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_ap_config(&self) -> Result<ApInfo, CommandError> {
        match self.execute(RequestEnvelope::GetApConfig).await? {
            ResponseEnvelope::GetApConfig { info, .. } => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    /// Join an access point. Returns the peripheral's status string, which is
    /// `"success"` or `"connect failed"`.
    pub async fn connect_ap(&self, config: StationConfig) -> Result<String, CommandError> {
        match self.execute(RequestEnvelope::SetApConfig(config)).await? {
            ResponseEnvelope::SetApConfig { status } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn disconnect_ap(&self) -> Result<String, CommandError> {
        match self.execute(RequestEnvelope::DisconnectAp).await? {
            ResponseEnvelope::DisconnectAp { status } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_softap_config(&self) -> Result<SoftApConfig, CommandError> {
        match self.execute(RequestEnvelope::GetSoftApConfig).await? {
            ResponseEnvelope::GetSoftApConfig(config) => Ok(config),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_softap_config(&self, config: SoftApConfig) -> Result<String, CommandError> {
        match self
            .execute(RequestEnvelope::SetSoftApConfig(config))
            .await?
        {
            ResponseEnvelope::SetSoftApConfig { status } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Queue a data frame for `interface`. Bypasses the command pipeline.
    pub fn send_data(&self, interface: u8, payload: impl Into<Bytes>) -> Result<(), LinkError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(payload.len()).into());
        }
        self.outbound
            .send(Frame::data(interface, payload))
            .map_err(|_| LinkError::Closed)
    }

    /// Fail outstanding commands, drop the link and wait for the event worker
    /// to deliver what it already received. Returns the number of events
    /// delivered over the controller's lifetime.
    pub async fn close(mut self) -> u64 {
        self.manager.fail_all(CommandError::LinkClosed);
        let Some(tasks) = self.tasks.take() else {
            return 0;
        };

        tasks.writer.abort();
        tasks.dispatcher.abort();
        let _ = tasks.writer.await;
        let _ = tasks.dispatcher.await;

        match tasks.events.await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::error!(error = %e, "Event worker task failed");
                0
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            self.manager.fail_all(CommandError::LinkClosed);
            tasks.abort();
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("subscribers", &self.subscribers)
            .field("closed", &self.manager.is_closed())
            .finish_non_exhaustive()
    }
}

fn unexpected(response: ResponseEnvelope) -> CommandError {
    CommandError::Protocol(format!(
        "unexpected response type {:#04x}",
        response.msg_type()
    ))
}
