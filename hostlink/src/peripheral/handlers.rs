//! WiFi command handlers.
//!
//! Station link state is owned here and only changes through commands:
//!
//! ```text
//! Disconnected ──set_ap_config──▶ Connecting ──▶ Connected
//!                                     │
//!                                     └── retries exhausted ──▶ ConnectFailed
//! ```
//!
//! `get_ap_config` and `disconnect_ap` require `Connected`.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use super::dispatch::{DispatchTable, HandlerError};
use super::wifi::WifiCapability;
use crate::bridge::envelope::{Event, RequestEnvelope, ResponseEnvelope};
use crate::bridge::protocol::{
    CommandCode, STATUS_CONNECT_FAILED, STATUS_SUCCESS, SoftApConfig, StationConfig,
    WifiInterface, WifiMode,
};
use crate::config::PeripheralConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    ConnectFailed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConnectFailed => "connect_failed",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct StationState {
    link: LinkState,
    retries: u32,
}

enum Association {
    Connected,
    Failed,
    TimedOut,
}

/// Handlers for every WiFi command family, sharing one station state.
pub struct WifiCommands {
    wifi: Arc<dyn WifiCapability>,
    config: PeripheralConfig,
    station: StdMutex<StationState>,
}

impl WifiCommands {
    pub fn new(wifi: Arc<dyn WifiCapability>, config: PeripheralConfig) -> Self {
        Self {
            wifi,
            config,
            station: StdMutex::new(StationState {
                link: LinkState::Disconnected,
                retries: 0,
            }),
        }
    }

    fn station(&self) -> MutexGuard<'_, StationState> {
        self.station.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Station state mutex poisoned - recovering");
            poisoned.into_inner()
        })
    }

    pub fn link_state(&self) -> LinkState {
        self.station().link
    }

    fn set_link_state(&self, link: LinkState) {
        let mut station = self.station();
        if station.link != link {
            tracing::info!(from = %station.link, to = %link, "Station link state changed");
            station.link = link;
        }
    }

    fn require_connected(&self, action: &str) -> Result<(), HandlerError> {
        match self.link_state() {
            LinkState::Connected => Ok(()),
            state => Err(HandlerError::invalid_state(format!(
                "station is {state}, cannot {action}"
            ))),
        }
    }

    pub async fn handle(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, HandlerError> {
        match request {
            RequestEnvelope::GetMacAddress { interface } => self.get_mac_address(interface).await,
            RequestEnvelope::GetWifiMode => self.get_wifi_mode().await,
            RequestEnvelope::SetWifiMode { mode } => self.set_wifi_mode(mode).await,
            RequestEnvelope::GetApConfig => self.get_ap_config().await,
            RequestEnvelope::SetApConfig(config) => self.set_ap_config(config).await,
            RequestEnvelope::GetSoftApConfig => self.get_softap_config().await,
            RequestEnvelope::SetSoftApConfig(config) => self.set_softap_config(config).await,
            RequestEnvelope::DisconnectAp => self.disconnect_ap().await,
        }
    }

    pub async fn get_mac_address(
        &self,
        interface: WifiInterface,
    ) -> Result<ResponseEnvelope, HandlerError> {
        let mac = self.wifi.mac_address(interface).await?;
        tracing::debug!(?interface, %mac, "Read MAC address");
        Ok(ResponseEnvelope::GetMacAddress {
            mac: mac.to_string(),
        })
    }

    pub async fn get_wifi_mode(&self) -> Result<ResponseEnvelope, HandlerError> {
        let mode = self.wifi.mode().await?;
        Ok(ResponseEnvelope::GetWifiMode { mode })
    }

    /// Applies `mode` and reports the mode read back from the radio.
    pub async fn set_wifi_mode(&self, mode: WifiMode) -> Result<ResponseEnvelope, HandlerError> {
        self.wifi.set_mode(mode).await?;
        let mode = self.wifi.mode().await?;
        if !matches!(mode, WifiMode::Station | WifiMode::StationSoftAp)
            && self.link_state() == LinkState::Connected
        {
            self.set_link_state(LinkState::Disconnected);
        }
        Ok(ResponseEnvelope::SetWifiMode { mode })
    }

    pub async fn get_ap_config(&self) -> Result<ResponseEnvelope, HandlerError> {
        self.require_connected("read AP configuration")?;
        let info = self.wifi.station_ap_info().await?;
        Ok(ResponseEnvelope::GetApConfig {
            info,
            status: STATUS_SUCCESS.to_string(),
        })
    }

    /// Join an access point and block until associated or out of retries.
    pub async fn set_ap_config(
        &self,
        config: StationConfig,
    ) -> Result<ResponseEnvelope, HandlerError> {
        if config.ssid.is_empty() {
            return Err(HandlerError::invalid_argument("ssid is empty"));
        }

        // Subscribe before starting so the outcome event cannot be missed.
        let mut events = self.wifi.subscribe();
        {
            let mut station = self.station();
            station.retries = 0;
        }
        self.set_link_state(LinkState::Connecting);
        tracing::info!(ssid = %config.ssid, "Connecting to access point");

        if let Err(e) = self.start_station(&config).await {
            self.set_link_state(LinkState::Disconnected);
            return Err(e);
        }

        let outcome = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, self.await_association(&mut events))
                .await
                .unwrap_or(Association::TimedOut),
            None => self.await_association(&mut events).await,
        };

        let retries = std::mem::take(&mut self.station().retries);
        let status = match outcome {
            Association::Connected => {
                tracing::info!(ssid = %config.ssid, retries, "Connected to access point");
                self.set_link_state(LinkState::Connected);
                STATUS_SUCCESS
            }
            Association::Failed => {
                tracing::warn!(ssid = %config.ssid, retries, "Giving up on access point");
                self.set_link_state(LinkState::ConnectFailed);
                STATUS_CONNECT_FAILED
            }
            Association::TimedOut => {
                tracing::warn!(
                    ssid = %config.ssid,
                    retries,
                    "Timed out connecting to access point"
                );
                self.set_link_state(LinkState::ConnectFailed);
                STATUS_CONNECT_FAILED
            }
        };

        Ok(ResponseEnvelope::SetApConfig {
            status: status.to_string(),
        })
    }

    async fn start_station(&self, config: &StationConfig) -> Result<(), HandlerError> {
        self.wifi.set_mode(WifiMode::Station).await?;
        self.wifi.set_station_config(config).await?;
        self.wifi.start().await?;
        self.wifi.connect().await?;
        Ok(())
    }

    async fn await_association(&self, events: &mut broadcast::Receiver<Event>) -> Association {
        loop {
            match events.recv().await {
                Ok(Event::StationConnected { .. }) => return Association::Connected,
                Ok(Event::StationDisconnected { reason }) => {
                    let attempt = {
                        let mut station = self.station();
                        if station.retries >= self.config.max_connect_retries {
                            return Association::Failed;
                        }
                        station.retries += 1;
                        station.retries
                    };
                    tracing::debug!(attempt, reason, "Association failed - retrying");
                    if let Err(e) = self.wifi.connect().await {
                        tracing::warn!(error = %e, "Reconnect attempt rejected");
                        return Association::Failed;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed WiFi events while connecting");
                }
                Err(RecvError::Closed) => return Association::Failed,
            }
        }
    }

    pub async fn get_softap_config(&self) -> Result<ResponseEnvelope, HandlerError> {
        let config = self.wifi.softap_config().await?;
        Ok(ResponseEnvelope::GetSoftApConfig(config))
    }

    /// Configure and start the soft-AP. A connected station stays up.
    pub async fn set_softap_config(
        &self,
        config: SoftApConfig,
    ) -> Result<ResponseEnvelope, HandlerError> {
        let mode = if self.link_state() == LinkState::Connected {
            WifiMode::StationSoftAp
        } else {
            WifiMode::SoftAp
        };
        self.wifi.set_mode(mode).await?;
        self.wifi.set_softap_config(&config).await?;
        self.wifi.start().await?;
        tracing::info!(ssid = %config.ssid, channel = config.channel, ?mode, "Soft-AP started");
        Ok(ResponseEnvelope::SetSoftApConfig {
            status: STATUS_SUCCESS.to_string(),
        })
    }

    pub async fn disconnect_ap(&self) -> Result<ResponseEnvelope, HandlerError> {
        self.require_connected("disconnect")?;
        self.wifi.disconnect().await?;
        self.set_link_state(LinkState::Disconnected);
        Ok(ResponseEnvelope::DisconnectAp {
            status: STATUS_SUCCESS.to_string(),
        })
    }
}

/// Register `commands` for every WiFi command code.
pub fn register_wifi_handlers(table: &mut DispatchTable, commands: Arc<WifiCommands>) {
    for code in CommandCode::ALL {
        let commands = Arc::clone(&commands);
        table.register(code, move |request: RequestEnvelope| {
            let commands = Arc::clone(&commands);
            async move { commands.handle(request).await }
        });
    }
}
