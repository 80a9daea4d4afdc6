//! WiFi configuration capability consumed by the command handlers.

use tokio::sync::broadcast;

use crate::bridge::envelope::Event;
use crate::bridge::protocol::{
    ApInfo, MacAddress, SoftApConfig, StationConfig, WifiInterface, WifiMode,
};

/// Errors reported by the WiFi subsystem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WifiError {
    #[error("driver error {code}: {message}")]
    Driver { code: i32, message: String },

    #[error("{0:?} interface is not available")]
    InterfaceUnavailable(WifiInterface),

    #[error("station is not associated")]
    NotAssociated,

    /// Rejected configuration (bad channel, short passphrase, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WifiError {
    pub fn driver(code: i32, message: impl Into<String>) -> Self {
        Self::Driver {
            code,
            message: message.into(),
        }
    }
}

/// Injected WiFi subsystem.
///
/// Association is asynchronous: `connect` only starts it, and the outcome is
/// published on the [`subscribe`](WifiCapability::subscribe) stream as
/// `StationConnected` or `StationDisconnected`. Soft-AP join and leave
/// notifications arrive on the same stream.
#[async_trait::async_trait]
pub trait WifiCapability: Send + Sync + 'static {
    async fn mac_address(&self, interface: WifiInterface) -> Result<MacAddress, WifiError>;

    async fn mode(&self) -> Result<WifiMode, WifiError>;

    async fn set_mode(&self, mode: WifiMode) -> Result<(), WifiError>;

    async fn set_station_config(&self, config: &StationConfig) -> Result<(), WifiError>;

    /// Start the radio in the configured mode.
    async fn start(&self) -> Result<(), WifiError>;

    async fn connect(&self) -> Result<(), WifiError>;

    async fn disconnect(&self) -> Result<(), WifiError>;

    /// Record of the access point the station is associated with.
    async fn station_ap_info(&self) -> Result<ApInfo, WifiError>;

    async fn softap_config(&self) -> Result<SoftApConfig, WifiError>;

    async fn set_softap_config(&self, config: &SoftApConfig) -> Result<(), WifiError>;

    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
