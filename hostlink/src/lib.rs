//! hostlink: command correlation and dispatch for host/co-processor WiFi links.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod data;
pub mod events;
pub mod link;
pub mod peripheral;
pub mod receiver;
pub mod slot;
pub mod transaction;

pub use bridge::envelope::{Event, RequestEnvelope, ResponseEnvelope};
pub use bridge::frame::{Frame, FrameClass, FrameCodec};
pub use bridge::protocol::{
    ApInfo, AuthMode, CommandCode, FailureStatus, MacAddress, SoftApConfig, StationConfig,
    WifiInterface, WifiMode,
};
pub use config::{ControllerConfig, PeripheralConfig};
pub use controller::Controller;
pub use data::{DataFrame, DataPlane, DiscardDataPlane};
pub use link::{Link, LinkError};
pub use peripheral::{
    DispatchTable, HandlerError, LinkState, Peripheral, PeripheralStats, SimulatedWifi,
    WifiCapability, WifiError,
};
pub use transaction::{CommandError, CommandHandle, TransactionManager, TransactionSnapshot};
