//! In-memory WiFi capability for loopback runs and tests.
//!
//! Association completes synchronously inside `connect`: the outcome event is
//! published before `connect` returns, so a subscriber created beforehand
//! always observes it.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;

use tokio::sync::broadcast;

use super::wifi::{WifiCapability, WifiError};
use crate::bridge::envelope::Event;
use crate::bridge::protocol::{
    ApInfo, AuthMode, MacAddress, SoftApConfig, StationConfig, WifiInterface, WifiMode,
};

/// Disconnect reason codes, numbered as the radio firmware reports them.
pub const REASON_ASSOC_LEAVE: u8 = 8;
pub const REASON_HANDSHAKE_TIMEOUT: u8 = 15;
pub const REASON_NO_AP_FOUND: u8 = 201;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct Network {
    password: String,
    info: ApInfo,
}

#[derive(Debug)]
struct SimState {
    station_mac: MacAddress,
    softap_mac: MacAddress,
    mode: WifiMode,
    started: bool,
    station: Option<StationConfig>,
    networks: HashMap<String, Network>,
    associated: Option<ApInfo>,
    softap: SoftApConfig,
    scripted_failures: u32,
}

pub struct SimulatedWifi {
    state: StdMutex<SimState>,
    events: broadcast::Sender<Event>,
}

impl SimulatedWifi {
    /// The soft-AP MAC is the station MAC with the last octet incremented.
    pub fn new(station_mac: MacAddress) -> Self {
        let mut softap = station_mac.octets();
        softap[5] = softap[5].wrapping_add(1);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            state: StdMutex::new(SimState {
                station_mac,
                softap_mac: MacAddress::new(softap),
                mode: WifiMode::Null,
                started: false,
                station: None,
                networks: HashMap::new(),
                associated: None,
                softap: SoftApConfig::default(),
                scripted_failures: 0,
            }),
            events,
        }
    }

    /// Make an access point reachable.
    pub fn with_network(
        self,
        ssid: impl Into<String>,
        password: impl Into<String>,
        bssid: MacAddress,
        rssi: i8,
        channel: u8,
    ) -> Self {
        let ssid = ssid.into();
        let network = Network {
            password: password.into(),
            info: ApInfo {
                ssid: ssid.clone(),
                bssid,
                rssi,
                channel,
            },
        };
        self.lock().networks.insert(ssid, network);
        self
    }

    /// Fail the next `count` association attempts with `REASON_NO_AP_FOUND`.
    pub fn with_connect_failures(self, count: u32) -> Self {
        self.lock().scripted_failures = count;
        self
    }

    /// Simulate a client associating with the soft-AP.
    pub fn join_station(&self, mac: MacAddress, aid: u8) {
        self.publish(Event::SoftApStationJoined { mac, aid });
    }

    pub fn leave_station(&self, mac: MacAddress, aid: u8) {
        self.publish(Event::SoftApStationLeft { mac, aid });
    }

    pub fn is_associated(&self) -> bool {
        self.lock().associated.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: Event) {
        // No subscribers is fine; nobody is listening yet.
        let _ = self.events.send(event);
    }
}

#[async_trait::async_trait]
impl WifiCapability for SimulatedWifi {
    async fn mac_address(&self, interface: WifiInterface) -> Result<MacAddress, WifiError> {
        let state = self.lock();
        Ok(match interface {
            WifiInterface::Station => state.station_mac,
            WifiInterface::SoftAp => state.softap_mac,
        })
    }

    async fn mode(&self) -> Result<WifiMode, WifiError> {
        Ok(self.lock().mode)
    }

    async fn set_mode(&self, mode: WifiMode) -> Result<(), WifiError> {
        let mut state = self.lock();
        state.mode = mode;
        if mode == WifiMode::Null {
            state.started = false;
            state.associated = None;
        }
        Ok(())
    }

    async fn set_station_config(&self, config: &StationConfig) -> Result<(), WifiError> {
        if config.ssid.is_empty() || config.ssid.len() > 32 {
            return Err(WifiError::InvalidConfig(format!(
                "ssid must be 1-32 bytes, got {}",
                config.ssid.len()
            )));
        }
        self.lock().station = Some(config.clone());
        Ok(())
    }

    async fn start(&self) -> Result<(), WifiError> {
        let mut state = self.lock();
        if state.mode == WifiMode::Null {
            return Err(WifiError::driver(0x3006, "wifi mode not set"));
        }
        state.started = true;
        Ok(())
    }

    async fn connect(&self) -> Result<(), WifiError> {
        let event = {
            let mut state = self.lock();
            if !state.started {
                return Err(WifiError::driver(0x3002, "wifi not started"));
            }
            if !matches!(state.mode, WifiMode::Station | WifiMode::StationSoftAp) {
                return Err(WifiError::InterfaceUnavailable(WifiInterface::Station));
            }
            let Some(config) = state.station.clone() else {
                return Err(WifiError::InvalidConfig("station config not set".to_string()));
            };

            if state.scripted_failures > 0 {
                state.scripted_failures -= 1;
                Event::StationDisconnected {
                    reason: REASON_NO_AP_FOUND,
                }
            } else {
                let network = state.networks.get(&config.ssid).cloned();
                match network {
                    Some(network) if network.password == config.password => {
                        let event = Event::StationConnected {
                            ssid: network.info.ssid.clone(),
                            channel: network.info.channel,
                        };
                        state.associated = Some(network.info);
                        event
                    }
                    Some(_) => Event::StationDisconnected {
                        reason: REASON_HANDSHAKE_TIMEOUT,
                    },
                    None => Event::StationDisconnected {
                        reason: REASON_NO_AP_FOUND,
                    },
                }
            }
        };

        self.publish(event);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WifiError> {
        let was_associated = self.lock().associated.take().is_some();
        if was_associated {
            self.publish(Event::StationDisconnected {
                reason: REASON_ASSOC_LEAVE,
            });
        }
        Ok(())
    }

    async fn station_ap_info(&self) -> Result<ApInfo, WifiError> {
        self.lock().associated.clone().ok_or(WifiError::NotAssociated)
    }

    async fn softap_config(&self) -> Result<SoftApConfig, WifiError> {
        Ok(self.lock().softap.clone())
    }

    async fn set_softap_config(&self, config: &SoftApConfig) -> Result<(), WifiError> {
        if config.ssid.is_empty() || config.ssid.len() > 32 {
            return Err(WifiError::InvalidConfig(format!(
                "ssid must be 1-32 bytes, got {}",
                config.ssid.len()
            )));
        }
        if !(1..=13).contains(&config.channel) {
            return Err(WifiError::InvalidConfig(format!(
                "channel {} out of range",
                config.channel
            )));
        }
        if config.auth != AuthMode::Open && config.password.len() < 8 {
            return Err(WifiError::InvalidConfig(
                "passphrase must be at least 8 bytes".to_string(),
            ));
        }
        self.lock().softap = config.clone();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: MacAddress = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    const BSSID: MacAddress = MacAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);

    async fn started(wifi: &SimulatedWifi, ssid: &str, password: &str) {
        wifi.set_mode(WifiMode::Station).await.unwrap();
        wifi.set_station_config(&StationConfig::new(ssid, password))
            .await
            .unwrap();
        wifi.start().await.unwrap();
    }

    #[tokio::test]
    async fn softap_mac_is_derived_from_station_mac() {
        let wifi = SimulatedWifi::new(MAC);
        assert_eq!(
            wifi.mac_address(WifiInterface::SoftAp).await.unwrap().to_string(),
            "aa:bb:cc:dd:ee:00"
        );
    }

    #[tokio::test]
    async fn connect_publishes_outcome() {
        let wifi = SimulatedWifi::new(MAC).with_network("lab", "hunter22", BSSID, -40, 6);
        let mut events = wifi.subscribe();

        started(&wifi, "lab", "wrong").await;
        wifi.connect().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            Event::StationDisconnected {
                reason: REASON_HANDSHAKE_TIMEOUT
            }
        );

        started(&wifi, "lab", "hunter22").await;
        wifi.connect().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            Event::StationConnected {
                ssid: "lab".to_string(),
                channel: 6
            }
        );
        assert_eq!(wifi.station_ap_info().await.unwrap().bssid, BSSID);
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let wifi = SimulatedWifi::new(MAC)
            .with_network("lab", "hunter22", BSSID, -40, 6)
            .with_connect_failures(1);
        let mut events = wifi.subscribe();
        started(&wifi, "lab", "hunter22").await;

        wifi.connect().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::StationDisconnected { .. }
        ));
        wifi.connect().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::StationConnected { .. }
        ));
    }

    #[tokio::test]
    async fn connect_requires_started_radio() {
        let wifi = SimulatedWifi::new(MAC);
        assert!(matches!(
            wifi.connect().await,
            Err(WifiError::Driver { .. })
        ));
    }

    #[tokio::test]
    async fn softap_config_is_validated() {
        let wifi = SimulatedWifi::new(MAC);
        let mut config = SoftApConfig {
            ssid: "hostlink".to_string(),
            password: "short".to_string(),
            auth: AuthMode::Wpa2Psk,
            ..SoftApConfig::default()
        };
        assert!(matches!(
            wifi.set_softap_config(&config).await,
            Err(WifiError::InvalidConfig(_))
        ));

        config.password = "long enough".to_string();
        wifi.set_softap_config(&config).await.unwrap();
        assert_eq!(wifi.softap_config().await.unwrap(), config);
    }
}
