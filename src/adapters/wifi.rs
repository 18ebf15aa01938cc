//! WiFi station-mode backhaul adapter.
//!
//! The gateway's upstream link: one station association, kept alive for the
//! duration. The main loop polls this adapter and turns connectivity
//! transitions into queue events for the readiness gate.
//!
//! ## cfg gating
//!
//! - **`espidf` feature**: real ESP-IDF STA driver via `esp_idf_svc::wifi`.
//! - **otherwise**: simulation stubs for host-side tests.
//!
//! ## Reconnection policy
//!
//! On disconnect the adapter retries on each poll with an exponential
//! backoff (2 s → 4 s → 8 s … capped at 60 s) between attempts.

use log::{error, info, warn};

use crate::error::{Error, NetError, Result};

#[cfg(feature = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

const INITIAL_BACKOFF_SECS: u32 = 2;
const MAX_BACKOFF_SECS: u32 = 60;

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<()> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(Error::Config("SSID must be 1-32 printable ASCII bytes"));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    // Empty means an open network.
    if !password.is_empty() && (password.len() < 8 || password.len() > 64) {
        return Err(Error::Config("password must be 8-64 bytes for WPA2"));
    }
    Ok(())
}

/// Station backhaul. On target it owns the blocking WiFi driver; on the
/// host it simulates association so the main loop logic stays testable.
pub struct WifiBackhaul {
    state: WifiState,
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    backoff_secs: u32,
    /// Polls remaining before the next reconnect attempt (the main loop
    /// ticks roughly every 100 ms).
    cooldown_polls: u32,
    #[cfg(feature = "espidf")]
    driver: BlockingWifi<EspWifi<'static>>,
    /// Simulation: upcoming connect attempts that should fail.
    #[cfg(not(feature = "espidf"))]
    sim_failures: u32,
}

const POLLS_PER_SEC: u32 = 10;

impl WifiBackhaul {
    #[cfg(feature = "espidf")]
    pub fn new(driver: BlockingWifi<EspWifi<'static>>) -> Self {
        Self {
            state: WifiState::Disconnected,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            backoff_secs: INITIAL_BACKOFF_SECS,
            cooldown_polls: 0,
            driver,
        }
    }

    #[cfg(not(feature = "espidf"))]
    pub fn new() -> Self {
        Self {
            state: WifiState::Disconnected,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            backoff_secs: INITIAL_BACKOFF_SECS,
            cooldown_polls: 0,
            sim_failures: 0,
        }
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    pub fn set_credentials(&mut self, ssid: &str, password: &str) -> Result<()> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.ssid.clear();
        self.ssid
            .push_str(ssid)
            .map_err(|()| Error::Config("SSID too long"))?;
        self.password.clear();
        self.password
            .push_str(password)
            .map_err(|()| Error::Config("password too long"))?;
        info!("wifi: credentials set (SSID='{}')", self.ssid);
        Ok(())
    }

    /// Blocking initial association.
    pub fn connect(&mut self) -> Result<()> {
        if self.ssid.is_empty() {
            return Err(Error::Config("no WiFi credentials configured"));
        }
        info!("wifi: connecting to '{}'", self.ssid);
        self.state = WifiState::Connecting;
        match self.platform_connect() {
            Ok(()) => {
                self.state = WifiState::Connected;
                self.backoff_secs = INITIAL_BACKOFF_SECS;
                info!("wifi: connected");
                Ok(())
            }
            Err(e) => {
                error!("wifi: connect failed: {e}");
                self.state = WifiState::Reconnecting { attempt: 0 };
                self.cooldown_polls = self.backoff_secs * POLLS_PER_SEC;
                Err(e.into())
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.platform_is_connected()
    }

    /// Drive reconnection. Called once per main-loop tick.
    pub fn poll(&mut self) {
        match self.state {
            WifiState::Connected => {
                if !self.platform_is_connected() {
                    warn!("wifi: link lost, entering reconnect");
                    self.state = WifiState::Reconnecting { attempt: 0 };
                    self.cooldown_polls = self.backoff_secs * POLLS_PER_SEC;
                }
            }
            WifiState::Reconnecting { attempt } => {
                if self.cooldown_polls > 0 {
                    self.cooldown_polls -= 1;
                    return;
                }
                info!("wifi: reconnect attempt {attempt} (backoff {}s)", self.backoff_secs);
                match self.platform_connect() {
                    Ok(()) => {
                        self.state = WifiState::Connected;
                        self.backoff_secs = INITIAL_BACKOFF_SECS;
                        info!("wifi: reconnected");
                    }
                    Err(_) => {
                        self.backoff_secs = (self.backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        self.cooldown_polls = self.backoff_secs * POLLS_PER_SEC;
                        self.state = WifiState::Reconnecting {
                            attempt: attempt + 1,
                        };
                    }
                }
            }
            _ => {}
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(feature = "espidf")]
    fn platform_connect(&mut self) -> core::result::Result<(), NetError> {
        let auth_method = if self.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let conf = Configuration::Client(ClientConfiguration {
            ssid: self.ssid.clone(),
            password: self.password.clone(),
            auth_method,
            ..Default::default()
        });
        self.driver
            .set_configuration(&conf)
            .map_err(|_| NetError::WifiConnectFailed)?;
        if !self.driver.is_started().unwrap_or(false) {
            self.driver.start().map_err(|_| NetError::WifiConnectFailed)?;
        }
        self.driver.connect().map_err(|_| NetError::WifiConnectFailed)?;
        self.driver
            .wait_netif_up()
            .map_err(|_| NetError::WifiConnectFailed)?;
        Ok(())
    }

    #[cfg(not(feature = "espidf"))]
    fn platform_connect(&mut self) -> core::result::Result<(), NetError> {
        if self.sim_failures > 0 {
            self.sim_failures -= 1;
            warn!("wifi(sim): simulated association failure");
            return Err(NetError::WifiConnectFailed);
        }
        info!("wifi(sim): associated with '{}'", self.ssid);
        Ok(())
    }

    #[cfg(feature = "espidf")]
    fn platform_is_connected(&self) -> bool {
        self.driver.is_connected().unwrap_or(false)
    }

    #[cfg(not(feature = "espidf"))]
    fn platform_is_connected(&self) -> bool {
        self.state == WifiState::Connected
    }

    /// Simulation hook: make the next `n` connect attempts fail.
    #[cfg(not(feature = "espidf"))]
    pub fn sim_fail_next(&mut self, n: u32) {
        self.sim_failures = n;
    }
}
