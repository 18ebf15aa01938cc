//! Peer session state machine.
//!
//! Drives the discovery/connection lifecycle for the single supported node:
//! scan for its advertised name, connect, walk its GATT table to resolve the
//! three value handles the gateway cares about, and subscribe to the
//! vibration stream.
//!
//! The machine is deliberately pure: link-layer callbacks are translated
//! into [`LinkEvent`]s, and each `handle()` call returns the [`Effect`]s the
//! adapter must execute (scan/connect/discovery requests, descriptor
//! writes). That keeps every transition host-testable without a radio.
//!
//! ```text
//! Scanning ──▶ Connecting ──▶ DiscoveringServices
//!     ▲                              │
//!     │                              ▼
//!     │            DiscoveringCharacteristics ──▶ DiscoveringDescriptors
//!     │                                                  │
//!     └───────────── (disconnect, any state) ◀──── Active
//! ```

pub mod uuid;

use heapless::Vec;
use log::{debug, info, warn};

use crate::config::{
    FIRMWARE_CTRL_UUID, FIRMWARE_DATA_UUID, FIRMWARE_SERVICE_UUID, GatewayConfig,
    TELEMETRY_CHAR_UUID, TELEMETRY_SERVICE_UUID,
};
use crate::telemetry::Sample;
use uuid::{CCCD_UUID16, Uuid128};

// ---------------------------------------------------------------------------
// Session data
// ---------------------------------------------------------------------------

/// Opaque attribute handle, valid for the lifetime of one connection.
pub type AttrHandle = u16;

/// A peer BLE address (value + address type, as reported in scan results).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub value: [u8; 6],
    pub addr_type: u8,
}

/// The one supported peer connection.
///
/// All handles are unset until discovered; a disconnect clears everything,
/// forcing full rediscovery on reconnect (handles are only valid per
/// connection).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerSession {
    pub conn_handle: Option<u16>,
    pub telemetry_value_handle: Option<AttrHandle>,
    pub control_value_handle: Option<AttrHandle>,
    pub data_value_handle: Option<AttrHandle>,
}

impl PeerSession {
    /// Both firmware handles resolved — precondition for the relay.
    pub fn firmware_handles(&self) -> Option<(AttrHandle, AttrHandle)> {
        Some((self.control_value_handle?, self.data_value_handle?))
    }

    fn clear_discovered(&mut self) {
        self.telemetry_value_handle = None;
        self.control_value_handle = None;
        self.data_value_handle = None;
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Duplicate-filtered active scan for the target name.
    Scanning,
    /// Connection initiated, waiting for the connect result.
    Connecting,
    /// Connected; walking the service table.
    DiscoveringServices,
    /// Matching service found; walking its characteristics.
    DiscoveringCharacteristics,
    /// Telemetry characteristic found; locating its CCCD.
    DiscoveringDescriptors,
    /// Subscribed to the vibration stream; session fully established.
    Active,
}

// ---------------------------------------------------------------------------
// Events and effects
// ---------------------------------------------------------------------------

/// The closed set of link-layer events the machine consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkEvent<'a> {
    /// An advertisement was received (decoded name, if present).
    ScanResult {
        addr: PeerAddr,
        name: Option<&'a [u8]>,
    },
    /// Connection attempt finished (`status == 0` means connected).
    ConnectResult { conn_handle: u16, status: i32 },
    /// A primary service was discovered.
    ServiceFound {
        uuid: Uuid128,
        start_handle: AttrHandle,
        end_handle: AttrHandle,
    },
    /// A characteristic was discovered.
    CharacteristicFound {
        uuid: Uuid128,
        value_handle: AttrHandle,
    },
    /// A descriptor was discovered (descriptors use 16-bit SIG ids).
    DescriptorFound { uuid16: u16, handle: AttrHandle },
    /// A notification arrived on a subscribed characteristic.
    Notification {
        attr_handle: AttrHandle,
        payload: &'a [u8],
    },
    /// The connection dropped.
    Disconnect { reason: i32 },
}

/// Requests the machine asks the link adapter to perform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    /// Begin (or resume) the duplicate-filtered active scan.
    StartScan,
    /// Stop scanning before connecting.
    CancelScan,
    /// Initiate a connection with the configured timeout.
    Connect { addr: PeerAddr, timeout_ms: u32 },
    /// Fire-and-forget MTU negotiation after connect.
    ExchangeMtu,
    /// Walk the peer's full service table.
    DiscoverServices,
    /// Walk characteristics inside one service's handle range.
    DiscoverCharacteristics {
        start_handle: AttrHandle,
        end_handle: AttrHandle,
    },
    /// Walk descriptors in a bounded window after a value handle.
    DiscoverDescriptors {
        start_handle: AttrHandle,
        end_handle: AttrHandle,
    },
    /// Best-effort acked descriptor write (the CCCD subscribe).
    WriteDescriptor { handle: AttrHandle, value: [u8; 2] },
    /// A firmware control/data handle was just recorded — the readiness
    /// gate must be re-evaluated.
    FirmwareHandleResolved,
    /// A well-formed vibration sample arrived on the telemetry handle.
    EmitSample(Sample),
}

/// Effects emitted per event. Connect success emits the most (reset + MTU +
/// discovery), hence the small fixed bound.
pub type Effects = Vec<Effect, 4>;

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// The peer session state machine. One instance per gateway; owned by the
/// link adapter and driven from its single-threaded event-dispatch context.
pub struct SessionMachine {
    state: SessionState,
    session: PeerSession,
    target_name: heapless::String<32>,
    connect_timeout_ms: u32,
    descriptor_window: u16,
}

impl SessionMachine {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            state: SessionState::Scanning,
            session: PeerSession::default(),
            target_name: config.peer_name.clone(),
            connect_timeout_ms: config.connect_timeout_ms,
            descriptor_window: config.descriptor_window,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    /// Initial effect, issued once after the link stack syncs.
    pub fn start(&mut self) -> Effects {
        self.state = SessionState::Scanning;
        let mut fx = Effects::new();
        let _ = fx.push(Effect::StartScan);
        fx
    }

    /// Consume one link event, mutate the session, and return the effects
    /// the adapter must execute. Never blocks.
    pub fn handle(&mut self, event: LinkEvent<'_>) -> Effects {
        let mut fx = Effects::new();
        match event {
            LinkEvent::ScanResult { addr, name } => self.on_scan_result(addr, name, &mut fx),
            LinkEvent::ConnectResult {
                conn_handle,
                status,
            } => self.on_connect_result(conn_handle, status, &mut fx),
            LinkEvent::ServiceFound {
                uuid,
                start_handle,
                end_handle,
            } => self.on_service(uuid, start_handle, end_handle, &mut fx),
            LinkEvent::CharacteristicFound { uuid, value_handle } => {
                self.on_characteristic(uuid, value_handle, &mut fx);
            }
            LinkEvent::DescriptorFound { uuid16, handle } => {
                self.on_descriptor(uuid16, handle, &mut fx);
            }
            LinkEvent::Notification {
                attr_handle,
                payload,
            } => self.on_notification(attr_handle, payload, &mut fx),
            LinkEvent::Disconnect { reason } => self.on_disconnect(reason, &mut fx),
        }
        fx
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn on_scan_result(&mut self, addr: PeerAddr, name: Option<&[u8]>, fx: &mut Effects) {
        if self.state != SessionState::Scanning {
            return;
        }
        let Some(name) = name else { return };
        // Exact match: same length and same bytes. The advertised name is
        // not NUL-terminated, so this must never degrade into a prefix test.
        if name != self.target_name.as_bytes() {
            return;
        }
        info!("session: target '{}' found, connecting", self.target_name);
        self.state = SessionState::Connecting;
        let _ = fx.push(Effect::CancelScan);
        let _ = fx.push(Effect::Connect {
            addr,
            timeout_ms: self.connect_timeout_ms,
        });
    }

    fn on_connect_result(&mut self, conn_handle: u16, status: i32, fx: &mut Effects) {
        if status != 0 {
            warn!("session: connect failed (status={status}), rescanning");
            self.state = SessionState::Scanning;
            let _ = fx.push(Effect::StartScan);
            return;
        }
        info!("session: connected (conn={conn_handle})");
        self.session.conn_handle = Some(conn_handle);
        // Handles from any previous connection are meaningless now.
        self.session.clear_discovered();
        self.state = SessionState::DiscoveringServices;
        let _ = fx.push(Effect::ExchangeMtu);
        let _ = fx.push(Effect::DiscoverServices);
    }

    fn on_service(
        &mut self,
        uuid: Uuid128,
        start_handle: AttrHandle,
        end_handle: AttrHandle,
        fx: &mut Effects,
    ) {
        if self.session.conn_handle.is_none() {
            return;
        }
        if uuid == TELEMETRY_SERVICE_UUID || uuid == FIRMWARE_SERVICE_UUID {
            debug!("session: service {uuid} [{start_handle}..{end_handle}]");
            self.state = SessionState::DiscoveringCharacteristics;
            let _ = fx.push(Effect::DiscoverCharacteristics {
                start_handle,
                end_handle,
            });
        }
    }

    fn on_characteristic(&mut self, uuid: Uuid128, value_handle: AttrHandle, fx: &mut Effects) {
        if self.session.conn_handle.is_none() {
            return;
        }
        if uuid == TELEMETRY_CHAR_UUID {
            info!("session: telemetry characteristic at handle {value_handle}");
            self.session.telemetry_value_handle = Some(value_handle);
            self.state = SessionState::DiscoveringDescriptors;
            let _ = fx.push(Effect::DiscoverDescriptors {
                start_handle: value_handle,
                end_handle: value_handle.saturating_add(self.descriptor_window),
            });
        } else if uuid == FIRMWARE_CTRL_UUID {
            info!("session: firmware control characteristic at handle {value_handle}");
            self.session.control_value_handle = Some(value_handle);
            let _ = fx.push(Effect::FirmwareHandleResolved);
        } else if uuid == FIRMWARE_DATA_UUID {
            info!("session: firmware data characteristic at handle {value_handle}");
            self.session.data_value_handle = Some(value_handle);
            let _ = fx.push(Effect::FirmwareHandleResolved);
        }
    }

    fn on_descriptor(&mut self, uuid16: u16, handle: AttrHandle, fx: &mut Effects) {
        if self.session.conn_handle.is_none() || uuid16 != CCCD_UUID16 {
            return;
        }
        info!("session: CCCD at handle {handle}, enabling notifications");
        self.state = SessionState::Active;
        // Best-effort: a failed subscribe write is logged by the adapter and
        // never escalated.
        let _ = fx.push(Effect::WriteDescriptor {
            handle,
            value: [0x01, 0x00],
        });
    }

    fn on_notification(&mut self, attr_handle: AttrHandle, payload: &[u8], fx: &mut Effects) {
        if Some(attr_handle) != self.session.telemetry_value_handle {
            return;
        }
        // Malformed lengths are dropped silently; the stream self-heals on
        // the next well-formed frame.
        if let Some(sample) = Sample::decode(payload) {
            let _ = fx.push(Effect::EmitSample(sample));
        }
    }

    fn on_disconnect(&mut self, reason: i32, fx: &mut Effects) {
        warn!("session: disconnected (reason={reason}), rescanning");
        self.session.conn_handle = None;
        self.session.clear_discovered();
        self.state = SessionState::Scanning;
        let _ = fx.push(Effect::StartScan);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
