//! SHM Gateway Firmware — Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  WifiBackhaul        ble_central         HttpImageSource       │
//! │  (STA uplink)        (NimBLE central)    (image download)      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │     SessionMachine · FirmwareRelay · readiness gate    │    │
//! │  │                  (pure, host-tested)                   │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use log::{error, info, warn};

use shmgate::adapters::ble_central;
use shmgate::adapters::wifi::WifiBackhaul;
use shmgate::config::GatewayConfig;
use shmgate::events::{self, Event};
use shmgate::gate;
use shmgate::session::PeerSession;
use shmgate::transfer::{channel, TransferEvent, TransferState};
use shmgate::worker::RelayWorker;

/// Shared with the relay worker task, hence `static`.
static RELAY_STATE: TransferState = TransferState::new();

const MAIN_TICK_MS: u32 = 100;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  SHM Gateway v{}                     ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    install_panic_hook();

    let config = GatewayConfig::default();

    // ── 2. WiFi backhaul ──────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let driver = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs))?,
        sysloop,
    )?;
    let mut wifi = WifiBackhaul::new(driver);
    wifi.set_credentials(&config.wifi_ssid, &config.wifi_password)?;
    if let Err(e) = wifi.connect() {
        // Not fatal: poll() keeps retrying with backoff, and the relay
        // gate stays closed until the uplink is there.
        warn!("initial WiFi association failed ({e}), retrying in background");
    }

    // ── 3. BLE central ────────────────────────────────────────
    ble_central::start(&config)?;

    // ── 4. Relay launcher ─────────────────────────────────────
    let mut launcher = RelayWorker::new(config.firmware_url.clone(), config.transfer, &RELAY_STATE);

    info!("System ready. Entering event loop.");

    // ── 5. Event loop ─────────────────────────────────────────
    let mut net_up = wifi.is_connected();

    loop {
        FreeRtos::delay_ms(MAIN_TICK_MS);
        wifi.poll();

        let mut recheck = false;

        // Backhaul transitions are observed here rather than queued: the
        // main loop is the only consumer of this state.
        let now_up = wifi.is_connected();
        if now_up != net_up {
            if now_up {
                info!("backhaul up");
            } else {
                warn!("backhaul down");
            }
            net_up = now_up;
            recheck = true;
        }

        // Peer session events from the NimBLE host task.
        events::drain_events(|event| {
            match event {
                Event::PeerConnected => info!("node connected"),
                Event::PeerDisconnected => warn!("node disconnected"),
                Event::FirmwareHandleResolved => info!("firmware handle resolved"),
                Event::TelemetrySubscribed => info!("vibration stream subscribed"),
            }
            if event.affects_readiness() {
                recheck = true;
            }
        });

        // Relay lifecycle events from the worker task.
        while let Some(te) = channel::try_recv() {
            match te {
                TransferEvent::Started { total } => {
                    info!("firmware relay started (image {total:?} bytes)");
                }
                TransferEvent::Progress { sent, total: Some(len) } => {
                    info!("firmware relay: {sent} / {len} bytes");
                }
                TransferEvent::Progress { sent, total: None } => {
                    info!("firmware relay: {sent} bytes");
                }
                TransferEvent::Completed { sent } => {
                    info!("firmware relay completed ({sent} bytes)");
                    recheck = true;
                }
                TransferEvent::Aborted(e) => {
                    error!("firmware relay aborted: {e}");
                    recheck = true;
                }
            }
        }

        if recheck {
            let session = session_snapshot();
            gate::check_and_launch(net_up, &session, &RELAY_STATE, &mut launcher);
        }
    }
}

/// Make panics land in the serial log before the watchdog reset.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        error!("PANIC: {reason}");
    }));
}

/// Snapshot of the peer session as the gate needs it, rebuilt from the
/// handle mirror the BLE adapter maintains.
fn session_snapshot() -> PeerSession {
    let handles = ble_central::firmware_handles();
    PeerSession {
        conn_handle: None,
        telemetry_value_handle: None,
        control_value_handle: handles.map(|(c, _)| c),
        data_value_handle: handles.map(|(_, d)| d),
    }
}
