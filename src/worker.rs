//! Core-pinned worker spawning and the relay task.
//!
//! ESP-IDF implements `std::thread` via pthreads over FreeRTOS tasks.
//! `esp_pthread_set_cfg()` sets thread-local configuration that applies to
//! the *next* `pthread_create()` from the calling thread, so the
//! config→spawn pair must not be interleaved with other thread creation on
//! the same thread.
//!
//! The relay runs on the APP core: the PRO core carries the WiFi and BLE
//! protocol stacks, and a relay stall behind them is exactly what the
//! pacing delays are meant to avoid.

#[cfg(feature = "espidf")]
use log::error;
use log::info;

#[cfg(feature = "espidf")]
use crate::adapters::ble_central::NimblePeerWriter;
#[cfg(feature = "espidf")]
use crate::adapters::http_source::HttpImageSource;
#[cfg(feature = "espidf")]
use crate::config::TransferTuning;
#[cfg(feature = "espidf")]
use crate::gate::RelayLauncher;
#[cfg(feature = "espidf")]
use crate::session::AttrHandle;
#[cfg(feature = "espidf")]
use crate::transfer::channel::ChannelSink;
#[cfg(feature = "espidf")]
use crate::transfer::{FirmwareRelay, Pacer, TransferState};

/// CPU core identifiers for the ESP32-S3 Xtensa LX7 dual-core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU) — protocol stacks (WiFi, BLE, lwIP).
    Pro = 0,
    /// Core 1 (APP_CPU) — application logic.
    App = 1,
}

/// Spawn a thread pinned to a core with explicit priority and stack size.
/// `name` must be null-terminated (e.g. `"fw-relay\0"`).
#[cfg(feature = "espidf")]
pub fn spawn_on_core(
    core: Core,
    priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> std::thread::JoinHandle<()> {
    unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = core as i32;
        cfg.prio = priority as i32;
        cfg.stack_size = (stack_kb * 1024) as i32;
        cfg.thread_name = name.as_ptr() as *const _;
        let ret = esp_idf_sys::esp_pthread_set_cfg(&cfg);
        assert!(
            ret == esp_idf_sys::ESP_OK as i32,
            "esp_pthread_set_cfg failed: {ret}"
        );
    }

    let display_name = name.trim_end_matches('\0');
    info!("spawning '{display_name}' on {core:?} (pri={priority}, stack={stack_kb}KB)");

    std::thread::Builder::new()
        .name(display_name.into())
        .spawn(f)
        .expect("spawn_on_core: thread creation failed")
}

/// Simulation fallback — ignores core affinity and priority.
#[cfg(not(feature = "espidf"))]
pub fn spawn_on_core(
    _core: Core,
    _priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> std::thread::JoinHandle<()> {
    let display_name = name.trim_end_matches('\0');
    info!("spawning '{display_name}' (sim, no core pinning, stack={stack_kb}KB)");

    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
        .expect("spawn_on_core(sim): thread creation failed")
}

/// Blocking pacer over the FreeRTOS tick.
#[cfg(feature = "espidf")]
pub struct FreeRtosPacer;

#[cfg(feature = "espidf")]
impl Pacer for FreeRtosPacer {
    fn delay_ms(&mut self, ms: u32) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);
    }
}

/// Launches one relay run on a pinned worker task. The readiness gate has
/// already claimed the relay slot by the time `launch` is called.
#[cfg(feature = "espidf")]
pub struct RelayWorker {
    url: heapless::String<128>,
    tuning: TransferTuning,
    state: &'static TransferState,
}

#[cfg(feature = "espidf")]
impl RelayWorker {
    pub fn new(
        url: heapless::String<128>,
        tuning: TransferTuning,
        state: &'static TransferState,
    ) -> Self {
        Self { url, tuning, state }
    }
}

#[cfg(feature = "espidf")]
impl RelayLauncher for RelayWorker {
    fn launch(&mut self, ctrl_handle: AttrHandle, data_handle: AttrHandle) {
        let url = self.url.clone();
        let tuning = self.tuning;
        let state = self.state;
        let _ = spawn_on_core(Core::App, 5, 8, "fw-relay\0", move || {
            let relay = FirmwareRelay::new(tuning, state);
            let result = relay.run(
                url.as_str(),
                ctrl_handle,
                data_handle,
                &mut HttpImageSource,
                &mut NimblePeerWriter,
                &mut FreeRtosPacer,
                &mut ChannelSink,
            );
            if let Err(e) = result {
                error!("relay worker: {e}");
            }
        });
    }
}
