//! NimBLE central adapter.
//!
//! Owns the BLE side of the gateway: scanning, connecting, GATT discovery
//! and the peer writes the relay performs. NimBLE callbacks are C function
//! pointers that cannot capture Rust closures, so this module bridges them
//! the same way the rest of the firmware bridges ISR context: the
//! [`SessionMachine`] lives behind a static mutex, resolved handles are
//! mirrored into atomics for the main loop, and each callback is translated
//! into a [`LinkEvent`] before any decision is made.
//!
//! All NimBLE callbacks run on the NimBLE host task (never in ISR), so the
//! std mutex is safe here.

use core::ffi::c_void;
use core::sync::atomic::{AtomicU8, AtomicU16, Ordering};
use std::sync::Mutex;

use esp_idf_svc::sys as sys;
use log::{error, info, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, LinkError, Result};
use crate::events::{push_event, Event};
use crate::session::uuid::Uuid128;
use crate::session::{Effect, LinkEvent, PeerAddr, SessionMachine};
use crate::telemetry::{LogSampleSink, SampleSink};
use crate::transfer::{PeerWriter, WriteOutcome};

// NimBLE host error codes the relay treats as transient congestion.
const BLE_HS_ENOMEM: i32 = 6;
const BLE_HS_ESTALLED: i32 = 130;

// NimBLE's "no connection" sentinel (BLE_HS_CONN_HANDLE_NONE).
const CONN_HANDLE_NONE: u16 = 0xFFFF;

// Attribute handle 0 is reserved in GATT, so it doubles as "unset".
static CONN_HANDLE: AtomicU16 = AtomicU16::new(CONN_HANDLE_NONE);
static CTRL_HANDLE: AtomicU16 = AtomicU16::new(0);
static DATA_HANDLE: AtomicU16 = AtomicU16::new(0);
static OWN_ADDR_TYPE: AtomicU8 = AtomicU8::new(0);

static MACHINE: Mutex<Option<SessionMachine>> = Mutex::new(None);

/// Firmware control/data value handles, as last resolved. Read by the
/// readiness gate from the main loop.
pub fn firmware_handles() -> Option<(u16, u16)> {
    let ctrl = CTRL_HANDLE.load(Ordering::Acquire);
    let data = DATA_HANDLE.load(Ordering::Acquire);
    (ctrl != 0 && data != 0).then_some((ctrl, data))
}

fn conn_handle() -> Option<u16> {
    let h = CONN_HANDLE.load(Ordering::Acquire);
    (h != CONN_HANDLE_NONE).then_some(h)
}

/// Initialise the NimBLE host and hand the session machine to it. Scanning
/// starts once the controller syncs.
pub fn start(config: &GatewayConfig) -> Result<()> {
    {
        let mut guard = MACHINE
            .lock()
            .map_err(|_| Error::Init("session machine mutex poisoned"))?;
        *guard = Some(SessionMachine::new(config));
    }

    unsafe {
        let rc = sys::nimble_port_init();
        if rc != 0 {
            return Err(Error::Init("nimble_port_init failed"));
        }
        let cfg = &raw mut sys::ble_hs_cfg;
        (*cfg).sync_cb = Some(on_sync);
        (*cfg).reset_cb = Some(on_reset);
        sys::nimble_port_freertos_init(Some(host_task));
    }
    info!("ble: NimBLE host starting");
    Ok(())
}

// ---------------------------------------------------------------------------
// Machine dispatch
// ---------------------------------------------------------------------------

/// Feed one link event through the machine and execute the effects it
/// returns. Effects run outside the machine lock; NimBLE completions come
/// back asynchronously on the host task, so no re-entrancy is possible.
fn dispatch(event: LinkEvent<'_>) {
    let effects = {
        let Ok(mut guard) = MACHINE.lock() else {
            error!("ble: machine mutex poisoned, dropping event");
            return;
        };
        let Some(machine) = guard.as_mut() else {
            return;
        };
        machine.handle(event)
    };
    for effect in effects {
        execute(effect);
    }
}

fn execute(effect: Effect) {
    match effect {
        Effect::StartScan => start_scan(),
        Effect::CancelScan => unsafe {
            sys::ble_gap_disc_cancel();
        },
        Effect::Connect { addr, timeout_ms } => connect(addr, timeout_ms),
        Effect::ExchangeMtu => {
            if let Some(conn) = conn_handle() {
                let rc = unsafe {
                    sys::ble_gattc_exchange_mtu(conn, None, core::ptr::null_mut())
                };
                if rc != 0 {
                    warn!("ble: MTU exchange request failed (rc={rc})");
                }
            }
        }
        Effect::DiscoverServices => {
            if let Some(conn) = conn_handle() {
                let rc = unsafe {
                    sys::ble_gattc_disc_all_svcs(conn, Some(on_service), core::ptr::null_mut())
                };
                if rc != 0 {
                    link_failed(LinkError::DiscoveryFailed(rc));
                }
            }
        }
        Effect::DiscoverCharacteristics {
            start_handle,
            end_handle,
        } => {
            if let Some(conn) = conn_handle() {
                let rc = unsafe {
                    sys::ble_gattc_disc_all_chrs(
                        conn,
                        start_handle,
                        end_handle,
                        Some(on_characteristic),
                        core::ptr::null_mut(),
                    )
                };
                if rc != 0 {
                    link_failed(LinkError::DiscoveryFailed(rc));
                }
            }
        }
        Effect::DiscoverDescriptors {
            start_handle,
            end_handle,
        } => {
            if let Some(conn) = conn_handle() {
                let rc = unsafe {
                    sys::ble_gattc_disc_all_dscs(
                        conn,
                        start_handle,
                        end_handle,
                        Some(on_descriptor),
                        core::ptr::null_mut(),
                    )
                };
                if rc != 0 {
                    link_failed(LinkError::DiscoveryFailed(rc));
                }
            }
        }
        Effect::WriteDescriptor { handle, value } => {
            if let Some(conn) = conn_handle() {
                let rc = unsafe {
                    sys::ble_gattc_write_flat(
                        conn,
                        handle,
                        value.as_ptr().cast(),
                        value.len() as u16,
                        None,
                        core::ptr::null_mut(),
                    )
                };
                if rc != 0 {
                    // Subscribe is best effort; the stream simply stays
                    // silent until the next connection.
                    warn!("ble: CCCD write failed (rc={rc})");
                } else {
                    push_event(Event::TelemetrySubscribed);
                }
            }
        }
        Effect::FirmwareHandleResolved => {
            mirror_handles();
            push_event(Event::FirmwareHandleResolved);
        }
        Effect::EmitSample(sample) => {
            LogSampleSink.on_sample(sample);
        }
    }
}

/// Copy the machine's resolved handles into the atomics the main loop reads.
fn mirror_handles() {
    let Ok(guard) = MACHINE.lock() else { return };
    let Some(machine) = guard.as_ref() else {
        return;
    };
    let s = machine.session();
    CONN_HANDLE.store(s.conn_handle.unwrap_or(CONN_HANDLE_NONE), Ordering::Release);
    CTRL_HANDLE.store(s.control_value_handle.unwrap_or(0), Ordering::Release);
    DATA_HANDLE.store(s.data_value_handle.unwrap_or(0), Ordering::Release);
}

fn link_failed(e: LinkError) {
    error!("ble: {e}");
}

// ---------------------------------------------------------------------------
// GAP operations
// ---------------------------------------------------------------------------

fn start_scan() {
    let mut params: sys::ble_gap_disc_params = unsafe { core::mem::zeroed() };
    params.set_passive(0);
    params.set_filter_duplicates(1);
    let rc = unsafe {
        sys::ble_gap_disc(
            OWN_ADDR_TYPE.load(Ordering::Acquire),
            sys::BLE_HS_FOREVER as i32,
            &params,
            Some(on_gap_event),
            core::ptr::null_mut(),
        )
    };
    if rc != 0 {
        link_failed(LinkError::ScanFailed(rc));
    } else {
        info!("ble: scanning");
    }
}

fn connect(addr: PeerAddr, timeout_ms: u32) {
    let peer = sys::ble_addr_t {
        type_: addr.addr_type,
        val: addr.value,
    };
    let rc = unsafe {
        sys::ble_gap_connect(
            OWN_ADDR_TYPE.load(Ordering::Acquire),
            &peer,
            timeout_ms as i32,
            core::ptr::null(),
            Some(on_gap_event),
            core::ptr::null_mut(),
        )
    };
    if rc != 0 {
        link_failed(LinkError::ConnectFailed(rc));
        dispatch(LinkEvent::ConnectResult {
            conn_handle: 0,
            status: rc,
        });
    }
}

// ---------------------------------------------------------------------------
// NimBLE callbacks (host task context)
// ---------------------------------------------------------------------------

unsafe extern "C" fn on_sync() {
    let mut own_addr_type: u8 = 0;
    let rc = unsafe { sys::ble_hs_util_ensure_addr(0) };
    if rc != 0 {
        error!("ble: no usable address (rc={rc})");
        return;
    }
    let rc = unsafe { sys::ble_hs_id_infer_auto(0, &mut own_addr_type) };
    if rc != 0 {
        error!("ble: address inference failed (rc={rc})");
        return;
    }
    OWN_ADDR_TYPE.store(own_addr_type, Ordering::Release);
    info!("ble: host synced");

    let effects = {
        let Ok(mut guard) = MACHINE.lock() else { return };
        let Some(machine) = guard.as_mut() else {
            return;
        };
        machine.start()
    };
    for effect in effects {
        execute(effect);
    }
}

unsafe extern "C" fn on_reset(reason: i32) {
    warn!("ble: host reset (reason={reason})");
}

unsafe extern "C" fn host_task(_arg: *mut c_void) {
    unsafe {
        sys::nimble_port_run();
        sys::nimble_port_freertos_deinit();
    }
}

unsafe extern "C" fn on_gap_event(event: *mut sys::ble_gap_event, _arg: *mut c_void) -> i32 {
    let event = unsafe { &*event };
    match u32::from(event.type_) {
        sys::BLE_GAP_EVENT_DISC => {
            let disc = unsafe { event.__bindgen_anon_1.disc };
            let mut fields: sys::ble_hs_adv_fields = unsafe { core::mem::zeroed() };
            let rc = unsafe {
                sys::ble_hs_adv_parse_fields(&mut fields, disc.data, disc.length_data)
            };
            let name = (rc == 0 && !fields.name.is_null() && fields.name_len > 0).then(|| unsafe {
                core::slice::from_raw_parts(fields.name, fields.name_len as usize)
            });
            dispatch(LinkEvent::ScanResult {
                addr: PeerAddr {
                    value: disc.addr.val,
                    addr_type: disc.addr.type_,
                },
                name,
            });
        }
        sys::BLE_GAP_EVENT_CONNECT => {
            let connect = unsafe { event.__bindgen_anon_1.connect };
            if connect.status == 0 {
                CONN_HANDLE.store(connect.conn_handle, Ordering::Release);
            }
            dispatch(LinkEvent::ConnectResult {
                conn_handle: connect.conn_handle,
                status: connect.status,
            });
            if connect.status == 0 {
                push_event(Event::PeerConnected);
            }
        }
        sys::BLE_GAP_EVENT_DISCONNECT => {
            let disconnect = unsafe { event.__bindgen_anon_1.disconnect };
            CONN_HANDLE.store(CONN_HANDLE_NONE, Ordering::Release);
            CTRL_HANDLE.store(0, Ordering::Release);
            DATA_HANDLE.store(0, Ordering::Release);
            dispatch(LinkEvent::Disconnect {
                reason: disconnect.reason,
            });
            push_event(Event::PeerDisconnected);
        }
        sys::BLE_GAP_EVENT_NOTIFY_RX => {
            let notify = unsafe { event.__bindgen_anon_1.notify_rx };
            let mut buf = [0u8; 32];
            let mut len: u16 = 0;
            let rc = unsafe {
                sys::ble_hs_mbuf_to_flat(
                    notify.om,
                    buf.as_mut_ptr().cast(),
                    buf.len() as u16,
                    &mut len,
                )
            };
            if rc == 0 {
                dispatch(LinkEvent::Notification {
                    attr_handle: notify.attr_handle,
                    payload: &buf[..len as usize],
                });
            }
        }
        _ => {}
    }
    0
}

unsafe extern "C" fn on_service(
    _conn_handle: u16,
    error: *const sys::ble_gatt_error,
    service: *const sys::ble_gatt_svc,
    _arg: *mut c_void,
) -> i32 {
    let status = unsafe { (*error).status };
    // Status 14 (EDONE) terminates the walk; anything else mid-walk is an
    // individual result.
    if status == 0 && !service.is_null() {
        let svc = unsafe { &*service };
        if let Some(uuid) = uuid128_from(&svc.uuid) {
            dispatch(LinkEvent::ServiceFound {
                uuid,
                start_handle: svc.start_handle,
                end_handle: svc.end_handle,
            });
        }
    }
    0
}

unsafe extern "C" fn on_characteristic(
    _conn_handle: u16,
    error: *const sys::ble_gatt_error,
    chr: *const sys::ble_gatt_chr,
    _arg: *mut c_void,
) -> i32 {
    let status = unsafe { (*error).status };
    if status == 0 && !chr.is_null() {
        let chr = unsafe { &*chr };
        if let Some(uuid) = uuid128_from(&chr.uuid) {
            dispatch(LinkEvent::CharacteristicFound {
                uuid,
                value_handle: chr.val_handle,
            });
        }
    }
    0
}

unsafe extern "C" fn on_descriptor(
    _conn_handle: u16,
    error: *const sys::ble_gatt_error,
    _chr_val_handle: u16,
    dsc: *const sys::ble_gatt_dsc,
    _arg: *mut c_void,
) -> i32 {
    let status = unsafe { (*error).status };
    if status == 0 && !dsc.is_null() {
        let dsc = unsafe { &*dsc };
        if let Some(uuid16) = uuid16_from(&dsc.uuid) {
            dispatch(LinkEvent::DescriptorFound {
                uuid16,
                handle: dsc.handle,
            });
        }
    }
    0
}

// NimBLE stores 128-bit UUID values little-endian.
fn uuid128_from(uuid: &sys::ble_uuid_any_t) -> Option<Uuid128> {
    unsafe {
        if u32::from(uuid.u.type_) == sys::BLE_UUID_TYPE_128 {
            Some(Uuid128(u128::from_le_bytes(uuid.u128_.value)))
        } else {
            None
        }
    }
}

fn uuid16_from(uuid: &sys::ble_uuid_any_t) -> Option<u16> {
    unsafe {
        if u32::from(uuid.u.type_) == sys::BLE_UUID_TYPE_16 {
            Some(uuid.u16_.value)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Relay write port
// ---------------------------------------------------------------------------

/// [`PeerWriter`] over the live connection. Used from the relay worker task;
/// NimBLE GATT procedures are safe to issue off the host task.
pub struct NimblePeerWriter;

impl NimblePeerWriter {
    fn classify(rc: i32) -> WriteOutcome {
        match rc {
            0 => WriteOutcome::Sent,
            BLE_HS_ENOMEM | BLE_HS_ESTALLED => WriteOutcome::BufferFull,
            other => WriteOutcome::Fatal(other),
        }
    }
}

impl PeerWriter for NimblePeerWriter {
    fn write_ack(&mut self, handle: u16, payload: &[u8]) -> WriteOutcome {
        let conn = CONN_HANDLE.load(Ordering::Acquire);
        if conn == CONN_HANDLE_NONE {
            return WriteOutcome::Fatal(sys::BLE_HS_ENOTCONN as i32);
        }
        let rc = unsafe {
            sys::ble_gattc_write_flat(
                conn,
                handle,
                payload.as_ptr().cast(),
                payload.len() as u16,
                None,
                core::ptr::null_mut(),
            )
        };
        Self::classify(rc)
    }

    fn write_unacked(&mut self, handle: u16, payload: &[u8]) -> WriteOutcome {
        let conn = CONN_HANDLE.load(Ordering::Acquire);
        if conn == CONN_HANDLE_NONE {
            return WriteOutcome::Fatal(sys::BLE_HS_ENOTCONN as i32);
        }
        let rc = unsafe {
            sys::ble_gattc_write_no_rsp_flat(
                conn,
                handle,
                payload.as_ptr().cast(),
                payload.len() as u16,
            )
        };
        Self::classify(rc)
    }
}
