//! Gateway configuration parameters.
//!
//! Peer identity, attribute identifiers, download URL, WiFi credentials and
//! the transfer tuning values. Everything is compiled in for now; a future
//! revision should load this from NVS or provisioning instead of constants.

use serde::{Deserialize, Serialize};

use crate::session::uuid::Uuid128;

// --- Peer attribute identifiers (must match the node firmware) ---

/// Telemetry (vibration stream) service.
pub const TELEMETRY_SERVICE_UUID: Uuid128 =
    Uuid128::from_u128(0x12345678_1234_1234_1234_1234567890ab);
/// Telemetry notify characteristic.
pub const TELEMETRY_CHAR_UUID: Uuid128 =
    Uuid128::from_u128(0xabcd1234_5678_90ab_cdef_1234567890ab);
/// Firmware update service.
pub const FIRMWARE_SERVICE_UUID: Uuid128 =
    Uuid128::from_u128(0x12345678_0000_0000_0000_1234567890ab);
/// Firmware control characteristic (acked writes: begin / end).
pub const FIRMWARE_CTRL_UUID: Uuid128 =
    Uuid128::from_u128(0xabcd1234_0001_0000_0000_1234567890ab);
/// Firmware data characteristic (unacked chunk writes).
pub const FIRMWARE_DATA_UUID: Uuid128 =
    Uuid128::from_u128(0xabcd1234_0002_0000_0000_1234567890ab);

/// Core gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    // --- Peer session ---
    /// Advertised name of the target node (exact match, byte-for-byte).
    pub peer_name: heapless::String<32>,
    /// BLE connection establishment timeout (milliseconds).
    pub connect_timeout_ms: u32,
    /// Descriptor discovery window after the telemetry value handle.
    pub descriptor_window: u16,

    // --- Network ---
    pub wifi_ssid: heapless::String<32>,
    pub wifi_password: heapless::String<64>,
    /// Firmware image download URL (HTTP GET).
    pub firmware_url: heapless::String<128>,

    // --- Firmware relay tuning ---
    pub transfer: TransferTuning,
}

/// Timing and flow-control parameters for the firmware relay.
///
/// The two delay tiers match the node's flash geometry: its erase block is
/// far coarser than a BLE packet, so the relay pauses longer every time the
/// byte counter crosses an erase-block boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransferTuning {
    /// Settling delay after the begin-transfer control byte, giving the node
    /// time to erase its write target (milliseconds).
    pub settle_delay_ms: u32,
    /// Node flash erase-block granularity (bytes).
    pub erase_block_bytes: u32,
    /// Delay inserted when `bytes_sent` crosses an erase-block boundary.
    pub erase_delay_ms: u32,
    /// Delay between ordinary chunks (milliseconds).
    pub interchunk_delay_ms: u32,
    /// Backoff before retrying a chunk after a buffer-full write.
    pub retry_delay_ms: u32,
    /// Maximum buffer-full retries per chunk before aborting the transfer.
    pub max_write_retries: u32,
    /// Progress report stride (bytes).
    pub progress_stride_bytes: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            peer_name: heapless::String::try_from("SHM_Node_C3").unwrap_or_default(),
            connect_timeout_ms: 30_000,
            descriptor_window: 10,

            wifi_ssid: heapless::String::try_from("shm-backhaul").unwrap_or_default(),
            wifi_password: heapless::String::try_from("change-me-please").unwrap_or_default(),
            firmware_url: heapless::String::try_from(
                "http://192.168.100.184:5000/firmware/download/shm-node.bin",
            )
            .unwrap_or_default(),

            transfer: TransferTuning::default(),
        }
    }
}

impl Default for TransferTuning {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1000,
            erase_block_bytes: 4096,
            erase_delay_ms: 150,
            interchunk_delay_ms: 20,
            retry_delay_ms: 10,
            max_write_retries: 500, // ~5 s of backoff per chunk
            progress_stride_bytes: 10_240,
        }
    }
}
