//! Platform adapters — everything that touches a radio, a socket or a
//! FreeRTOS primitive lives here, behind the ports the core modules define.

#[cfg(feature = "espidf")]
pub mod ble_central;
#[cfg(feature = "espidf")]
pub mod http_source;
pub mod wifi;
