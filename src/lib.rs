//! SHM gateway firmware library.
//!
//! Bridges a battery-powered structural-health-monitoring sensor node
//! (BLE peripheral) to the WiFi backhaul: relays its vibration telemetry
//! and pushes firmware images down to it over GATT with explicit pacing.
//!
//! The core modules ([`session`], [`transfer`], [`gate`], [`telemetry`])
//! are platform-free and host-testable; everything that touches ESP-IDF
//! lives in [`adapters`] and [`worker`] behind the `espidf` feature.

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod session;
pub mod telemetry;
pub mod transfer;
pub mod worker;
