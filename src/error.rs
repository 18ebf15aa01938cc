//! Unified error types for the SHM gateway firmware.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! main-loop error handling uniform. All variants are `Copy` so they can be
//! passed between the link-event context and the relay worker without
//! allocation.
//!
//! None of these are process-fatal: link errors resume scanning, transfer
//! errors leave the transfer eligible for the next readiness trigger, and
//! connectivity errors feed the WiFi reconnect backoff.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level gateway error
// ---------------------------------------------------------------------------

/// Every fallible operation in the gateway funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The BLE link layer failed (scan, connect, discovery, subscribe).
    Link(LinkError),
    /// The firmware relay aborted.
    Transfer(TransferError),
    /// The connectivity provider (WiFi STA) failed.
    Net(NetError),
    /// Subsystem initialisation failed.
    Init(&'static str),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Transfer(e) => write!(f, "transfer: {e}"),
            Self::Net(e) => write!(f, "net: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Link-layer errors (recoverable: all paths resume scanning)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Starting or restarting the scan failed.
    ScanFailed(i32),
    /// Connection initiation or establishment failed.
    ConnectFailed(i32),
    /// A discovery procedure could not be started.
    DiscoveryFailed(i32),
    /// The CCCD subscribe write failed (best-effort, logged only).
    SubscribeFailed(i32),
    /// An operation required a connection but none exists.
    NotConnected,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScanFailed(rc) => write!(f, "scan failed (rc={rc})"),
            Self::ConnectFailed(rc) => write!(f, "connect failed (rc={rc})"),
            Self::DiscoveryFailed(rc) => write!(f, "discovery failed (rc={rc})"),
            Self::SubscribeFailed(rc) => write!(f, "subscribe write failed (rc={rc})"),
            Self::NotConnected => write!(f, "no peer connection"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Transfer errors (fatal to the current transfer only)
// ---------------------------------------------------------------------------

/// Aborts the current relay run without marking it completed, which leaves
/// the transfer eligible for retriggering on the next readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// The download source could not be opened.
    SourceOpen,
    /// The download stream failed mid-read.
    SourceRead,
    /// A data write returned a non-success, non-buffer-full result.
    FatalWrite(i32),
    /// The bounded buffer-full retry budget was exhausted on one chunk.
    RetriesExhausted,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceOpen => write!(f, "download source open failed"),
            Self::SourceRead => write!(f, "download stream read failed"),
            Self::FatalWrite(rc) => write!(f, "fatal data write (rc={rc})"),
            Self::RetriesExhausted => write!(f, "buffer-full retries exhausted"),
        }
    }
}

impl From<TransferError> for Error {
    fn from(e: TransferError) -> Self {
        Self::Transfer(e)
    }
}

// ---------------------------------------------------------------------------
// Connectivity errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    WifiConnectFailed,
    WifiDisconnected,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WifiConnectFailed => write!(f, "WiFi connect failed"),
            Self::WifiDisconnected => write!(f, "WiFi disconnected"),
        }
    }
}

impl From<NetError> for Error {
    fn from(e: NetError) -> Self {
        Self::Net(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Gateway-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
