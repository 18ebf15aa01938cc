//! Relay-to-main-loop event channel.
//!
//! The relay worker runs on its own task; its lifecycle events cross back to
//! the main loop through a static bounded channel. `try_send` keeps the
//! worker non-blocking; if the main loop falls behind, intermediate progress
//! events are dropped (the terminal event is what matters, and the worker
//! emits few enough that 8 slots never fill in practice).

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use super::{TransferEvent, TransferEventSink};

const DEPTH: usize = 8;

static TRANSFER_EVENTS: Channel<CriticalSectionRawMutex, TransferEvent, DEPTH> = Channel::new();

/// Sink handed to the relay worker.
#[derive(Default)]
pub struct ChannelSink;

impl TransferEventSink for ChannelSink {
    fn emit(&mut self, event: TransferEvent) {
        if TRANSFER_EVENTS.try_send(event).is_err() {
            warn!("relay: event channel full, dropping {event:?}");
        }
    }
}

/// Non-blocking receive side, polled from the main loop.
pub fn try_recv() -> Option<TransferEvent> {
    TRANSFER_EVENTS.try_receive().ok()
}
