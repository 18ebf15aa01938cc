//! Gateway event queue.
//!
//! Single producer, single consumer: the NimBLE host task pushes peer
//! session events from its callbacks, and the main loop drains them. The
//! main loop's other inputs (WiFi transitions, relay lifecycle events) are
//! observed directly in the loop and never pass through this queue, which
//! is what keeps the SPSC discipline honest.
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ NimBLE host task │────▶│  Event Queue │────▶│  Main Loop   │
//! │ (producer)       │     │  (lock-free) │     │  (consumer)  │
//! └──────────────────┘     └──────────────┘     └──────────────┘
//! ```

use core::sync::atomic::{AtomicU8, Ordering};

/// Maximum number of pending events.
/// Power of 2 for efficient ring buffer modulo.
const EVENT_QUEUE_CAP: usize = 32;

/// Peer session events. Discriminants leave gaps so new events slot in
/// without renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Event {
    /// BLE connection to the node established.
    PeerConnected = 10,
    /// BLE connection lost; scanning resumed.
    PeerDisconnected = 11,
    /// A firmware control/data value handle was resolved.
    FirmwareHandleResolved = 12,
    /// Telemetry notifications were enabled on the node.
    TelemetrySubscribed = 13,
}

impl Event {
    /// Whether this event can change an input of the relay readiness
    /// predicate.
    pub fn affects_readiness(self) -> bool {
        matches!(self, Self::FirmwareHandleResolved | Self::PeerDisconnected)
    }
}

// ── Lock-free SPSC ring buffer ────────────────────────────────
//
// The producer never blocks; the buffer lives in a static so the C
// callback shims can reach it.

static EVENT_HEAD: AtomicU8 = AtomicU8::new(0);
static EVENT_TAIL: AtomicU8 = AtomicU8::new(0);
// SAFETY: EVENT_BUFFER cells are written only by the producer at `head`
// before the Release store advancing EVENT_HEAD, and read only by the single
// consumer at `tail` after an Acquire load of EVENT_HEAD. Head and tail never
// alias a live cell.
static mut EVENT_BUFFER: [u8; EVENT_QUEUE_CAP] = [0; EVENT_QUEUE_CAP];

/// Push an event into the queue.
/// Lock-free; safe to call from the host-task callback context.
/// Returns `false` if the queue is full (event dropped).
pub fn push_event(event: Event) -> bool {
    let head = EVENT_HEAD.load(Ordering::Relaxed);
    let tail = EVENT_TAIL.load(Ordering::Acquire);
    let next_head = (head + 1) % EVENT_QUEUE_CAP as u8;

    if next_head == tail {
        return false; // Queue full — drop event.
    }

    // SAFETY: single producer per the SPSC discipline described above.
    unsafe {
        (*&raw mut EVENT_BUFFER)[head as usize] = event as u8;
    }

    EVENT_HEAD.store(next_head, Ordering::Release);
    true
}

/// Pop the next event from the queue.
/// Called from the main loop (single consumer).
/// Returns `None` if the queue is empty.
pub fn pop_event() -> Option<Event> {
    let tail = EVENT_TAIL.load(Ordering::Relaxed);
    let head = EVENT_HEAD.load(Ordering::Acquire);

    if tail == head {
        return None; // Empty.
    }

    let raw = unsafe { (*&raw const EVENT_BUFFER)[tail as usize] };
    EVENT_TAIL.store((tail + 1) % EVENT_QUEUE_CAP as u8, Ordering::Release);

    event_from_u8(raw)
}

/// Drain all pending events into a callback, FIFO order.
pub fn drain_events(mut handler: impl FnMut(Event)) {
    while let Some(event) = pop_event() {
        handler(event);
    }
}

/// Check if the event queue is empty.
pub fn queue_is_empty() -> bool {
    let tail = EVENT_TAIL.load(Ordering::Relaxed);
    let head = EVENT_HEAD.load(Ordering::Acquire);
    tail == head
}

// ── Internal ──────────────────────────────────────────────────

fn event_from_u8(raw: u8) -> Option<Event> {
    match raw {
        10 => Some(Event::PeerConnected),
        11 => Some(Event::PeerDisconnected),
        12 => Some(Event::FirmwareHandleResolved),
        13 => Some(Event::TelemetrySubscribed),
        _ => None,
    }
}
