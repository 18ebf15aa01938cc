//! Flow-controlled firmware relay.
//!
//! Streams a firmware image from the HTTP download source to the node over
//! the firmware data characteristic, in fixed 256-byte chunks framed by the
//! begin/end control bytes. The node has no credit protocol, so the relay
//! self-paces: a long settle delay after `begin` (the node erases its write
//! target), a longer pause every time the byte counter crosses an
//! erase-block boundary, and a short pause between ordinary chunks.
//!
//! Every collaborator is a trait so the whole relay runs on the host in
//! tests with recorded writes and virtual time.

pub mod channel;

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{error, info, warn};

use crate::config::TransferTuning;
use crate::error::TransferError;
use crate::session::AttrHandle;

/// Fixed relay chunk size (bytes). The node reassembles on this boundary.
pub const CHUNK_SIZE: usize = 256;

/// Control byte announcing a transfer.
pub const CTRL_BEGIN: u8 = 0x01;
/// Control byte terminating a transfer.
pub const CTRL_END: u8 = 0x02;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Result of one attribute write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Accepted by the link layer.
    Sent,
    /// Transient congestion (controller buffers full); retry after a pause.
    BufferFull,
    /// Anything else; aborts the transfer.
    Fatal(i32),
}

/// Writes attributes on the established peer connection.
pub trait PeerWriter {
    /// Acknowledged write (control bytes).
    fn write_ack(&mut self, handle: AttrHandle, payload: &[u8]) -> WriteOutcome;
    /// Unacknowledged write (data chunks).
    fn write_unacked(&mut self, handle: AttrHandle, payload: &[u8]) -> WriteOutcome;
}

/// Open firmware image streams by URL.
pub trait ImageSource {
    type Stream: ImageStream;
    fn open(&mut self, url: &str) -> Result<Self::Stream, TransferError>;
}

/// One open download in progress.
pub trait ImageStream {
    /// Image size, when the source announced one.
    fn content_length(&self) -> Option<u64>;
    /// Read up to `buf.len()` bytes; `Ok(0)` is end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransferError>;
}

/// Blocking delay provider. On target this parks the relay task; in tests
/// it records what the relay asked for.
pub trait Pacer {
    fn delay_ms(&mut self, ms: u32);
}

/// Observer for relay lifecycle events.
pub trait TransferEventSink {
    fn emit(&mut self, event: TransferEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    Started { total: Option<u64> },
    Progress { sent: u32, total: Option<u64> },
    Completed { sent: u32 },
    Aborted(TransferError),
}

// ---------------------------------------------------------------------------
// Shared transfer state
// ---------------------------------------------------------------------------

/// Cross-context relay state, shared between the readiness gate (main loop)
/// and the relay worker. Lives in a `static`, hence the atomics and the
/// `const` constructor.
pub struct TransferState {
    in_progress: AtomicBool,
    completed: AtomicBool,
    bytes_sent: AtomicU32,
}

impl TransferState {
    pub const fn new() -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            bytes_sent: AtomicU32::new(0),
        }
    }

    /// Claim the single relay slot. Returns `false` if a run is already in
    /// progress or one already completed this boot.
    pub fn try_begin(&self) -> bool {
        if self.completed.load(Ordering::Acquire) {
            return false;
        }
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the slot. `completed` latches until reboot, so a finished
    /// image is never re-sent; an aborted run stays eligible.
    pub fn end(&self, completed: bool) {
        if completed {
            self.completed.store(true, Ordering::Release);
        }
        self.in_progress.store(false, Ordering::Release);
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn bytes_sent(&self) -> u32 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    fn record_bytes(&self, sent: u32) {
        self.bytes_sent.store(sent, Ordering::Relaxed);
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Runs one firmware relay end to end. The caller must already own the slot
/// via [`TransferState::try_begin`]; `run` releases it on every exit path.
pub struct FirmwareRelay<'a> {
    tuning: TransferTuning,
    state: &'a TransferState,
}

impl<'a> FirmwareRelay<'a> {
    pub fn new(tuning: TransferTuning, state: &'a TransferState) -> Self {
        Self { tuning, state }
    }

    /// Download from `url` and stream to the node. Returns the bytes sent on
    /// success. Failure leaves `completed` unlatched so the next readiness
    /// event can retry from scratch.
    pub fn run<S, W, P, E>(
        &self,
        url: &str,
        ctrl_handle: AttrHandle,
        data_handle: AttrHandle,
        source: &mut S,
        writer: &mut W,
        pacer: &mut P,
        events: &mut E,
    ) -> Result<u32, TransferError>
    where
        S: ImageSource,
        W: PeerWriter,
        P: Pacer,
        E: TransferEventSink,
    {
        let result =
            self.execute(url, ctrl_handle, data_handle, source, writer, pacer, events);
        match result {
            Ok(sent) => {
                info!("relay: transfer complete ({sent} bytes)");
                events.emit(TransferEvent::Completed { sent });
                self.state.end(true);
            }
            Err(e) => {
                error!("relay: transfer aborted: {e}");
                events.emit(TransferEvent::Aborted(e));
                self.state.end(false);
            }
        }
        result
    }

    fn execute<S, W, P, E>(
        &self,
        url: &str,
        ctrl_handle: AttrHandle,
        data_handle: AttrHandle,
        source: &mut S,
        writer: &mut W,
        pacer: &mut P,
        events: &mut E,
    ) -> Result<u32, TransferError>
    where
        S: ImageSource,
        W: PeerWriter,
        P: Pacer,
        E: TransferEventSink,
    {
        let t = &self.tuning;

        // Announce the transfer first: the node erases its write target on
        // the begin byte, and the settle delay covers both that erase and
        // the download handshake that follows.
        self.paced_write(writer, pacer, ctrl_handle, &[CTRL_BEGIN], true)?;
        pacer.delay_ms(t.settle_delay_ms);

        let mut stream = source.open(url)?;
        let total = stream.content_length();
        match total {
            Some(len) => info!("relay: image opened, {len} bytes"),
            None => warn!("relay: image opened, length unknown"),
        }
        events.emit(TransferEvent::Started { total });

        let mut chunk = [0u8; CHUNK_SIZE];
        let mut sent: u32 = 0;
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.paced_write(writer, pacer, data_handle, &chunk[..n], false)?;
            sent += n as u32;
            self.state.record_bytes(sent);

            if sent % t.progress_stride_bytes == 0 {
                match total {
                    Some(len) => info!("relay: {sent} / {len} bytes sent"),
                    None => info!("relay: {sent} bytes sent"),
                }
                events.emit(TransferEvent::Progress { sent, total });
            }
            // Erase-block boundary: the node stalls while erasing the next
            // block, so back off long enough for it to finish.
            if sent % t.erase_block_bytes == 0 {
                pacer.delay_ms(t.erase_delay_ms);
            } else {
                pacer.delay_ms(t.interchunk_delay_ms);
            }
        }

        self.paced_write(writer, pacer, ctrl_handle, &[CTRL_END], true)?;
        Ok(sent)
    }

    /// One write with the bounded buffer-full retry budget.
    fn paced_write<W, P>(
        &self,
        writer: &mut W,
        pacer: &mut P,
        handle: AttrHandle,
        payload: &[u8],
        acked: bool,
    ) -> Result<(), TransferError>
    where
        W: PeerWriter,
        P: Pacer,
    {
        let mut retries = 0u32;
        loop {
            let outcome = if acked {
                writer.write_ack(handle, payload)
            } else {
                writer.write_unacked(handle, payload)
            };
            match outcome {
                WriteOutcome::Sent => return Ok(()),
                WriteOutcome::BufferFull => {
                    if retries >= self.tuning.max_write_retries {
                        return Err(TransferError::RetriesExhausted);
                    }
                    retries += 1;
                    pacer.delay_ms(self.tuning.retry_delay_ms);
                }
                WriteOutcome::Fatal(rc) => return Err(TransferError::FatalWrite(rc)),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
