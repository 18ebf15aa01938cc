//! Mock link-layer and download-source adapters shared by the
//! integration tests.

use std::sync::{Arc, Mutex};

use shmgate::error::TransferError;
use shmgate::gate::RelayLauncher;
use shmgate::session::AttrHandle;
use shmgate::transfer::{
    ImageSource, ImageStream, Pacer, PeerWriter, TransferEvent, TransferEventSink, WriteOutcome,
};

/// In-memory image source; content is a deterministic byte pattern.
pub struct MemoryImageSource {
    pub image: Vec<u8>,
}

impl MemoryImageSource {
    pub fn patterned(len: usize) -> Self {
        Self {
            image: (0..len).map(|i| (i % 251) as u8).collect(),
        }
    }
}

pub struct MemoryImageStream {
    data: Vec<u8>,
    pos: usize,
}

impl ImageSource for MemoryImageSource {
    type Stream = MemoryImageStream;
    fn open(&mut self, _url: &str) -> Result<MemoryImageStream, TransferError> {
        Ok(MemoryImageStream {
            data: self.image.clone(),
            pos: 0,
        })
    }
}

impl ImageStream for MemoryImageStream {
    fn content_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// A source whose stream fails after yielding `good_bytes`.
pub struct FlakySource {
    pub image: Vec<u8>,
    pub good_bytes: usize,
}

pub struct FlakyStream {
    data: Vec<u8>,
    pos: usize,
    good_bytes: usize,
}

impl ImageSource for FlakySource {
    type Stream = FlakyStream;
    fn open(&mut self, _url: &str) -> Result<FlakyStream, TransferError> {
        Ok(FlakyStream {
            data: self.image.clone(),
            pos: 0,
            good_bytes: self.good_bytes,
        })
    }
}

impl ImageStream for FlakyStream {
    fn content_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        if self.pos >= self.good_bytes {
            return Err(TransferError::SourceRead);
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// A source whose server is unreachable: every `open` fails.
pub struct DeadSource;

impl ImageSource for DeadSource {
    type Stream = FlakyStream;
    fn open(&mut self, _url: &str) -> Result<FlakyStream, TransferError> {
        Err(TransferError::SourceOpen)
    }
}

/// Records every write. `fatal_after` injects a link drop mid-transfer:
/// once that many data chunks have been accepted, further writes fail the
/// way a dead connection fails.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    inner: Arc<Mutex<WriterState>>,
}

#[derive(Default)]
struct WriterState {
    writes: Vec<(AttrHandle, Vec<u8>, bool)>,
    data_chunks_accepted: usize,
    fatal_after: Option<usize>,
}

impl RecordingWriter {
    pub fn fatal_after_chunks(n: usize) -> Self {
        let w = Self::default();
        w.inner.lock().unwrap().fatal_after = Some(n);
        w
    }

    pub fn writes(&self) -> Vec<(AttrHandle, Vec<u8>, bool)> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn data_payload(&self) -> Vec<u8> {
        self.inner
            .lock()
            .unwrap()
            .writes
            .iter()
            .filter(|(_, _, acked)| !acked)
            .flat_map(|(_, p, _)| p.clone())
            .collect()
    }

    fn record(&self, handle: AttrHandle, payload: &[u8], acked: bool) -> WriteOutcome {
        let mut s = self.inner.lock().unwrap();
        if let Some(limit) = s.fatal_after {
            if s.data_chunks_accepted >= limit {
                return WriteOutcome::Fatal(7); // BLE_HS_ENOTCONN
            }
        }
        s.writes.push((handle, payload.to_vec(), acked));
        if !acked {
            s.data_chunks_accepted += 1;
        }
        WriteOutcome::Sent
    }
}

impl PeerWriter for RecordingWriter {
    fn write_ack(&mut self, handle: AttrHandle, payload: &[u8]) -> WriteOutcome {
        self.record(handle, payload, true)
    }
    fn write_unacked(&mut self, handle: AttrHandle, payload: &[u8]) -> WriteOutcome {
        self.record(handle, payload, false)
    }
}

/// Virtual clock: accumulates the delays the relay requested instead of
/// sleeping.
#[derive(Clone, Default)]
pub struct VirtualPacer {
    delays: Arc<Mutex<Vec<u32>>>,
}

impl VirtualPacer {
    pub fn delays(&self) -> Vec<u32> {
        self.delays.lock().unwrap().clone()
    }

    pub fn total_ms(&self) -> u64 {
        self.delays.lock().unwrap().iter().map(|&d| u64::from(d)).sum()
    }
}

impl Pacer for VirtualPacer {
    fn delay_ms(&mut self, ms: u32) {
        self.delays.lock().unwrap().push(ms);
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<TransferEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TransferEventSink for RecordingSink {
    fn emit(&mut self, event: TransferEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    pub launches: Vec<(AttrHandle, AttrHandle)>,
}

impl RelayLauncher for RecordingLauncher {
    fn launch(&mut self, ctrl_handle: AttrHandle, data_handle: AttrHandle) {
        self.launches.push((ctrl_handle, data_handle));
    }
}
