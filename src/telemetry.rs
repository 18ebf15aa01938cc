//! Vibration telemetry frames.
//!
//! The node notifies fixed 12-byte frames: three consecutive `f32`
//! little-endian accelerometer axes. Anything else on the wire is dropped.

use core::fmt;

/// Frame length on the wire.
pub const SAMPLE_LEN: usize = 12;

/// One decoded accelerometer sample, in g.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub ax: f32,
    pub ay: f32,
    pub az: f32,
}

impl Sample {
    /// Decode a notification payload. Returns `None` unless the payload is
    /// exactly [`SAMPLE_LEN`] bytes; NaN and infinity pass through as-is.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let bytes: &[u8; SAMPLE_LEN] = payload.try_into().ok()?;
        let axis = |i: usize| {
            f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
        };
        Some(Self {
            ax: axis(0),
            ay: axis(4),
            az: axis(8),
        })
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X={:.3} Y={:.3} Z={:.3}", self.ax, self.ay, self.az)
    }
}

/// Destination for decoded samples. The default sink logs; tests record.
pub trait SampleSink {
    fn on_sample(&mut self, sample: Sample);
}

/// Logs each sample at info level.
#[derive(Default)]
pub struct LogSampleSink;

impl SampleSink for LogSampleSink {
    fn on_sample(&mut self, sample: Sample) {
        log::info!("vibration: {sample}");
    }
}
