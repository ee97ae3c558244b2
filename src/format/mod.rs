//! PCM formats and buffers
//!
//! [`PcmBuffer`] is the unit of audio passed between pipeline stages. Each
//! buffer carries its interleaved samples together with a [`PcmFormat`]
//! tag; ownership moves with the buffer, so no stage ever mutates audio
//! another stage can still see.

pub mod convert;

pub use convert::FormatConverter;

use std::fmt;

use bytes::Bytes;

use crate::constants::{NETWORK_CHANNELS, NETWORK_SAMPLE_RATE};

/// Sample encoding of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Signed 16-bit integer
    I16,
    /// 32-bit float in [-1.0, 1.0]
    F32,
}

impl SampleKind {
    /// Size of one sample in bytes
    pub fn width(self) -> usize {
        match self {
            SampleKind::I16 => 2,
            SampleKind::F32 => 4,
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKind::I16 => write!(f, "i16"),
            SampleKind::F32 => write!(f, "f32"),
        }
    }
}

/// Format tag for interleaved PCM audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub kind: SampleKind,
    pub channels: u16,
    pub sample_rate: u32,
}

impl PcmFormat {
    pub fn new(kind: SampleKind, channels: u16, sample_rate: u32) -> Self {
        Self {
            kind,
            channels,
            sample_rate,
        }
    }

    /// The format carried on the wire: 8 kHz mono i16.
    pub fn network() -> Self {
        Self::new(SampleKind::I16, NETWORK_CHANNELS, NETWORK_SAMPLE_RATE)
    }

    /// Bytes occupied by one frame (one sample per channel)
    pub fn frame_bytes(&self) -> usize {
        self.kind.width() * self.channels as usize
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch/{}", self.sample_rate, self.channels, self.kind)
    }
}

/// Interleaved sample storage for a [`PcmBuffer`]
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::I16(v) => v.len(),
            Samples::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> SampleKind {
        match self {
            Samples::I16(_) => SampleKind::I16,
            Samples::F32(_) => SampleKind::F32,
        }
    }
}

/// A contiguous run of interleaved PCM samples tagged with its format
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Samples,
    format: PcmFormat,
}

impl PcmBuffer {
    /// Wrap i16 samples. The format's kind must be [`SampleKind::I16`].
    pub fn from_i16(samples: Vec<i16>, format: PcmFormat) -> Self {
        debug_assert_eq!(format.kind, SampleKind::I16);
        Self {
            samples: Samples::I16(samples),
            format,
        }
    }

    /// Wrap f32 samples. The format's kind must be [`SampleKind::F32`].
    pub fn from_f32(samples: Vec<f32>, format: PcmFormat) -> Self {
        debug_assert_eq!(format.kind, SampleKind::F32);
        Self {
            samples: Samples::F32(samples),
            format,
        }
    }

    /// Decode a native-endian i16 byte stream as received from the wire.
    ///
    /// The tunnel carries no framing or endianness negotiation; both ends
    /// are assumed native-endian. A trailing odd byte is ignored.
    pub fn from_ne_bytes(bytes: &[u8], format: PcmFormat) -> Self {
        debug_assert_eq!(format.kind, SampleKind::I16);
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
            .collect();
        Self {
            samples: Samples::I16(samples),
            format,
        }
    }

    /// Encode an i16 buffer to the native-endian wire representation.
    ///
    /// Panics in debug builds if the buffer holds f32 samples; the uplink
    /// converter always produces i16.
    pub fn to_ne_bytes(&self) -> Bytes {
        match &self.samples {
            Samples::I16(v) => {
                let mut out = Vec::with_capacity(v.len() * 2);
                for s in v {
                    out.extend_from_slice(&s.to_ne_bytes());
                }
                Bytes::from(out)
            }
            Samples::F32(_) => {
                debug_assert!(false, "f32 buffers have no wire representation");
                Bytes::new()
            }
        }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn as_i16(&self) -> Option<&[i16]> {
        match &self.samples {
            Samples::I16(v) => Some(v),
            Samples::F32(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.samples {
            Samples::F32(v) => Some(v),
            Samples::I16(_) => None,
        }
    }

    /// Number of frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sanity check that the stored samples match the format tag
    pub fn kind_matches(&self) -> bool {
        self.samples.kind() == self.format.kind
    }
}
