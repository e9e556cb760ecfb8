//! Forensic watermark codec.
//!
//! The payload is written as a sparse raster: every 8th pixel in both axes
//! carries one bit, row-major. A set bit is a pixel with red = 1 and
//! alpha = 1, a clear bit is left fully transparent. The bit pattern is the
//! payload bytes, MSB first, followed by a single zero byte that marks the
//! end of a frame, repeated until the raster is full.
//!
//! Only untranscoded rasters decode cleanly. Scaling, cropping or lossy
//! compression destroy the signal and there is no error correction.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ShieldError};

pub const SAMPLE_STRIDE: u32 = 8;
pub const MAX_PAYLOAD_CHARS: usize = 32;
pub const MARK_RED: u8 = 1;
pub const MARK_ALPHA: u8 = 1;

/// Largest raster, in bytes, a [`PixelBuffer`] will hold (16384 x 16384).
pub const MAX_RASTER_BYTES: usize = 1 << 30;

const FRAME_TERMINATOR: u8 = 0;
const BYTES_PER_PIXEL: usize = 4;

fn raster_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
        .filter(|len| *len <= MAX_RASTER_BYTES)
        .ok_or(ShieldError::RasterTooLarge {
            width,
            height,
            limit: MAX_RASTER_BYTES,
        })
}

/// Identity string embedded into frames: 1 to 32 characters in `1..=127`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WatermarkPayload(String);

impl WatermarkPayload {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let count = value.chars().count();
        if count == 0 {
            return Err(ShieldError::InvalidPayload("payload is empty".into()));
        }
        if count > MAX_PAYLOAD_CHARS {
            return Err(ShieldError::InvalidPayload(format!(
                "payload has {count} characters, limit is {MAX_PAYLOAD_CHARS}"
            )));
        }
        if let Some(bad) = value.chars().find(|c| !(1..=127).contains(&(*c as u32))) {
            return Err(ShieldError::InvalidPayload(format!(
                "character {bad:?} is outside the 7-bit range"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bits one frame of this payload occupies, terminator included.
    pub fn frame_bits(&self) -> usize {
        (self.0.len() + 1) * 8
    }
}

impl TryFrom<String> for WatermarkPayload {
    type Error = ShieldError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<WatermarkPayload> for String {
    fn from(payload: WatermarkPayload) -> Self {
        payload.0
    }
}

/// Ordered bits of one payload frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitPattern {
    bits: Vec<bool>,
}

impl BitPattern {
    pub fn from_payload(payload: &WatermarkPayload) -> Self {
        let bits = payload
            .as_str()
            .bytes()
            .chain(std::iter::once(FRAME_TERMINATOR))
            .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1 == 1))
            .collect();
        Self { bits }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Bit at `index`, cycling once the pattern is exhausted.
    pub fn bit(&self, index: usize) -> bool {
        !self.bits.is_empty() && self.bits[index % self.bits.len()]
    }
}

/// RGBA8 raster, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            data: Vec::new(),
        }
    }

    pub fn transparent(width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            width,
            height,
            data: vec![0; raster_len(width, height)?],
        })
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = raster_len(width, height)?;
        if data.len() != expected {
            return Err(ShieldError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + BYTES_PER_PIXEL]);
        Some(px)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    fn mark(&mut self, x: u32, y: u32) {
        let offset = self.offset(x, y);
        self.data[offset] = MARK_RED;
        self.data[offset + 3] = MARK_ALPHA;
    }
}

fn sample_points(width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    (0..height)
        .step_by(SAMPLE_STRIDE as usize)
        .flat_map(move |y| (0..width).step_by(SAMPLE_STRIDE as usize).map(move |x| (x, y)))
}

/// Number of bits a `width` x `height` raster can carry.
pub fn capacity_bits(width: u32, height: u32) -> usize {
    let cols = width.div_ceil(SAMPLE_STRIDE) as usize;
    let rows = height.div_ceil(SAMPLE_STRIDE) as usize;
    cols * rows
}

/// Whether at least one full frame of `payload` fits.
pub fn fits(payload: &WatermarkPayload, width: u32, height: u32) -> bool {
    capacity_bits(width, height) >= payload.frame_bits()
}

/// Overlay for a `width` x `height` frame. Zero-sized targets and rasters
/// over [`MAX_RASTER_BYTES`] yield [`PixelBuffer::empty`].
pub fn encode(payload: &WatermarkPayload, width: u32, height: u32) -> PixelBuffer {
    if width == 0 || height == 0 {
        return PixelBuffer::empty();
    }
    let mut overlay = match PixelBuffer::transparent(width, height) {
        Ok(overlay) => overlay,
        Err(err) => {
            warn!(error = %err, "forensic overlay not generated");
            return PixelBuffer::empty();
        }
    };
    let pattern = BitPattern::from_payload(payload);
    for (index, (x, y)) in sample_points(width, height).enumerate() {
        if pattern.bit(index) {
            overlay.mark(x, y);
        }
    }
    if !fits(payload, width, height) {
        debug!(width, height, "raster holds less than one payload frame");
    }
    overlay
}

/// Read back the first payload frame from a captured raster.
///
/// Bytes outside `1..=127` are dropped. A raster that never reaches a frame
/// terminator yields whatever characters were recovered.
pub fn decode(buffer: &PixelBuffer) -> String {
    let mut out = String::new();
    let mut byte = 0u8;
    let mut filled = 0;
    for (x, y) in sample_points(buffer.width, buffer.height) {
        let red = buffer.pixel(x, y).map(|px| px[0]).unwrap_or(0);
        byte = (byte << 1) | u8::from(red > 0);
        filled += 1;
        if filled < 8 {
            continue;
        }
        match byte {
            FRAME_TERMINATOR if !out.is_empty() => return out,
            1..=127 => out.push(char::from(byte)),
            _ => {}
        }
        byte = 0;
        filled = 0;
    }
    out
}
