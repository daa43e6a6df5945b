//! Bulk frame layout and image reconstruction

use bytes::{Buf, Bytes};
use std::fmt;
use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    IMAGE_HEIGHT, IMAGE_SIZE, IMAGE_WIDTH, METADATA_SIZE,
};

/// Number of block descriptors in the metadata prefix
pub const BLOCK_COUNT: usize = 15;

bitflags::bitflags! {
    /// Per-block flags carried by each descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u8 {
        const CHANGE_KEY = 0x80;
        const NO_KEY_UPDATE = 0x04;
        const ENCRYPTED = 0x02;
        const NOT_PRESENT = 0x01;
    }
}

/// One contiguous run of image rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Presence / encryption flags
    pub flags: BlockFlags,

    /// Rows in this block (never 0: a zero entry ends the list)
    pub line_count: u8,
}

impl BlockDescriptor {
    /// Bytes this block occupies in both the payload and the image
    pub fn byte_len(&self) -> usize {
        self.line_count as usize * IMAGE_WIDTH
    }

    /// Flag bit says the rows were not transmitted
    pub fn is_present(&self) -> bool {
        !self.flags.contains(BlockFlags::NOT_PRESENT)
    }
}

/// Parsed 64-byte metadata prefix
///
/// # Layout
///
/// ```text
/// ┌──────────┬───────────┬────────────┬──────────┬──────────────────────┬──────────┐
/// │ unknown  │ num_lines │ key_number │ unknown  │ 15 × (flags, lines)  │ trailer  │
/// │ [0..4)   │ [4..6) LE │ [6]        │ [7..16)  │ [16..46)             │ [46..64) │
/// └──────────┴───────────┴────────────┴──────────┴──────────────────────┴──────────┘
/// ```
///
/// Pixel payload starts at byte 64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Rows declared for this frame (1..=290)
    pub num_lines: u16,

    /// Scramble key selector
    pub key_number: u8,

    /// Block descriptors up to (excluding) the first zero line count
    pub blocks: Vec<BlockDescriptor>,
}

impl FrameMetadata {
    /// Metadata prefix size in bytes
    pub const SIZE: usize = METADATA_SIZE;

    /// Parse and validate the metadata prefix
    ///
    /// # Errors
    ///
    /// - `FrameTooSmall` if `raw` is shorter than 64 bytes
    /// - `InvalidLineCount` if `num_lines` is 0 or exceeds 290
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::SIZE {
            return Err(Error::FrameTooSmall {
                expected: Self::SIZE,
                actual: raw.len(),
            });
        }

        let mut buf = &raw[..Self::SIZE];

        buf.advance(4);
        let num_lines = buf.get_u16_le();
        let key_number = buf.get_u8();
        buf.advance(9);

        if num_lines == 0 || num_lines as usize > IMAGE_HEIGHT {
            return Err(Error::InvalidLineCount {
                lines: num_lines,
                max: IMAGE_HEIGHT as u16,
            });
        }

        let mut blocks = Vec::with_capacity(BLOCK_COUNT);
        for _ in 0..BLOCK_COUNT {
            let flags = BlockFlags::from_bits_retain(buf.get_u8());
            let line_count = buf.get_u8();

            if line_count == 0 {
                break;
            }

            blocks.push(BlockDescriptor { flags, line_count });
        }

        Ok(Self {
            num_lines,
            key_number,
            blocks,
        })
    }

    /// Payload bytes the frame declares
    pub fn payload_len(&self) -> usize {
        self.num_lines as usize * IMAGE_WIDTH
    }

    /// Rows described by all blocks
    pub fn block_lines(&self) -> usize {
        self.blocks.iter().map(|b| b.line_count as usize).sum()
    }

    /// Rows in blocks without the NOT_PRESENT flag
    pub fn present_lines(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.is_present())
            .map(|b| b.line_count as usize)
            .sum()
    }
}

/// Raw buffer from one bulk-IN transfer
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    data: Bytes,
}

impl RawFrame {
    /// Wrap bytes received from the device
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Received length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Nothing was received
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Parse the metadata prefix only
    pub fn metadata(&self) -> Result<FrameMetadata> {
        FrameMetadata::parse(&self.data)
    }

    /// Reconstruct the image
    pub fn decode(&self) -> Result<DecodedImage> {
        decode(&self.data)
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("len", &self.data.len())
            .field("head", &hex::encode(&self.data[..self.data.len().min(16)]))
            .finish()
    }
}

/// Fixed 384×290 grayscale image
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pixels: Vec<u8>,
}

impl DecodedImage {
    /// Width in pixels
    pub const WIDTH: usize = IMAGE_WIDTH;

    /// Height in pixels
    pub const HEIGHT: usize = IMAGE_HEIGHT;

    /// All-zero image
    pub fn blank() -> Self {
        Self {
            pixels: vec![0; IMAGE_SIZE],
        }
    }

    /// Build from a full pixel buffer
    ///
    /// Returns `None` unless `pixels` holds exactly 384×290 bytes.
    pub fn from_pixels(pixels: Vec<u8>) -> Option<Self> {
        (pixels.len() == IMAGE_SIZE).then_some(Self { pixels })
    }

    /// Row-major pixels
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Consume into row-major pixels
    pub fn into_bytes(self) -> Vec<u8> {
        self.pixels
    }

    /// Always 384×290
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Never true for a decoded image
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// One row
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        (y < Self::HEIGHT).then(|| &self.pixels[y * Self::WIDTH..(y + 1) * Self::WIDTH])
    }

    /// One pixel
    pub fn pixel(&self, x: usize, y: usize) -> Option<u8> {
        (x < Self::WIDTH && y < Self::HEIGHT).then(|| self.pixels[y * Self::WIDTH + x])
    }

    /// Every pixel is zero
    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|&p| p == 0)
    }

    /// Binary PGM (P5) encoding
    pub fn to_pgm(&self) -> Vec<u8> {
        let header = format!("P5\n{} {}\n255\n", Self::WIDTH, Self::HEIGHT);
        let mut out = Vec::with_capacity(header.len() + self.pixels.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.pixels);
        out
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecodedImage({}x{})", Self::WIDTH, Self::HEIGHT)
    }
}

/// Decode a raw bulk frame into a 384×290 image
///
/// Blocks are copied in descriptor order into a zero-filled buffer. A block
/// flagged NOT_PRESENT is still copied, and the polarity of the device bytes
/// is kept as-is. A block that would run past the payload or the image is
/// skipped, but both cursors still advance past it.
///
/// # Errors
///
/// - `FrameTooSmall` if `raw` is shorter than the metadata or than
///   `64 + num_lines × 384`
/// - `InvalidLineCount` if `num_lines` is 0 or exceeds 290
///
/// # Examples
///
/// ```
/// use uru4k_core::{decode, IMAGE_SIZE};
///
/// let mut raw = vec![0u8; 64];
/// raw[4] = 1;      // num_lines = 1
/// raw[17] = 1;     // block 0: one line
/// raw.extend_from_slice(&[0x7F; 384]);
///
/// let image = decode(&raw).unwrap();
/// assert_eq!(image.len(), IMAGE_SIZE);
/// assert_eq!(image.pixel(0, 0), Some(0x7F));
/// assert_eq!(image.pixel(0, 1), Some(0x00));
/// ```
pub fn decode(raw: &[u8]) -> Result<DecodedImage> {
    let metadata = FrameMetadata::parse(raw)?;

    let required = METADATA_SIZE + metadata.payload_len();
    if raw.len() < required {
        return Err(Error::FrameTooSmall {
            expected: required,
            actual: raw.len(),
        });
    }

    let payload = &raw[METADATA_SIZE..];
    let mut pixels = vec![0u8; IMAGE_SIZE];
    let mut src = 0usize;
    let mut dst = 0usize;

    for (index, block) in metadata.blocks.iter().enumerate() {
        let len = block.byte_len();

        if src + len <= payload.len() && dst + len <= pixels.len() {
            pixels[dst..dst + len].copy_from_slice(&payload[src..src + len]);
        } else {
            trace!(
                block = index,
                lines = block.line_count,
                src,
                dst,
                "Block out of bounds, skipped"
            );
        }

        src += len;
        dst += len;
    }

    debug!(
        num_lines = metadata.num_lines,
        key_number = metadata.key_number,
        blocks = metadata.blocks.len(),
        present_lines = metadata.present_lines(),
        "Decoded frame"
    );

    Ok(DecodedImage { pixels })
}
