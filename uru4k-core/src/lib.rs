//! # uru4k-core
//!
//! Core protocol implementation for DigitalPersona U.are.U 4000 readers.
//!
//! This crate provides the low-level protocol primitives:
//! - Register map and control-transfer parameters
//! - Sensor mode values and the mode state tracker
//! - Frame metadata parsing and image reconstruction
//! - Protocol constants

pub mod constants;
pub mod error;
pub mod frame;
pub mod mode;
pub mod register;

pub use error::{Error, Result};
pub use frame::{decode, BlockDescriptor, BlockFlags, DecodedImage, FrameMetadata, RawFrame};
pub use mode::{Mode, ModeTracker};
pub use register::Register;

/// Image width in pixels
pub const IMAGE_WIDTH: usize = 384;

/// Image height in pixels (maximum number of lines per frame)
pub const IMAGE_HEIGHT: usize = 290;

/// Decoded image size in bytes (one byte per pixel)
pub const IMAGE_SIZE: usize = IMAGE_WIDTH * IMAGE_HEIGHT;

/// Fixed metadata prefix of every bulk frame
pub const METADATA_SIZE: usize = 64;

/// Bulk-IN buffer size for one capture (metadata + largest image)
pub const MAX_FRAME_SIZE: usize = METADATA_SIZE + IMAGE_SIZE;
