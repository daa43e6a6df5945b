//! # uru4k
//!
//! Fingerprint capture, verification and identification for DigitalPersona
//! U.are.U 4000 readers.
//!
//! ## Features
//!
//! - Register-level USB protocol with guaranteed sensor release
//! - Frame decoding to 384x290 grayscale images
//! - Async enroll / verify / identify on Tokio
//! - Remote template backend with an AES-GCM local cache
//!
//! ## Quick Start
//!
//! ```no_run
//! use uru4k::Device;
//!
//! #[tokio::main]
//! async fn main() -> uru4k::Result<()> {
//!     let image = tokio::task::spawn_blocking(|| {
//!         let mut device = Device::new_usb();
//!         device.ensure_ready()?;
//!         let image = device.capture_and_decode();
//!         device.close();
//!         image
//!     })
//!     .await??;
//!
//!     std::fs::write("finger.pgm", image.to_pgm())?;
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod matching;
pub mod sdk;
pub mod store;

#[cfg(test)]
mod test_support;

// Re-exports
pub use capture::{CancelToken, CaptureOrchestrator, EnrollmentHandle};
pub use config::{BackendConfig, CaptureMode, DeviceConfig, SdkConfig, TimingConfig};
pub use device::{Device, Timings};
pub use error::{Error, ErrorKind, Result};
pub use matching::{Matcher, MatcherError, MatchingFacade, Probe};
pub use sdk::FingerprintSdk;
pub use store::{HttpBackend, SecureCache, TemplateBackend, TemplateStore};

// Re-export types
pub use uru4k_core::{DecodedImage, Mode, RawFrame, Register};
pub use uru4k_transport::{RusbTransport, UsbTransport};
pub use uru4k_types::{
    DeviceInfo, EnrollOutcome, EnrollmentProgress, Finger, GalleryEntry, IdentifyOutcome, Score,
    StoredTemplate, Template, UserId, UserSummary, VerifyOutcome,
};
