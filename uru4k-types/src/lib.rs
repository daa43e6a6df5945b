//! Type definitions for uru4k

pub mod device_info;
pub mod enrollment;
pub mod error;
pub mod finger;
pub mod gallery;
pub mod identity;
pub mod outcome;
pub mod score;
pub mod template;

pub use device_info::DeviceInfo;
pub use enrollment::EnrollmentProgress;
pub use error::{Error, Result};
pub use finger::Finger;
pub use gallery::{GalleryEntry, StoredTemplate, UserSummary};
pub use identity::UserId;
pub use outcome::{EnrollOutcome, IdentifyOutcome, VerifyOutcome};
pub use score::Score;
pub use template::Template;
