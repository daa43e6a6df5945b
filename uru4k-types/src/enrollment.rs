//! Enrollment progress notifications

use std::fmt;

/// One step of a multi-scan enrollment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentProgress {
    /// Scans completed so far
    pub current_scan: u32,

    /// Scans required
    pub total_scans: u32,

    /// Prompt for the user
    pub message: String,
}

impl EnrollmentProgress {
    pub fn new(current_scan: u32, total_scans: u32, message: impl Into<String>) -> Self {
        Self {
            current_scan,
            total_scans,
            message: message.into(),
        }
    }

    /// All scans done
    pub fn is_complete(&self) -> bool {
        self.current_scan >= self.total_scans
    }
}

impl fmt::Display for EnrollmentProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}",
            self.current_scan, self.total_scans, self.message
        )
    }
}
