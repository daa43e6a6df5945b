//! SDK configuration
//!
//! Loaded from TOML or built in code with `with_*` setters. Every section
//! is optional; only `backend_url` has no usable default.
//!
//! ```toml
//! backend_url = "https://attendance.example.com/api"
//! match_threshold = 60
//! capture_mode = "sensor"
//!
//! [timings]
//! finger_wait_ms = 1500
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use uru4k_core::constants::{
    DEFAULT_INTERFACE, DEFAULT_TRANSFER_TIMEOUT_MS, PRODUCT_IDS, VENDOR_ID, timings,
};
use uru4k_types::Score;

use crate::device::Timings;
use crate::error::{Error, Result};

/// Most scans one enrollment may ask for
pub const MAX_ENROLLMENT_SCANS: u32 = 20;

/// Reject scan counts outside `1..=MAX_ENROLLMENT_SCANS`
pub(crate) fn check_scans(scans: u32) -> Result<()> {
    if (1..=MAX_ENROLLMENT_SCANS).contains(&scans) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "enrollment_scans must be between 1 and {}, got {}",
            MAX_ENROLLMENT_SCANS, scans
        )))
    }
}

/// Where live samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// The matcher samples the sensor itself and runs its own enrollment loop
    #[default]
    Native,

    /// Images are captured through the register protocol and handed to the matcher
    Sensor,
}

/// Reader selection and transfer parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_ids: Vec<u16>,
    pub interface: u8,
    pub transfer_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_ids: PRODUCT_IDS.to_vec(),
            interface: DEFAULT_INTERFACE,
            transfer_timeout_ms: DEFAULT_TRANSFER_TIMEOUT_MS,
        }
    }
}

/// Settle intervals of the capture sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub init_settle_ms: u64,
    pub finger_wait_ms: u64,
    pub capture_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            init_settle_ms: timings::INIT_SETTLE_MS,
            finger_wait_ms: timings::FINGER_WAIT_MS,
            capture_settle_ms: timings::CAPTURE_SETTLE_MS,
        }
    }
}

impl From<TimingConfig> for Timings {
    fn from(config: TimingConfig) -> Self {
        Self {
            init_settle: Duration::from_millis(config.init_settle_ms),
            finger_wait: Duration::from_millis(config.finger_wait_ms),
            capture_settle: Duration::from_millis(config.capture_settle_ms),
        }
    }
}

/// HTTP client limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Top-level SDK configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Base URL of the template backend
    pub backend_url: String,

    /// Scans per enrollment
    pub enrollment_scans: u32,

    /// Minimum score accepted by verify and identify
    pub match_threshold: Score,

    /// Upper bound on one capture-and-match operation
    pub timeout_ms: u64,

    /// Keep an encrypted local copy of fetched templates
    pub enable_cache: bool,

    /// Directory holding the cache and its key
    pub cache_dir: PathBuf,

    pub capture_mode: CaptureMode,

    pub device: DeviceConfig,
    pub timings: TimingConfig,
    pub backend: BackendConfig,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            enrollment_scans: 5,
            match_threshold: Score::DEFAULT_THRESHOLD,
            timeout_ms: 30_000,
            enable_cache: true,
            cache_dir: default_cache_dir(),
            capture_mode: CaptureMode::default(),
            device: DeviceConfig::default(),
            timings: TimingConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("uru4k")
}

impl SdkConfig {
    /// Defaults pointed at `backend_url`
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn with_enrollment_scans(mut self, scans: u32) -> Self {
        self.enrollment_scans = scans;
        self
    }

    pub fn with_match_threshold(mut self, threshold: Score) -> Self {
        self.match_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.enable_cache = enabled;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_capture_mode(mut self, mode: CaptureMode) -> Self {
        self.capture_mode = mode;
        self
    }

    pub fn with_timings(mut self, timings: TimingConfig) -> Self {
        self.timings = timings;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the invariants the SDK relies on
    pub fn validate(&self) -> Result<()> {
        let url = self.backend_url.trim();
        if url.is_empty() {
            return Err(Error::Config("backend_url is required".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "backend_url must be http(s): {}",
                self.backend_url
            )));
        }
        check_scans(self.enrollment_scans)?;
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be positive".into()));
        }
        if self.device.product_ids.is_empty() {
            return Err(Error::Config("device.product_ids is empty".into()));
        }
        if self.device.transfer_timeout_ms == 0 {
            return Err(Error::Config(
                "device.transfer_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SdkConfig::new("http://localhost:8080/api");
        assert_eq!(config.enrollment_scans, 5);
        assert_eq!(config.match_threshold, Score::DEFAULT_THRESHOLD);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.enable_cache);
        assert_eq!(config.capture_mode, CaptureMode::Native);
        assert_eq!(config.device.vendor_id, 0x05BA);
        assert_eq!(config.timings.finger_wait_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = SdkConfig::from_toml_str(
            r#"
            backend_url = "https://example.com/api"
            match_threshold = 70
            capture_mode = "sensor"
            enable_cache = false

            [timings]
            finger_wait_ms = 1500

            [device]
            product_ids = [10]
            "#,
        )
        .unwrap();

        assert_eq!(config.match_threshold.value(), 70);
        assert_eq!(config.capture_mode, CaptureMode::Sensor);
        assert!(!config.enable_cache);
        assert_eq!(config.timings.finger_wait_ms, 1500);
        assert_eq!(config.timings.init_settle_ms, 100);
        assert_eq!(config.device.product_ids, vec![0x000A]);
        assert_eq!(config.device.transfer_timeout_ms, 5000);
    }

    #[test]
    fn test_toml_rejects_threshold_above_100() {
        let err = SdkConfig::from_toml_str(
            r#"
            backend_url = "https://example.com"
            match_threshold = 120
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate() {
        assert!(SdkConfig::default().validate().is_err());
        assert!(SdkConfig::new("ftp://example.com").validate().is_err());
        assert!(
            SdkConfig::new("http://example.com")
                .with_enrollment_scans(0)
                .validate()
                .is_err()
        );
        assert!(
            SdkConfig::new("http://example.com")
                .with_enrollment_scans(MAX_ENROLLMENT_SCANS)
                .validate()
                .is_ok()
        );
        assert!(
            SdkConfig::new("http://example.com")
                .with_enrollment_scans(u32::MAX)
                .validate()
                .is_err()
        );
        assert!(
            SdkConfig::new("http://example.com")
                .with_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_timings_conversion() {
        let timings = Timings::from(TimingConfig::default());
        assert_eq!(timings.init_settle, Duration::from_millis(100));
        assert_eq!(timings.capture_settle, Duration::from_millis(200));
    }
}
