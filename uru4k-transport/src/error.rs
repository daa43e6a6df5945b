//! Transport errors

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Device not open")]
    NotOpen,

    #[error("Device already open")]
    AlreadyOpen,

    #[error("No reader found for vendor 0x{vendor_id:04X} (products {product_ids:04X?})")]
    DeviceNotFound {
        vendor_id: u16,
        product_ids: Vec<u16>,
    },

    #[error("Permission denied opening reader: {0}")]
    PermissionDenied(String),

    #[error("Device initialization failed: {0}")]
    InitFailed(String),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Device disconnected")]
    Disconnected,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

impl Error {
    /// Transfer exceeded its timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Handle is gone and must be reopened
    pub fn requires_reopen(&self) -> bool {
        matches!(self, Self::NotOpen | Self::Disconnected)
    }
}
