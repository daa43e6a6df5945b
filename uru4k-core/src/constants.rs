//! Protocol constants

/// DigitalPersona USB vendor ID
pub const VENDOR_ID: u16 = 0x05BA;

/// U.are.U 4000 and 4000B product IDs
pub const PRODUCT_IDS: [u16; 2] = [0x000A, 0x0034];

/// Interface carrying the register and image endpoints
pub const DEFAULT_INTERFACE: u8 = 0;

/// Image endpoint, used when the descriptor walk finds no bulk-IN endpoint
pub const DEFAULT_BULK_IN_ENDPOINT: u8 = 0x82;

/// Default control/bulk transfer timeout (milliseconds)
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 5000;

/// Control transfer parameters for register I/O
pub mod control {
    /// Vendor request code used for every register access
    pub const REQUEST: u8 = 0x04;

    /// bmRequestType for register reads (vendor, device-to-host)
    pub const REQUEST_TYPE_READ: u8 = 0xC0;

    /// bmRequestType for register writes (vendor, host-to-device)
    pub const REQUEST_TYPE_WRITE: u8 = 0x40;

    /// wIndex is always zero
    pub const INDEX: u16 = 0;

    /// Buffer handed to register reads; only the first byte is meaningful
    pub const READ_BUFFER_LEN: usize = 16;
}

/// Settle intervals of the capture sequence (milliseconds)
pub mod timings {
    /// Pause between MODE=INIT and MODE=AWAIT_FINGER_ON
    pub const INIT_SETTLE_MS: u64 = 100;

    /// Time given to the user to place a finger
    pub const FINGER_WAIT_MS: u64 = 1000;

    /// Pause between MODE=CAPTURE and the bulk read
    pub const CAPTURE_SETTLE_MS: u64 = 200;
}
