//! Device information structures

use std::fmt;

/// Opened reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// USB vendor ID
    pub vendor_id: u16,

    /// USB product ID
    pub product_id: u16,

    /// Bus the reader sits on
    pub bus_number: u8,

    /// Address on that bus
    pub address: u8,

    /// Claimed interface
    pub interface: u8,

    /// Bulk-IN endpoint carrying image frames
    pub bulk_in_endpoint: u8,

    /// HWSTAT register as read during initialisation
    pub hw_status: Option<u8>,
}

impl DeviceInfo {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            bus_number: 0,
            address: 0,
            interface: 0,
            bulk_in_endpoint: 0,
            hw_status: None,
        }
    }

    /// Model name for the known product IDs
    pub fn model(&self) -> &'static str {
        match self.product_id {
            0x000A => "U.are.U 4000",
            0x0034 => "U.are.U 4000B",
            _ => "unknown",
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device[{:04x}:{:04x} {} @ {:03}/{:03}]",
            self.vendor_id,
            self.product_id,
            self.model(),
            self.bus_number,
            self.address
        )
    }
}
