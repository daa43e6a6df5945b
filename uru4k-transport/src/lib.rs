//! Transport layer for the U.are.U 4000 protocol
//!
//! Provides the USB session (open/claim/close) and raw transfer primitives.

pub mod error;
pub mod usb;

pub use error::{Error, Result};
pub use usb::RusbTransport;

use uru4k_types::DeviceInfo;

/// USB session with one reader
///
/// Transfers are blocking and bounded by the transport's timeout. Callers
/// are expected to run them off the async executor.
pub trait UsbTransport: Send {
    /// Locate, open and claim the reader
    fn open(&mut self) -> Result<DeviceInfo>;

    /// Release the interface and handle (idempotent)
    fn close(&mut self);

    /// Check if a handle is held
    fn is_open(&self) -> bool;

    /// Vendor control transfer, device-to-host; returns bytes received
    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize>;

    /// Vendor control transfer, host-to-device; returns bytes sent
    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<usize>;

    /// One bulk-IN transfer on the image endpoint; returns bytes received
    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Human-readable location of the reader
    fn describe(&self) -> String;
}

impl<T: UsbTransport + ?Sized> UsbTransport for Box<T> {
    fn open(&mut self) -> Result<DeviceInfo> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        (**self).read_control(request_type, request, value, index, buf)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<usize> {
        (**self).write_control(request_type, request, value, index, data)
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_bulk(buf)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
