//! libusb transport for U.are.U 4000 readers
//!
//! Finds the reader by vendor/product ID, detaches any kernel driver,
//! claims the protocol interface and discovers the bulk-IN image endpoint.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use tracing::{debug, info, trace, warn};

use uru4k_core::constants::{
    DEFAULT_BULK_IN_ENDPOINT, DEFAULT_INTERFACE, DEFAULT_TRANSFER_TIMEOUT_MS, PRODUCT_IDS,
    VENDOR_ID,
};
use uru4k_types::DeviceInfo;

use crate::{error::*, UsbTransport};

/// USB transport backed by libusb
pub struct RusbTransport {
    vendor_id: u16,
    product_ids: Vec<u16>,
    interface: u8,
    timeout: Duration,
    context: Option<Context>,
    handle: Option<DeviceHandle<Context>>,
    bulk_in: u8,
    driver_detached: bool,
    location: Option<(u8, u8)>,
}

impl RusbTransport {
    /// Create a transport for the default DigitalPersona IDs
    pub fn new() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_ids: PRODUCT_IDS.to_vec(),
            interface: DEFAULT_INTERFACE,
            timeout: Duration::from_millis(DEFAULT_TRANSFER_TIMEOUT_MS),
            context: None,
            handle: None,
            bulk_in: DEFAULT_BULK_IN_ENDPOINT,
            driver_detached: false,
            location: None,
        }
    }

    /// Match a different vendor/product set
    pub fn with_ids(mut self, vendor_id: u16, product_ids: impl Into<Vec<u16>>) -> Self {
        self.vendor_id = vendor_id;
        self.product_ids = product_ids.into();
        self
    }

    /// Claim a different interface
    pub fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }

    /// Set control/bulk transfer timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Transfer timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn find_device(&self, context: &Context) -> Result<Device<Context>> {
        let devices = context
            .devices()
            .map_err(|e| Error::InitFailed(format!("cannot enumerate USB devices: {}", e)))?;

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    trace!("Skipping device without descriptor: {}", e);
                    continue;
                }
            };

            trace!(
                "Checking device {:04x}:{:04x}",
                descriptor.vendor_id(),
                descriptor.product_id()
            );

            if descriptor.vendor_id() == self.vendor_id
                && self.product_ids.contains(&descriptor.product_id())
            {
                return Ok(device);
            }
        }

        Err(Error::DeviceNotFound {
            vendor_id: self.vendor_id,
            product_ids: self.product_ids.clone(),
        })
    }

    /// First bulk-IN endpoint of the claimed interface
    fn find_bulk_in(&self, device: &Device<Context>) -> Option<u8> {
        let config = device.active_config_descriptor().ok()?;

        config
            .interfaces()
            .filter(|interface| interface.number() == self.interface)
            .flat_map(|interface| interface.descriptors())
            .flat_map(|descriptor| {
                descriptor
                    .endpoint_descriptors()
                    .filter(|ep| {
                        ep.direction() == Direction::In && ep.transfer_type() == TransferType::Bulk
                    })
                    .map(|ep| ep.address())
                    .collect::<Vec<_>>()
            })
            .next()
    }

    fn handle_mut(&mut self) -> Result<&mut DeviceHandle<Context>> {
        self.handle.as_mut().ok_or(Error::NotOpen)
    }

    /// Map a transfer failure; a vanished device invalidates the handle
    fn transfer_error(&mut self, operation: &'static str, e: rusb::Error) -> Error {
        match e {
            rusb::Error::Timeout => Error::Timeout {
                operation,
                timeout_ms: self.timeout_ms(),
            },
            rusb::Error::NoDevice => {
                warn!("Reader detached during {}", operation);
                self.handle = None;
                self.driver_detached = false;
                Error::Disconnected
            }
            other => Error::Usb(other),
        }
    }
}

impl Default for RusbTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for RusbTransport {
    fn open(&mut self) -> Result<DeviceInfo> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let context = match self.context.take() {
            Some(context) => context,
            None => Context::new()
                .map_err(|e| Error::InitFailed(format!("cannot create libusb context: {}", e)))?,
        };

        let device = self.find_device(&context)?;
        let descriptor = device.device_descriptor()?;

        debug!(
            "Found reader {:04x}:{:04x} at {:03}/{:03}",
            descriptor.vendor_id(),
            descriptor.product_id(),
            device.bus_number(),
            device.address()
        );

        let handle = device.open().map_err(|e| match e {
            rusb::Error::Access => Error::PermissionDenied(e.to_string()),
            rusb::Error::NotFound | rusb::Error::NoDevice => Error::DeviceNotFound {
                vendor_id: self.vendor_id,
                product_ids: self.product_ids.clone(),
            },
            other => Error::InitFailed(format!("cannot open reader: {}", other)),
        })?;

        let mut driver_detached = false;
        match handle.kernel_driver_active(self.interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", self.interface);
                handle
                    .detach_kernel_driver(self.interface)
                    .map_err(|e| Error::InitFailed(format!("cannot detach kernel driver: {}", e)))?;
                driver_detached = true;
            }
            Ok(false) => {}
            Err(e) => {
                debug!("Kernel driver status unavailable: {}", e);
            }
        }

        handle.claim_interface(self.interface).map_err(|e| match e {
            rusb::Error::Access | rusb::Error::Busy => Error::PermissionDenied(format!(
                "cannot claim interface {}: {}",
                self.interface, e
            )),
            other => Error::InitFailed(format!(
                "cannot claim interface {}: {}",
                self.interface, other
            )),
        })?;

        let bulk_in = self.find_bulk_in(&device).unwrap_or_else(|| {
            warn!(
                "No bulk-IN endpoint in descriptors, using 0x{:02X}",
                DEFAULT_BULK_IN_ENDPOINT
            );
            DEFAULT_BULK_IN_ENDPOINT
        });

        let mut info = DeviceInfo::new(descriptor.vendor_id(), descriptor.product_id());
        info.bus_number = device.bus_number();
        info.address = device.address();
        info.interface = self.interface;
        info.bulk_in_endpoint = bulk_in;

        self.location = Some((info.bus_number, info.address));
        self.bulk_in = bulk_in;
        self.driver_detached = driver_detached;
        self.handle = Some(handle);
        self.context = Some(context);

        info!("Opened {}", info);

        Ok(info)
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.release_interface(self.interface) {
                warn!("Failed to release interface {}: {}", self.interface, e);
            }

            if self.driver_detached {
                if let Err(e) = handle.attach_kernel_driver(self.interface) {
                    debug!("Could not reattach kernel driver: {}", e);
                }
                self.driver_detached = false;
            }

            debug!("Closed {}", self.describe());
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        let timeout = self.timeout;
        let result = self
            .handle_mut()?
            .read_control(request_type, request, value, index, buf, timeout);

        match result {
            Ok(n) => {
                trace!("Control IN value=0x{:04X}: {:02X?}", value, &buf[..n]);
                Ok(n)
            }
            Err(e) => Err(self.transfer_error("control read", e)),
        }
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<usize> {
        let timeout = self.timeout;
        let result = self
            .handle_mut()?
            .write_control(request_type, request, value, index, data, timeout);

        match result {
            Ok(n) => {
                trace!("Control OUT value=0x{:04X}: {:02X?}", value, data);
                Ok(n)
            }
            Err(e) => Err(self.transfer_error("control write", e)),
        }
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let timeout = self.timeout;
        let endpoint = self.bulk_in;
        let result = self.handle_mut()?.read_bulk(endpoint, buf, timeout);

        match result {
            Ok(n) => {
                trace!("Bulk IN 0x{:02X}: {} bytes", endpoint, n);
                Ok(n)
            }
            Err(e) => Err(self.transfer_error("bulk read", e)),
        }
    }

    fn describe(&self) -> String {
        match self.location {
            Some((bus, address)) => format!(
                "{:04x}:{:?} @ {:03}/{:03}",
                self.vendor_id, self.product_ids, bus, address
            ),
            None => format!("{:04x}:{:?}", self.vendor_id, self.product_ids),
        }
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("USB transport dropped while still open");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transport_create() {
        let transport = RusbTransport::new();
        assert!(!transport.is_open());
        assert_eq!(transport.timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_transfers_require_open() {
        let mut transport = RusbTransport::new();
        let mut buf = [0u8; 16];

        assert!(matches!(
            transport.read_control(0xC0, 0x04, 0x07, 0, &mut buf),
            Err(Error::NotOpen)
        ));
        assert!(matches!(
            transport.write_control(0x40, 0x04, 0x4E, 0, &[0x80]),
            Err(Error::NotOpen)
        ));
        assert!(matches!(transport.read_bulk(&mut buf), Err(Error::NotOpen)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut transport = RusbTransport::new();
        transport.close();
        transport.close();
        assert!(!transport.is_open());
    }

    #[test]
    fn test_builder() {
        let transport = RusbTransport::new()
            .with_ids(0x1234, vec![0x0001])
            .with_interface(1)
            .with_timeout(Duration::from_millis(250));

        assert_eq!(transport.timeout_ms(), 250);
        assert_eq!(transport.describe(), "1234:[1]");
    }

    #[test]
    #[ignore] // Only run with real device
    fn test_open_real_reader() {
        let mut transport = RusbTransport::new();
        let info = transport.open().unwrap();
        assert_eq!(info.vendor_id, VENDOR_ID);
        assert!(transport.is_open());

        transport.close();
        assert!(!transport.is_open());
    }
}
