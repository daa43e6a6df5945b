//! Register protocol and capture sequence
//!
//! `Device` owns the USB transport and is the only code that writes the MODE
//! register. All methods block; the orchestrator runs them on the blocking
//! thread pool.

use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use uru4k_core::constants::{control, timings};
use uru4k_core::{DecodedImage, MAX_FRAME_SIZE, Mode, ModeTracker, RawFrame, Register};
use uru4k_transport::{RusbTransport, UsbTransport};
use uru4k_types::DeviceInfo;

use crate::error::{Error, Result};

/// Pauses inside the capture sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// After MODE=INIT
    pub init_settle: Duration,

    /// After MODE=AWAIT_FINGER_ON, for the user to place a finger
    pub finger_wait: Duration,

    /// After MODE=CAPTURE, before the bulk read
    pub capture_settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            init_settle: Duration::from_millis(timings::INIT_SETTLE_MS),
            finger_wait: Duration::from_millis(timings::FINGER_WAIT_MS),
            capture_settle: Duration::from_millis(timings::CAPTURE_SETTLE_MS),
        }
    }
}

/// U.are.U 4000 reader
///
/// # Examples
///
/// ```no_run
/// use uru4k::Device;
///
/// fn main() -> uru4k::Result<()> {
///     let mut device = Device::new_usb();
///     let info = device.open()?;
///     device.initialize()?;
///
///     let image = device.capture_and_decode()?;
///     println!("{}: {} bytes", info, image.len());
///
///     device.close();
///     Ok(())
/// }
/// ```
pub struct Device<T: UsbTransport = RusbTransport> {
    transport: T,
    mode: ModeTracker,
    timings: Timings,
    info: Option<DeviceInfo>,
}

impl Device<RusbTransport> {
    /// Reader on the default libusb transport
    pub fn new_usb() -> Self {
        Self::new(RusbTransport::new())
    }
}

impl<T: UsbTransport> Device<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            mode: ModeTracker::new(),
            timings: Timings::default(),
            info: None,
        }
    }

    /// Override the capture sequence pauses
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn is_open(&self) -> bool {
        self.info.is_some() && self.transport.is_open()
    }

    /// Reader opened by the last `open`
    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    /// Host view of the MODE register
    pub fn mode(&self) -> &ModeTracker {
        &self.mode
    }

    /// Open and claim the reader
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No reader with a known product ID is attached
    /// - The process may not open the device node
    /// - The interface cannot be claimed
    pub fn open(&mut self) -> Result<DeviceInfo> {
        info!("Opening reader {}...", self.transport.describe());

        let info = self.transport.open()?;
        self.mode.reset();
        self.info = Some(info.clone());

        Ok(info)
    }

    /// Release the interface and handle; idempotent
    ///
    /// Does not touch the MODE register; call [`release`](Self::release) first.
    pub fn close(&mut self) {
        if self.info.take().is_some() {
            info!("Closing reader {}", self.transport.describe());
        }
        self.transport.close();
        self.mode.invalidate();
    }

    /// Open and initialise unless already open
    pub fn ensure_ready(&mut self) -> Result<DeviceInfo> {
        if let Some(info) = self.info.as_ref().filter(|_| self.transport.is_open()) {
            return Ok(info.clone());
        }

        self.open()?;
        if let Err(e) = self.initialize() {
            warn!("Initialisation failed, closing reader: {}", e);
            self.release();
            self.close();
            return Err(e);
        }

        self.info.clone().ok_or_else(|| Error::Protocol("reader closed during init".into()))
    }

    /// Read one register; only the first response byte is meaningful
    pub fn read_register(&mut self, register: Register) -> Result<u8> {
        let mut buf = [0u8; control::READ_BUFFER_LEN];
        let n = self.transport.read_control(
            control::REQUEST_TYPE_READ,
            control::REQUEST,
            register.address(),
            control::INDEX,
            &mut buf,
        )?;

        if n == 0 {
            return Err(Error::Protocol(format!("empty response reading {}", register)));
        }

        trace!(register = %register, value = buf[0], "Register read");
        Ok(buf[0])
    }

    /// Write one byte to a register
    pub fn write_register(&mut self, register: Register, value: u8) -> Result<()> {
        self.transport.write_control(
            control::REQUEST_TYPE_WRITE,
            control::REQUEST,
            register.address(),
            control::INDEX,
            &[value],
        )?;

        trace!(register = %register, value, "Register write");
        Ok(())
    }

    /// Write the MODE register
    ///
    /// A failed write leaves the sensor state unknown.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.mode.check(mode)?;

        match self.write_register(Register::Mode, mode.into()) {
            Ok(()) => {
                self.mode.record(mode);
                Ok(())
            }
            Err(e) => {
                self.mode.invalidate();
                Err(e)
            }
        }
    }

    /// Reset the sensor and arm finger detection
    ///
    /// Returns HWSTAT, which is informational only.
    pub fn initialize(&mut self) -> Result<u8> {
        let hw_status = self.read_register(Register::HwStat)?;
        debug!("HWSTAT = 0x{:02X}", hw_status);

        if let Some(info) = self.info.as_mut() {
            info.hw_status = Some(hw_status);
        }

        self.set_mode(Mode::Init)?;
        thread::sleep(self.timings.init_settle);
        self.set_mode(Mode::AwaitFingerOn)?;

        info!("Reader initialised");
        Ok(hw_status)
    }

    /// Run one capture and return the raw bulk frame
    ///
    /// MODE=READY is written on every exit path, including transfer failures.
    /// Nothing is retried.
    pub fn capture_image(&mut self) -> Result<RawFrame> {
        let result = self.acquire();
        self.release();
        result
    }

    /// Capture and decode one image
    pub fn capture_and_decode(&mut self) -> Result<DecodedImage> {
        let frame = self.capture_image()?;
        Ok(frame.decode()?)
    }

    fn acquire(&mut self) -> Result<RawFrame> {
        self.set_mode(Mode::AwaitFingerOn)?;
        thread::sleep(self.timings.finger_wait);

        self.set_mode(Mode::Capture)?;
        thread::sleep(self.timings.capture_settle);

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let n = self.transport.read_bulk(&mut buf)?;
        if n == 0 {
            return Err(Error::CaptureFailed("bulk transfer returned no data".into()));
        }
        buf.truncate(n);

        debug!("Captured frame of {} bytes", n);
        Ok(RawFrame::new(Bytes::from(buf)))
    }

    /// Lend the open session to code that drives the sensor itself
    ///
    /// The host view of MODE is unknown afterwards, so MODE=READY is
    /// written once `f` returns, whatever it returned.
    pub fn with_session<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut (dyn UsbTransport + 'static)) -> R,
        T: 'static,
    {
        let result = f(&mut self.transport);
        self.mode.invalidate();
        self.release();
        result
    }

    /// Best-effort MODE=READY; returns whether the write went through
    pub fn release(&mut self) -> bool {
        if !self.transport.is_open() {
            return false;
        }

        match self.set_mode(Mode::Ready) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to return sensor to READY: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{Call, RecordingTransport, fast_timings, frame_with_lines};
    use pretty_assertions::assert_eq;

    fn device(transport: &RecordingTransport) -> Device<RecordingTransport> {
        Device::new(transport.clone()).with_timings(fast_timings())
    }

    #[test]
    fn test_initialize_sequence() {
        let transport = RecordingTransport::new().with_hw_status(0x24);
        let mut device = device(&transport);

        device.open().unwrap();
        assert_eq!(device.initialize().unwrap(), 0x24);
        assert_eq!(device.info().unwrap().hw_status, Some(0x24));

        assert_eq!(
            transport.calls(),
            vec![
                Call::Open,
                Call::Read(0x07),
                Call::Write(0x4E, 0x00),
                Call::Write(0x4E, 0x10),
            ]
        );
        assert_eq!(device.mode().current(), Some(Mode::AwaitFingerOn));
    }

    #[test]
    fn test_capture_sequence() {
        let transport = RecordingTransport::new().with_frame(frame_with_lines(2, 0x7F));
        let mut device = device(&transport);
        device.open().unwrap();

        let image = device.capture_and_decode().unwrap();
        assert_eq!(&image.as_bytes()[..768], &[0x7F; 768][..]);

        assert_eq!(
            transport.calls(),
            vec![
                Call::Open,
                Call::Write(0x4E, 0x10),
                Call::Write(0x4E, 0x20),
                Call::Bulk,
                Call::Write(0x4E, 0x80),
            ]
        );
        assert!(!device.mode().may_be_active());
    }

    #[test]
    fn test_release_after_bulk_failure() {
        let transport = RecordingTransport::new().failing_bulk();
        let mut device = device(&transport);
        device.open().unwrap();

        let err = device.capture_image().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolTimeout);

        let calls = transport.calls();
        let capture = calls.iter().position(|c| *c == Call::Write(0x4E, 0x20)).unwrap();
        assert!(calls[capture..].contains(&Call::Write(0x4E, 0x80)));
        assert_eq!(calls.last(), Some(&Call::Write(0x4E, 0x80)));
    }

    #[test]
    fn test_release_after_empty_transfer() {
        let transport = RecordingTransport::new().with_frame(Vec::new());
        let mut device = device(&transport);
        device.open().unwrap();

        let err = device.capture_image().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CaptureFailed);
        assert_eq!(transport.calls().last(), Some(&Call::Write(0x4E, 0x80)));
    }

    #[test]
    fn test_release_after_mode_write_failure() {
        let transport = RecordingTransport::new().failing_write(0x20);
        let mut device = device(&transport);
        device.open().unwrap();

        assert!(device.capture_image().is_err());
        assert!(!transport.calls().contains(&Call::Bulk));
        assert_eq!(transport.calls().last(), Some(&Call::Write(0x4E, 0x80)));
    }

    #[test]
    fn test_decode_error_after_release() {
        let transport = RecordingTransport::new().with_frame(vec![0u8; 10]);
        let mut device = device(&transport);
        device.open().unwrap();

        let err = device.capture_and_decode().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeTooSmall);
        assert_eq!(transport.calls().last(), Some(&Call::Write(0x4E, 0x80)));
    }

    #[test]
    fn test_capture_requires_open() {
        let transport = RecordingTransport::new();
        let mut device = device(&transport);

        assert!(device.capture_image().is_err());
        assert!(!device.release());
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_ensure_ready_opens_once() {
        let transport = RecordingTransport::new();
        let mut device = device(&transport);

        device.ensure_ready().unwrap();
        device.ensure_ready().unwrap();

        let opens = transport.calls().iter().filter(|c| **c == Call::Open).count();
        assert_eq!(opens, 1);
    }

    #[test]
    fn test_ensure_ready_closes_on_init_failure() {
        let transport = RecordingTransport::new().failing_write(0x00);
        let mut device = device(&transport);

        assert!(device.ensure_ready().is_err());
        assert!(!device.is_open());
        assert!(transport.calls().contains(&Call::Close));
    }

    #[test]
    fn test_lent_session_ends_in_ready() {
        let transport = RecordingTransport::new();
        let mut device = device(&transport);
        device.ensure_ready().unwrap();

        let bytes = device.with_session(|session| {
            session.write_control(0x40, 0x04, 0x4E, 0, &[0x20]).unwrap();
            let mut buf = vec![0u8; 4096];
            session.read_bulk(&mut buf).unwrap()
        });

        assert!(bytes > 0);
        assert_eq!(transport.mode_writes(), vec![0x00, 0x10, 0x20, 0x80]);
        assert_eq!(device.mode().current(), Some(Mode::Ready));
    }

    #[test]
    fn test_open_not_found() {
        let transport = RecordingTransport::new().missing();
        let mut device = device(&transport);

        let err = device.open().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
    }

    #[test]
    #[ignore] // Only run with real device
    fn test_real_capture() {
        let mut device = Device::new_usb();
        device.ensure_ready().unwrap();
        let image = device.capture_and_decode().unwrap();
        assert_eq!(image.len(), uru4k_core::IMAGE_SIZE);
        device.close();
    }
}
