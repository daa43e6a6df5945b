//! Sensor mode register values and state tracking
//!
//! The sensor has no readable mode: the host only knows what it last wrote.
//! `ModeTracker` mirrors that knowledge:
//! - the last mode successfully written
//! - whether the sensor may currently be active (LED on)
//! - the number of mode writes in this session

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::error::{Error, Result};

/// Values of the MODE register
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    /// Reset the acquisition pipeline
    Init = 0x00,

    /// Finger detection armed
    AwaitFingerOn = 0x10,

    /// Image acquisition running
    Capture = 0x20,

    /// Sensor powered down
    Off = 0x70,

    /// Idle, LED off
    Ready = 0x80,
}

impl Mode {
    /// Get mode name
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "MODE_INIT",
            Self::AwaitFingerOn => "MODE_AWAIT_FINGER_ON",
            Self::Capture => "MODE_CAPTURE",
            Self::Off => "MODE_OFF",
            Self::Ready => "MODE_READY",
        }
    }

    /// Sensor is idle in this mode
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Ready | Self::Off)
    }

    /// Check whether `to` may be written while the host believes the sensor is in `from`
    ///
    /// Capture must be armed by AWAIT_FINGER_ON first; every other write is
    /// accepted from any state, including the unknown state after open.
    pub fn can_transition(from: Option<Mode>, to: Mode) -> bool {
        match to {
            Self::Capture => matches!(from, Some(Self::AwaitFingerOn)),
            _ => true,
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> u8 {
        mode as u8
    }
}

impl TryFrom<u8> for Mode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Init),
            0x10 => Ok(Self::AwaitFingerOn),
            0x20 => Ok(Self::Capture),
            0x70 => Ok(Self::Off),
            0x80 => Ok(Self::Ready),
            _ => Err(Error::UnknownMode(value)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}

/// Host-side view of the MODE register
///
/// Thread-safe and can be cloned cheaply (Arc internally).
#[derive(Debug, Clone)]
pub struct ModeTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug)]
struct TrackerInner {
    /// Last mode written successfully (None until the first write, or after a failed one)
    mode: parking_lot::RwLock<Option<Mode>>,

    /// Successful mode writes since the last reset
    writes: AtomicU32,
}

impl ModeTracker {
    /// Create a tracker with unknown sensor state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                mode: parking_lot::RwLock::new(None),
                writes: AtomicU32::new(0),
            }),
        }
    }

    /// Last mode the host wrote, if known
    pub fn current(&self) -> Option<Mode> {
        *self.inner.mode.read()
    }

    /// Number of successful mode writes
    pub fn writes(&self) -> u32 {
        self.inner.writes.load(Ordering::Acquire)
    }

    /// Sensor may be acquiring (anything other than a known idle mode)
    pub fn may_be_active(&self) -> bool {
        !matches!(self.current(), Some(mode) if mode.is_idle())
    }

    /// Validate a write before it goes on the wire
    pub fn check(&self, to: Mode) -> Result<()> {
        let from = self.current();
        if Mode::can_transition(from, to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition { from, to })
        }
    }

    /// Record a successful write
    pub fn record(&self, mode: Mode) {
        let mut state = self.inner.mode.write();
        debug!(from = ?*state, to = %mode, "Mode transition");
        *state = Some(mode);
        self.inner.writes.fetch_add(1, Ordering::AcqRel);
    }

    /// Forget the sensor state (write failed or handle closed)
    pub fn invalidate(&self) {
        *self.inner.mode.write() = None;
    }

    /// Reset state and counters (new session)
    pub fn reset(&self) {
        *self.inner.mode.write() = None;
        self.inner.writes.store(0, Ordering::Release);
    }
}

impl Default for ModeTracker {
    fn default() -> Self {
        Self::new()
    }
}
