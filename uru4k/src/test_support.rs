//! In-process fakes shared by the unit tests

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use uru4k_core::{IMAGE_WIDTH, METADATA_SIZE};
use uru4k_transport::{Error as TransportError, UsbTransport};
use uru4k_types::{
    DeviceInfo, Finger, GalleryEntry, Score, StoredTemplate, Template, UserId, UserSummary,
};

use crate::device::Timings;
use crate::error::{Error, Result};
use crate::store::TemplateBackend;

pub fn fast_timings() -> Timings {
    Timings {
        init_settle: Duration::ZERO,
        finger_wait: Duration::ZERO,
        capture_settle: Duration::ZERO,
    }
}

/// Frame with a single present block of `lines` rows filled with `fill`
pub fn frame_with_lines(lines: u8, fill: u8) -> Vec<u8> {
    let mut frame = vec![0u8; METADATA_SIZE];
    frame[4..6].copy_from_slice(&u16::from(lines).to_le_bytes());
    frame[16] = 0x00;
    frame[17] = lines;
    frame.extend(std::iter::repeat_n(fill, usize::from(lines) * IMAGE_WIDTH));
    frame
}

/// Holds bulk reads until opened
#[derive(Debug, Clone, Default)]
pub struct BulkGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl BulkGate {
    pub fn open(&self) {
        *self.inner.0.lock().unwrap() = true;
        self.inner.1.notify_all();
    }

    fn wait(&self) {
        let mut open = self.inner.0.lock().unwrap();
        while !*open {
            open = self.inner.1.wait(open).unwrap();
        }
    }
}

/// Transfer as seen by the fake reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Open,
    Close,
    Read(u16),
    Write(u16, u8),
    Bulk,
}

#[derive(Debug)]
struct FakeState {
    open: bool,
    present: bool,
    hw_status: u8,
    frame: Vec<u8>,
    fail_bulk: bool,
    fail_write: Option<u8>,
    bulk_gate: Option<BulkGate>,
    calls: Vec<Call>,
}

/// `UsbTransport` fake that records every transfer
///
/// Clones share state, so a test keeps one clone to inspect what the
/// device under test sent.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    state: Arc<Mutex<FakeState>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                open: false,
                present: true,
                hw_status: 0,
                frame: frame_with_lines(2, 0x7F),
                fail_bulk: false,
                fail_write: None,
                bulk_gate: None,
                calls: Vec::new(),
            })),
        }
    }

    pub fn with_hw_status(self, value: u8) -> Self {
        self.state.lock().unwrap().hw_status = value;
        self
    }

    pub fn with_frame(self, frame: Vec<u8>) -> Self {
        self.state.lock().unwrap().frame = frame;
        self
    }

    /// Bulk reads time out
    pub fn failing_bulk(self) -> Self {
        self.state.lock().unwrap().fail_bulk = true;
        self
    }

    /// MODE writes of `value` time out
    pub fn failing_write(self, value: u8) -> Self {
        self.state.lock().unwrap().fail_write = Some(value);
        self
    }

    /// Bulk reads block until `gate` opens
    pub fn with_bulk_gate(self, gate: BulkGate) -> Self {
        self.state.lock().unwrap().bulk_gate = Some(gate);
        self
    }

    /// No reader attached
    pub fn missing(self) -> Self {
        self.state.lock().unwrap().present = false;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// MODE values written, in order
    pub fn mode_writes(&self) -> Vec<u8> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Write(0x4E, value) => Some(value),
                _ => None,
            })
            .collect()
    }
}

impl UsbTransport for RecordingTransport {
    fn open(&mut self) -> uru4k_transport::Result<DeviceInfo> {
        let mut state = self.state.lock().unwrap();
        if !state.present {
            return Err(TransportError::DeviceNotFound {
                vendor_id: 0x05BA,
                product_ids: vec![0x000A, 0x0034],
            });
        }
        if state.open {
            return Err(TransportError::AlreadyOpen);
        }
        state.open = true;
        state.calls.push(Call::Open);

        let mut info = DeviceInfo::new(0x05BA, 0x000A);
        info.bulk_in_endpoint = 0x82;
        Ok(info)
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.open = false;
            state.calls.push(Call::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn read_control(
        &mut self,
        _request_type: u8,
        _request: u8,
        value: u16,
        _index: u16,
        buf: &mut [u8],
    ) -> uru4k_transport::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.calls.push(Call::Read(value));
        buf[0] = state.hw_status;
        Ok(1)
    }

    fn write_control(
        &mut self,
        _request_type: u8,
        _request: u8,
        value: u16,
        _index: u16,
        data: &[u8],
    ) -> uru4k_transport::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if value == 0x4E && state.fail_write == Some(data[0]) {
            return Err(TransportError::Timeout {
                operation: "control write",
                timeout_ms: 5000,
            });
        }
        state.calls.push(Call::Write(value, data[0]));
        Ok(data.len())
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> uru4k_transport::Result<usize> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            if !state.open {
                return Err(TransportError::NotOpen);
            }
            state.calls.push(Call::Bulk);
            state.bulk_gate.clone()
        };
        if let Some(gate) = gate {
            gate.wait();
        }

        let state = self.state.lock().unwrap();
        if state.fail_bulk {
            return Err(TransportError::Timeout {
                operation: "bulk read",
                timeout_ms: 5000,
            });
        }
        let n = state.frame.len().min(buf.len());
        buf[..n].copy_from_slice(&state.frame[..n]);
        Ok(n)
    }

    fn describe(&self) -> String {
        "fake".into()
    }
}

/// Authentication event as recorded by [`MemoryBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthEvent {
    pub user_id: Option<UserId>,
    pub success: bool,
    pub score: Score,
}

#[derive(Debug, Default)]
struct BackendState {
    templates: HashMap<(UserId, Finger), Template>,
    gallery: Vec<GalleryEntry>,
    events: Vec<AuthEvent>,
    fetches: usize,
    fail_log: bool,
}

/// Template backend held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, user_id: UserId, finger: Finger, template: Template) -> Self {
        self.state
            .lock()
            .unwrap()
            .templates
            .insert((user_id, finger), template);
        self
    }

    pub fn with_gallery(self, gallery: Vec<GalleryEntry>) -> Self {
        self.state.lock().unwrap().gallery = gallery;
        self
    }

    /// `log_auth` fails with a backend error
    pub fn failing_log(self) -> Self {
        self.state.lock().unwrap().fail_log = true;
        self
    }

    pub fn template(&self, user_id: UserId, finger: Finger) -> Option<Template> {
        self.state
            .lock()
            .unwrap()
            .templates
            .get(&(user_id, finger))
            .cloned()
    }

    pub fn events(&self) -> Vec<AuthEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Number of remote template fetches
    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }
}

pub fn gallery_entry(id: i32, finger: Finger, template: &[u8]) -> GalleryEntry {
    GalleryEntry {
        user_id: UserId(id),
        user_name: format!("user {}", id),
        user_email: None,
        finger,
        template: Template::new(template.to_vec()),
    }
}

#[async_trait]
impl TemplateBackend for MemoryBackend {
    async fn store_template(
        &self,
        user_id: UserId,
        finger: Finger,
        template: &Template,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .templates
            .insert((user_id, finger), template.clone());
        Ok(())
    }

    async fn fetch_template(
        &self,
        user_id: UserId,
        finger: Option<Finger>,
    ) -> Result<StoredTemplate> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;

        let found = state
            .templates
            .iter()
            .filter(|((id, f), _)| *id == user_id && finger.is_none_or(|want| want == *f))
            .map(|((_, f), t)| (*f, t.clone()))
            .next();

        match found {
            Some((finger, template)) => Ok(StoredTemplate {
                template,
                finger,
                created_at: None,
            }),
            None => Err(Error::TemplateNotFound { user_id, finger }),
        }
    }

    async fn fetch_gallery(&self, _scope: Option<&str>) -> Result<Vec<GalleryEntry>> {
        Ok(self.state.lock().unwrap().gallery.clone())
    }

    async fn log_auth(&self, user_id: Option<UserId>, success: bool, score: Score) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_log {
            return Err(Error::Backend {
                status: 500,
                message: "log unavailable".into(),
            });
        }
        state.events.push(AuthEvent {
            user_id,
            success,
            score,
        });
        Ok(())
    }

    async fn create_user(&self, _name: &str, _email: Option<&str>) -> Result<UserId> {
        Ok(UserId(1))
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        Ok(Vec::new())
    }

    async fn user_fingers(&self, user_id: UserId) -> Result<Vec<Finger>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .templates
            .keys()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, finger)| *finger)
            .collect())
    }
}
