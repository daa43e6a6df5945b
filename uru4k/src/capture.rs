//! Capture orchestration
//!
//! One [`CaptureOrchestrator`] owns the reader for the lifetime of the SDK.
//! Every protocol operation goes through [`CaptureOrchestrator::with_device`],
//! which:
//! - takes the single device slot (captures never interleave MODE writes)
//! - opens and initialises the reader on first use
//! - runs the blocking work on the blocking thread pool
//! - stops waiting on cancellation or timeout

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use uru4k_core::DecodedImage;
use uru4k_transport::{RusbTransport, UsbTransport};
use uru4k_types::{DeviceInfo, EnrollmentProgress};

use crate::config::check_scans;
use crate::device::Device;
use crate::error::{Error, Result};

/// Cooperative cancellation shared between a caller and a capture
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Running enrollment: progress stream plus its eventual outcome
pub struct EnrollmentHandle<R> {
    progress: mpsc::Receiver<EnrollmentProgress>,
    cancel: CancelToken,
    task: JoinHandle<Result<R>>,
}

impl<R> EnrollmentHandle<R> {
    pub(crate) fn new(
        progress: mpsc::Receiver<EnrollmentProgress>,
        cancel: CancelToken,
        task: JoinHandle<Result<R>>,
    ) -> Self {
        Self {
            progress,
            cancel,
            task,
        }
    }

    /// Next progress notification; `None` once the enrollment has finished
    pub async fn next_progress(&mut self) -> Option<EnrollmentProgress> {
        self.progress.recv().await
    }

    /// Stop the enrollment
    ///
    /// A scan already on the wire still completes; the sensor is then
    /// returned to READY and the outcome is `CaptureCancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the enrollment to finish
    pub async fn outcome(self) -> Result<R> {
        self.task.await?
    }
}

/// Marks the single enrollment slot as taken until dropped
#[derive(Debug)]
pub struct EnrollmentSlot {
    flag: Arc<AtomicBool>,
}

impl Drop for EnrollmentSlot {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Serialises access to one reader
pub struct CaptureOrchestrator<T: UsbTransport = RusbTransport> {
    device: Arc<Mutex<Device<T>>>,
    enrolling: Arc<AtomicBool>,
    timeout: Duration,
}

impl<T: UsbTransport> Clone for CaptureOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            enrolling: Arc::clone(&self.enrolling),
            timeout: self.timeout,
        }
    }
}

impl<T: UsbTransport + 'static> CaptureOrchestrator<T> {
    pub fn new(device: Device<T>) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            enrolling: Arc::new(AtomicBool::new(false)),
            timeout: Duration::from_secs(30),
        }
    }

    /// Bound on one device operation, measured from when it gets the slot
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `job` against the opened reader
    pub async fn with_device<R, F>(&self, cancel: &CancelToken, job: F) -> Result<R>
    where
        F: FnOnce(&mut Device<T>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run(cancel, self.timeout, job).await
    }

    async fn run<R, F>(&self, cancel: &CancelToken, limit: Duration, job: F) -> Result<R>
    where
        F: FnOnce(&mut Device<T>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(Error::CaptureCancelled);
        }

        let mut device = tokio::select! {
            device = Arc::clone(&self.device).lock_owned() => device,
            _ = cancel.cancelled() => return Err(Error::CaptureCancelled),
        };

        let token = cancel.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            if token.is_cancelled() {
                return Err(Error::CaptureCancelled);
            }

            let device = &mut *device;
            let result = device.ensure_ready().and_then(|_| job(device));

            if token.is_cancelled() {
                debug!("Operation cancelled while in flight, releasing sensor");
                device.release();
                return Err(Error::CaptureCancelled);
            }
            result
        });

        tokio::select! {
            joined = &mut task => joined?,
            _ = cancel.cancelled() => Err(Error::CaptureCancelled),
            _ = tokio::time::sleep(limit) => {
                warn!("Device operation exceeded {:?}", limit);
                cancel.cancel();
                Err(Error::Timeout {
                    operation: "capture",
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    /// Open and initialise the reader if needed
    pub async fn ensure_open(&self) -> Result<DeviceInfo> {
        self.with_device(&CancelToken::new(), |device| {
            device
                .info()
                .cloned()
                .ok_or_else(|| Error::Protocol("reader not open".into()))
        })
        .await
    }

    /// One capture-and-decode cycle
    pub async fn capture_once(&self, cancel: &CancelToken) -> Result<DecodedImage> {
        self.with_device(cancel, |device| device.capture_and_decode())
            .await
    }

    /// Run a long device job, such as a native enrollment loop, under a
    /// limit of one timeout per scan
    pub async fn with_device_for_scans<R, F>(
        &self,
        scans: u32,
        cancel: &CancelToken,
        job: F,
    ) -> Result<R>
    where
        F: FnOnce(&mut Device<T>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let limit = self.timeout.saturating_mul(scans.max(1));
        self.run(cancel, limit, job).await
    }

    /// Claim the enrollment slot
    pub fn begin_enrollment(&self) -> Result<EnrollmentSlot> {
        self.enrolling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::EnrollmentInProgress)?;

        Ok(EnrollmentSlot {
            flag: Arc::clone(&self.enrolling),
        })
    }

    pub fn is_enrolling(&self) -> bool {
        self.enrolling.load(Ordering::Acquire)
    }

    /// Capture `scans` images, reporting after each
    ///
    /// Cancellation is checked before every scan.
    pub async fn capture_scans(
        &self,
        scans: u32,
        progress: &mpsc::Sender<EnrollmentProgress>,
        cancel: &CancelToken,
    ) -> Result<Vec<DecodedImage>> {
        check_scans(scans)?;
        let mut images = Vec::with_capacity(scans as usize);

        for scan in 1..=scans {
            if cancel.is_cancelled() {
                return Err(Error::CaptureCancelled);
            }

            let image = self.capture_once(cancel).await?;
            images.push(image);

            let message = if scan < scans {
                "Lift and place your finger again"
            } else {
                "All scans captured"
            };
            report(progress, EnrollmentProgress::new(scan, scans, message)).await;
        }

        Ok(images)
    }

    /// Manual enrollment capture loop as a background task
    ///
    /// Fails with `EnrollmentInProgress` while another enrollment runs.
    pub fn start_manual_enrollment(
        &self,
        scans: u32,
    ) -> Result<EnrollmentHandle<Vec<DecodedImage>>> {
        check_scans(scans)?;
        let slot = self.begin_enrollment()?;
        let (tx, rx) = progress_channel(scans);
        let cancel = CancelToken::new();

        let orchestrator = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let _slot = slot;
            report(&tx, EnrollmentProgress::new(0, scans, "Place your finger on the reader")).await;
            orchestrator.capture_scans(scans, &tx, &token).await
        });

        Ok(EnrollmentHandle::new(rx, cancel, task))
    }

    /// Return the sensor to READY and close the reader
    pub async fn shutdown(&self) -> Result<()> {
        let mut device = Arc::clone(&self.device).lock_owned().await;

        tokio::task::spawn_blocking(move || {
            if device.is_open() {
                device.release();
                device.close();
                info!("Reader shut down");
            }
        })
        .await?;

        Ok(())
    }
}

/// Channel sized so an enrollment never blocks on an unread stream
pub(crate) fn progress_channel(
    scans: u32,
) -> (mpsc::Sender<EnrollmentProgress>, mpsc::Receiver<EnrollmentProgress>) {
    mpsc::channel(scans as usize + 2)
}

/// Send progress; a dropped receiver is not an error
pub(crate) async fn report(progress: &mpsc::Sender<EnrollmentProgress>, update: EnrollmentProgress) {
    debug!("Enrollment progress {}", update);
    let _ = progress.send(update).await;
}
