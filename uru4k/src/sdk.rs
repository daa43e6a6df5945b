//! SDK entry points: enroll, verify, identify

use std::sync::Arc;

use tracing::{debug, info, warn};

use uru4k_core::DecodedImage;
use uru4k_transport::{RusbTransport, UsbTransport};
use uru4k_types::{
    DeviceInfo, EnrollOutcome, EnrollmentProgress, Finger, IdentifyOutcome, Score, Template,
    UserId, VerifyOutcome,
};

use crate::capture::{
    CancelToken, CaptureOrchestrator, EnrollmentHandle, progress_channel, report,
};
use crate::config::{CaptureMode, SdkConfig, check_scans};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::matching::{Matcher, MatchingFacade, Probe};
use crate::store::TemplateStore;

/// Fingerprint SDK session
///
/// Owns the reader, the matcher and the template store. Build one at
/// startup and call [`shutdown`](Self::shutdown) before exit.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use uru4k::{Finger, FingerprintSdk, Matcher, SdkConfig, UserId};
///
/// async fn run(matcher: Arc<dyn Matcher>) -> uru4k::Result<()> {
///     let config = SdkConfig::new("https://attendance.example.com/api");
///     let sdk = FingerprintSdk::new(config, matcher)?;
///
///     sdk.enroll(UserId(42), Finger::RightIndex).await?;
///     let outcome = sdk.verify(UserId(42), None).await?;
///     println!("matched with score {}", outcome.score);
///
///     sdk.shutdown().await
/// }
/// ```
pub struct FingerprintSdk<T: UsbTransport = RusbTransport> {
    config: SdkConfig,
    orchestrator: CaptureOrchestrator<T>,
    matching: MatchingFacade,
    store: TemplateStore,
}

impl FingerprintSdk<RusbTransport> {
    /// SDK on the libusb transport and the HTTP backend
    pub fn new(config: SdkConfig, matcher: Arc<dyn Matcher>) -> Result<Self> {
        config.validate()?;

        let transport = RusbTransport::new()
            .with_ids(config.device.vendor_id, config.device.product_ids.clone())
            .with_interface(config.device.interface)
            .with_timeout(std::time::Duration::from_millis(
                config.device.transfer_timeout_ms,
            ));
        let device = Device::new(transport).with_timings(config.timings.into());
        let store = TemplateStore::from_config(&config)?;

        Ok(Self::from_parts(config, device, matcher, store))
    }
}

impl<T: UsbTransport + 'static> FingerprintSdk<T> {
    /// Assemble an SDK from explicit components
    pub fn from_parts(
        config: SdkConfig,
        device: Device<T>,
        matcher: Arc<dyn Matcher>,
        store: TemplateStore,
    ) -> Self {
        let orchestrator = CaptureOrchestrator::new(device).with_timeout(config.timeout());
        let matching = MatchingFacade::new(matcher, config.match_threshold);

        Self {
            config,
            orchestrator,
            matching,
            store,
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &CaptureOrchestrator<T> {
        &self.orchestrator
    }

    /// Open and initialise the reader now rather than on first use
    pub async fn open(&self) -> Result<DeviceInfo> {
        self.orchestrator.ensure_open().await
    }

    /// Capture and decode one image
    pub async fn capture_once(&self) -> Result<DecodedImage> {
        self.orchestrator.capture_once(&CancelToken::new()).await
    }

    /// Enroll `finger` of `user_id` and wait for the result
    pub async fn enroll(&self, user_id: UserId, finger: Finger) -> Result<EnrollOutcome> {
        self.enroll_with_progress(user_id, finger)?.outcome().await
    }

    /// Start an enrollment that reports progress while it runs
    ///
    /// Only one enrollment may run at a time; a second call fails with
    /// `EnrollmentInProgress` until the first finishes.
    pub fn enroll_with_progress(
        &self,
        user_id: UserId,
        finger: Finger,
    ) -> Result<EnrollmentHandle<EnrollOutcome>> {
        let scans = self.config.enrollment_scans;
        check_scans(scans)?;
        let slot = self.orchestrator.begin_enrollment()?;
        let mode = self.config.capture_mode;
        let (tx, rx) = progress_channel(scans);
        let cancel = CancelToken::new();

        let orchestrator = self.orchestrator.clone();
        let matching = self.matching.clone();
        let store = self.store.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let _slot = slot;
            info!(%user_id, %finger, scans, ?mode, "Enrollment started");
            report(&tx, EnrollmentProgress::new(0, scans, "Starting...")).await;

            let template = match mode {
                CaptureMode::Native => {
                    orchestrator
                        .with_device_for_scans(scans, &token, move |device| {
                            device.with_session(|session| matching.enroll(session, scans))
                        })
                        .await?
                }
                CaptureMode::Sensor => {
                    let images = orchestrator.capture_scans(scans, &tx, &token).await?;
                    tokio::task::spawn_blocking(move || matching.create_template(&images))
                        .await??
                }
            };

            if token.is_cancelled() {
                return Err(Error::CaptureCancelled);
            }

            report(&tx, EnrollmentProgress::new(scans, scans, "Saving template")).await;
            store.store(user_id, finger, &template).await?;

            info!(%user_id, %finger, bytes = template.len(), "Enrollment complete");
            Ok(EnrollOutcome { user_id, finger })
        });

        Ok(EnrollmentHandle::new(rx, cancel, task))
    }

    /// 1:1 verification of a live finger against the stored template
    pub async fn verify(&self, user_id: UserId, finger: Option<Finger>) -> Result<VerifyOutcome> {
        self.orchestrator.ensure_open().await?;
        let template = self.store.load(user_id, finger).await?;

        let matching = self.matching.clone();
        let result = self
            .match_live(move |probe| matching.verify(&probe, &template))
            .await;

        match result {
            Ok(score) => {
                info!(%user_id, score = score.value(), "Verified");
                self.store.log_event(Some(user_id), true, score);
                Ok(VerifyOutcome {
                    user_id,
                    score,
                    finger,
                })
            }
            Err(Error::VerificationFailed { score, threshold }) => {
                info!(%user_id, score = score.value(), "Verification rejected");
                self.store.log_event(Some(user_id), false, score);
                Err(Error::VerificationFailed { score, threshold })
            }
            Err(e) => Err(e),
        }
    }

    /// 1:N identification of a live finger against the gallery
    ///
    /// An empty gallery fails with `NoTemplatesInGallery` before any capture.
    pub async fn identify(&self, scope: Option<&str>) -> Result<IdentifyOutcome> {
        self.orchestrator.ensure_open().await?;
        let gallery = self.store.load_gallery(scope).await?;
        if gallery.is_empty() {
            return Err(Error::NoTemplatesInGallery);
        }
        debug!(candidates = gallery.len(), "Identifying");

        let templates: Vec<Template> = gallery.iter().map(|e| e.template.clone()).collect();
        let matching = self.matching.clone();
        let result = self
            .match_live(move |probe| matching.identify(&probe, &templates))
            .await;

        match result {
            Ok((index, score)) => {
                let entry = gallery.into_iter().nth(index).ok_or_else(|| {
                    Error::MatchingFailed(format!("match index {} out of range", index))
                })?;

                info!(user_id = %entry.user_id, score = score.value(), "Identified");
                self.store.log_event(Some(entry.user_id), true, score);

                Ok(IdentifyOutcome {
                    user_id: entry.user_id,
                    user_name: entry.user_name,
                    user_email: entry.user_email,
                    finger: entry.finger,
                    score,
                    index,
                })
            }
            Err(Error::IdentificationFailed { best }) => {
                info!(?best, "No gallery entry matched");
                self.store
                    .log_event(None, false, best.unwrap_or(Score::MIN));
                Err(Error::IdentificationFailed { best })
            }
            Err(e) => Err(e),
        }
    }

    /// Return the sensor to READY and close the reader
    pub async fn shutdown(&self) -> Result<()> {
        if self.orchestrator.is_enrolling() {
            warn!("Shutting down with an enrollment still running");
        }
        self.orchestrator.shutdown().await
    }

    /// Acquire a live probe and run `decide` on it
    ///
    /// Native mode lets the matcher sample the sensor through the open
    /// session while holding the device slot; sensor mode captures an image.
    async fn match_live<R, F>(&self, decide: F) -> Result<R>
    where
        F: FnOnce(Probe) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let cancel = CancelToken::new();

        let probe = match self.config.capture_mode {
            CaptureMode::Native => {
                let matching = self.matching.clone();
                self.orchestrator
                    .with_device(&cancel, move |device| {
                        device.with_session(|session| matching.capture_probe(session))
                    })
                    .await?
            }
            CaptureMode::Sensor => Probe::Image(self.orchestrator.capture_once(&cancel).await?),
        };

        tokio::task::spawn_blocking(move || decide(probe)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::matching::{MatcherError, MockMatcher};
    use crate::store::SecureCache;
    use crate::test_support::{
        AuthEvent, Call, MemoryBackend, RecordingTransport, fast_timings, gallery_entry,
    };
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config(mode: CaptureMode) -> SdkConfig {
        SdkConfig::new("http://localhost:9/api")
            .with_enrollment_scans(3)
            .with_capture_mode(mode)
            .with_cache(false)
    }

    fn sdk(
        mode: CaptureMode,
        transport: &RecordingTransport,
        matcher: MockMatcher,
        backend: &MemoryBackend,
    ) -> FingerprintSdk<RecordingTransport> {
        FingerprintSdk::from_parts(
            config(mode),
            Device::new(transport.clone()).with_timings(fast_timings()),
            Arc::new(matcher),
            TemplateStore::new(Arc::new(backend.clone()), None),
        )
    }

    /// Native matcher that samples `probe` as its live template
    fn sampling(probe: &'static [u8]) -> MockMatcher {
        let mut matcher = MockMatcher::new();
        matcher
            .expect_capture()
            .returning(move |_| Ok(Template::new(probe.to_vec())));
        matcher
    }

    async fn flush() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_verify_threshold_boundary() {
        let backend = MemoryBackend::new()
            .with_template(UserId(1), Finger::LeftIndex, Template::new(vec![1, 2, 3]));

        let mut rejecting = sampling(&[0xAA]);
        rejecting.expect_verify().returning(|_, _| Ok(0.59));
        let sdk_59 = sdk(CaptureMode::Native, &RecordingTransport::new(), rejecting, &backend);
        let err = sdk_59.verify(UserId(1), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VerificationFailed);

        let mut accepting = sampling(&[0xAA]);
        accepting.expect_verify().returning(|_, _| Ok(0.60));
        let sdk_60 = sdk(CaptureMode::Native, &RecordingTransport::new(), accepting, &backend);
        let outcome = sdk_60.verify(UserId(1), None).await.unwrap();
        assert_eq!(outcome.score.value(), 60);
        assert_eq!(outcome.user_id, UserId(1));

        flush().await;
        let events = backend.events();
        assert_eq!(events.len(), 2);
        assert!(events.contains(&AuthEvent {
            user_id: Some(UserId(1)),
            success: false,
            score: Score::new(59).unwrap(),
        }));
        assert!(events.contains(&AuthEvent {
            user_id: Some(UserId(1)),
            success: true,
            score: Score::new(60).unwrap(),
        }));
    }

    #[tokio::test]
    async fn test_verify_sensor_mode_uses_captured_image() {
        let transport = RecordingTransport::new();
        let backend = MemoryBackend::new()
            .with_template(UserId(2), Finger::RightIndex, Template::new(vec![9]));

        let mut matcher = MockMatcher::new();
        matcher
            .expect_verify()
            .withf(|probe, _| matches!(probe, Probe::Image(image) if image.pixel(0, 0) == Some(0x7F)))
            .returning(|_, _| Ok(0.9));

        let sdk = sdk(CaptureMode::Sensor, &transport, matcher, &backend);
        let outcome = sdk.verify(UserId(2), Some(Finger::RightIndex)).await.unwrap();

        assert_eq!(outcome.score.value(), 90);
        assert_eq!(outcome.finger, Some(Finger::RightIndex));
        assert!(transport.calls().contains(&Call::Bulk));
        assert_eq!(transport.mode_writes().last(), Some(&0x80));
    }

    #[tokio::test]
    async fn test_verify_native_samples_through_open_session() {
        let transport = RecordingTransport::new();
        let backend = MemoryBackend::new()
            .with_template(UserId(4), Finger::LeftMiddle, Template::new(vec![4]));

        let mut matcher = MockMatcher::new();
        matcher.expect_capture().times(1).returning(|session| {
            let mut buf = vec![0u8; 8192];
            let n = session
                .read_bulk(&mut buf)
                .map_err(|e| MatcherError(e.to_string()))?;
            Ok(Template::new(buf[..n.min(4)].to_vec()))
        });
        matcher
            .expect_verify()
            .withf(|probe, _| matches!(probe, Probe::Template(t) if !t.is_empty()))
            .returning(|_, _| Ok(0.81));

        let sdk = sdk(CaptureMode::Native, &transport, matcher, &backend);
        let outcome = sdk.verify(UserId(4), None).await.unwrap();

        assert_eq!(outcome.score.value(), 81);
        let opens = transport.calls().iter().filter(|c| **c == Call::Open).count();
        assert_eq!(opens, 1);
        assert!(transport.calls().contains(&Call::Bulk));
        assert_eq!(transport.mode_writes(), vec![0x00, 0x10, 0x80]);
    }

    #[tokio::test]
    async fn test_verify_missing_template() {
        let mut matcher = MockMatcher::new();
        matcher.expect_verify().never();

        let sdk = sdk(
            CaptureMode::Native,
            &RecordingTransport::new(),
            matcher,
            &MemoryBackend::new(),
        );
        let err = sdk.verify(UserId(3), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    }

    #[tokio::test]
    async fn test_verify_matcher_failure_not_logged() {
        let backend = MemoryBackend::new()
            .with_template(UserId(1), Finger::LeftIndex, Template::new(vec![1]));
        let mut matcher = sampling(&[0xAA]);
        matcher
            .expect_verify()
            .returning(|_, _| Err(MatcherError("sensor busy".into())));

        let sdk = sdk(CaptureMode::Native, &RecordingTransport::new(), matcher, &backend);
        let err = sdk.verify(UserId(1), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MatchingFailed);

        flush().await;
        assert!(backend.events().is_empty());
    }

    #[tokio::test]
    async fn test_identify_returns_matching_entry() {
        let backend = MemoryBackend::new().with_gallery(vec![
            gallery_entry(10, Finger::LeftIndex, &[1]),
            gallery_entry(11, Finger::RightThumb, &[2]),
            gallery_entry(12, Finger::LeftRing, &[3]),
        ]);
        let mut matcher = sampling(&[0xAA]);
        matcher
            .expect_identify()
            .withf(|_, gallery| gallery.len() == 3)
            .returning(|_, _| Ok(vec![0.15, 0.72, 0.40]));

        let sdk = sdk(CaptureMode::Native, &RecordingTransport::new(), matcher, &backend);
        let outcome = sdk.identify(None).await.unwrap();

        assert_eq!(outcome.index, 1);
        assert_eq!(outcome.score.value(), 72);
        assert_eq!(outcome.user_id, UserId(11));
        assert_eq!(outcome.finger, Finger::RightThumb);
        assert_eq!(outcome.user_name, "user 11");
    }

    #[tokio::test]
    async fn test_identify_empty_gallery_skips_capture() {
        let transport = RecordingTransport::new();
        let mut matcher = MockMatcher::new();
        matcher.expect_identify().never();

        let sdk = sdk(CaptureMode::Sensor, &transport, matcher, &MemoryBackend::new());
        let err = sdk.identify(Some("site-a")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoTemplatesInGallery);
        assert!(!transport.calls().contains(&Call::Bulk));
        assert!(!transport.mode_writes().contains(&0x20));
    }

    #[tokio::test]
    async fn test_identify_no_match_logs_anonymous_event() {
        let backend = MemoryBackend::new().with_gallery(vec![
            gallery_entry(1, Finger::LeftIndex, &[1]),
            gallery_entry(2, Finger::LeftIndex, &[2]),
        ]);
        let mut matcher = sampling(&[0xAA]);
        matcher.expect_identify().returning(|_, _| Ok(vec![0.30, 0.45]));

        let sdk = sdk(CaptureMode::Native, &RecordingTransport::new(), matcher, &backend);
        let err = sdk.identify(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentificationFailed);

        flush().await;
        assert_eq!(
            backend.events(),
            vec![AuthEvent {
                user_id: None,
                success: false,
                score: Score::new(45).unwrap(),
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_audit_does_not_affect_result() {
        let backend = MemoryBackend::new()
            .with_template(UserId(1), Finger::LeftIndex, Template::new(vec![1]))
            .failing_log();
        let mut matcher = sampling(&[0xAA]);
        matcher.expect_verify().returning(|_, _| Ok(0.95));

        let sdk = sdk(CaptureMode::Native, &RecordingTransport::new(), matcher, &backend);
        assert!(sdk.verify(UserId(1), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_native_enrollment() {
        let transport = RecordingTransport::new();
        let backend = MemoryBackend::new();
        let mut matcher = MockMatcher::new();
        matcher.expect_enroll().returning(|session, scans| {
            assert_eq!(scans, 3);
            assert!(session.is_open());
            Ok(Template::new(vec![0xAB; 16]))
        });

        let sdk = sdk(CaptureMode::Native, &transport, matcher, &backend);
        let mut handle = sdk.enroll_with_progress(UserId(8), Finger::LeftThumb).unwrap();

        let mut updates = Vec::new();
        while let Some(update) = handle.next_progress().await {
            updates.push(update);
        }
        let outcome = handle.outcome().await.unwrap();

        assert_eq!(outcome, EnrollOutcome { user_id: UserId(8), finger: Finger::LeftThumb });
        assert_eq!(updates.first().unwrap().current_scan, 0);
        assert!(updates.last().unwrap().is_complete());
        assert_eq!(
            backend.template(UserId(8), Finger::LeftThumb),
            Some(Template::new(vec![0xAB; 16]))
        );
        assert_eq!(transport.mode_writes().last(), Some(&0x80));
    }

    #[tokio::test]
    async fn test_sensor_enrollment_captures_each_scan() {
        let transport = RecordingTransport::new();
        let backend = MemoryBackend::new();
        let mut matcher = MockMatcher::new();
        matcher
            .expect_create_template()
            .withf(|images| images.len() == 3)
            .returning(|_| Ok(Template::new(vec![1; 8])));

        let sdk = sdk(CaptureMode::Sensor, &transport, matcher, &backend);
        sdk.enroll(UserId(9), Finger::RightRing).await.unwrap();

        let bulks = transport.calls().iter().filter(|c| **c == Call::Bulk).count();
        assert_eq!(bulks, 3);
        assert_eq!(transport.mode_writes().last(), Some(&0x80));
        assert!(backend.template(UserId(9), Finger::RightRing).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_enrollment_rejected() {
        let mut matcher = MockMatcher::new();
        matcher.expect_enroll().returning(|_, _| Ok(Template::new(vec![1])));

        let sdk = sdk(
            CaptureMode::Native,
            &RecordingTransport::new(),
            matcher,
            &MemoryBackend::new(),
        );
        let first = sdk.enroll_with_progress(UserId(1), Finger::LeftIndex).unwrap();
        let err = sdk.enroll_with_progress(UserId(2), Finger::LeftIndex).err().unwrap();
        assert!(matches!(err, Error::EnrollmentInProgress));

        first.outcome().await.unwrap();
        assert!(sdk.enroll_with_progress(UserId(2), Finger::LeftIndex).is_ok());
    }

    #[tokio::test]
    async fn test_cached_template_used_for_verify() {
        let dir = TempDir::new().unwrap();
        let cache = SecureCache::open(dir.path()).unwrap();
        cache.put(UserId(5), &Template::new(vec![5, 5])).unwrap();

        let backend = MemoryBackend::new();
        let mut matcher = sampling(&[0xAA]);
        matcher
            .expect_verify()
            .withf(|_, template| template.as_bytes() == [5, 5])
            .returning(|_, _| Ok(0.8));

        let sdk = FingerprintSdk::from_parts(
            config(CaptureMode::Native),
            Device::new(RecordingTransport::new()).with_timings(fast_timings()),
            Arc::new(matcher),
            TemplateStore::new(Arc::new(backend.clone()), Some(cache)),
        );

        sdk.verify(UserId(5), None).await.unwrap();
        assert_eq!(backend.fetches(), 0);
    }

    #[tokio::test]
    async fn test_device_not_found() {
        let mut matcher = MockMatcher::new();
        matcher.expect_verify().never();

        let sdk = sdk(
            CaptureMode::Native,
            &RecordingTransport::new().missing(),
            matcher,
            &MemoryBackend::new(),
        );
        let err = sdk.verify(UserId(1), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let transport = RecordingTransport::new();
        let sdk = sdk(
            CaptureMode::Sensor,
            &transport,
            MockMatcher::new(),
            &MemoryBackend::new(),
        );

        sdk.capture_once().await.unwrap();
        sdk.shutdown().await.unwrap();
        assert_eq!(transport.calls().last(), Some(&Call::Close));
    }
}
