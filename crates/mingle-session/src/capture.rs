//! Face-capture login state machine.
//!
//! Wraps camera acquisition, frame capture, and descriptor extraction
//! behind injected capabilities, and branches into login vs.
//! registration based on nearest-neighbor matching against the store.
//!
//! ```text
//! Idle -> LoadingModels -> Scanning -> Processing -> Success
//!                                        |    \-> Registering -> Success
//!                                        \-> Scanning (no face, retry)
//! ```
//!
//! The camera handle lives only inside the Scanning/Processing states;
//! every exit path drops it, so reaching Idle, Registering, or Success
//! is proof the device has been released.

use mingle_core::{BiometricStore, Descriptor, MatchOutcome};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long the Success state lingers before auto-resetting to Idle.
pub const SUCCESS_LINGER: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("camera unavailable: {0}")]
    DeviceAccess(String),
    #[error("descriptor extraction failed: {0}")]
    Extraction(String),
}

/// Camera capability: opening yields an active handle.
pub trait FrameSource {
    type Camera: ActiveCamera;
    fn open(&mut self) -> Result<Self::Camera, String>;
}

/// An open camera. Dropping the handle releases the device.
pub trait ActiveCamera {
    /// Grab the current frame as an encoded JPEG.
    fn grab_jpeg(&mut self) -> Result<Vec<u8>, String>;
}

/// Hosted detection/recognition model capability.
pub trait FaceAnalyzer {
    /// Load (or warm up) the detection and recognition models.
    async fn prepare(&mut self) -> Result<(), String>;
    /// Extract a descriptor from a frame, or `None` when no face is
    /// detected with sufficient confidence.
    async fn extract(&mut self, jpeg: &[u8]) -> Result<Option<Descriptor>, String>;
}

/// Observable session state, mirroring the kiosk login UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    LoadingModels,
    Scanning,
    Processing,
    Registering,
    Success,
}

/// What a capture attempt concluded.
#[derive(Debug)]
pub enum CaptureEvent {
    /// An enrolled user matched; the session is in Success.
    MatchFound(MatchOutcome),
    /// A face was found but nobody matched; awaiting a display name.
    RegistrationNeeded,
    /// No face in the frame; back to Scanning for a retry.
    NoFaceDetected,
}

enum Phase<C> {
    Idle,
    LoadingModels,
    Scanning { camera: C },
    // The camera handle is held by the in-flight capture() call here;
    // &mut self exclusivity means nobody can observe a half-state.
    Processing,
    Registering { probe: Descriptor },
    Success { until: Instant },
}

pub struct FaceCaptureSession<F: FrameSource, A: FaceAnalyzer> {
    source: F,
    analyzer: A,
    threshold: f32,
    phase: Phase<F::Camera>,
    last_error: Option<String>,
}

impl<F: FrameSource, A: FaceAnalyzer> FaceCaptureSession<F, A> {
    pub fn new(source: F, analyzer: A, threshold: f32) -> Self {
        Self {
            source,
            analyzer,
            threshold,
            phase: Phase::Idle,
            last_error: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        match self.phase {
            Phase::Idle => CaptureState::Idle,
            Phase::LoadingModels => CaptureState::LoadingModels,
            Phase::Scanning { .. } => CaptureState::Scanning,
            Phase::Processing => CaptureState::Processing,
            Phase::Registering { .. } => CaptureState::Registering,
            Phase::Success { .. } => CaptureState::Success,
        }
    }

    /// Most recent user-visible error, kept across the reset to Idle.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Idle → LoadingModels → Scanning. Loads the hosted models and
    /// opens the camera; either failure resets to Idle with the error
    /// retained for the UI.
    pub async fn request_scan(&mut self) -> Result<(), CaptureError> {
        if !matches!(self.phase, Phase::Idle) {
            return Ok(());
        }
        self.last_error = None;
        self.phase = Phase::LoadingModels;

        if let Err(err) = self.analyzer.prepare().await {
            tracing::warn!(error = %err, "face model load failed");
            self.last_error = Some(err.clone());
            self.phase = Phase::Idle;
            return Err(CaptureError::ModelLoad(err));
        }

        match self.source.open() {
            Ok(camera) => {
                tracing::info!("camera acquired; scanning");
                self.phase = Phase::Scanning { camera };
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "camera open failed");
                self.last_error = Some(err.clone());
                self.phase = Phase::Idle;
                Err(CaptureError::DeviceAccess(err))
            }
        }
    }

    /// Scanning → Processing → (Success | Registering | Scanning).
    ///
    /// Grabs the current frame, extracts a descriptor, and matches it
    /// against the store. Only valid in Scanning; otherwise a no-op
    /// returning `NoFaceDetected` is avoided by the `None`.
    pub async fn capture(
        &mut self,
        store: &BiometricStore,
        now: Instant,
    ) -> Result<Option<CaptureEvent>, CaptureError> {
        if !matches!(self.phase, Phase::Scanning { .. }) {
            return Ok(None);
        }
        let Phase::Scanning { mut camera } =
            std::mem::replace(&mut self.phase, Phase::Processing)
        else {
            unreachable!("phase was just checked to be Scanning");
        };

        let jpeg = match camera.grab_jpeg() {
            Ok(jpeg) => jpeg,
            Err(err) => {
                // Device fault mid-capture: release and go home.
                tracing::warn!(error = %err, "frame grab failed");
                self.last_error = Some(err.clone());
                drop(camera);
                self.phase = Phase::Idle;
                return Err(CaptureError::DeviceAccess(err));
            }
        };

        let probe = match self.analyzer.extract(&jpeg).await {
            Ok(Some(probe)) => probe,
            Ok(None) => {
                // Retry-eligible: keep the camera, back to Scanning.
                tracing::debug!("no face detected in frame");
                self.phase = Phase::Scanning { camera };
                return Ok(Some(CaptureEvent::NoFaceDetected));
            }
            Err(err) => {
                tracing::warn!(error = %err, "descriptor extraction failed");
                self.last_error = Some(err.clone());
                self.phase = Phase::Scanning { camera };
                return Err(CaptureError::Extraction(err));
            }
        };

        let outcome = store.match_probe(&probe, self.threshold);
        if outcome.matched {
            tracing::info!(
                profile = outcome.profile_id.as_deref().unwrap_or(""),
                distance = outcome.distance,
                "face login matched"
            );
            drop(camera);
            self.phase = Phase::Success {
                until: now + SUCCESS_LINGER,
            };
            Ok(Some(CaptureEvent::MatchFound(outcome)))
        } else {
            tracing::info!(distance = outcome.distance, "no enrolled match; registering");
            drop(camera);
            self.phase = Phase::Registering { probe };
            Ok(Some(CaptureEvent::RegistrationNeeded))
        }
    }

    /// Registering → Success. Returns the held probe with the chosen
    /// name so the orchestrator can enroll it. A blank name keeps the
    /// session in Registering.
    pub fn submit_name(&mut self, name: &str, now: Instant) -> Option<(String, Descriptor)> {
        let trimmed = name.trim();
        if trimmed.is_empty() || !matches!(self.phase, Phase::Registering { .. }) {
            return None;
        }
        let Phase::Registering { probe } = std::mem::replace(&mut self.phase, Phase::Idle) else {
            unreachable!("phase was just checked to be Registering");
        };
        self.phase = Phase::Success {
            until: now + SUCCESS_LINGER,
        };
        Some((trimmed.to_string(), probe))
    }

    /// Abort from any state: camera released, probe discarded.
    /// Idempotent.
    pub fn cancel(&mut self) {
        self.phase = Phase::Idle;
    }

    /// Teardown on view switch; same contract as [`cancel`](Self::cancel).
    pub fn force_reset(&mut self) {
        if !matches!(self.phase, Phase::Idle) {
            tracing::debug!("capture session force-reset");
        }
        self.phase = Phase::Idle;
    }

    /// Drive the Success auto-timeout.
    pub fn tick(&mut self, now: Instant) {
        if let Phase::Success { until } = self.phase {
            if now >= until {
                self.phase = Phase::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mingle_core::DESCRIPTOR_DIM;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts open camera handles so tests can assert release.
    struct FakeSource {
        open_handles: Arc<AtomicUsize>,
        fail_open: bool,
        fail_grab: bool,
    }

    struct FakeCamera {
        open_handles: Arc<AtomicUsize>,
        fail_grab: bool,
    }

    impl FrameSource for FakeSource {
        type Camera = FakeCamera;
        fn open(&mut self) -> Result<FakeCamera, String> {
            if self.fail_open {
                return Err("permission denied".into());
            }
            self.open_handles.fetch_add(1, Ordering::SeqCst);
            Ok(FakeCamera {
                open_handles: self.open_handles.clone(),
                fail_grab: self.fail_grab,
            })
        }
    }

    impl ActiveCamera for FakeCamera {
        fn grab_jpeg(&mut self) -> Result<Vec<u8>, String> {
            if self.fail_grab {
                return Err("device unplugged".into());
            }
            Ok(vec![0xFF, 0xD8, 0x00])
        }
    }

    impl Drop for FakeCamera {
        fn drop(&mut self) {
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Scripted analyzer: pops one result per extract call.
    struct FakeAnalyzer {
        fail_prepare: bool,
        results: Vec<Option<Vec<f32>>>,
    }

    impl FaceAnalyzer for FakeAnalyzer {
        async fn prepare(&mut self) -> Result<(), String> {
            if self.fail_prepare {
                Err("model fetch timed out".into())
            } else {
                Ok(())
            }
        }

        async fn extract(&mut self, _jpeg: &[u8]) -> Result<Option<Descriptor>, String> {
            match self.results.pop() {
                Some(Some(values)) => Ok(Some(Descriptor::from_raw(values))),
                Some(None) => Ok(None),
                None => Err("no scripted result".into()),
            }
        }
    }

    fn session(
        fail_open: bool,
        fail_prepare: bool,
        results: Vec<Option<Vec<f32>>>,
    ) -> (
        FaceCaptureSession<FakeSource, FakeAnalyzer>,
        Arc<AtomicUsize>,
    ) {
        let handles = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            open_handles: handles.clone(),
            fail_open,
            fail_grab: false,
        };
        let analyzer = FakeAnalyzer {
            fail_prepare,
            results,
        };
        (FaceCaptureSession::new(source, analyzer, 0.6), handles)
    }

    fn enrolled_store(name: &str, value: f32) -> BiometricStore {
        let mut store = BiometricStore::in_memory();
        store
            .enroll(name, vec![value; DESCRIPTOR_DIM], "")
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_empty_store_scan_leads_to_registration() {
        let (mut session, handles) = session(false, false, vec![Some(vec![0.5; DESCRIPTOR_DIM])]);
        let store = BiometricStore::in_memory();
        let now = Instant::now();

        session.request_scan().await.unwrap();
        assert_eq!(session.state(), CaptureState::Scanning);
        assert_eq!(handles.load(Ordering::SeqCst), 1);

        let event = session.capture(&store, now).await.unwrap().unwrap();
        assert!(matches!(event, CaptureEvent::RegistrationNeeded));
        assert_eq!(session.state(), CaptureState::Registering);
        // Camera must already be released while awaiting the name.
        assert_eq!(handles.load(Ordering::SeqCst), 0);

        let (name, probe) = session.submit_name("Nok", now).unwrap();
        assert_eq!(name, "Nok");
        assert_eq!(probe.len(), DESCRIPTOR_DIM);
        assert_eq!(session.state(), CaptureState::Success);
    }

    #[tokio::test]
    async fn test_close_descriptor_logs_in() {
        // distance = sqrt(128 * (0.5-0.51)^2) ≈ 0.113 < 0.6
        let (mut session, handles) = session(false, false, vec![Some(vec![0.51; DESCRIPTOR_DIM])]);
        let store = enrolled_store("Nok", 0.5);
        let now = Instant::now();

        session.request_scan().await.unwrap();
        let event = session.capture(&store, now).await.unwrap().unwrap();
        let CaptureEvent::MatchFound(outcome) = event else {
            panic!("expected a match");
        };
        assert_eq!(outcome.profile_name.as_deref(), Some("Nok"));
        assert!(outcome.distance < 0.6);
        assert_eq!(session.state(), CaptureState::Success);
        assert_eq!(handles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_distant_descriptor_triggers_registration() {
        // distance = sqrt(128 * 0.4^2) ≈ 4.52 > 0.6
        let (mut session, _) = session(false, false, vec![Some(vec![0.9; DESCRIPTOR_DIM])]);
        let store = enrolled_store("Nok", 0.5);

        session.request_scan().await.unwrap();
        let event = session
            .capture(&store, Instant::now())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, CaptureEvent::RegistrationNeeded));
    }

    #[tokio::test]
    async fn test_no_face_returns_to_scanning() {
        let (mut session, handles) = session(false, false, vec![None]);
        let store = BiometricStore::in_memory();

        session.request_scan().await.unwrap();
        let event = session
            .capture(&store, Instant::now())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, CaptureEvent::NoFaceDetected));
        assert_eq!(session.state(), CaptureState::Scanning);
        // Retry keeps the camera open.
        assert_eq!(handles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_model_load_failure_resets_to_idle() {
        let (mut session, handles) = session(false, true, vec![]);
        let err = session.request_scan().await.unwrap_err();
        assert!(matches!(err, CaptureError::ModelLoad(_)));
        assert_eq!(session.state(), CaptureState::Idle);
        assert!(session.last_error().is_some());
        assert_eq!(handles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_camera_denied_resets_to_idle() {
        let (mut session, handles) = session(true, false, vec![]);
        let err = session.request_scan().await.unwrap_err();
        assert!(matches!(err, CaptureError::DeviceAccess(_)));
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(handles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_camera() {
        let (mut session, handles) = session(false, false, vec![]);
        session.request_scan().await.unwrap();
        assert_eq!(handles.load(Ordering::SeqCst), 1);
        session.cancel();
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(handles.load(Ordering::SeqCst), 0);
        // Idempotent.
        session.cancel();
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_force_reset_mid_flight() {
        let (mut session, handles) = session(false, false, vec![None]);
        session.request_scan().await.unwrap();
        session
            .capture(&BiometricStore::in_memory(), Instant::now())
            .await
            .unwrap();
        session.force_reset();
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(handles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_times_out_to_idle() {
        let (mut session, _) = session(false, false, vec![Some(vec![0.5; DESCRIPTOR_DIM])]);
        let store = enrolled_store("Nok", 0.5);
        let now = Instant::now();

        session.request_scan().await.unwrap();
        session.capture(&store, now).await.unwrap();
        assert_eq!(session.state(), CaptureState::Success);

        session.tick(now + Duration::from_millis(500));
        assert_eq!(session.state(), CaptureState::Success);
        session.tick(now + SUCCESS_LINGER);
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_blank_name_stays_registering() {
        let (mut session, _) = session(false, false, vec![Some(vec![0.5; DESCRIPTOR_DIM])]);
        let store = BiometricStore::in_memory();
        let now = Instant::now();

        session.request_scan().await.unwrap();
        session.capture(&store, now).await.unwrap();
        assert!(session.submit_name("   ", now).is_none());
        assert_eq!(session.state(), CaptureState::Registering);
    }
}
