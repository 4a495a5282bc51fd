// src/session.rs - Try-on session: startup sequence, per-frame loop and teardown
use image::RgbaImage;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::capture;
use crate::config::TryOnConfig;
use crate::error::{Result, TryOnError};
use crate::fit::{FitTransformEngine, GarmentTransform};
use crate::garment::{ClothingCategory, GarmentRecord};
use crate::measurement::{BodyMeasurements, MeasurementExtractor};
use crate::model::{GarmentModel, ModelLoader};
use crate::pose::{
    load_with_fallback, BackendKind, DetectionGate, EstimatorLoader, MirroredEstimator,
    MoveNetLoader,
};
use crate::render::{composite, OverlayRenderer, SoftwareRenderer};
use crate::tracking::{PerformanceMetrics, StabilityTracker};
use crate::video::{
    wait_for_metadata, CameraConstraints, CameraDevice, CameraProvider, Frame, FrameSize,
    NokhwaCameraProvider,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Initializing,
    CameraGranted,
    /// Camera, garment and pose backend are all ready; the loop has not started.
    ModelLoaded,
    Tracking,
    Error,
    Terminated,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Error, _) => false,
            (_, Error) => true,
            (Initializing, CameraGranted)
            | (CameraGranted, ModelLoaded)
            | (ModelLoaded, Tracking) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Error | SessionState::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::CameraGranted => "camera granted",
            SessionState::ModelLoaded => "ready",
            SessionState::Tracking => "tracking",
            SessionState::Error => "error",
            SessionState::Terminated => "terminated",
        }
    }
}

pub type ReadyCallback = Box<dyn FnMut(bool, Option<&str>)>;

/// Point-in-time readout for the host UI.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub id: Uuid,
    pub state: SessionState,
    pub ready: bool,
    pub stability: f32,
    pub confidence: f32,
    pub fps: f32,
    pub backend: Option<BackendKind>,
    pub garment: String,
    pub category: ClothingCategory,
    pub consecutive_failures: u32,
    pub detections: u64,
    pub error: Option<String>,
}

pub struct TryOnSession {
    id: Uuid,
    config: TryOnConfig,
    garment: GarmentRecord,
    state: SessionState,

    provider: Box<dyn CameraProvider>,
    estimator_loader: Option<Box<dyn EstimatorLoader>>,
    model_loader: ModelLoader,

    camera: Option<Box<dyn CameraDevice>>,
    estimator: Option<MirroredEstimator>,
    renderer: Box<dyn OverlayRenderer>,
    model: Option<GarmentModel>,

    extractor: MeasurementExtractor,
    tracker: StabilityTracker,
    fit: FitTransformEngine,
    gate: DetectionGate,
    metrics: PerformanceMetrics,

    frame_size: Option<FrameSize>,
    viewport: Option<(u32, u32)>,
    last_frame: Option<Frame>,
    view: Option<RgbaImage>,
    last_measurement: Option<BodyMeasurements>,
    stability: f32,

    running: bool,
    ready: Option<bool>,
    on_ready: Option<ReadyCallback>,
    error: Option<TryOnError>,
    consecutive_failures: u32,
    detections: u64,
}

impl TryOnSession {
    pub fn new(
        config: TryOnConfig,
        garment: GarmentRecord,
        provider: Box<dyn CameraProvider>,
        estimator_loader: Box<dyn EstimatorLoader>,
        renderer: Box<dyn OverlayRenderer>,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, device = ?config.device_class, "creating try-on session");
        Self {
            id,
            extractor: MeasurementExtractor::new(config.measurement.min_keypoint_confidence),
            tracker: StabilityTracker::new(&config.stability),
            fit: FitTransformEngine::new(
                garment.category,
                &config.fit,
                config.render.canonical_size,
            ),
            gate: DetectionGate::new(config.detection_interval()),
            model_loader: ModelLoader::new(config.render.canonical_size),
            metrics: PerformanceMetrics::new(),
            state: SessionState::Initializing,
            provider,
            estimator_loader: Some(estimator_loader),
            camera: None,
            estimator: None,
            renderer,
            model: None,
            frame_size: None,
            viewport: None,
            last_frame: None,
            view: None,
            last_measurement: None,
            stability: 0.0,
            running: false,
            ready: None,
            on_ready: None,
            error: None,
            consecutive_failures: 0,
            detections: 0,
            config,
            garment,
        }
    }

    /// Session wired to the system camera, MoveNet and the software renderer.
    pub fn native(config: TryOnConfig, garment: GarmentRecord) -> Self {
        let loader = MoveNetLoader {
            model_path: config.detection.model_path.clone(),
        };
        let renderer = SoftwareRenderer::new(&config.render);
        Self::new(
            config,
            garment,
            Box::new(NokhwaCameraProvider),
            Box::new(loader),
            Box::new(renderer),
        )
    }

    /// Called with `(ready, error)` whenever readiness changes.
    pub fn on_ready_change(&mut self, callback: impl FnMut(bool, Option<&str>) + 'static) {
        self.on_ready = Some(Box::new(callback));
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn garment(&self) -> &GarmentRecord {
        &self.garment
    }

    /// Camera frame dimensions, once the stream reported them.
    pub fn frame_size(&self) -> Option<FrameSize> {
        self.frame_size
    }

    pub fn model(&self) -> Option<&GarmentModel> {
        self.model.as_ref()
    }

    pub fn transform(&self) -> &GarmentTransform {
        self.fit.current()
    }

    pub fn stability(&self) -> f32 {
        self.stability
    }

    /// Confidence of the latest measurement; 0 while nobody is tracked.
    pub fn confidence(&self) -> f32 {
        self.last_measurement
            .as_ref()
            .map(|m| m.confidence)
            .unwrap_or(0.0)
    }

    pub fn last_measurement(&self) -> Option<&BodyMeasurements> {
        self.last_measurement.as_ref()
    }

    /// The latest composited frame.
    pub fn view(&self) -> Option<&RgbaImage> {
        self.view.as_ref()
    }

    pub fn error(&self) -> Option<&TryOnError> {
        self.error.as_ref()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            id: self.id,
            state: self.state,
            ready: self.ready.unwrap_or(false),
            stability: self.stability,
            confidence: self.confidence(),
            fps: self.metrics.avg_fps,
            backend: self.estimator.as_ref().map(MirroredEstimator::backend),
            garment: self.garment.display_name().to_string(),
            category: self.garment.category,
            consecutive_failures: self.consecutive_failures,
            detections: self.detections,
            error: self.error_message(),
        }
    }

    /// Opens the camera, then loads the garment and the pose backend concurrently, then
    /// starts tracking. Any failure leaves the session in `Error`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Initializing {
            return Err(TryOnError::InvalidTransition {
                from: self.state,
                to: SessionState::CameraGranted,
            });
        }
        info!(session = %self.id, garment = %self.garment.display_name(), category = %self.garment.category, "starting try-on");

        match self.run_startup().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn run_startup(&mut self) -> Result<()> {
        let constraints = CameraConstraints::from_config(&self.config.capture);
        let mut camera = self.provider.open(&constraints)?;
        let metadata = wait_for_metadata(camera.as_mut(), self.config.metadata_timeout()).await;
        // Owned from here on so teardown stops it whatever happens next.
        self.camera = Some(camera);
        let size = metadata?;
        self.frame_size = Some(size);
        self.transition(SessionState::CameraGranted)?;

        let loader = self.estimator_loader.take().ok_or_else(|| TryOnError::BackendInitFailure {
            accelerated: "estimator loader already consumed".into(),
            cpu: "estimator loader already consumed".into(),
        })?;
        let preferred = self.config.detection.preferred_backend;
        let model_loader = self.model_loader.clone();
        let url = self.garment.model_asset_url.clone();

        let (model, estimator) = tokio::join!(model_loader.load(&url), async move {
            tokio::task::spawn_blocking(move || load_with_fallback(loader.as_ref(), preferred))
                .await
                .map_err(|e| TryOnError::BackendInitFailure {
                    accelerated: e.to_string(),
                    cpu: e.to_string(),
                })?
        });

        let (model, estimator) = match (model, estimator) {
            (Ok(model), Ok(estimator)) => (model, estimator),
            (Err(e), Ok(mut estimator)) => {
                estimator.dispose();
                return Err(e);
            }
            (_, Err(e)) => return Err(e),
        };

        self.estimator = Some(MirroredEstimator::new(estimator));
        self.renderer.upload(&model)?;
        self.model = Some(model);

        let (width, height) = self.viewport.unwrap_or((size.width, size.height));
        self.apply_viewport(width, height);
        self.transition(SessionState::ModelLoaded)?;

        self.transition(SessionState::Tracking)?;
        self.running = true;
        self.set_ready(true, None);
        Ok(())
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TryOnError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!(session = %self.id, "state {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn set_ready(&mut self, ready: bool, message: Option<&str>) {
        if self.ready == Some(ready) {
            return;
        }
        self.ready = Some(ready);
        if let Some(callback) = self.on_ready.as_mut() {
            callback(ready, message);
        }
    }

    fn fail(&mut self, err: TryOnError) {
        if self.state.is_terminal() {
            return;
        }
        error!(session = %self.id, "try-on failed: {}", err);
        self.release();
        self.state = SessionState::Error;
        let message = err.to_string();
        self.error = Some(err);
        self.set_ready(false, Some(&message));
    }

    /// One animation tick at the current time.
    pub fn tick(&mut self) -> Result<bool> {
        self.tick_at(Instant::now())
    }

    /// Reads a frame, detects when the gate allows it, and redraws the view. Returns whether a
    /// new view was produced. Per-frame failures are absorbed until they repeat too often.
    pub fn tick_at(&mut self, now: Instant) -> Result<bool> {
        if !self.running || self.state != SessionState::Tracking {
            return Ok(false);
        }
        self.metrics.record_tick(now);

        match self.process_frame(now) {
            Ok(drawn) => {
                self.consecutive_failures = 0;
                Ok(drawn)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    session = %self.id,
                    failures = self.consecutive_failures,
                    "frame failed: {}",
                    e
                );
                let limit = self.config.session.max_consecutive_failures;
                if limit > 0 && self.consecutive_failures >= limit {
                    let err = TryOnError::TrackingFailure {
                        frames: self.consecutive_failures,
                        last: e.to_string(),
                    };
                    self.fail(err.clone());
                    return Err(err);
                }
                Ok(false)
            }
        }
    }

    fn process_frame(&mut self, now: Instant) -> Result<bool> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| TryOnError::FrameFailure("no camera".into()))?;
        let frame = camera.read_frame()?;
        let size = frame.size();
        if !size.is_valid() {
            trace!("skipping zero-sized frame");
            return Ok(false);
        }
        if self.frame_size != Some(size) {
            debug!("camera frame size is now {}x{}", size.width, size.height);
            self.frame_size = Some(size);
        }

        if self.gate.should_detect(now) {
            self.detect(&frame, size)?;
        }

        let overlay = self.renderer.render(self.fit.current())?;
        self.view = Some(composite(&frame.image, overlay));
        self.last_frame = Some(frame);
        Ok(true)
    }

    fn detect(&mut self, frame: &Frame, size: FrameSize) -> Result<()> {
        let estimator = self
            .estimator
            .as_mut()
            .ok_or_else(|| TryOnError::FrameFailure("no pose estimator".into()))?;

        let started = Instant::now();
        let pose = estimator.estimate(frame)?;
        trace!("pose estimation took {:?}", started.elapsed());
        self.detections += 1;

        let measurement = pose
            .as_ref()
            .and_then(|p| self.extractor.extract(p, self.garment.category));

        match &measurement {
            Some(m) => {
                self.tracker.push(m);
                self.stability = self.tracker.stability();
                let rate = self.tracker.blend_rate(self.stability);
                self.fit.update(Some(m), size, rate);
                self.metrics.record_confidence(m.confidence);
            }
            None => {
                // Tracking gap: the garment holds its last placement.
                self.metrics.record_confidence(0.0);
            }
        }
        self.last_measurement = measurement;
        Ok(())
    }

    /// Resizes the view surface. Zero dimensions are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.viewport = Some((width, height));
        if !self.renderer.is_disposed() {
            self.apply_viewport(width, height);
        }
    }

    fn apply_viewport(&mut self, width: u32, height: u32) {
        self.renderer.resize(width, height);
        self.fit.set_scene_aspect(width as f32 / height as f32);
    }

    /// Swaps the garment without restarting the camera. On failure the current garment stays.
    pub async fn switch_garment(&mut self, garment: GarmentRecord) -> Result<()> {
        if !matches!(self.state, SessionState::Tracking | SessionState::ModelLoaded) {
            return Err(TryOnError::InvalidTransition {
                from: self.state,
                to: self.state,
            });
        }

        let model = self.model_loader.load(&garment.model_asset_url).await?;
        self.renderer.upload(&model)?;
        info!(session = %self.id, "switched garment to {} ({})", garment.display_name(), garment.category);

        self.model = Some(model);
        self.fit.set_category(garment.category);
        self.fit.reset();
        self.tracker.reset();
        self.gate.reset();
        self.stability = 0.0;
        self.last_measurement = None;
        self.garment = garment;
        Ok(())
    }

    /// Composites the latest frame with the garment in the camera's natural orientation.
    pub fn snapshot(&mut self) -> Result<RgbaImage> {
        if self.state != SessionState::Tracking {
            return Err(TryOnError::Export("session is not tracking".into()));
        }
        let frame = self
            .last_frame
            .as_ref()
            .ok_or_else(|| TryOnError::Export("no frame captured yet".into()))?;
        let overlay = self.renderer.render(self.fit.current())?;
        Ok(capture::compose_snapshot(frame, overlay))
    }

    /// Stops the session and releases everything it holds. Safe to call repeatedly.
    pub fn terminate(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.release();
        info!(session = %self.id, "state {:?} -> Terminated", self.state);
        self.state = SessionState::Terminated;
        // Only a session that has reported readiness gets told it is gone.
        if self.ready.is_some() {
            self.set_ready(false, None);
        }
    }

    /// Ordered teardown: loop, camera, renderer, estimator.
    fn release(&mut self) {
        self.running = false;
        if let Some(mut camera) = self.camera.take() {
            camera.stop();
        }
        self.renderer.dispose();
        if let Some(mut estimator) = self.estimator.take() {
            estimator.dispose();
        }
        self.model = None;
        self.last_frame = None;
    }
}

impl Drop for TryOnSession {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn happy_path_transitions() {
        assert!(Initializing.can_transition_to(CameraGranted));
        assert!(CameraGranted.can_transition_to(ModelLoaded));
        assert!(ModelLoaded.can_transition_to(Tracking));
        assert!(Tracking.can_transition_to(Terminated));
    }

    #[test]
    fn skipping_steps_is_rejected() {
        assert!(!Initializing.can_transition_to(Tracking));
        assert!(!Initializing.can_transition_to(ModelLoaded));
        assert!(!Tracking.can_transition_to(Initializing));
        assert!(!CameraGranted.can_transition_to(Tracking));
    }

    #[test]
    fn error_and_terminated() {
        for state in [Initializing, CameraGranted, ModelLoaded, Tracking] {
            assert!(state.can_transition_to(Error));
            assert!(state.can_transition_to(Terminated));
        }
        assert!(Error.can_transition_to(Terminated));
        assert!(!Error.can_transition_to(Tracking));
        assert!(!Error.can_transition_to(Error));
        assert!(!Terminated.can_transition_to(Terminated));
        assert!(!Terminated.can_transition_to(Error));
    }
}
