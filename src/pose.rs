// src/pose.rs - Body pose estimation over camera frames
use image::imageops::FilterType;
use image::RgbaImage;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tract_onnx::prelude::*;

use crate::error::{Result, TryOnError};
use crate::video::{Frame, FrameSize};

/// MoveNet's 17 landmarks, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum KeypointName {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointName {
    pub const COUNT: usize = 17;

    pub const ALL: [KeypointName; Self::COUNT] = [
        KeypointName::Nose,
        KeypointName::LeftEye,
        KeypointName::RightEye,
        KeypointName::LeftEar,
        KeypointName::RightEar,
        KeypointName::LeftShoulder,
        KeypointName::RightShoulder,
        KeypointName::LeftElbow,
        KeypointName::RightElbow,
        KeypointName::LeftWrist,
        KeypointName::RightWrist,
        KeypointName::LeftHip,
        KeypointName::RightHip,
        KeypointName::LeftKnee,
        KeypointName::RightKnee,
        KeypointName::LeftAnkle,
        KeypointName::RightAnkle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeypointName::Nose => "nose",
            KeypointName::LeftEye => "left_eye",
            KeypointName::RightEye => "right_eye",
            KeypointName::LeftEar => "left_ear",
            KeypointName::RightEar => "right_ear",
            KeypointName::LeftShoulder => "left_shoulder",
            KeypointName::RightShoulder => "right_shoulder",
            KeypointName::LeftElbow => "left_elbow",
            KeypointName::RightElbow => "right_elbow",
            KeypointName::LeftWrist => "left_wrist",
            KeypointName::RightWrist => "right_wrist",
            KeypointName::LeftHip => "left_hip",
            KeypointName::RightHip => "right_hip",
            KeypointName::LeftKnee => "left_knee",
            KeypointName::RightKnee => "right_knee",
            KeypointName::LeftAnkle => "left_ankle",
            KeypointName::RightAnkle => "right_ankle",
        }
    }
}

static KEYPOINTS_BY_NAME: Lazy<HashMap<&'static str, KeypointName>> =
    Lazy::new(|| KeypointName::ALL.iter().map(|k| (k.as_str(), *k)).collect());

impl FromStr for KeypointName {
    type Err = TryOnError;

    fn from_str(s: &str) -> Result<Self> {
        KEYPOINTS_BY_NAME
            .get(s)
            .copied()
            .ok_or_else(|| TryOnError::FrameFailure(format!("unknown keypoint `{}`", s)))
    }
}

/// A named landmark in image-space pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseKeypoint {
    pub name: KeypointName,
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

impl PoseKeypoint {
    pub fn new(name: KeypointName, x: f32, y: f32, score: f32) -> Self {
        Self { name, x, y, score }
    }

    pub fn is_confident(&self, threshold: f32) -> bool {
        self.score >= threshold
    }
}

/// One detected person.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub keypoints: Vec<PoseKeypoint>,
    pub frame_size: FrameSize,
}

impl Pose {
    pub fn new(keypoints: Vec<PoseKeypoint>, frame_size: FrameSize) -> Self {
        Self {
            keypoints,
            frame_size,
        }
    }

    pub fn get(&self, name: KeypointName) -> Option<&PoseKeypoint> {
        self.keypoints.iter().find(|k| k.name == name)
    }

    /// The keypoint, only if its score clears `threshold`.
    pub fn confident(&self, name: KeypointName, threshold: f32) -> Option<&PoseKeypoint> {
        self.get(name).filter(|k| k.is_confident(threshold))
    }

    pub fn average_score(&self) -> f32 {
        if self.keypoints.is_empty() {
            return 0.0;
        }
        self.keypoints.iter().map(|k| k.score).sum::<f32>() / self.keypoints.len() as f32
    }

    /// Reflects every keypoint across the vertical center line. Labels are kept.
    pub fn mirrored(mut self) -> Self {
        let width = self.frame_size.width as f32;
        for k in &mut self.keypoints {
            k.x = width - k.x;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Fully optimized execution plan with vectorized kernels.
    Accelerated,
    /// Unoptimized reference plan. Slower, but runs any model tract can parse.
    Cpu,
}

pub trait PoseEstimator: Send {
    /// Finds at most one person. No person is `Ok(None)`.
    ///
    /// Sides are labeled as the frame shows them, so callers holding a mirrored frame go
    /// through [`MirroredEstimator`].
    fn estimate(&mut self, frame: &Frame) -> Result<Option<Pose>>;

    fn backend(&self) -> BackendKind;

    /// Releases the model. Further estimates fail.
    fn dispose(&mut self);
}

/// Builds an estimator for a preferred backend. Runs on the blocking pool, hence `Send`.
pub trait EstimatorLoader: Send {
    fn load(&self, backend: BackendKind) -> Result<Box<dyn PoseEstimator>, String>;
}

/// Tries the preferred backend, silently falling back to the CPU one.
pub fn load_with_fallback(
    loader: &dyn EstimatorLoader,
    preferred: BackendKind,
) -> Result<Box<dyn PoseEstimator>> {
    if preferred == BackendKind::Cpu {
        return loader
            .load(BackendKind::Cpu)
            .map_err(|cpu| TryOnError::BackendInitFailure {
                accelerated: "not requested".into(),
                cpu,
            });
    }

    match loader.load(BackendKind::Accelerated) {
        Ok(estimator) => {
            info!("pose estimator running on accelerated backend");
            Ok(estimator)
        }
        Err(accelerated) => {
            debug!("accelerated backend unavailable ({}), falling back to cpu", accelerated);
            match loader.load(BackendKind::Cpu) {
                Ok(estimator) => {
                    info!("pose estimator running on cpu backend");
                    Ok(estimator)
                }
                Err(cpu) => Err(TryOnError::BackendInitFailure { accelerated, cpu }),
            }
        }
    }
}

/// Feeds the estimator unmirrored pixels and maps its answer back to display space.
///
/// The model labels sides assuming it sees the person as a camera would. A mirrored selfie
/// view would swap them, so inference runs on the natural frame and only the coordinates are
/// reflected back. `left_shoulder` therefore always names the user's own left shoulder.
pub struct MirroredEstimator {
    inner: Box<dyn PoseEstimator>,
}

impl MirroredEstimator {
    pub fn new(inner: Box<dyn PoseEstimator>) -> Self {
        Self { inner }
    }

    pub fn estimate(&mut self, frame: &Frame) -> Result<Option<Pose>> {
        if !frame.mirrored {
            return self.inner.estimate(frame);
        }
        let natural = Frame {
            image: frame.natural(),
            mirrored: false,
            captured_at: frame.captured_at,
        };
        Ok(self.inner.estimate(&natural)?.map(Pose::mirrored))
    }

    pub fn backend(&self) -> BackendKind {
        self.inner.backend()
    }

    pub fn dispose(&mut self) {
        self.inner.dispose();
    }
}

/// Minimum-interval gate decoupling detection from the render cadence.
#[derive(Debug, Clone)]
pub struct DetectionGate {
    interval: Duration,
    last: Option<Instant>,
}

impl DetectionGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns true, and arms the gate, when a detection is due at `now`.
    pub fn should_detect(&mut self, now: Instant) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last = Some(now);
        }
        due
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const MOVENET_INPUT_SIZE: u32 = 192;

/// MoveNet single-pose, run with tract.
pub struct MoveNetEstimator {
    plan: Option<Plan>,
    backend: BackendKind,
    min_pose_score: f32,
}

impl MoveNetEstimator {
    pub fn load(model_path: &Path, backend: BackendKind) -> std::result::Result<Self, String> {
        if !model_path.exists() {
            return Err(format!("model file {} does not exist", model_path.display()));
        }

        let build = || -> TractResult<Plan> {
            let size = MOVENET_INPUT_SIZE as usize;
            let model = tract_onnx::onnx()
                .model_for_path(model_path)?
                .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, size, size, 3)))?;
            match backend {
                BackendKind::Accelerated => model.into_optimized()?.into_runnable(),
                BackendKind::Cpu => model.into_typed()?.into_decluttered()?.into_runnable(),
            }
        };

        let plan = build().map_err(|e| format!("{:?} backend: {}", backend, e))?;
        Ok(Self {
            plan: Some(plan),
            backend,
            min_pose_score: 0.15,
        })
    }

    fn preprocess(frame: &RgbaImage) -> Tensor {
        let size = MOVENET_INPUT_SIZE;
        let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);
        tract_ndarray::Array4::from_shape_fn(
            (1, size as usize, size as usize, 3),
            |(_, y, x, c)| resized.get_pixel(x as u32, y as u32)[c] as f32,
        )
        .into()
    }
}

impl PoseEstimator for MoveNetEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<Pose>> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| TryOnError::FrameFailure("pose estimator was disposed".into()))?;

        let size = frame.size();
        if !size.is_valid() {
            return Ok(None);
        }

        let input = Self::preprocess(&frame.image);
        let outputs = plan
            .run(tvec!(input.into()))
            .map_err(|e| TryOnError::FrameFailure(format!("inference failed: {}", e)))?;

        // [1, 1, 17, 3] rows of (y, x, score), normalized.
        let output = outputs
            .first()
            .ok_or_else(|| TryOnError::FrameFailure("model produced no output".into()))?;
        let data = output
            .as_slice::<f32>()
            .map_err(|e| TryOnError::FrameFailure(format!("unexpected output tensor: {}", e)))?;
        if data.len() < KeypointName::COUNT * 3 {
            return Err(TryOnError::FrameFailure(format!(
                "expected {} output values, got {}",
                KeypointName::COUNT * 3,
                data.len()
            )));
        }

        let keypoints: Vec<PoseKeypoint> = KeypointName::ALL
            .iter()
            .map(|&name| {
                let row = &data[name.index() * 3..name.index() * 3 + 3];
                PoseKeypoint::new(
                    name,
                    row[1] * size.width as f32,
                    row[0] * size.height as f32,
                    row[2],
                )
            })
            .collect();

        let pose = Pose::new(keypoints, size);
        if pose.average_score() < self.min_pose_score {
            return Ok(None);
        }
        Ok(Some(pose))
    }

    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn dispose(&mut self) {
        if self.plan.take().is_some() {
            info!("pose estimator disposed");
        }
    }
}

/// Loads MoveNet from an ONNX file.
#[derive(Debug, Clone)]
pub struct MoveNetLoader {
    pub model_path: PathBuf,
}

impl EstimatorLoader for MoveNetLoader {
    fn load(&self, backend: BackendKind) -> Result<Box<dyn PoseEstimator>, String> {
        let started = Instant::now();
        let estimator = MoveNetEstimator::load(&self.model_path, backend)?;
        debug!(
            "loaded {} on {:?} backend in {:?}",
            self.model_path.display(),
            backend,
            started.elapsed()
        );
        Ok(Box::new(estimator))
    }
}

impl Drop for MoveNetEstimator {
    fn drop(&mut self) {
        if self.plan.is_some() {
            warn!("pose estimator dropped without dispose");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct FixedEstimator {
        pose: Pose,
        seen_first_pixel: Arc<Mutex<Option<[u8; 4]>>>,
    }

    impl PoseEstimator for FixedEstimator {
        fn estimate(&mut self, frame: &Frame) -> Result<Option<Pose>> {
            assert!(!frame.mirrored);
            *self.seen_first_pixel.lock().unwrap() = Some(frame.image.get_pixel(0, 0).0);
            Ok(Some(self.pose.clone()))
        }

        fn backend(&self) -> BackendKind {
            BackendKind::Cpu
        }

        fn dispose(&mut self) {}
    }

    struct FlakyLoader {
        accelerated_ok: bool,
        cpu_ok: bool,
    }

    impl EstimatorLoader for FlakyLoader {
        fn load(&self, backend: BackendKind) -> Result<Box<dyn PoseEstimator>, String> {
            let ok = match backend {
                BackendKind::Accelerated => self.accelerated_ok,
                BackendKind::Cpu => self.cpu_ok,
            };
            if !ok {
                return Err(format!("{:?} unavailable", backend));
            }
            Ok(Box::new(NullEstimator(backend)))
        }
    }

    struct NullEstimator(BackendKind);

    impl PoseEstimator for NullEstimator {
        fn estimate(&mut self, _frame: &Frame) -> Result<Option<Pose>> {
            Ok(None)
        }

        fn backend(&self) -> BackendKind {
            self.0
        }

        fn dispose(&mut self) {}
    }

    #[test]
    fn keypoint_names_round_trip() {
        for name in KeypointName::ALL {
            assert_eq!(name.as_str().parse::<KeypointName>().unwrap(), name);
            assert_eq!(KeypointName::from_index(name.index()), Some(name));
        }
        assert!("left_toe".parse::<KeypointName>().is_err());
        assert_eq!(KeypointName::from_index(17), None);
    }

    #[test]
    fn mirrored_estimator_keeps_labels_and_reflects_x() {
        let size = FrameSize::new(100, 50);
        let pose = Pose::new(
            vec![PoseKeypoint::new(KeypointName::LeftShoulder, 70.0, 20.0, 0.9)],
            size,
        );
        let seen = Arc::new(Mutex::new(None));
        let mut estimator = MirroredEstimator::new(Box::new(FixedEstimator {
            pose,
            seen_first_pixel: seen.clone(),
        }));

        let mut img = RgbaImage::new(100, 50);
        img.put_pixel(99, 0, image::Rgba([1, 2, 3, 255]));
        let frame = Frame::new(img, true);

        let result = estimator.estimate(&frame).unwrap().unwrap();
        let shoulder = result.get(KeypointName::LeftShoulder).unwrap();
        assert_eq!(shoulder.x, 30.0);
        assert_eq!(shoulder.y, 20.0);
        // The model saw the unmirrored frame.
        assert_eq!(*seen.lock().unwrap(), Some([1, 2, 3, 255]));
    }

    #[test]
    fn fallback_to_cpu_is_silent() {
        let loader = FlakyLoader {
            accelerated_ok: false,
            cpu_ok: true,
        };
        let estimator = load_with_fallback(&loader, BackendKind::Accelerated).unwrap();
        assert_eq!(estimator.backend(), BackendKind::Cpu);
    }

    #[test]
    fn both_backends_failing_is_backend_init_failure() {
        let loader = FlakyLoader {
            accelerated_ok: false,
            cpu_ok: false,
        };
        let err = load_with_fallback(&loader, BackendKind::Accelerated)
            .err()
            .unwrap();
        match err {
            TryOnError::BackendInitFailure { accelerated, cpu } => {
                assert!(accelerated.contains("Accelerated"));
                assert!(cpu.contains("Cpu"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn detection_gate_throttles() {
        let start = Instant::now();
        let mut gate = DetectionGate::new(Duration::from_millis(100));
        assert!(gate.should_detect(start));
        assert!(!gate.should_detect(start + Duration::from_millis(16)));
        assert!(!gate.should_detect(start + Duration::from_millis(99)));
        assert!(gate.should_detect(start + Duration::from_millis(100)));
        assert!(!gate.should_detect(start + Duration::from_millis(150)));
        gate.reset();
        assert!(gate.should_detect(start + Duration::from_millis(151)));
    }

    #[test]
    fn missing_model_file_fails_to_load() {
        let loader = MoveNetLoader {
            model_path: PathBuf::from("does/not/exist.onnx"),
        };
        assert!(loader.load(BackendKind::Accelerated).is_err());
        assert!(matches!(
            load_with_fallback(&loader, BackendKind::Accelerated),
            Err(TryOnError::BackendInitFailure { .. })
        ));
    }
}
