#![allow(dead_code)]

use fitting_room::config::RenderConfig;
use fitting_room::fit::GarmentTransform;
use fitting_room::model::GarmentModel;
use fitting_room::pose::{BackendKind, EstimatorLoader, KeypointName, Pose, PoseEstimator, PoseKeypoint};
use fitting_room::render::{OverlayRenderer, SoftwareRenderer};
use fitting_room::video::{CameraConstraints, CameraDevice, CameraProvider, Frame, FrameSize};
use fitting_room::{ClothingCategory, GarmentRecord, Result, TryOnConfig, TryOnError, TryOnSession};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const FRAME: FrameSize = FrameSize {
    width: 320,
    height: 240,
};

/// Shared record of what the fakes were asked to do, in call order.
pub type EventLog = Arc<Mutex<Vec<&'static str>>>;

#[derive(Clone, Default)]
pub struct Harness {
    pub events: EventLog,
    pub active_tracks: Arc<AtomicUsize>,
    pub fail_reads: Arc<AtomicBool>,
    pub render_calls: Arc<AtomicUsize>,
    pub pose: Arc<Mutex<Option<Pose>>>,
    pub deny_camera: bool,
    pub fail_estimator: bool,
}

impl Harness {
    pub fn new() -> Self {
        let harness = Self::default();
        harness.set_pose(Some(standing_pose()));
        harness
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn set_pose(&self, pose: Option<Pose>) {
        *self.pose.lock().unwrap() = pose;
    }

    pub fn session(&self, config: TryOnConfig, garment: GarmentRecord) -> TryOnSession {
        let renderer = CountingRenderer {
            inner: SoftwareRenderer::new(&RenderConfig {
                viewport_width: FRAME.width,
                viewport_height: FRAME.height,
                ..config.render.clone()
            }),
            harness: self.clone(),
        };
        TryOnSession::new(
            config,
            garment,
            Box::new(ScriptedProvider {
                harness: self.clone(),
            }),
            Box::new(ScriptedLoader {
                harness: self.clone(),
            }),
            Box::new(renderer),
        )
    }

    fn log(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct ScriptedProvider {
    harness: Harness,
}

impl CameraProvider for ScriptedProvider {
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn CameraDevice>> {
        if self.harness.deny_camera {
            return Err(TryOnError::PermissionDenied("user dismissed the prompt".into()));
        }
        self.harness.active_tracks.store(1, Ordering::SeqCst);
        self.harness.log("camera.open");
        Ok(Box::new(ScriptedCamera {
            harness: self.harness.clone(),
            mirrored: constraints.mirrored(),
        }))
    }
}

pub struct ScriptedCamera {
    harness: Harness,
    mirrored: bool,
}

impl CameraDevice for ScriptedCamera {
    fn frame_size(&self) -> Option<FrameSize> {
        (self.active_tracks() > 0).then_some(FRAME)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.harness.fail_reads.load(Ordering::SeqCst) {
            return Err(TryOnError::FrameFailure("sensor glitch".into()));
        }
        let image = RgbaImage::from_pixel(FRAME.width, FRAME.height, Rgba([90, 90, 90, 255]));
        Ok(Frame::new(image, self.mirrored))
    }

    fn active_tracks(&self) -> usize {
        self.harness.active_tracks.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        if self.harness.active_tracks.swap(0, Ordering::SeqCst) > 0 {
            self.harness.log("camera.stop");
        }
    }
}

pub struct ScriptedLoader {
    harness: Harness,
}

impl EstimatorLoader for ScriptedLoader {
    fn load(&self, backend: BackendKind) -> std::result::Result<Box<dyn PoseEstimator>, String> {
        if self.harness.fail_estimator {
            return Err(format!("{:?} backend unavailable", backend));
        }
        Ok(Box::new(ScriptedEstimator {
            harness: self.harness.clone(),
            backend,
        }))
    }
}

pub struct ScriptedEstimator {
    harness: Harness,
    backend: BackendKind,
}

impl PoseEstimator for ScriptedEstimator {
    fn estimate(&mut self, _frame: &Frame) -> Result<Option<Pose>> {
        Ok(self.harness.pose.lock().unwrap().clone())
    }

    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn dispose(&mut self) {
        self.harness.log("estimator.dispose");
    }
}

pub struct CountingRenderer {
    inner: SoftwareRenderer,
    harness: Harness,
}

impl OverlayRenderer for CountingRenderer {
    fn resize(&mut self, width: u32, height: u32) {
        self.inner.resize(width, height);
    }

    fn upload(&mut self, model: &GarmentModel) -> Result<()> {
        self.inner.upload(model)
    }

    fn render(&mut self, transform: &GarmentTransform) -> Result<&RgbaImage> {
        self.harness.render_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.render(transform)
    }

    fn dispose(&mut self) {
        if !self.inner.is_disposed() {
            self.harness.log("renderer.dispose");
        }
        self.inner.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

/// Upright person facing the camera, every keypoint confident.
pub fn standing_pose() -> Pose {
    use KeypointName::*;
    let points = [
        (Nose, 160.0, 40.0),
        (LeftEye, 165.0, 35.0),
        (RightEye, 155.0, 35.0),
        (LeftEar, 172.0, 38.0),
        (RightEar, 148.0, 38.0),
        (LeftShoulder, 190.0, 70.0),
        (RightShoulder, 130.0, 70.0),
        (LeftElbow, 200.0, 110.0),
        (RightElbow, 120.0, 110.0),
        (LeftWrist, 205.0, 145.0),
        (RightWrist, 115.0, 145.0),
        (LeftHip, 180.0, 150.0),
        (RightHip, 140.0, 150.0),
        (LeftKnee, 180.0, 190.0),
        (RightKnee, 140.0, 190.0),
        (LeftAnkle, 180.0, 230.0),
        (RightAnkle, 140.0, 230.0),
    ];
    let keypoints = points
        .into_iter()
        .map(|(name, x, y)| PoseKeypoint::new(name, x, y, 0.9))
        .collect();
    Pose::new(keypoints, FRAME)
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}_{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes a single-triangle glTF with an external buffer and returns the .gltf path.
pub fn write_triangle_asset(dir: &Path, name: &str, height: f32) -> PathBuf {
    let mut bin = Vec::new();
    for v in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.5, height, 0.0] {
        bin.extend_from_slice(&v.to_le_bytes());
    }
    for i in [0u16, 1, 2] {
        bin.extend_from_slice(&i.to_le_bytes());
    }
    bin.extend_from_slice(&[0, 0]);
    let bin_name = format!("{}.bin", name);
    std::fs::write(dir.join(&bin_name), &bin).unwrap();

    let gltf = serde_json::json!({
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }],
        "buffers": [{ "uri": bin_name, "byteLength": bin.len() }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
        ],
        "accessors": [
            {
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0.0, 0.0, 0.0], "max": [1.0, height, 0.0]
            },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
        ]
    });
    let path = dir.join(format!("{}.gltf", name));
    std::fs::write(&path, serde_json::to_vec_pretty(&gltf).unwrap()).unwrap();
    path
}

pub fn garment(path: &Path, category: ClothingCategory) -> GarmentRecord {
    GarmentRecord::new(path.to_string_lossy(), category)
}
