// src/video.rs - Camera capture source
use image::{ImageBuffer, RgbaImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{Camera, NokhwaError};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, TryOnError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero-sized frames mean the stream metadata isn't known yet.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// One camera frame, as presented to the user (mirrored for front cameras).
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub mirrored: bool,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage, mirrored: bool) -> Self {
        Self {
            image,
            mirrored,
            captured_at: Instant::now(),
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.image.width(), self.image.height())
    }

    /// The frame in the camera's natural (unmirrored) orientation.
    pub fn natural(&self) -> RgbaImage {
        if self.mirrored {
            image::imageops::flip_horizontal(&self.image)
        } else {
            self.image.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraConstraints {
    pub device_index: u32,
    pub facing: Facing,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub origin: Option<String>,
}

impl CameraConstraints {
    pub fn from_config(config: &crate::config::CaptureConfig) -> Self {
        Self {
            device_index: config.device_index,
            facing: config.facing,
            width: config.width,
            height: config.height,
            fps: config.fps,
            origin: config.origin.clone(),
        }
    }

    /// Front cameras are shown as a mirror.
    pub fn mirrored(&self) -> bool {
        self.facing == Facing::Front
    }
}

/// Camera access is only allowed from HTTPS or loopback origins. `None` means the view is
/// hosted natively rather than embedded in a page.
pub fn check_secure_origin(origin: Option<&str>) -> Result<()> {
    let Some(origin) = origin else {
        return Ok(());
    };

    let lower = origin.trim().to_ascii_lowercase();
    if lower.starts_with("https://") {
        return Ok(());
    }

    if let Some(rest) = lower.strip_prefix("http://") {
        let host = if rest.starts_with('[') {
            rest.split(']').next().map(|h| format!("{}]", h)).unwrap_or_default()
        } else {
            rest.split(|c| c == ':' || c == '/').next().unwrap_or_default().to_string()
        };
        if matches!(host.as_str(), "localhost" | "127.0.0.1" | "[::1]") {
            return Ok(());
        }
    }

    Err(TryOnError::InsecureContext {
        origin: origin.to_string(),
    })
}

/// An opened camera stream owned by a single session.
pub trait CameraDevice {
    /// Frame dimensions, once the stream metadata is known.
    fn frame_size(&self) -> Option<FrameSize>;

    fn read_frame(&mut self) -> Result<Frame>;

    /// Number of tracks still delivering frames. Zero after [`CameraDevice::stop`].
    fn active_tracks(&self) -> usize;

    /// Stops every track. Calling it again is a no-op.
    fn stop(&mut self);
}

pub trait CameraProvider {
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn CameraDevice>>;
}

/// Polls the device until it reports a nonzero frame size.
pub async fn wait_for_metadata(
    device: &mut dyn CameraDevice,
    timeout: Duration,
) -> Result<FrameSize> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(size) = device.frame_size().filter(FrameSize::is_valid) {
            return Ok(size);
        }
        if Instant::now() >= deadline {
            return Err(TryOnError::DeviceUnavailable(
                "camera did not report frame dimensions".into(),
            ));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub struct NokhwaCameraProvider;

impl NokhwaCameraProvider {
    pub fn list_devices() -> Result<Vec<String>> {
        let cameras = nokhwa::query(nokhwa::utils::ApiBackend::Auto)
            .map_err(|e| TryOnError::DeviceUnavailable(format!("failed to query cameras: {}", e)))?;
        Ok(cameras.iter().map(|c| c.human_name()).collect())
    }

    fn request_permission() -> Result<()> {
        if nokhwa::nokhwa_check() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        nokhwa::nokhwa_initialize(move |granted| {
            let _ = tx.send(granted);
        });

        match rx.recv_timeout(Duration::from_secs(60)) {
            Ok(true) => Ok(()),
            Ok(false) => Err(TryOnError::PermissionDenied(
                "the user or system policy refused camera access".into(),
            )),
            Err(_) => Err(TryOnError::PermissionDenied(
                "camera permission request was not answered".into(),
            )),
        }
    }
}

impl CameraProvider for NokhwaCameraProvider {
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn CameraDevice>> {
        check_secure_origin(constraints.origin.as_deref())?;
        Self::request_permission()?;

        debug!(index = constraints.device_index, "opening camera");
        let format = CameraFormat::new(
            Resolution::new(constraints.width, constraints.height),
            FrameFormat::MJPEG,
            constraints.fps,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera = Camera::new(CameraIndex::Index(constraints.device_index), requested)
            .map_err(classify_nokhwa_error)?;
        camera.open_stream().map_err(classify_nokhwa_error)?;

        let resolution = camera.resolution();
        info!(
            "opened camera {} at {}x{} @ {}fps",
            constraints.device_index,
            resolution.width(),
            resolution.height(),
            camera.frame_rate()
        );

        Ok(Box::new(NokhwaCamera {
            camera,
            mirrored: constraints.mirrored(),
            stopped: false,
        }))
    }
}

fn classify_nokhwa_error(error: NokhwaError) -> TryOnError {
    let message = error.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        TryOnError::PermissionDenied(message)
    } else {
        TryOnError::DeviceUnavailable(message)
    }
}

pub struct NokhwaCamera {
    camera: Camera,
    mirrored: bool,
    stopped: bool,
}

impl CameraDevice for NokhwaCamera {
    fn frame_size(&self) -> Option<FrameSize> {
        if self.stopped {
            return None;
        }
        let resolution = self.camera.resolution();
        Some(FrameSize::new(resolution.width(), resolution.height()))
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.stopped {
            return Err(TryOnError::FrameFailure("camera stream is stopped".into()));
        }

        let buffer = self
            .camera
            .frame()
            .map_err(|e| TryOnError::FrameFailure(format!("failed to capture frame: {}", e)))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| TryOnError::FrameFailure(format!("failed to decode frame: {}", e)))?;

        let width = decoded.width();
        let height = decoded.height();
        let rgb_data = decoded.into_raw();

        let mut rgba_data = Vec::with_capacity((width * height * 4) as usize);
        for chunk in rgb_data.chunks_exact(3) {
            rgba_data.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
        }

        let img: RgbaImage = ImageBuffer::from_raw(width, height, rgba_data)
            .ok_or_else(|| TryOnError::FrameFailure("frame buffer size mismatch".into()))?;

        let image = if self.mirrored {
            image::imageops::flip_horizontal(&img)
        } else {
            img
        };
        Ok(Frame::new(image, self.mirrored))
    }

    fn active_tracks(&self) -> usize {
        if !self.stopped && self.camera.is_stream_open() {
            1
        } else {
            0
        }
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(e) = self.camera.stop_stream() {
            warn!("failed to stop camera stream cleanly: {}", e);
        }
        info!("camera stream stopped");
    }
}

impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        self.stop();
    }
}
