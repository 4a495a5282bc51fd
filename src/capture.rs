// src/capture.rs - Snapshot composition and export
use chrono::Local;
use image::codecs::png::PngEncoder;
use image::{imageops, ColorType, ImageEncoder, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, TryOnError};
use crate::render::composite;
use crate::video::Frame;

/// The frame with the garment drawn over it, as the camera saw it rather than as a mirror.
pub fn compose_snapshot(display_frame: &Frame, overlay: &RgbaImage) -> RgbaImage {
    let composed = composite(&display_frame.image, overlay);
    if display_frame.mirrored {
        imageops::flip_horizontal(&composed)
    } else {
        composed
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .map_err(|e| TryOnError::Export(format!("PNG encoding failed: {}", e)))?;
    Ok(bytes)
}

/// Writes `tryon_<timestamp>.png` into `dir`, creating it if needed.
pub fn save_snapshot(image: &RgbaImage, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .map_err(|e| TryOnError::Export(format!("cannot create {}: {}", dir.display(), e)))?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
    let path = dir.join(format!("tryon_{}.png", timestamp));
    let bytes = encode_png(image)?;
    std::fs::write(&path, bytes)
        .map_err(|e| TryOnError::Export(format!("cannot write {}: {}", path.display(), e)))?;

    info!("snapshot saved to {}", path.display());
    Ok(path)
}
