// src/data.rs - Measurement recording and session reports
use chrono::{DateTime, Local};
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, TryOnError};
use crate::fit::GarmentTransform;
use crate::garment::{ClothingCategory, GarmentRecord};
use crate::measurement::BodyMeasurements;

#[derive(Debug, Clone, Serialize)]
struct MeasurementRecord {
    timestamp: f64,
    frame: u32,
    tracked: bool,
    category: ClothingCategory,

    center_x: Option<f32>,
    center_y: Option<f32>,
    shoulder_width: Option<f32>,
    torso_length: Option<f32>,
    hip_width: Option<f32>,
    waist_width: Option<f32>,
    arm_length: Option<f32>,
    leg_length: Option<f32>,
    arm_span: Option<f32>,
    body_height: Option<f32>,
    tilt_degrees: Option<f32>,
    confidence: Option<f32>,
    keypoints_used: usize,

    stability: f32,

    // Garment placement after blending
    position_x: f32,
    position_y: f32,
    rotation_degrees: f32,
    scale_x: f32,
    scale_y: f32,
    scale_z: f32,
}

/// Aggregate written next to the CSV as `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub session_name: String,
    pub garment: String,
    pub category: ClothingCategory,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub total_frames: usize,
    pub tracked_frames: usize,
    pub tracking_rate: f32,
    pub mean_confidence: Option<f32>,
    pub mean_stability: Option<f32>,
    pub mean_shoulder_width: Option<f32>,
}

/// Buffers per-detection measurements and writes them out on demand.
pub struct MeasurementLog {
    output_dir: PathBuf,
    session_name: String,
    session_id: Uuid,
    garment: GarmentRecord,
    started_at: DateTime<Local>,
    records: Vec<MeasurementRecord>,
}

impl MeasurementLog {
    pub fn new(
        output_dir: impl AsRef<Path>,
        session_id: Uuid,
        garment: GarmentRecord,
        session_name: Option<String>,
    ) -> Self {
        let started_at = Local::now();
        let session_name = session_name
            .unwrap_or_else(|| format!("tryon_{}", started_at.format("%Y%m%d_%H%M%S")));

        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
            session_id,
            garment,
            started_at,
            records: Vec::new(),
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.output_dir.join(&self.session_name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn add_frame(
        &mut self,
        timestamp: f64,
        measurement: Option<&BodyMeasurements>,
        stability: f32,
        transform: &GarmentTransform,
    ) {
        let frame = self.records.len() as u32;
        let record = MeasurementRecord {
            timestamp,
            frame,
            tracked: measurement.is_some(),
            category: measurement
                .map(|m| m.category)
                .unwrap_or(self.garment.category),
            center_x: measurement.map(|m| m.center.x),
            center_y: measurement.map(|m| m.center.y),
            shoulder_width: measurement.map(|m| m.shoulder_width),
            torso_length: measurement.map(|m| m.torso_length),
            hip_width: measurement.map(|m| m.hip_width),
            waist_width: measurement.map(|m| m.waist_width),
            arm_length: measurement.map(|m| m.arm_length),
            leg_length: measurement.map(|m| m.leg_length),
            arm_span: measurement.map(|m| m.arm_span),
            body_height: measurement.map(|m| m.body_height),
            tilt_degrees: measurement.map(|m| m.tilt.to_degrees()),
            confidence: measurement.map(|m| m.confidence),
            keypoints_used: measurement.map(|m| m.keypoints.len()).unwrap_or(0),
            stability,
            position_x: transform.position.x,
            position_y: transform.position.y,
            rotation_degrees: transform.rotation.to_degrees(),
            scale_x: transform.scale.x,
            scale_y: transform.scale.y,
            scale_z: transform.scale.z,
        };
        self.records.push(record);
    }

    pub fn export_csv(&self) -> Result<PathBuf> {
        let csv_path = self.session_dir().join("measurements.csv");
        create_parent(&csv_path)?;

        let file = File::create(&csv_path).map_err(export_error(&csv_path))?;
        let mut writer = Writer::from_writer(file);
        for record in &self.records {
            writer
                .serialize(record)
                .map_err(|e| TryOnError::Export(format!("CSV write failed: {}", e)))?;
        }
        writer.flush().map_err(export_error(&csv_path))?;

        info!("wrote {} measurement rows to {}", self.records.len(), csv_path.display());
        Ok(csv_path)
    }

    pub fn summary(&self) -> SessionSummary {
        let tracked: Vec<&MeasurementRecord> = self.records.iter().filter(|r| r.tracked).collect();
        let mean = |values: Vec<f32>| -> Option<f32> {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f32>() / values.len() as f32)
            }
        };

        SessionSummary {
            session_id: self.session_id,
            session_name: self.session_name.clone(),
            garment: self.garment.display_name().to_string(),
            category: self.garment.category,
            started_at: self.started_at,
            ended_at: Local::now(),
            total_frames: self.records.len(),
            tracked_frames: tracked.len(),
            tracking_rate: if self.records.is_empty() {
                0.0
            } else {
                tracked.len() as f32 / self.records.len() as f32
            },
            mean_confidence: mean(tracked.iter().filter_map(|r| r.confidence).collect()),
            mean_stability: mean(tracked.iter().map(|r| r.stability).collect()),
            mean_shoulder_width: mean(tracked.iter().filter_map(|r| r.shoulder_width).collect()),
        }
    }

    pub fn export_summary(&self) -> Result<PathBuf> {
        let path = self.session_dir().join("summary.json");
        create_parent(&path)?;
        let json = serde_json::to_string_pretty(&self.summary())
            .map_err(|e| TryOnError::Export(format!("summary serialization failed: {}", e)))?;
        std::fs::write(&path, json).map_err(export_error(&path))?;
        Ok(path)
    }

    pub fn generate_report(&self) -> Result<PathBuf> {
        let report_path = self.session_dir().join("report.html");
        create_parent(&report_path)?;
        std::fs::write(&report_path, self.create_html_report()).map_err(export_error(&report_path))?;
        Ok(report_path)
    }

    fn create_html_report(&self) -> String {
        let summary = self.summary();
        let fmt_opt = |v: Option<f32>, digits: usize| {
            v.map(|v| format!("{:.*}", digits, v))
                .unwrap_or_else(|| "n/a".to_string())
        };

        format!(
            r#"
<!DOCTYPE html>
<html>
<head>
    <title>Try-On Session Report - {name}</title>
    <style>
        body {{ font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; margin: 40px; background: #f5f5f5; }}
        h1 {{ color: #333; }}
        .stats {{ background: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
        .stat-item {{ margin: 10px 0; }}
        .stat-label {{ font-weight: bold; color: #666; }}
        .stat-value {{ color: #4682EA; font-size: 1.2em; }}
    </style>
</head>
<body>
    <h1>Virtual Try-On Report</h1>
    <div class="stats">
        <h2>{garment} ({category})</h2>
        <div class="stat-item"><span class="stat-label">Frames:</span> <span class="stat-value">{frames}</span></div>
        <div class="stat-item"><span class="stat-label">Body Tracked:</span> <span class="stat-value">{rate:.1}%</span></div>
        <div class="stat-item"><span class="stat-label">Mean Confidence:</span> <span class="stat-value">{confidence}</span></div>
        <div class="stat-item"><span class="stat-label">Mean Stability:</span> <span class="stat-value">{stability}</span></div>
        <div class="stat-item"><span class="stat-label">Mean Shoulder Width:</span> <span class="stat-value">{shoulders} px</span></div>
    </div>
</body>
</html>
"#,
            name = escape_html(&summary.session_name),
            garment = escape_html(&summary.garment),
            category = escape_html(&summary.category.to_string()),
            frames = summary.total_frames,
            rate = summary.tracking_rate * 100.0,
            confidence = fmt_opt(summary.mean_confidence, 2),
            stability = fmt_opt(summary.mean_stability, 2),
            shoulders = fmt_opt(summary.mean_shoulder_width, 1),
        )
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(export_error(parent))?;
    }
    Ok(())
}

fn export_error(path: &Path) -> impl Fn(std::io::Error) -> TryOnError + '_ {
    move |e| TryOnError::Export(format!("{}: {}", path.display(), e))
}
