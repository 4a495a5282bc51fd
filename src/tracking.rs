// src/tracking.rs - Pose stability over a sliding window of measurements
use nalgebra::{Point2, Vector2};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::StabilityConfig;
use crate::measurement::BodyMeasurements;

/// Samples needed before stability is reported as anything but zero.
pub const BOOTSTRAP_SAMPLES: usize = 5;

/// Largest history window a config may ask for.
pub const MAX_WINDOW: usize = 10;

/// Normalized center variance that halves stability on its own (10% of the body width, squared).
pub const POS_SCALE: f32 = 0.01;

/// Tilt variance that halves stability on its own ((5 degrees)^2).
pub const ANG_SCALE: f32 = 0.0076;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    center: Point2<f32>,
    tilt: f32,
    width: f32,
}

/// Rolling tick timings for the status readout.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    pub avg_fps: f32,
    pub avg_frame_time: f32,
    pub tracking_confidence: f32,
    frame_times: VecDeque<f32>,
    last_tick: Option<Instant>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    const WINDOW: usize = 30;

    pub fn new() -> Self {
        Self {
            avg_fps: 0.0,
            avg_frame_time: 0.0,
            tracking_confidence: 0.0,
            frame_times: VecDeque::with_capacity(Self::WINDOW),
            last_tick: None,
        }
    }

    pub fn record_tick(&mut self, now: Instant) {
        if let Some(last) = self.last_tick {
            let elapsed = now.saturating_duration_since(last).as_secs_f32();
            self.frame_times.push_front(elapsed);
            if self.frame_times.len() > Self::WINDOW {
                self.frame_times.pop_back();
            }
            self.avg_frame_time =
                self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
            self.avg_fps = if self.avg_frame_time > 0.0 {
                1.0 / self.avg_frame_time
            } else {
                0.0
            };
        }
        self.last_tick = Some(now);
    }

    pub fn record_confidence(&mut self, confidence: f32) {
        self.tracking_confidence = confidence;
    }

    pub fn frame_time(&self) -> Duration {
        Duration::from_secs_f32(self.avg_frame_time.max(0.0))
    }
}

/// Sliding window of recent measurements; turns jitter into a blend rate.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    history: VecDeque<Sample>,
    window: usize,
    min_samples: usize,
    min_rate: f32,
    max_rate: f32,
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new(&StabilityConfig::default())
    }
}

impl StabilityTracker {
    pub fn new(config: &StabilityConfig) -> Self {
        // Never below the bootstrap, whatever the config says.
        let min_samples = config.min_samples.max(BOOTSTRAP_SAMPLES);
        let window = config.window.max(min_samples);
        Self {
            history: VecDeque::with_capacity(window),
            window,
            min_samples,
            min_rate: config.min_rate,
            max_rate: config.max_rate,
        }
    }

    pub fn push(&mut self, measurement: &BodyMeasurements) {
        self.history.push_back(Sample {
            center: measurement.center,
            tilt: measurement.tilt,
            width: measurement.primary_width(),
        });
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// 0 until the window has bootstrapped, then in (0, 1]. Exactly 1 when nothing moves.
    pub fn stability(&self) -> f32 {
        let n = self.history.len();
        if n < self.min_samples {
            return 0.0;
        }
        let nf = n as f32;

        let mean_width = self.history.iter().map(|s| s.width).sum::<f32>() / nf;
        if mean_width <= f32::EPSILON {
            return 0.0;
        }

        let mean_center = self
            .history
            .iter()
            .fold(Vector2::zeros(), |acc, s| acc + s.center.coords)
            / nf;
        let pos_var = self
            .history
            .iter()
            .map(|s| ((s.center.coords - mean_center) / mean_width).norm_squared())
            .sum::<f32>()
            / nf;

        let mean_tilt = self.history.iter().map(|s| s.tilt).sum::<f32>() / nf;
        let ang_var = self
            .history
            .iter()
            .map(|s| (s.tilt - mean_tilt).powi(2))
            .sum::<f32>()
            / nf;

        1.0 / (1.0 + pos_var / POS_SCALE + ang_var / ANG_SCALE)
    }

    /// Interpolation factor toward the new target. Jittery tracking moves the garment slowly.
    pub fn blend_rate(&self, stability: f32) -> f32 {
        self.min_rate + (self.max_rate - self.min_rate) * stability.clamp(0.0, 1.0)
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
