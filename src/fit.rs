// src/fit.rs - Garment placement from body measurements
use nalgebra::Vector3;
use nalgebra_glm as glm;
use std::f32::consts::PI;

use crate::config::FitConfig;
use crate::garment::{ClothingCategory, FitProfile};
use crate::measurement::BodyMeasurements;
use crate::video::FrameSize;

/// Placement of the garment in scene units. The view spans `[-aspect, aspect] x [-1, 1]` at z = 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GarmentTransform {
    pub position: Vector3<f32>,
    /// Radians about the view axis, counterclockwise.
    pub rotation: f32,
    pub scale: Vector3<f32>,
}

impl Default for GarmentTransform {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: 0.0,
            scale: Vector3::repeat(1.0),
        }
    }
}

impl GarmentTransform {
    pub fn model_matrix(&self) -> glm::Mat4 {
        glm::translation(&self.position)
            * glm::rotation(self.rotation, &glm::vec3(0.0, 0.0, 1.0))
            * glm::scaling(&self.scale)
    }

    /// Moves `rate` of the way toward `target`. Rotation takes the short way round.
    pub fn blend_toward(&mut self, target: &GarmentTransform, rate: f32) {
        let rate = rate.clamp(0.0, 1.0);
        self.position += (target.position - self.position) * rate;
        self.scale += (target.scale - self.scale) * rate;
        self.rotation += wrap_angle(target.rotation - self.rotation) * rate;
    }
}

fn wrap_angle(a: f32) -> f32 {
    let wrapped = (a + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// Maps measurements to a target transform and eases the live transform toward it.
#[derive(Debug, Clone)]
pub struct FitTransformEngine {
    category: ClothingCategory,
    profile: FitProfile,
    min_scale: f32,
    max_scale: f32,
    canonical_size: f32,
    scene_aspect: Option<f32>,
    current: GarmentTransform,
}

impl FitTransformEngine {
    pub fn new(category: ClothingCategory, config: &FitConfig, canonical_size: f32) -> Self {
        Self {
            category,
            profile: FitProfile::for_category(category),
            min_scale: config.min_scale,
            max_scale: config.max_scale,
            canonical_size: if canonical_size > 0.0 { canonical_size } else { 1.0 },
            scene_aspect: None,
            current: GarmentTransform::default(),
        }
    }

    pub fn category(&self) -> ClothingCategory {
        self.category
    }

    pub fn set_category(&mut self, category: ClothingCategory) {
        self.category = category;
        self.profile = FitProfile::for_category(category);
    }

    /// Aspect of the view the garment is drawn into. Until set, the frame's own aspect is used.
    pub fn set_scene_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.scene_aspect = Some(aspect);
        }
    }

    pub fn current(&self) -> &GarmentTransform {
        &self.current
    }

    pub fn reset(&mut self) {
        self.current = GarmentTransform::default();
    }

    fn clamp_scale(&self, raw: f32) -> f32 {
        if raw.is_nan() {
            self.min_scale
        } else {
            raw.clamp(self.min_scale, self.max_scale)
        }
    }

    /// Where the garment should be for this measurement, before smoothing.
    pub fn target(&self, m: &BodyMeasurements, frame: FrameSize) -> GarmentTransform {
        let w = frame.width.max(1) as f32;
        let h = frame.height.max(1) as f32;
        let aspect = self.scene_aspect.unwrap_or(w / h);

        // Pixels to scene units; one scene unit is half the frame height.
        let to_scene = 2.0 / h;

        let primary_length = m.primary_length();
        let anchor_v = m.center.y + self.profile.vertical_offset * primary_length;
        let x = (2.0 * m.center.x / w - 1.0) * aspect;
        let y = 1.0 - 2.0 * anchor_v / h;

        let width = m.primary_width() * to_scene;
        let length = primary_length * to_scene;
        // The frame is stretched to the view, and the garment's width stretches with it.
        let stretch = aspect / (w / h);
        let raw = Vector3::new(
            width * stretch * self.profile.width_ratio,
            length * self.profile.height_ratio,
            width * self.profile.depth_ratio,
        ) / self.canonical_size;

        GarmentTransform {
            position: Vector3::new(x, y, 0.0),
            // Image y grows downward, scene y upward.
            rotation: -m.tilt,
            scale: raw.map(|s| self.clamp_scale(s)),
        }
    }

    /// Blends toward the target for `measurement`. Without one the transform stays put.
    pub fn update(
        &mut self,
        measurement: Option<&BodyMeasurements>,
        frame: FrameSize,
        rate: f32,
    ) -> &GarmentTransform {
        if let Some(m) = measurement {
            let target = self.target(m, frame);
            self.current.blend_toward(&target, rate);
        }
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::MeasurementExtractor;
    use crate::pose::{KeypointName, Pose, PoseKeypoint};
    use approx::assert_relative_eq;

    fn shirt_measurement(shoulder_px: f32) -> (BodyMeasurements, FrameSize) {
        torso_measurement(ClothingCategory::Shirt, shoulder_px)
    }

    fn torso_measurement(category: ClothingCategory, shoulder_px: f32) -> (BodyMeasurements, FrameSize) {
        let frame = FrameSize::new(640, 480);
        let half = shoulder_px / 2.0;
        let pose = Pose::new(
            vec![
                PoseKeypoint::new(KeypointName::LeftShoulder, 320.0 - half, 180.0, 0.9),
                PoseKeypoint::new(KeypointName::RightShoulder, 320.0 + half, 180.0, 0.9),
            ],
            frame,
        );
        let m = MeasurementExtractor::default()
            .extract(&pose, category)
            .unwrap();
        (m, frame)
    }

    fn engine() -> FitTransformEngine {
        FitTransformEngine::new(ClothingCategory::Shirt, &FitConfig::default(), 1.0)
    }

    #[test]
    fn happy_path_shirt_scale_and_position() {
        let (m, frame) = shirt_measurement(150.0);
        let t = engine().target(&m, frame);

        assert_relative_eq!(t.scale.x, 0.625 * 1.4, epsilon = 1e-5);
        assert!(t.scale.iter().all(|s| *s >= 0.3 && *s <= 2.5));
        let aspect = frame.aspect();
        assert!(t.position.x.abs() <= aspect);
        assert!(t.position.y.abs() <= 1.0);
        assert_relative_eq!(t.position.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn scales_are_clamped() {
        let (tiny, frame) = shirt_measurement(4.0);
        let t = engine().target(&tiny, frame);
        assert_eq!(t.scale, Vector3::repeat(0.3));

        let (huge, frame) = shirt_measurement(1200.0);
        let t = engine().target(&huge, frame);
        assert_eq!(t.scale.x, 2.5);
        assert_eq!(t.scale.y, 2.5);
    }

    #[test]
    fn transform_persists_without_measurements() {
        let (m, frame) = shirt_measurement(150.0);
        let mut engine = engine();
        engine.update(Some(&m), frame, 0.5);
        let after_valid = *engine.current();
        assert_ne!(after_valid, GarmentTransform::default());

        for _ in 0..20 {
            engine.update(None, frame, 0.5);
        }
        assert_eq!(*engine.current(), after_valid);
    }

    #[test]
    fn blending_converges_to_target() {
        let (m, frame) = shirt_measurement(150.0);
        let mut engine = engine();
        let target = engine.target(&m, frame);
        for _ in 0..60 {
            engine.update(Some(&m), frame, 0.5);
        }
        assert_relative_eq!(engine.current().scale, target.scale, epsilon = 1e-5);
        assert_relative_eq!(engine.current().position, target.position, epsilon = 1e-5);
    }

    #[test]
    fn position_follows_scene_aspect() {
        let (mut m, frame) = shirt_measurement(150.0);
        m.center.x = 640.0;
        let mut engine = engine();
        assert_relative_eq!(engine.target(&m, frame).position.x, 4.0 / 3.0, epsilon = 1e-6);
        engine.set_scene_aspect(16.0 / 9.0);
        assert_relative_eq!(engine.target(&m, frame).position.x, 16.0 / 9.0, epsilon = 1e-6);
    }

    #[test]
    fn width_follows_viewport_stretch() {
        let (m, frame) = shirt_measurement(150.0);
        let mut engine = engine();
        let natural = engine.target(&m, frame);
        engine.set_scene_aspect(16.0 / 9.0);
        let stretched = engine.target(&m, frame);

        assert_relative_eq!(stretched.scale.x, natural.scale.x * 4.0 / 3.0, epsilon = 1e-5);
        assert_relative_eq!(stretched.scale.y, natural.scale.y, epsilon = 1e-6);
    }

    #[test]
    fn rotation_counters_image_tilt() {
        let (mut m, frame) = shirt_measurement(150.0);
        m.tilt = 0.2;
        assert_relative_eq!(engine().target(&m, frame).rotation, -0.2);
    }

    #[test]
    fn rotation_blends_the_short_way() {
        let mut current = GarmentTransform {
            rotation: 3.0,
            ..GarmentTransform::default()
        };
        let target = GarmentTransform {
            rotation: -3.0,
            ..GarmentTransform::default()
        };
        current.blend_toward(&target, 0.5);
        assert!(current.rotation > 3.0);
    }

    #[test]
    fn shirt_anchor_sits_below_shoulders() {
        let (m, frame) = shirt_measurement(150.0);
        let t = engine().target(&m, frame);
        let shoulder_y = 1.0 - 2.0 * 180.0 / 480.0;
        assert!(t.position.y < shoulder_y);
    }

    #[test]
    fn jacket_sits_slightly_above_shoulder_line() {
        let (m, frame) = torso_measurement(ClothingCategory::Jacket, 150.0);
        let engine = FitTransformEngine::new(ClothingCategory::Jacket, &FitConfig::default(), 1.0);
        let t = engine.target(&m, frame);

        let shoulder_y = 1.0 - 2.0 * 180.0 / 480.0;
        assert!(t.position.y > shoulder_y);
        assert!(t.position.y - shoulder_y < 0.1);
    }
}
