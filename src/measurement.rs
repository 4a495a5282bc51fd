// src/measurement.rs - Body measurements derived from a detected pose
use nalgebra::{Point2, Vector2};

use crate::garment::{BodyRegion, ClothingCategory};
use crate::pose::{KeypointName, Pose, PoseKeypoint};

/// Fixed anthropometric ratios used when a secondary keypoint set is not visible.
///
/// Every fallback is exactly `primary * ratio`.
pub mod ratios {
    /// Keypoints scoring below this are treated as not visible.
    pub const MIN_KEYPOINT_CONFIDENCE: f32 = 0.4;

    /// Torso length (shoulder line to hip line) per shoulder width.
    pub const TORSO_PER_SHOULDER: f32 = 1.6;
    /// Leg length (hip center to ankle center) per hip width.
    pub const LEG_PER_HIP: f32 = 2.4;
    /// Hip width per shoulder width.
    pub const HIP_PER_SHOULDER: f32 = 0.9;
    /// Waist width per hip width.
    pub const WAIST_PER_HIP: f32 = 0.9;
    /// One arm, shoulder to wrist, per shoulder width.
    pub const ARM_PER_SHOULDER: f32 = 1.3;
    /// Standing height per torso length.
    pub const HEIGHT_PER_TORSO: f32 = 3.0;
    /// Nose-to-ankle span scaled up to the top of the head.
    pub const HEAD_ALLOWANCE: f32 = 1.1;
    /// Neck base above the shoulder line, per shoulder width.
    pub const NECK_RISE_PER_SHOULDER: f32 = 0.25;
    /// Share of shoulder width in a full-body garment's width; hips make up the rest.
    pub const FULL_BODY_SHOULDER_WEIGHT: f32 = 0.5;
}

/// Bitset of [`KeypointName`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeypointSet(u32);

impl KeypointSet {
    pub fn insert(&mut self, name: KeypointName) {
        self.0 |= 1 << name.index();
    }

    pub fn contains(&self, name: KeypointName) -> bool {
        self.0 & (1 << name.index()) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = KeypointName> + '_ {
        KeypointName::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

/// Measurements for one frame, in image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyMeasurements {
    /// Anchor of the category's body region.
    pub center: Point2<f32>,
    pub shoulder_width: f32,
    pub torso_length: f32,
    pub hip_width: f32,
    pub waist_width: f32,
    pub arm_length: f32,
    pub leg_length: f32,
    pub arm_span: f32,
    pub body_height: f32,
    pub neck: Point2<f32>,
    /// Angle of the shoulder (or hip) line, radians in (-pi/2, pi/2].
    pub tilt: f32,
    /// Minimum score over `keypoints`.
    pub confidence: f32,
    pub category: ClothingCategory,
    pub keypoints: KeypointSet,
}

impl BodyMeasurements {
    /// Width the garment's horizontal scale follows.
    pub fn primary_width(&self) -> f32 {
        match self.category.region() {
            BodyRegion::Torso | BodyRegion::Neck => self.shoulder_width,
            BodyRegion::Legs => self.hip_width,
            BodyRegion::FullBody => {
                let w = ratios::FULL_BODY_SHOULDER_WEIGHT;
                w * self.shoulder_width + (1.0 - w) * self.hip_width
            }
        }
    }

    /// Length the garment's vertical scale and anchor offset follow.
    pub fn primary_length(&self) -> f32 {
        match self.category.region() {
            BodyRegion::Torso => self.torso_length,
            BodyRegion::Legs => self.leg_length,
            BodyRegion::FullBody => self.torso_length + self.leg_length,
            BodyRegion::Neck => self.shoulder_width,
        }
    }
}

/// Keypoints consulted so far and the lowest score among them.
struct Contributions<'a> {
    pose: &'a Pose,
    threshold: f32,
    used: KeypointSet,
    confidence: f32,
}

impl<'a> Contributions<'a> {
    fn new(pose: &'a Pose, threshold: f32) -> Self {
        Self {
            pose,
            threshold,
            used: KeypointSet::default(),
            confidence: 1.0,
        }
    }

    fn record(&mut self, k: &PoseKeypoint) -> Point2<f32> {
        self.used.insert(k.name);
        self.confidence = self.confidence.min(k.score);
        Point2::new(k.x, k.y)
    }

    /// Both keypoints if both are visible. Nothing is recorded otherwise.
    fn pair(&mut self, a: KeypointName, b: KeypointName) -> Option<(Point2<f32>, Point2<f32>)> {
        let ka = *self.pose.confident(a, self.threshold)?;
        let kb = *self.pose.confident(b, self.threshold)?;
        Some((self.record(&ka), self.record(&kb)))
    }

    fn chain(&mut self, names: [KeypointName; 3]) -> Option<[Point2<f32>; 3]> {
        let mut found = [None; 3];
        for (slot, name) in found.iter_mut().zip(names) {
            *slot = Some(*self.pose.confident(name, self.threshold)?);
        }
        let mut points = [Point2::origin(); 3];
        for (point, k) in points.iter_mut().zip(found.into_iter().flatten()) {
            *point = self.record(&k);
        }
        Some(points)
    }

    fn single(&mut self, name: KeypointName) -> Option<Point2<f32>> {
        let k = *self.pose.confident(name, self.threshold)?;
        Some(self.record(&k))
    }
}

fn midpoint(a: Point2<f32>, b: Point2<f32>) -> Point2<f32> {
    nalgebra::center(&a, &b)
}

/// Angle of the line through both points, oriented so that it points right.
fn line_tilt(left: Point2<f32>, right: Point2<f32>) -> f32 {
    let mut v: Vector2<f32> = right - left;
    if v.x < 0.0 {
        v = -v;
    }
    v.y.atan2(v.x)
}

#[derive(Debug, Clone)]
pub struct MeasurementExtractor {
    threshold: f32,
}

impl Default for MeasurementExtractor {
    fn default() -> Self {
        Self::new(ratios::MIN_KEYPOINT_CONFIDENCE)
    }
}

impl MeasurementExtractor {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// `None` when the keypoints the category is anchored on are not visible.
    pub fn extract(&self, pose: &Pose, category: ClothingCategory) -> Option<BodyMeasurements> {
        match category.region() {
            BodyRegion::Torso | BodyRegion::Neck => self.upper_body(pose, category),
            BodyRegion::Legs | BodyRegion::FullBody => self.lower_body(pose, category),
        }
    }

    fn upper_body(&self, pose: &Pose, category: ClothingCategory) -> Option<BodyMeasurements> {
        use KeypointName::*;

        let mut c = Contributions::new(pose, self.threshold);
        let (ls, rs) = c.pair(LeftShoulder, RightShoulder)?;
        let shoulder_center = midpoint(ls, rs);
        let shoulder_width = nalgebra::distance(&ls, &rs);
        if shoulder_width <= f32::EPSILON {
            return None;
        }
        let tilt = line_tilt(ls, rs);

        let hips = c.pair(LeftHip, RightHip);
        let (torso_length, hip_width, hip_center) = match hips {
            Some((lh, rh)) => {
                let center = midpoint(lh, rh);
                (
                    (center.y - shoulder_center.y).abs(),
                    nalgebra::distance(&lh, &rh),
                    Some(center),
                )
            }
            None => (
                shoulder_width * ratios::TORSO_PER_SHOULDER,
                shoulder_width * ratios::HIP_PER_SHOULDER,
                None,
            ),
        };

        let ankles = hip_center.and_then(|h| Some((h, c.pair(LeftAnkle, RightAnkle)?)));
        let leg_length = match ankles {
            Some((hip_center, (la, ra))) => nalgebra::distance(&hip_center, &midpoint(la, ra)),
            None => hip_width * ratios::LEG_PER_HIP,
        };

        let neck = shoulder_center
            - Vector2::new(0.0, shoulder_width * ratios::NECK_RISE_PER_SHOULDER);
        let center = match category.region() {
            BodyRegion::Neck => neck,
            _ => shoulder_center,
        };

        let arm_length = self.arm_length(&mut c, shoulder_width);
        let body_height = self.body_height(&mut c, torso_length);

        Some(BodyMeasurements {
            center,
            shoulder_width,
            torso_length,
            hip_width,
            waist_width: hip_width * ratios::WAIST_PER_HIP,
            arm_length,
            leg_length,
            arm_span: 2.0 * arm_length + shoulder_width,
            body_height,
            neck,
            tilt,
            confidence: c.confidence,
            category,
            keypoints: c.used,
        })
    }

    fn lower_body(&self, pose: &Pose, category: ClothingCategory) -> Option<BodyMeasurements> {
        use KeypointName::*;

        let mut c = Contributions::new(pose, self.threshold);
        let (lh, rh) = c.pair(LeftHip, RightHip)?;
        let hip_center = midpoint(lh, rh);
        let hip_width = nalgebra::distance(&lh, &rh);
        if hip_width <= f32::EPSILON {
            return None;
        }
        let tilt = line_tilt(lh, rh);

        let leg_length = match c.pair(LeftAnkle, RightAnkle) {
            Some((la, ra)) => nalgebra::distance(&hip_center, &midpoint(la, ra)),
            None => hip_width * ratios::LEG_PER_HIP,
        };

        // Pants never need the upper body; a dress hangs from the shoulders when they are seen.
        let shoulders = match category.region() {
            BodyRegion::FullBody => c.pair(LeftShoulder, RightShoulder),
            _ => None,
        };
        let (shoulder_width, torso_length, shoulder_center) = match shoulders {
            Some((ls, rs)) => {
                let center = midpoint(ls, rs);
                (
                    nalgebra::distance(&ls, &rs),
                    (hip_center.y - center.y).abs(),
                    center,
                )
            }
            None => {
                let shoulder_width = hip_width / ratios::HIP_PER_SHOULDER;
                let torso_length = shoulder_width * ratios::TORSO_PER_SHOULDER;
                (
                    shoulder_width,
                    torso_length,
                    hip_center - Vector2::new(0.0, torso_length),
                )
            }
        };

        let center = match category.region() {
            BodyRegion::FullBody => shoulder_center,
            _ => hip_center,
        };
        let neck = shoulder_center
            - Vector2::new(0.0, shoulder_width * ratios::NECK_RISE_PER_SHOULDER);

        let arm_length = if category.region() == BodyRegion::FullBody {
            self.arm_length(&mut c, shoulder_width)
        } else {
            shoulder_width * ratios::ARM_PER_SHOULDER
        };
        let body_height = if category.region() == BodyRegion::FullBody {
            self.body_height(&mut c, torso_length)
        } else {
            torso_length * ratios::HEIGHT_PER_TORSO
        };

        Some(BodyMeasurements {
            center,
            shoulder_width,
            torso_length,
            hip_width,
            waist_width: hip_width * ratios::WAIST_PER_HIP,
            arm_length,
            leg_length,
            arm_span: 2.0 * arm_length + shoulder_width,
            body_height,
            neck,
            tilt,
            confidence: c.confidence,
            category,
            keypoints: c.used,
        })
    }

    /// Mean of the fully visible arms, or the shoulder-width fallback.
    fn arm_length(&self, c: &mut Contributions<'_>, shoulder_width: f32) -> f32 {
        use KeypointName::*;

        let arms = [
            [LeftShoulder, LeftElbow, LeftWrist],
            [RightShoulder, RightElbow, RightWrist],
        ];
        let lengths: Vec<f32> = arms
            .into_iter()
            .filter_map(|arm| c.chain(arm))
            .map(|[s, e, w]| nalgebra::distance(&s, &e) + nalgebra::distance(&e, &w))
            .collect();

        if lengths.is_empty() {
            shoulder_width * ratios::ARM_PER_SHOULDER
        } else {
            lengths.iter().sum::<f32>() / lengths.len() as f32
        }
    }

    fn body_height(&self, c: &mut Contributions<'_>, torso_length: f32) -> f32 {
        use KeypointName::*;

        let visible = |name| c.pose.confident(name, c.threshold).is_some();
        if !(visible(Nose) && visible(LeftAnkle) && visible(RightAnkle)) {
            return torso_length * ratios::HEIGHT_PER_TORSO;
        }
        match (c.single(Nose), c.pair(LeftAnkle, RightAnkle)) {
            (Some(nose), Some((la, ra))) => (midpoint(la, ra).y - nose.y).abs() * ratios::HEAD_ALLOWANCE,
            _ => torso_length * ratios::HEIGHT_PER_TORSO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::FrameSize;
    use approx::assert_relative_eq;

    fn pose(points: &[(KeypointName, f32, f32, f32)]) -> Pose {
        Pose::new(
            points
                .iter()
                .map(|&(name, x, y, score)| PoseKeypoint::new(name, x, y, score))
                .collect(),
            FrameSize::new(640, 480),
        )
    }

    use KeypointName::*;

    #[test]
    fn shoulders_only_shirt_uses_torso_fallback() {
        let pose = pose(&[(LeftShoulder, 250.0, 200.0, 0.9), (RightShoulder, 350.0, 200.0, 0.8)]);
        let m = MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Shirt)
            .unwrap();

        assert_relative_eq!(m.shoulder_width, 100.0);
        assert_eq!(m.torso_length, 100.0 * ratios::TORSO_PER_SHOULDER);
        assert_eq!(m.hip_width, 100.0 * ratios::HIP_PER_SHOULDER);
        assert_relative_eq!(m.tilt, 0.0);
        assert_relative_eq!(m.center.x, 300.0);
        assert_eq!(m.confidence, 0.8);
        assert_eq!(m.keypoints.len(), 2);
    }

    #[test]
    fn hips_only_pants_uses_leg_fallback() {
        let pose = pose(&[(LeftHip, 280.0, 300.0, 0.7), (RightHip, 360.0, 300.0, 0.95)]);
        let m = MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Pants)
            .unwrap();

        assert_relative_eq!(m.hip_width, 80.0);
        assert_eq!(m.leg_length, 80.0 * ratios::LEG_PER_HIP);
        assert_eq!(m.confidence, 0.7);
        assert_relative_eq!(m.center.y, 300.0);
    }

    #[test]
    fn confidence_is_minimum_of_contributing_keypoints() {
        let pose = pose(&[
            (LeftShoulder, 250.0, 200.0, 0.9),
            (RightShoulder, 350.0, 200.0, 0.95),
            (LeftHip, 260.0, 360.0, 0.55),
            (RightHip, 340.0, 360.0, 0.6),
            // Below threshold, so it never contributes.
            (LeftAnkle, 270.0, 470.0, 0.1),
            (RightAnkle, 330.0, 470.0, 0.9),
            (Nose, 300.0, 120.0, 0.99),
        ]);
        let m = MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Jacket)
            .unwrap();

        let min_used = m
            .keypoints
            .iter()
            .map(|name| pose.get(name).unwrap().score)
            .fold(f32::INFINITY, f32::min);
        assert_eq!(m.confidence, min_used);
        assert_eq!(m.confidence, 0.55);
        assert!(!m.keypoints.contains(LeftAnkle));
        assert!(!m.keypoints.contains(RightAnkle));
        assert_relative_eq!(m.torso_length, 160.0);
    }

    #[test]
    fn low_confidence_shoulder_rejects_shirt() {
        let pose = pose(&[(LeftShoulder, 250.0, 200.0, 0.2), (RightShoulder, 350.0, 200.0, 0.9)]);
        assert!(MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Shirt)
            .is_none());
    }

    #[test]
    fn pants_need_hips_even_with_shoulders() {
        let pose = pose(&[(LeftShoulder, 250.0, 200.0, 0.9), (RightShoulder, 350.0, 200.0, 0.9)]);
        assert!(MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Pants)
            .is_none());
        assert!(MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Dress)
            .is_none());
    }

    #[test]
    fn accessory_anchors_at_neck() {
        let pose = pose(&[(LeftShoulder, 250.0, 200.0, 0.9), (RightShoulder, 350.0, 200.0, 0.9)]);
        let m = MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Accessory)
            .unwrap();
        assert_eq!(m.center, m.neck);
        assert_relative_eq!(m.neck.y, 200.0 - 100.0 * ratios::NECK_RISE_PER_SHOULDER);
    }

    #[test]
    fn tilt_follows_shoulder_line() {
        let pose = pose(&[(LeftShoulder, 250.0, 200.0, 0.9), (RightShoulder, 350.0, 300.0, 0.9)]);
        let m = MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Shirt)
            .unwrap();
        assert_relative_eq!(m.tilt, std::f32::consts::FRAC_PI_4, epsilon = 1e-6);

        // Same line seen unmirrored: labels swap sides but the tilt does not flip.
        let unmirrored = pose.clone().mirrored();
        let m2 = MeasurementExtractor::default()
            .extract(&unmirrored, ClothingCategory::Shirt)
            .unwrap();
        assert_relative_eq!(m2.tilt, -std::f32::consts::FRAC_PI_4, epsilon = 1e-6);
    }

    #[test]
    fn visible_arms_replace_arm_fallback() {
        let pose = pose(&[
            (LeftShoulder, 250.0, 200.0, 0.9),
            (RightShoulder, 350.0, 200.0, 0.9),
            (LeftElbow, 250.0, 260.0, 0.8),
            (LeftWrist, 250.0, 320.0, 0.8),
        ]);
        let m = MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Shirt)
            .unwrap();
        assert_relative_eq!(m.arm_length, 120.0);
        assert_relative_eq!(m.arm_span, 340.0);
        assert_eq!(m.confidence, 0.8);
    }

    #[test]
    fn dress_spans_shoulders_to_ankles() {
        let pose = pose(&[
            (LeftShoulder, 250.0, 100.0, 0.9),
            (RightShoulder, 350.0, 100.0, 0.9),
            (LeftHip, 270.0, 250.0, 0.9),
            (RightHip, 330.0, 250.0, 0.9),
        ]);
        let m = MeasurementExtractor::default()
            .extract(&pose, ClothingCategory::Dress)
            .unwrap();
        assert_relative_eq!(m.torso_length, 150.0);
        assert_eq!(m.leg_length, 60.0 * ratios::LEG_PER_HIP);
        assert_relative_eq!(m.primary_length(), 150.0 + 144.0, epsilon = 1e-3);
        assert_relative_eq!(m.center.y, 100.0);
        // Halfway between the 100 px shoulders and the 60 px hips.
        assert_relative_eq!(m.primary_width(), 80.0, epsilon = 1e-3);
    }
}
