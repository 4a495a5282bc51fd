// src/render.rs - Garment overlay rasterization
use image::{imageops, Rgba, RgbaImage};
use nalgebra_glm as glm;
use tracing::{debug, info};

use crate::config::RenderConfig;
use crate::error::{Result, TryOnError};
use crate::fit::GarmentTransform;
use crate::model::GarmentModel;

/// Perspective camera looking down -z, placed so the z = 0 plane spans
/// `[-aspect, aspect] x [-1, 1]` exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneCamera {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl SceneCamera {
    pub fn new(fov_degrees: f32, aspect: f32) -> Self {
        Self {
            fov_y: fov_degrees.to_radians(),
            aspect,
            near: 0.05,
            far: 100.0,
        }
    }

    pub fn distance(&self) -> f32 {
        1.0 / (self.fov_y / 2.0).tan()
    }

    pub fn view(&self) -> glm::Mat4 {
        glm::look_at(
            &glm::vec3(0.0, 0.0, self.distance()),
            &glm::vec3(0.0, 0.0, 0.0),
            &glm::vec3(0.0, 1.0, 0.0),
        )
    }

    pub fn projection(&self) -> glm::Mat4 {
        glm::perspective(self.aspect, self.fov_y, self.near, self.far)
    }

    pub fn view_projection(&self) -> glm::Mat4 {
        self.projection() * self.view()
    }
}

/// Draws the garment into a transparent layer the size of the view.
pub trait OverlayRenderer {
    fn resize(&mut self, width: u32, height: u32);

    /// Prepares draw data for `model`, replacing any previous garment.
    fn upload(&mut self, model: &GarmentModel) -> Result<()>;

    fn render(&mut self, transform: &GarmentTransform) -> Result<&RgbaImage>;

    /// Drops the draw data. Later calls to `render` fail.
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct CachedTriangle {
    vertices: [glm::Vec3; 3],
    color: [f32; 4],
}

/// CPU rasterizer: flat Lambert shading, depth tested, alpha-blended over the camera frame.
pub struct SoftwareRenderer {
    camera: SceneCamera,
    opacity: f32,
    light_dir: glm::Vec3,
    triangles: Option<Vec<CachedTriangle>>,
    target: RgbaImage,
    depth: Vec<f32>,
    disposed: bool,
}

impl SoftwareRenderer {
    const AMBIENT: f32 = 0.35;

    pub fn new(config: &RenderConfig) -> Self {
        let width = config.viewport_width.max(1);
        let height = config.viewport_height.max(1);
        Self {
            camera: SceneCamera::new(config.fov_degrees, width as f32 / height as f32),
            opacity: config.overlay_opacity.clamp(0.0, 1.0),
            light_dir: glm::normalize(&glm::vec3(0.3, 0.5, 1.0)),
            triangles: None,
            target: RgbaImage::new(width, height),
            depth: vec![f32::INFINITY; (width * height) as usize],
            disposed: false,
        }
    }

    pub fn camera(&self) -> &SceneCamera {
        &self.camera
    }

    fn rasterize(&mut self, tri: &CachedTriangle, model: &glm::Mat4, mvp: &glm::Mat4) {
        let width = self.target.width();
        let height = self.target.height();
        let (w, h) = (width as f32, height as f32);

        let mut screen = [glm::vec3(0.0, 0.0, 0.0); 3];
        for (out, v) in screen.iter_mut().zip(tri.vertices.iter()) {
            let clip = mvp * glm::vec4(v.x, v.y, v.z, 1.0);
            if clip.w <= self.camera.near {
                return;
            }
            let ndc = clip.xyz() / clip.w;
            *out = glm::vec3((ndc.x + 1.0) * 0.5 * w, (1.0 - ndc.y) * 0.5 * h, ndc.z);
        }

        let world: Vec<glm::Vec3> = tri
            .vertices
            .iter()
            .map(|v| (model * glm::vec4(v.x, v.y, v.z, 1.0)).xyz())
            .collect();
        let normal = glm::cross(&(world[1] - world[0]), &(world[2] - world[0]));
        if normal.norm_squared() <= f32::EPSILON * f32::EPSILON {
            return;
        }
        // Two-sided: cloth is thin and both faces show.
        let lambert = glm::dot(&glm::normalize(&normal), &self.light_dir).abs();
        let shade = Self::AMBIENT + (1.0 - Self::AMBIENT) * lambert;
        let [r, g, b, a] = tri.color;
        let color = Rgba([
            (r * shade * 255.0).clamp(0.0, 255.0) as u8,
            (g * shade * 255.0).clamp(0.0, 255.0) as u8,
            (b * shade * 255.0).clamp(0.0, 255.0) as u8,
            (a * self.opacity * 255.0).clamp(0.0, 255.0) as u8,
        ]);

        let [p0, p1, p2] = screen;
        let area = edge(&p0, &p1, &p2);
        if area.abs() <= f32::EPSILON {
            return;
        }

        let min_x = p0.x.min(p1.x).min(p2.x).floor().max(0.0) as u32;
        let max_x = p0.x.max(p1.x).max(p2.x).ceil().min(w - 1.0).max(0.0) as u32;
        let min_y = p0.y.min(p1.y).min(p2.y).floor().max(0.0) as u32;
        let max_y = p0.y.max(p1.y).max(p2.y).ceil().min(h - 1.0).max(0.0) as u32;

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let p = glm::vec3(x as f32 + 0.5, y as f32 + 0.5, 0.0);
                let w0 = edge(&p1, &p2, &p) / area;
                let w1 = edge(&p2, &p0, &p) / area;
                let w2 = edge(&p0, &p1, &p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * p0.z + w1 * p1.z + w2 * p2.z;
                let idx = (y * width + x) as usize;
                if z < self.depth[idx] {
                    self.depth[idx] = z;
                    self.target.put_pixel(x, y, color);
                }
            }
        }
    }
}

fn edge(a: &glm::Vec3, b: &glm::Vec3, p: &glm::Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

impl OverlayRenderer for SoftwareRenderer {
    fn resize(&mut self, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        if self.target.dimensions() == (width, height) {
            return;
        }
        debug!("overlay resized to {}x{}", width, height);
        self.camera.aspect = width as f32 / height as f32;
        self.target = RgbaImage::new(width, height);
        self.depth = vec![f32::INFINITY; (width * height) as usize];
    }

    fn upload(&mut self, model: &GarmentModel) -> Result<()> {
        if self.disposed {
            return Err(TryOnError::FrameFailure("renderer was disposed".into()));
        }
        let triangles: Vec<CachedTriangle> = model
            .meshes
            .iter()
            .flat_map(|mesh| {
                let color = model.material(mesh.material).base_color;
                mesh.triangles().map(move |[a, b, c]| CachedTriangle {
                    vertices: [a.coords, b.coords, c.coords],
                    color,
                })
            })
            .collect();
        debug!("uploaded {} triangles for {}", triangles.len(), model.source);
        self.triangles = Some(triangles);
        Ok(())
    }

    fn render(&mut self, transform: &GarmentTransform) -> Result<&RgbaImage> {
        if self.disposed {
            return Err(TryOnError::FrameFailure("renderer was disposed".into()));
        }

        for px in self.target.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
        self.depth.fill(f32::INFINITY);

        let model = transform.model_matrix();
        let mvp = self.camera.view_projection() * model;
        // Taken out for the draw so `rasterize` can borrow the target mutably.
        if let Some(triangles) = self.triangles.take() {
            for tri in &triangles {
                self.rasterize(tri, &model, &mvp);
            }
            self.triangles = Some(triangles);
        }
        Ok(&self.target)
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.triangles = None;
        self.depth = Vec::new();
        self.target = RgbaImage::new(1, 1);
        info!("renderer disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// Alpha-composites `overlay` onto `frame`, scaling the frame to the overlay's size.
pub fn composite(frame: &RgbaImage, overlay: &RgbaImage) -> RgbaImage {
    let mut base = if frame.dimensions() == overlay.dimensions() {
        frame.clone()
    } else {
        imageops::resize(
            frame,
            overlay.width(),
            overlay.height(),
            imageops::FilterType::Triangle,
        )
    };
    imageops::overlay(&mut base, overlay, 0, 0);
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundingBox, GarmentMesh, Material, Normalization};
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    fn quad_model() -> GarmentModel {
        let positions = vec![
            Point3::new(-0.5, -0.5, 0.0),
            Point3::new(0.5, -0.5, 0.0),
            Point3::new(0.5, 0.5, 0.0),
            Point3::new(-0.5, 0.5, 0.0),
        ];
        let bounds = BoundingBox::from_points(positions.iter()).unwrap();
        GarmentModel {
            source: "quad".into(),
            meshes: vec![GarmentMesh {
                positions,
                indices: vec![0, 1, 2, 0, 2, 3],
                material: 0,
            }],
            materials: vec![Material {
                name: None,
                base_color: [1.0, 0.0, 0.0, 1.0],
            }],
            bounds,
            normalization: Normalization {
                center: Point3::origin(),
                scale: 1.0,
            },
        }
    }

    fn renderer(width: u32, height: u32) -> SoftwareRenderer {
        SoftwareRenderer::new(&RenderConfig {
            viewport_width: width,
            viewport_height: height,
            ..RenderConfig::default()
        })
    }

    #[test]
    fn z0_plane_spans_unit_height() {
        let camera = SceneCamera::new(45.0, 4.0 / 3.0);
        let vp = camera.view_projection();
        let top = vp * glm::vec4(0.0, 1.0, 0.0, 1.0);
        let right = vp * glm::vec4(4.0 / 3.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(top.y / top.w, 1.0, epsilon = 1e-5);
        assert_relative_eq!(right.x / right.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn draws_garment_at_transform() {
        let mut r = renderer(64, 48);
        r.upload(&quad_model()).unwrap();
        let out = r.render(&GarmentTransform::default()).unwrap();

        let center = out.get_pixel(32, 24);
        assert!(center[0] > 0 && center[3] > 0);
        assert_eq!(center[1], 0);
        // 0.92 opacity leaves the frame faintly visible.
        assert!(center[3] < 255);
        assert_eq!(out.get_pixel(1, 1)[3], 0);
    }

    #[test]
    fn translation_moves_overlay() {
        let mut r = renderer(64, 48);
        r.upload(&quad_model()).unwrap();
        let moved = GarmentTransform {
            position: Vector3::new(0.9, 0.0, 0.0),
            scale: Vector3::repeat(0.3),
            ..GarmentTransform::default()
        };
        let out = r.render(&moved).unwrap();
        assert_eq!(out.get_pixel(32, 24)[3], 0);
        // x = 0.9 of aspect 4/3 lands at about 0.84 of the width.
        assert!(out.get_pixel(53, 24)[3] > 0);
    }

    #[test]
    fn disposed_renderer_refuses_to_draw() {
        let mut r = renderer(16, 16);
        r.upload(&quad_model()).unwrap();
        r.dispose();
        assert!(r.is_disposed());
        assert!(r.render(&GarmentTransform::default()).is_err());
        r.dispose();
    }

    #[test]
    fn composite_scales_frame_to_overlay() {
        let frame = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255]));
        let mut overlay = RgbaImage::new(4, 4);
        overlay.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let out = composite(&frame, &overlay);
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(*out.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*out.get_pixel(3, 3), Rgba([0, 0, 255, 255]));
    }
}
