// src/model.rs - Garment asset loading and normalization
use nalgebra::{Matrix4, Point3, Vector3};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, TryOnError};

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    /// Linear RGBA.
    pub base_color: [f32; 4],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: None,
            base_color: [0.8, 0.8, 0.8, 1.0],
        }
    }
}

/// Triangle list in model space, node transforms already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct GarmentMesh {
    pub positions: Vec<Point3<f32>>,
    pub indices: Vec<u32>,
    pub material: usize,
}

impl GarmentMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Point3<f32>; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            Some([
                *self.positions.get(tri[0] as usize)?,
                *self.positions.get(tri[1] as usize)?,
                *self.positions.get(tri[2] as usize)?,
            ])
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl BoundingBox {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f32>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        Some(iter.fold(
            BoundingBox {
                min: first,
                max: first,
            },
            |bb, p| BoundingBox {
                min: bb.min.inf(p),
                max: bb.max.sup(p),
            },
        ))
    }

    pub fn size(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn max_extent(&self) -> f32 {
        self.size().max()
    }
}

/// What was done to the source coordinates: `normalized = (source - center) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub center: Point3<f32>,
    pub scale: f32,
}

#[derive(Debug, Clone)]
pub struct GarmentModel {
    pub source: String,
    pub meshes: Vec<GarmentMesh>,
    pub materials: Vec<Material>,
    /// Bounds after normalization: centered at the origin, largest side = canonical size.
    pub bounds: BoundingBox,
    pub normalization: Normalization,
}

impl GarmentModel {
    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(GarmentMesh::triangle_count).sum()
    }

    pub fn material(&self, index: usize) -> &Material {
        static FALLBACK: Material = Material {
            name: None,
            base_color: [0.8, 0.8, 0.8, 1.0],
        };
        self.materials.get(index).unwrap_or(&FALLBACK)
    }
}

/// Local paths and `file://` URLs are accepted. Anything with another scheme is not.
pub fn resolve_asset_path(url: &str) -> Result<PathBuf> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(TryOnError::asset(url, "empty asset URL"));
    }
    if let Some(rest) = trimmed.strip_prefix("file://") {
        // file:///abs/path and file://localhost/abs/path
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        return Ok(PathBuf::from(rest.replace("%20", " ")));
    }
    if let Some((scheme, _)) = trimmed.split_once("://") {
        return Err(TryOnError::asset(
            url,
            format!("unsupported URL scheme `{}`", scheme),
        ));
    }
    Ok(PathBuf::from(trimmed))
}

#[derive(Debug, Clone)]
pub struct ModelLoader {
    canonical_size: f32,
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ModelLoader {
    pub fn new(canonical_size: f32) -> Self {
        Self { canonical_size }
    }

    /// Parses the asset on the blocking pool.
    pub async fn load(&self, url: &str) -> Result<GarmentModel> {
        let path = resolve_asset_path(url)?;
        let source = url.to_string();
        let canonical_size = self.canonical_size;

        tokio::task::spawn_blocking(move || load_gltf(&path, &source, canonical_size))
            .await
            .map_err(|e| TryOnError::asset(url, format!("loader task failed: {}", e)))?
    }

    pub fn load_blocking(&self, url: &str) -> Result<GarmentModel> {
        let path = resolve_asset_path(url)?;
        load_gltf(&path, url, self.canonical_size)
    }
}

fn load_gltf(path: &Path, source: &str, canonical_size: f32) -> Result<GarmentModel> {
    let started = Instant::now();
    let (document, buffers, _images) =
        gltf::import(path).map_err(|e| TryOnError::asset(source, e))?;

    let mut materials: Vec<Material> = document
        .materials()
        .map(|m| Material {
            name: m.name().map(str::to_string),
            base_color: m.pbr_metallic_roughness().base_color_factor(),
        })
        .collect();
    let default_material = materials.len();
    materials.push(Material::default());

    let mut meshes = Vec::new();
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next());
    match scene {
        Some(scene) => {
            for node in scene.nodes() {
                collect_node(&node, Matrix4::identity(), &buffers, default_material, &mut meshes);
            }
        }
        None => {
            // Scene-less files: take every mesh as-is.
            for mesh in document.meshes() {
                collect_mesh(&mesh, &Matrix4::identity(), &buffers, default_material, &mut meshes);
            }
        }
    }

    meshes.retain(|m| m.triangle_count() > 0);
    let bounds = BoundingBox::from_points(meshes.iter().flat_map(|m| m.positions.iter()))
        .ok_or_else(|| TryOnError::asset(source, "asset contains no triangles"))?;

    let extent = bounds.max_extent();
    if !extent.is_finite() || extent <= f32::EPSILON {
        return Err(TryOnError::asset(
            source,
            format!("degenerate bounding box (largest side {})", extent),
        ));
    }

    let normalization = Normalization {
        center: bounds.center(),
        scale: canonical_size / extent,
    };
    for mesh in &mut meshes {
        for p in &mut mesh.positions {
            *p = Point3::from((*p - normalization.center) * normalization.scale);
        }
    }
    let bounds = BoundingBox::from_points(meshes.iter().flat_map(|m| m.positions.iter()))
        .ok_or_else(|| TryOnError::asset(source, "asset contains no triangles"))?;

    let model = GarmentModel {
        source: source.to_string(),
        meshes,
        materials,
        bounds,
        normalization,
    };
    info!(
        "loaded garment {} ({} meshes, {} triangles) in {:?}",
        source,
        model.meshes.len(),
        model.triangle_count(),
        started.elapsed()
    );
    Ok(model)
}

fn collect_node(
    node: &gltf::Node<'_>,
    parent: Matrix4<f32>,
    buffers: &[gltf::buffer::Data],
    default_material: usize,
    out: &mut Vec<GarmentMesh>,
) {
    let world = parent * Matrix4::from(node.transform().matrix());
    if let Some(mesh) = node.mesh() {
        collect_mesh(&mesh, &world, buffers, default_material, out);
    }
    for child in node.children() {
        collect_node(&child, world, buffers, default_material, out);
    }
}

fn collect_mesh(
    mesh: &gltf::Mesh<'_>,
    world: &Matrix4<f32>,
    buffers: &[gltf::buffer::Data],
    default_material: usize,
    out: &mut Vec<GarmentMesh>,
) {
    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            debug!(mesh = ?mesh.name(), mode = ?primitive.mode(), "skipping non-triangle primitive");
            continue;
        }

        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| &d.0[..]));
        let Some(positions) = reader.read_positions() else {
            debug!(mesh = ?mesh.name(), "primitive has no POSITION attribute");
            continue;
        };
        let positions: Vec<Point3<f32>> = positions
            .map(|p| world.transform_point(&Point3::from(p)))
            .collect();

        let indices: Vec<u32> = match reader.read_indices() {
            Some(indices) => indices.into_u32().collect(),
            None => (0..positions.len() as u32).collect(),
        };

        out.push(GarmentMesh {
            positions,
            indices,
            material: primitive.material().index().unwrap_or(default_material),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// One right triangle, instanced by two nodes 4 units apart.
    fn write_test_asset(dir: &Path) -> PathBuf {
        let mut bin = Vec::new();
        for v in [0.0f32, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 4.0, 0.0] {
            bin.extend_from_slice(&v.to_le_bytes());
        }
        for i in [0u16, 1, 2] {
            bin.extend_from_slice(&i.to_le_bytes());
        }
        bin.extend_from_slice(&[0, 0]);
        std::fs::write(dir.join("shirt.bin"), &bin).unwrap();

        let gltf = serde_json::json!({
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "nodes": [0, 1] }],
            "nodes": [
                { "mesh": 0 },
                { "mesh": 0, "translation": [4.0, 0.0, 0.0] }
            ],
            "meshes": [{
                "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 }]
            }],
            "materials": [{
                "name": "cotton",
                "pbrMetallicRoughness": { "baseColorFactor": [0.2, 0.3, 0.8, 1.0] }
            }],
            "buffers": [{ "uri": "shirt.bin", "byteLength": bin.len() }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
            ],
            "accessors": [
                {
                    "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                    "min": [0.0, 0.0, 0.0], "max": [2.0, 4.0, 0.0]
                },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
            ]
        });
        let path = dir.join("shirt.gltf");
        std::fs::write(&path, serde_json::to_vec_pretty(&gltf).unwrap()).unwrap();
        path
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fitting_room_model_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rejects_remote_urls() {
        let err = resolve_asset_path("https://cdn.example/shirt.glb").unwrap_err();
        assert!(matches!(err, TryOnError::AssetLoadFailure { .. }));
        assert_eq!(
            resolve_asset_path("file:///tmp/my%20shirt.glb").unwrap(),
            PathBuf::from("/tmp/my shirt.glb")
        );
        assert_eq!(
            resolve_asset_path("assets/shirt.glb").unwrap(),
            PathBuf::from("assets/shirt.glb")
        );
    }

    #[test]
    fn flattens_and_normalizes() {
        let dir = temp_dir();
        let path = write_test_asset(&dir);

        let model = ModelLoader::default()
            .load_blocking(path.to_str().unwrap())
            .unwrap();

        assert_eq!(model.meshes.len(), 2);
        assert_eq!(model.triangle_count(), 2);
        assert_relative_eq!(model.normalization.scale, 1.0 / 6.0);
        assert_relative_eq!(model.bounds.max_extent(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(model.bounds.center().coords.norm(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(model.bounds.size().y, 4.0 / 6.0, epsilon = 1e-6);
        assert_eq!(model.material(model.meshes[0].material).name.as_deref(), Some("cotton"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn async_load_reports_missing_file() {
        let err = ModelLoader::default()
            .load("does/not/exist.glb")
            .await
            .unwrap_err();
        assert!(matches!(err, TryOnError::AssetLoadFailure { .. }));
    }
}
