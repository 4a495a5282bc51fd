// src/garment.rs - Garment metadata supplied by the product catalog
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Result, TryOnError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClothingCategory {
    Shirt,
    Jacket,
    Pants,
    Dress,
    Accessory,
}

/// The body region a category is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRegion {
    Torso,
    Legs,
    FullBody,
    Neck,
}

impl ClothingCategory {
    pub const ALL: [ClothingCategory; 5] = [
        ClothingCategory::Shirt,
        ClothingCategory::Jacket,
        ClothingCategory::Pants,
        ClothingCategory::Dress,
        ClothingCategory::Accessory,
    ];

    pub fn region(self) -> BodyRegion {
        match self {
            ClothingCategory::Shirt | ClothingCategory::Jacket => BodyRegion::Torso,
            ClothingCategory::Pants => BodyRegion::Legs,
            ClothingCategory::Dress => BodyRegion::FullBody,
            ClothingCategory::Accessory => BodyRegion::Neck,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ClothingCategory::Shirt => "Shirt",
            ClothingCategory::Jacket => "Jacket",
            ClothingCategory::Pants => "Pants",
            ClothingCategory::Dress => "Dress",
            ClothingCategory::Accessory => "Accessory",
        }
    }
}

impl fmt::Display for ClothingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Product record handed over by the catalog when a try-on starts.
///
/// The category is authoritative metadata; nothing here looks at the asset URL to guess it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarmentRecord {
    pub model_asset_url: String,
    pub category: ClothingCategory,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
}

impl GarmentRecord {
    pub fn new(model_asset_url: impl Into<String>, category: ClothingCategory) -> Self {
        Self {
            model_asset_url: model_asset_url.into(),
            category,
            name: None,
            sku: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TryOnError::Config(format!("invalid garment record: {}", e)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TryOnError::Config(format!("cannot read garment record {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.model_asset_url)
    }
}

/// Empirical per-category fit heuristics.
///
/// Ratios multiply the measured body dimension (already converted to scene units) to get the
/// garment's scale on each axis. `vertical_offset` moves the anchor down (positive) or up
/// (negative) as a fraction of the category's primary length, because the visual anchor of the
/// garment differs from the tracked anatomical centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitProfile {
    pub width_ratio: f32,
    pub height_ratio: f32,
    pub depth_ratio: f32,
    pub vertical_offset: f32,
}

impl FitProfile {
    pub fn for_category(category: ClothingCategory) -> Self {
        match category {
            // Wider than measured so the shirt reads as worn, not skin-tight.
            ClothingCategory::Shirt => FitProfile {
                width_ratio: 1.4,
                height_ratio: 1.2,
                depth_ratio: 0.6,
                vertical_offset: 0.5,
            },
            ClothingCategory::Jacket => FitProfile {
                width_ratio: 1.55,
                height_ratio: 1.3,
                depth_ratio: 0.7,
                // Collar rides just above the shoulder line.
                vertical_offset: -0.05,
            },
            ClothingCategory::Pants => FitProfile {
                width_ratio: 1.25,
                height_ratio: 1.05,
                depth_ratio: 0.6,
                vertical_offset: 0.55,
            },
            ClothingCategory::Dress => FitProfile {
                width_ratio: 1.35,
                height_ratio: 1.1,
                depth_ratio: 0.6,
                vertical_offset: 0.3,
            },
            ClothingCategory::Accessory => FitProfile {
                width_ratio: 0.9,
                height_ratio: 0.9,
                depth_ratio: 0.5,
                vertical_offset: 0.0,
            },
        }
    }
}
