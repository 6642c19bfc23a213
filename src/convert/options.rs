use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::document::{BASIS_EXTENSION, KTX2_EXTENSION, MapType};

/// Compressed container the encoder writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    #[default]
    Basis,
    Ktx2,
}

impl TextureFormat {
    /// Texture extension that points at images of this format.
    pub fn extension_name(self) -> &'static str {
        match self {
            TextureFormat::Basis => BASIS_EXTENSION,
            TextureFormat::Ktx2 => KTX2_EXTENSION,
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            TextureFormat::Basis => "basis",
            TextureFormat::Ktx2 => "ktx2",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            TextureFormat::Basis => "image/basis",
            TextureFormat::Ktx2 => "image/ktx2",
        }
    }

    /// True when an image with this MIME type is already in a compressed format.
    pub fn is_compressed_mime(mime_type: &str) -> bool {
        [TextureFormat::Basis, TextureFormat::Ktx2]
            .iter()
            .any(|format| format.mime_type() == mime_type)
    }
}

impl FromStr for TextureFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "basis" => Ok(TextureFormat::Basis),
            "ktx2" => Ok(TextureFormat::Ktx2),
            other => Err(format!("unknown texture format '{other}' (expected basis or ktx2)")),
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_extension())
    }
}

/// Basis Universal codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubFormat {
    #[default]
    Etc1s,
    Uastc,
}

impl SubFormat {
    pub fn quality_range(self) -> (u32, u32) {
        match self {
            SubFormat::Etc1s => (0, 255),
            SubFormat::Uastc => (0, 4),
        }
    }

    pub fn rdo_threshold_range(self) -> (f32, f32) {
        match self {
            SubFormat::Etc1s => (1.0, 2.0),
            SubFormat::Uastc => (0.2, 3.0),
        }
    }

    pub fn default_quality(self) -> u32 {
        self.quality_range().1
    }

    pub fn default_rdo_threshold(self) -> f32 {
        match self {
            SubFormat::Etc1s => 1.05,
            SubFormat::Uastc => 0.75,
        }
    }
}

impl FromStr for SubFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "etc1s" => Ok(SubFormat::Etc1s),
            "uastc" => Ok(SubFormat::Uastc),
            other => Err(format!("unknown sub-format '{other}' (expected etc1s or uastc)")),
        }
    }
}

pub const COMPRESSION_LEVEL_RANGE: (u32, u32) = (1, 5);

/// Which material channels are eligible for conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapToggles {
    pub diffuse: bool,
    pub normal: bool,
    pub lightmap: bool,
    pub metallic_roughness: bool,
    pub emissive: bool,
    pub occlusion: bool,
}

impl Default for MapToggles {
    fn default() -> Self {
        Self {
            diffuse: true,
            normal: true,
            lightmap: true,
            metallic_roughness: true,
            emissive: true,
            occlusion: true,
        }
    }
}

impl MapToggles {
    pub fn enabled(&self, map_type: MapType) -> bool {
        match map_type {
            MapType::Diffuse => self.diffuse,
            MapType::Normal => self.normal,
            MapType::Lightmap => self.lightmap,
            MapType::MetallicRoughness => self.metallic_roughness,
            MapType::Emissive => self.emissive,
            MapType::Occlusion => self.occlusion,
        }
    }

    pub fn set(&mut self, map_type: MapType, enabled: bool) {
        let slot = match map_type {
            MapType::Diffuse => &mut self.diffuse,
            MapType::Normal => &mut self.normal,
            MapType::Lightmap => &mut self.lightmap,
            MapType::MetallicRoughness => &mut self.metallic_roughness,
            MapType::Emissive => &mut self.emissive,
            MapType::Occlusion => &mut self.occlusion,
        };
        *slot = enabled;
    }
}

/// Texture conversion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    pub format: TextureFormat,
    pub sub_format: SubFormat,
    /// Encoder quality; the sub-format's default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    /// Rate-distortion threshold; the sub-format's default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdo_threshold: Option<f32>,
    pub compression_level: u32,
    pub preserve_alpha: bool,
    /// Use an existing compressed file next to the source instead of re-encoding.
    pub reuse_existing: bool,
    pub map_toggles: MapToggles,
    pub multithreading: bool,
    /// Upper bound on encoder processes running at once.
    pub concurrency_limit: usize,
    /// Explicit encoder executable; looked up on `PATH` when unset.
    pub encoder_path: Option<PathBuf>,
    /// Image URIs or names that are never converted.
    pub excluded_images: Vec<String>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            format: TextureFormat::default(),
            sub_format: SubFormat::default(),
            quality: None,
            rdo_threshold: None,
            compression_level: COMPRESSION_LEVEL_RANGE.0,
            preserve_alpha: false,
            reuse_existing: false,
            map_toggles: MapToggles::default(),
            multithreading: true,
            concurrency_limit: 4,
            encoder_path: None,
            excluded_images: Vec::new(),
        }
    }
}

impl ConvertOptions {
    /// Clamp numeric settings into the ranges valid for the chosen sub-format
    /// and fill unset quality and threshold from its defaults.
    pub fn normalized(&self) -> Self {
        Self {
            quality: Some(self.quality()),
            rdo_threshold: Some(self.rdo_threshold()),
            compression_level: self
                .compression_level
                .clamp(COMPRESSION_LEVEL_RANGE.0, COMPRESSION_LEVEL_RANGE.1),
            concurrency_limit: self.concurrency_limit.max(1),
            ..self.clone()
        }
    }

    /// Quality passed to the encoder, within the sub-format's range.
    pub fn quality(&self) -> u32 {
        let (min, max) = self.sub_format.quality_range();
        self.quality
            .unwrap_or_else(|| self.sub_format.default_quality())
            .clamp(min, max)
    }

    /// Threshold passed to the encoder, within the sub-format's range.
    pub fn rdo_threshold(&self) -> f32 {
        let (min, max) = self.sub_format.rdo_threshold_range();
        match self.rdo_threshold {
            Some(threshold) if threshold.is_finite() => threshold.clamp(min, max),
            _ => self.sub_format.default_rdo_threshold(),
        }
    }

    /// Effective number of encoder processes allowed at once.
    pub fn worker_count(&self) -> usize {
        if self.multithreading {
            self.concurrency_limit.max(1)
        } else {
            1
        }
    }

    pub fn is_excluded(&self, uri: Option<&str>, name: Option<&str>) -> bool {
        self.excluded_images.iter().any(|excluded| {
            Some(excluded.as_str()) == uri || Some(excluded.as_str()) == name
        })
    }
}
