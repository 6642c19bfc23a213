//! In-memory glTF document.
//!
//! Every cross-reference is an index into one of the document's own arrays.
//! Fields this crate does not interpret are kept in `extra` maps and written
//! back unchanged.

mod extension;
mod io;
mod material;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub use extension::{
    BASIS_EXTENSION, CompressedSource, Extension, ExtensionMap, KTX2_EXTENSION,
    LIGHTMAP_EXTENSION, LightmapInfo,
};
pub use io::{LoadedAsset, load_asset, parse, parse_with_binary, read_resource, serialize};
pub use material::{MapType, Material, PbrMetallicRoughness, TextureRef};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_view: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Image {
    pub fn is_data_uri(&self) -> bool {
        self.uri
            .as_deref()
            .is_some_and(|uri| uri.starts_with("data:"))
    }

    /// Human-readable label used in logs and reports.
    pub fn label(&self, index: usize) -> String {
        self.uri
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("image #{index}"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Texture {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<usize>,
    #[serde(default, skip_serializing_if = "ExtensionMap::is_empty")]
    pub extensions: ExtensionMap,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// Position before deduplication. Never serialized.
    #[serde(skip)]
    pub original_index: Option<usize>,
}

impl Texture {
    /// Image this texture samples, looking through compressed-source
    /// extensions once `source` has been cleared.
    pub fn image_index(&self) -> Option<usize> {
        self.source.or_else(|| self.extensions.compressed_source())
    }

    /// Structural equality ignoring the transient `original_index` tag.
    pub fn same_content(&self, other: &Texture) -> bool {
        self.sampler == other.sampler
            && self.source == other.source
            && self.name == other.name
            && self.extensions == other.extensions
            && self.extra == other.extra
    }
}

macro_rules! gl_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "u32", into = "u32")]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<u32> for $name {
            type Error = String;

            fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!("invalid {} value {}", stringify!($name), other)),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value as u32
            }
        }
    };
}

gl_enum!(MagFilter {
    Nearest = 9728,
    Linear = 9729,
});

gl_enum!(MinFilter {
    Nearest = 9728,
    Linear = 9729,
    NearestMipmapNearest = 9984,
    LinearMipmapNearest = 9985,
    NearestMipmapLinear = 9986,
    LinearMipmapLinear = 9987,
});

gl_enum!(WrapMode {
    ClampToEdge = 33071,
    MirroredRepeat = 33648,
    Repeat = 10497,
});

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sampler {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mag_filter: Option<MagFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_filter: Option<MinFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_s: Option<WrapMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_t: Option<WrapMode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Sampler {
    /// Sampler installed at index 0 when converted textures need one and the
    /// source document has none.
    pub fn export_default() -> Self {
        Self {
            mag_filter: Some(MagFilter::Linear),
            min_filter: Some(MinFilter::Nearest),
            wrap_s: Some(WrapMode::Repeat),
            wrap_t: Some(WrapMode::Repeat),
            ..Self::default()
        }
    }
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferView {
    pub buffer: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub byte_offset: u64,
    pub byte_length: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffer {
    pub byte_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Root of a glTF document.
///
/// Only the arrays touched by texture handling are modelled; `asset`, `nodes`,
/// `meshes`, `accessors` and every other top-level key live in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions_required: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub textures: Vec<Texture>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samplers: Vec<Sampler>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<Material>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffer_views: Vec<BufferView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<Buffer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// True when the document was read from (or is destined for) a GLB container.
    #[serde(skip)]
    pub is_glb: bool,
}

impl Document {
    /// Record an extension name in `extensionsUsed`, and in
    /// `extensionsRequired` when `required` is set.
    pub fn declare_extension(&mut self, name: &str, required: bool) {
        if !self.extensions_used.iter().any(|used| used == name) {
            self.extensions_used.push(name.to_string());
        }
        if required && !self.extensions_required.iter().any(|req| req == name) {
            self.extensions_required.push(name.to_string());
        }
    }

    /// Guarantee that sampler index 0 exists and return it.
    pub fn ensure_default_sampler(&mut self) -> usize {
        if self.samplers.is_empty() {
            self.samplers.push(Sampler::export_default());
        }
        0
    }

    /// Image index reached through a texture index.
    pub fn texture_image(&self, texture_index: usize) -> Option<usize> {
        self.textures
            .get(texture_index)
            .and_then(Texture::image_index)
    }

    /// The map type each image serves, taken from the first material channel
    /// that reaches it. Images no material reaches are absent.
    pub fn image_map_types(&self) -> BTreeMap<usize, MapType> {
        let mut map_types = BTreeMap::new();
        for material in &self.materials {
            for (map_type, texture_index) in material.texture_slots() {
                if let Some(image_index) = self.texture_image(texture_index) {
                    map_types.entry(image_index).or_insert(map_type);
                }
            }
        }
        map_types
    }

    /// For every material, the image each of its channels resolves to.
    pub fn material_image_bindings(&self) -> Vec<Vec<(MapType, Option<usize>)>> {
        self.materials
            .iter()
            .map(|material| {
                material
                    .texture_slots()
                    .into_iter()
                    .map(|(map_type, texture_index)| {
                        (map_type, self.texture_image(texture_index))
                    })
                    .collect()
            })
            .collect()
    }

    /// Every extension name that appears on a texture or material.
    pub fn extension_names_in_use(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .textures
            .iter()
            .flat_map(|texture| texture.extensions.names())
            .chain(
                self.materials
                    .iter()
                    .flat_map(|material| material.extensions.names()),
            )
            .map(ToOwned::to_owned)
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Check that every index reference resolves inside this document.
    pub fn validate_references(&self) -> Result<()> {
        for (index, texture) in self.textures.iter().enumerate() {
            if let Some(sampler) = texture.sampler {
                check_index("texture", index, "sampler", sampler, self.samplers.len())?;
            }
            if let Some(source) = texture.source {
                check_index("texture", index, "source", source, self.images.len())?;
            }
            for (name, extension) in texture.extensions.iter() {
                if let Some(source) = extension.compressed_source() {
                    check_index("texture", index, name, source, self.images.len())?;
                }
            }
        }

        for (index, image) in self.images.iter().enumerate() {
            if let Some(view) = image.buffer_view {
                check_index("image", index, "bufferView", view, self.buffer_views.len())?;
            }
        }

        for (index, view) in self.buffer_views.iter().enumerate() {
            check_index("bufferView", index, "buffer", view.buffer, self.buffers.len())?;
            let buffer_length = self.buffers[view.buffer].byte_length;
            let end = view.byte_offset.checked_add(view.byte_length);
            if end.is_none_or(|end| end > buffer_length) {
                return Err(Error::format(format!(
                    "bufferView {index} (offset {}, length {}) exceeds buffer {} of {buffer_length} bytes",
                    view.byte_offset, view.byte_length, view.buffer
                )));
            }
        }

        for (index, material) in self.materials.iter().enumerate() {
            for (map_type, texture) in material.texture_slots() {
                let field = format!("{map_type:?} texture");
                check_index("material", index, &field, texture, self.textures.len())?;
            }
        }

        Ok(())
    }

    /// Check the invariants a document must satisfy right before packaging.
    pub fn validate_for_packaging(&self) -> Result<()> {
        self.validate_references()?;

        for (index, image) in self.images.iter().enumerate() {
            if image.uri.is_some() == image.buffer_view.is_some() {
                return Err(Error::format(format!(
                    "image {index} must reference exactly one of uri or bufferView"
                )));
            }
        }

        for name in self.extension_names_in_use() {
            if !self.extensions_used.contains(&name) {
                return Err(Error::format(format!(
                    "extension {name} is used but missing from extensionsUsed"
                )));
            }
        }
        if let Some(name) = self
            .extensions_required
            .iter()
            .find(|name| !self.extensions_used.contains(name))
        {
            return Err(Error::format(format!(
                "extension {name} is required but missing from extensionsUsed"
            )));
        }

        Ok(())
    }

    /// Summary of the texture-related arrays, as printed by `inspect`.
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "isGlb": self.is_glb,
            "extensionsUsed": self.extensions_used,
            "extensionsRequired": self.extensions_required,
            "textures": self.textures,
            "samplers": self.samplers,
            "images": self.images,
            "buffers": self.buffers,
            "materials": self.materials.len(),
            "bufferViews": self.buffer_views.len(),
        })
    }
}

fn check_index(
    owner: &str,
    owner_index: usize,
    field: &str,
    index: usize,
    len: usize,
) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(Error::format(format!(
            "{owner} {owner_index} {field} index {index} is out of range (len {len})"
        )))
    }
}
