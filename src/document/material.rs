use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extension::ExtensionMap;

/// The material channel a texture serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapType {
    Diffuse,
    Normal,
    Lightmap,
    MetallicRoughness,
    Emissive,
    Occlusion,
}

impl MapType {
    pub const ALL: [MapType; 6] = [
        MapType::Diffuse,
        MapType::Normal,
        MapType::Lightmap,
        MapType::MetallicRoughness,
        MapType::Emissive,
        MapType::Occlusion,
    ];

    /// Channels that carry data rather than color.
    pub fn is_linear(self) -> bool {
        matches!(
            self,
            MapType::Normal | MapType::MetallicRoughness | MapType::Occlusion
        )
    }
}

impl FromStr for MapType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "diffuse" | "base_color" => Ok(MapType::Diffuse),
            "normal" => Ok(MapType::Normal),
            "lightmap" => Ok(MapType::Lightmap),
            "metallic_roughness" => Ok(MapType::MetallicRoughness),
            "emissive" => Ok(MapType::Emissive),
            "occlusion" => Ok(MapType::Occlusion),
            other => Err(format!("unknown map type '{other}'")),
        }
    }
}

/// A `textureInfo` object; everything besides `index` is carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureRef {
    pub index: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TextureRef {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbrMetallicRoughness {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_color_texture: Option<TextureRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metallic_roughness_texture: Option<TextureRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pbr_metallic_roughness: Option<PbrMetallicRoughness>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_texture: Option<TextureRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occlusion_texture: Option<TextureRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emissive_texture: Option<TextureRef>,
    #[serde(default, skip_serializing_if = "ExtensionMap::is_empty")]
    pub extensions: ExtensionMap,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Material {
    /// Texture indices this material references, in `MapType::ALL` order.
    pub fn texture_slots(&self) -> Vec<(MapType, usize)> {
        let pbr = self.pbr_metallic_roughness.as_ref();
        [
            (
                MapType::Diffuse,
                pbr.and_then(|pbr| pbr.base_color_texture.as_ref())
                    .map(|texture| texture.index),
            ),
            (
                MapType::Normal,
                self.normal_texture.as_ref().map(|texture| texture.index),
            ),
            (
                MapType::Lightmap,
                self.extensions.lightmap().map(|info| info.index),
            ),
            (
                MapType::MetallicRoughness,
                pbr.and_then(|pbr| pbr.metallic_roughness_texture.as_ref())
                    .map(|texture| texture.index),
            ),
            (
                MapType::Emissive,
                self.emissive_texture.as_ref().map(|texture| texture.index),
            ),
            (
                MapType::Occlusion,
                self.occlusion_texture.as_ref().map(|texture| texture.index),
            ),
        ]
        .into_iter()
        .filter_map(|(map_type, index)| index.map(|index| (map_type, index)))
        .collect()
    }

    /// Mutable handles to every texture index this material references.
    /// Empty slots are skipped.
    pub fn texture_slots_mut(&mut self) -> Vec<(MapType, &mut usize)> {
        let mut slots = Vec::with_capacity(MapType::ALL.len());

        if let Some(pbr) = self.pbr_metallic_roughness.as_mut() {
            if let Some(texture) = pbr.base_color_texture.as_mut() {
                slots.push((MapType::Diffuse, &mut texture.index));
            }
            if let Some(texture) = pbr.metallic_roughness_texture.as_mut() {
                slots.push((MapType::MetallicRoughness, &mut texture.index));
            }
        }
        if let Some(texture) = self.normal_texture.as_mut() {
            slots.push((MapType::Normal, &mut texture.index));
        }
        if let Some(info) = self.extensions.lightmap_mut() {
            slots.push((MapType::Lightmap, &mut info.index));
        }
        if let Some(texture) = self.emissive_texture.as_mut() {
            slots.push((MapType::Emissive, &mut texture.index));
        }
        if let Some(texture) = self.occlusion_texture.as_mut() {
            slots.push((MapType::Occlusion, &mut texture.index));
        }

        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn given_material_with_all_channels_when_listing_slots_then_six_slots_in_order() {
        let material: Material = serde_json::from_value(json!({
            "pbrMetallicRoughness": {
                "baseColorTexture": { "index": 0 },
                "metallicRoughnessTexture": { "index": 3 },
                "metallicFactor": 0.0
            },
            "normalTexture": { "index": 1, "scale": 0.5 },
            "emissiveTexture": { "index": 4 },
            "occlusionTexture": { "index": 5, "strength": 0.8 },
            "extensions": { "MOZ_lightmap": { "index": 2, "intensity": 2.0 } }
        }))
        .expect("material should deserialize");

        let slots = material.texture_slots();
        assert_eq!(
            slots,
            vec![
                (MapType::Diffuse, 0),
                (MapType::Normal, 1),
                (MapType::Lightmap, 2),
                (MapType::MetallicRoughness, 3),
                (MapType::Emissive, 4),
                (MapType::Occlusion, 5),
            ]
        );
    }

    #[test]
    fn given_sparse_material_when_mutating_slots_then_only_present_fields_change() {
        let mut material: Material = serde_json::from_value(json!({
            "name": "wood",
            "normalTexture": { "index": 7, "scale": 0.5 }
        }))
        .expect("material should deserialize");

        for (_, index) in material.texture_slots_mut() {
            *index = 1;
        }

        let written = serde_json::to_value(&material).expect("material should serialize");
        assert_eq!(
            written,
            json!({ "name": "wood", "normalTexture": { "index": 1, "scale": 0.5 } })
        );
    }

    #[test]
    fn given_map_types_when_checking_linearity_then_color_maps_are_not_linear() {
        assert!(!MapType::Diffuse.is_linear());
        assert!(!MapType::Emissive.is_linear());
        assert!(!MapType::Lightmap.is_linear());
        assert!(MapType::Normal.is_linear());
        assert!(MapType::MetallicRoughness.is_linear());
        assert!(MapType::Occlusion.is_linear());
    }

    #[test]
    fn given_cli_spellings_when_parsing_map_types_then_variants_match() {
        assert_eq!("metallic-roughness".parse::<MapType>(), Ok(MapType::MetallicRoughness));
        assert_eq!("Base_Color".parse::<MapType>(), Ok(MapType::Diffuse));
        assert_eq!("lightmap".parse::<MapType>(), Ok(MapType::Lightmap));
        assert!("specular".parse::<MapType>().is_err());
    }
}
