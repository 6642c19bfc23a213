use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeMap};
use serde_json::{Map, Value};

pub const LIGHTMAP_EXTENSION: &str = "MOZ_lightmap";
pub const BASIS_EXTENSION: &str = "MOZ_HUBS_texture_basis";
pub const KTX2_EXTENSION: &str = "KHR_texture_basisu";

/// Payload of the vendor lightmap extension attached to a material.
#[derive(Debug, Clone, PartialEq)]
pub struct LightmapInfo {
    pub intensity: f64,
    /// Texture index of the lightmap.
    pub index: usize,
    /// UV channel the lightmap samples.
    pub tex_coord: u32,
    /// Any other keys of the payload (`extras`, nested `extensions`).
    pub extra: Map<String, Value>,
}

impl Default for LightmapInfo {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            index: 0,
            tex_coord: 0,
            extra: Map::new(),
        }
    }
}

/// Payload of a compressed-texture source extension. `source` is an image index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressedSource {
    pub source: usize,
    pub extra: Map<String, Value>,
}

/// A single extension payload, selected by its key at parse time.
///
/// Names outside the known set, and known names whose payload does not have
/// the expected shape, are kept as `Opaque` and written back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Extension {
    Lightmap(LightmapInfo),
    BasisSource(CompressedSource),
    Ktx2Source(CompressedSource),
    Opaque(Value),
}

impl Extension {
    pub fn from_json(name: &str, value: Value) -> Self {
        let parsed = match name {
            LIGHTMAP_EXTENSION => parse_lightmap(&value).map(Extension::Lightmap),
            BASIS_EXTENSION => parse_compressed_source(&value).map(Extension::BasisSource),
            KTX2_EXTENSION => parse_compressed_source(&value).map(Extension::Ktx2Source),
            _ => None,
        };

        parsed.unwrap_or(Extension::Opaque(value))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Extension::Lightmap(info) => {
                let mut object = Map::new();
                object.insert("intensity".to_string(), Value::from(info.intensity));
                object.insert("index".to_string(), Value::from(info.index));
                object.insert("texCoord".to_string(), Value::from(info.tex_coord));
                object.extend(info.extra.clone());
                Value::Object(object)
            }
            Extension::BasisSource(source) | Extension::Ktx2Source(source) => {
                let mut object = Map::new();
                object.insert("source".to_string(), Value::from(source.source));
                object.extend(source.extra.clone());
                Value::Object(object)
            }
            Extension::Opaque(value) => value.clone(),
        }
    }

    /// Image index carried by a compressed-source payload.
    pub fn compressed_source(&self) -> Option<usize> {
        match self {
            Extension::BasisSource(source) | Extension::Ktx2Source(source) => Some(source.source),
            _ => None,
        }
    }
}

fn parse_lightmap(value: &Value) -> Option<LightmapInfo> {
    let mut object = value.as_object()?.clone();
    let mut info = LightmapInfo::default();

    if let Some(intensity) = object.remove("intensity") {
        info.intensity = intensity.as_f64()?;
    }
    if let Some(index) = object.remove("index") {
        info.index = usize::try_from(index.as_u64()?).ok()?;
    }
    if let Some(tex_coord) = object.remove("texCoord") {
        info.tex_coord = u32::try_from(tex_coord.as_u64()?).ok()?;
    }
    info.extra = object;

    Some(info)
}

fn parse_compressed_source(value: &Value) -> Option<CompressedSource> {
    let mut object = value.as_object()?.clone();
    let source = match object.remove("source") {
        Some(source) => usize::try_from(source.as_u64()?).ok()?,
        None => 0,
    };

    Some(CompressedSource {
        source,
        extra: object,
    })
}

/// The `extensions` object of a texture or material.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtensionMap(BTreeMap<String, Extension>);

impl ExtensionMap {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&Extension> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Extension> {
        self.0.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, extension: Extension) -> Option<Extension> {
        self.0.insert(name.into(), extension)
    }

    pub fn remove(&mut self, name: &str) -> Option<Extension> {
        self.0.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Extension)> {
        self.0.iter().map(|(name, extension)| (name.as_str(), extension))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Extension)> {
        self.0
            .iter_mut()
            .map(|(name, extension)| (name.as_str(), extension))
    }

    pub fn lightmap(&self) -> Option<&LightmapInfo> {
        match self.0.get(LIGHTMAP_EXTENSION) {
            Some(Extension::Lightmap(info)) => Some(info),
            _ => None,
        }
    }

    pub fn lightmap_mut(&mut self) -> Option<&mut LightmapInfo> {
        match self.0.get_mut(LIGHTMAP_EXTENSION) {
            Some(Extension::Lightmap(info)) => Some(info),
            _ => None,
        }
    }

    /// First compressed-source image index found, if any.
    pub fn compressed_source(&self) -> Option<usize> {
        self.0.values().find_map(Extension::compressed_source)
    }
}

impl Serialize for ExtensionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, extension) in &self.0 {
            map.serialize_entry(name, &extension.to_json())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ExtensionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        Ok(ExtensionMap(
            raw.into_iter()
                .map(|(name, value)| {
                    let extension = Extension::from_json(&name, value);
                    (name, extension)
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn given_empty_lightmap_payload_when_parsing_then_defaults_apply() {
        let extension = Extension::from_json(LIGHTMAP_EXTENSION, json!({}));

        assert_eq!(extension, Extension::Lightmap(LightmapInfo::default()));
        assert_eq!(
            extension.to_json(),
            json!({ "intensity": 1.0, "index": 0, "texCoord": 0 })
        );
    }

    #[test]
    fn given_lightmap_payload_when_parsing_then_fields_are_read() {
        let extension = Extension::from_json(
            LIGHTMAP_EXTENSION,
            json!({ "intensity": 0.5, "index": 3, "texCoord": 1 }),
        );

        let Extension::Lightmap(info) = extension else {
            panic!("expected lightmap payload");
        };
        assert_eq!(info.intensity, 0.5);
        assert_eq!(info.index, 3);
        assert_eq!(info.tex_coord, 1);
    }

    #[test]
    fn given_lightmap_with_extras_when_round_tripping_then_extra_keys_survive() {
        let payload = json!({
            "intensity": 0.25,
            "index": 1,
            "texCoord": 1,
            "extras": { "baked": "2024" },
            "extensions": { "EXT_vendor": { "a": 1 } }
        });

        let extension = Extension::from_json(LIGHTMAP_EXTENSION, payload.clone());

        let Extension::Lightmap(info) = &extension else {
            panic!("expected lightmap payload");
        };
        assert_eq!(info.index, 1);
        assert_eq!(info.extra.len(), 2);
        assert_eq!(extension.to_json(), payload);
    }

    #[test]
    fn given_compressed_source_with_extras_when_round_tripping_then_extra_keys_survive() {
        let payload = json!({ "source": 2, "extras": { "note": "kept" } });

        let extension = Extension::from_json(KTX2_EXTENSION, payload.clone());

        assert_eq!(extension.compressed_source(), Some(2));
        assert_eq!(extension.to_json(), payload);
    }

    #[test]
    fn given_basis_and_ktx2_payloads_when_parsing_then_variants_differ_by_name() {
        let basis = Extension::from_json(BASIS_EXTENSION, json!({ "source": 4 }));
        let ktx2 = Extension::from_json(KTX2_EXTENSION, json!({ "source": 4 }));

        let payload = CompressedSource {
            source: 4,
            ..CompressedSource::default()
        };
        assert_eq!(basis, Extension::BasisSource(payload.clone()));
        assert_eq!(ktx2, Extension::Ktx2Source(payload));
        assert_ne!(basis, ktx2);
        assert_eq!(basis.compressed_source(), Some(4));
    }

    #[test]
    fn given_unknown_extension_when_round_tripping_then_payload_is_unchanged() {
        let payload = json!({ "offset": [0.5, 0.5], "nested": { "flag": true } });
        let extension = Extension::from_json("KHR_texture_transform", payload.clone());

        assert_eq!(extension, Extension::Opaque(payload.clone()));
        assert_eq!(extension.to_json(), payload);
    }

    #[test]
    fn given_known_name_with_unexpected_shape_when_parsing_then_payload_is_kept_opaque() {
        let extension = Extension::from_json(LIGHTMAP_EXTENSION, json!({ "index": "three" }));

        assert_eq!(extension, Extension::Opaque(json!({ "index": "three" })));
    }

    #[test]
    fn given_extension_object_when_deserializing_map_then_entries_are_dispatched() {
        let map: ExtensionMap = serde_json::from_value(json!({
            "MOZ_lightmap": { "index": 2 },
            "EXT_vendor": { "a": 1 }
        }))
        .expect("extension map should deserialize");

        assert_eq!(map.len(), 2);
        assert_eq!(map.lightmap().map(|info| info.index), Some(2));
        assert!(matches!(map.get("EXT_vendor"), Some(Extension::Opaque(_))));

        let written = serde_json::to_value(&map).expect("extension map should serialize");
        assert_eq!(written["EXT_vendor"], json!({ "a": 1 }));
        assert_eq!(written["MOZ_lightmap"]["intensity"], json!(1.0));
    }
}
