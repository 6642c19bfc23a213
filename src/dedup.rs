//! Texture deduplication.
//!
//! Textures with identical content collapse onto the first occurrence and
//! every material reference is rewritten through a single remap table, so no
//! index is adjusted twice.

use serde::Serialize;
use serde_json::Value;

use crate::document::{Document, Extension};

/// Outcome of a deduplication pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupSummary {
    pub textures_before: usize,
    pub textures_after: usize,
    /// New index of each original texture.
    pub remap: Vec<usize>,
}

impl DedupSummary {
    pub fn removed(&self) -> usize {
        self.textures_before - self.textures_after
    }
}

/// Remove duplicate textures and rewrite material references to the survivors.
pub fn dedupe_textures(document: &mut Document) -> DedupSummary {
    let before = document.textures.len();
    for (index, texture) in document.textures.iter_mut().enumerate() {
        texture.original_index = Some(index);
    }

    // representative[i] is the original index of the texture `i` collapses onto.
    let mut representative: Vec<Option<usize>> = vec![None; before];
    for i in 0..before {
        if representative[i].is_some() {
            continue;
        }
        representative[i] = Some(i);
        for j in i + 1..before {
            if representative[j].is_none()
                && document.textures[i].same_content(&document.textures[j])
            {
                representative[j] = Some(i);
            }
        }
    }
    let representative: Vec<usize> = representative
        .into_iter()
        .enumerate()
        .map(|(index, rep)| rep.unwrap_or(index))
        .collect();

    document
        .textures
        .retain(|texture| texture.original_index.is_some_and(|i| representative[i] == i));

    let remap: Vec<usize> = representative
        .iter()
        .map(|rep| {
            document
                .textures
                .iter()
                .position(|texture| texture.original_index == Some(*rep))
                .unwrap_or(*rep)
        })
        .collect();

    if document.textures.len() != before {
        for material in &mut document.materials {
            for (_, index) in material.texture_slots_mut() {
                if let Some(new_index) = remap.get(*index) {
                    *index = *new_index;
                }
            }
            for (_, extension) in material.extensions.iter_mut() {
                if let Extension::Opaque(value) = extension {
                    remap_texture_infos(value, &remap);
                }
            }
            remap_texture_infos_in_map(&mut material.extra, &remap);
        }

        log::info!(
            "deduplicated textures: {} -> {}",
            before,
            document.textures.len()
        );
    }

    DedupSummary {
        textures_before: before,
        textures_after: document.textures.len(),
        remap,
    }
}

/// Rewrite `index` inside every `*Texture` object nested in an extension
/// payload the document model does not interpret.
fn remap_texture_infos(value: &mut Value, remap: &[usize]) {
    match value {
        Value::Object(map) => remap_texture_infos_in_map(map, remap),
        Value::Array(items) => {
            for item in items {
                remap_texture_infos(item, remap);
            }
        }
        _ => {}
    }
}

fn remap_texture_infos_in_map(map: &mut serde_json::Map<String, Value>, remap: &[usize]) {
    for (key, value) in map.iter_mut() {
        if key.ends_with("Texture")
            && let Some(index) = value.get_mut("index")
            && let Some(old) = index.as_u64()
            && let Some(new) = usize::try_from(old).ok().and_then(|old| remap.get(old))
        {
            *index = Value::from(*new);
            continue;
        }
        remap_texture_infos(value, remap);
    }
}
