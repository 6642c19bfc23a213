use std::{
    fs, io,
    path::{Path, PathBuf},
};

use super::{Buffer, Document};
use crate::{
    error::{Error, Result},
    packager::{
        CHUNK_BIN, CHUNK_HEADER_SIZE, CHUNK_JSON, GLB_MAGIC, GLB_VERSION, HEADER_SIZE, align4,
    },
    texture::normalize_uri,
};

/// A document together with the bytes of its (merged) binary buffer.
#[derive(Debug, Clone)]
pub struct LoadedAsset {
    pub document: Document,
    pub binary: Vec<u8>,
    /// Directory relative URIs resolve against.
    pub base_dir: PathBuf,
}

/// Parse a `.gltf` JSON document or a `.glb` container, discarding the binary chunk.
pub fn parse(bytes: &[u8]) -> Result<Document> {
    parse_with_binary(bytes).map(|(document, _)| document)
}

/// Parse a document and return the GLB binary chunk when there is one.
pub fn parse_with_binary(bytes: &[u8]) -> Result<(Document, Option<Vec<u8>>)> {
    if bytes.len() >= 4 && bytes[..4] == GLB_MAGIC.to_le_bytes() {
        let (json, bin) = read_glb_chunks(bytes)?;
        let mut document: Document = serde_json::from_slice(json)?;
        document.is_glb = true;
        document.validate_references()?;
        return Ok((document, bin.map(<[u8]>::to_vec)));
    }

    if !looks_like_json(bytes) {
        return Err(Error::format(format!(
            "expected GLB magic 0x{GLB_MAGIC:08X} or a JSON object"
        )));
    }

    let document: Document = serde_json::from_slice(bytes)?;
    document.validate_references()?;
    Ok((document, None))
}

/// Serialize a document back to JSON text.
pub fn serialize(document: &Document) -> Result<String> {
    Ok(serde_json::to_string(document)?)
}

/// Read an input asset from disk along with every buffer it references.
///
/// Separate-file assets with several buffers are merged into buffer 0, each
/// appended buffer starting on a 4-byte boundary and its views rebased.
pub fn load_asset(path: &Path) -> Result<LoadedAsset> {
    let bytes = read_file(path, path)?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let (mut document, glb_binary) = parse_with_binary(&bytes)?;
    let binary = if document.is_glb {
        glb_binary.unwrap_or_default()
    } else {
        load_buffers(&mut document, &base_dir)?
    };

    log::debug!(
        "loaded {} ({} images, {} textures, {} binary bytes)",
        path.display(),
        document.images.len(),
        document.textures.len(),
        binary.len()
    );

    Ok(LoadedAsset {
        document,
        binary,
        base_dir,
    })
}

/// Read a file referenced by a relative URI in the document.
pub fn read_resource(base_dir: &Path, uri: &str) -> Result<Vec<u8>> {
    let relative = normalize_uri(uri);
    read_file(&base_dir.join(&relative), Path::new(&relative))
}

fn read_file(path: &Path, reported: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => Error::ResourceNotFound(reported.to_path_buf()),
        _ => Error::Io(err),
    })
}

fn load_buffers(document: &mut Document, base_dir: &Path) -> Result<Vec<u8>> {
    let mut merged = Vec::new();
    let mut offsets = Vec::with_capacity(document.buffers.len());

    for (index, buffer) in document.buffers.iter().enumerate() {
        let uri = buffer
            .uri
            .as_deref()
            .ok_or_else(|| Error::format(format!("buffer {index} has no uri")))?;
        if uri.starts_with("data:") {
            return Err(Error::format(format!(
                "buffer {index} uses a data URI, which is not supported"
            )));
        }

        let bytes = read_resource(base_dir, uri)?;
        if (bytes.len() as u64) < buffer.byte_length {
            return Err(Error::format(format!(
                "buffer {index} declares {} bytes but {uri} holds {}",
                buffer.byte_length,
                bytes.len()
            )));
        }

        merged.resize(align4(merged.len()), 0);
        offsets.push(merged.len() as u64);
        merged.extend_from_slice(&bytes[..buffer.byte_length as usize]);
    }

    if document.buffers.len() > 1 {
        for view in &mut document.buffer_views {
            view.byte_offset += offsets[view.buffer];
            view.buffer = 0;
        }
        let first = document.buffers.swap_remove(0);
        log::debug!("merged {} buffers into one", offsets.len());
        document.buffers = vec![Buffer {
            byte_length: merged.len() as u64,
            ..first
        }];
    }

    Ok(merged)
}

/// Split a GLB container into its first JSON chunk and first BIN chunk.
///
/// Chunks of any other type are skipped.
fn read_glb_chunks(bytes: &[u8]) -> Result<(&[u8], Option<&[u8]>)> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::format(format!(
            "GLB header needs {HEADER_SIZE} bytes, found {}",
            bytes.len()
        )));
    }
    let version = read_u32(bytes, 4);
    if version != GLB_VERSION {
        return Err(Error::format(format!("unsupported GLB version {version}")));
    }
    let total = read_u32(bytes, 8) as usize;
    if total > bytes.len() {
        return Err(Error::format(format!(
            "GLB declares {total} bytes but only {} are present",
            bytes.len()
        )));
    }

    let mut json = None;
    let mut bin = None;
    let mut offset = HEADER_SIZE;
    while offset + CHUNK_HEADER_SIZE <= total {
        let length = read_u32(bytes, offset) as usize;
        let kind = read_u32(bytes, offset + 4);
        let start = offset + CHUNK_HEADER_SIZE;
        let end = start
            .checked_add(length)
            .filter(|end| *end <= total)
            .ok_or_else(|| {
                Error::format(format!(
                    "GLB chunk at byte {offset} runs past the end of the container"
                ))
            })?;
        let data = &bytes[start..end];
        match kind {
            CHUNK_JSON if json.is_none() => json = Some(data),
            CHUNK_BIN if bin.is_none() => bin = Some(data),
            _ => log::debug!("skipping GLB chunk 0x{kind:08X} ({length} bytes)"),
        }
        offset = end;
    }

    let json = json.ok_or_else(|| Error::format("GLB has no JSON chunk"))?;
    Ok((json, bin))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn looks_like_json(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    bytes
        .iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'{')
}
