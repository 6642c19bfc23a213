//! GLB container writer.
//!
//! Layout: 12-byte header, JSON chunk padded with spaces, optional BIN chunk
//! padded with zeros. All integers are little-endian and every chunk length is
//! a multiple of four.

use crate::{
    document::{BufferView, Document, serialize},
    error::{Error, Result},
};

pub const GLB_MAGIC: u32 = 0x4654_6C67;
pub const GLB_VERSION: u32 = 2;
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
pub const CHUNK_BIN: u32 = 0x004E_4942;
pub const HEADER_SIZE: usize = 12;
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Round `len` up to the next multiple of four.
pub fn align4(len: usize) -> usize {
    len.div_ceil(4) * 4
}

/// Encoded bytes destined for an image's new buffer view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub image: usize,
    pub bytes: Vec<u8>,
}

/// Assemble a GLB from a document, its existing binary buffer and the image
/// payloads to embed.
///
/// Each payload is appended to the binary buffer as a new view and the image
/// switches from `uri` to `bufferView`. The document is updated in place so it
/// matches the bytes written.
pub fn pack(document: &mut Document, binary: &[u8], images: Vec<ImagePayload>) -> Result<Vec<u8>> {
    if document.buffers.len() > 1 {
        return Err(Error::format(format!(
            "expected at most one buffer when packaging, found {}",
            document.buffers.len()
        )));
    }

    let mut bin = binary.to_vec();
    bin.resize(align4(bin.len()), 0);

    for payload in images {
        let image_count = document.images.len();
        let image = document.images.get_mut(payload.image).ok_or_else(|| {
            Error::format(format!(
                "payload targets image {} but the document has {image_count}",
                payload.image
            ))
        })?;

        let offset = bin.len();
        let length = align4(payload.bytes.len());
        bin.extend_from_slice(&payload.bytes);
        bin.resize(offset + length, 0);

        image.uri = None;
        image.buffer_view = Some(document.buffer_views.len());
        document.buffer_views.push(BufferView {
            buffer: 0,
            byte_offset: offset as u64,
            byte_length: length as u64,
            ..BufferView::default()
        });
    }

    if !bin.is_empty() || !document.buffer_views.is_empty() {
        let mut buffer = document.buffers.pop().unwrap_or_default();
        buffer.byte_length = bin.len() as u64;
        buffer.uri = None;
        document.buffers = vec![buffer];
    } else {
        document.buffers.clear();
    }
    document.is_glb = true;
    document.validate_for_packaging()?;

    let mut json = serialize(document)?.into_bytes();
    json.resize(align4(json.len()), b' ');

    let has_bin = !document.buffers.is_empty();
    let total = HEADER_SIZE
        + CHUNK_HEADER_SIZE
        + json.len()
        + if has_bin { CHUNK_HEADER_SIZE + bin.len() } else { 0 };
    let total = u32::try_from(total)
        .map_err(|_| Error::format(format!("GLB of {total} bytes exceeds the 4 GiB limit")))?;

    let mut out = Vec::with_capacity(total as usize);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes());
    write_chunk(&mut out, CHUNK_JSON, &json);
    if has_bin {
        write_chunk(&mut out, CHUNK_BIN, &bin);
    }

    log::debug!(
        "packed GLB: {} bytes total, JSON {} bytes, BIN {} bytes",
        total,
        json.len(),
        if has_bin { bin.len() } else { 0 }
    );

    Ok(out)
}

fn write_chunk(out: &mut Vec<u8>, kind: u32, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(data);
}
