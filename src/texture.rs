use std::io::Cursor;

use image::ImageFormat;

use crate::error::Result;

/// Decode `%20` sequences in a relative URI so it names the file on disk.
pub fn normalize_uri(uri: &str) -> String {
    uri.replace("%20", " ")
}

/// MIME type derived from the file extension of a URI, lowercased.
///
/// `jpg` maps to `image/jpeg`; any other extension is used as the subtype.
pub fn mime_type_for_uri(uri: &str) -> Option<String> {
    let file_name = uri.rsplit('/').next().unwrap_or(uri);
    let (stem, extension) = file_name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }

    let extension = extension.to_ascii_lowercase();
    let subtype = match extension.as_str() {
        "jpg" => "jpeg",
        other => other,
    };
    Some(format!("image/{subtype}"))
}

/// Replace the trailing extension of a URI, or append one when there is none.
pub fn replace_extension(uri: &str, extension: &str) -> String {
    let name_start = uri.rfind('/').map(|slash| slash + 1).unwrap_or(0);
    let base = match uri[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &uri[..name_start + dot],
        _ => uri,
    };
    format!("{base}.{extension}")
}

/// True when the bytes carry a PNG signature.
pub fn is_png(bytes: &[u8]) -> bool {
    matches!(image::guess_format(bytes), Ok(ImageFormat::Png))
}

/// Re-encode any image the `image` crate can decode as PNG.
pub fn transcode_to_png(bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    let mut encoded = Cursor::new(Vec::new());
    decoded.write_to(&mut encoded, ImageFormat::Png)?;
    Ok(encoded.into_inner())
}
