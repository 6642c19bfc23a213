use std::{
    collections::BTreeSet,
    fs,
    io::Write,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    convert::{
        CancellationToken, ConversionOutcome, ConvertOptions, ImageFailure, convert_images,
        infer_missing_mime_types,
    },
    dedup::dedupe_textures,
    document::{Document, load_asset, read_resource},
    error::{Error, Result},
    packager::{ImagePayload, pack},
};

// ─── Report types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertedImageInfo {
    pub index: usize,
    pub label: String,
    pub bytes: usize,
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub input_path: String,
    pub output_path: String,
    pub source_was_glb: bool,
    pub image_count: usize,
    pub texture_count_before: usize,
    pub texture_count_after: usize,
    pub converted_images: Vec<ConvertedImageInfo>,
    pub failed_images: Vec<ImageFailure>,
    pub skipped_images: Vec<usize>,
    pub output_bytes: usize,
    pub issues: Vec<ValidationIssue>,
}

// ─── Export ───────────────────────────────────────────────────────────────────

/// Export a `.gltf` or `.glb` asset to a self-contained GLB at `output_path`.
///
/// The source asset on disk is never modified, apart from compressed files the
/// encoder writes next to source images. The output file is only created once
/// packaging has succeeded.
pub fn export_glb(
    input_path: &Path,
    output_path: &Path,
    options: &ConvertOptions,
    cancel: &CancellationToken,
) -> Result<ExportReport> {
    let asset = load_asset(input_path)?;
    log::info!("exporting {} -> {}", input_path.display(), output_path.display());

    let mut document = asset.document.clone();
    let dedup = dedupe_textures(&mut document);
    infer_missing_mime_types(&mut document);

    let outcome = convert_images(
        &mut document,
        &asset.binary,
        &asset.base_dir,
        options,
        cancel,
    )?;
    let payloads = collect_payloads(&document, &asset.base_dir, &outcome)?;
    let glb = pack(&mut document, &asset.binary, payloads)?;

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    write_atomically(output_path, &glb)?;
    log::info!("wrote {} ({} bytes)", output_path.display(), glb.len());

    Ok(ExportReport {
        input_path: input_path.display().to_string(),
        output_path: output_path.display().to_string(),
        source_was_glb: asset.document.is_glb,
        image_count: document.images.len(),
        texture_count_before: dedup.textures_before,
        texture_count_after: dedup.textures_after,
        converted_images: outcome
            .converted
            .iter()
            .map(|image| ConvertedImageInfo {
                index: image.image,
                label: image.label.clone(),
                bytes: image.bytes.len(),
                reused: image.reused,
            })
            .collect(),
        issues: collect_issues(&document, &outcome),
        failed_images: outcome.failures,
        skipped_images: outcome.skipped,
        output_bytes: glb.len(),
    })
}

/// Bytes to embed for every image that still points at a file.
///
/// Converted images carry their encoder output; other relative-URI images are
/// read from disk. Data URIs and images already in a buffer view stay as they are.
fn collect_payloads(
    document: &Document,
    base_dir: &Path,
    outcome: &ConversionOutcome,
) -> Result<Vec<ImagePayload>> {
    let mut payloads: Vec<ImagePayload> = outcome
        .converted
        .iter()
        .map(|image| ImagePayload {
            image: image.image,
            bytes: image.bytes.clone(),
        })
        .collect();
    let converted: BTreeSet<usize> = payloads.iter().map(|payload| payload.image).collect();

    for (index, image) in document.images.iter().enumerate() {
        if converted.contains(&index) || image.is_data_uri() {
            continue;
        }
        if let Some(uri) = image.uri.as_deref() {
            payloads.push(ImagePayload {
                image: index,
                bytes: read_resource(base_dir, uri)?,
            });
        }
    }

    payloads.sort_by_key(|payload| payload.image);
    Ok(payloads)
}

fn collect_issues(document: &Document, outcome: &ConversionOutcome) -> Vec<ValidationIssue> {
    let mut issues: Vec<ValidationIssue> = outcome
        .failures
        .iter()
        .map(|failure| ValidationIssue {
            severity: Severity::Warning,
            code: "ENCODER_FAILED".to_string(),
            message: format!("{} was embedded unconverted: {}", failure.label, failure.reason),
        })
        .collect();

    for (index, image) in document.images.iter().enumerate() {
        if image.is_data_uri() {
            issues.push(ValidationIssue {
                severity: Severity::Info,
                code: "DATA_URI_IMAGE".to_string(),
                message: format!("image {index} uses a data URI and was left inline"),
            });
        }
    }

    issues
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

// ─── Report file ──────────────────────────────────────────────────────────────

pub fn write_export_report(path: &Path, report: &ExportReport) -> anyhow::Result<()> {
    use anyhow::Context;

    let json_bytes =
        serde_json::to_vec_pretty(report).context("failed to serialize export report JSON")?;
    fs::write(path, json_bytes)
        .with_context(|| format!("failed to write export report: {}", path.display()))?;
    Ok(())
}
