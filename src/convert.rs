//! Conversion of document images to Basis Universal containers.
//!
//! Eligible images are handed to an external `basisu` process, at most
//! `ConvertOptions::worker_count` at a time. Textures that sampled a converted
//! image are switched to the compressed-texture extension.

mod encoder;
mod options;

use std::{
    collections::{BTreeSet, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use rayon::prelude::*;
use serde::Serialize;

pub use encoder::{
    ENCODER_BINARY, ProcessExit, ProcessRegistry, encoder_args, expected_output, locate_encoder,
};
pub use options::{
    COMPRESSION_LEVEL_RANGE, ConvertOptions, MapToggles, SubFormat, TextureFormat,
};

use crate::{
    document::{CompressedSource, Document, Extension, MapType},
    error::{Error, Result},
    texture::{is_png, mime_type_for_uri, normalize_uri, replace_extension, transcode_to_png},
};

/// Shared flag that stops new encoder launches once set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageFailure {
    pub image: usize,
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedImage {
    pub image: usize,
    pub label: String,
    /// URI the image points at once converted; `None` for embedded images.
    pub uri: Option<String>,
    pub bytes: Vec<u8>,
    /// Taken from an existing compressed file instead of running the encoder.
    pub reused: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConversionOutcome {
    pub converted: Vec<ConvertedImage>,
    pub failures: Vec<ImageFailure>,
    /// Images left untouched because they were not eligible.
    pub skipped: Vec<usize>,
}

/// Fill in `mimeType` for URI images that lack one.
pub fn infer_missing_mime_types(document: &mut Document) {
    for image in &mut document.images {
        if image.mime_type.is_some() || image.is_data_uri() {
            continue;
        }
        if let Some(mime_type) = image.uri.as_deref().and_then(mime_type_for_uri) {
            image.mime_type = Some(mime_type);
        }
    }
}

enum ImageSource {
    File(PathBuf),
    Embedded(Vec<u8>),
}

struct Job {
    image: usize,
    label: String,
    map_type: Option<MapType>,
    source: ImageSource,
    /// Directory the encoder writes into.
    output_dir: PathBuf,
    /// File stem of the encoder input and output; unique per output directory.
    stem: String,
    output_uri: Option<String>,
    reuse: Option<PathBuf>,
}

struct JobContext<'a> {
    encoder: Option<PathBuf>,
    options: &'a ConvertOptions,
    scratch: &'a Path,
    registry: &'a ProcessRegistry,
    cancel: &'a CancellationToken,
    progress: AtomicUsize,
    total: usize,
}

type JobResult = std::result::Result<ConvertedImage, ImageFailure>;

/// Convert every eligible image in `document` and rewrite the textures that
/// reference them.
///
/// `binary` is the document's merged binary buffer, used for images stored in
/// buffer views. Relative URIs resolve against `base_dir`. Per-image encoder
/// failures are collected in the outcome; cancellation aborts the whole run.
pub fn convert_images(
    document: &mut Document,
    binary: &[u8],
    base_dir: &Path,
    options: &ConvertOptions,
    cancel: &CancellationToken,
) -> Result<ConversionOutcome> {
    let options = options.normalized();
    let (eligible, skipped) = select_images(document, &options);
    if eligible.is_empty() {
        log::info!("no images eligible for conversion");
        return Ok(ConversionOutcome {
            skipped,
            ..ConversionOutcome::default()
        });
    }

    let scratch = tempfile::Builder::new().prefix("gltf2glb-").tempdir()?;
    let jobs = build_jobs(document, binary, base_dir, scratch.path(), &eligible, &options)?;

    let encoder = if jobs.iter().all(|job| job.reuse.is_some()) {
        None
    } else {
        Some(locate_encoder(&options)?)
    };
    if let Some(encoder) = &encoder {
        log::info!(
            "converting {} images with {} ({} workers)",
            jobs.len(),
            encoder.display(),
            options.worker_count()
        );
    }

    let registry = ProcessRegistry::new();
    let context = JobContext {
        encoder,
        options: &options,
        scratch: scratch.path(),
        registry: &registry,
        cancel,
        progress: AtomicUsize::new(0),
        total: jobs.len(),
    };

    let results: Vec<JobResult> = if options.worker_count() > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.worker_count())
            .thread_name(|index| format!("gltf2glb-encoder-{index}"))
            .build()
            .map_err(|err| Error::Io(io::Error::other(err)))?;
        pool.install(|| {
            jobs.par_iter()
                .map(|job| run_job(job, &context))
                .collect::<Result<Vec<_>>>()
        })?
    } else {
        jobs.iter()
            .map(|job| run_job(job, &context))
            .collect::<Result<Vec<_>>>()?
    };

    drop(registry);
    if let Err(err) = scratch.close() {
        log::warn!("failed to remove temporary directory: {err}");
    }

    let mut outcome = ConversionOutcome {
        skipped,
        ..ConversionOutcome::default()
    };
    for result in results {
        match result {
            Ok(converted) => outcome.converted.push(converted),
            Err(failure) => outcome.failures.push(failure),
        }
    }

    apply_conversions(document, &outcome.converted, options.format);
    Ok(outcome)
}

fn select_images(
    document: &Document,
    options: &ConvertOptions,
) -> (Vec<(usize, Option<MapType>)>, Vec<usize>) {
    let map_types = document.image_map_types();
    let mut eligible = Vec::new();
    let mut skipped = Vec::new();

    for (index, image) in document.images.iter().enumerate() {
        let map_type = map_types.get(&index).copied();
        let reason = if image.is_data_uri() {
            Some("data URIs are passed through")
        } else if image.uri.is_none() && image.buffer_view.is_none() {
            Some("no uri or bufferView")
        } else if image
            .mime_type
            .as_deref()
            .is_some_and(TextureFormat::is_compressed_mime)
        {
            Some("already compressed")
        } else if !options
            .map_toggles
            .enabled(map_type.unwrap_or(MapType::Diffuse))
        {
            Some("map type disabled")
        } else if options.is_excluded(image.uri.as_deref(), image.name.as_deref()) {
            Some("excluded")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                if image.is_data_uri() {
                    log::warn!("skipping image {index}: {reason}");
                } else {
                    log::debug!("skipping {}: {reason}", image.label(index));
                }
                skipped.push(index);
            }
            None => eligible.push((index, map_type)),
        }
    }

    (eligible, skipped)
}

fn build_jobs(
    document: &mut Document,
    binary: &[u8],
    base_dir: &Path,
    scratch: &Path,
    eligible: &[(usize, Option<MapType>)],
    options: &ConvertOptions,
) -> Result<Vec<Job>> {
    let mut jobs = Vec::with_capacity(eligible.len());
    let mut claimed_outputs = HashSet::new();

    for &(index, map_type) in eligible {
        let uri = document.images[index].uri.clone();
        let job = match uri {
            Some(uri) => {
                let uri = normalize_uri(&uri);
                document.images[index].uri = Some(uri.clone());

                let path = base_dir.join(&uri);
                let output_dir = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| base_dir.to_path_buf());
                let mut stem = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("image{index}"));
                let extension = options.format.file_extension();
                if !claimed_outputs.insert(output_dir.join(format!("{stem}.{extension}"))) {
                    let renamed = format!("{stem}_{index}");
                    log::debug!("{uri}: {stem}.{extension} is taken, writing {renamed}.{extension}");
                    stem = renamed;
                    claimed_outputs.insert(output_dir.join(format!("{stem}.{extension}")));
                }
                let existing = output_dir.join(format!("{stem}.{extension}"));
                let reuse = (options.reuse_existing && existing.is_file()).then_some(existing);

                Job {
                    image: index,
                    output_uri: Some(sibling_uri(&uri, &stem, extension)),
                    label: uri,
                    map_type,
                    source: ImageSource::File(path),
                    output_dir,
                    stem,
                    reuse,
                }
            }
            None => {
                let image = &document.images[index];
                let view_index = image.buffer_view.ok_or_else(|| {
                    Error::format(format!("image {index} has neither uri nor bufferView"))
                })?;
                let view = &document.buffer_views[view_index];
                let bytes = view
                    .byte_offset
                    .checked_add(view.byte_length)
                    .and_then(|end| {
                        let start = usize::try_from(view.byte_offset).ok()?;
                        binary.get(start..usize::try_from(end).ok()?)
                    })
                    .ok_or_else(|| {
                        Error::format(format!(
                            "bufferView {view_index} (offset {}, length {}) exceeds the {} byte buffer",
                            view.byte_offset,
                            view.byte_length,
                            binary.len()
                        ))
                    })?;

                Job {
                    image: index,
                    label: image.label(index),
                    map_type,
                    source: ImageSource::Embedded(bytes.to_vec()),
                    output_dir: scratch.join(index.to_string()),
                    stem: format!("image{index}"),
                    output_uri: None,
                    reuse: None,
                }
            }
        };
        jobs.push(job);
    }

    Ok(jobs)
}

/// `uri` with its file name replaced by `<stem>.<extension>`.
fn sibling_uri(uri: &str, stem: &str, extension: &str) -> String {
    let directory = uri.rfind('/').map(|slash| &uri[..=slash]).unwrap_or("");
    format!("{directory}{stem}.{extension}")
}

fn run_job(job: &Job, context: &JobContext<'_>) -> Result<JobResult> {
    if context.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let result = convert_one(job, context).map_err(|err| {
        log::warn!("failed to convert {}: {err}", job.label);
        ImageFailure {
            image: job.image,
            label: job.label.clone(),
            reason: err.to_string(),
        }
    });

    let done = context.progress.fetch_add(1, Ordering::SeqCst) + 1;
    if result.is_ok() {
        log::info!("[{done}/{}] converted {}", context.total, job.label);
    }
    Ok(result)
}

fn convert_one(job: &Job, context: &JobContext<'_>) -> Result<ConvertedImage> {
    if let Some(existing) = &job.reuse {
        log::debug!("reusing {}", existing.display());
        return Ok(ConvertedImage {
            image: job.image,
            label: job.label.clone(),
            uri: job.output_uri.clone(),
            bytes: fs::read(existing)?,
            reused: true,
        });
    }

    let encoder = context
        .encoder
        .as_deref()
        .ok_or_else(|| Error::EncoderInvocation {
            image: job.label.clone(),
            reason: "no encoder available".to_string(),
        })?;
    let input = prepare_input(job, context.scratch)?;
    fs::create_dir_all(&job.output_dir)?;

    let args = encoder_args(context.options, &input, &job.output_dir, job.map_type);
    log::debug!(
        "{} {}",
        encoder.display(),
        args.iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );
    let exit = context
        .registry
        .run(encoder, &args)
        .map_err(|err| Error::EncoderInvocation {
            image: job.label.clone(),
            reason: err.to_string(),
        })?;
    if !exit.status.success() {
        return Err(Error::EncoderInvocation {
            image: job.label.clone(),
            reason: exit.failure_reason(),
        });
    }

    let output = expected_output(&input, &job.output_dir, context.options.format);
    let bytes = fs::read(&output).map_err(|err| Error::EncoderInvocation {
        image: job.label.clone(),
        reason: format!("could not read {}: {err}", output.display()),
    })?;

    Ok(ConvertedImage {
        image: job.image,
        label: job.label.clone(),
        uri: job.output_uri.clone(),
        bytes,
        reused: false,
    })
}

/// Path of a PNG the encoder can read for this job.
///
/// PNG files on disk whose stem matches the job are used directly; anything
/// else is written (transcoded if needed) to `<scratch>/<image index>/<stem>.png`.
fn prepare_input(job: &Job, scratch: &Path) -> Result<PathBuf> {
    let bytes = match &job.source {
        ImageSource::File(path) => {
            let is_png_file = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
            let keeps_stem = path.file_stem().is_some_and(|stem| *stem == *job.stem);
            if is_png_file && keeps_stem && path.is_file() {
                return Ok(path.clone());
            }
            fs::read(path).map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => Error::ResourceNotFound(PathBuf::from(&job.label)),
                _ => Error::Io(err),
            })?
        }
        ImageSource::Embedded(bytes) => bytes.clone(),
    };

    let png = if is_png(&bytes) {
        bytes
    } else {
        transcode_to_png(&bytes)?
    };

    let dir = scratch.join(job.image.to_string());
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.png", job.stem));
    fs::write(&path, png)?;
    Ok(path)
}

fn apply_conversions(document: &mut Document, converted: &[ConvertedImage], format: TextureFormat) {
    if converted.is_empty() {
        return;
    }

    let converted_images: BTreeSet<usize> = converted.iter().map(|image| image.image).collect();
    for result in converted {
        let image = &mut document.images[result.image];
        if let Some(uri) = &result.uri {
            image.uri = Some(uri.clone());
        } else if let Some(uri) = image.uri.as_deref() {
            image.uri = Some(replace_extension(uri, format.file_extension()));
        }
        image.mime_type = Some(format.mime_type().to_string());
    }

    let extension_name = format.extension_name();
    let needs_sampler = document.textures.iter().any(|texture| {
        texture.sampler.is_none()
            && texture
                .source
                .is_some_and(|source| converted_images.contains(&source))
    });
    let default_sampler = needs_sampler.then(|| document.ensure_default_sampler());

    for texture in &mut document.textures {
        let Some(source) = texture.source else {
            continue;
        };
        if !converted_images.contains(&source) {
            continue;
        }

        if !texture.extensions.contains(extension_name) {
            let payload = CompressedSource {
                source,
                ..CompressedSource::default()
            };
            let extension = match format {
                TextureFormat::Basis => Extension::BasisSource(payload),
                TextureFormat::Ktx2 => Extension::Ktx2Source(payload),
            };
            texture.extensions.insert(extension_name, extension);
        }
        texture.source = None;
        if texture.sampler.is_none() {
            texture.sampler = default_sampler;
        }
    }

    document.declare_extension(extension_name, true);
}
