use std::{
    path::{Path, PathBuf},
    process,
};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};

use gltf2glb::{
    convert::{CancellationToken, ConvertOptions, SubFormat, TextureFormat},
    document::{MapType, load_asset},
    export::{export_glb, write_export_report},
    logging::{LogLevel, ResultExt, init_logging},
    settings::{ExportSettings, load_export_settings, save_export_settings},
};

#[derive(Parser, Debug)]
#[command(name = "gltf2glb", version, about = "Export glTF assets as self-contained GLB files")]
struct Cli {
    /// Log verbosity (debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert textures and package an asset into a GLB.
    Export(ExportArgs),
    /// Print a summary of the texture-related parts of an asset.
    Inspect {
        input: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Input `.gltf` or `.glb`; may come from `--settings` instead.
    input: Option<PathBuf>,
    /// Output `.glb`; may come from `--settings` instead.
    output: Option<PathBuf>,

    /// Load export settings from a JSON file before applying flags.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Save the effective settings to a JSON file.
    #[arg(long)]
    save_settings: Option<PathBuf>,
    /// Write the export report as JSON to this file.
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    format: Option<TextureFormat>,
    #[arg(long)]
    sub_format: Option<SubFormat>,
    #[arg(long)]
    quality: Option<u32>,
    #[arg(long)]
    rdo_threshold: Option<f32>,
    /// Encoder compression level (1-5).
    #[arg(long)]
    level: Option<u32>,
    #[arg(long)]
    preserve_alpha: bool,
    /// Reuse compressed files already present next to source images.
    #[arg(long)]
    reuse_existing: bool,
    /// Run the encoder for one image at a time.
    #[arg(long)]
    no_multithreading: bool,
    /// Maximum number of encoder processes at once.
    #[arg(long)]
    jobs: Option<usize>,
    /// Path to the `basisu` executable.
    #[arg(long)]
    encoder: Option<PathBuf>,
    /// Leave textures of this map type unconverted (repeatable).
    #[arg(long = "skip-map")]
    skip_maps: Vec<MapType>,
    /// Image URI or name to leave unconverted (repeatable).
    #[arg(long = "exclude")]
    excluded_images: Vec<String>,
    /// Embed images as they are, without running the encoder.
    #[arg(long)]
    no_convert: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    if let Err(err) = run(cli.command) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Export(args) => run_export(args),
        Command::Inspect { input } => run_inspect(&input),
    }
}

fn run_export(args: ExportArgs) -> anyhow::Result<()> {
    let mut settings = match &args.settings {
        Some(path) => load_export_settings(path)?,
        None => ExportSettings::default(),
    };
    apply_flags(&mut settings, &args);

    let Some(input) = settings.input_path.clone().map(PathBuf::from) else {
        bail!("no input file given (pass it as an argument or through --settings)");
    };
    let Some(output) = settings.output_path.clone().map(PathBuf::from) else {
        bail!("no output file given (pass it as an argument or through --settings)");
    };

    if let Some(path) = &args.save_settings {
        save_export_settings(path, &settings)?;
    }

    let report = export_glb(&input, &output, &settings.options, &CancellationToken::new())
        .log_error(Some("export failed"))
        .with_context(|| format!("failed to export {}", input.display()))?;

    println!("Output: {} ({} bytes)", report.output_path, report.output_bytes);
    println!(
        "Textures: {} -> {} (duplicates removed: {})",
        report.texture_count_before,
        report.texture_count_after,
        report.texture_count_before - report.texture_count_after
    );
    println!(
        "Images: {}, converted: {}, failed: {}, skipped: {}",
        report.image_count,
        report.converted_images.len(),
        report.failed_images.len(),
        report.skipped_images.len()
    );
    for issue in &report.issues {
        println!("[{:?}] {}: {}", issue.severity, issue.code, issue.message);
    }

    if let Some(path) = &args.report {
        write_export_report(path, &report)?;
        println!("Report: {}", path.display());
    }

    Ok(())
}

fn apply_flags(settings: &mut ExportSettings, args: &ExportArgs) {
    if let Some(input) = &args.input {
        settings.input_path = Some(input.display().to_string());
    }
    if let Some(output) = &args.output {
        settings.output_path = Some(output.display().to_string());
    }

    let options: &mut ConvertOptions = &mut settings.options;
    if let Some(format) = args.format {
        options.format = format;
    }
    if let Some(sub_format) = args.sub_format {
        if sub_format != options.sub_format {
            options.quality = None;
            options.rdo_threshold = None;
        }
        options.sub_format = sub_format;
    }
    if let Some(quality) = args.quality {
        options.quality = Some(quality);
    }
    if let Some(threshold) = args.rdo_threshold {
        options.rdo_threshold = Some(threshold);
    }
    if let Some(level) = args.level {
        options.compression_level = level;
    }
    options.preserve_alpha |= args.preserve_alpha;
    options.reuse_existing |= args.reuse_existing;
    if args.no_multithreading {
        options.multithreading = false;
    }
    if let Some(jobs) = args.jobs {
        options.concurrency_limit = jobs;
    }
    if let Some(encoder) = &args.encoder {
        options.encoder_path = Some(encoder.clone());
    }

    let skipped: &[MapType] = if args.no_convert {
        &MapType::ALL
    } else {
        &args.skip_maps
    };
    for map_type in skipped {
        options.map_toggles.set(*map_type, false);
    }
    options.excluded_images.extend(args.excluded_images.iter().cloned());
}

fn run_inspect(input: &Path) -> anyhow::Result<()> {
    let asset = load_asset(input).with_context(|| format!("failed to read {}", input.display()))?;
    let mut summary = asset.document.summary();
    summary["binaryBytes"] = asset.binary.len().into();
    summary["imageMapTypes"] = serde_json::to_value(asset.document.image_map_types())
        .context("failed to serialize map types")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
