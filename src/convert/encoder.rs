//! External `basisu` encoder invocation.

use std::{
    collections::HashMap,
    ffi::OsString,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use super::options::{ConvertOptions, SubFormat, TextureFormat};
use crate::{
    document::MapType,
    error::{Error, Result},
};

pub const ENCODER_BINARY: &str = "basisu";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_TAIL_LINES: usize = 5;

/// Resolve the encoder executable: the configured path when set, otherwise
/// `basisu` on `PATH`.
pub fn locate_encoder(options: &ConvertOptions) -> Result<PathBuf> {
    match &options.encoder_path {
        Some(path) if path.is_file() => Ok(path.clone()),
        Some(path) => Err(Error::ResourceNotFound(path.clone())),
        None => which::which(ENCODER_BINARY).map_err(|err| Error::EncoderInvocation {
            image: "*".to_string(),
            reason: format!("{ENCODER_BINARY} was not found on PATH: {err}"),
        }),
    }
}

/// Path the encoder writes for `input` into `output_dir`.
pub fn expected_output(input: &Path, output_dir: &Path, format: TextureFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_os_string())
        .unwrap_or_else(|| OsString::from("image"));
    let mut file_name = stem;
    file_name.push(".");
    file_name.push(format.file_extension());
    output_dir.join(file_name)
}

/// Command-line arguments for one encoder run.
pub fn encoder_args(
    options: &ConvertOptions,
    input: &Path,
    output_dir: &Path,
    map_type: Option<MapType>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |value: &str| args.push(OsString::from(value));

    if options.format == TextureFormat::Ktx2 {
        push("-ktx2");
    }

    match options.sub_format {
        SubFormat::Uastc => {
            push("-uastc");
            push("-uastc_level");
            push(&options.quality().to_string());
            push("-uastc_rdo_l");
            push(&format!("{:.2}", options.rdo_threshold()));
        }
        SubFormat::Etc1s => {
            if options.quality() >= SubFormat::Etc1s.quality_range().1 {
                push("-max_endpoints");
                push("16128");
                push("-max_selectors");
                push("16128");
            } else {
                push("-q");
                push(&options.quality().to_string());
            }
            push("-selector_rdo_thresh");
            push(&format!("{:.2}", options.rdo_threshold()));
            push("-endpoint_rdo_thresh");
            push(&format!("{:.2}", options.rdo_threshold()));
        }
    }

    push("-comp_level");
    push(&options.compression_level.to_string());

    if options.preserve_alpha {
        push("-force_alpha");
    }
    match map_type {
        Some(MapType::Normal) => push("-normal_map"),
        Some(map_type) if map_type.is_linear() => push("-linear"),
        _ => {}
    }

    push("-output_path");
    args.push(output_dir.as_os_str().to_os_string());
    args.push(OsString::from("-file"));
    args.push(input.as_os_str().to_os_string());
    args
}

/// Exit status of a finished encoder process and the end of its stderr.
#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub status: ExitStatus,
    pub stderr_tail: String,
}

impl ProcessExit {
    /// Human-readable failure description for a non-zero exit.
    pub fn failure_reason(&self) -> String {
        if self.stderr_tail.is_empty() {
            format!("encoder {}", self.status)
        } else {
            format!("encoder {}: {}", self.status, self.stderr_tail)
        }
    }
}

/// Tracks every encoder process that is still running so they can all be
/// killed at once. Dropping the registry kills whatever is left.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    children: Mutex<HashMap<u32, Child>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `program` and block until it exits.
    ///
    /// The child stays registered while it runs; if `terminate_all` kills it
    /// first, this returns an `Interrupted` error. Stderr is drained on its
    /// own thread while the child runs.
    pub fn run(&self, program: &Path, args: &[OsString]) -> io::Result<ProcessExit> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stderr.read_to_end(&mut buffer);
                buffer
            })
        });
        let id = child.id();
        self.lock().insert(id, child);

        let status = loop {
            {
                let mut children = self.lock();
                let Some(child) = children.get_mut(&id) else {
                    return Err(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "encoder process was terminated",
                    ));
                };
                if let Some(status) = child.try_wait()? {
                    children.remove(&id);
                    break status;
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        Ok(ProcessExit {
            status,
            stderr_tail: tail_lines(&stderr, STDERR_TAIL_LINES),
        })
    }

    /// Number of encoder processes currently running.
    pub fn running(&self) -> usize {
        self.lock().len()
    }

    /// Kill every registered process. Kill failures are logged and otherwise ignored.
    pub fn terminate_all(&self) {
        let mut children = self.lock();
        for (id, mut child) in children.drain() {
            log::debug!("terminating encoder process {id}");
            if let Err(err) = child.kill() {
                log::warn!("failed to kill encoder process {id}: {err}");
            }
            let _ = child.wait();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Child>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Last `count` non-empty lines of `output`, joined with ` | `.
fn tail_lines(output: &[u8], count: usize) -> String {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines[lines.len().saturating_sub(count)..].join(" | ")
}

impl Drop for ProcessRegistry {
    fn drop(&mut self) {
        self.terminate_all();
    }
}
