//! Model artifact verification.
//!
//! Each artifact is checked for presence, plausible size and, for
//! safetensors files, a sane header. The check is cheap: only the first
//! eight bytes of a weights file are read.
//!
//! ```rust
//! use plexlaunch::assets::integrity::{verify_file, IntegrityResult, MODEL_FILES};
//! use std::path::Path;
//!
//! let result = verify_file(Path::new("/nonexistent/model.safetensors"), &MODEL_FILES[0]);
//! assert_eq!(result, IntegrityResult::Missing);
//! ```

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::ArtifactSource;

/// Upper bound on a safetensors JSON header.
pub const MAX_SAFETENSORS_HEADER: u64 = 10_000_000;

const MB: u64 = 1_000_000;
const GB: u64 = 1_000_000_000;

/// One artifact of the model repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFile {
    pub name: &'static str,
    pub description: &'static str,
    pub min_bytes: u64,
    pub max_bytes: u64,
    pub required: bool,
    /// Server flag that points at this file when a custom model folder is used.
    pub server_flag: Option<&'static str>,
}

/// Artifacts of the speech model, required ones first.
pub const MODEL_FILES: [ModelFile; 5] = [
    ModelFile {
        name: "model.safetensors",
        description: "speech language model weights",
        min_bytes: 13 * GB,
        max_bytes: 18 * GB,
        required: true,
        server_flag: Some("--moshi-weight"),
    },
    ModelFile {
        name: "tokenizer-e351c8d8-checkpoint125.safetensors",
        description: "audio codec weights",
        min_bytes: 300 * MB,
        max_bytes: 500 * MB,
        required: true,
        server_flag: Some("--mimi-weight"),
    },
    ModelFile {
        name: "tokenizer_spm_32k_3.model",
        description: "text tokenizer",
        min_bytes: MB / 2,
        max_bytes: 2 * MB,
        required: true,
        server_flag: Some("--tokenizer"),
    },
    ModelFile {
        name: "voices.tgz",
        description: "voice prompt embeddings",
        min_bytes: MB,
        max_bytes: 500 * MB,
        required: false,
        server_flag: None,
    },
    ModelFile {
        name: "dist.tgz",
        description: "prebuilt web client",
        min_bytes: MB / 10,
        max_bytes: 100 * MB,
        required: false,
        server_flag: None,
    },
];

/// The required subset of [`MODEL_FILES`].
pub fn required_files() -> impl Iterator<Item = &'static ModelFile> {
    MODEL_FILES.iter().filter(|f| f.required)
}

/// Outcome of checking one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityResult {
    Ok { bytes: u64 },
    Missing,
    TooSmall { bytes: u64 },
    TooLarge { bytes: u64 },
    /// The safetensors header length is implausible or unreadable.
    BadHeader { detail: String },
}

impl IntegrityResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

impl fmt::Display for IntegrityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok { bytes } => write!(f, "ok ({})", human_size(*bytes)),
            Self::Missing => write!(f, "missing"),
            Self::TooSmall { bytes } => write!(f, "too small ({})", human_size(*bytes)),
            Self::TooLarge { bytes } => write!(f, "too large ({})", human_size(*bytes)),
            Self::BadHeader { detail } => write!(f, "invalid header: {detail}"),
        }
    }
}

/// Check one artifact against its expected size range.
pub fn verify_file(path: &Path, file: &ModelFile) -> IntegrityResult {
    let bytes = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            info!(path = %path.display(), "model file missing");
            return IntegrityResult::Missing;
        }
    };

    if bytes < file.min_bytes {
        warn!(path = %path.display(), bytes, min = file.min_bytes, "model file too small");
        return IntegrityResult::TooSmall { bytes };
    }
    if bytes > file.max_bytes {
        warn!(path = %path.display(), bytes, max = file.max_bytes, "model file too large");
        return IntegrityResult::TooLarge { bytes };
    }

    if file.name.ends_with(".safetensors")
        && let Err(detail) = check_safetensors_header(path)
    {
        warn!(path = %path.display(), %detail, "safetensors header rejected");
        return IntegrityResult::BadHeader { detail };
    }

    IntegrityResult::Ok { bytes }
}

/// The first eight bytes of a safetensors file are the little-endian length
/// of its JSON header.
pub fn check_safetensors_header(path: &Path) -> Result<u64, String> {
    let mut buf = [0u8; 8];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut buf))
        .map_err(|e| format!("could not read header: {e}"))?;
    let header_len = u64::from_le_bytes(buf);
    if header_len == 0 || header_len > MAX_SAFETENSORS_HEADER {
        return Err(format!("header length {header_len} out of range"));
    }
    Ok(header_len)
}

/// One row of a verification report.
#[derive(Debug, Clone)]
pub struct FileCheck {
    pub file: ModelFile,
    /// Where the file was found, if anywhere.
    pub path: Option<PathBuf>,
    pub result: IntegrityResult,
}

/// Verification of every known artifact.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub checks: Vec<FileCheck>,
}

impl VerifyReport {
    /// Every required artifact passed. Optional artifacts never fail the report.
    #[must_use]
    pub fn all_required_ok(&self) -> bool {
        self.checks
            .iter()
            .filter(|c| c.file.required)
            .all(|c| c.result.is_ok())
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.checks
            .iter()
            .map(|c| {
                let tag = match (&c.result, c.file.required) {
                    (IntegrityResult::Ok { .. }, _) => "[OK]",
                    (_, true) => "[MISSING]",
                    (_, false) => "[OPTIONAL]",
                };
                format!("{tag:<10} {} ({}): {}", c.file.name, c.file.description, c.result)
            })
            .collect()
    }
}

/// Verify every artifact, looking in `custom_dir` first and then in the
/// local registry cache.
pub fn verify_models(
    source: &dyn ArtifactSource,
    repo_id: &str,
    custom_dir: Option<&Path>,
) -> VerifyReport {
    let checks = MODEL_FILES
        .iter()
        .map(|file| {
            let path = custom_dir
                .map(|dir| dir.join(file.name))
                .filter(|p| p.is_file())
                .or_else(|| source.cached(repo_id, file.name));
            let result = match &path {
                Some(p) => verify_file(p, file),
                None => IntegrityResult::Missing,
            };
            FileCheck {
                file: *file,
                path,
                result,
            }
        })
        .collect();
    VerifyReport { checks }
}

#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    }
}
