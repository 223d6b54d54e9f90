//! Voice prompt archive handling.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::info;

use super::AssetError;

/// Directory the archive unpacks into, next to the archive itself.
pub const VOICES_DIR: &str = "voices";

/// What [`ensure_extracted`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceOutcome {
    Extracted(PathBuf),
    AlreadyPresent(PathBuf),
}

impl VoiceOutcome {
    /// Directory holding the voice prompt files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        match self {
            Self::Extracted(dir) | Self::AlreadyPresent(dir) => dir,
        }
    }
}

/// `candidate` itself when it holds `*.pt` files, else a nested `voices/`
/// that does.
pub fn resolve_voice_dir(candidate: &Path) -> Option<PathBuf> {
    if has_voice_files(candidate) {
        return Some(candidate.to_path_buf());
    }
    let nested = candidate.join(VOICES_DIR);
    if has_voice_files(&nested) {
        info!(dir = %nested.display(), "found nested voices directory");
        return Some(nested);
    }
    None
}

fn has_voice_files(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|entries| {
        entries
            .flatten()
            .any(|e| e.path().extension().is_some_and(|ext| ext == "pt"))
    })
}

/// Unpack `archive` beside itself unless its voices are already there.
///
/// # Errors
///
/// Returns [`AssetError::Extract`] when the archive cannot be read or holds
/// no voice files.
pub fn ensure_extracted(archive: &Path) -> Result<VoiceOutcome, AssetError> {
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let voices_dir = parent.join(VOICES_DIR);

    if let Some(dir) = resolve_voice_dir(&voices_dir) {
        info!(dir = %dir.display(), "voice prompts already extracted");
        return Ok(VoiceOutcome::AlreadyPresent(dir));
    }

    info!(archive = %archive.display(), dest = %parent.display(), "extracting voice prompts");
    let extract_err = |cause: String| AssetError::Extract {
        archive: archive.to_path_buf(),
        cause,
    };
    let file = File::open(archive).map_err(|e| extract_err(e.to_string()))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(parent)
        .map_err(|e| extract_err(e.to_string()))?;

    resolve_voice_dir(&voices_dir)
        .map(VoiceOutcome::Extracted)
        .ok_or_else(|| extract_err("archive contained no voice prompt files".to_owned()))
}
