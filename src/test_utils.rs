//! Shared test utilities used across multiple test modules.

#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::exec::{CommandOutput, ScriptedRunner};
use crate::sandbox::interpreter_path;

static FRESH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Write an executable stand-in interpreter, creating parent directories.
pub fn write_fake_interpreter(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().expect("interpreter has a parent"))
        .expect("create interpreter dir");
    std::fs::write(path, content).expect("write fake interpreter");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake interpreter");
    }
}

/// Runner that answers `<runtime> -m venv <root>` by writing a uniquely
/// stamped interpreter under `<root>`, and succeeds silently for anything
/// else.
pub fn fake_venv_runner() -> ScriptedRunner {
    ScriptedRunner::new(|spec| {
        if spec.args.first().map(String::as_str) == Some("-m")
            && spec.args.get(1).map(String::as_str) == Some("venv")
        {
            let root = PathBuf::from(spec.args.get(2).expect("venv root argument"));
            let stamp = FRESH_COUNTER.fetch_add(1, Ordering::SeqCst);
            write_fake_interpreter(&interpreter_path(&root), &format!("fresh-{stamp}"));
        }
        Ok(CommandOutput::ok(""))
    })
}
