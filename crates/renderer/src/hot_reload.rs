//! Hands shader file changes from the watcher thread to the frame loop.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};

use tracing::{debug, info, trace};
use wrap_shader::{ShaderResult, ShaderWatcher};

/// Extensions of files that can feed the pipeline: stage sources and the
/// `.glsl` files they include.
const SHADER_EXTENSIONS: &[&str] = &["vert", "frag", "comp", "glsl"];

/// Whether a change to `path` can alter the compiled pipeline. Editor swap,
/// backup and lock files never do.
pub(crate) fn is_shader_source(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.starts_with('#') {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SHADER_EXTENSIONS.contains(&ext))
}

/// Rebuilds happen on the thread that records frames, so the watcher only
/// queues paths here.
pub struct ShaderReload {
    watcher: ShaderWatcher,
    changes: Receiver<PathBuf>,
}

impl ShaderReload {
    pub fn start(dir: impl Into<PathBuf>) -> ShaderResult<Self> {
        let (sender, changes) = mpsc::channel();
        let watcher = ShaderWatcher::start(dir, move |path: &Path| {
            // The receiver is only gone during shutdown.
            let _ = sender.send(path.to_path_buf());
        })?;
        info!("Hot reload enabled for {:?}", watcher.dir());

        Ok(Self { watcher, changes })
    }

    /// Changed shader sources since the last call, without blocking. Other
    /// files in the directory are drained and ignored.
    pub fn pending(&self) -> Vec<PathBuf> {
        let (changed, ignored): (Vec<PathBuf>, Vec<PathBuf>) =
            self.changes.try_iter().partition(|p| is_shader_source(p));
        if !ignored.is_empty() {
            trace!("Ignoring non-shader changes: {:?}", ignored);
        }
        if !changed.is_empty() {
            debug!("Shader changes: {:?}", changed);
        }
        changed
    }

    pub fn dir(&self) -> &Path {
        self.watcher.dir()
    }
}
