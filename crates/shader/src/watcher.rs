//! Shader directory watching.
//!
//! A `notify` watcher feeds filesystem events into a channel drained by a
//! dedicated thread. That thread debounces bursts (editors often write a
//! file several times per save) and hands each modified path to the
//! callback once the burst is over, so the last write is always reported. Dropping the [`ShaderWatcher`] closes the channel and joins
//! the thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::error::{ShaderError, ShaderResult};

/// A path fires once it has gone this long without another event.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

/// Trailing-edge debounce keyed by path.
///
/// Every event pushes the path's deadline back by the window, so a burst of
/// writes fires once, after the last write.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Records an event for `path` at `now`.
    pub fn record(&mut self, path: &Path, now: Instant) {
        self.pending.insert(path.to_path_buf(), now);
    }

    /// Removes and returns the paths that have been quiet for the window,
    /// in path order.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= window)
            .map(|(path, _)| path.clone())
            .collect();
        due.sort();
        for path in &due {
            self.pending.remove(path);
        }
        due
    }

    /// Removes and returns every pending path, due or not.
    pub fn take_all(&mut self) -> Vec<PathBuf> {
        let mut all: Vec<PathBuf> = self.pending.drain().map(|(path, _)| path).collect();
        all.sort();
        all
    }

    /// How long until the earliest pending path is due, or `None` when
    /// nothing is pending.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.pending
            .values()
            .map(|last| (*last + self.window).saturating_duration_since(now))
            .min()
    }
}

/// Watches one directory and reports modified files.
pub struct ShaderWatcher {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl ShaderWatcher {
    /// Starts watching `dir` (non-recursively).
    ///
    /// `on_change` runs on the watcher thread with the path of each file
    /// created or written in the directory.
    pub fn start<F>(dir: impl Into<PathBuf>, on_change: F) -> ShaderResult<Self>
    where
        F: FnMut(&Path) + Send + 'static,
    {
        let dir = dir.into();
        let (tx, rx) = channel::<notify::Result<notify::Event>>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // The receiver only goes away while the watcher is being dropped.
            let _ = tx.send(res);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let worker = thread::Builder::new()
            .name("shader-watcher".to_string())
            .spawn(move || run_worker(rx, on_change))
            .map_err(|source| ShaderError::Io {
                path: dir.clone(),
                source,
            })?;

        info!("Watching shader directory {:?}", dir);

        Ok(Self {
            dir,
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for ShaderWatcher {
    fn drop(&mut self) {
        // Dropping the watcher drops the sender, which ends the worker loop.
        self.watcher.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("Shader watcher thread panicked");
        }
        debug!("Stopped watching {:?}", self.dir);
    }
}

fn run_worker<F>(rx: Receiver<notify::Result<notify::Event>>, mut on_change: F)
where
    F: FnMut(&Path),
{
    let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);

    loop {
        let received = match debouncer.next_timeout(Instant::now()) {
            Some(timeout) => rx.recv_timeout(timeout),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Ok(event)) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    let now = Instant::now();
                    for path in event.paths.iter().filter(|p| p.is_file()) {
                        debouncer.record(path, now);
                    }
                }
            }
            Ok(Err(e)) => warn!("Shader watch error: {}", e),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                for path in debouncer.take_all() {
                    fire(&mut on_change, &path);
                }
                return;
            }
        }

        for path in debouncer.take_due(Instant::now()) {
            fire(&mut on_change, &path);
        }
    }
}

fn fire<F: FnMut(&Path)>(on_change: &mut F, path: &Path) {
    // Temporary files are often gone again by the time the burst settles.
    if !path.is_file() {
        return;
    }
    debug!("Shader source changed: {:?}", path);
    on_change(path);
}
