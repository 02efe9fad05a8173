// SPDX-License-Identifier: MIT OR Apache-2.0
//! Polling reloader for processor modules.
//!
//! Each file in the watched directory is a module providing processor
//! bindings. A full scan, or a watcher event naming a file, compares the
//! file's modification time with the age recorded when it was last loaded.
//! New files are loaded and newer files have their previous bindings
//! dropped before loading again. Vanished files are unloaded. Loading
//! itself is delegated to a [`ModuleLoader`].

use super::{Processor, ProcessorRegistry};
use notify::{EventKind, PollWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Tag/processor pairs provided by one module
pub type ModuleBindings = Vec<(String, Arc<dyn Processor>)>;

/// Turns a module file into processor bindings
pub trait ModuleLoader: Send + Sync + 'static {
    /// Load the bindings of the module at `path`
    fn load(&self, path: &Path) -> Result<ModuleBindings, ReloadError>;

    /// Whether `path` is a module this loader understands
    fn accepts(&self, path: &Path) -> bool {
        path.is_file()
    }
}

impl<F> ModuleLoader for F
where
    F: Fn(&Path) -> Result<ModuleBindings, ReloadError> + Send + Sync + 'static,
{
    fn load(&self, path: &Path) -> Result<ModuleBindings, ReloadError> {
        self(path)
    }
}

/// Reloader failure
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    /// Directory or file access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The directory watcher could not be set up
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// The loader rejected a module
    #[error("Failed to load {path:?}: {reason}")]
    Load {
        /// Module file
        path: PathBuf,
        /// Loader message
        reason: String,
    },
}

/// What a scan did to one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    /// A new module was bound
    Loaded {
        /// Module file
        path: PathBuf,
        /// Bound tags
        tags: Vec<String>,
    },
    /// A modified module was rebound
    Reloaded {
        /// Module file
        path: PathBuf,
        /// Bound tags
        tags: Vec<String>,
    },
    /// A vanished module's bindings were dropped
    Unloaded {
        /// Module file
        path: PathBuf,
        /// Dropped tags
        tags: Vec<String>,
    },
    /// The loader failed; the module stays unbound until it changes again
    Failed {
        /// Module file
        path: PathBuf,
        /// Error message
        reason: String,
    },
}

/// Statistics for reload operations
#[derive(Debug, Clone, Default)]
pub struct ReloadStats {
    /// Completed scans
    pub scans: usize,
    /// Modules loaded for the first time
    pub loaded: usize,
    /// Modules reloaded after a change
    pub reloaded: usize,
    /// Modules dropped after their file vanished
    pub unloaded: usize,
    /// Failed loads
    pub failed: usize,
    /// Time of the last scan
    pub last_scan: Option<Instant>,
}

#[derive(Debug)]
struct ModuleRecord {
    modified: SystemTime,
    tags: Vec<String>,
}

struct ReloaderShared {
    dir: PathBuf,
    loader: Box<dyn ModuleLoader>,
    registry: ProcessorRegistry,
    modules: Mutex<HashMap<PathBuf, ModuleRecord>>,
    stats: RwLock<ReloadStats>,
}

impl ReloaderShared {
    /// Full pass over the directory, unloading modules whose file is gone
    fn scan(&self) -> Result<Vec<ReloadEvent>, ReloadError> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            found.push(entry?.path());
        }
        found.sort();

        let mut modules = self.modules.lock();
        let mut events = Vec::new();
        for path in &found {
            self.refresh(&mut modules, path, &mut events);
        }

        let vanished: Vec<PathBuf> = modules
            .keys()
            .filter(|path| !found.contains(path))
            .cloned()
            .collect();
        for path in vanished {
            self.refresh(&mut modules, &path, &mut events);
        }
        drop(modules);

        self.record(&events, true);
        Ok(events)
    }

    /// Bring the modules behind `paths` up to date after a watcher event
    fn refresh_paths(&self, paths: &[PathBuf]) {
        let mut modules = self.modules.lock();
        let mut events = Vec::new();
        for path in paths {
            self.refresh(&mut modules, path, &mut events);
        }
        drop(modules);

        self.record(&events, false);
    }

    /// Compare one file with its recorded age and (re)bind or unbind it
    fn refresh(
        &self,
        modules: &mut HashMap<PathBuf, ModuleRecord>,
        path: &Path,
        events: &mut Vec<ReloadEvent>,
    ) {
        let modified = if self.loader.accepts(path) {
            match std::fs::metadata(path).and_then(|meta| meta.modified()) {
                Ok(modified) => Some(modified),
                // Removed between listing and stat
                Err(err) => {
                    tracing::debug!("Skipping {:?}: {}", path, err);
                    None
                }
            }
        } else {
            None
        };

        let Some(modified) = modified else {
            if let Some(record) = modules.remove(path) {
                for tag in &record.tags {
                    self.registry.unregister(tag);
                }
                tracing::info!("Unloaded processor module {:?}", path);
                events.push(ReloadEvent::Unloaded {
                    path: path.to_path_buf(),
                    tags: record.tags,
                });
            }
            return;
        };

        let previous = match modules.get(path) {
            Some(record) if record.modified >= modified => return,
            Some(record) => Some(record.tags.clone()),
            None => None,
        };

        if let Some(tags) = &previous {
            for tag in tags {
                self.registry.unregister(tag);
            }
        }

        let path = path.to_path_buf();
        let tags = match self.loader.load(&path) {
            Ok(bindings) => {
                let tags: Vec<String> = bindings.iter().map(|(tag, _)| tag.clone()).collect();
                for (tag, processor) in bindings {
                    self.registry.register_arc(tag, processor);
                }
                if previous.is_some() {
                    tracing::info!("Reloaded processor module {:?} ({})", path, tags.join(", "));
                    events.push(ReloadEvent::Reloaded { path: path.clone(), tags: tags.clone() });
                } else {
                    tracing::info!("Loaded processor module {:?} ({})", path, tags.join(", "));
                    events.push(ReloadEvent::Loaded { path: path.clone(), tags: tags.clone() });
                }
                tags
            }
            Err(err) => {
                tracing::warn!("Failed to load processor module {:?}: {}", path, err);
                events.push(ReloadEvent::Failed { path: path.clone(), reason: err.to_string() });
                Vec::new()
            }
        };

        modules.insert(path, ModuleRecord { modified, tags });
    }

    fn record(&self, events: &[ReloadEvent], full_scan: bool) {
        let mut stats = self.stats.write();
        if full_scan {
            stats.scans += 1;
        }
        stats.last_scan = Some(Instant::now());
        for event in events {
            match event {
                ReloadEvent::Loaded { .. } => stats.loaded += 1,
                ReloadEvent::Reloaded { .. } => stats.reloaded += 1,
                ReloadEvent::Unloaded { .. } => stats.unloaded += 1,
                ReloadEvent::Failed { .. } => stats.failed += 1,
            }
        }
    }
}

/// Background service keeping a [`ProcessorRegistry`] in sync with a
/// directory of modules.
///
/// Changes are detected by a [`notify::PollWatcher`] comparing modification
/// times on a fixed interval.
pub struct ProcessorReloader {
    shared: Arc<ReloaderShared>,
    interval: Duration,
    active: Arc<AtomicBool>,
    watcher: Option<PollWatcher>,
}

impl ProcessorReloader {
    /// Create a stopped reloader
    pub fn new(
        dir: impl AsRef<Path>,
        loader: impl ModuleLoader,
        registry: ProcessorRegistry,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(ReloaderShared {
                dir: dir.as_ref().to_path_buf(),
                loader: Box::new(loader),
                registry,
                modules: Mutex::new(HashMap::new()),
                stats: RwLock::new(ReloadStats::default()),
            }),
            interval,
            active: Arc::new(AtomicBool::new(false)),
            watcher: None,
        }
    }

    /// Watched directory
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Run one full scan on the calling thread
    pub fn scan(&self) -> Result<Vec<ReloadEvent>, ReloadError> {
        self.shared.scan()
    }

    /// Bind the modules present now, then start watching the directory
    pub fn start(&mut self) -> Result<(), ReloadError> {
        if self.watcher.is_some() {
            return Ok(());
        }
        self.shared.scan()?;
        self.active.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let active = Arc::clone(&self.active);
        let config = notify::Config::default().with_poll_interval(self.interval);
        let mut watcher = PollWatcher::new(
            move |result: notify::Result<notify::Event>| {
                if !active.load(Ordering::Acquire) {
                    return;
                }
                match result {
                    Ok(event) => {
                        if matches!(event.kind, EventKind::Access(_)) {
                            return;
                        }
                        shared.refresh_paths(&event.paths);
                    }
                    Err(err) => tracing::warn!("Processor watch of {:?} failed: {}", shared.dir, err),
                }
            },
            config,
        )?;
        watcher.watch(&self.shared.dir, RecursiveMode::NonRecursive)?;

        tracing::info!("Watching {:?} for processor modules", self.shared.dir);
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stop watching. Events still in flight are ignored.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(err) = watcher.unwatch(&self.shared.dir) {
                tracing::debug!("Unwatching {:?} failed: {}", self.shared.dir, err);
            }
            tracing::info!("Stopped watching {:?}", self.shared.dir);
        }
    }

    /// Whether the watcher runs
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Get statistics
    pub fn stats(&self) -> ReloadStats {
        self.shared.stats.read().clone()
    }

    /// Tags currently bound by each loaded module
    pub fn modules(&self) -> Vec<(PathBuf, Vec<String>)> {
        let mut modules: Vec<_> = self
            .shared
            .modules
            .lock()
            .iter()
            .map(|(path, record)| (path.clone(), record.tags.clone()))
            .collect();
        modules.sort();
        modules
    }
}

impl Drop for ProcessorReloader {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ProcessorReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorReloader")
            .field("dir", &self.shared.dir)
            .field("interval", &self.interval)
            .field("running", &self.watcher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::processor::ProcessError;
    use crate::property::Property;
    use std::fs::File;

    /// Binds `<STEM>` to a processor returning the file's length
    fn loader(path: &Path) -> Result<ModuleBindings, ReloadError> {
        let contents = std::fs::read_to_string(path)?;
        if contents.starts_with("broken") {
            return Err(ReloadError::Load {
                path: path.to_path_buf(),
                reason: "bad module".to_string(),
            });
        }
        let tag = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_uppercase();
        let len = contents.len() as i32;
        let processor = move |_: &[Property], _: &Node| -> Result<Vec<Property>, ProcessError> {
            Ok(vec![Property::from(len)])
        };
        Ok(vec![(tag, Arc::new(processor) as Arc<dyn Processor>)])
    }

    fn touch_later(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(secs)).unwrap();
    }

    fn call(registry: &ProcessorRegistry, tag: &str) -> Property {
        let processor = registry.get(tag).unwrap();
        processor.process(&[], &Node::new(tag, tag)).unwrap().remove(0)
    }

    #[test]
    fn test_scan_load_reload_unload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blur.mod");
        std::fs::write(&path, "abc").unwrap();

        let registry = ProcessorRegistry::new();
        let reloader = ProcessorReloader::new(dir.path(), loader, registry.clone(), Duration::from_secs(2));

        let events = reloader.scan().unwrap();
        assert_eq!(events, vec![ReloadEvent::Loaded { path: path.clone(), tags: vec!["BLUR".to_string()] }]);
        assert_eq!(call(&registry, "BLUR"), Property::from(3));

        // Unchanged file
        assert!(reloader.scan().unwrap().is_empty());

        std::fs::write(&path, "abcdef").unwrap();
        touch_later(&path, 10);
        let events = reloader.scan().unwrap();
        assert!(matches!(events.as_slice(), [ReloadEvent::Reloaded { .. }]));
        assert_eq!(call(&registry, "BLUR"), Property::from(6));

        std::fs::remove_file(&path).unwrap();
        let events = reloader.scan().unwrap();
        assert!(matches!(events.as_slice(), [ReloadEvent::Unloaded { .. }]));
        assert!(!registry.contains("BLUR"));

        let stats = reloader.stats();
        assert_eq!(stats.scans, 4);
        assert_eq!((stats.loaded, stats.reloaded, stats.unloaded), (1, 1, 1));
    }

    #[test]
    fn test_failed_module_waits_for_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mod");
        std::fs::write(&path, "broken").unwrap();

        let registry = ProcessorRegistry::new();
        let reloader = ProcessorReloader::new(dir.path(), loader, registry.clone(), Duration::from_secs(2));

        assert!(matches!(reloader.scan().unwrap().as_slice(), [ReloadEvent::Failed { .. }]));
        assert!(reloader.scan().unwrap().is_empty());
        assert!(registry.is_empty());

        std::fs::write(&path, "fixed").unwrap();
        touch_later(&path, 10);
        assert!(matches!(reloader.scan().unwrap().as_slice(), [ReloadEvent::Reloaded { .. }]));
        assert!(registry.contains("NOISE"));
        assert_eq!(reloader.stats().failed, 1);
    }

    #[test]
    fn test_watcher_picks_up_modules() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ProcessorRegistry::new();
        let mut reloader =
            ProcessorReloader::new(dir.path(), loader, registry.clone(), Duration::from_millis(10));
        reloader.start().unwrap();
        assert!(reloader.is_running());

        std::fs::write(dir.path().join("tint.mod"), "x").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !registry.contains("TINT") && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(registry.contains("TINT"));

        std::fs::remove_file(dir.path().join("tint.mod")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.contains("TINT") && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!registry.contains("TINT"));

        reloader.stop();
        assert!(!reloader.is_running());
        assert!(reloader.modules().is_empty());
    }

    #[test]
    fn test_start_binds_existing_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("grain.mod"), "xy").unwrap();
        let registry = ProcessorRegistry::new();
        let mut reloader =
            ProcessorReloader::new(dir.path(), loader, registry.clone(), Duration::from_secs(60));

        reloader.start().unwrap();
        assert_eq!(call(&registry, "GRAIN"), Property::from(2));
        assert_eq!(reloader.stats().scans, 1);
        reloader.stop();

        // Stopped reloaders still scan on demand
        std::fs::remove_file(dir.path().join("grain.mod")).unwrap();
        reloader.scan().unwrap();
        assert!(registry.is_empty());
    }
}
