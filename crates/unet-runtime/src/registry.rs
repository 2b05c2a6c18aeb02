//! Plugin registry: the set of loaded module instances

use crate::config::HostConfig;
use crate::context::{ContextLoader, ContextOptions};
use crate::error::{Result, UnetError};
use crate::library::SHADOW_DIR_NAME;
use crate::module::{ModuleInstance, UnloadReport};
use crate::registrar::MetadataRegistrar;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Owns every loaded [`ModuleInstance`] and drives bulk lifecycle operations
pub struct PluginRegistry {
    plugins_path: PathBuf,
    config: HostConfig,
    loader: Arc<dyn ContextLoader>,
    registrar: MetadataRegistrar,
    loaded: Vec<ModuleInstance>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins_path", &self.plugins_path)
            .field("loaded", &self.loaded)
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry over `plugins_path`
    pub fn new(
        plugins_path: impl Into<PathBuf>,
        config: HostConfig,
        loader: Arc<dyn ContextLoader>,
        registrar: MetadataRegistrar,
    ) -> Self {
        Self {
            plugins_path: plugins_path.into(),
            config,
            loader,
            registrar,
            loaded: Vec::new(),
        }
    }

    /// Root of bundle discovery
    pub fn plugins_path(&self) -> &Path {
        &self.plugins_path
    }

    /// Active configuration
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Loaded modules, in load order
    pub fn modules(&self) -> &[ModuleInstance] {
        &self.loaded
    }

    /// Number of loaded modules
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    /// Whether no module is loaded
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Bundle files under the plugins path, recursively
    ///
    /// Entries are sorted by file name within each directory.
    pub fn discover(&self) -> Vec<PathBuf> {
        if !self.plugins_path.is_dir() {
            warn!(
                path = %self.plugins_path.display(),
                "Plugins directory does not exist"
            );
            return Vec::new();
        }

        WalkDir::new(&self.plugins_path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.file_name() != SHADOW_DIR_NAME)
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable plugins directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.config.is_bundle(entry.path()))
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Discover every bundle and load it, fail-fast
    ///
    /// The first failing candidate aborts the pass. Modules appended earlier
    /// in the same pass stay loaded unless `rollback_on_failure` is set.
    /// Returns the number of modules loaded by this pass.
    pub fn discover_and_load_all(&mut self) -> Result<usize> {
        let candidates = self.discover();
        let start = self.loaded.len();

        debug!(candidates = candidates.len(), "Plugin bundles discovered");

        for path in candidates {
            if let Err(e) = self.load_candidate(path) {
                if self.config.rollback_on_failure {
                    self.roll_back(start);
                }
                return Err(e);
            }
        }

        let count = self.loaded.len() - start;
        info!(count, path = %self.plugins_path.display(), "Plugins loaded");
        Ok(count)
    }

    fn load_candidate(&mut self, path: PathBuf) -> Result<()> {
        if !path.exists() {
            return Err(UnetError::bundle_not_found(path));
        }

        let mut instance = ModuleInstance::construct(
            path,
            Arc::clone(&self.loader),
            ContextOptions::from(&self.config),
            self.config.reclaim.clone(),
        );

        if !instance.is_loaded() {
            let reason = match instance.load_error() {
                Some(UnetError::LoadFailure { reason, .. }) => reason.clone(),
                Some(other) => other.to_string(),
                None => "module did not load".to_string(),
            };
            return Err(UnetError::load_failure(instance.bundle_path(), reason));
        }

        let has_marker = instance
            .entry()
            .map(|arena| arena.module().metadata_provider().is_some())
            .unwrap_or(false);
        if !has_marker {
            return Err(UnetError::not_a_plugin(instance.name()));
        }

        let registrar = self.registrar.clone();
        instance.on_reloaded(move |module| refresh_reloaded(&registrar, module).map(|_| ()));

        self.loaded.push(instance);
        if let Some(module) = self.loaded.last() {
            self.registrar.register_all(module)?;
        }
        Ok(())
    }

    fn roll_back(&mut self, start: usize) {
        let appended: Vec<_> = self.loaded.drain(start..).collect();
        warn!(count = appended.len(), "Rolling back modules loaded by the failed pass");

        for mut instance in appended.into_iter().rev() {
            instance.unload();
        }
    }

    /// Reload hook attached to every registered instance
    pub fn on_module_reloaded(&self, instance: &ModuleInstance) -> Result<usize> {
        refresh_reloaded(&self.registrar, instance)
    }

    /// Unload every module
    ///
    /// The loaded set is always emptied, whatever individual unloads report.
    pub fn unload_all(&mut self) -> Vec<UnloadReport> {
        let reports: Vec<_> = self
            .loaded
            .drain(..)
            .filter_map(|mut instance| instance.unload())
            .collect();

        let unreclaimed = reports.iter().filter(|report| !report.reclaimed).count();
        if unreclaimed > 0 {
            warn!(unreclaimed, "Some modules were not reclaimed after unload");
        }
        info!(count = reports.len(), "Plugins unloaded");

        reports
    }

    /// Reload the module loaded from `path` in place
    pub fn reload_module(&mut self, path: &Path) -> Result<()> {
        let instance = self
            .loaded
            .iter_mut()
            .find(|instance| same_file(instance.bundle_path(), path))
            .ok_or_else(|| UnetError::bundle_not_found(path))?;

        instance.reload()
    }
}

fn refresh_reloaded(registrar: &MetadataRegistrar, instance: &ModuleInstance) -> Result<usize> {
    if !instance.is_loaded() {
        return Err(UnetError::invalid_reload_state(instance.name()));
    }
    registrar.refresh(instance)
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
