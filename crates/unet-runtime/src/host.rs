//! Host entry points: initialize once, then load, unload and reload

use crate::bridge::{Core, NativeBridge};
use crate::config::HostConfig;
use crate::context::ContextLoader;
use crate::error::{Result, UnetError};
use crate::fault;
use crate::hot_reload::BundleWatcher;
use crate::module::UnloadReport;
use crate::registrar::MetadataRegistrar;
use crate::registry::PluginRegistry;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Snapshot of one loaded module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    /// Module name
    pub name: String,

    /// Bundle the module was loaded from
    pub bundle: PathBuf,

    /// Reload generation of the loaded code
    pub generation: u64,
}

struct HostState {
    registry: PluginRegistry,
    watcher: Option<BundleWatcher>,
}

struct HostInner {
    core: Arc<Core>,
    loader: Arc<dyn ContextLoader>,
    state: Mutex<Option<HostState>>,
}

/// The plugin host
///
/// Lifecycle calls are expected to be serialized by the caller. The internal
/// lock only keeps concurrent misuse (and the hot-reload thread) sound; a
/// lifecycle call made from inside a module callback deadlocks.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("core", &self.inner.core)
            .field("plugins_path", &self.plugins_path())
            .finish()
    }
}

impl Host {
    /// Create an uninitialized host loading bundles with `loader`
    pub fn new(loader: Arc<dyn ContextLoader>) -> Self {
        Self::with_core(Arc::new(Core::new()), loader)
    }

    /// Create an uninitialized host around an existing core
    pub fn with_core(core: Arc<Core>, loader: Arc<dyn ContextLoader>) -> Self {
        Self {
            inner: Arc::new(HostInner {
                core,
                loader,
                state: Mutex::new(None),
            }),
        }
    }

    /// The shared core
    pub fn core(&self) -> &Arc<Core> {
        &self.inner.core
    }

    /// Whether [`initialize`](Self::initialize) has succeeded
    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().is_some()
    }

    /// Store the bridge and plugins path
    ///
    /// A repeated call changes nothing: it logs a warning and returns false.
    pub fn initialize(
        &self,
        bridge: Arc<dyn NativeBridge>,
        plugins_path: impl Into<PathBuf>,
        config: HostConfig,
    ) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_some() {
            warn!("Plugin host is already initialized");
            return false;
        }

        if let Err(e) = self.inner.core.initialize(bridge) {
            warn!(error = %e, "Native bridge was already set");
            return false;
        }

        fault::install_reporter();

        let plugins_path = plugins_path.into();
        self.inner.loader.bind(&self.inner.core, &plugins_path);
        let registrar = MetadataRegistrar::new(Arc::clone(&self.inner.core), config.refresh);
        let registry = PluginRegistry::new(
            plugins_path.clone(),
            config,
            Arc::clone(&self.inner.loader),
            registrar,
        );
        *state = Some(HostState {
            registry,
            watcher: None,
        });

        info!(plugins_path = %plugins_path.display(), "Plugin host is initialized");
        true
    }

    /// Discover and load every plugin bundle
    ///
    /// Starts the hot-reload watcher after a successful pass when enabled.
    pub fn load(&self) -> Result<usize> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or(UnetError::NotInitialized)?;

        let count = state.registry.discover_and_load_all()?;
        self.start_watcher(state);
        Ok(count)
    }

    /// Unload every plugin and stop the watcher
    pub fn unload(&self) -> Result<Vec<UnloadReport>> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or(UnetError::NotInitialized)?;

        if let Some(mut watcher) = state.watcher.take() {
            watcher.stop();
        }
        Ok(state.registry.unload_all())
    }

    /// Unload, then load again
    pub fn reload(&self) -> Result<usize> {
        self.unload()?;
        self.load()
    }

    /// Reload the single module loaded from `bundle`
    pub fn reload_module(&self, bundle: &Path) -> Result<()> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or(UnetError::NotInitialized)?;
        state.registry.reload_module(bundle)
    }

    /// Loaded modules, in load order
    pub fn modules(&self) -> Result<Vec<ModuleInfo>> {
        let guard = self.inner.state.lock();
        let state = guard.as_ref().ok_or(UnetError::NotInitialized)?;

        Ok(state
            .registry
            .modules()
            .iter()
            .filter_map(|module| {
                module.entry().map(|arena| ModuleInfo {
                    name: module.name().to_string(),
                    bundle: module.bundle_path().to_path_buf(),
                    generation: arena.generation(),
                })
            })
            .collect())
    }

    /// Plugins path given at initialization
    pub fn plugins_path(&self) -> Option<PathBuf> {
        self.inner
            .state
            .lock()
            .as_ref()
            .map(|state| state.registry.plugins_path().to_path_buf())
    }

    /// Whether the hot-reload watcher is running
    pub fn is_watching(&self) -> bool {
        self.inner
            .state
            .lock()
            .as_ref()
            .and_then(|state| state.watcher.as_ref())
            .map(BundleWatcher::is_running)
            .unwrap_or(false)
    }

    fn start_watcher(&self, state: &mut HostState) {
        let config = state.registry.config();
        if !config.hot_reload.enabled || state.watcher.is_some() {
            return;
        }
        let plugins_path = state.registry.plugins_path();
        if !plugins_path.is_dir() {
            return;
        }

        let host: Weak<HostInner> = Arc::downgrade(&self.inner);
        let started = BundleWatcher::start(plugins_path, config.clone(), move |bundle| {
            if let Some(inner) = host.upgrade() {
                Host { inner }.reload_changed(bundle);
            }
        });

        match started {
            Ok(watcher) => state.watcher = Some(watcher),
            Err(e) => warn!(error = %e, "Hot reload is unavailable"),
        }
    }

    fn reload_changed(&self, bundle: &Path) {
        match fault::guard("hot reload", || self.reload_module(bundle)) {
            Ok(Ok(())) => debug!(bundle = %bundle.display(), "Hot reload complete"),
            Ok(Err(UnetError::BundleNotFound(_))) => {
                debug!(bundle = %bundle.display(), "Changed bundle is not loaded")
            }
            Ok(Err(e)) | Err(e) => {
                error!(bundle = %bundle.display(), error = %e, "Hot reload failed")
            }
        }
    }
}
