//! Module instances: one loaded bundle with its lifecycle events

use crate::config::ReclaimPolicy;
use crate::context::{
    await_reclamation, ContextLoader, ContextOptions, ExecutionContext, ModuleArena,
    TrackingHandle,
};
use crate::error::{Result, UnetError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Subscriber to `reloaded`; an error is propagated to the caller of reload
pub type ReloadHandler = Box<dyn Fn(&ModuleInstance) -> Result<()> + Send + Sync>;

/// Subscriber to `reload_failed`, `unloading` and `unloaded`
pub type ModuleObserver = Box<dyn Fn(&ModuleInstance) + Send + Sync>;

/// Outcome of tearing down one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadReport {
    /// Bundle the module was loaded from
    pub bundle: PathBuf,

    /// Whether the module arena was confirmed released
    pub reclaimed: bool,
}

#[derive(Default)]
struct Observers {
    reloaded: Vec<ReloadHandler>,
    reload_failed: Vec<ModuleObserver>,
    unloading: Vec<ModuleObserver>,
    unloaded: Vec<ModuleObserver>,
}

/// Exactly one loaded plugin bundle
///
/// Owns the bundle's execution context. Identity stays stable across in-place
/// reloads; observers see the same instance with refreshed contents.
pub struct ModuleInstance {
    bundle_path: PathBuf,
    name: String,
    context: Option<ExecutionContext>,
    entry: Option<Arc<ModuleArena>>,
    tracking: Option<TrackingHandle>,
    load_error: Option<UnetError>,
    reclaim: ReclaimPolicy,
    observers: Observers,
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("bundle_path", &self.bundle_path)
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .field("load_error", &self.load_error)
            .finish()
    }
}

impl ModuleInstance {
    /// Create an execution context for `bundle_path` and load it
    ///
    /// Always yields an instance; check [`is_loaded`](Self::is_loaded) and
    /// [`load_error`](Self::load_error) for the outcome.
    pub fn construct(
        bundle_path: impl Into<PathBuf>,
        loader: Arc<dyn ContextLoader>,
        options: ContextOptions,
        reclaim: ReclaimPolicy,
    ) -> Self {
        let bundle_path = bundle_path.into();
        let fallback_name = bundle_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut instance = Self {
            bundle_path,
            name: fallback_name,
            context: None,
            entry: None,
            tracking: None,
            load_error: None,
            reclaim,
            observers: Observers::default(),
        };

        match ExecutionContext::create(instance.bundle_path.clone(), loader, options) {
            Ok(context) => {
                let entry = context.entry();
                instance.name = entry.name().to_string();
                instance.tracking = Some(context.track());
                instance.entry = Some(entry);
                instance.context = Some(context);
                debug!(module = %instance.name, "Module instance constructed");
            }
            Err(e) => {
                debug!(
                    bundle = %instance.bundle_path.display(),
                    error = %e,
                    "Module failed to load"
                );
                instance.load_error = Some(e);
            }
        }

        instance
    }

    /// Bundle this instance was loaded from
    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    /// Module name, or the bundle's file stem when nothing is loaded
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether code is currently loaded
    pub fn is_loaded(&self) -> bool {
        self.context.is_some() && self.entry.is_some()
    }

    /// Why construction failed, if it did
    pub fn load_error(&self) -> Option<&UnetError> {
        self.load_error.as_ref()
    }

    /// Lease on the loaded code
    ///
    /// A lease still held when the module unloads keeps the arena alive and
    /// shows up as `reclaimed == false` in the [`UnloadReport`].
    pub fn entry(&self) -> Option<Arc<ModuleArena>> {
        self.entry.clone()
    }

    /// Tracking handle of the current arena
    pub fn tracking_handle(&self) -> Option<&TrackingHandle> {
        self.tracking.as_ref()
    }

    /// Subscribe to successful reloads
    pub fn on_reloaded(
        &mut self,
        handler: impl Fn(&ModuleInstance) -> Result<()> + Send + Sync + 'static,
    ) {
        self.observers.reloaded.push(Box::new(handler));
    }

    /// Subscribe to reload requests that could not be honoured
    pub fn on_reload_failed(&mut self, observer: impl Fn(&ModuleInstance) + Send + Sync + 'static) {
        self.observers.reload_failed.push(Box::new(observer));
    }

    /// Subscribe to the start of teardown
    pub fn on_unloading(&mut self, observer: impl Fn(&ModuleInstance) + Send + Sync + 'static) {
        self.observers.unloading.push(Box::new(observer));
    }

    /// Subscribe to the end of teardown
    pub fn on_unloaded(&mut self, observer: impl Fn(&ModuleInstance) + Send + Sync + 'static) {
        self.observers.unloaded.push(Box::new(observer));
    }

    fn notify(&self, observers: &[ModuleObserver]) {
        for observer in observers {
            observer(self);
        }
    }

    /// Tear the module down and verify its arena was reclaimed
    ///
    /// Returns `None` when nothing was loaded.
    pub fn unload(&mut self) -> Option<UnloadReport> {
        let context = self.context.take()?;

        self.entry = None;
        self.notify(&self.observers.unloading);

        context.unload();

        let reclaimed = match &self.tracking {
            Some(handle) => await_reclamation(handle, &self.reclaim),
            None => true,
        };
        if !reclaimed {
            warn!(
                module = %self.name,
                attempts = self.reclaim.attempts,
                "Module arena still referenced after unload"
            );
        }

        self.notify(&self.observers.unloaded);
        info!(module = %self.name, reclaimed, "Module unloaded");

        Some(UnloadReport {
            bundle: self.bundle_path.clone(),
            reclaimed,
        })
    }

    /// Reload the bundle in place
    ///
    /// Not loaded: fires `reload_failed` and returns `Ok`. A failed load
    /// keeps the current code, fires `reload_failed` and returns the error.
    /// On success the previous arena is checked for reclamation, then
    /// `reloaded` subscribers run in order; the first error is returned.
    pub fn reload(&mut self) -> Result<()> {
        let Some(context) = self.context.as_mut() else {
            warn!(module = %self.name, "Reload requested for a module that is not loaded");
            self.notify(&self.observers.reload_failed);
            return Ok(());
        };

        // Release our lease so the previous arena can be reclaimed after the swap
        let previous_entry = self.entry.take();
        let previous = match context.reload() {
            Ok(previous) => previous,
            Err(e) => {
                self.entry = previous_entry;
                error!(module = %self.name, error = %e, "Module reload failed");
                self.notify(&self.observers.reload_failed);
                return Err(e);
            }
        };
        drop(previous_entry);

        let entry = context.entry();
        self.name = entry.name().to_string();
        self.tracking = Some(context.track());
        self.entry = Some(entry);

        if !await_reclamation(&previous, &self.reclaim) {
            warn!(module = %self.name, "Previous module generation still referenced after reload");
        }

        info!(module = %self.name, "Module reloaded");

        for handler in &self.observers.reloaded {
            handler(self)?;
        }
        Ok(())
    }
}

impl Drop for ModuleInstance {
    fn drop(&mut self) {
        if self.is_loaded() {
            self.unload();
        }
    }
}
