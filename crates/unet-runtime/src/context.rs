//! Execution contexts: reclaimable arenas holding the code of one bundle

use crate::bridge::Core;
use crate::config::{HostConfig, ReclaimPolicy};
use crate::error::Result;
use crate::fault;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, trace};
use unet_interop::ClassDescriptor;

/// Source of a module's class descriptors, exposed through its plugin marker
pub trait MetadataProvider: Send + Sync {
    /// Class descriptors in the order the native side should register them
    fn class_descriptors(&self) -> Vec<ClassDescriptor>;
}

/// Code loaded from one bundle
pub trait LoadedModule: Send + Sync {
    /// Module name, used in diagnostics
    fn name(&self) -> &str;

    /// The provider behind the module's plugin marker, if it declares one
    fn metadata_provider(&self) -> Option<&dyn MetadataProvider>;
}

/// Loads a bundle's default module
pub trait ContextLoader: Send + Sync {
    /// Load the module contained in `bundle`
    fn load(&self, bundle: &Path, options: &ContextOptions) -> Result<Box<dyn LoadedModule>>;

    /// Called once when the host initializes, before any load
    ///
    /// `core` is the core whose services loaded modules receive and
    /// `plugins_path` the directory bundles are discovered in.
    fn bind(&self, _core: &Arc<Core>, _plugins_path: &Path) {}
}

/// How a context loads and releases its code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// Load from a private copy so the bundle file can be replaced while loaded
    pub shadow_copy: bool,

    /// Release the code when the context is torn down
    pub unloadable: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            shadow_copy: true,
            unloadable: true,
        }
    }
}

impl From<&HostConfig> for ContextOptions {
    fn from(config: &HostConfig) -> Self {
        Self {
            shadow_copy: config.shadow_copy,
            unloadable: config.unloadable,
        }
    }
}

/// Everything loaded from one bundle generation
///
/// Dropping the last strong reference releases the module.
pub struct ModuleArena {
    bundle: PathBuf,
    generation: u64,
    module: Box<dyn LoadedModule>,
}

impl fmt::Debug for ModuleArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleArena")
            .field("bundle", &self.bundle)
            .field("generation", &self.generation)
            .field("module", &self.module.name())
            .finish()
    }
}

impl ModuleArena {
    /// The loaded module
    pub fn module(&self) -> &dyn LoadedModule {
        self.module.as_ref()
    }

    /// Module name
    pub fn name(&self) -> &str {
        self.module.name()
    }

    /// Bundle the module was loaded from
    pub fn bundle(&self) -> &Path {
        &self.bundle
    }

    /// Load generation within the owning context, starting at zero
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for ModuleArena {
    fn drop(&mut self) {
        trace!(
            module = %self.module.name(),
            generation = self.generation,
            "Module arena released"
        );
    }
}

/// Non-owning handle used to confirm that an arena was reclaimed
#[derive(Debug, Clone)]
pub struct TrackingHandle(Weak<ModuleArena>);

impl TrackingHandle {
    /// Whether anything still holds the arena
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// Isolation boundary owning exactly one module arena
pub struct ExecutionContext {
    bundle: PathBuf,
    options: ContextOptions,
    loader: Arc<dyn ContextLoader>,
    arena: Arc<ModuleArena>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("bundle", &self.bundle)
            .field("options", &self.options)
            .field("arena", &self.arena)
            .finish()
    }
}

impl ExecutionContext {
    /// Create a context and load the bundle's default module into it
    pub fn create(
        bundle: impl Into<PathBuf>,
        loader: Arc<dyn ContextLoader>,
        options: ContextOptions,
    ) -> Result<Self> {
        let bundle = bundle.into();
        let arena = Self::load_arena(&bundle, loader.as_ref(), &options, 0)?;

        Ok(Self {
            bundle,
            options,
            loader,
            arena,
        })
    }

    fn load_arena(
        bundle: &Path,
        loader: &dyn ContextLoader,
        options: &ContextOptions,
        generation: u64,
    ) -> Result<Arc<ModuleArena>> {
        let module = fault::guard("bundle load", || loader.load(bundle, options))??;

        debug!(
            bundle = %bundle.display(),
            module = %module.name(),
            generation,
            "Module loaded into context"
        );

        Ok(Arc::new(ModuleArena {
            bundle: bundle.to_path_buf(),
            generation,
            module,
        }))
    }

    /// Strong handle to the current arena
    pub fn entry(&self) -> Arc<ModuleArena> {
        Arc::clone(&self.arena)
    }

    /// Tracking handle for the current arena
    pub fn track(&self) -> TrackingHandle {
        TrackingHandle(Arc::downgrade(&self.arena))
    }

    /// Bundle path
    pub fn bundle(&self) -> &Path {
        &self.bundle
    }

    /// Load options
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Swap in freshly loaded code from the same bundle
    ///
    /// The new generation is loaded before the current one is released, so a
    /// failed reload leaves the context untouched. Returns the tracking handle
    /// of the replaced arena.
    pub fn reload(&mut self) -> Result<TrackingHandle> {
        let generation = self.arena.generation + 1;
        let fresh = Self::load_arena(&self.bundle, self.loader.as_ref(), &self.options, generation)?;

        let previous = std::mem::replace(&mut self.arena, fresh);
        let handle = TrackingHandle(Arc::downgrade(&previous));
        drop(previous);

        Ok(handle)
    }

    /// Tear the context down, dropping its strong reference to the arena
    pub fn unload(self) {
        debug!(bundle = %self.bundle.display(), "Execution context unloading");
    }
}

/// Block until `handle` reports the arena reclaimed or the policy gives up
///
/// Returns whether the arena was reclaimed.
pub fn await_reclamation(handle: &TrackingHandle, policy: &ReclaimPolicy) -> bool {
    for attempt in 0..policy.attempts {
        if !handle.is_alive() {
            return true;
        }
        trace!(attempt, "Waiting for module arena to be released");
        thread::sleep(policy.interval);
    }
    !handle.is_alive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLoader;
    use std::time::Duration;

    fn quick_policy() -> ReclaimPolicy {
        ReclaimPolicy {
            attempts: 2,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_create_and_unload_reclaims() {
        let loader = Arc::new(FakeLoader::new().with_plugin("a.unetplugin", "A", &[1]));
        let context =
            ExecutionContext::create("/p/a.unetplugin", loader.clone(), ContextOptions::default())
                .unwrap();

        let handle = context.track();
        assert!(handle.is_alive());
        assert_eq!(context.entry().name(), "A");
        assert_eq!(loader.live_modules(), 1);

        context.unload();
        assert!(await_reclamation(&handle, &quick_policy()));
        assert_eq!(loader.live_modules(), 0);
    }

    #[test]
    fn test_outstanding_lease_blocks_reclamation() {
        let loader = Arc::new(FakeLoader::new().with_plugin("a.unetplugin", "A", &[1]));
        let context =
            ExecutionContext::create("/p/a.unetplugin", loader, ContextOptions::default()).unwrap();

        let handle = context.track();
        let lease = context.entry();
        context.unload();

        assert!(!await_reclamation(&handle, &quick_policy()));
        drop(lease);
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_reload_swaps_generation() {
        let loader = Arc::new(FakeLoader::new().with_plugin("a.unetplugin", "A", &[1]));
        let mut context =
            ExecutionContext::create("/p/a.unetplugin", loader.clone(), ContextOptions::default())
                .unwrap();

        let previous = context.reload().unwrap();

        assert!(!previous.is_alive());
        assert_eq!(context.entry().generation(), 1);
        assert_eq!(loader.load_count(), 2);
        assert_eq!(loader.live_modules(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_current_arena() {
        let loader = Arc::new(FakeLoader::new().with_plugin("a.unetplugin", "A", &[1]));
        let mut context =
            ExecutionContext::create("/p/a.unetplugin", loader.clone(), ContextOptions::default())
                .unwrap();

        loader.set_broken("a.unetplugin", true);
        assert!(context.reload().is_err());
        assert_eq!(context.entry().generation(), 0);
    }

    #[test]
    fn test_panicking_loader_is_contained() {
        let loader = Arc::new(FakeLoader::new().with_panicking("boom.unetplugin"));
        let result =
            ExecutionContext::create("/p/boom.unetplugin", loader, ContextOptions::default());

        assert!(matches!(result, Err(crate::UnetError::Fault(_))));
    }
}
