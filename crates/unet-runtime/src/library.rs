//! Dynamic library loader for plugin bundles

use crate::bridge::Core;
use crate::context::{ContextLoader, ContextOptions, LoadedModule, MetadataProvider};
use crate::error::{Result, UnetError};
use libloading::Library;
use once_cell::sync::OnceCell;
use std::fmt;
use std::fs;
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};
use unet_interop::{ClassDescriptor, PluginDeclaration, ABI_VERSION, PLUGIN_MARKER_SYMBOL};

/// Directory inside the plugins path that holds shadow copies
pub const SHADOW_DIR_NAME: &str = ".unet-shadow";

/// Extension given to shadow copies, distinct from any bundle extension
const SHADOW_EXTENSION: &str = "shadow";

type DeclarationFn = unsafe extern "C" fn() -> *const PluginDeclaration;

enum ShadowRoot {
    Plugins(PathBuf),
    Temp(TempDir),
}

impl ShadowRoot {
    fn path(&self) -> &Path {
        match self {
            Self::Plugins(path) => path,
            Self::Temp(dir) => dir.path(),
        }
    }
}

/// Loads bundles as shared libraries
///
/// With shadow copying enabled every load opens a fresh copy of the bundle.
/// The original file can then be replaced while loaded, and the platform
/// loader never hands back a cached handle for a path it has already opened.
/// Once bound to a host the copies live in [`SHADOW_DIR_NAME`] under the
/// plugins path, which is emptied on bind so copies left by a process that
/// exited without unloading do not pile up. An unbound loader copies into a
/// private temporary directory instead.
#[derive(Default)]
pub struct LibraryLoader {
    shadow_root: OnceCell<ShadowRoot>,
    core: OnceCell<Arc<Core>>,
    generation: AtomicU64,
}

impl fmt::Debug for LibraryLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryLoader")
            .field("shadow_dir", &self.shadow_dir())
            .field("bound", &self.core.get().is_some())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl LibraryLoader {
    /// Create a new loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory shadow copies are written to, once chosen
    pub fn shadow_dir(&self) -> Option<&Path> {
        self.shadow_root.get().map(ShadowRoot::path)
    }

    fn shadow_copy(&self, bundle: &Path) -> Result<PathBuf> {
        let root = self.shadow_root.get_or_try_init(|| {
            tempfile::Builder::new()
                .prefix("unet-shadow-")
                .tempdir()
                .map(ShadowRoot::Temp)
                .map_err(UnetError::from)
        })?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let stem = bundle
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bundle".to_string());
        let target = root
            .path()
            .join(format!("{stem}-{generation}.{SHADOW_EXTENSION}"));

        fs::copy(bundle, &target)
            .map_err(|e| UnetError::load_failure(bundle, format!("shadow copy failed: {e}")))?;

        Ok(target)
    }
}

/// Empty (or create) the shadow directory under `plugins_path`
fn prepare_shadow_dir(plugins_path: &Path) -> Result<PathBuf> {
    let dir = plugins_path.join(SHADOW_DIR_NAME);
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
        debug!(path = %dir.display(), "Removed stale shadow copies");
    }
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

impl ContextLoader for LibraryLoader {
    fn bind(&self, core: &Arc<Core>, plugins_path: &Path) {
        if self.core.set(Arc::clone(core)).is_err() {
            warn!("Library loader is already bound to a host");
            return;
        }

        if !plugins_path.is_dir() {
            return;
        }
        match prepare_shadow_dir(plugins_path) {
            Ok(dir) => {
                if self.shadow_root.set(ShadowRoot::Plugins(dir)).is_err() {
                    debug!("Shadow directory was chosen before the loader was bound");
                }
            }
            Err(e) => warn!(
                plugins_path = %plugins_path.display(),
                error = %e,
                "Shadow directory unavailable, using a temporary directory"
            ),
        }
    }

    fn load(&self, bundle: &Path, options: &ContextOptions) -> Result<Box<dyn LoadedModule>> {
        let shadow = if options.shadow_copy {
            Some(self.shadow_copy(bundle)?)
        } else {
            None
        };
        let image = shadow.as_deref().unwrap_or(bundle);

        // SAFETY: running a bundle's initializers is the contract of a plugin host.
        let library = match unsafe { Library::new(image) } {
            Ok(library) => library,
            Err(e) => {
                if let Some(shadow) = &shadow {
                    let _ = fs::remove_file(shadow);
                }
                return Err(UnetError::load_failure(bundle, e));
            }
        };

        let provider = find_declaration(&library, bundle);
        let name = provider
            .as_ref()
            // SAFETY: the library is still loaded.
            .and_then(|provider| unsafe { (*provider.0).name() }.map(str::to_string))
            .unwrap_or_else(|| {
                bundle
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

        let core = match (&provider, self.core.get()) {
            (Some(provider), Some(core)) => {
                let services = Core::services(core);
                // SAFETY: the module keeps both the library and the core alive
                // for as long as the bundle can call through the table.
                unsafe { (*provider.0).attach(&services) }.then(|| Arc::clone(core))
            }
            _ => None,
        };

        debug!(
            bundle = %bundle.display(),
            module = %name,
            marker = provider.is_some(),
            attached = core.is_some(),
            shadow = shadow.is_some(),
            "Library opened"
        );

        Ok(Box::new(LibraryModule {
            name,
            provider,
            core,
            library: ManuallyDrop::new(library),
            shadow,
            unloadable: options.unloadable,
        }))
    }
}

fn find_declaration(library: &Library, bundle: &Path) -> Option<DeclarationProvider> {
    // SAFETY: the marker symbol has the signature generated by `declare_plugin!`.
    let declare = unsafe { library.get::<DeclarationFn>(PLUGIN_MARKER_SYMBOL.as_bytes()) }.ok()?;

    // SAFETY: as above; the declaration is a static inside the library.
    let declaration = unsafe { declare() };
    if declaration.is_null() {
        return None;
    }

    // SAFETY: non-null and owned by the still-loaded library.
    let abi_version = unsafe { (*declaration).abi_version };
    if abi_version != ABI_VERSION {
        warn!(
            bundle = %bundle.display(),
            abi_version,
            expected = ABI_VERSION,
            "Plugin marker built against an incompatible ABI"
        );
        return None;
    }

    Some(DeclarationProvider(declaration))
}

struct DeclarationProvider(*const PluginDeclaration);

// The declaration is an immutable static of a library that outlives the provider.
unsafe impl Send for DeclarationProvider {}
unsafe impl Sync for DeclarationProvider {}

impl MetadataProvider for DeclarationProvider {
    fn class_descriptors(&self) -> Vec<ClassDescriptor> {
        // SAFETY: the owning module keeps the library loaded.
        unsafe { (*self.0).class_descriptors() }
    }
}

struct LibraryModule {
    name: String,
    provider: Option<DeclarationProvider>,
    core: Option<Arc<Core>>,
    library: ManuallyDrop<Library>,
    shadow: Option<PathBuf>,
    unloadable: bool,
}

impl LoadedModule for LibraryModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata_provider(&self) -> Option<&dyn MetadataProvider> {
        self.provider
            .as_ref()
            .map(|provider| provider as &dyn MetadataProvider)
    }
}

impl Drop for LibraryModule {
    fn drop(&mut self) {
        self.provider = None;

        if !self.unloadable {
            // Mapped code may still call through its services table.
            if let Some(core) = self.core.take() {
                std::mem::forget(core);
            }
            debug!(module = %self.name, "Module is not unloadable; code stays mapped");
            return;
        }

        // SAFETY: dropped exactly once, after the provider that points into it.
        let library = unsafe { ManuallyDrop::take(&mut self.library) };
        if let Err(e) = library.close() {
            warn!(module = %self.name, error = %e, "Failed to close library");
        }

        if let Some(shadow) = self.shadow.take() {
            if let Err(e) = fs::remove_file(&shadow) {
                debug!(path = %shadow.display(), error = %e, "Shadow copy not removed");
            }
        }
    }
}
