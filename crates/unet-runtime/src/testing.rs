//! Test doubles for the native bridge and the context loader

use crate::bridge::{Core, NativeBridge};
use crate::context::{ContextLoader, ContextOptions, LoadedModule, MetadataProvider};
use crate::error::{Result, UnetError};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use unet_interop::{ClassDescriptor, LogFlags, LogVerbosity};

/// Bridge that records every call it receives
#[derive(Debug, Default)]
pub(crate) struct RecordingBridge {
    logs: Mutex<Vec<(LogVerbosity, String)>>,
    classes: Mutex<Vec<usize>>,
    outer: Mutex<Vec<usize>>,
    inner: Mutex<Vec<usize>>,
}

impl RecordingBridge {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn logs(&self) -> Vec<(LogVerbosity, String)> {
        self.logs.lock().clone()
    }

    pub(crate) fn registered_classes(&self) -> Vec<usize> {
        self.classes.lock().clone()
    }

    pub(crate) fn outer_calls(&self) -> Vec<usize> {
        self.outer.lock().clone()
    }

    pub(crate) fn inner_calls(&self) -> Vec<usize> {
        self.inner.lock().clone()
    }
}

impl NativeBridge for RecordingBridge {
    fn log(&self, verbosity: LogVerbosity, _flags: LogFlags, text: &str) {
        self.logs.lock().push((verbosity, text.to_string()));
    }

    fn register_outer(&self, info: *mut c_void) -> *mut c_void {
        self.outer.lock().push(info as usize);
        info
    }

    fn register_inner(&self, info: *mut c_void) -> *mut c_void {
        self.inner.lock().push(info as usize);
        info
    }

    fn register_class(&self, descriptor: ClassDescriptor) {
        self.classes.lock().push(descriptor.addr());
    }
}

#[derive(Debug, Clone)]
struct FakeBundle {
    name: String,
    descriptors: Vec<usize>,
    marker: bool,
    broken: bool,
    panics: bool,
    greeting: Option<String>,
}

/// In-memory loader keyed by bundle file name
#[derive(Debug, Default)]
pub(crate) struct FakeLoader {
    bundles: Mutex<HashMap<String, FakeBundle>>,
    bound: OnceCell<(Arc<Core>, PathBuf)>,
    live: Arc<AtomicUsize>,
    loads: AtomicUsize,
}

impl FakeLoader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_bundle(self, file_name: &str, bundle: FakeBundle) -> Self {
        self.bundles.lock().insert(file_name.to_string(), bundle);
        self
    }

    /// A bundle whose module carries the marker and yields `descriptors`
    pub(crate) fn with_plugin(self, file_name: &str, name: &str, descriptors: &[usize]) -> Self {
        self.with_bundle(
            file_name,
            FakeBundle {
                name: name.to_string(),
                descriptors: descriptors.to_vec(),
                marker: true,
                broken: false,
                panics: false,
                greeting: None,
            },
        )
    }

    /// A loadable bundle without the marker
    pub(crate) fn with_non_plugin(self, file_name: &str, name: &str) -> Self {
        self.with_bundle(
            file_name,
            FakeBundle {
                name: name.to_string(),
                descriptors: Vec::new(),
                marker: false,
                broken: false,
                panics: false,
                greeting: None,
            },
        )
    }

    /// A bundle whose image cannot be loaded
    pub(crate) fn with_broken(self, file_name: &str) -> Self {
        self.with_bundle(
            file_name,
            FakeBundle {
                name: file_name.to_string(),
                descriptors: Vec::new(),
                marker: true,
                broken: true,
                panics: false,
                greeting: None,
            },
        )
    }

    /// A bundle whose load panics
    pub(crate) fn with_panicking(self, file_name: &str) -> Self {
        self.with_bundle(
            file_name,
            FakeBundle {
                name: file_name.to_string(),
                descriptors: Vec::new(),
                marker: true,
                broken: false,
                panics: true,
                greeting: None,
            },
        )
    }

    /// The module logs `text` through its services table when loaded
    pub(crate) fn with_greeting(self, file_name: &str, text: &str) -> Self {
        if let Some(bundle) = self.bundles.lock().get_mut(file_name) {
            bundle.greeting = Some(text.to_string());
        }
        self
    }

    /// Plugins path passed to `bind`, once bound
    pub(crate) fn bound_path(&self) -> Option<PathBuf> {
        self.bound.get().map(|(_, path)| path.clone())
    }

    pub(crate) fn set_broken(&self, file_name: &str, broken: bool) {
        if let Some(bundle) = self.bundles.lock().get_mut(file_name) {
            bundle.broken = broken;
        }
    }

    pub(crate) fn set_descriptors(&self, file_name: &str, descriptors: &[usize]) {
        if let Some(bundle) = self.bundles.lock().get_mut(file_name) {
            bundle.descriptors = descriptors.to_vec();
        }
    }

    pub(crate) fn set_marker(&self, file_name: &str, marker: bool) {
        if let Some(bundle) = self.bundles.lock().get_mut(file_name) {
            bundle.marker = marker;
        }
    }

    /// Modules loaded and not yet dropped
    pub(crate) fn live_modules(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ContextLoader for FakeLoader {
    fn bind(&self, core: &Arc<Core>, plugins_path: &Path) {
        let _ = self.bound.set((Arc::clone(core), plugins_path.to_path_buf()));
    }

    fn load(&self, bundle: &Path, _options: &ContextOptions) -> Result<Box<dyn LoadedModule>> {
        let file_name = bundle
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let fake = self
            .bundles
            .lock()
            .get(&file_name)
            .cloned()
            .ok_or_else(|| UnetError::load_failure(bundle, "not a loadable image"))?;

        if fake.panics {
            panic!("module initializer failed in {file_name}");
        }
        if fake.broken {
            return Err(UnetError::load_failure(bundle, "corrupt image"));
        }

        if let (Some(greeting), Some((core, _))) = (&fake.greeting, self.bound.get()) {
            let services = Core::services(core);
            let level = LogVerbosity::Display.encode(LogFlags::empty());
            unsafe {
                (services.log)(services.context, level, greeting.as_ptr(), greeting.len() as i32)
            };
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeModule {
            name: fake.name,
            provider: fake.marker.then(|| FakeProvider(fake.descriptors)),
            live: Arc::clone(&self.live),
        }))
    }
}

struct FakeProvider(Vec<usize>);

impl MetadataProvider for FakeProvider {
    fn class_descriptors(&self) -> Vec<ClassDescriptor> {
        self.0
            .iter()
            .map(|&addr| ClassDescriptor::from_raw(addr as *mut c_void))
            .collect()
    }
}

struct FakeModule {
    name: String,
    provider: Option<FakeProvider>,
    live: Arc<AtomicUsize>,
}

impl LoadedModule for FakeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata_provider(&self) -> Option<&dyn MetadataProvider> {
        self.provider
            .as_ref()
            .map(|provider| provider as &dyn MetadataProvider)
    }
}

impl Drop for FakeModule {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Plugins directory holding empty files with the given names
pub(crate) fn plugins_dir(files: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    for file in files {
        fs::write(dir.path().join(file), b"").expect("write bundle");
    }
    dir
}
