//! Native bridge: the host's view of the engine's callback table

use crate::error::{Result, UnetError};
use crate::fault;
use once_cell::sync::OnceCell;
use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::sync::Arc;
use unet_interop::{BridgeTable, ClassDescriptor, HostServices, LogFlags, LogVerbosity};

/// Capabilities the native engine exposes to the host and its modules
///
/// Payload pointers are opaque: implementations forward them untouched.
pub trait NativeBridge: Send + Sync {
    /// Write a message to the native log
    fn log(&self, verbosity: LogVerbosity, flags: LogFlags, text: &str);

    /// Register a class together with its outer package
    fn register_outer(&self, info: *mut c_void) -> *mut c_void;

    /// Register a class without its outer package
    fn register_inner(&self, info: *mut c_void) -> *mut c_void;

    /// Register one class descriptor yielded by a module
    fn register_class(&self, descriptor: ClassDescriptor);
}

/// [`NativeBridge`] backed by the engine's C function-pointer table
#[derive(Debug, Clone, Copy)]
pub struct FfiBridge {
    table: BridgeTable,
}

impl FfiBridge {
    /// Wrap a bridge table
    ///
    /// # Safety
    ///
    /// Every function in `table` must remain callable, from any thread, for
    /// the rest of the process.
    pub unsafe fn new(table: BridgeTable) -> Self {
        Self { table }
    }

    /// The wrapped table
    pub fn table(&self) -> &BridgeTable {
        &self.table
    }
}

impl NativeBridge for FfiBridge {
    fn log(&self, verbosity: LogVerbosity, flags: LogFlags, text: &str) {
        let length = i32::try_from(text.len()).unwrap_or(i32::MAX);
        // SAFETY: upheld by FfiBridge::new; the text outlives the call.
        unsafe { (self.table.log)(verbosity.encode(flags), text.as_ptr(), length) }
    }

    fn register_outer(&self, info: *mut c_void) -> *mut c_void {
        // SAFETY: upheld by FfiBridge::new.
        unsafe { (self.table.register_outer)(info) }
    }

    fn register_inner(&self, info: *mut c_void) -> *mut c_void {
        // SAFETY: upheld by FfiBridge::new.
        unsafe { (self.table.register_inner)(info) }
    }

    fn register_class(&self, descriptor: ClassDescriptor) {
        // SAFETY: upheld by FfiBridge::new.
        unsafe { (self.table.register_class)(descriptor.as_ptr()) }
    }
}

/// Holder of the native bridge, set exactly once
///
/// Shared read-only by every component after initialization.
#[derive(Default)]
pub struct Core {
    bridge: OnceCell<Arc<dyn NativeBridge>>,
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Core {
    /// Create an uninitialized core
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the native bridge
    ///
    /// Fails with [`UnetError::AlreadyInitialized`] on every call after the first.
    pub fn initialize(&self, bridge: Arc<dyn NativeBridge>) -> Result<()> {
        self.bridge
            .set(bridge)
            .map_err(|_| UnetError::AlreadyInitialized)
    }

    /// Whether the bridge has been set
    pub fn is_initialized(&self) -> bool {
        self.bridge.get().is_some()
    }

    /// The native bridge
    pub fn bridge(&self) -> Result<&Arc<dyn NativeBridge>> {
        self.bridge.get().ok_or(UnetError::NotInitialized)
    }

    /// Pass-through to the native outer registration
    pub fn register_outer(&self, info: *mut c_void) -> Result<*mut c_void> {
        Ok(self.bridge()?.register_outer(info))
    }

    /// Pass-through to the native inner registration
    pub fn register_inner(&self, info: *mut c_void) -> Result<*mut c_void> {
        Ok(self.bridge()?.register_inner(info))
    }

    /// Pass-through to the native class registration
    pub fn register_class(&self, descriptor: ClassDescriptor) -> Result<()> {
        self.bridge()?.register_class(descriptor);
        Ok(())
    }

    /// Services table lending this core to a loaded bundle
    ///
    /// The table points at `core`, so the caller must keep `core` alive for
    /// as long as any bundle holding the table stays loaded.
    pub fn services(core: &Arc<Core>) -> HostServices {
        HostServices {
            context: Arc::as_ptr(core) as *const c_void,
            log: service_log,
            register_outer: service_register_outer,
            register_inner: service_register_inner,
        }
    }
}

unsafe extern "C" fn service_log(context: *const c_void, level: u8, text: *const u8, length: i32) {
    if context.is_null() || text.is_null() || length < 0 {
        return;
    }
    // SAFETY: `context` comes from `Core::services` and outlives the bundle.
    let core = unsafe { &*(context as *const Core) };
    // SAFETY: the bundle passes `length` readable bytes.
    let bytes = unsafe { std::slice::from_raw_parts(text, length as usize) };
    let message = String::from_utf8_lossy(bytes);

    let (Some(verbosity), flags) = LogVerbosity::decode(level) else {
        return;
    };
    if let Ok(bridge) = core.bridge() {
        let _ = fault::guard("module log", || bridge.log(verbosity, flags, &message));
    }
}

unsafe extern "C" fn service_register_outer(context: *const c_void, info: *mut c_void) -> *mut c_void {
    if context.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: as in `service_log`.
    let core = unsafe { &*(context as *const Core) };
    fault::guard("module register_outer", || core.register_outer(info))
        .ok()
        .and_then(|registered| registered.ok())
        .unwrap_or(ptr::null_mut())
}

unsafe extern "C" fn service_register_inner(context: *const c_void, info: *mut c_void) -> *mut c_void {
    if context.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: as in `service_log`.
    let core = unsafe { &*(context as *const Core) };
    fault::guard("module register_inner", || core.register_inner(info))
        .ok()
        .and_then(|registered| registered.ok())
        .unwrap_or(ptr::null_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBridge;
    use parking_lot::Mutex;

    #[test]
    fn test_initialize_once() {
        let core = Core::new();
        assert!(!core.is_initialized());

        core.initialize(Arc::new(RecordingBridge::new())).unwrap();
        assert!(core.is_initialized());

        let second = core.initialize(Arc::new(RecordingBridge::new()));
        assert!(matches!(second, Err(UnetError::AlreadyInitialized)));
    }

    #[test]
    fn test_calls_before_initialize() {
        let core = Core::new();

        assert!(matches!(core.bridge(), Err(UnetError::NotInitialized)));
        assert!(matches!(
            core.register_class(ClassDescriptor::from_raw(std::ptr::null_mut())),
            Err(UnetError::NotInitialized)
        ));
        assert!(matches!(
            core.register_outer(std::ptr::null_mut()),
            Err(UnetError::NotInitialized)
        ));
    }

    #[test]
    fn test_pass_through_registrations() {
        let bridge = Arc::new(RecordingBridge::new());
        let core = Core::new();
        core.initialize(bridge.clone()).unwrap();

        let info = 0x40 as *mut c_void;
        assert_eq!(core.register_outer(info).unwrap(), info);
        assert_eq!(core.register_inner(info).unwrap(), info);
        core.register_class(ClassDescriptor::from_raw(info)).unwrap();

        assert_eq!(bridge.outer_calls(), vec![0x40]);
        assert_eq!(bridge.inner_calls(), vec![0x40]);
        assert_eq!(bridge.registered_classes(), vec![0x40]);
    }

    #[test]
    fn test_services_route_bundle_calls_to_bridge() {
        let bridge = Arc::new(RecordingBridge::new());
        let core = Arc::new(Core::new());
        core.initialize(bridge.clone()).unwrap();
        let services = Core::services(&core);

        let text = "spawned 3 actors";
        let level = LogVerbosity::Display.encode(LogFlags::empty());
        unsafe { (services.log)(services.context, level, text.as_ptr(), text.len() as i32) };

        let info = 0x80 as *mut c_void;
        let outer = unsafe { (services.register_outer)(services.context, info) };
        let inner = unsafe { (services.register_inner)(services.context, info) };

        assert_eq!(outer, info);
        assert_eq!(inner, info);
        assert_eq!(bridge.logs(), vec![(LogVerbosity::Display, text.to_string())]);
        assert_eq!(bridge.outer_calls(), vec![0x80]);
        assert_eq!(bridge.inner_calls(), vec![0x80]);
    }

    #[test]
    fn test_services_before_initialize_are_inert() {
        let core = Arc::new(Core::new());
        let services = Core::services(&core);

        let text = "early";
        unsafe { (services.log)(services.context, 4, text.as_ptr(), text.len() as i32) };
        let outer = unsafe { (services.register_outer)(services.context, 0x80 as *mut c_void) };

        assert!(outer.is_null());
    }

    static FFI_LOG: Mutex<Vec<(u8, String)>> = parking_lot::const_mutex(Vec::new());

    unsafe extern "C" fn ffi_log(level: u8, text: *const u8, length: i32) {
        let bytes = std::slice::from_raw_parts(text, length as usize);
        FFI_LOG
            .lock()
            .push((level, String::from_utf8_lossy(bytes).into_owned()));
    }

    unsafe extern "C" fn ffi_register(info: *mut c_void) -> *mut c_void {
        info
    }

    unsafe extern "C" fn ffi_register_class(_: *mut c_void) {}

    #[test]
    fn test_ffi_bridge_encodes_text_and_level() {
        let bridge = unsafe {
            FfiBridge::new(BridgeTable {
                log: ffi_log,
                register_outer: ffi_register,
                register_inner: ffi_register,
                register_class: ffi_register_class,
            })
        };

        bridge.log(LogVerbosity::Warning, LogFlags::SET_COLOR, "héllo");

        let log = FFI_LOG.lock();
        assert_eq!(log.as_slice(), &[(0x43, "héllo".to_string())]);
    }
}
