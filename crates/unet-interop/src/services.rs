//! Host services reachable from inside a plugin bundle
//!
//! A bundle carries its own copy of this crate, so it cannot see the host's
//! state directly. Instead the host hands every bundle a [`HostServices`]
//! table right after loading it; `declare_plugin!` stores that table here and
//! the free functions below call through it.

use crate::verbosity::{LogFlags, LogVerbosity};
use parking_lot::RwLock;
use std::ffi::c_void;

/// Log through the host: context, raw verbosity byte, UTF-8 text, text length in bytes
pub type ServiceLogFn =
    unsafe extern "C" fn(context: *const c_void, level: u8, text: *const u8, length: i32);

/// Class registration through the host, returning the native class object
pub type ServiceRegisterFn =
    unsafe extern "C" fn(context: *const c_void, info: *mut c_void) -> *mut c_void;

/// Receives the host services table once the bundle is loaded
pub type AttachFn = unsafe extern "C" fn(services: *const HostServices);

/// Capabilities the host lends to a loaded bundle
///
/// `context` is opaque to the bundle and passed back on every call. The
/// table stays valid for as long as the bundle is loaded.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HostServices {
    /// Host state the functions operate on
    pub context: *const c_void,

    /// Forward a message to the native log
    pub log: ServiceLogFn,

    /// Register a class together with its outer package
    pub register_outer: ServiceRegisterFn,

    /// Register a class without its outer package
    pub register_inner: ServiceRegisterFn,
}

// The context is owned by the host, which keeps it alive and thread safe for
// as long as the bundle is loaded.
unsafe impl Send for HostServices {}
unsafe impl Sync for HostServices {}

static SERVICES: RwLock<Option<HostServices>> = parking_lot::const_rwlock(None);

/// Store the services table handed over by the host
///
/// Called by the code `declare_plugin!` generates; a later call replaces the
/// table.
pub fn attach(services: HostServices) {
    *SERVICES.write() = Some(services);
}

/// Forget the services table
pub fn detach() {
    *SERVICES.write() = None;
}

/// Whether a host has attached to this bundle
pub fn is_attached() -> bool {
    SERVICES.read().is_some()
}

/// Write `text` to the native log at `verbosity`
///
/// Returns false when no host is attached.
pub fn log(verbosity: LogVerbosity, text: &str) -> bool {
    log_with_flags(verbosity, LogFlags::empty(), text)
}

/// Write `text` to the native log with delivery flags
pub fn log_with_flags(verbosity: LogVerbosity, flags: LogFlags, text: &str) -> bool {
    let Some(services) = *SERVICES.read() else {
        return false;
    };
    let length = i32::try_from(text.len()).unwrap_or(i32::MAX);
    // SAFETY: the host keeps the table callable while the bundle is loaded.
    unsafe { (services.log)(services.context, verbosity.encode(flags), text.as_ptr(), length) };
    true
}

/// Register a class with its outer package through the host
pub fn register_outer(info: *mut c_void) -> Option<*mut c_void> {
    let services = (*SERVICES.read())?;
    // SAFETY: as in `log_with_flags`.
    Some(unsafe { (services.register_outer)(services.context, info) })
}

/// Register a class without its outer package through the host
pub fn register_inner(info: *mut c_void) -> Option<*mut c_void> {
    let services = (*SERVICES.read())?;
    // SAFETY: as in `log_with_flags`.
    Some(unsafe { (services.register_inner)(services.context, info) })
}
