//! C ABI exported to the native engine

use crate::bridge::FfiBridge;
use crate::config::HostConfig;
use crate::diagnostics;
use crate::error::Result;
use crate::fault;
use crate::host::Host;
use crate::library::LibraryLoader;
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;
use tracing::{debug, error, warn};
use unet_interop::{BridgeTable, LoaderTable};

static HOST: Lazy<Host> = Lazy::new(|| Host::new(Arc::new(LibraryLoader::new())));

static LOADER_TABLE: LoaderTable = LoaderTable {
    load: unet_load,
    unload: unet_unload,
    reload: unet_reload,
};

/// The process-wide host behind the C ABI
pub fn global_host() -> &'static Host {
    &HOST
}

/// Initialize the process-wide host
///
/// `path` is the UTF-8 plugins directory, `length` bytes long. Returns the
/// loader table, or null when an argument is invalid. Calling again returns
/// the same table without changing the host.
///
/// # Safety
///
/// `path` must point to `length` readable bytes and `bridge` to a valid
/// [`BridgeTable`] whose functions stay callable for the rest of the process.
#[no_mangle]
pub unsafe extern "C" fn unet_initialize(
    path: *const u8,
    length: i32,
    bridge: *const BridgeTable,
) -> *const LoaderTable {
    let initialized = fault::guard("initialize", || {
        if path.is_null() || bridge.is_null() || length < 0 {
            return ptr::null();
        }

        // SAFETY: checked non-null above; validity is the caller's contract.
        let bytes = unsafe { std::slice::from_raw_parts(path, length as usize) };
        let Ok(text) = std::str::from_utf8(bytes) else {
            return ptr::null();
        };
        if HOST.is_initialized() {
            warn!("Plugin host is already initialized");
            return &LOADER_TABLE as *const LoaderTable;
        }

        // SAFETY: as above.
        let table = unsafe { *bridge };

        let plugins_path = PathBuf::from(text);
        let (config, config_error) = match HostConfig::discover(&plugins_path) {
            Ok(config) => (config, None),
            Err(e) => (HostConfig::default(), Some(e)),
        };

        diagnostics::init_logging(Arc::clone(HOST.core()), &config.log_level);
        if let Some(e) = config_error {
            warn!(error = %e, "Invalid host configuration, using defaults");
        }

        // SAFETY: upheld by the caller.
        let bridge = Arc::new(unsafe { FfiBridge::new(table) });
        HOST.initialize(bridge, plugins_path, config);

        &LOADER_TABLE as *const LoaderTable
    });

    initialized.unwrap_or_else(|e| {
        error!(error = %e, "Plugin host initialization failed");
        ptr::null()
    })
}

fn run_entry<T>(operation: &str, f: impl FnOnce() -> Result<T>) {
    match fault::guard(operation, f) {
        Ok(Ok(_)) => debug!(operation, "Plugin host operation complete"),
        Ok(Err(e)) | Err(e) => error!(operation, error = %e, "Plugin host operation failed"),
    }
}

extern "C" fn unet_load() {
    run_entry("load", || HOST.load());
}

extern "C" fn unet_unload() {
    run_entry("unload", || HOST.unload());
}

extern "C" fn unet_reload() {
    run_entry("reload", || HOST.reload());
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::ffi::c_void;

    static NATIVE_LOG: Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());

    unsafe extern "C" fn native_log(_level: u8, text: *const u8, length: i32) {
        let bytes = std::slice::from_raw_parts(text, length as usize);
        NATIVE_LOG
            .lock()
            .push(String::from_utf8_lossy(bytes).into_owned());
    }

    unsafe extern "C" fn native_register(info: *mut c_void) -> *mut c_void {
        info
    }

    unsafe extern "C" fn native_register_class(_: *mut c_void) {}

    #[test]
    fn test_c_abi_round_trip() {
        let table = BridgeTable {
            log: native_log,
            register_outer: native_register,
            register_inner: native_register,
            register_class: native_register_class,
        };

        let bogus = "bad path";
        assert!(unsafe { unet_initialize(bogus.as_ptr(), -1, &table) }.is_null());
        assert!(unsafe { unet_initialize(ptr::null(), 0, &table) }.is_null());
        assert!(unsafe { unet_initialize(bogus.as_ptr(), 8, ptr::null()) }.is_null());
        let invalid = [0xffu8, 0xfe];
        assert!(unsafe { unet_initialize(invalid.as_ptr(), 2, &table) }.is_null());
        assert!(!global_host().is_initialized());

        let first = tempfile::tempdir().unwrap();
        let first_path = first.path().to_str().unwrap();
        let loader = unsafe { unet_initialize(first_path.as_ptr(), first_path.len() as i32, &table) };
        assert!(!loader.is_null());

        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("unet.toml"), "refresh = [").unwrap();
        let second_path = second.path().to_str().unwrap();
        let again =
            unsafe { unet_initialize(second_path.as_ptr(), second_path.len() as i32, &table) };
        assert_eq!(again, loader);
        assert_eq!(global_host().plugins_path().as_deref(), Some(first.path()));

        let loader = unsafe { &*loader };
        (loader.load)();
        (loader.reload)();
        (loader.unload)();

        assert!(global_host().modules().unwrap().is_empty());
        assert!(NATIVE_LOG
            .lock()
            .iter()
            .any(|line| line.starts_with("Plugin host is initialized")));
        assert!(NATIVE_LOG
            .lock()
            .iter()
            .any(|line| line == "Plugin host is already initialized"));
        assert!(!NATIVE_LOG
            .lock()
            .iter()
            .any(|line| line.starts_with("Invalid host configuration")));
    }
}
