//! Function-pointer tables exchanged with the native engine

use std::ffi::c_void;

/// Native log sink: raw verbosity byte, UTF-8 text pointer, text length in bytes
pub type LogFn = unsafe extern "C" fn(level: u8, text: *const u8, length: i32);

/// Native class registration step returning the native class object
pub type RegisterFn = unsafe extern "C" fn(info: *mut c_void) -> *mut c_void;

/// Native registration of one managed class descriptor
pub type RegisterClassFn = unsafe extern "C" fn(info: *mut c_void);

/// Capabilities the native engine hands to the host once, at initialization
///
/// The table is copied by the host; the native side does not need to keep it
/// alive after the initialize call returns, but the functions it points to must
/// stay callable for the lifetime of the process.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BridgeTable {
    /// Forward a message to the native log
    pub log: LogFn,

    /// Register a class with its outer package
    pub register_outer: RegisterFn,

    /// Register a class without its outer package
    pub register_inner: RegisterFn,

    /// Register a class descriptor produced by a plugin
    pub register_class: RegisterClassFn,
}

/// Loader operations the host hands back to the native engine
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LoaderTable {
    /// Discover and load every plugin bundle
    pub load: extern "C" fn(),

    /// Unload every loaded plugin
    pub unload: extern "C" fn(),

    /// Unload, then load again
    pub reload: extern "C" fn(),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    unsafe extern "C" fn log(_: u8, _: *const u8, _: i32) {}
    unsafe extern "C" fn register(info: *mut c_void) -> *mut c_void {
        info
    }
    unsafe extern "C" fn register_class(_: *mut c_void) {}

    #[test]
    fn test_tables_are_plain_pointer_arrays() {
        assert_eq!(size_of::<BridgeTable>(), 4 * size_of::<usize>());
        assert_eq!(size_of::<LoaderTable>(), 3 * size_of::<usize>());
    }

    #[test]
    fn test_bridge_table_is_copy() {
        let table = BridgeTable {
            log,
            register_outer: register,
            register_inner: register,
            register_class,
        };
        let copy = table;
        let out = unsafe { (copy.register_outer)(0x20 as *mut c_void) };
        assert_eq!(out as usize, 0x20);
        let _ = table;
    }
}
