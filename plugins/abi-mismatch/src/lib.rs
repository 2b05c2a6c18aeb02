//! Bundle exporting a plugin marker from a newer declaration layout
//!
//! The host must refuse it as not a plugin instead of reading fields it does
//! not understand.

use std::ffi::c_char;
use unet_interop::{ClassDescriptor, PluginDeclaration, ABI_VERSION};

unsafe extern "C" fn no_classes(count: *mut usize) -> *const ClassDescriptor {
    if !count.is_null() {
        *count = 0;
    }
    std::ptr::null()
}

static DECLARATION: PluginDeclaration = PluginDeclaration {
    abi_version: ABI_VERSION + 1,
    name: b"abi-mismatch\0".as_ptr() as *const c_char,
    classes: no_classes,
    attach: None,
};

/// Plugin marker with a future layout version
#[no_mangle]
pub extern "C" fn unet_plugin_declaration() -> *const PluginDeclaration {
    &DECLARATION
}
