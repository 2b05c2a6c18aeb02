//! Plugin-side declarations: the plugin marker and its metadata provider

use crate::services::{AttachFn, HostServices};
use crate::ABI_VERSION;
use std::ffi::{c_char, c_void, CStr};

/// Opaque handle to one native-registrable class
///
/// The host never looks behind the pointer; it only forwards it to the
/// native `register_class` callback.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassDescriptor(*mut c_void);

// Descriptors point at immutable, 'static class information owned by the
// plugin bundle; the host only moves the pointer around.
unsafe impl Send for ClassDescriptor {}
unsafe impl Sync for ClassDescriptor {}

impl ClassDescriptor {
    /// Wrap a raw class information pointer
    pub const fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    /// Point at a static class information record
    pub const fn from_static<T>(info: &'static T) -> Self {
        Self(info as *const T as *mut c_void)
    }

    /// The raw pointer handed to the native side
    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    /// Address of the class information, for logging and comparisons
    pub fn addr(self) -> usize {
        self.0 as usize
    }

    /// Whether the descriptor is null
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Metadata provider: writes the descriptor count and returns the first descriptor
pub type ClassesFn = unsafe extern "C" fn(count: *mut usize) -> *const ClassDescriptor;

/// The plugin marker exported by a bundle
///
/// Returned by the `unet_plugin_declaration` symbol. Everything it points to
/// lives inside the bundle and is only valid while the bundle stays loaded.
#[repr(C)]
#[derive(Debug)]
pub struct PluginDeclaration {
    /// Layout version the bundle was built against
    pub abi_version: u32,

    /// NUL-terminated UTF-8 plugin name
    pub name: *const c_char,

    /// Metadata provider yielding the bundle's class descriptors
    pub classes: ClassesFn,

    /// Receives the host services table after the bundle is loaded
    pub attach: Option<AttachFn>,
}

// Declarations are immutable statics inside the bundle.
unsafe impl Sync for PluginDeclaration {}

impl PluginDeclaration {
    /// Whether the bundle was built against this host's layout
    pub fn is_compatible(&self) -> bool {
        self.abi_version == ABI_VERSION
    }

    /// Plugin name, if present and valid UTF-8
    ///
    /// # Safety
    ///
    /// The declaring bundle must still be loaded.
    pub unsafe fn name(&self) -> Option<&str> {
        if self.name.is_null() {
            return None;
        }
        CStr::from_ptr(self.name).to_str().ok()
    }

    /// Ask the metadata provider for its class descriptors, in provider order
    ///
    /// # Safety
    ///
    /// The declaring bundle must still be loaded.
    pub unsafe fn class_descriptors(&self) -> Vec<ClassDescriptor> {
        let mut count = 0usize;
        let first = (self.classes)(&mut count);
        if first.is_null() || count == 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts(first, count).to_vec()
    }

    /// Hand the host services table to the bundle
    ///
    /// Returns false when the bundle does not accept one.
    ///
    /// # Safety
    ///
    /// The declaring bundle must still be loaded, and `services` must stay
    /// valid for as long as it is.
    pub unsafe fn attach(&self, services: &HostServices) -> bool {
        match self.attach {
            Some(attach) => {
                attach(services);
                true
            }
            None => false,
        }
    }
}

/// Export the plugin marker for a bundle
///
/// Takes the plugin name as a string literal and the path of a function
/// `fn() -> &'static [ClassDescriptor]` acting as the metadata provider.
/// An optional third argument names a `fn()` run once the host has attached
/// its services, the first point at which the bundle can log through
/// [`services::log`](crate::services::log).
/// A bundle can invoke this at most once: the exported symbol name is fixed.
#[macro_export]
macro_rules! declare_plugin {
    (@emit $name:literal, $provider:path, $on_attach:expr) => {
        #[no_mangle]
        pub extern "C" fn unet_plugin_declaration() -> *const $crate::PluginDeclaration {
            unsafe extern "C" fn __unet_provide_classes(
                count: *mut usize,
            ) -> *const $crate::ClassDescriptor {
                let provided: &'static [$crate::ClassDescriptor] = $provider();
                if !count.is_null() {
                    *count = provided.len();
                }
                provided.as_ptr()
            }

            unsafe extern "C" fn __unet_attach(services: *const $crate::HostServices) {
                if let Some(services) = services.as_ref() {
                    $crate::services::attach(*services);
                    ($on_attach)();
                }
            }

            static DECLARATION: $crate::PluginDeclaration = $crate::PluginDeclaration {
                abi_version: $crate::ABI_VERSION,
                name: concat!($name, "\0").as_ptr() as *const ::std::ffi::c_char,
                classes: __unet_provide_classes,
                attach: Some(__unet_attach),
            };

            &DECLARATION
        }
    };
    ($name:literal, $provider:path) => {
        $crate::declare_plugin!(@emit $name, $provider, || {});
    };
    ($name:literal, $provider:path, $on_attach:expr) => {
        $crate::declare_plugin!(@emit $name, $provider, $on_attach);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Info(u32);

    static FIRST: Info = Info(1);
    static SECOND: Info = Info(2);
    static CLASSES: [ClassDescriptor; 2] = [
        ClassDescriptor::from_static(&FIRST),
        ClassDescriptor::from_static(&SECOND),
    ];

    fn classes() -> &'static [ClassDescriptor] {
        &CLASSES
    }

    crate::declare_plugin!("interop-test", classes);

    #[test]
    fn test_declared_marker() {
        let declaration = unsafe { &*unet_plugin_declaration() };
        assert!(declaration.is_compatible());
        assert_eq!(unsafe { declaration.name() }, Some("interop-test"));
    }

    #[test]
    fn test_descriptors_keep_provider_order() {
        let declaration = unsafe { &*unet_plugin_declaration() };
        let descriptors = unsafe { declaration.class_descriptors() };

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].addr(), &FIRST as *const Info as usize);
        assert_eq!(descriptors[1].addr(), &SECOND as *const Info as usize);
        assert_eq!(FIRST.0 + SECOND.0, 3);
    }

    unsafe extern "C" fn ignore_log(_: *const c_void, _: u8, _: *const u8, _: i32) {}
    unsafe extern "C" fn ignore_register(_: *const c_void, info: *mut c_void) -> *mut c_void {
        info
    }

    fn unused_services() -> HostServices {
        HostServices {
            context: std::ptr::null(),
            log: ignore_log,
            register_outer: ignore_register,
            register_inner: ignore_register,
        }
    }

    #[test]
    fn test_declared_marker_accepts_services() {
        let declaration = unsafe { &*unet_plugin_declaration() };
        let attach = declaration.attach.expect("declare_plugin! emits an attach hook");

        // A null table is ignored rather than dereferenced
        unsafe { attach(std::ptr::null()) };
    }

    #[test]
    fn test_empty_provider() {
        unsafe extern "C" fn none(count: *mut usize) -> *const ClassDescriptor {
            *count = 0;
            std::ptr::null()
        }

        let declaration = PluginDeclaration {
            abi_version: ABI_VERSION + 1,
            name: std::ptr::null(),
            classes: none,
            attach: None,
        };

        assert!(!declaration.is_compatible());
        assert_eq!(unsafe { declaration.name() }, None);
        assert!(unsafe { declaration.class_descriptors() }.is_empty());
        assert!(!unsafe { declaration.attach(&unused_services()) });
    }
}
