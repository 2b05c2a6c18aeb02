//! # UNET Interop
//!
//! The C ABI spoken across the three sides of a UNET deployment:
//!
//! - **Native engine → host**: the [`BridgeTable`] of logging and class
//!   registration callbacks handed over once at initialization.
//! - **Host → native engine**: the [`LoaderTable`] returned from
//!   initialization, used to load, unload and reload plugins.
//! - **Plugin bundle → host**: the [`PluginDeclaration`] exported through the
//!   plugin marker symbol, produced by [`declare_plugin!`].
//! - **Host → plugin bundle**: the [`HostServices`] table handed to each
//!   bundle after loading, through which bundle code logs with
//!   [`services::log`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use unet_interop::{declare_plugin, ClassDescriptor};
//!
//! #[repr(C)]
//! struct ActorInfo {
//!     class_name: *const u8,
//! }
//!
//! unsafe impl Sync for ActorInfo {}
//!
//! static ACTOR: ActorInfo = ActorInfo { class_name: b"MyActor\0".as_ptr() };
//! static CLASSES: [ClassDescriptor; 1] = [ClassDescriptor::from_static(&ACTOR)];
//!
//! fn classes() -> &'static [ClassDescriptor] {
//!     &CLASSES
//! }
//!
//! declare_plugin!("my-plugin", classes);
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod bridge;
pub mod plugin;
pub mod services;
pub mod verbosity;

pub use bridge::{BridgeTable, LoaderTable, LogFn, RegisterClassFn, RegisterFn};
pub use plugin::{ClassDescriptor, ClassesFn, PluginDeclaration};
pub use services::{AttachFn, HostServices, ServiceLogFn, ServiceRegisterFn};
pub use verbosity::{LogFlags, LogVerbosity, VERBOSITY_MASK};

/// Version of the plugin declaration layout
///
/// Bumped whenever [`PluginDeclaration`], [`HostServices`] or
/// [`ClassDescriptor`] change shape.
pub const ABI_VERSION: u32 = 2;

/// Name of the symbol every plugin bundle exports as its plugin marker
pub const PLUGIN_MARKER_SYMBOL: &str = "unet_plugin_declaration";

/// File extension (without the dot) that marks a file as a plugin bundle
pub const DEFAULT_BUNDLE_EXTENSION: &str = "unetplugin";

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" {
        // Resolved by the linker against the marker that `declare_plugin!`
        // exports in the plugin tests, so this only links when the macro
        // emits exactly this symbol name.
        fn unet_plugin_declaration() -> *const PluginDeclaration;
    }

    #[test]
    fn test_marker_symbol_matches_macro_export() {
        assert_eq!(PLUGIN_MARKER_SYMBOL, "unet_plugin_declaration");

        let declaration = unsafe { &*unet_plugin_declaration() };
        assert!(declaration.is_compatible());
        assert_eq!(unsafe { declaration.name() }, Some("interop-test"));
    }

    #[test]
    fn test_bundle_extension_has_no_dot() {
        assert!(!DEFAULT_BUNDLE_EXTENSION.starts_with('.'));
    }
}
