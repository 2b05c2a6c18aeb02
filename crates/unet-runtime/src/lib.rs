//! # UNET Runtime
//!
//! Plugin lifecycle engine embedded in a native engine process.
//!
//! ## Features
//!
//! - **Execution Contexts**: each bundle is loaded into its own reclaimable arena
//! - **Plugin Registry**: fail-fast discovery and loading of plugin bundles
//! - **Metadata Registration**: class descriptors pushed to the native side in provider order
//! - **Hot Reload**: modules reload in place when their bundle file changes
//! - **Diagnostics**: `tracing` events forwarded to the native log
//! - **Fault Boundary**: panics in module code are logged instead of crashing the engine
//!
//! The native engine drives the host through the C ABI in [`ffi`]; Rust hosts
//! can use [`Host`] directly.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unet_runtime::{Host, HostConfig, LibraryLoader, NativeBridge};
//!
//! # fn example(bridge: Arc<dyn NativeBridge>) -> unet_runtime::Result<()> {
//! let host = Host::new(Arc::new(LibraryLoader::new()));
//! host.initialize(bridge, "/game/Plugins", HostConfig::default());
//!
//! let loaded = host.load()?;
//! println!("{loaded} plugins loaded");
//!
//! host.unload()?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod bridge;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod fault;
pub mod ffi;
pub mod host;
pub mod hot_reload;
pub mod library;
pub mod module;
pub mod registrar;
pub mod registry;

#[cfg(test)]
mod testing;

pub use bridge::{Core, FfiBridge, NativeBridge};
pub use config::{ConfigFormat, HostConfig, HotReloadConfig, ReclaimPolicy, RefreshPolicy};
pub use context::{
    await_reclamation, ContextLoader, ContextOptions, ExecutionContext, LoadedModule,
    MetadataProvider, ModuleArena, TrackingHandle,
};
pub use diagnostics::{init_logging, NativeLogLayer};
pub use error::{Result, UnetError};
pub use host::{Host, ModuleInfo};
pub use hot_reload::BundleWatcher;
pub use library::LibraryLoader;
pub use module::{ModuleInstance, UnloadReport};
pub use registrar::MetadataRegistrar;
pub use registry::PluginRegistry;

pub use unet_interop::{ClassDescriptor, LogFlags, LogVerbosity, ABI_VERSION};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::bridge::NativeBridge;
    pub use crate::config::HostConfig;
    pub use crate::error::{Result, UnetError};
    pub use crate::host::Host;
    pub use crate::library::LibraryLoader;
    pub use unet_interop::{ClassDescriptor, LogFlags, LogVerbosity};
}
