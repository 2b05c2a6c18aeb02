//! Plugin host error types

use std::fmt;
use std::path::{Path, PathBuf};

/// Plugin host error type
#[derive(Debug, thiserror::Error)]
pub enum UnetError {
    /// A lifecycle or registration operation ran before initialization
    #[error("UNET is not initialized yet")]
    NotInitialized,

    /// The native bridge was handed over a second time
    #[error("UNET is already initialized")]
    AlreadyInitialized,

    /// A discovered bundle vanished before it could be opened
    #[error("Plugin '{}' not found", display_stem(.0))]
    BundleNotFound(PathBuf),

    /// A bundle exists but its module could not be loaded
    #[error("Failed to load plugin from {}: {reason}", .path.display())]
    LoadFailure {
        /// Bundle path
        path: PathBuf,
        /// Loader diagnostic
        reason: String,
    },

    /// A loaded module does not carry the plugin marker
    #[error("'{0}' is not a UNET plugin")]
    NotAPlugin(String),

    /// A reload notification arrived for a module that is not loaded
    #[error("Reloaded plugin '{0}' is not loaded")]
    InvalidReloadState(String),

    /// Module or host code panicked inside a fault boundary
    #[error("Unhandled fault in {0}")]
    Fault(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bundle watcher error
    #[error("Watcher error: {0}")]
    Watch(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin host operations
pub type Result<T, E = UnetError> = std::result::Result<T, E>;

fn display_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl UnetError {
    /// Create a new bundle not found error
    pub fn bundle_not_found(path: impl Into<PathBuf>) -> Self {
        Self::BundleNotFound(path.into())
    }

    /// Create a new load failure
    pub fn load_failure(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::LoadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new not-a-plugin error
    pub fn not_a_plugin(module: impl fmt::Display) -> Self {
        Self::NotAPlugin(module.to_string())
    }

    /// Create a new invalid reload state error
    pub fn invalid_reload_state(module: impl fmt::Display) -> Self {
        Self::InvalidReloadState(module.to_string())
    }

    /// Create a new fault error
    pub fn fault(msg: impl fmt::Display) -> Self {
        Self::Fault(msg.to_string())
    }

    /// Create a new config error
    pub fn config(msg: impl fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a new watcher error
    pub fn watch(msg: impl fmt::Display) -> Self {
        Self::Watch(msg.to_string())
    }
}
