//! # Example Classes Plugin
//!
//! A minimal plugin bundle. It declares the plugin marker and advertises two
//! class records, base before derived, for the native side to register.
//! Once the host attaches it reports itself through the native log.
//!
//! Build it and copy the shared library into the plugins directory with the
//! bundle extension:
//!
//! ```text
//! cargo build -p example-classes
//! cp target/debug/libexample_classes.so Plugins/example-classes.unetplugin
//! ```

use std::ffi::c_char;
use unet_interop::{declare_plugin, services, ClassDescriptor, LogVerbosity};

/// Class record in the layout the native engine expects
#[repr(C)]
#[derive(Debug)]
pub struct ClassInfo {
    /// NUL-terminated class name
    pub name: *const c_char,

    /// NUL-terminated parent class name, or null for a root class
    pub parent: *const c_char,

    /// Engine class flags
    pub flags: u32,
}

// Records are immutable statics.
unsafe impl Sync for ClassInfo {}

/// Flag marking a class the engine must not instantiate directly
pub const CLASS_ABSTRACT: u32 = 0x1;

/// Base actor class
pub static EXAMPLE_ACTOR: ClassInfo = ClassInfo {
    name: b"ExampleActor\0".as_ptr() as *const c_char,
    parent: std::ptr::null(),
    flags: CLASS_ABSTRACT,
};

/// Derived pawn class
pub static EXAMPLE_PAWN: ClassInfo = ClassInfo {
    name: b"ExamplePawn\0".as_ptr() as *const c_char,
    parent: b"ExampleActor\0".as_ptr() as *const c_char,
    flags: 0,
};

static CLASSES: [ClassDescriptor; 2] = [
    ClassDescriptor::from_static(&EXAMPLE_ACTOR),
    ClassDescriptor::from_static(&EXAMPLE_PAWN),
];

/// Metadata provider: base class first
pub fn classes() -> &'static [ClassDescriptor] {
    &CLASSES
}

/// Message written to the native log once the host attaches
pub const ATTACHED_MESSAGE: &str = "example-classes: 2 classes ready";

fn attached() {
    services::log(LogVerbosity::Display, ATTACHED_MESSAGE);
}

declare_plugin!("example-classes", classes, attached);
