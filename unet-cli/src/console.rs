//! Console stand-in for the native engine's bridge

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use unet_runtime::{ClassDescriptor, LogFlags, LogVerbosity, NativeBridge};

/// Prints what the native engine would receive
#[derive(Debug, Default)]
pub struct ConsoleBridge {
    echo_log: bool,
    classes: AtomicUsize,
}

impl ConsoleBridge {
    /// Create a bridge; `echo_log` also prints native log traffic
    pub fn new(echo_log: bool) -> Self {
        Self {
            echo_log,
            classes: AtomicUsize::new(0),
        }
    }

    /// Number of `register_class` calls received
    pub fn registered_classes(&self) -> usize {
        self.classes.load(Ordering::Relaxed)
    }
}

impl NativeBridge for ConsoleBridge {
    fn log(&self, verbosity: LogVerbosity, _flags: LogFlags, text: &str) {
        if self.echo_log {
            println!("[native:{verbosity}] {text}");
        }
    }

    fn register_outer(&self, info: *mut c_void) -> *mut c_void {
        println!("register_outer {:#x}", info as usize);
        info
    }

    fn register_inner(&self, info: *mut c_void) -> *mut c_void {
        println!("register_inner {:#x}", info as usize);
        info
    }

    fn register_class(&self, descriptor: ClassDescriptor) {
        self.classes.fetch_add(1, Ordering::Relaxed);
        println!("register_class {:#x}", descriptor.addr());
    }
}
