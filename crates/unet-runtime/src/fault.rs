//! Fault boundary around module code

use crate::diagnostics;
use crate::error::{Result, UnetError};
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use unet_interop::LogVerbosity;

static REPORTER: Once = Once::new();

/// Install the process-wide fault reporter
///
/// Panics anywhere in the process are logged through the diagnostics sink
/// (message at Error, location and backtrace at Verbose) before the previous
/// hook runs. Installing more than once has no effect.
pub fn install_reporter() {
    REPORTER.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let message = payload_message(info.payload());
            diagnostics::log(
                LogVerbosity::Error,
                &format!("Unhandled plugin fault:\n\t{message}"),
            );

            let location = info
                .location()
                .map(|location| location.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            diagnostics::log(
                LogVerbosity::Verbose,
                &format!("at {location}\n{}", Backtrace::force_capture()),
            );

            previous(info);
        }));
    });
}

/// Run `f`, converting a panic into [`UnetError::Fault`]
pub fn guard<T>(operation: &str, f: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| UnetError::fault(format!("{operation}: {}", payload_message(&*payload))))
}

fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "Unknown error in plugin code"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_passes_values_through() {
        assert_eq!(guard("sum", || 2 + 2).unwrap(), 4);
    }

    #[test]
    fn test_guard_catches_panics() {
        install_reporter();

        let err = guard("provider", || -> u32 { panic!("descriptor table corrupted") }).unwrap_err();
        match err {
            UnetError::Fault(message) => {
                assert_eq!(message, "provider: descriptor table corrupted")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_guard_formatted_panic() {
        let err = guard("load", || -> () { panic!("bad generation {}", 3) }).unwrap_err();
        assert_eq!(err.to_string(), "Unhandled fault in load: bad generation 3");
    }

    #[test]
    fn test_unknown_payload() {
        let err = guard("load", || std::panic::panic_any(17u8)).unwrap_err();
        assert!(err.to_string().ends_with("Unknown error in plugin code"));
    }
}
