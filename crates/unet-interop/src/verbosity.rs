//! Log verbosity levels understood by the native log sink

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bits of a raw verbosity byte that carry the level
pub const VERBOSITY_MASK: u8 = 0x0f;

/// Log verbosity, ordered from most severe to most detailed
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogVerbosity {
    /// Not used for messages
    NoLogging = 0,

    /// Always printed; the native side crashes after logging it
    Fatal = 1,

    /// Printed to console and log file, reported as an error
    Error = 2,

    /// Printed to console and log file, reported as a warning
    Warning = 3,

    /// Printed to console and log file
    Display = 4,

    /// Printed to the log file only
    Log = 5,

    /// Detailed logging, usually disabled
    Verbose = 6,

    /// Very detailed logging that would otherwise spam output
    VeryVerbose = 7,
}

bitflags! {
    /// Delivery modifiers carried in the high bits of a raw verbosity byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LogFlags: u8 {
        /// Not a severity; sets the color of the output device
        const SET_COLOR = 0x40;
        /// Break into the debugger when the message is logged
        const BREAK_ON_LOG = 0x80;
    }
}

impl LogVerbosity {
    /// Every level that can carry a message, most severe first
    pub const LEVELS: [LogVerbosity; 7] = [
        LogVerbosity::Fatal,
        LogVerbosity::Error,
        LogVerbosity::Warning,
        LogVerbosity::Display,
        LogVerbosity::Log,
        LogVerbosity::Verbose,
        LogVerbosity::VeryVerbose,
    ];

    /// Parse the level bits of a raw verbosity byte
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw & VERBOSITY_MASK {
            0 => Some(Self::NoLogging),
            1 => Some(Self::Fatal),
            2 => Some(Self::Error),
            3 => Some(Self::Warning),
            4 => Some(Self::Display),
            5 => Some(Self::Log),
            6 => Some(Self::Verbose),
            7 => Some(Self::VeryVerbose),
            _ => None,
        }
    }

    /// Combine this level with delivery flags into the byte the native side expects
    pub fn encode(self, flags: LogFlags) -> u8 {
        (self as u8 & VERBOSITY_MASK) | flags.bits()
    }

    /// Split a raw byte into its level and flags
    pub fn decode(raw: u8) -> (Option<Self>, LogFlags) {
        (Self::from_raw(raw), LogFlags::from_bits_truncate(raw))
    }

    /// Level name as used by the native log categories
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoLogging => "NoLogging",
            Self::Fatal => "Fatal",
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Display => "Display",
            Self::Log => "Log",
            Self::Verbose => "Verbose",
            Self::VeryVerbose => "VeryVerbose",
        }
    }
}

impl fmt::Display for LogVerbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered_by_detail() {
        assert!(LogVerbosity::Fatal < LogVerbosity::Error);
        assert!(LogVerbosity::Display < LogVerbosity::Log);
        assert!(LogVerbosity::Verbose < LogVerbosity::VeryVerbose);
        assert_eq!(LogVerbosity::LEVELS.len(), 7);
    }

    #[test]
    fn test_flags_do_not_change_level() {
        let raw = LogVerbosity::Warning.encode(LogFlags::SET_COLOR | LogFlags::BREAK_ON_LOG);
        assert_eq!(raw, 0x03 | 0x40 | 0x80);

        let (level, flags) = LogVerbosity::decode(raw);
        assert_eq!(level, Some(LogVerbosity::Warning));
        assert!(flags.contains(LogFlags::SET_COLOR));
        assert!(flags.contains(LogFlags::BREAK_ON_LOG));
    }

    #[test]
    fn test_unknown_level_bits() {
        assert_eq!(LogVerbosity::from_raw(0x08), None);
        assert_eq!(LogVerbosity::from_raw(0x0f), None);
    }

    #[test]
    fn test_serde_uses_variant_names() {
        let json = serde_json::to_string(&LogVerbosity::VeryVerbose).unwrap();
        assert_eq!(json, "\"VeryVerbose\"");
        assert_eq!(LogVerbosity::Display.to_string(), "Display");
    }
}
