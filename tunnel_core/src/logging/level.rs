//! Severity levels shared with the native engine.

use std::fmt;

/// Ordered severity scale. The discriminants are the integers exchanged
/// with the native engine and written into each log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum LogLevel {
    Verbose = 2,
    Debug = 3,
    Info = 4,
    Warn = 5,
    Error = 6,
    Fatal = 7,
}

impl LogLevel {
    /// Integer code of this level.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Level for an integer code, if it is one of the known levels.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            2 => Some(LogLevel::Verbose),
            3 => Some(LogLevel::Debug),
            4 => Some(LogLevel::Info),
            5 => Some(LogLevel::Warn),
            6 => Some(LogLevel::Error),
            7 => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

impl TryFrom<i32> for LogLevel {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, i32> {
        LogLevel::from_code(code).ok_or(code)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(name)
    }
}
