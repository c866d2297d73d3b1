//! Crate-wide error type.
//!
//! Errors carry a process exit code so the `spr` binary can map failures the
//! same way regardless of which stage raised them:
//!
//! - `2` configuration / input shape problems
//! - `3` data problems (empty or non-finite inputs)
//! - `4` I/O and parse failures

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KineticsError {
    /// Fatal, raised before any computation (bad unit, bad mode, >1 blank, length mismatch).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed values (empty dataset, non-finite or non-monotonic inputs).
    #[error("invalid value: {0}")]
    Value(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(String),
}

impl KineticsError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::Value(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            KineticsError::Configuration(_) => 2,
            KineticsError::Value(_) => 3,
            KineticsError::Io { .. } | KineticsError::Parse(_) => 4,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, KineticsError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, KineticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(KineticsError::config("x").exit_code(), 2);
        assert_eq!(KineticsError::value("x").exit_code(), 3);
        assert_eq!(KineticsError::parse("x").exit_code(), 4);
        let io = KineticsError::io("open", std::io::Error::other("boom"));
        assert_eq!(io.exit_code(), 4);
        assert!(io.to_string().starts_with("open: "));
    }
}
