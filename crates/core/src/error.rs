//! Container parse error types.
//!
//! Fatal conditions only; everything recoverable goes through
//! [`crate::alerts::Alerts`] instead.

/// Error type for container parsing.
///
/// This allows proper error propagation using `?` while keeping the
/// fatal categories distinguishable for callers and tests.
#[derive(Debug)]
pub enum ParseError {
    /// The file tag or section count does not identify an FLW0 container
    HeaderMismatch(String),
    /// The file ended before a section or instruction slot was complete
    Truncated(String),
    /// An opcode outside the known instruction set
    UnknownOpcode { opcode: u32, loc: usize },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::HeaderMismatch(s) => write!(f, "header mismatch: {}", s),
            ParseError::Truncated(s) => write!(f, "truncated input: {}", s),
            ParseError::UnknownOpcode { opcode, loc } => {
                write!(f, "unknown opcode {:#04x} at location {}", opcode, loc)
            }
        }
    }
}

impl std::error::Error for ParseError {}
