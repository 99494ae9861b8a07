//! Analysis diagnostics.

use serde::{Deserialize, Serialize};

/// A recoverable finding attached to a bytecode offset.
///
/// Fatal conditions are errors, not diagnostics; this type carries the
/// log-and-continue cases (unsupported opcodes, skipped constructs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable machine-readable code, e.g. `LIFT_UNKNOWN_OPCODE`.
    pub code: String,
    pub message: String,
    pub offset: u32,
}

impl Diagnostic {
    pub fn new(code: impl Into<String>, message: impl Into<String>, offset: u32) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            offset,
        }
    }
}
