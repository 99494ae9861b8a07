//! Lifting errors. All of these abort the method being lifted; recoverable
//! findings (unknown opcodes) are diagnostics on the lifted body instead.

use thiserror::Error;

pub type LiftResult<T> = Result<T, LiftError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiftError {
    #[error("operand stack overflow at offset {offset:#06x}")]
    StackOverflow { offset: u32 },

    #[error("operand stack underflow at offset {offset:#06x}")]
    StackUnderflow { offset: u32 },

    #[error(
        "stack size mismatch entering block at {offset:#06x}: recorded {expected}, incoming {found}"
    )]
    StackSizeMismatch {
        offset: u32,
        expected: u16,
        found: u16,
    },

    #[error("load-token at offset {offset:#06x} carries no type reference")]
    NullTypeToken { offset: u32 },

    #[error("operation at offset {offset:#06x} expects a {expected} operand")]
    MalformedOperand {
        offset: u32,
        expected: &'static str,
    },

    #[error("branch targets offset {offset:#06x}, which starts no operation")]
    InvalidTarget { offset: u32 },

    #[error("method has no bytecode body to lift")]
    MissingBody,
}
