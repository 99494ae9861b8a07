//! Shared data model for the Quasar analysis backend.
//!
//! This crate serves two roles:
//! 1) A small "shared types" crate used across Quasar crates (names, types,
//!    member references, diagnostics).
//! 2) The input surface of the analysis pipeline: the raw stack-bytecode
//!    operation set produced by an external decoder, and the host traits
//!    through which the engine consults the external symbol model.
//!
//! The type model is intentionally compact: just enough structure for the
//! lifter's conversion lowering and for virtual-callee resolution, which the
//! host performs against its own class hierarchy.

pub mod diagnostics;
pub mod host;
pub mod member;
pub mod method;
pub mod name;
pub mod ops;
pub mod types;

pub use crate::diagnostics::Diagnostic;
pub use crate::host::ProgramHost;
pub use crate::member::{FieldRef, LocalDef, MethodRef, ParamDef};
pub use crate::method::{BodyKind, ExceptionHandler, HandlerKind, MethodDef, RawBody};
pub use crate::name::Name;
pub use crate::ops::{OpKind, OpValue, RawOp};
pub use crate::types::{PrimitiveType, TypeRef};
