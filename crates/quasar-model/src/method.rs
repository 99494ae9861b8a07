//! Method definitions as handed over by the external decoder.

use std::sync::Arc;

use crate::member::{LocalDef, MethodRef, ParamDef};
use crate::ops::RawOp;
use crate::types::TypeRef;

/// The representation a method body is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Bytecode,
    ThreeAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Catch,
    Finally,
    Filter,
    Fault,
}

/// One row of the raw exception table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    pub try_start: u32,
    pub try_end: u32,
    pub kind: HandlerKind,
    pub handler_start: u32,
    pub handler_end: u32,
    pub exception_type: Option<TypeRef>,
}

/// A decoded method body: a flat operation sequence plus its tables.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBody {
    pub max_stack: u16,
    pub operations: Vec<RawOp>,
    pub local_variables: Vec<LocalDef>,
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Code size in bytes; one past the offset of the last operation.
    pub size: u32,
    pub kind: BodyKind,
}

/// A method definition handle: the reference identity plus declared
/// parameters and (for non-abstract, non-external methods) the raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub reference: Arc<MethodRef>,
    pub parameters: Vec<ParamDef>,
    pub body: Option<RawBody>,
}

impl MethodDef {
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.reference.is_static
    }

    #[must_use]
    pub fn containing_type(&self) -> &TypeRef {
        &self.reference.containing_type
    }
}
