//! The raw stack-bytecode operation set.
//!
//! An external decoder produces a flat sequence of [`RawOp`]s per method
//! body. The set is deliberately structured: checked/unsigned mnemonic
//! families collapse into one variant with flags, because the lifter
//! discards precision flags anyway when emitting abstract three-address
//! code.

use std::fmt;
use std::sync::Arc;

use crate::member::{FieldRef, MethodRef};
use crate::name::Name;
use crate::types::{PrimitiveType, TypeRef};

/// One decoded operation with its bytecode offset.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOp {
    pub offset: u32,
    pub opcode: OpKind,
    pub operand: OpValue,
}

impl RawOp {
    pub fn new(offset: u32, opcode: OpKind) -> Self {
        Self {
            offset,
            opcode,
            operand: OpValue::None,
        }
    }

    pub fn with_operand(offset: u32, opcode: OpKind, operand: OpValue) -> Self {
        Self {
            offset,
            opcode,
            operand,
        }
    }
}

/// Binary arithmetic families. Overflow-checked and unsigned variants are
/// flags on the raw op; the lifter collapses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Shl,
    Shr,
}

/// Comparison producing a value on the stack (`ceq`-family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Lt,
    Gt,
}

/// Comparison fused into a conditional branch (`beq`-family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for BranchCmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BranchCmp::Eq => "==",
            BranchCmp::Ne => "!=",
            BranchCmp::Lt => "<",
            BranchCmp::Le => "<=",
            BranchCmp::Gt => ">",
            BranchCmp::Ge => ">=",
        };
        f.write_str(text)
    }
}

/// Object-model conversions carrying their target type as an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastKind {
    /// `castclass`: checked downcast, throws on mismatch.
    Cast,
    /// `isinst`: type test yielding null on mismatch.
    Test,
    Box,
    Unbox,
}

/// The decoded opcode, with structural flags where mnemonic families differ
/// only in precision or signedness.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Nop,
    Break,
    Dup,
    Pop,

    /// Any constant load, including strings and null. Operand carries the
    /// value.
    LoadConst,

    LoadArg,
    LoadArgAddress,
    StoreArg,
    LoadLocal,
    LoadLocalAddress,
    StoreLocal,
    LoadIndirect,
    StoreIndirect,

    LoadField,
    LoadFieldAddress,
    StoreField,
    LoadStaticField,
    LoadStaticFieldAddress,
    StoreStaticField,

    LoadArrayElem,
    LoadArrayElemAddress,
    StoreArrayElem,
    LoadArrayLength,

    LoadFunction,
    LoadVirtualFunction,
    LoadToken,

    Arith {
        op: ArithOp,
        checked: bool,
        unsigned: bool,
    },
    Logic(LogicOp),
    Shift {
        op: ShiftOp,
        unsigned: bool,
    },
    Compare {
        op: CompareOp,
        unsigned: bool,
    },
    Neg,
    Not,

    Convert {
        target: PrimitiveType,
        checked: bool,
        unsigned: bool,
    },
    Cast(CastKind),

    Branch,
    BranchIf {
        cmp: BranchCmp,
        unsigned: bool,
    },
    BranchTrue,
    BranchFalse,
    Switch,
    Leave,
    EndFinally,
    EndFilter,

    Call,
    CallVirtual,
    CallIndirect,
    /// `jmp`: tail-style transfer reusing the current method's arguments.
    Jump,
    NewObject,
    NewArray {
        rank: u32,
        has_lower_bounds: bool,
    },

    Return,
    Throw,
    Rethrow,

    Sizeof,
    LocalAlloc,
    CopyMem,
    CopyObj,
    InitMem,
    InitObj,

    /// An encoding outside the supported set. The lifter records a
    /// diagnostic and skips it.
    Unknown(Name),
}

impl OpKind {
    /// Whether control never falls through to the next operation.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            OpKind::Return
                | OpKind::Throw
                | OpKind::Rethrow
                | OpKind::EndFinally
                | OpKind::EndFilter
                | OpKind::Branch
                | OpKind::Leave
                | OpKind::Jump
        )
    }
}

/// The typed operand of a raw operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OpValue {
    None,
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    /// The null literal, distinct from `None` (absence of an operand).
    Null,
    Type(TypeRef),
    Method(Arc<MethodRef>),
    Field(FieldRef),
    /// Raw argument index, including the implicit receiver slot in instance
    /// methods.
    Param(u16),
    /// Index into the body's local-variable table.
    Local(u16),
    Target(u32),
    Targets(Vec<u32>),
}

impl OpValue {
    #[must_use]
    pub fn as_target(&self) -> Option<u32> {
        match self {
            OpValue::Target(offset) => Some(*offset),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_type(&self) -> Option<&TypeRef> {
        match self {
            OpValue::Type(ty) => Some(ty),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_method(&self) -> Option<&Arc<MethodRef>> {
        match self {
            OpValue::Method(m) => Some(m),
            _ => None,
        }
    }
}
