//! The three-address-code instruction set.
//!
//! Every instruction has at most one destination and at most two named
//! sources; the operand stack of the source bytecode is gone by the time
//! these exist. Instructions carry their source offset so later passes can
//! report against the original bytecode.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use quasar_model::{Diagnostic, MethodRef, Name, TypeRef};
use quasar_model::ops::BranchCmp;

/// A named storage location in a lifted method.
///
/// Temporaries are pre-created, one per operand-stack slot; their identity is
/// the slot index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    /// The implicit receiver of an instance method.
    This,
    /// A declared parameter, by declaration index (the receiver excluded).
    Param(u16),
    /// A declared local, by source or metadata name.
    Local(Name),
    /// An operand-stack slot temporary.
    Temp(u16),
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::This => f.write_str("this"),
            Variable::Param(i) => write!(f, "p{i}"),
            Variable::Local(name) => write!(f, "{name}"),
            Variable::Temp(i) => write!(f, "t{i}"),
        }
    }
}

/// A branch target, textual form `L_xxxx`.
///
/// `finally_entry` marks the branch a `leave` takes into a finally handler
/// instead of past it; it renders with a trailing tick and is ignored when
/// targets are resolved by offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    pub offset: u32,
    pub finally_entry: bool,
}

impl Label {
    #[must_use]
    pub const fn at(offset: u32) -> Self {
        Self {
            offset,
            finally_entry: false,
        }
    }

    #[must_use]
    pub const fn finally(offset: u32) -> Self {
        Self {
            offset,
            finally_entry: true,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L_{:04x}", self.offset)?;
        if self.finally_entry {
            f.write_str("'")?;
        }
        Ok(())
    }
}

/// A constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(String),
    Null,
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::I32(v) => write!(f, "{v}"),
            Const::I64(v) => write!(f, "{v}"),
            Const::F32(v) => write!(f, "{v}"),
            Const::F64(v) => write!(f, "{v}"),
            Const::Bool(v) => write!(f, "{v}"),
            Const::Str(v) => write!(f, "{v:?}"),
            Const::Null => f.write_str("null"),
        }
    }
}

/// An addressable location: the legal destinations of a `Store` and the
/// referents of an address-of operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Var(Variable),
    /// The cell a managed pointer refers to.
    Deref(Variable),
    InstField { obj: Variable, field: Name },
    StaticField { ty: TypeRef, field: Name },
    ArrayElem { array: Variable, index: Variable },
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Var(v) => write!(f, "{v}"),
            Place::Deref(v) => write!(f, "*{v}"),
            Place::InstField { obj, field } => write!(f, "{obj}.{field}"),
            Place::StaticField { ty, field } => write!(f, "{ty}::{field}"),
            Place::ArrayElem { array, index } => write!(f, "{array}[{index}]"),
        }
    }
}

/// The source operand of a `Load`.
#[derive(Debug, Clone, PartialEq)]
pub enum TacOperand {
    Var(Variable),
    Const(Const),
    /// The address of a place.
    Ref(Place),
    Deref(Variable),
    InstField {
        obj: Variable,
        field: Name,
    },
    StaticField {
        ty: TypeRef,
        field: Name,
    },
    ArrayElem {
        array: Variable,
        index: Variable,
    },
    MethodPtr {
        method: Arc<MethodRef>,
        receiver: Option<Variable>,
    },
}

impl fmt::Display for TacOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TacOperand::Var(v) => write!(f, "{v}"),
            TacOperand::Const(c) => write!(f, "{c}"),
            TacOperand::Ref(place) => write!(f, "&{place}"),
            TacOperand::Deref(v) => write!(f, "*{v}"),
            TacOperand::InstField { obj, field } => write!(f, "{obj}.{field}"),
            TacOperand::StaticField { ty, field } => write!(f, "{ty}::{field}"),
            TacOperand::ArrayElem { array, index } => write!(f, "{array}[{index}]"),
            TacOperand::MethodPtr { method, receiver } => match receiver {
                Some(obj) => write!(f, "&{obj}.{}", method.name),
                None => write!(f, "&{method}"),
            },
        }
    }
}

impl From<Place> for TacOperand {
    fn from(place: Place) -> Self {
        match place {
            Place::Var(v) => TacOperand::Var(v),
            Place::Deref(v) => TacOperand::Deref(v),
            Place::InstField { obj, field } => TacOperand::InstField { obj, field },
            Place::StaticField { ty, field } => TacOperand::StaticField { ty, field },
            Place::ArrayElem { array, index } => TacOperand::ArrayElem { array, index },
        }
    }
}

/// Binary operators surviving in abstract TAC. Overflow checks and
/// signedness from the source bytecode are collapsed away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Lt,
    Gt,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Neg => f.write_str("-"),
            UnOp::Not => f.write_str("!"),
        }
    }
}

/// One lifted instruction with its source offset.
#[derive(Debug, Clone, PartialEq)]
pub struct TacInstr {
    pub offset: u32,
    pub kind: TacInstrKind,
}

impl TacInstr {
    pub fn new(offset: u32, kind: TacInstrKind) -> Self {
        Self { offset, kind }
    }

    /// The label naming this instruction's offset.
    #[must_use]
    pub fn label(&self) -> Label {
        Label::at(self.offset)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TacInstrKind {
    /// The universal move: variable, constant, place contents, or address
    /// into a variable. Also used for parameter stores (`starg`-style moves
    /// write the parameter as `dst`).
    Load {
        dst: Variable,
        src: TacOperand,
    },
    /// A move into an addressable place.
    Store {
        dst: Place,
        src: Variable,
    },
    BinOp {
        dst: Variable,
        left: Variable,
        op: BinOp,
        right: Variable,
    },
    UnOp {
        dst: Variable,
        op: UnOp,
        src: Variable,
    },
    Convert {
        dst: Variable,
        ty: TypeRef,
        src: Variable,
    },
    Branch {
        target: Label,
    },
    CondBranch {
        left: Variable,
        cmp: BranchCmp,
        right: TacOperand,
        target: Label,
    },
    /// Exceptional edge to a handler, recorded where a protected region is
    /// left.
    ExcBranch {
        target: Label,
        exc_type: Option<TypeRef>,
    },
    Switch {
        operand: Variable,
        targets: Vec<Label>,
    },
    Call {
        dst: Option<Variable>,
        callee: Arc<MethodRef>,
        args: Vec<Variable>,
        is_virtual: bool,
    },
    IndirectCall {
        dst: Option<Variable>,
        fn_ptr: Variable,
        signature: Arc<MethodRef>,
        args: Vec<Variable>,
    },
    /// Allocation plus constructor call; `args[0]` is the freshly allocated
    /// receiver.
    NewObj {
        dst: Variable,
        ctor: Arc<MethodRef>,
        args: Vec<Variable>,
    },
    NewArray {
        dst: Variable,
        elem: TypeRef,
        rank: u32,
        lower_bounds: Vec<Variable>,
        sizes: Vec<Variable>,
    },
    Return {
        value: Option<Variable>,
    },
    Throw {
        exc: Option<Variable>,
    },
    /// Marker: a protected region begins at this offset.
    Try {
        offset: u32,
    },
    /// Marker: a catch handler begins here; `exc_var` holds the caught
    /// exception.
    Catch {
        offset: u32,
        exc_var: Variable,
        exc_type: Option<TypeRef>,
    },
    /// Marker: a finally handler begins here.
    Finally {
        offset: u32,
    },
    Sizeof {
        dst: Variable,
        ty: TypeRef,
    },
    LocalAlloc {
        dst: Variable,
        size: Variable,
    },
    CopyMem {
        dst: Variable,
        src: Variable,
        size: Variable,
    },
    CopyObj {
        dst: Variable,
        src: Variable,
        ty: TypeRef,
    },
    InitMem {
        addr: Variable,
        value: Variable,
        size: Variable,
    },
    InitObj {
        addr: Variable,
        ty: TypeRef,
    },
    LoadToken {
        dst: Variable,
        token: TypeRef,
    },
    Nop,
    Breakpoint,
}

impl fmt::Display for TacInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.label())?;
        match &self.kind {
            TacInstrKind::Load { dst, src } => write!(f, "{dst} = {src}"),
            TacInstrKind::Store { dst, src } => write!(f, "{dst} = {src}"),
            TacInstrKind::BinOp {
                dst,
                left,
                op,
                right,
            } => write!(f, "{dst} = {left} {op} {right}"),
            TacInstrKind::UnOp { dst, op, src } => write!(f, "{dst} = {op}{src}"),
            TacInstrKind::Convert { dst, ty, src } => write!(f, "{dst} = ({ty}) {src}"),
            TacInstrKind::Branch { target } => write!(f, "goto {target}"),
            TacInstrKind::CondBranch {
                left,
                cmp,
                right,
                target,
            } => write!(f, "if {left} {cmp} {right} goto {target}"),
            TacInstrKind::ExcBranch { target, exc_type } => match exc_type {
                Some(ty) => write!(f, "on {ty} goto {target}"),
                None => write!(f, "on exception goto {target}"),
            },
            TacInstrKind::Switch { operand, targets } => {
                write!(f, "switch {operand} [")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{target}")?;
                }
                f.write_str("]")
            }
            TacInstrKind::Call {
                dst, callee, args, ..
            } => {
                if let Some(dst) = dst {
                    write!(f, "{dst} = ")?;
                }
                write!(f, "call {}(", callee.name)?;
                write_args(f, args)?;
                f.write_str(")")
            }
            TacInstrKind::IndirectCall {
                dst, fn_ptr, args, ..
            } => {
                if let Some(dst) = dst {
                    write!(f, "{dst} = ")?;
                }
                write!(f, "calli {fn_ptr}(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            TacInstrKind::NewObj { dst, ctor, args } => {
                write!(f, "{dst} = new {}(", ctor.containing_type)?;
                write_args(f, args.get(1..).unwrap_or_default())?;
                f.write_str(")")
            }
            TacInstrKind::NewArray {
                dst, elem, sizes, ..
            } => {
                write!(f, "{dst} = new {elem}[")?;
                write_args(f, sizes)?;
                f.write_str("]")
            }
            TacInstrKind::Return { value } => match value {
                Some(v) => write!(f, "return {v}"),
                None => f.write_str("return"),
            },
            TacInstrKind::Throw { exc } => match exc {
                Some(v) => write!(f, "throw {v}"),
                None => f.write_str("rethrow"),
            },
            TacInstrKind::Try { offset } => write!(f, "try L_{offset:04x}"),
            TacInstrKind::Catch {
                offset,
                exc_var,
                exc_type,
            } => match exc_type {
                Some(ty) => write!(f, "catch L_{offset:04x} ({ty} {exc_var})"),
                None => write!(f, "catch L_{offset:04x} ({exc_var})"),
            },
            TacInstrKind::Finally { offset } => write!(f, "finally L_{offset:04x}"),
            TacInstrKind::Sizeof { dst, ty } => write!(f, "{dst} = sizeof {ty}"),
            TacInstrKind::LocalAlloc { dst, size } => write!(f, "{dst} = localloc {size}"),
            TacInstrKind::CopyMem { dst, src, size } => {
                write!(f, "copymem {dst}, {src}, {size}")
            }
            TacInstrKind::CopyObj { dst, src, ty } => write!(f, "copyobj {dst}, {src} as {ty}"),
            TacInstrKind::InitMem { addr, value, size } => {
                write!(f, "initmem {addr}, {value}, {size}")
            }
            TacInstrKind::InitObj { addr, ty } => write!(f, "initobj {addr} as {ty}"),
            TacInstrKind::LoadToken { dst, token } => write!(f, "{dst} = token {token}"),
            TacInstrKind::Nop => f.write_str("nop"),
            TacInstrKind::Breakpoint => f.write_str("break"),
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Variable]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

/// A lifted method body: the full variable universe plus the instruction
/// stream in source-offset order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    pub variables: BTreeSet<Variable>,
    /// Parameter variables in declaration order, receiver first.
    pub parameters: Vec<Variable>,
    pub instructions: Vec<TacInstr>,
    pub diagnostics: Vec<Diagnostic>,
}

impl MethodBody {
    /// Whether `var` is registered in this body's variable universe.
    #[must_use]
    pub fn contains_variable(&self, var: &Variable) -> bool {
        self.variables.contains(var)
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instructions {
            writeln!(f, "{instr}")?;
        }
        Ok(())
    }
}
