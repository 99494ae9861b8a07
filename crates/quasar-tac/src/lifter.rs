//! The lifting driver: a worklist of basic blocks, symbolic execution of the
//! operand stack per operation, and TAC emission.
//!
//! Blocks record the stack size observed when they are first enqueued; every
//! later edge into the same block must observe the same size or lifting
//! fails. Exception-handler entries are seeded as worklist roots with an
//! empty entry stack, and the `Catch` marker pushes the exception temporary
//! when the handler block itself is lifted.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use quasar_model::ops::{ArithOp, BranchCmp, CompareOp, LogicOp, ShiftOp};
use quasar_model::{
    Diagnostic, FieldRef, MethodDef, MethodRef, Name, OpKind, OpValue, ProgramHost, RawBody,
    RawOp, TypeRef,
};

use crate::blocks::{BlockMap, BlockStatus};
use crate::error::{LiftError, LiftResult};
use crate::regions::{CatchInfo, RegionIndex};
use crate::stack::{OperandStack, StackFault};
use crate::tac::{
    BinOp, Const, Label, MethodBody, Place, TacInstr, TacInstrKind, TacOperand, UnOp, Variable,
};

/// Lift a method's stack bytecode into three-address code.
///
/// Returns an error for the fatal conditions of the lifting contract (stack
/// imbalance, malformed operands, missing type tokens); unsupported opcodes
/// are recorded as diagnostics on the returned body instead.
pub fn lift(method: &MethodDef, host: &dyn ProgramHost) -> LiftResult<MethodBody> {
    let raw = method.body.as_ref().ok_or(LiftError::MissingBody)?;
    Lifter::new(method, raw, host).run()
}

/// What the driver does after one operation's transfer.
enum Flow {
    Continue,
    EndBlock,
}

struct Lifter<'a> {
    method: &'a MethodDef,
    raw: &'a RawBody,
    blocks: BlockMap,
    regions: RegionIndex,
    stack: OperandStack,
    pending: Vec<u32>,
    /// Offset of the block currently receiving instructions.
    current: u32,
    op_index: HashMap<u32, usize>,
    /// Parameter variables in declaration order, receiver first.
    params: Vec<Variable>,
    /// Local variables by local-table index, names already resolved.
    locals: Vec<Variable>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Lifter<'a> {
    fn new(method: &'a MethodDef, raw: &'a RawBody, host: &'a dyn ProgramHost) -> Self {
        let blocks = BlockMap::build(&raw.operations, &raw.exception_handlers);
        let regions = RegionIndex::build(&raw.exception_handlers);
        let op_index = raw
            .operations
            .iter()
            .enumerate()
            .map(|(idx, op)| (op.offset, idx))
            .collect();

        let mut params = Vec::new();
        if !method.is_static() {
            params.push(Variable::This);
        }
        params.extend(method.parameters.iter().map(|p| Variable::Param(p.index)));

        let locals = raw
            .local_variables
            .iter()
            .enumerate()
            .map(|(idx, local)| {
                let name = host
                    .local_source_name(&method.reference, idx as u16)
                    .unwrap_or_else(|| local.name.clone());
                Variable::Local(name)
            })
            .collect();

        Self {
            method,
            raw,
            blocks,
            regions,
            stack: OperandStack::new(raw.max_stack),
            pending: Vec::new(),
            current: 0,
            op_index,
            params,
            locals,
            diagnostics: Vec::new(),
        }
    }

    fn run(mut self) -> LiftResult<MethodBody> {
        // Handler entries are roots: they are reachable through exceptional
        // control flow even when no decoded branch targets them.
        let handler_entries: Vec<u32> = self
            .raw
            .exception_handlers
            .iter()
            .map(|h| h.handler_start)
            .collect();
        for offset in handler_entries {
            self.add_pending(offset, true)?;
        }
        if let Some(first) = self.raw.operations.first() {
            self.add_pending(first.offset, true)?;
        }

        while let Some(offset) = self.pending.pop() {
            if let Some(block) = self.blocks.get_mut(offset) {
                block.status = BlockStatus::Processed;
            }
            self.process_block(offset)?;
        }

        let mut variables: BTreeSet<Variable> = self.stack.all_slots().cloned().collect();
        variables.extend(self.params.iter().cloned());
        variables.extend(self.locals.iter().cloned());

        let blocks = std::mem::take(&mut self.blocks);
        let mut instructions = Vec::new();
        for block in blocks.iter() {
            instructions.extend(block.instructions.iter().cloned());
        }

        debug!(
            method = %self.method.reference,
            blocks = blocks.len(),
            instructions = instructions.len(),
            diagnostics = self.diagnostics.len(),
            "lifted method body"
        );

        Ok(MethodBody {
            variables,
            parameters: self.params,
            instructions,
            diagnostics: self.diagnostics,
        })
    }

    fn process_block(&mut self, block_offset: u32) -> LiftResult<()> {
        let entry = self
            .blocks
            .get(block_offset)
            .map(|b| b.stack_size_at_entry)
            .ok_or(LiftError::InvalidTarget {
                offset: block_offset,
            })?;
        self.stack
            .set_size(entry)
            .map_err(|fault| stack_error(fault, block_offset))?;
        self.current = block_offset;

        let mut idx = *self
            .op_index
            .get(&block_offset)
            .ok_or(LiftError::InvalidTarget {
                offset: block_offset,
            })?;

        loop {
            let Some(op) = self.raw.operations.get(idx) else {
                break;
            };
            if op.offset != block_offset && self.blocks.contains(op.offset) {
                // Fell through into the next block.
                self.add_pending(op.offset, false)?;
                break;
            }
            let op = op.clone();
            self.emit_region_markers(op.offset)?;
            match self.transfer(&op)? {
                Flow::Continue => idx += 1,
                Flow::EndBlock => break,
            }
        }
        Ok(())
    }

    /// Emit `Try`/`Catch`/`Finally` markers for every region boundary at
    /// `offset`. The catch marker pushes a fresh temporary holding the
    /// caught exception.
    fn emit_region_markers(&mut self, offset: u32) -> LiftResult<()> {
        let try_count = self.regions.trys_starting_at(offset).count();
        for _ in 0..try_count {
            self.emit(offset, TacInstrKind::Try { offset });
        }

        let catch = self.regions.catch_starting_at(offset).cloned();
        if let Some(catch) = catch {
            let exc_var = self.push(offset)?;
            self.emit(
                offset,
                TacInstrKind::Catch {
                    offset,
                    exc_var,
                    exc_type: catch.exception_type,
                },
            );
        }

        if self.regions.finally_starting_at(offset).is_some() {
            self.emit(offset, TacInstrKind::Finally { offset });
        }
        Ok(())
    }

    fn transfer(&mut self, op: &RawOp) -> LiftResult<Flow> {
        let offset = op.offset;
        match &op.opcode {
            OpKind::Nop => self.emit(offset, TacInstrKind::Nop),
            OpKind::Break => self.emit(offset, TacInstrKind::Breakpoint),

            OpKind::Dup => {
                let src = self.peek(offset)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Var(src),
                    },
                );
            }
            OpKind::Pop => {
                self.pop(offset)?;
            }

            OpKind::LoadConst => {
                let value = self.const_operand(op)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Const(value),
                    },
                );
            }

            OpKind::LoadArg => {
                let var = self.arg_var(op)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Var(var),
                    },
                );
            }
            OpKind::LoadArgAddress => {
                let var = self.arg_var(op)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Ref(Place::Var(var)),
                    },
                );
            }
            OpKind::StoreArg => {
                let var = self.arg_var(op)?;
                let src = self.pop(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst: var,
                        src: TacOperand::Var(src),
                    },
                );
            }

            OpKind::LoadLocal => {
                let var = self.local_var(op)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Var(var),
                    },
                );
            }
            OpKind::LoadLocalAddress => {
                let var = self.local_var(op)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Ref(Place::Var(var)),
                    },
                );
            }
            OpKind::StoreLocal => {
                let var = self.local_var(op)?;
                let src = self.pop(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst: var,
                        src: TacOperand::Var(src),
                    },
                );
            }

            OpKind::LoadIndirect => {
                let addr = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Deref(addr),
                    },
                );
            }
            OpKind::StoreIndirect => {
                let src = self.pop(offset)?;
                let addr = self.pop(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Store {
                        dst: Place::Deref(addr),
                        src,
                    },
                );
            }

            OpKind::LoadField => {
                let field = self.field_operand(op)?;
                let obj = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::InstField {
                            obj,
                            field: field.member_signature(),
                        },
                    },
                );
            }
            OpKind::LoadFieldAddress => {
                let field = self.field_operand(op)?;
                let obj = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Ref(Place::InstField {
                            obj,
                            field: field.member_signature(),
                        }),
                    },
                );
            }
            OpKind::StoreField => {
                let field = self.field_operand(op)?;
                let src = self.pop(offset)?;
                let obj = self.pop(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Store {
                        dst: Place::InstField {
                            obj,
                            field: field.member_signature(),
                        },
                        src,
                    },
                );
            }
            OpKind::LoadStaticField => {
                let field = self.field_operand(op)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::StaticField {
                            ty: field.containing_type.clone(),
                            field: field.member_signature(),
                        },
                    },
                );
            }
            OpKind::LoadStaticFieldAddress => {
                let field = self.field_operand(op)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Ref(Place::StaticField {
                            ty: field.containing_type.clone(),
                            field: field.member_signature(),
                        }),
                    },
                );
            }
            OpKind::StoreStaticField => {
                let field = self.field_operand(op)?;
                let src = self.pop(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Store {
                        dst: Place::StaticField {
                            ty: field.containing_type.clone(),
                            field: field.member_signature(),
                        },
                        src,
                    },
                );
            }

            OpKind::LoadArrayElem => {
                let index = self.pop(offset)?;
                let array = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::ArrayElem { array, index },
                    },
                );
            }
            OpKind::LoadArrayElemAddress => {
                let index = self.pop(offset)?;
                let array = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::Ref(Place::ArrayElem { array, index }),
                    },
                );
            }
            OpKind::StoreArrayElem => {
                let src = self.pop(offset)?;
                let index = self.pop(offset)?;
                let array = self.pop(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Store {
                        dst: Place::ArrayElem { array, index },
                        src,
                    },
                );
            }
            OpKind::LoadArrayLength => {
                let array = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::InstField {
                            obj: array,
                            field: Name::new("Length"),
                        },
                    },
                );
            }

            OpKind::LoadFunction => {
                let method = self.method_operand(op)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::MethodPtr {
                            method,
                            receiver: None,
                        },
                    },
                );
            }
            OpKind::LoadVirtualFunction => {
                let method = self.method_operand(op)?;
                let obj = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Load {
                        dst,
                        src: TacOperand::MethodPtr {
                            method,
                            receiver: Some(obj),
                        },
                    },
                );
            }
            OpKind::LoadToken => {
                let token = op
                    .operand
                    .as_type()
                    .cloned()
                    .ok_or(LiftError::NullTypeToken { offset })?;
                let dst = self.push(offset)?;
                self.emit(offset, TacInstrKind::LoadToken { dst, token });
            }

            OpKind::Arith { op: arith, .. } => {
                let binop = match arith {
                    ArithOp::Add => BinOp::Add,
                    ArithOp::Sub => BinOp::Sub,
                    ArithOp::Mul => BinOp::Mul,
                    ArithOp::Div => BinOp::Div,
                    ArithOp::Rem => BinOp::Rem,
                };
                self.binary(offset, binop)?;
            }
            OpKind::Logic(logic) => {
                let binop = match logic {
                    LogicOp::And => BinOp::And,
                    LogicOp::Or => BinOp::Or,
                    LogicOp::Xor => BinOp::Xor,
                };
                self.binary(offset, binop)?;
            }
            OpKind::Shift { op: shift, .. } => {
                let binop = match shift {
                    ShiftOp::Shl => BinOp::Shl,
                    ShiftOp::Shr => BinOp::Shr,
                };
                self.binary(offset, binop)?;
            }
            OpKind::Compare { op: cmp, .. } => {
                let binop = match cmp {
                    CompareOp::Eq => BinOp::Eq,
                    CompareOp::Lt => BinOp::Lt,
                    CompareOp::Gt => BinOp::Gt,
                };
                self.binary(offset, binop)?;
            }
            OpKind::Neg => self.unary(offset, UnOp::Neg)?,
            OpKind::Not => self.unary(offset, UnOp::Not)?,

            OpKind::Convert { target, .. } => {
                let src = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Convert {
                        dst,
                        ty: TypeRef::Primitive(*target),
                        src,
                    },
                );
            }
            OpKind::Cast(_) => {
                let ty = self.type_operand(op)?;
                let src = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(offset, TacInstrKind::Convert { dst, ty, src });
            }

            OpKind::Branch => {
                let target = self.target_operand(op)?;
                self.emit(
                    offset,
                    TacInstrKind::Branch {
                        target: Label::at(target),
                    },
                );
                self.add_pending(target, true)?;
                return Ok(Flow::EndBlock);
            }
            OpKind::BranchIf { cmp, .. } => {
                let target = self.target_operand(op)?;
                let right = self.pop(offset)?;
                let left = self.pop(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::CondBranch {
                        left,
                        cmp: *cmp,
                        right: TacOperand::Var(right),
                        target: Label::at(target),
                    },
                );
                self.add_pending(target, true)?;
            }
            OpKind::BranchTrue | OpKind::BranchFalse => {
                let expected = matches!(op.opcode, OpKind::BranchTrue);
                let target = self.target_operand(op)?;
                let left = self.pop(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::CondBranch {
                        left,
                        cmp: BranchCmp::Eq,
                        right: TacOperand::Const(Const::Bool(expected)),
                        target: Label::at(target),
                    },
                );
                self.add_pending(target, true)?;
            }
            OpKind::Switch => {
                let OpValue::Targets(targets) = &op.operand else {
                    return Err(LiftError::MalformedOperand {
                        offset,
                        expected: "switch target list",
                    });
                };
                let targets = targets.clone();
                let operand = self.pop(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::Switch {
                        operand,
                        targets: targets.iter().map(|&t| Label::at(t)).collect(),
                    },
                );
                for target in targets {
                    self.add_pending(target, true)?;
                }
            }

            OpKind::Leave => {
                let target = self.target_operand(op)?;
                self.transfer_leave(offset, target)?;
                return Ok(Flow::EndBlock);
            }
            OpKind::EndFinally => {
                if let Some(fin) = self.regions.finally_containing(offset) {
                    self.emit(
                        offset,
                        TacInstrKind::Branch {
                            target: Label::at(fin.end),
                        },
                    );
                } else {
                    self.diagnostics.push(Diagnostic::new(
                        "LIFT_STRAY_ENDFINALLY",
                        "endfinally outside any finally handler",
                        offset,
                    ));
                }
                self.stack.clear();
                return Ok(Flow::EndBlock);
            }
            OpKind::EndFilter => {
                self.stack.clear();
                return Ok(Flow::EndBlock);
            }

            OpKind::Call | OpKind::CallVirtual => {
                let virtual_call = matches!(op.opcode, OpKind::CallVirtual);
                self.transfer_call(op, virtual_call)?;
            }
            OpKind::CallIndirect => {
                let signature = self.method_operand(op)?;
                let fn_ptr = self.pop(offset)?;
                let args = self.pop_args(offset, &signature)?;
                let dst = if signature.has_result() {
                    Some(self.push(offset)?)
                } else {
                    None
                };
                self.emit(
                    offset,
                    TacInstrKind::IndirectCall {
                        dst,
                        fn_ptr,
                        signature,
                        args,
                    },
                );
            }
            OpKind::Jump => {
                // Tail-style transfer: the current method's own parameters
                // become the outgoing arguments.
                let callee = self.method_operand(op)?;
                let args = self.params.clone();
                self.emit(
                    offset,
                    TacInstrKind::Call {
                        dst: None,
                        callee,
                        args,
                        is_virtual: false,
                    },
                );
                return Ok(Flow::EndBlock);
            }

            OpKind::NewObject => {
                let ctor = self.method_operand(op)?;
                let param_count = ctor.parameters.len() + ctor.extra_parameters.len();
                let mut params = self.pop_n(offset, param_count)?;
                params.reverse();
                let dst = self.push(offset)?;
                let mut args = Vec::with_capacity(param_count + 1);
                args.push(dst.clone());
                args.extend(params);
                self.emit(offset, TacInstrKind::NewObj { dst, ctor, args });
            }
            OpKind::NewArray {
                rank,
                has_lower_bounds,
            } => {
                let elem = self.type_operand(op)?;
                let rank = *rank;
                let mut sizes = self.pop_n(offset, rank as usize)?;
                sizes.reverse();
                let mut lower_bounds = if *has_lower_bounds {
                    self.pop_n(offset, rank as usize)?
                } else {
                    Vec::new()
                };
                lower_bounds.reverse();
                let dst = self.push(offset)?;
                self.emit(
                    offset,
                    TacInstrKind::NewArray {
                        dst,
                        elem,
                        rank,
                        lower_bounds,
                        sizes,
                    },
                );
            }

            OpKind::Return => {
                let value = if self.method.reference.return_type.is_void() {
                    None
                } else {
                    Some(self.pop(offset)?)
                };
                self.emit(offset, TacInstrKind::Return { value });
                return Ok(Flow::EndBlock);
            }
            OpKind::Throw => {
                let exc = self.pop(offset)?;
                self.stack.clear();
                self.emit(offset, TacInstrKind::Throw { exc: Some(exc) });
                return Ok(Flow::EndBlock);
            }
            OpKind::Rethrow => {
                self.stack.clear();
                self.emit(offset, TacInstrKind::Throw { exc: None });
                return Ok(Flow::EndBlock);
            }

            OpKind::Sizeof => {
                let ty = self.type_operand(op)?;
                let dst = self.push(offset)?;
                self.emit(offset, TacInstrKind::Sizeof { dst, ty });
            }
            OpKind::LocalAlloc => {
                let size = self.pop(offset)?;
                let dst = self.push(offset)?;
                self.emit(offset, TacInstrKind::LocalAlloc { dst, size });
            }
            OpKind::CopyMem => {
                let size = self.pop(offset)?;
                let src = self.pop(offset)?;
                let dst = self.pop(offset)?;
                self.emit(offset, TacInstrKind::CopyMem { dst, src, size });
            }
            OpKind::CopyObj => {
                let ty = self.type_operand(op)?;
                let src = self.pop(offset)?;
                let dst = self.pop(offset)?;
                self.emit(offset, TacInstrKind::CopyObj { dst, src, ty });
            }
            OpKind::InitMem => {
                let size = self.pop(offset)?;
                let value = self.pop(offset)?;
                let addr = self.pop(offset)?;
                self.emit(offset, TacInstrKind::InitMem { addr, value, size });
            }
            OpKind::InitObj => {
                let ty = self.type_operand(op)?;
                let addr = self.pop(offset)?;
                self.emit(offset, TacInstrKind::InitObj { addr, ty });
            }

            OpKind::Unknown(name) => {
                warn!(offset, opcode = %name, "skipping unsupported opcode");
                self.diagnostics.push(Diagnostic::new(
                    "LIFT_UNKNOWN_OPCODE",
                    format!("unsupported opcode `{name}`"),
                    offset,
                ));
            }
        }
        Ok(Flow::Continue)
    }

    /// `leave` lowering. Inside a try, every catch handler gets an
    /// exceptional edge; the textual branch then targets the leave target,
    /// or the finally entry when the region has a finally and no catches.
    fn transfer_leave(&mut self, offset: u32, target: u32) -> LiftResult<()> {
        let region = self.regions.innermost_try_containing(offset).cloned();
        if let Some(region) = region {
            let catches: Vec<CatchInfo> = region.catches;
            let finally = region.finally;
            for catch in &catches {
                self.emit(
                    offset,
                    TacInstrKind::ExcBranch {
                        target: Label::at(catch.begin),
                        exc_type: catch.exception_type.clone(),
                    },
                );
            }
            let branch_target = match finally {
                Some(fin) if catches.is_empty() => Label::finally(fin.begin),
                _ => Label::at(target),
            };
            self.emit(
                offset,
                TacInstrKind::Branch {
                    target: branch_target,
                },
            );
        } else {
            self.emit(
                offset,
                TacInstrKind::Branch {
                    target: Label::at(target),
                },
            );
        }
        self.stack.clear();
        self.add_pending(target, true)
    }

    fn transfer_call(&mut self, op: &RawOp, virtual_call: bool) -> LiftResult<()> {
        let offset = op.offset;
        let callee = self.method_operand(op)?;
        let args = self.pop_args(offset, &callee)?;
        let dst = if callee.has_result() {
            Some(self.push(offset)?)
        } else {
            None
        };
        let is_virtual = virtual_call && !callee.is_static;
        self.emit(
            offset,
            TacInstrKind::Call {
                dst,
                callee,
                args,
                is_virtual,
            },
        );
        Ok(())
    }

    /// Pop a call's arguments: extra parameters, declared parameters, then
    /// the receiver for instance methods; reversed back to source order.
    fn pop_args(&mut self, offset: u32, callee: &MethodRef) -> LiftResult<Vec<Variable>> {
        let mut extra = self.pop_n(offset, callee.extra_parameters.len())?;
        extra.reverse();
        let mut declared = self.pop_n(offset, callee.parameters.len())?;
        declared.reverse();
        let receiver = if callee.is_static {
            None
        } else {
            Some(self.pop(offset)?)
        };

        let mut args = Vec::with_capacity(callee.argument_count());
        args.extend(receiver);
        args.extend(declared);
        args.extend(extra);
        Ok(args)
    }

    fn binary(&mut self, offset: u32, op: BinOp) -> LiftResult<()> {
        let right = self.pop(offset)?;
        let left = self.pop(offset)?;
        let dst = self.push(offset)?;
        self.emit(
            offset,
            TacInstrKind::BinOp {
                dst,
                left,
                op,
                right,
            },
        );
        Ok(())
    }

    fn unary(&mut self, offset: u32, op: UnOp) -> LiftResult<()> {
        let src = self.pop(offset)?;
        let dst = self.push(offset)?;
        self.emit(offset, TacInstrKind::UnOp { dst, op, src });
        Ok(())
    }

    /// Enqueue a block, recording the current stack size as its entry size
    /// on first contact and checking agreement on every later edge.
    fn add_pending(&mut self, offset: u32, is_branch_target: bool) -> LiftResult<()> {
        let size = self.stack.size();
        let Some(block) = self.blocks.get_mut(offset) else {
            return Err(LiftError::InvalidTarget { offset });
        };
        match block.status {
            BlockStatus::None => {
                block.status = BlockStatus::Pending;
                block.stack_size_at_entry = size;
                trace!(offset, size, is_branch_target, "block enqueued");
                self.pending.push(offset);
            }
            BlockStatus::Pending | BlockStatus::Processed => {
                if block.stack_size_at_entry != size {
                    return Err(LiftError::StackSizeMismatch {
                        offset,
                        expected: block.stack_size_at_entry,
                        found: size,
                    });
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, offset: u32, kind: TacInstrKind) {
        if let Some(block) = self.blocks.get_mut(self.current) {
            block.instructions.push(TacInstr::new(offset, kind));
        }
    }

    // === Operand accessors and stack plumbing ===

    fn push(&mut self, offset: u32) -> LiftResult<Variable> {
        self.stack.push().map_err(|fault| stack_error(fault, offset))
    }

    fn pop(&mut self, offset: u32) -> LiftResult<Variable> {
        self.stack.pop().map_err(|fault| stack_error(fault, offset))
    }

    fn peek(&self, offset: u32) -> LiftResult<Variable> {
        self.stack.peek().map_err(|fault| stack_error(fault, offset))
    }

    fn pop_n(&mut self, offset: u32, count: usize) -> LiftResult<Vec<Variable>> {
        let mut popped = Vec::with_capacity(count);
        for _ in 0..count {
            popped.push(self.pop(offset)?);
        }
        Ok(popped)
    }

    fn field_operand(&self, op: &RawOp) -> LiftResult<FieldRef> {
        match &op.operand {
            OpValue::Field(field) => Ok(field.clone()),
            _ => Err(LiftError::MalformedOperand {
                offset: op.offset,
                expected: "field",
            }),
        }
    }

    fn method_operand(&self, op: &RawOp) -> LiftResult<Arc<MethodRef>> {
        op.operand
            .as_method()
            .cloned()
            .ok_or(LiftError::MalformedOperand {
                offset: op.offset,
                expected: "method",
            })
    }

    fn arg_var(&self, op: &RawOp) -> LiftResult<Variable> {
        let OpValue::Param(raw_index) = op.operand else {
            return Err(LiftError::MalformedOperand {
                offset: op.offset,
                expected: "parameter",
            });
        };
        // In instance methods slot 0 is the implicit receiver; declared
        // parameters are shifted down by one.
        if self.method.is_static() {
            Ok(Variable::Param(raw_index))
        } else if raw_index == 0 {
            Ok(Variable::This)
        } else {
            Ok(Variable::Param(raw_index - 1))
        }
    }

    fn local_var(&self, op: &RawOp) -> LiftResult<Variable> {
        let OpValue::Local(index) = op.operand else {
            return Err(LiftError::MalformedOperand {
                offset: op.offset,
                expected: "local",
            });
        };
        self.locals
            .get(usize::from(index))
            .cloned()
            .ok_or(LiftError::MalformedOperand {
                offset: op.offset,
                expected: "local in range",
            })
    }

    fn const_operand(&self, op: &RawOp) -> LiftResult<Const> {
        let value = match &op.operand {
            OpValue::I32(v) => Const::I32(*v),
            OpValue::I64(v) => Const::I64(*v),
            OpValue::F32(v) => Const::F32(*v),
            OpValue::F64(v) => Const::F64(*v),
            OpValue::Str(v) => Const::Str(v.clone()),
            OpValue::Null => Const::Null,
            _ => {
                return Err(LiftError::MalformedOperand {
                    offset: op.offset,
                    expected: "constant",
                })
            }
        };
        Ok(value)
    }

    fn type_operand(&self, op: &RawOp) -> LiftResult<TypeRef> {
        op.operand
            .as_type()
            .cloned()
            .ok_or(LiftError::MalformedOperand {
                offset: op.offset,
                expected: "type",
            })
    }

    fn target_operand(&self, op: &RawOp) -> LiftResult<u32> {
        op.operand.as_target().ok_or(LiftError::MalformedOperand {
            offset: op.offset,
            expected: "branch target",
        })
    }
}

fn stack_error(fault: StackFault, offset: u32) -> LiftError {
    match fault {
        StackFault::Overflow => LiftError::StackOverflow { offset },
        StackFault::Underflow => LiftError::StackUnderflow { offset },
    }
}
