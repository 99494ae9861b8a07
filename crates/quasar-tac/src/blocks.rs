//! Basic-block recognition over the raw operation stream.
//!
//! A single pass identifies block leaders: offset 0, every branch target,
//! the operation following any terminator, and every exception-handler
//! entry. Blocks accumulate lifted instructions as the driver processes
//! them.

use std::collections::BTreeMap;

use quasar_model::{ExceptionHandler, OpKind, OpValue, RawOp};

use crate::tac::TacInstr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockStatus {
    #[default]
    None,
    Pending,
    Processed,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub offset: u32,
    /// Whether the operation before this block's leader can fall into it.
    pub can_fall_through: bool,
    pub stack_size_at_entry: u16,
    pub status: BlockStatus,
    pub instructions: Vec<TacInstr>,
}

impl BasicBlock {
    fn new(offset: u32) -> Self {
        Self {
            offset,
            can_fall_through: true,
            stack_size_at_entry: 0,
            status: BlockStatus::None,
            instructions: Vec::new(),
        }
    }
}

/// The recognized blocks of one method, keyed and ordered by offset.
#[derive(Debug, Clone, Default)]
pub struct BlockMap {
    blocks: BTreeMap<u32, BasicBlock>,
}

impl BlockMap {
    /// Runs the recognition pass. Handler entries are seeded as leaders as
    /// well: they are lifted as worklist roots even when no branch in the
    /// decoded stream targets them.
    #[must_use]
    pub fn build(ops: &[RawOp], handlers: &[ExceptionHandler]) -> Self {
        let mut map = Self::default();
        if ops.is_empty() {
            return map;
        }

        map.ensure(ops[0].offset);

        // The flag carried to the next leader: does the previous operation
        // fall through into it?
        let mut pending_leader: Option<bool> = None;

        for op in ops {
            if let Some(falls) = pending_leader.take() {
                map.ensure(op.offset).can_fall_through = falls;
            }

            match &op.opcode {
                OpKind::Branch | OpKind::Leave => {
                    if let Some(target) = op.operand.as_target() {
                        map.ensure(target);
                    }
                    pending_leader = Some(false);
                }
                OpKind::BranchIf { .. } | OpKind::BranchTrue | OpKind::BranchFalse => {
                    if let Some(target) = op.operand.as_target() {
                        map.ensure(target);
                    }
                    pending_leader = Some(true);
                }
                OpKind::Switch => {
                    if let OpValue::Targets(targets) = &op.operand {
                        for &target in targets {
                            map.ensure(target);
                        }
                    }
                    pending_leader = Some(true);
                }
                kind if kind.is_terminator() => {
                    pending_leader = Some(false);
                }
                _ => {}
            }
        }

        for handler in handlers {
            map.ensure(handler.handler_start);
        }

        map
    }

    fn ensure(&mut self, offset: u32) -> &mut BasicBlock {
        self.blocks
            .entry(offset)
            .or_insert_with(|| BasicBlock::new(offset))
    }

    #[must_use]
    pub fn contains(&self, offset: u32) -> bool {
        self.blocks.contains_key(&offset)
    }

    #[must_use]
    pub fn get(&self, offset: u32) -> Option<&BasicBlock> {
        self.blocks.get(&offset)
    }

    #[must_use]
    pub fn get_mut(&mut self, offset: u32) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&offset)
    }

    /// Blocks in source-offset order.
    pub fn iter(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quasar_model::ops::BranchCmp;

    fn op(offset: u32, opcode: OpKind) -> RawOp {
        RawOp::new(offset, opcode)
    }

    fn branch(offset: u32, opcode: OpKind, target: u32) -> RawOp {
        RawOp::with_operand(offset, opcode, OpValue::Target(target))
    }

    #[test]
    fn leaders_at_entry_targets_and_after_terminators() {
        // 0: brtrue -> 4    (leader 0; target 4; fall-through leader 2)
        // 2: nop
        // 3: ret             (leader after at 4)
        // 4: nop
        let ops = vec![
            branch(
                0,
                OpKind::BranchIf {
                    cmp: BranchCmp::Eq,
                    unsigned: false,
                },
                4,
            ),
            op(2, OpKind::Nop),
            op(3, OpKind::Return),
            op(4, OpKind::Nop),
        ];
        let map = BlockMap::build(&ops, &[]);

        let offsets: Vec<u32> = map.iter().map(|b| b.offset).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
        assert!(map.get(2).unwrap().can_fall_through);
        // Block 4 is a branch target, but the `ret` before it cannot fall in.
        assert!(!map.get(4).unwrap().can_fall_through);
    }

    #[test]
    fn switch_creates_a_block_per_target() {
        let ops = vec![
            RawOp::with_operand(0, OpKind::Switch, OpValue::Targets(vec![10, 20, 30])),
            op(5, OpKind::Nop),
            op(10, OpKind::Nop),
            op(20, OpKind::Nop),
            op(30, OpKind::Return),
        ];
        let map = BlockMap::build(&ops, &[]);
        for offset in [0, 5, 10, 20, 30] {
            assert!(map.contains(offset), "missing block at {offset}");
        }
    }

    #[test]
    fn handler_entries_become_leaders() {
        let ops = vec![op(0, OpKind::Nop), op(1, OpKind::Return), op(2, OpKind::Nop)];
        let handlers = vec![ExceptionHandler {
            try_start: 0,
            try_end: 2,
            kind: quasar_model::HandlerKind::Catch,
            handler_start: 2,
            handler_end: 3,
            exception_type: None,
        }];
        let map = BlockMap::build(&ops, &handlers);
        assert!(map.contains(2));
    }
}
