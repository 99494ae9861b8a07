//! Control-flow graph over a lifted method body.
//!
//! Blocks are contiguous instruction ranges; a synthetic exit block joins
//! every `Return` and `Throw` so forward dataflow has a single exit state.
//! Branch targets are resolved by offset; a target with no instruction (for
//! example the end offset of a trailing finally) simply contributes no edge.

use std::collections::HashMap;

use quasar_tac::{MethodBody, TacInstr, TacInstrKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

impl BlockId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A contiguous run of instructions, identified by its index range into the
/// owning body's instruction stream.
#[derive(Debug, Clone)]
pub struct FlowBlock {
    pub start: usize,
    pub end: usize,
}

impl FlowBlock {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub entry: BlockId,
    /// Synthetic block with no instructions; successor of every return and
    /// throw.
    pub exit: BlockId,
    blocks: Vec<FlowBlock>,
    preds: Vec<Vec<BlockId>>,
    succs: Vec<Vec<BlockId>>,
}

impl ControlFlowGraph {
    /// Build the graph for a lifted body.
    #[must_use]
    pub fn build(body: &MethodBody) -> Self {
        let instrs = &body.instructions;
        let n = instrs.len();

        // First instruction carrying each offset; region markers share the
        // offset of the operation they precede, so branches land on them.
        let mut first_at_offset: HashMap<u32, usize> = HashMap::new();
        for (idx, instr) in instrs.iter().enumerate() {
            first_at_offset.entry(instr.offset).or_insert(idx);
        }

        let mut leader = vec![false; n + 1];
        if n > 0 {
            leader[0] = true;
        }
        for (idx, instr) in instrs.iter().enumerate() {
            if instr_ends_block(instr) {
                leader[idx + 1] = true;
            }
            for target in branch_targets(instr) {
                if let Some(&target_idx) = first_at_offset.get(&target) {
                    leader[target_idx] = true;
                }
            }
        }

        let mut blocks = Vec::new();
        let mut block_of_instr = vec![0usize; n];
        let mut start = 0;
        for idx in 0..n {
            if idx > 0 && leader[idx] {
                blocks.push(FlowBlock { start, end: idx });
                start = idx;
            }
            block_of_instr[idx] = blocks.len();
        }
        if n > 0 {
            blocks.push(FlowBlock { start, end: n });
        }

        let exit = BlockId(blocks.len());
        blocks.push(FlowBlock { start: n, end: n });

        let mut succs = vec![Vec::new(); blocks.len()];
        for (block_idx, block) in blocks.iter().enumerate() {
            if block_idx == exit.index() {
                continue;
            }
            let Some(last) = instrs.get(block.end.wrapping_sub(1)) else {
                continue;
            };
            if block.is_empty() {
                continue;
            }

            let mut add = |succ: BlockId, succs: &mut Vec<Vec<BlockId>>| {
                if !succs[block_idx].contains(&succ) {
                    succs[block_idx].push(succ);
                }
            };

            for target in branch_targets(last) {
                if let Some(&target_idx) = first_at_offset.get(&target) {
                    add(BlockId(block_of_instr[target_idx]), &mut succs);
                }
            }

            match &last.kind {
                TacInstrKind::Return { .. } | TacInstrKind::Throw { .. } => {
                    add(exit, &mut succs);
                }
                TacInstrKind::Branch { .. } => {}
                // Conditional and exceptional branches fall through, a
                // switch falls through to its default case, and plain
                // block-ending instructions continue to the next block.
                _ => {
                    if block.end < n {
                        add(BlockId(block_of_instr[block.end]), &mut succs);
                    }
                }
            }
        }

        let mut preds = vec![Vec::new(); blocks.len()];
        for (from, outgoing) in succs.iter().enumerate() {
            for to in outgoing {
                preds[to.index()].push(BlockId(from));
            }
        }

        Self {
            entry: BlockId(0),
            exit,
            blocks,
            preds,
            succs,
        }
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &FlowBlock {
        &self.blocks[id.index()]
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        &self.preds[id.index()]
    }

    #[must_use]
    pub fn successors(&self, id: BlockId) -> &[BlockId] {
        &self.succs[id.index()]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    /// The instructions of `id` within `body`.
    #[must_use]
    pub fn instructions<'a>(&self, body: &'a MethodBody, id: BlockId) -> &'a [TacInstr] {
        let block = self.block(id);
        &body.instructions[block.start..block.end]
    }

    #[must_use]
    pub fn reachable_blocks(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        while let Some(bb) = stack.pop() {
            if reachable[bb.index()] {
                continue;
            }
            reachable[bb.index()] = true;
            stack.extend(self.successors(bb));
        }
        reachable
    }
}

/// Whether this instruction always terminates its block.
fn instr_ends_block(instr: &TacInstr) -> bool {
    matches!(
        instr.kind,
        TacInstrKind::Branch { .. }
            | TacInstrKind::CondBranch { .. }
            | TacInstrKind::ExcBranch { .. }
            | TacInstrKind::Switch { .. }
            | TacInstrKind::Return { .. }
            | TacInstrKind::Throw { .. }
    )
}

fn branch_targets(instr: &TacInstr) -> Vec<u32> {
    match &instr.kind {
        TacInstrKind::Branch { target } => vec![target.offset],
        TacInstrKind::CondBranch { target, .. } => vec![target.offset],
        TacInstrKind::ExcBranch { target, .. } => vec![target.offset],
        TacInstrKind::Switch { targets, .. } => targets.iter().map(|t| t.offset).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quasar_tac::{Const, Label, TacOperand, Variable};

    fn instr(offset: u32, kind: TacInstrKind) -> TacInstr {
        TacInstr::new(offset, kind)
    }

    fn load(offset: u32, dst: u16, value: i32) -> TacInstr {
        instr(
            offset,
            TacInstrKind::Load {
                dst: Variable::Temp(dst),
                src: TacOperand::Const(Const::I32(value)),
            },
        )
    }

    fn body_of(instructions: Vec<TacInstr>) -> MethodBody {
        MethodBody {
            instructions,
            ..MethodBody::default()
        }
    }

    #[test]
    fn straight_line_body_is_one_block_plus_exit() {
        let body = body_of(vec![
            load(0, 0, 1),
            load(1, 1, 2),
            instr(
                2,
                TacInstrKind::Return {
                    value: Some(Variable::Temp(0)),
                },
            ),
        ]);
        let cfg = ControlFlowGraph::build(&body);

        assert_eq!(cfg.block_count(), 2);
        assert_eq!(cfg.successors(cfg.entry), &[cfg.exit]);
        assert_eq!(cfg.instructions(&body, cfg.entry).len(), 3);
        assert!(cfg.instructions(&body, cfg.exit).is_empty());
    }

    #[test]
    fn conditional_branch_splits_flow_and_rejoins() {
        // 0: if t0 == true goto 3
        // 1: t1 = 1
        // 2: goto 4
        // 3: t1 = 2
        // 4: return
        let body = body_of(vec![
            instr(
                0,
                TacInstrKind::CondBranch {
                    left: Variable::Temp(0),
                    cmp: quasar_model::ops::BranchCmp::Eq,
                    right: TacOperand::Const(Const::Bool(true)),
                    target: Label::at(3),
                },
            ),
            load(1, 1, 1),
            instr(
                2,
                TacInstrKind::Branch {
                    target: Label::at(4),
                },
            ),
            load(3, 1, 2),
            instr(4, TacInstrKind::Return { value: None }),
        ]);
        let cfg = ControlFlowGraph::build(&body);

        // cond, then-arm, else-arm, join, exit
        assert_eq!(cfg.block_count(), 5);
        assert_eq!(cfg.successors(cfg.entry).len(), 2);

        let join = BlockId(3);
        assert_eq!(cfg.predecessors(join).len(), 2);
        assert_eq!(cfg.successors(join), &[cfg.exit]);
        assert!(cfg.reachable_blocks().iter().all(|&r| r));
    }

    #[test]
    fn dangling_branch_target_contributes_no_edge() {
        let body = body_of(vec![
            instr(
                0,
                TacInstrKind::Branch {
                    target: Label::at(99),
                },
            ),
            instr(1, TacInstrKind::Return { value: None }),
        ]);
        let cfg = ControlFlowGraph::build(&body);
        assert!(cfg.successors(cfg.entry).is_empty());
        let reachable = cfg.reachable_blocks();
        assert!(!reachable[1]);
    }

    #[test]
    fn switch_keeps_its_default_case_edge() {
        // 0: switch t0 [2]
        // 1: return        <- the implicit default case
        // 2: return
        let body = body_of(vec![
            instr(
                0,
                TacInstrKind::Switch {
                    operand: Variable::Temp(0),
                    targets: vec![Label::at(2)],
                },
            ),
            instr(1, TacInstrKind::Return { value: None }),
            instr(2, TacInstrKind::Return { value: None }),
        ]);
        let cfg = ControlFlowGraph::build(&body);

        let successors = cfg.successors(cfg.entry);
        assert_eq!(successors.len(), 2);
        assert!(successors.contains(&BlockId(1)));
        assert!(successors.contains(&BlockId(2)));
        assert!(cfg.reachable_blocks().iter().all(|&r| r));
    }

    #[test]
    fn exceptional_branch_keeps_fall_through() {
        let body = body_of(vec![
            instr(
                0,
                TacInstrKind::ExcBranch {
                    target: Label::at(2),
                    exc_type: None,
                },
            ),
            instr(
                1,
                TacInstrKind::Branch {
                    target: Label::at(3),
                },
            ),
            instr(2, TacInstrKind::Return { value: None }),
            instr(3, TacInstrKind::Return { value: None }),
        ]);
        let cfg = ControlFlowGraph::build(&body);
        // Block 0 (the ExcBranch) flows both to the handler and onward to
        // the textual branch.
        assert_eq!(cfg.successors(cfg.entry).len(), 2);
    }
}
