//! Intraprocedural points-to analysis: forward dataflow over one method's
//! CFG with per-instruction transfer functions and union joins.
//!
//! Calls are delegated to an injected [`CallResolver`]; the interprocedural
//! engine plugs itself in there, while standalone runs use the identity
//! resolver. Per-block output states persist across runs so re-analysis
//! with a grown input resumes from the previous fixed point.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use quasar_flow::ControlFlowGraph;
use quasar_model::{MethodRef, Name, TypeRef};
use quasar_tac::{MethodBody, TacInstr, TacInstrKind, TacOperand, Variable};

use crate::error::AnalysisResult;
use crate::graph::{NodeKind, NodeTable, PointsToGraph};

/// One call site as seen by the transfer function.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub offset: u32,
    pub dst: Option<Variable>,
    pub callee: Arc<MethodRef>,
    pub args: Vec<Variable>,
    pub is_virtual: bool,
}

/// Resolves the effect of a call on the points-to graph.
pub trait CallResolver {
    fn resolve_call(
        &mut self,
        caller: &Arc<MethodRef>,
        call: &CallInfo,
        input: &PointsToGraph,
        nodes: &mut NodeTable,
    ) -> AnalysisResult<PointsToGraph>;
}

/// Treats every call as having no effect on the graph.
#[derive(Debug, Default)]
pub struct IdentityResolver;

impl CallResolver for IdentityResolver {
    fn resolve_call(
        &mut self,
        _caller: &Arc<MethodRef>,
        _call: &CallInfo,
        input: &PointsToGraph,
        _nodes: &mut NodeTable,
    ) -> AnalysisResult<PointsToGraph> {
        Ok(input.clone())
    }
}

/// The dataflow instance for one method. Holds the per-block output states
/// reached so far; the exit block's state is the method's output graph.
#[derive(Debug)]
pub struct PointsToAnalysis {
    method: Arc<MethodRef>,
    body: Arc<MethodBody>,
    cfg: Arc<ControlFlowGraph>,
    reachable: Vec<bool>,
    outs: Vec<Option<PointsToGraph>>,
}

impl PointsToAnalysis {
    #[must_use]
    pub fn new(method: Arc<MethodRef>, body: Arc<MethodBody>, cfg: Arc<ControlFlowGraph>) -> Self {
        let reachable = cfg.reachable_blocks();
        let outs = vec![None; cfg.block_count()];
        Self {
            method,
            body,
            cfg,
            reachable,
            outs,
        }
    }

    /// The reserved local that carries return-value targets to the caller.
    #[must_use]
    pub fn result_variable() -> Variable {
        Variable::Local(Name::new("$result"))
    }

    /// The pseudo-field under which array elements are smashed.
    #[must_use]
    pub fn elem_field() -> Name {
        Name::new("[]")
    }

    /// The entry graph for a root analysis: every reference-typed parameter
    /// points to its parameter-entry node.
    pub fn initial_graph(&self, nodes: &mut NodeTable) -> PointsToGraph {
        let mut graph = PointsToGraph::new();

        let mut param_types: Vec<TypeRef> = Vec::new();
        if !self.method.is_static {
            param_types.push(self.method.containing_type.clone());
        }
        param_types.extend(self.method.parameters.iter().cloned());

        for (index, var) in self.body.parameters.iter().enumerate() {
            let Some(ty) = param_types.get(index) else {
                continue;
            };
            if !ty.is_reference() {
                continue;
            }
            let node = nodes.intern(NodeKind::ParamEntry {
                method: self.method.clone(),
                index: index as u16,
                ty: ty.clone(),
            });
            graph.assign(var.clone(), BTreeSet::from([node]));
        }
        graph
    }

    /// The exit state of the last completed run, if any.
    #[must_use]
    pub fn exit_graph(&self) -> Option<&PointsToGraph> {
        self.outs[self.cfg.exit.index()].as_ref()
    }

    /// Run to a fixed point from `input` and return the exit state.
    /// Blocks unreachable from the entry never enter the worklist.
    pub fn analyze(
        &mut self,
        input: &PointsToGraph,
        nodes: &mut NodeTable,
        resolver: &mut dyn CallResolver,
    ) -> AnalysisResult<PointsToGraph> {
        let body = self.body.clone();
        let cfg = self.cfg.clone();

        let mut worklist: VecDeque<_> = cfg
            .block_ids()
            .filter(|bb| self.reachable[bb.index()])
            .collect();
        while let Some(bb) = worklist.pop_front() {
            let new_in = if bb == cfg.entry {
                // The entry still joins back edges that loop to offset 0.
                let mut graph = input.clone();
                for pred in cfg.predecessors(bb) {
                    if let Some(out) = &self.outs[pred.index()] {
                        graph.union(out);
                    }
                }
                graph
            } else {
                let mut joined: Option<PointsToGraph> = None;
                for pred in cfg.predecessors(bb) {
                    if let Some(out) = &self.outs[pred.index()] {
                        match &mut joined {
                            None => joined = Some(out.clone()),
                            Some(acc) => acc.union(out),
                        }
                    }
                }
                match joined {
                    Some(graph) => graph,
                    // No predecessor has produced a state yet.
                    None => continue,
                }
            };

            let mut state = new_in;
            for instr in cfg.instructions(&body, bb) {
                self.transfer(&mut state, instr, nodes, resolver)?;
            }

            let changed = match &self.outs[bb.index()] {
                None => true,
                Some(old) => !state.graph_equals(old),
            };
            if changed {
                self.outs[bb.index()] = Some(state);
                for succ in cfg.successors(bb) {
                    if !worklist.contains(succ) {
                        worklist.push_back(*succ);
                    }
                }
            }
        }

        Ok(self
            .exit_graph()
            .cloned()
            .unwrap_or_else(|| input.clone()))
    }

    fn transfer(
        &self,
        state: &mut PointsToGraph,
        instr: &TacInstr,
        nodes: &mut NodeTable,
        resolver: &mut dyn CallResolver,
    ) -> AnalysisResult<()> {
        match &instr.kind {
            TacInstrKind::Load { dst, src } => match src {
                TacOperand::Var(v) => {
                    let targets = state.targets(v);
                    state.assign(dst.clone(), targets);
                }
                TacOperand::Const(c) => {
                    if matches!(c, quasar_tac::Const::Null) {
                        state.assign(dst.clone(), BTreeSet::from([nodes.null()]));
                    } else {
                        state.assign(dst.clone(), BTreeSet::new());
                    }
                }
                // Managed-pointer cells are smashed into the pointer
                // variable itself.
                TacOperand::Deref(v) => {
                    let targets = state.targets(v);
                    state.assign(dst.clone(), targets);
                }
                TacOperand::InstField { obj, field } => {
                    state.load_field(dst.clone(), obj, field);
                }
                TacOperand::StaticField { field, .. } => {
                    state.load_static(nodes, dst.clone(), field);
                }
                TacOperand::ArrayElem { array, .. } => {
                    state.load_field(dst.clone(), array, &Self::elem_field());
                }
                TacOperand::Ref(_) | TacOperand::MethodPtr { .. } => {
                    state.assign(dst.clone(), BTreeSet::new());
                }
            },

            TacInstrKind::Store { dst, src } => match dst {
                quasar_tac::Place::Var(v) => {
                    let targets = state.targets(src);
                    state.assign(v.clone(), targets);
                }
                quasar_tac::Place::Deref(v) => {
                    let targets = state.targets(src);
                    state.assign_union(v.clone(), targets);
                }
                quasar_tac::Place::InstField { obj, field } => {
                    state.store_field(obj, field, src);
                }
                quasar_tac::Place::StaticField { field, .. } => {
                    state.store_static(nodes, field, src);
                }
                quasar_tac::Place::ArrayElem { array, .. } => {
                    state.store_field(array, &Self::elem_field(), src);
                }
            },

            TacInstrKind::NewObj { dst, ctor, .. } => {
                let node = state.allocate(nodes, instr.offset, ctor.containing_type.clone());
                state.assign(dst.clone(), BTreeSet::from([node]));
            }
            TacInstrKind::NewArray { dst, elem, rank, .. } => {
                let ty = TypeRef::Array {
                    elem: Box::new(elem.clone()),
                    rank: (*rank).min(u32::from(u8::MAX)) as u8,
                };
                let node = state.allocate(nodes, instr.offset, ty);
                state.assign(dst.clone(), BTreeSet::from([node]));
            }

            TacInstrKind::Call {
                dst,
                callee,
                args,
                is_virtual,
            } => {
                let call = CallInfo {
                    offset: instr.offset,
                    dst: dst.clone(),
                    callee: callee.clone(),
                    args: args.clone(),
                    is_virtual: *is_virtual,
                };
                *state = resolver.resolve_call(&self.method, &call, state, nodes)?;
            }

            TacInstrKind::Return { value: Some(v) } => {
                let targets = state.targets(v);
                state.assign(Self::result_variable(), targets);
            }

            // Arithmetic, conversions, control flow, markers, and the rest
            // are identity on the graph.
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quasar_tac::{Const, Place};

    fn m(name: &str, parameters: Vec<TypeRef>, return_type: TypeRef) -> Arc<MethodRef> {
        Arc::new(MethodRef {
            containing_type: TypeRef::named("T"),
            name: Name::new(name),
            parameters,
            extra_parameters: Vec::new(),
            return_type,
            is_static: true,
            is_virtual: false,
        })
    }

    fn local(name: &str) -> Variable {
        Variable::Local(Name::new(name))
    }

    fn analysis_for(method: Arc<MethodRef>, body: MethodBody) -> PointsToAnalysis {
        let body = Arc::new(body);
        let cfg = Arc::new(ControlFlowGraph::build(&body));
        PointsToAnalysis::new(method, body, cfg)
    }

    fn ctor(type_name: &str) -> Arc<MethodRef> {
        Arc::new(MethodRef {
            containing_type: TypeRef::named(type_name),
            name: Name::new(".ctor"),
            parameters: Vec::new(),
            extra_parameters: Vec::new(),
            return_type: TypeRef::Void,
            is_static: false,
            is_virtual: false,
        })
    }

    #[test]
    fn allocation_flows_through_moves_and_fields() {
        // 0: x = new A()
        // 1: y = x
        // 2: y.f = x
        // 3: z = y.f
        // 4: return
        let f = Name::new("A f");
        let body = MethodBody {
            instructions: vec![
                TacInstr::new(
                    0,
                    TacInstrKind::NewObj {
                        dst: local("x"),
                        ctor: ctor("A"),
                        args: vec![local("x")],
                    },
                ),
                TacInstr::new(
                    1,
                    TacInstrKind::Load {
                        dst: local("y"),
                        src: TacOperand::Var(local("x")),
                    },
                ),
                TacInstr::new(
                    2,
                    TacInstrKind::Store {
                        dst: Place::InstField {
                            obj: local("y"),
                            field: f.clone(),
                        },
                        src: local("x"),
                    },
                ),
                TacInstr::new(
                    3,
                    TacInstrKind::Load {
                        dst: local("z"),
                        src: TacOperand::InstField {
                            obj: local("y"),
                            field: f.clone(),
                        },
                    },
                ),
                TacInstr::new(4, TacInstrKind::Return { value: None }),
            ],
            ..MethodBody::default()
        };

        let mut nodes = NodeTable::new();
        let mut pta = analysis_for(m("f", vec![], TypeRef::Void), body);
        let exit = pta
            .analyze(&PointsToGraph::new(), &mut nodes, &mut IdentityResolver)
            .unwrap();

        let x = exit.targets(&local("x"));
        assert_eq!(x.len(), 1);
        assert_eq!(exit.targets(&local("y")), x);
        assert_eq!(exit.targets(&local("z")), x);
    }

    #[test]
    fn null_constant_points_to_the_null_node() {
        let body = MethodBody {
            instructions: vec![
                TacInstr::new(
                    0,
                    TacInstrKind::Load {
                        dst: local("x"),
                        src: TacOperand::Const(Const::Null),
                    },
                ),
                TacInstr::new(1, TacInstrKind::Return { value: None }),
            ],
            ..MethodBody::default()
        };
        let mut nodes = NodeTable::new();
        let mut pta = analysis_for(m("f", vec![], TypeRef::Void), body);
        let exit = pta
            .analyze(&PointsToGraph::new(), &mut nodes, &mut IdentityResolver)
            .unwrap();
        assert_eq!(exit.targets(&local("x")), BTreeSet::from([nodes.null()]));
    }

    #[test]
    fn returned_reference_lands_in_the_result_variable() {
        let ret_ty = TypeRef::named("A");
        let body = MethodBody {
            instructions: vec![
                TacInstr::new(
                    0,
                    TacInstrKind::NewObj {
                        dst: local("x"),
                        ctor: ctor("A"),
                        args: vec![local("x")],
                    },
                ),
                TacInstr::new(
                    1,
                    TacInstrKind::Return {
                        value: Some(local("x")),
                    },
                ),
            ],
            ..MethodBody::default()
        };
        let mut nodes = NodeTable::new();
        let mut pta = analysis_for(m("f", vec![], ret_ty), body);
        let exit = pta
            .analyze(&PointsToGraph::new(), &mut nodes, &mut IdentityResolver)
            .unwrap();
        assert_eq!(
            exit.targets(&PointsToAnalysis::result_variable()).len(),
            1
        );
    }

    #[test]
    fn branches_join_by_union() {
        // 0: if p == true goto 3
        // 1: x = new A()      (offset 1)
        // 2: goto 4
        // 3: x = new B()      (offset 3)
        // 4: return
        let body = MethodBody {
            instructions: vec![
                TacInstr::new(
                    0,
                    TacInstrKind::CondBranch {
                        left: local("p"),
                        cmp: quasar_model::ops::BranchCmp::Eq,
                        right: TacOperand::Const(Const::Bool(true)),
                        target: quasar_tac::Label::at(3),
                    },
                ),
                TacInstr::new(
                    1,
                    TacInstrKind::NewObj {
                        dst: local("x"),
                        ctor: ctor("A"),
                        args: vec![local("x")],
                    },
                ),
                TacInstr::new(
                    2,
                    TacInstrKind::Branch {
                        target: quasar_tac::Label::at(4),
                    },
                ),
                TacInstr::new(
                    3,
                    TacInstrKind::NewObj {
                        dst: local("x"),
                        ctor: ctor("B"),
                        args: vec![local("x")],
                    },
                ),
                TacInstr::new(4, TacInstrKind::Return { value: None }),
            ],
            ..MethodBody::default()
        };
        let mut nodes = NodeTable::new();
        let mut pta = analysis_for(m("f", vec![], TypeRef::Void), body);
        let exit = pta
            .analyze(&PointsToGraph::new(), &mut nodes, &mut IdentityResolver)
            .unwrap();
        // Both arms' allocations survive the join.
        assert_eq!(exit.targets(&local("x")).len(), 2);
    }
}
