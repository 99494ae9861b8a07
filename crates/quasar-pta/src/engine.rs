//! The interprocedural driver.
//!
//! `analyze(root)` lifts the root, runs its intraprocedural dataflow, and
//! resolves every call it encounters: virtual callees against the receiver's
//! current targets, everything else statically. Each callee is analyzed with
//! a frame-bound clone of the caller's graph, memoized on its input graph so
//! re-analysis only happens when that input grows. Methods that cannot be
//! lifted degrade to the unknown-method hooks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use quasar_flow::ControlFlowGraph;
use quasar_model::{MethodDef, MethodRef, Name, ProgramHost};
use quasar_tac::{lift, LiftError, MethodBody, Variable};

use crate::callgraph::CallGraph;
use crate::error::{AnalysisError, AnalysisResult};
use crate::graph::{NodeTable, PointsToGraph};
use crate::intra::{CallInfo, CallResolver, PointsToAnalysis};

/// Everything the engine knows about one method, under typed fields instead
/// of the string keys of the debug surface (`CFG`, `PTA`, `PTG`,
/// `INPUT_PTG`, `OUTPUT_PTG`).
#[derive(Debug, Default)]
pub struct MethodRecord {
    pub body: Option<Arc<MethodBody>>,
    pub cfg: Option<Arc<ControlFlowGraph>>,
    pub pta: Option<PointsToAnalysis>,
    pub input_ptg: Option<PointsToGraph>,
    pub output_ptg: Option<PointsToGraph>,
}

/// Caller-overridable callbacks. The defaults preserve the reference
/// semantics: unknown methods are skipped and leave the graph untouched,
/// and reachable methods go through the engine's own lift-and-build
/// pipeline.
pub trait EngineHooks {
    /// Supply a pre-built body/CFG pair for a newly reachable method.
    /// Returning `None` lets the engine lift and build its own.
    fn on_reachable_method_found(
        &mut self,
        method: &MethodDef,
    ) -> Option<(Arc<MethodBody>, Arc<ControlFlowGraph>)> {
        let _ = method;
        None
    }

    /// Whether an unresolvable callee should still be modelled. `false`
    /// skips the callee entirely.
    fn on_unknown_method_found(&mut self, callee: &MethodRef) -> bool {
        let _ = callee;
        false
    }

    /// The effect of a modelled-but-unknown callee on its frame-bound input
    /// graph. Defaults to identity.
    fn process_unknown_method(
        &mut self,
        callee: &Arc<MethodRef>,
        caller: &Arc<MethodRef>,
        call: &CallInfo,
        nodes: &mut NodeTable,
        input: PointsToGraph,
    ) -> PointsToGraph {
        let _ = (callee, caller, call, nodes);
        input
    }
}

/// The reference hook behavior.
#[derive(Debug, Default)]
pub struct DefaultHooks;

impl EngineHooks for DefaultHooks {}

pub struct InterproceduralPointsTo<'h, H: EngineHooks = DefaultHooks> {
    host: &'h dyn ProgramHost,
    hooks: H,
    records: HashMap<Arc<MethodRef>, MethodRecord>,
    call_graph: CallGraph,
    nodes: NodeTable,
}

impl<'h, H: EngineHooks> InterproceduralPointsTo<'h, H> {
    pub fn new(host: &'h dyn ProgramHost, hooks: H) -> Self {
        Self {
            host,
            hooks,
            records: HashMap::new(),
            call_graph: CallGraph::new(),
            nodes: NodeTable::new(),
        }
    }

    /// Run the whole-program fixed point from `root` and return the
    /// reachable call graph.
    pub fn analyze(&mut self, root: Arc<MethodRef>) -> AnalysisResult<&CallGraph> {
        let mut nodes = std::mem::take(&mut self.nodes);
        let outcome = self.analyze_root(&root, &mut nodes);
        self.nodes = nodes;
        outcome?;
        Ok(&self.call_graph)
    }

    #[must_use]
    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    #[must_use]
    pub fn record(&self, method: &MethodRef) -> Option<&MethodRecord> {
        self.records.get(method)
    }

    #[must_use]
    pub fn node_table(&self) -> &NodeTable {
        &self.nodes
    }

    fn analyze_root(&mut self, root: &Arc<MethodRef>, nodes: &mut NodeTable) -> AnalysisResult<()> {
        self.call_graph.add_method(root.clone());
        match self.prepare(root) {
            Ok(true) => {}
            Ok(false) => {
                return Err(AnalysisError::UnliftableRoot {
                    method: root.to_string(),
                    source: LiftError::MissingBody,
                })
            }
            Err(source) => {
                return Err(AnalysisError::UnliftableRoot {
                    method: root.to_string(),
                    source,
                })
            }
        }

        let Some((body, cfg)) = self
            .records
            .get(root)
            .and_then(|r| Some((r.body.clone()?, r.cfg.clone()?)))
        else {
            return Err(AnalysisError::UnliftableRoot {
                method: root.to_string(),
                source: LiftError::MissingBody,
            });
        };

        let seed = PointsToAnalysis::new(root.clone(), body, cfg);
        let initial = seed.initial_graph(nodes);
        {
            let record = self.records.entry(root.clone()).or_default();
            if record.pta.is_none() {
                record.pta = Some(seed);
            }
        }

        let output = self.run_method(root, &initial, nodes)?;
        self.records.entry(root.clone()).or_default().output_ptg = Some(output);

        debug!(
            root = %root,
            methods = self.call_graph.method_count(),
            edges = self.call_graph.edge_count(),
            nodes = nodes.len(),
            "interprocedural fixed point reached"
        );
        Ok(())
    }

    /// Lift and build the CFG for `method` if that has not happened yet.
    /// `Ok(false)` means the method has no resolvable bytecode body.
    fn prepare(&mut self, method: &Arc<MethodRef>) -> Result<bool, LiftError> {
        if self
            .records
            .get(method)
            .is_some_and(|record| record.cfg.is_some())
        {
            return Ok(true);
        }
        let Some(def) = self.host.method_def(method) else {
            return Ok(false);
        };
        if def.body.is_none() {
            return Ok(false);
        }

        let (body, cfg) = match self.hooks.on_reachable_method_found(&def) {
            Some(pair) => pair,
            None => {
                let body = Arc::new(lift(&def, self.host)?);
                let cfg = Arc::new(ControlFlowGraph::build(&body));
                (body, cfg)
            }
        };

        let record = self.records.entry(method.clone()).or_default();
        record.body = Some(body);
        record.cfg = Some(cfg);
        Ok(true)
    }

    fn ensure_reachable(&mut self, method: &Arc<MethodRef>) -> bool {
        match self.prepare(method) {
            Ok(ready) => ready,
            Err(error) => {
                warn!(method = %method, %error, "lifting failed; treating callee as unknown");
                false
            }
        }
    }

    /// Run (or re-run) one method's dataflow with the engine as the call
    /// resolver. The per-method analysis instance is checked out for the
    /// duration so recursive re-entry starts a fresh instance instead of
    /// aliasing this one.
    fn run_method(
        &mut self,
        method: &Arc<MethodRef>,
        input: &PointsToGraph,
        nodes: &mut NodeTable,
    ) -> AnalysisResult<PointsToGraph> {
        let (body, cfg, checked_out) = {
            let record = self.records.entry(method.clone()).or_default();
            let (Some(body), Some(cfg)) = (record.body.clone(), record.cfg.clone()) else {
                return Ok(input.clone());
            };
            (body, cfg, record.pta.take())
        };
        let mut pta =
            checked_out.unwrap_or_else(|| PointsToAnalysis::new(method.clone(), body, cfg));

        let result = pta.analyze(input, nodes, self);
        self.records.entry(method.clone()).or_default().pta = Some(pta);
        result
    }

    /// The call transfer of the interprocedural analysis: resolve callees,
    /// record call-graph edges, then per callee bind/memoize/analyze/restore
    /// and join everything into one output graph.
    fn process_method_call(
        &mut self,
        caller: &Arc<MethodRef>,
        call: &CallInfo,
        input: &PointsToGraph,
        nodes: &mut NodeTable,
    ) -> AnalysisResult<PointsToGraph> {
        let static_callee = call.callee.clone();

        let mut callees: Vec<Arc<MethodRef>> = Vec::new();
        if call.is_virtual && !static_callee.is_static {
            if let Some(receiver) = call.args.first() {
                for node in input.targets(receiver) {
                    let Some(ty) = nodes.kind(node).ty().cloned() else {
                        continue;
                    };
                    if let Some(found) = self.host.find_method_implementation(&ty, &static_callee)
                    {
                        if !callees.contains(&found) {
                            debug!(site = call.offset, callee = %found, "devirtualized callee");
                            callees.push(found);
                        }
                    }
                }
            }
        } else {
            callees.push(static_callee.clone());
        }

        // The static edge is recorded unconditionally; resolved dynamic
        // callees add theirs on top.
        self.call_graph
            .add_edge(caller.clone(), call.offset, static_callee.clone());
        for callee in &callees {
            self.call_graph
                .add_edge(caller.clone(), call.offset, callee.clone());
        }

        let mut output: Option<PointsToGraph> = None;
        for callee in callees {
            let known = self.ensure_reachable(&callee);

            let params: Vec<Variable> = if known {
                self.records
                    .get(&callee)
                    .and_then(|record| record.body.as_ref())
                    .map(|body| body.parameters.clone())
                    .unwrap_or_default()
            } else {
                if !self.hooks.on_unknown_method_found(&callee) {
                    debug!(callee = %callee, "unknown callee skipped");
                    continue;
                }
                synthesized_parameters(&callee)
            };

            let expected = params.len();
            let extra = callee.extra_parameters.len();
            if call.args.len() < expected || call.args.len() > expected + extra {
                return Err(AnalysisError::ArgumentCountMismatch {
                    caller: caller.to_string(),
                    callee: callee.to_string(),
                    offset: call.offset,
                    expected,
                    found: call.args.len(),
                });
            }

            let binding: Vec<(Variable, Variable)> = params
                .iter()
                .cloned()
                .zip(call.args.iter().cloned())
                .collect();
            let mut ptg = input.clone();
            let prev = ptg.new_frame(&binding);

            let changed = {
                let record = self.records.entry(callee.clone()).or_default();
                match &record.input_ptg {
                    None => true,
                    Some(old) => {
                        if ptg.graph_equals(old) {
                            false
                        } else {
                            // A subsumed input unions down to the old one.
                            ptg.union(old);
                            !ptg.graph_equals(old)
                        }
                    }
                }
            };

            let mut result = if changed {
                self.records.entry(callee.clone()).or_default().input_ptg = Some(ptg.clone());
                if known {
                    self.run_method(&callee, &ptg, nodes)?
                } else {
                    self.hooks
                        .process_unknown_method(&callee, caller, call, nodes, ptg.clone())
                }
            } else {
                let record = self.records.get(&callee);
                record
                    .and_then(|r| r.pta.as_ref().and_then(|p| p.exit_graph().cloned()))
                    .or_else(|| record.and_then(|r| r.output_ptg.clone()))
                    // Input unchanged but no finished result yet: this is a
                    // cycle still being analyzed, so the bottom is the
                    // bound input itself.
                    .unwrap_or_else(|| ptg.clone())
            };

            self.records.entry(callee.clone()).or_default().output_ptg = Some(result.clone());

            let result_binding: Vec<(Variable, Variable)> = call
                .dst
                .iter()
                .map(|dst| (PointsToAnalysis::result_variable(), dst.clone()))
                .collect();
            result.restore_frame(prev, &result_binding);

            match &mut output {
                None => output = Some(result),
                Some(acc) => acc.union(&result),
            }
        }

        // Empty or fully skipped callee set: the call has no effect.
        Ok(output.unwrap_or_else(|| input.clone()))
    }
}

impl<H: EngineHooks> CallResolver for InterproceduralPointsTo<'_, H> {
    fn resolve_call(
        &mut self,
        caller: &Arc<MethodRef>,
        call: &CallInfo,
        input: &PointsToGraph,
        nodes: &mut NodeTable,
    ) -> AnalysisResult<PointsToGraph> {
        self.process_method_call(caller, call, input, nodes)
    }
}

/// Parameter stand-ins for a callee with no body: a fresh receiver local
/// plus `p1..pN` locals for the declared parameters.
fn synthesized_parameters(callee: &MethodRef) -> Vec<Variable> {
    let mut params = Vec::new();
    if !callee.is_static {
        params.push(Variable::Local(Name::new("$this")));
    }
    for index in 1..=callee.parameters.len() {
        params.push(Variable::Local(Name::new(format!("p{index}"))));
    }
    params
}
