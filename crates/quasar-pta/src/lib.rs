//! Interprocedural may-points-to analysis and call-graph construction.
//!
//! The engine drives a worklist fixed point over per-method dataflow:
//! virtual callees are resolved against the receiver's current points-to
//! targets, each callee is analyzed with a frame-bound clone of the caller's
//! graph, and methods are re-analyzed only when their memoized input graph
//! grows. The fixed point terminates because the call graph and every
//! points-to graph only ever grow over finite universes.

mod callgraph;
mod engine;
mod error;
mod graph;
mod intra;

pub use crate::callgraph::CallGraph;
pub use crate::engine::{DefaultHooks, EngineHooks, InterproceduralPointsTo, MethodRecord};
pub use crate::error::{AnalysisError, AnalysisResult};
pub use crate::graph::{FrameSnapshot, NodeId, NodeKind, NodeTable, PointsToGraph};
pub use crate::intra::{CallInfo, CallResolver, IdentityResolver, PointsToAnalysis};
