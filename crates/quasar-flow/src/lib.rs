//! Control-flow graph construction over lifted three-address code.

mod cfg;

pub use crate::cfg::{BlockId, ControlFlowGraph, FlowBlock};
