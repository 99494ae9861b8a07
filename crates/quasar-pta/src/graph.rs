//! The points-to graph and the run-wide abstract-node table.
//!
//! Nodes are interned once per analysis run, so a `NodeId` means the same
//! abstract object in every graph of the run and joins are plain set unions.
//! A graph is roots (variable to node sets), field edges (node and field
//! name to node sets), and a frame depth for call-site scoping. Empty sets
//! are never stored, which keeps structural equality honest.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use quasar_model::{MethodRef, Name, TypeRef};
use quasar_tac::Variable;

/// Handle to an interned abstract heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The identity of an abstract heap object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Null,
    /// A value flowing in through a method parameter.
    ParamEntry {
        method: Arc<MethodRef>,
        index: u16,
        ty: TypeRef,
    },
    /// An allocation site, distinguished per frame depth so distinct call
    /// sites of the same method allocate distinct abstract objects.
    AllocSite {
        offset: u32,
        ty: TypeRef,
        frame: u32,
    },
    /// The global cell behind one static field.
    Static { field: Name },
}

impl NodeKind {
    /// The runtime type this node stands for, when it has one.
    #[must_use]
    pub fn ty(&self) -> Option<&TypeRef> {
        match self {
            NodeKind::ParamEntry { ty, .. } | NodeKind::AllocSite { ty, .. } => Some(ty),
            NodeKind::Null | NodeKind::Static { .. } => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Null => f.write_str("null"),
            NodeKind::ParamEntry { method, index, ty } => {
                write!(f, "param {index} of {}::{} : {ty}", method.containing_type, method.name)
            }
            NodeKind::AllocSite { offset, ty, frame } => {
                write!(f, "new {ty} @{offset:#06x}/{frame}")
            }
            NodeKind::Static { field } => write!(f, "static {field}"),
        }
    }
}

/// Interner assigning stable ids to abstract nodes for one analysis run.
#[derive(Debug, Default)]
pub struct NodeTable {
    nodes: Vec<NodeKind>,
    index: HashMap<NodeKind, NodeId>,
}

impl NodeTable {
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self::default();
        table.intern(NodeKind::Null);
        table
    }

    pub fn intern(&mut self, kind: NodeKind) -> NodeId {
        if let Some(&id) = self.index.get(&kind) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(kind.clone());
        self.index.insert(kind, id);
        id
    }

    /// The null node; interned first in every table.
    #[must_use]
    pub fn null(&self) -> NodeId {
        NodeId(0)
    }

    #[must_use]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The caller-side snapshot taken by [`PointsToGraph::new_frame`] and handed
/// back to [`PointsToGraph::restore_frame`].
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    roots: BTreeMap<Variable, BTreeSet<NodeId>>,
    depth: u32,
}

/// A may-points-to graph.
#[derive(Debug, Clone, Default)]
pub struct PointsToGraph {
    roots: BTreeMap<Variable, BTreeSet<NodeId>>,
    edges: BTreeMap<(NodeId, Name), BTreeSet<NodeId>>,
    depth: u32,
}

impl PointsToGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The nodes `var` may point to in the current frame.
    #[must_use]
    pub fn targets(&self, var: &Variable) -> BTreeSet<NodeId> {
        self.roots.get(var).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn has_root(&self, var: &Variable) -> bool {
        self.roots.contains_key(var)
    }

    /// Strong update of a variable's roots. Empty sets clear the entry so
    /// equality stays structural.
    pub fn assign(&mut self, var: Variable, targets: BTreeSet<NodeId>) {
        if targets.is_empty() {
            self.roots.remove(&var);
        } else {
            self.roots.insert(var, targets);
        }
    }

    /// Weak update of a variable's roots.
    pub fn assign_union(&mut self, var: Variable, targets: BTreeSet<NodeId>) {
        if targets.is_empty() {
            return;
        }
        self.roots.entry(var).or_default().extend(targets);
    }

    /// Frame depths beyond this collapse onto one key, so recursive call
    /// chains reuse the deepest frame's sites and the node universe stays
    /// finite.
    const MAX_FRAME_KEY: u32 = 8;

    /// The allocation-site node for `offset`/`ty` at the current frame
    /// depth. Idempotent: re-allocating the same site yields the same node.
    pub fn allocate(&mut self, nodes: &mut NodeTable, offset: u32, ty: TypeRef) -> NodeId {
        nodes.intern(NodeKind::AllocSite {
            offset,
            ty,
            frame: self.depth.min(Self::MAX_FRAME_KEY),
        })
    }

    #[must_use]
    pub fn field_targets(&self, node: NodeId, field: &Name) -> BTreeSet<NodeId> {
        self.edges
            .get(&(node, field.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Weak update of one field edge.
    pub fn add_field_edge(&mut self, node: NodeId, field: Name, targets: BTreeSet<NodeId>) {
        if targets.is_empty() {
            return;
        }
        self.edges.entry((node, field)).or_default().extend(targets);
    }

    /// `dst = obj.field`: the union of the field's targets over every node
    /// `obj` may point to.
    pub fn load_field(&mut self, dst: Variable, obj: &Variable, field: &Name) {
        let mut collected = BTreeSet::new();
        for node in self.targets(obj) {
            collected.extend(self.field_targets(node, field));
        }
        self.assign(dst, collected);
    }

    /// `obj.field = src`: weak update of the field on every target of `obj`.
    pub fn store_field(&mut self, obj: &Variable, field: &Name, src: &Variable) {
        let sources = self.targets(src);
        for node in self.targets(obj) {
            self.add_field_edge(node, field.clone(), sources.clone());
        }
    }

    /// `dst = Type::field` through the global cell for the static field.
    pub fn load_static(&mut self, nodes: &mut NodeTable, dst: Variable, field: &Name) {
        let cell = nodes.intern(NodeKind::Static {
            field: field.clone(),
        });
        let targets = self.field_targets(cell, field);
        self.assign(dst, targets);
    }

    /// `Type::field = src` through the global cell for the static field.
    pub fn store_static(&mut self, nodes: &mut NodeTable, field: &Name, src: &Variable) {
        let cell = nodes.intern(NodeKind::Static {
            field: field.clone(),
        });
        let sources = self.targets(src);
        self.add_field_edge(cell, field.clone(), sources);
    }

    /// Per-root and per-edge set union. Frame depth is untouched: joins
    /// always happen between graphs of the same frame.
    pub fn union(&mut self, other: &PointsToGraph) {
        for (var, targets) in &other.roots {
            self.roots
                .entry(var.clone())
                .or_default()
                .extend(targets.iter().copied());
        }
        for (key, targets) in &other.edges {
            self.edges
                .entry(key.clone())
                .or_default()
                .extend(targets.iter().copied());
        }
    }

    /// Structural equality of roots and field edges; the fixed-point
    /// criterion after a union.
    #[must_use]
    pub fn graph_equals(&self, other: &PointsToGraph) -> bool {
        self.roots == other.roots && self.edges == other.edges
    }

    /// Enter a callee frame: save the current roots, then seed the fresh
    /// frame with each callee parameter inheriting its caller argument's
    /// targets. Saved frames are never mutated.
    #[must_use]
    pub fn new_frame(&mut self, binding: &[(Variable, Variable)]) -> FrameSnapshot {
        let saved = std::mem::take(&mut self.roots);
        let mut fresh = BTreeMap::new();
        for (param, arg) in binding {
            let targets = saved.get(arg).cloned().unwrap_or_default();
            if !targets.is_empty() {
                fresh.insert(param.clone(), targets);
            }
        }
        let snapshot = FrameSnapshot {
            roots: saved,
            depth: self.depth,
        };
        self.roots = fresh;
        self.depth += 1;
        snapshot
    }

    /// Leave a callee frame: reinstall the caller's saved roots, then bind
    /// each callee result variable's targets onto the caller-side variable.
    pub fn restore_frame(&mut self, prev: FrameSnapshot, binding: &[(Variable, Variable)]) {
        let results: Vec<(Variable, BTreeSet<NodeId>)> = binding
            .iter()
            .map(|(callee_var, caller_var)| (caller_var.clone(), self.targets(callee_var)))
            .collect();
        self.roots = prev.roots;
        self.depth = prev.depth;
        for (caller_var, targets) in results {
            self.assign(caller_var, targets);
        }
    }

    #[must_use]
    pub fn frame_depth(&self) -> u32 {
        self.depth
    }

    /// All root entries, for rendering and tests.
    pub fn roots(&self) -> impl Iterator<Item = (&Variable, &BTreeSet<NodeId>)> {
        self.roots.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&(NodeId, Name), &BTreeSet<NodeId>)> {
        self.edges.iter()
    }
}

impl fmt::Display for PointsToGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (var, targets) in &self.roots {
            write!(f, "{var} -> {{")?;
            for (i, node) in targets.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "n{}", node.0)?;
            }
            writeln!(f, "}}")?;
        }
        for ((node, field), targets) in &self.edges {
            write!(f, "n{}.{field} -> {{", node.0)?;
            for (i, target) in targets.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "n{}", target.0)?;
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}
