//! The reachable call graph.
//!
//! Nodes are method references, edges are labelled by the call site that
//! produced them. Both only ever grow across the interprocedural fixed
//! point.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use quasar_model::MethodRef;

#[derive(Debug, Default)]
pub struct CallGraph {
    methods: Vec<Arc<MethodRef>>,
    known: HashSet<Arc<MethodRef>>,
    /// (caller, call-site offset) -> possible callees.
    edges: HashMap<(Arc<MethodRef>, u32), HashSet<Arc<MethodRef>>>,
}

impl CallGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_method(&mut self, method: Arc<MethodRef>) {
        if self.known.insert(method.clone()) {
            self.methods.push(method);
        }
    }

    pub fn add_edge(&mut self, caller: Arc<MethodRef>, site: u32, callee: Arc<MethodRef>) {
        self.add_method(caller.clone());
        self.add_method(callee.clone());
        self.edges.entry((caller, site)).or_default().insert(callee);
    }

    #[must_use]
    pub fn contains_method(&self, method: &MethodRef) -> bool {
        self.known.contains(method)
    }

    /// Methods in the order they became reachable.
    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodRef>> {
        self.methods.iter()
    }

    #[must_use]
    pub fn callees_at(&self, caller: &Arc<MethodRef>, site: u32) -> Option<&HashSet<Arc<MethodRef>>> {
        self.edges.get(&(caller.clone(), site))
    }

    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }
}

impl fmt::Display for CallGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ((caller, site), callees) in &self.edges {
            for callee in callees {
                writeln!(f, "{caller} @{site:#06x} -> {callee}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quasar_model::{Name, TypeRef};

    fn m(name: &str) -> Arc<MethodRef> {
        Arc::new(MethodRef {
            containing_type: TypeRef::named("T"),
            name: Name::new(name),
            parameters: Vec::new(),
            extra_parameters: Vec::new(),
            return_type: TypeRef::Void,
            is_static: true,
            is_virtual: false,
        })
    }

    #[test]
    fn edges_accumulate_per_call_site() {
        let mut cg = CallGraph::new();
        let (a, b, c) = (m("a"), m("b"), m("c"));
        cg.add_edge(a.clone(), 4, b.clone());
        cg.add_edge(a.clone(), 4, c.clone());
        cg.add_edge(a.clone(), 4, b.clone());

        assert_eq!(cg.method_count(), 3);
        assert_eq!(cg.edge_count(), 2);
        assert_eq!(cg.callees_at(&a, 4).unwrap().len(), 2);
        assert!(cg.callees_at(&b, 0).is_none());
    }
}
