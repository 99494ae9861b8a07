//! End-to-end engine tests over an in-memory program host.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use quasar_model::{
    BodyKind, MethodDef, MethodRef, Name, OpKind, OpValue, ParamDef, ProgramHost, RawBody, RawOp,
    TypeRef,
};
use quasar_pta::{
    DefaultHooks, EngineHooks, InterproceduralPointsTo, NodeKind, PointsToAnalysis,
};
use quasar_tac::Variable;

// === Fixture host ===

#[derive(Default)]
struct TestHost {
    defs: HashMap<Arc<MethodRef>, Arc<MethodDef>>,
    /// (receiver type, method name) -> implementation.
    impls: HashMap<(TypeRef, Name), Arc<MethodRef>>,
    lookups: RefCell<usize>,
}

impl TestHost {
    fn define(&mut self, def: MethodDef) {
        self.defs.insert(def.reference.clone(), Arc::new(def));
    }

    fn implement(&mut self, receiver: TypeRef, method: &Arc<MethodRef>, with: Arc<MethodRef>) {
        self.impls.insert((receiver, method.name.clone()), with);
    }
}

impl ProgramHost for TestHost {
    fn method_def(&self, method: &MethodRef) -> Option<Arc<MethodDef>> {
        *self.lookups.borrow_mut() += 1;
        self.defs.get(method).cloned()
    }

    fn find_method_implementation(
        &self,
        receiver_type: &TypeRef,
        callee: &MethodRef,
    ) -> Option<Arc<MethodRef>> {
        self.impls
            .get(&(receiver_type.clone(), callee.name.clone()))
            .cloned()
    }
}

// === Builders ===

fn obj(name: &str) -> TypeRef {
    TypeRef::named(name)
}

fn static_method(name: &str, parameters: Vec<TypeRef>, return_type: TypeRef) -> Arc<MethodRef> {
    Arc::new(MethodRef {
        containing_type: obj("Program"),
        name: Name::new(name),
        parameters,
        extra_parameters: Vec::new(),
        return_type,
        is_static: true,
        is_virtual: false,
    })
}

fn virtual_method(ty: &str, name: &str) -> Arc<MethodRef> {
    Arc::new(MethodRef {
        containing_type: obj(ty),
        name: Name::new(name),
        parameters: Vec::new(),
        extra_parameters: Vec::new(),
        return_type: TypeRef::Void,
        is_static: false,
        is_virtual: true,
    })
}

fn ctor_of(ty: &str) -> Arc<MethodRef> {
    Arc::new(MethodRef {
        containing_type: obj(ty),
        name: Name::new(".ctor"),
        parameters: Vec::new(),
        extra_parameters: Vec::new(),
        return_type: TypeRef::Void,
        is_static: false,
        is_virtual: false,
    })
}

fn def(reference: &Arc<MethodRef>, max_stack: u16, operations: Vec<RawOp>) -> MethodDef {
    let parameters = reference
        .parameters
        .iter()
        .enumerate()
        .map(|(index, ty)| ParamDef {
            index: index as u16,
            name: Name::new(format!("arg{index}")),
            ty: ty.clone(),
        })
        .collect();
    MethodDef {
        reference: reference.clone(),
        parameters,
        body: Some(RawBody {
            max_stack,
            size: operations.last().map(|op| op.offset + 1).unwrap_or(0),
            operations,
            local_variables: Vec::new(),
            exception_handlers: Vec::new(),
            kind: BodyKind::Bytecode,
        }),
    }
}

fn call(offset: u32, callee: &Arc<MethodRef>) -> RawOp {
    RawOp::with_operand(offset, OpKind::Call, OpValue::Method(callee.clone()))
}

fn callvirt(offset: u32, callee: &Arc<MethodRef>) -> RawOp {
    RawOp::with_operand(offset, OpKind::CallVirtual, OpValue::Method(callee.clone()))
}

fn newobj(offset: u32, ctor: &Arc<MethodRef>) -> RawOp {
    RawOp::with_operand(offset, OpKind::NewObject, OpValue::Method(ctor.clone()))
}

fn ret(offset: u32) -> RawOp {
    RawOp::new(offset, OpKind::Return)
}

// === Scenarios ===

#[test]
fn virtual_call_devirtualizes_against_receiver_targets() {
    // main: v = new B(); v.foo()  where foo is declared on A, overridden by B
    let a_foo = virtual_method("A", "foo");
    let b_foo = virtual_method("B", "foo");
    let main = static_method("main", vec![], TypeRef::Void);

    let mut host = TestHost::default();
    host.define(def(
        &main,
        1,
        vec![newobj(0, &ctor_of("B")), callvirt(1, &a_foo), ret(2)],
    ));
    host.define(def(&b_foo, 1, vec![ret(0)]));
    host.implement(obj("B"), &a_foo, b_foo.clone());

    let mut engine = InterproceduralPointsTo::new(&host, DefaultHooks);
    engine.analyze(main.clone()).unwrap();

    let callees = engine.call_graph().callees_at(&main, 1).unwrap();
    assert_eq!(callees.len(), 2, "static edge plus devirtualized edge");
    assert!(callees.contains(&a_foo));
    assert!(callees.contains(&b_foo));

    // Only the devirtualized target was actually analyzed.
    let record = engine.record(&b_foo).unwrap();
    let input = record.input_ptg.as_ref().unwrap();
    assert!(!input.targets(&Variable::This).is_empty());
    assert!(record.output_ptg.is_some());
    assert!(engine.record(&a_foo).is_none());
}

#[test]
fn mutually_recursive_returns_reach_a_fixed_point() {
    // A: return cond ? new OA() : B();   B: return cond ? new OB() : A();
    let result_ty = obj("Obj");
    let a = static_method("a", vec![], result_ty.clone());
    let b = static_method("b", vec![], result_ty.clone());

    let body = |other: &Arc<MethodRef>, own_ctor: &Arc<MethodRef>| {
        vec![
            RawOp::with_operand(0, OpKind::LoadConst, OpValue::I32(1)),
            RawOp::with_operand(1, OpKind::BranchTrue, OpValue::Target(5)),
            call(2, other),
            ret(3),
            newobj(5, own_ctor),
            ret(6),
        ]
    };

    let mut host = TestHost::default();
    host.define(def(&a, 1, body(&b, &ctor_of("OA"))));
    host.define(def(&b, 1, body(&a, &ctor_of("OB"))));

    let mut engine = InterproceduralPointsTo::new(&host, DefaultHooks);
    engine.analyze(a.clone()).unwrap();

    let output = engine
        .record(&a)
        .and_then(|r| r.output_ptg.as_ref())
        .unwrap();
    let result_targets = output.targets(&PointsToAnalysis::result_variable());
    assert!(!result_targets.is_empty());

    // The result may be any allocation reachable through the recursion:
    // sites of both OA and OB.
    let mut seen_types: Vec<String> = result_targets
        .iter()
        .filter_map(|&node| match engine.node_table().kind(node) {
            NodeKind::AllocSite { ty, .. } => Some(ty.to_string()),
            _ => None,
        })
        .collect();
    seen_types.sort();
    seen_types.dedup();
    assert_eq!(seen_types, vec!["OA".to_string(), "OB".to_string()]);

    // Both methods are in the call graph, with edges in both directions.
    assert!(engine.call_graph().contains_method(&a));
    assert!(engine.call_graph().contains_method(&b));
    assert!(engine.call_graph().callees_at(&a, 2).unwrap().contains(&b));
    assert!(engine.call_graph().callees_at(&b, 2).unwrap().contains(&a));
}

#[test]
fn skipped_unknown_callee_leaves_the_graph_unchanged() {
    let ext = virtual_method("E", "ext");
    let main = static_method("main", vec![], TypeRef::Void);

    let mut host = TestHost::default();
    host.define(def(
        &main,
        1,
        vec![newobj(0, &ctor_of("E")), call(1, &ext), ret(2)],
    ));
    // `ext` has no definition and default hooks decline to model it.

    let mut engine = InterproceduralPointsTo::new(&host, DefaultHooks);
    engine.analyze(main.clone()).unwrap();

    // The static edge is still recorded, but no callee state was written.
    assert!(engine.call_graph().callees_at(&main, 1).unwrap().contains(&ext));
    assert!(engine.record(&ext).is_none());

    // The caller's own state is unaffected by the skipped call.
    let output = engine
        .record(&main)
        .and_then(|r| r.output_ptg.as_ref())
        .unwrap();
    assert_eq!(output.targets(&Variable::Temp(0)).len(), 1);
}

struct ModelUnknown;

impl EngineHooks for ModelUnknown {
    fn on_unknown_method_found(&mut self, _callee: &MethodRef) -> bool {
        true
    }
}

#[test]
fn modelled_unknown_callee_gets_synthesized_parameters() {
    let ext = virtual_method("E", "ext");
    let main = static_method("main", vec![], TypeRef::Void);

    let mut host = TestHost::default();
    host.define(def(
        &main,
        1,
        vec![newobj(0, &ctor_of("E")), call(1, &ext), ret(2)],
    ));

    let mut engine = InterproceduralPointsTo::new(&host, ModelUnknown);
    engine.analyze(main.clone()).unwrap();

    // The unknown callee's input graph binds the receiver through the
    // synthesized `$this` local.
    let record = engine.record(&ext).unwrap();
    let input = record.input_ptg.as_ref().unwrap();
    assert_eq!(
        input
            .targets(&Variable::Local(Name::new("$this")))
            .len(),
        1
    );
    assert!(record.output_ptg.is_some());
}

#[test]
fn lifting_is_memoized_per_method() {
    let main = static_method("main", vec![], TypeRef::Void);
    let mut host = TestHost::default();
    host.define(def(&main, 1, vec![ret(0)]));

    let mut engine = InterproceduralPointsTo::new(&host, DefaultHooks);
    engine.analyze(main.clone()).unwrap();
    engine.analyze(main.clone()).unwrap();

    // The second run hits the cached CFG and never re-consults the host.
    assert_eq!(*host.lookups.borrow(), 1);
}

#[test]
fn argument_shape_disagreement_is_fatal() {
    // The call site claims one declared parameter; the definition declares
    // none, so the lifted body has no variable to bind the argument to.
    let callee_site = Arc::new(MethodRef {
        containing_type: obj("Program"),
        name: Name::new("helper"),
        parameters: vec![obj("E")],
        extra_parameters: Vec::new(),
        return_type: TypeRef::Void,
        is_static: true,
        is_virtual: false,
    });
    let mut callee_def = def(&callee_site, 1, vec![ret(0)]);
    callee_def.parameters.clear();

    let main = static_method("main", vec![], TypeRef::Void);
    let mut host = TestHost::default();
    host.define(def(
        &main,
        1,
        vec![newobj(0, &ctor_of("E")), call(1, &callee_site), ret(2)],
    ));
    host.define(callee_def);

    let mut engine = InterproceduralPointsTo::new(&host, DefaultHooks);
    let err = engine.analyze(main.clone()).unwrap_err();
    assert!(matches!(
        err,
        quasar_pta::AnalysisError::ArgumentCountMismatch { found: 1, expected: 0, .. }
    ));
}
