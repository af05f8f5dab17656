use sable_ast::{Builder, Program};
use sable_core::{Analysis, Analyzer, Environment, ErrorKind};

fn analyze(program: &Program) -> (Environment, Analysis) {
    let mut env = Environment::new();
    let analysis = Analyzer::new(&mut env).analyze_program(program);
    (env, analysis)
}

#[test]
fn unknown_attributes_name_the_class() {
    // "abc".foo
    let mut b = Builder::new();
    let s = b.string("abc");
    let m = b.member(s, "foo");
    let m = b.expr_stmt(m);
    let p = b.program(vec![m]);

    let (_, a) = analyze(&p);
    assert!(a.errors.iter().any(|e| matches!(
        e.kind,
        ErrorKind::NoSuchAttribute { ref class, ref attribute }
            if class == "String" && attribute == "foo"
    )));
}

#[test]
fn known_attributes_resolve_through_the_class_chain() {
    // "abc".size() falls on String; "abc".clone() falls back on Value.
    let mut b = Builder::new();
    let s = b.string("abc");
    let m = b.member(s, "size");
    let c1 = b.call(m, vec![]);
    let c1id = c1.id;
    let c1 = b.expr_stmt(c1);

    let s = b.string("abc");
    let m = b.member(s, "clone");
    let c2 = b.call(m, vec![]);
    let c2 = b.expr_stmt(c2);
    let p = b.program(vec![c1, c2]);

    let (env, a) = analyze(&p);
    assert!(a.ok(), "unexpected errors: {:?}", a.errors);
    assert_eq!(a.main_node_type(c1id), Some(env.integer));
}

#[test]
fn iterating_a_non_container_errors() {
    // for v in 1 { }
    let mut b = Builder::new();
    let body = b.block(vec![]);
    let one = b.integer(1);
    let each = b.foreach(None, "v", one, body);
    let p = b.program(vec![each]);

    let (_, a) = analyze(&p);
    assert!(a
        .errors
        .iter()
        .any(|e| matches!(e.kind, ErrorKind::ValueNotIterable { .. })));
}

#[test]
fn calling_a_non_function_errors() {
    // var x = 1
    // x()
    let mut b = Builder::new();
    let one = b.integer(1);
    let decl = b.var_decl("x", Some(one));
    let callee = b.var("x");
    let call = b.call(callee, vec![]);
    let call = b.expr_stmt(call);
    let p = b.program(vec![decl, call]);

    let (_, a) = analyze(&p);
    assert!(a
        .errors
        .iter()
        .any(|e| matches!(e.kind, ErrorKind::ValueNotCallable { .. })));
}

#[test]
fn method_arity_mismatch_reports_the_candidates() {
    // "abc".sub(1) — sub wants start and end.
    let mut b = Builder::new();
    let s = b.string("abc");
    let m = b.member(s, "sub");
    let one = b.integer(1);
    let call = b.call(m, vec![one]);
    let call = b.expr_stmt(call);
    let p = b.program(vec![call]);

    let (_, a) = analyze(&p);
    let err = a
        .errors
        .iter()
        .find(|e| matches!(e.kind, ErrorKind::NoMatchingOverload { .. }))
        .expect("expected an overload error");
    assert!(err.message.contains("String.sub"), "got: {}", err.message);
}

#[test]
fn loop_rewalks_do_not_duplicate_diagnostics() {
    // var x = 1
    // while c { x = y }   -- y undefined, body walked twice
    let mut b = Builder::new();
    let one = b.integer(1);
    let decl = b.var_decl("x", Some(one));
    let y = b.var("y");
    let x = b.var("x");
    let assign = b.assign(x, y);
    let assign = b.expr_stmt(assign);
    let body = b.block(vec![assign]);
    let cond = b.boolean(true);
    let w = b.while_stmt(cond, body);
    let p = b.program(vec![decl, w]);

    let (_, a) = analyze(&p);
    let count = a
        .errors
        .iter()
        .filter(|e| matches!(e.kind, ErrorKind::UndefinedVariable { ref name } if name == "y"))
        .count();
    assert_eq!(count, 1, "errors: {:?}", a.errors);
}

#[test]
fn undefined_names_recover_and_analysis_continues() {
    // y
    // var x = 1
    // x   -- still typed despite the earlier error
    let mut b = Builder::new();
    let y = b.var("y");
    let y = b.expr_stmt(y);
    let one = b.integer(1);
    let decl = b.var_decl("x", Some(one));
    let x = b.var("x");
    let xid = x.id;
    let last = b.expr_stmt(x);
    let p = b.program(vec![y, decl, last]);

    let (env, a) = analyze(&p);
    assert_eq!(a.errors.len(), 1);
    assert_eq!(a.main_node_type(xid), Some(env.integer));
}
