use sable_ast::{BinOp, Builder, Program};
use sable_core::{Analysis, Analyzer, Environment};

fn analyze(program: &Program) -> (Environment, Analysis) {
    let mut env = Environment::new();
    let analysis = Analyzer::new(&mut env).analyze_program(program);
    (env, analysis)
}

#[test]
fn captured_primitives_are_boxed_once() {
    // var x = 1
    // var f = fun() { return x + x }
    // f()
    // x
    let mut b = Builder::new();
    let one = b.integer(1);
    let dx = b.var_decl("x", Some(one));

    let x1 = b.var("x");
    let x2 = b.var("x");
    let sum = b.binary(BinOp::Add, x1, x2);
    let ret = b.return_stmt(Some(sum));
    let body = b.block(vec![ret]);
    let f = b.function(&[], body);
    let fnode = f.id;
    let df = b.var_decl("f", Some(f));

    let callee = b.var("f");
    let call = b.call(callee, vec![]);
    let call = b.expr_stmt(call);
    let x3 = b.var("x");
    let xid = x3.id;
    let last = b.expr_stmt(x3);
    let p = b.program(vec![dx, df, call, last]);

    let (env, a) = analyze(&p);
    assert!(a.ok(), "unexpected errors: {:?}", a.errors);

    // Two uses of x inside f share one slot.
    let fid = a.functions.by_node[&fnode];
    assert_eq!(a.functions.fun(fid).captures.len(), 1);

    // The source is promoted to a boxed any.
    let source = a.functions.fun(fid).captures[0];
    assert!(a.graph.var(source).boxed);
    assert_eq!(a.main_node_type(xid), Some(env.any));
}

#[test]
fn nested_captures_chain_through_every_frame() {
    // var x = 1
    // var f = fun() {
    //     var g = fun() { return x }
    //     return g()
    // }
    // f()
    let mut b = Builder::new();
    let one = b.integer(1);
    let dx = b.var_decl("x", Some(one));

    let x = b.var("x");
    let ret_x = b.return_stmt(Some(x));
    let g_body = b.block(vec![ret_x]);
    let g = b.function(&[], g_body);
    let gnode = g.id;
    let dg = b.var_decl("g", Some(g));
    let g_callee = b.var("g");
    let g_call = b.call(g_callee, vec![]);
    let ret_g = b.return_stmt(Some(g_call));
    let f_body = b.block(vec![dg, ret_g]);
    let f = b.function(&[], f_body);
    let fnode = f.id;
    let df = b.var_decl("f", Some(f));

    let callee = b.var("f");
    let call = b.call(callee, vec![]);
    let call = b.expr_stmt(call);
    let p = b.program(vec![dx, df, call]);

    let (env, a) = analyze(&p);
    assert!(a.ok(), "unexpected errors: {:?}", a.errors);

    let f_id = a.functions.by_node[&fnode];
    let g_id = a.functions.by_node[&gnode];
    assert_eq!(a.functions.fun(f_id).captures.len(), 1);
    assert_eq!(a.functions.fun(g_id).captures.len(), 1);

    // g captures f's alias; its alias points back at slot 0 of f.
    let f_alias = a.functions.fun(g_id).captures[0];
    assert_eq!(a.graph.var(f_alias).capture_index, Some(0));
    assert!(a.graph.var(f_alias).boxed);

    let g_dv = a.functions.fun(g_id).default_version;
    let g_alias = a.functions.version(g_dv).captures_inside["x"];
    assert_eq!(a.graph.var(g_alias).parent_index, Some(0));
    assert_eq!(a.graph.var(g_alias).ty, env.any);
}

#[test]
fn closures_carry_a_function_object_type() {
    // var x = 1
    // var f = fun() { return x }
    let mut b = Builder::new();
    let one = b.integer(1);
    let dx = b.var_decl("x", Some(one));
    let x = b.var("x");
    let ret = b.return_stmt(Some(x));
    let body = b.block(vec![ret]);
    let f = b.function(&[], body);
    let fnode = f.id;
    let df = b.var_decl("f", Some(f));
    let p = b.program(vec![dx, df]);

    let (env, a) = analyze(&p);
    assert!(a.ok(), "unexpected errors: {:?}", a.errors);
    let fid = a.functions.by_node[&fnode];
    let dv = a.functions.fun(fid).default_version;
    let ty = a.functions.version(dv).ty;
    assert!(matches!(
        env.kind(ty),
        sable_core::TypeKind::FunctionObject { .. }
    ));
}

#[test]
fn sibling_closures_share_the_source_binding() {
    // var x = 1
    // var f = fun() { return x }
    // var g = fun() { return x }
    let mut b = Builder::new();
    let one = b.integer(1);
    let dx = b.var_decl("x", Some(one));

    let x = b.var("x");
    let ret = b.return_stmt(Some(x));
    let body = b.block(vec![ret]);
    let f = b.function(&[], body);
    let fnode = f.id;
    let df = b.var_decl("f", Some(f));

    let x = b.var("x");
    let ret = b.return_stmt(Some(x));
    let body = b.block(vec![ret]);
    let g = b.function(&[], body);
    let gnode = g.id;
    let dg = b.var_decl("g", Some(g));

    let p = b.program(vec![dx, df, dg]);
    let (_, a) = analyze(&p);
    assert!(a.ok(), "unexpected errors: {:?}", a.errors);

    let f_id = a.functions.by_node[&fnode];
    let g_id = a.functions.by_node[&gnode];
    let fs = a.functions.fun(f_id).captures[0];
    let gs = a.functions.fun(g_id).captures[0];
    assert_eq!(fs, gs);
}
