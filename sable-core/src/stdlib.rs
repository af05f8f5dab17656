//! Built-in classes and operators.
//!
//! Versions are declared cheapest-first within each operator so that ties
//! resolve to the narrowest signature. Every operator ends with a dynamic
//! `(any, any)` version; a call where either operand is `any` lands there.

use crate::environment::{Class, Environment};
use crate::overload::{Callable, CallableVersionTemplate, TypeMutator};

pub fn register(env: &mut Environment) {
    register_operators(env);
    register_classes(env);
}

fn binary(env: &mut Environment, name: &str, sigs: &[(crate::types::TypeId, crate::types::TypeId, crate::types::TypeId)]) -> Callable {
    let mut c = Callable::new(name);
    for (l, r, ret) in sigs {
        let ty = env.function(vec![*l, *r], *ret);
        c.add_version(CallableVersionTemplate::new(name, ty));
    }
    c
}

fn register_operators(env: &mut Environment) {
    let (int, long, real, big, str_, bool_, any) = (
        env.integer,
        env.long,
        env.real,
        env.bigint,
        env.string,
        env.boolean,
        env.any,
    );

    let mut add = binary(
        env,
        "+",
        &[
            (int, int, int),
            (long, long, long),
            (real, real, real),
            (big, big, big),
            (str_, str_, str_),
        ],
    );
    // array + array concatenates and unions the element types.
    let t1 = env.template("T1");
    let t2 = env.template("T2");
    let a1 = env.array(t1);
    let a2 = env.array(t2);
    let sum = env.meta_add(t1, t2);
    let ret = env.tmp_array(sum);
    let concat_ty = env.function(vec![a1, a2], ret);
    add.add_version(CallableVersionTemplate::new("+", concat_ty).with_templates(vec![t1, t2]));
    let dyn_ty = env.function(vec![any, any], any);
    add.add_version(CallableVersionTemplate::new("+", dyn_ty));
    env.operators.insert("+", add);

    for name in ["-", "*", "%"] {
        let mut c = binary(
            env,
            name,
            &[
                (int, int, int),
                (long, long, long),
                (real, real, real),
                (big, big, big),
            ],
        );
        c.add_version(CallableVersionTemplate::new(name, dyn_ty));
        env.operators.insert(name, c);
    }

    // Division always widens to real, even on integers.
    let mut div = binary(env, "/", &[(int, int, real), (long, long, real), (real, real, real)]);
    div.add_version(CallableVersionTemplate::new("/", dyn_ty));
    env.operators.insert("/", div);

    let mut pow = binary(env, "**", &[(int, int, int), (real, real, real)]);
    pow.add_version(CallableVersionTemplate::new("**", dyn_ty));
    env.operators.insert("**", pow);

    for name in ["==", "!=", "<", "<=", ">", ">="] {
        let mut c = binary(
            env,
            name,
            &[
                (int, int, bool_),
                (real, real, bool_),
                (str_, str_, bool_),
            ],
        );
        let ty = env.function(vec![any, any], bool_);
        c.add_version(CallableVersionTemplate::new(name, ty));
        env.operators.insert(name, c);
    }

    for name in ["&&", "||"] {
        let mut c = Callable::new(name);
        let ty = env.function(vec![any, any], bool_);
        c.add_version(CallableVersionTemplate::new(name, ty));
        env.operators.insert(name, c);
    }

    // Unary operators.
    let mut neg = Callable::new("-");
    for (arg, ret) in [(int, int), (long, long), (real, real), (big, big), (any, any)] {
        let ty = env.function(vec![arg], ret);
        neg.add_version(CallableVersionTemplate::new("-", ty));
    }
    env.unary_operators.insert("-", neg);

    let mut not = Callable::new("!");
    let ty = env.function(vec![any], bool_);
    not.add_version(CallableVersionTemplate::new("!", ty));
    env.unary_operators.insert("!", not);

    let mut bitnot = Callable::new("~");
    for (arg, ret) in [(int, int), (long, long), (any, any)] {
        let ty = env.function(vec![arg], ret);
        bitnot.add_version(CallableVersionTemplate::new("~", ty));
    }
    env.unary_operators.insert("~", bitnot);
}

fn method(env: &mut Environment, cls: &mut Class, name: &str, args: Vec<crate::types::TypeId>, ret: crate::types::TypeId) {
    let full = format!("{}.{}", cls.name, name);
    let ty = env.function(args, ret);
    cls.methods
        .entry(name.to_string())
        .or_insert_with(|| Callable::new(&full))
        .add_version(CallableVersionTemplate::new(&full, ty));
}

fn register_classes(env: &mut Environment) {
    let (int, real, str_, bool_, num, any) = (
        env.integer,
        env.real,
        env.string,
        env.boolean,
        env.number,
        env.any,
    );

    // Value: root of the lookup chain; every instance falls back to it.
    let mut value = Class::new("Value");
    let class_ty = env.class("Class");
    value.fields.insert("class".to_string(), class_ty);
    method(env, &mut value, "string", vec![any], str_);
    method(env, &mut value, "clone", vec![any], any);
    env.classes.insert("Value".to_string(), value);

    let mut number = Class::new("Number");
    // abs keeps the argument type when it is already numeric, and falls
    // back on the representation dictated by the distance to `number`.
    let t = env.template("T");
    let base = env.meta_base_of(t, num);
    let abs_ty = env.function(vec![t], base);
    number
        .methods
        .entry("abs".to_string())
        .or_insert_with(|| Callable::new("Number.abs"))
        .add_version(CallableVersionTemplate::new("Number.abs", abs_ty).with_templates(vec![t]));
    method(env, &mut number, "max", vec![int, int], int);
    method(env, &mut number, "max", vec![real, real], real);
    method(env, &mut number, "max", vec![any, any], any);
    method(env, &mut number, "floor", vec![real], int);
    method(env, &mut number, "floor", vec![any], int);
    method(env, &mut number, "sqrt", vec![real], real);
    method(env, &mut number, "sqrt", vec![any], real);
    env.classes.insert("Number".to_string(), number);

    let mut string = Class::new("String");
    method(env, &mut string, "size", vec![str_], int);
    method(env, &mut string, "sub", vec![str_, int, int], str_);
    method(env, &mut string, "startsWith", vec![str_, str_], bool_);
    env.classes.insert("String".to_string(), string);

    let mut array = Class::new("Array");
    let t = env.template("T");
    let arr_t = env.array(t);
    let any_arr = env.array(any);
    let size_ty = env.function(vec![any_arr], int);
    array
        .methods
        .entry("size".to_string())
        .or_insert_with(|| Callable::new("Array.size"))
        .add_version(CallableVersionTemplate::new("Array.size", size_ty));
    // push stores the element; an element narrower than the array's own
    // type gets boxed on the way in.
    let push_ty = env.function(vec![arr_t, t], arr_t);
    let mut push = CallableVersionTemplate::new("Array.push", push_ty).with_templates(vec![t]);
    push.mutators.push(TypeMutator::ConvertArgToAny(1));
    array
        .methods
        .entry("push".to_string())
        .or_insert_with(|| Callable::new("Array.push"))
        .add_version(push);
    env.classes.insert("Array".to_string(), array);

    let mut map = Class::new("Map");
    let k = env.template("K");
    let v = env.template("V");
    let map_kv = env.map(k, v);
    let size_ty = env.function(vec![map_kv], int);
    map.methods
        .entry("size".to_string())
        .or_insert_with(|| Callable::new("Map.size"))
        .add_version(
            CallableVersionTemplate::new("Map.size", size_ty).with_templates(vec![k, v]),
        );
    env.classes.insert("Map".to_string(), map);

    env.classes.insert("Boolean".to_string(), Class::new("Boolean"));
    env.classes.insert("Null".to_string(), Class::new("Null"));
    env.classes.insert("Object".to_string(), Class::new("Object"));
    env.classes.insert("Class".to_string(), Class::new("Class"));
    env.classes
        .insert("Interval".to_string(), Class::new("Interval"));
    env.classes.insert("Set".to_string(), Class::new("Set"));
    env.classes
        .insert("Function".to_string(), Class::new("Function"));
}
