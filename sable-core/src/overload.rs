//! Overload resolution.
//!
//! A [`Callable`] is a named bag of [`CallableVersionTemplate`]s. Resolution
//! scores every version against the supplied argument types and keeps the
//! strictly cheapest one, so the first version in declaration order wins
//! ties. Template versions are unified structurally against the arguments
//! and substituted into a concrete signature before scoring; the binding map
//! is local to one scoring pass and never leaks between versions or calls.

use std::collections::HashMap;

use crate::environment::Environment;
use crate::function::FunctionId;
use crate::types::{TypeId, TypeKind};

/// Side effect a version applies to its arguments when selected, e.g.
/// boxing an argument that the implementation stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeMutator {
    ConvertArgToAny(usize),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VersionFlags {
    pub throws: bool,
    /// Superseded implementation kept for the generator; skipped during
    /// scoring.
    pub legacy: bool,
    /// Not visible to user code; carried through for tooling.
    pub private: bool,
    /// Matches any argument tuple at cost zero; used for calls through
    /// values the analyzer knows nothing about.
    pub unknown: bool,
}

/// One declared signature of a callable, possibly containing template
/// and meta type shapes.
#[derive(Clone, Debug)]
pub struct CallableVersionTemplate {
    pub name: String,
    /// A `Function` type; may mention templates and meta shapes.
    pub ty: TypeId,
    pub templates: Vec<TypeId>,
    /// Per-parameter type of the default value, where one exists.
    pub default_args: Vec<Option<TypeId>>,
    pub mutators: Vec<TypeMutator>,
    pub flags: VersionFlags,
    /// Backing user function, for versions created from function values.
    pub user_fun: Option<FunctionId>,
}

impl CallableVersionTemplate {
    pub fn new(name: &str, ty: TypeId) -> Self {
        Self {
            name: name.to_string(),
            ty,
            templates: Vec::new(),
            default_args: Vec::new(),
            mutators: Vec::new(),
            flags: VersionFlags::default(),
            user_fun: None,
        }
    }

    pub fn with_templates(mut self, templates: Vec<TypeId>) -> Self {
        self.templates = templates;
        self
    }

    pub fn describe(&self, env: &Environment) -> String {
        format!("{}: {}", self.name, env.display(self.ty))
    }

    /// Scores this version against `args`. Returns the total conversion
    /// cost and the concrete (template-free) version, or `None` when any
    /// argument is inconvertible or a non-defaulted parameter is missing.
    pub fn score(&self, env: &mut Environment, args: &[TypeId]) -> Option<(u32, CallableVersion)> {
        let mut signature = self.ty;
        if !self.templates.is_empty() {
            let mut bindings: HashMap<TypeId, TypeId> = HashMap::new();
            let declared = env.arguments(self.ty);
            // Direct template parameters bind first so that structured
            // parameters unify against already-constrained variables.
            for (decl, supplied) in declared.iter().zip(args) {
                if matches!(env.kind(*decl), TypeKind::Template { .. }) {
                    solve(env, *decl, *supplied, &mut bindings);
                }
            }
            for (decl, supplied) in declared.iter().zip(args) {
                if !matches!(env.kind(*decl), TypeKind::Template { .. }) {
                    solve(env, *decl, *supplied, &mut bindings);
                }
            }
            signature = build(env, self.ty, &bindings);
        }
        let version = CallableVersion {
            name: self.name.clone(),
            ty: signature,
            mutators: self.mutators.clone(),
            flags: self.flags,
            user_fun: self.user_fun,
        };
        if self.flags.unknown {
            return Some((0, version));
        }
        let params = env.arguments(signature);
        if args.len() > params.len() {
            return None;
        }
        let mut cost = 0u32;
        for (i, param) in params.iter().enumerate() {
            let supplied = if i < args.len() {
                args[i]
            } else {
                self.default_args.get(i).copied().flatten()?
            };
            cost += env.distance(supplied, *param)?;
        }
        Some((cost, version))
    }
}

/// A resolved, concrete version: what the call site compiles against.
#[derive(Clone, Debug)]
pub struct CallableVersion {
    pub name: String,
    pub ty: TypeId,
    pub mutators: Vec<TypeMutator>,
    pub flags: VersionFlags,
    pub user_fun: Option<FunctionId>,
}

#[derive(Clone, Debug, Default)]
pub struct Callable {
    pub name: String,
    pub versions: Vec<CallableVersionTemplate>,
}

impl Callable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            versions: Vec::new(),
        }
    }

    pub fn add_version(&mut self, version: CallableVersionTemplate) {
        self.versions.push(version);
    }

    /// Picks the cheapest applicable version. Deterministic: only a
    /// strictly smaller cost displaces the incumbent.
    pub fn resolve(&self, env: &mut Environment, args: &[TypeId]) -> Option<CallableVersion> {
        let mut best: Option<(u32, CallableVersion)> = None;
        for template in &self.versions {
            if template.flags.legacy {
                continue;
            }
            if let Some((cost, version)) = template.score(env, args) {
                match &best {
                    Some((best_cost, _)) if cost >= *best_cost => {}
                    _ => best = Some((cost, version)),
                }
            }
        }
        best.map(|(_, v)| v)
    }

    pub fn describe_versions(&self, env: &Environment) -> Vec<String> {
        self.versions.iter().map(|v| v.describe(env)).collect()
    }
}

/// Structural unification of a declared parameter against a supplied
/// argument type. Binds at template leaves, recurses through containers
/// and function shapes, and looks through the meta wrappers.
pub fn solve(
    env: &Environment,
    declared: TypeId,
    supplied: TypeId,
    bindings: &mut HashMap<TypeId, TypeId>,
) {
    use TypeKind::*;
    let dk = env.kind(declared).clone();
    match dk {
        Template { .. } => {
            bindings.insert(declared, supplied);
        }
        MetaBaseOf { ty, .. } | MetaNotTemporary(ty) | MetaNotVoid(ty) => {
            solve(env, ty, supplied, bindings);
        }
        Array(d) => {
            if let Array(s) = env.kind(env.fold(supplied)).clone() {
                solve(env, d, s, bindings);
            }
        }
        Set(d) => {
            if let Set(s) = env.kind(env.fold(supplied)).clone() {
                solve(env, d, s, bindings);
            }
        }
        Map(dk_, dv) => {
            if let Map(sk, sv) = env.kind(env.fold(supplied)).clone() {
                solve(env, dk_, sk, bindings);
                solve(env, dv, sv, bindings);
            }
        }
        Function { args: da, ret: dr } | FunctionObject { args: da, ret: dr, .. } => {
            let sf = env.fold(supplied);
            match env.kind(sf).clone() {
                Function { args: sa, ret: sr } | FunctionObject { args: sa, ret: sr, .. } => {
                    for (d, s) in da.iter().zip(&sa) {
                        solve(env, *d, *s, bindings);
                    }
                    solve(env, dr, sr, bindings);
                }
                _ => {}
            }
        }
        Pointer(d) => {
            if let Pointer(s) = env.kind(env.fold(supplied)).clone() {
                solve(env, d, s, bindings);
            } else {
                solve(env, d, supplied, bindings);
            }
        }
        _ => {}
    }
}

/// Substitutes bindings into a declared type, eliminating templates and
/// meta shapes. An unbound template substitutes to `void`, which no
/// argument converts to, so the version scores out.
pub fn build(env: &mut Environment, ty: TypeId, bindings: &HashMap<TypeId, TypeId>) -> TypeId {
    use TypeKind::*;
    let kind = env.kind(ty).clone();
    match kind {
        Template { .. } => bindings.get(&ty).copied().unwrap_or(env.void),
        Array(e) => {
            let e = build(env, e, bindings);
            if env.data(ty).temporary {
                env.tmp_array(e)
            } else {
                env.array(e)
            }
        }
        Set(e) => {
            let e = build(env, e, bindings);
            if env.data(ty).temporary {
                env.tmp_set(e)
            } else {
                env.set(e)
            }
        }
        Map(k, v) => {
            let k = build(env, k, bindings);
            let v = build(env, v, bindings);
            if env.data(ty).temporary {
                env.tmp_map(k, v)
            } else {
                env.map(k, v)
            }
        }
        Function { args, ret } => {
            let args = args.iter().map(|a| build(env, *a, bindings)).collect();
            let ret = build(env, ret, bindings);
            env.function(args, ret)
        }
        FunctionObject { args, ret, closure } => {
            let args = args.iter().map(|a| build(env, *a, bindings)).collect();
            let ret = build(env, ret, bindings);
            env.function_object(args, ret, closure)
        }
        Pointer(p) => {
            let p = build(env, p, bindings);
            env.pointer(p)
        }
        MetaAdd(a, b) => {
            let a = build(env, a, bindings);
            let b = build(env, b, bindings);
            env.union(a, b)
        }
        MetaMul(a, b) => {
            let a = build(env, a, bindings);
            let b = build(env, b, bindings);
            env.meet(a, b)
        }
        MetaBaseOf { ty: inner, base } => {
            let built = build(env, inner, bindings);
            let base = build(env, base, bindings);
            match env.distance(built, base) {
                None => base,
                Some(d) if d < 100 => built,
                Some(_) => {
                    if matches!(env.kind(env.fold(built)), Boolean) {
                        env.integer
                    } else {
                        env.real
                    }
                }
            }
        }
        MetaNotTemporary(inner) => {
            let built = build(env, inner, bindings);
            env.not_temporary(built)
        }
        MetaNotVoid(inner) => {
            let built = build(env, inner, bindings);
            if env.is_void(built) { env.null } else { built }
        }
        _ => ty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callable_with(env: &mut Environment, sigs: &[(Vec<TypeId>, TypeId)]) -> Callable {
        let mut c = Callable::new("f");
        for (args, ret) in sigs {
            let ty = env.function(args.clone(), *ret);
            c.add_version(CallableVersionTemplate::new("f", ty));
        }
        c
    }

    #[test]
    fn cheapest_version_wins() {
        let mut env = Environment::new();
        let (integer, real) = (env.integer, env.real);
        let c = callable_with(
            &mut env,
            &[(vec![real], real), (vec![integer], integer)],
        );
        let v = c.resolve(&mut env, &[integer]).unwrap();
        assert_eq!(env.return_type(v.ty), env.integer);
        let v = c.resolve(&mut env, &[real]).unwrap();
        assert_eq!(env.return_type(v.ty), env.real);
    }

    #[test]
    fn ties_keep_declaration_order() {
        let mut env = Environment::new();
        let (string, integer, null, real, any) =
            (env.string, env.integer, env.null, env.real, env.any);
        // Both versions cost the same for an `any` argument; the first
        // declared must win, and repeatedly.
        let c = callable_with(
            &mut env,
            &[(vec![string], integer), (vec![null], real)],
        );
        for _ in 0..3 {
            let v = c.resolve(&mut env, &[any]).unwrap();
            assert_eq!(env.return_type(v.ty), env.integer);
        }
    }

    #[test]
    fn inconvertible_arguments_reject_the_version() {
        let mut env = Environment::new();
        let (string, integer) = (env.string, env.integer);
        let c = callable_with(&mut env, &[(vec![string], string)]);
        assert!(c.resolve(&mut env, &[integer]).is_none());
    }

    #[test]
    fn extra_arguments_reject_missing_defaults_fill() {
        let mut env = Environment::new();
        let ty = env.function(vec![env.integer, env.integer], env.integer);
        let mut version = CallableVersionTemplate::new("f", ty);
        version.default_args = vec![None, Some(env.integer)];
        let mut c = Callable::new("f");
        c.add_version(version);
        let integer = env.integer;
        // One argument: the second is defaulted.
        assert!(c.resolve(&mut env, &[integer]).is_some());
        // Three arguments: arity overflow.
        assert!(c.resolve(&mut env, &[integer, integer, integer]).is_none());
        // Zero arguments: the first has no default.
        assert!(c.resolve(&mut env, &[]).is_none());
    }

    #[test]
    fn template_unifies_through_arrays() {
        let mut env = Environment::new();
        let t = env.template("T");
        let arr_t = env.array(t);
        let ty = env.function(vec![arr_t, t], arr_t);
        let version = CallableVersionTemplate::new("push", ty).with_templates(vec![t]);
        let mut c = Callable::new("push");
        c.add_version(version);

        let integer = env.integer;
        let ints = env.array(integer);
        let v = c.resolve(&mut env, &[ints, integer]).unwrap();
        assert_eq!(env.return_type(v.ty), ints);
        assert_eq!(env.arguments(v.ty), vec![ints, integer]);
    }

    #[test]
    fn template_bindings_do_not_leak_between_calls() {
        let mut env = Environment::new();
        let t = env.template("T");
        let ty = env.function(vec![t], t);
        let version = CallableVersionTemplate::new("id", ty).with_templates(vec![t]);
        let mut c = Callable::new("id");
        c.add_version(version);

        let (integer, string) = (env.integer, env.string);
        let v1 = c.resolve(&mut env, &[integer]).unwrap();
        assert_eq!(env.return_type(v1.ty), env.integer);
        let v2 = c.resolve(&mut env, &[string]).unwrap();
        assert_eq!(env.return_type(v2.ty), env.string);
        let v3 = c.resolve(&mut env, &[integer]).unwrap();
        assert_eq!(env.return_type(v3.ty), env.integer);
    }

    #[test]
    fn unbound_template_scores_out() {
        let mut env = Environment::new();
        let t = env.template("T");
        let arr_t = env.array(t);
        // Declared as array<T>; a plain integer argument binds nothing.
        let ty = env.function(vec![arr_t], t);
        let version = CallableVersionTemplate::new("first", ty).with_templates(vec![t]);
        let mut c = Callable::new("first");
        c.add_version(version);
        let integer = env.integer;
        assert!(c.resolve(&mut env, &[integer]).is_none());
    }

    #[test]
    fn meta_add_builds_the_union() {
        let mut env = Environment::new();
        let t1 = env.template("T1");
        let t2 = env.template("T2");
        let a1 = env.array(t1);
        let a2 = env.array(t2);
        let sum = env.meta_add(t1, t2);
        let ret = env.array(sum);
        let ty = env.function(vec![a1, a2], ret);
        let version = CallableVersionTemplate::new("concat", ty).with_templates(vec![t1, t2]);
        let mut c = Callable::new("concat");
        c.add_version(version);

        let ints = env.array(env.integer);
        let reals = env.array(env.real);
        let v = c.resolve(&mut env, &[ints, reals]).unwrap();
        let elem = env.union(env.integer, env.real);
        assert_eq!(env.return_type(v.ty), env.array(elem));
    }

    #[test]
    fn meta_base_of_picks_by_distance() {
        let mut env = Environment::new();
        let t = env.template("T");
        let base = env.meta_base_of(t, env.number);
        let ty = env.function(vec![t], base);
        let version = CallableVersionTemplate::new("abs", ty).with_templates(vec![t]);
        let mut c = Callable::new("abs");
        c.add_version(version);

        let (integer, string, any) = (env.integer, env.string, env.any);
        // Close to number: keep the argument type.
        let v = c.resolve(&mut env, &[integer]).unwrap();
        assert_eq!(env.return_type(v.ty), env.integer);
        // Inconvertible to number: the base itself.
        let v = c.resolve(&mut env, &[string]).unwrap();
        assert_eq!(env.return_type(v.ty), env.number);
        // Far from number (boolean never is, but any is a dynamic cast).
        let v = c.resolve(&mut env, &[any]).unwrap();
        assert_eq!(env.return_type(v.ty), env.real);
    }

    #[test]
    fn meta_not_void_yields_null() {
        let mut env = Environment::new();
        let inner = env.meta_not_void(env.void);
        let built = build(&mut env, inner, &HashMap::new());
        assert_eq!(built, env.null);
        let inner = env.meta_not_void(env.integer);
        let built = build(&mut env, inner, &HashMap::new());
        assert_eq!(built, env.integer);
    }

    #[test]
    fn unknown_versions_match_anything_at_zero() {
        let mut env = Environment::new();
        let ty = env.function(vec![], env.any);
        let mut version = CallableVersionTemplate::new("?", ty);
        version.flags.unknown = true;
        let mut c = Callable::new("?");
        c.add_version(version);
        let (integer, string) = (env.integer, env.string);
        let v = c.resolve(&mut env, &[integer, string]).unwrap();
        assert!(v.flags.unknown);
    }

    #[test]
    fn legacy_versions_are_skipped() {
        let mut env = Environment::new();
        let ty = env.function(vec![env.integer], env.integer);
        let mut version = CallableVersionTemplate::new("f", ty);
        version.flags.legacy = true;
        let mut c = Callable::new("f");
        c.add_version(version);
        let integer = env.integer;
        assert!(c.resolve(&mut env, &[integer]).is_none());
    }
}
