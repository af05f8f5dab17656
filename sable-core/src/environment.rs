//! The type environment: interning arena, conversion distance, the union
//! and meet operators, and the registries of built-in classes and operators.
//!
//! Interning gives identity-by-handle: every structural query below compares
//! `TypeId`s, and the transforms (`add_temporary`, `add_constant`, ...) are
//! idempotent because a flipped copy of an already-interned type hits the
//! same table entry.

use std::collections::HashMap;

use crate::overload::Callable;
use crate::types::{TypeData, TypeId, TypeKind};

/// Distance of an `any`-to-concrete conversion, and the threshold above
/// which a conversion is considered a dynamic cast rather than a widening.
pub const TEMPLATE_SENTINEL: u32 = 100_000;

/// A built-in class: fields and overloaded methods, looked up by member
/// access on values of the class.
#[derive(Clone, Debug, Default)]
pub struct Class {
    pub name: String,
    pub fields: HashMap<String, TypeId>,
    pub methods: HashMap<String, Callable>,
}

impl Class {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

pub struct Environment {
    types: Vec<TypeData>,
    interned: HashMap<TypeData, TypeId>,
    placeholder_counter: u32,
    template_counter: u32,

    pub void: TypeId,
    pub never: TypeId,
    pub any: TypeId,
    pub null: TypeId,
    pub boolean: TypeId,
    pub integer: TypeId,
    pub long: TypeId,
    pub real: TypeId,
    pub bigint: TypeId,
    pub number: TypeId,
    pub string: TypeId,
    pub interval: TypeId,
    pub object: TypeId,

    pub classes: HashMap<String, Class>,
    pub operators: HashMap<&'static str, Callable>,
    pub unary_operators: HashMap<&'static str, Callable>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        let mut env = Self {
            types: Vec::new(),
            interned: HashMap::new(),
            placeholder_counter: 0,
            template_counter: 0,
            void: TypeId(0),
            never: TypeId(0),
            any: TypeId(0),
            null: TypeId(0),
            boolean: TypeId(0),
            integer: TypeId(0),
            long: TypeId(0),
            real: TypeId(0),
            bigint: TypeId(0),
            number: TypeId(0),
            string: TypeId(0),
            interval: TypeId(0),
            object: TypeId(0),
            classes: HashMap::new(),
            operators: HashMap::new(),
            unary_operators: HashMap::new(),
        };
        env.void = env.intern(TypeData::bare(TypeKind::Void));
        env.never = env.intern(TypeData::bare(TypeKind::Never));
        env.any = env.intern(TypeData::bare(TypeKind::Any));
        env.null = env.intern(TypeData::bare(TypeKind::Null));
        env.boolean = env.intern(TypeData::bare(TypeKind::Boolean));
        env.integer = env.intern(TypeData::bare(TypeKind::Integer));
        env.long = env.intern(TypeData::bare(TypeKind::Long));
        env.real = env.intern(TypeData::bare(TypeKind::Real));
        env.bigint = env.intern(TypeData::bare(TypeKind::BigInt));
        env.number = env.intern(TypeData::bare(TypeKind::Number));
        env.string = env.intern(TypeData::bare(TypeKind::Str));
        env.interval = env.intern(TypeData::bare(TypeKind::Interval));
        env.object = env.intern(TypeData::bare(TypeKind::Object));
        crate::stdlib::register(&mut env);
        env
    }

    pub(crate) fn intern(&mut self, data: TypeData) -> TypeId {
        if let Some(id) = self.interned.get(&data) {
            return *id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(data.clone());
        self.interned.insert(data, id);
        id
    }

    pub fn data(&self, t: TypeId) -> &TypeData {
        &self.types[t.index()]
    }

    pub fn kind(&self, t: TypeId) -> &TypeKind {
        &self.types[t.index()].kind
    }

    // ---- constructors ------------------------------------------------

    pub fn array(&mut self, element: TypeId) -> TypeId {
        let element = self.not_temporary(element);
        let mut d = TypeData::bare(TypeKind::Array(element));
        d.placeholder = self.data(element).placeholder;
        self.intern(d)
    }

    pub fn tmp_array(&mut self, element: TypeId) -> TypeId {
        let a = self.array(element);
        self.add_temporary(a)
    }

    pub fn set(&mut self, element: TypeId) -> TypeId {
        let element = self.not_temporary(element);
        let mut d = TypeData::bare(TypeKind::Set(element));
        d.placeholder = self.data(element).placeholder;
        self.intern(d)
    }

    pub fn tmp_set(&mut self, element: TypeId) -> TypeId {
        let s = self.set(element);
        self.add_temporary(s)
    }

    pub fn map(&mut self, key: TypeId, element: TypeId) -> TypeId {
        let key = self.not_temporary(key);
        let element = self.not_temporary(element);
        let mut d = TypeData::bare(TypeKind::Map(key, element));
        d.placeholder = self.data(key).placeholder || self.data(element).placeholder;
        self.intern(d)
    }

    pub fn tmp_map(&mut self, key: TypeId, element: TypeId) -> TypeId {
        let m = self.map(key, element);
        self.add_temporary(m)
    }

    pub fn function(&mut self, args: Vec<TypeId>, ret: TypeId) -> TypeId {
        let ph = self.data(ret).placeholder || args.iter().any(|a| self.data(*a).placeholder);
        let mut d = TypeData::bare(TypeKind::Function { args, ret });
        d.placeholder = ph;
        self.intern(d)
    }

    pub fn function_object(&mut self, args: Vec<TypeId>, ret: TypeId, closure: bool) -> TypeId {
        let ph = self.data(ret).placeholder || args.iter().any(|a| self.data(*a).placeholder);
        let mut d = TypeData::bare(TypeKind::FunctionObject { args, ret, closure });
        d.placeholder = ph;
        self.intern(d)
    }

    pub fn closure(&mut self, args: Vec<TypeId>, ret: TypeId) -> TypeId {
        self.function_object(args, ret, true)
    }

    pub fn class(&mut self, name: &str) -> TypeId {
        self.intern(TypeData::bare(TypeKind::Class(name.to_string())))
    }

    /// Mints a fresh unification variable. Each call yields a distinct type
    /// even under the same name, so overload versions never share bindings.
    pub fn template(&mut self, name: &str) -> TypeId {
        self.template_counter += 1;
        self.intern(TypeData::bare(TypeKind::Template {
            name: name.to_string(),
            ordinal: self.template_counter,
        }))
    }

    pub fn generate_placeholder(&mut self) -> TypeId {
        self.placeholder_counter += 1;
        let mut d = TypeData::bare(TypeKind::Placeholder(self.placeholder_counter));
        d.placeholder = true;
        self.intern(d)
    }

    pub fn meta_add(&mut self, a: TypeId, b: TypeId) -> TypeId {
        self.intern(TypeData::bare(TypeKind::MetaAdd(a, b)))
    }

    pub fn meta_mul(&mut self, a: TypeId, b: TypeId) -> TypeId {
        self.intern(TypeData::bare(TypeKind::MetaMul(a, b)))
    }

    pub fn meta_base_of(&mut self, ty: TypeId, base: TypeId) -> TypeId {
        self.intern(TypeData::bare(TypeKind::MetaBaseOf { ty, base }))
    }

    pub fn meta_not_temporary(&mut self, ty: TypeId) -> TypeId {
        self.intern(TypeData::bare(TypeKind::MetaNotTemporary(ty)))
    }

    pub fn meta_not_void(&mut self, ty: TypeId) -> TypeId {
        self.intern(TypeData::bare(TypeKind::MetaNotVoid(ty)))
    }

    /// Builds the flattened, deduplicated union of `parts`. Members are
    /// stored without their temporary flag; a single surviving member
    /// collapses to the first input. The folded form is cached at
    /// construction.
    pub fn compound(&mut self, parts: Vec<TypeId>) -> TypeId {
        debug_assert!(!parts.is_empty());
        let first = parts[0];
        let mut temporary = false;
        let mut members: Vec<TypeId> = Vec::new();
        for part in parts {
            temporary |= self.data(part).temporary;
            let base = self.not_temporary(part);
            match self.kind(base).clone() {
                TypeKind::Compound { members: inner, .. } => {
                    for m in inner {
                        if !members.contains(&m) {
                            members.push(m);
                        }
                    }
                }
                _ => {
                    if !members.contains(&base) {
                        members.push(base);
                    }
                }
            }
        }
        if members.len() == 1 {
            return first;
        }
        members.sort();
        let folded = members
            .iter()
            .fold(self.void, |acc, m| self.meet(acc, *m));
        let ph = members.iter().any(|m| self.data(*m).placeholder);
        let mut d = TypeData::bare(TypeKind::Compound { members, folded });
        d.placeholder = ph;
        let id = self.intern(d);
        if temporary { self.add_temporary(id) } else { id }
    }

    // ---- transforms ----------------------------------------------------

    pub fn add_temporary(&mut self, t: TypeId) -> TypeId {
        let d = self.data(t);
        if d.temporary || d.placeholder {
            return t;
        }
        if self.is_primitive(t) {
            return t;
        }
        if self.data(t).constant {
            let base = self.not_constant(t);
            return self.add_temporary(base);
        }
        let mut nd = self.data(t).clone();
        nd.temporary = true;
        self.intern(nd)
    }

    pub fn not_temporary(&mut self, t: TypeId) -> TypeId {
        if !self.data(t).temporary {
            return t;
        }
        let mut nd = self.data(t).clone();
        nd.temporary = false;
        self.intern(nd)
    }

    pub fn add_constant(&mut self, t: TypeId) -> TypeId {
        if self.data(t).constant {
            return t;
        }
        if self.data(t).temporary {
            let base = self.not_temporary(t);
            return self.add_constant(base);
        }
        let mut nd = self.data(t).clone();
        nd.constant = true;
        self.intern(nd)
    }

    pub fn not_constant(&mut self, t: TypeId) -> TypeId {
        if !self.data(t).constant {
            return t;
        }
        let mut nd = self.data(t).clone();
        nd.constant = false;
        self.intern(nd)
    }

    pub fn pointer(&mut self, t: TypeId) -> TypeId {
        if self.data(t).temporary {
            let base = self.not_temporary(t);
            let p = self.pointer(base);
            return self.add_temporary(p);
        }
        if self.data(t).constant {
            let base = self.not_constant(t);
            let p = self.pointer(base);
            return self.add_constant(p);
        }
        let mut d = TypeData::bare(TypeKind::Pointer(t));
        d.placeholder = self.data(t).placeholder;
        self.intern(d)
    }

    // ---- lattice -------------------------------------------------------

    /// Collapses a compound to its cached pairwise meet; any other type is
    /// its own fold.
    pub fn fold(&self, t: TypeId) -> TypeId {
        match &self.data(t).kind {
            TypeKind::Compound { folded, .. } => *folded,
            _ => t,
        }
    }

    /// The union operator `⊕`: the type of a value that may come from
    /// either operand. Containers merge componentwise; unrelated types
    /// become a compound.
    pub fn union(&mut self, a: TypeId, b: TypeId) -> TypeId {
        use TypeKind::*;
        if matches!(self.kind(self.fold(a)), Void | Never) {
            return b;
        }
        if matches!(self.kind(self.fold(b)), Void | Never) {
            return a;
        }
        let ka = self.kind(self.fold(a)).clone();
        let kb = self.kind(self.fold(b)).clone();
        match (ka, kb) {
            (Array(e1), Array(e2)) => {
                let tmp = self.data(a).temporary || self.data(b).temporary;
                let e = self.union(e1, e2);
                if tmp { self.tmp_array(e) } else { self.array(e) }
            }
            (Array(e1), Map(..)) if matches!(self.kind(e1), Never) => b,
            (Map(..), Array(e2)) if matches!(self.kind(e2), Never) => a,
            (Set(e1), Set(e2)) => {
                let e = self.union(e1, e2);
                if e == e1 {
                    a
                } else if e == e2 {
                    b
                } else {
                    let tmp = self.data(a).temporary || self.data(b).temporary;
                    if tmp { self.tmp_set(e) } else { self.set(e) }
                }
            }
            (Map(k1, v1), Map(k2, v2)) => {
                let tmp = self.data(a).temporary || self.data(b).temporary;
                let k = self.union(k1, k2);
                let v = self.union(v1, v2);
                if tmp { self.tmp_map(k, v) } else { self.map(k, v) }
            }
            _ => self.compound(vec![a, b]),
        }
    }

    /// The meet operator `∘`: a single runtime representation wide enough
    /// for both operands. Mixing a polymorphic and a primitive shape, or a
    /// boolean with anything else, degrades to `any`.
    pub fn meet(&self, a: TypeId, b: TypeId) -> TypeId {
        use TypeKind::*;
        let a = self.fold(a);
        let b = self.fold(b);
        if matches!(self.kind(a), Void | Never) {
            return b;
        }
        if matches!(self.kind(b), Void | Never) {
            return a;
        }
        if a == b || self.kind(a) == self.kind(b) {
            return a;
        }
        if (self.is_polymorphic(a) && self.is_primitive(b))
            || (self.is_polymorphic(b) && self.is_primitive(a))
        {
            return self.any;
        }
        if matches!(self.kind(a), Boolean) || matches!(self.kind(b), Boolean) {
            return self.any;
        }
        match (self.distance(a, b), self.distance(b, a)) {
            (Some(d1), Some(d2)) if d1 < TEMPLATE_SENTINEL && d2 < TEMPLATE_SENTINEL => {
                if d1 < d2 { b } else { a }
            }
            (Some(d1), None) if d1 < TEMPLATE_SENTINEL => b,
            (None, Some(d2)) if d2 < TEMPLATE_SENTINEL => a,
            _ => self.any,
        }
    }

    /// Conversion cost from `from` to `to`, or `None` when no implicit
    /// conversion exists. Smaller is closer; `0` means identical after
    /// folding. Only the relative order of the constants is contractual.
    pub fn distance(&self, from: TypeId, to: TypeId) -> Option<u32> {
        use TypeKind::*;
        // A non-temporary value can never satisfy a temporary requirement.
        if !self.data(from).temporary && self.data(to).temporary {
            return None;
        }
        let f = self.fold(from);
        let t = self.fold(to);
        let tk = self.kind(t).clone();
        match self.kind(f).clone() {
            Never => Some(0),
            Void => match tk {
                Void => Some(0),
                _ => None,
            },
            Any => match tk {
                Any => Some(0),
                // Dynamic downcast: always past the sentinel, ordered by
                // how far the target itself is from `any`.
                _ => Some(TEMPLATE_SENTINEL + self.distance(t, self.any)?),
            },
            Boolean => match tk {
                Boolean => Some(0),
                Any => Some(1),
                // Boolean-to-numeric is permitted but the dearest numeric
                // path of all, past every narrowing.
                Integer => Some(500),
                Long => Some(501),
                Real => Some(502),
                BigInt => Some(503),
                Number => Some(504),
                _ => None,
            },
            Integer => match tk {
                Integer => Some(0),
                Long => Some(1),
                Real => Some(2),
                BigInt => Some(3),
                Number => Some(4),
                Any => Some(5),
                Boolean => Some(100),
                _ => None,
            },
            Long => match tk {
                Long => Some(0),
                Real => Some(1),
                BigInt => Some(2),
                Number => Some(3),
                Any => Some(4),
                Integer => Some(100),
                Boolean => Some(101),
                _ => None,
            },
            Real => match tk {
                Real => Some(0),
                BigInt => Some(3),
                Number => Some(4),
                Any => Some(5),
                Long => Some(100),
                Integer => Some(101),
                Boolean => Some(102),
                _ => None,
            },
            BigInt => match tk {
                BigInt => Some(0),
                Number => Some(1),
                Any => Some(2),
                Real => Some(100),
                Long => Some(200),
                Integer => Some(300),
                Boolean => Some(400),
                _ => None,
            },
            Number => match tk {
                Number => Some(0),
                Any => Some(1),
                Real => Some(101),
                BigInt => Some(102),
                Long => Some(103),
                Integer => Some(104),
                Boolean => Some(105),
                _ => None,
            },
            Null => match tk {
                Null => Some(0),
                Any => Some(1),
                _ => None,
            },
            Str => match tk {
                Str => Some(0),
                Any => Some(1),
                _ => None,
            },
            Interval => match tk {
                Interval => Some(0),
                Any => Some(1),
                _ => None,
            },
            Object => match tk {
                Object => Some(0),
                Any => Some(1),
                _ => None,
            },
            Class(n1) => match tk {
                Class(n2) if n1 == n2 => Some(0),
                Any => Some(1),
                _ => None,
            },
            Array(e1) => match tk {
                Any => Some(1000),
                Array(e2) => {
                    if matches!(self.kind(e1), Never) {
                        Some(0)
                    } else if matches!(self.kind(e2), Never | Void) {
                        Some(999)
                    } else if self.fold(e1) == self.fold(e2) {
                        Some(0)
                    } else {
                        None
                    }
                }
                _ => None,
            },
            Set(e1) => match tk {
                Any => Some(1000),
                Set(e2) => {
                    if matches!(self.kind(e1), Never) {
                        Some(0)
                    } else if matches!(self.kind(e2), Never | Void) {
                        Some(999)
                    } else if self.fold(e1) == self.fold(e2) {
                        Some(0)
                    } else {
                        None
                    }
                }
                _ => None,
            },
            Map(k1, v1) => match tk {
                Any => Some(1000),
                Map(k2, v2) => Some(self.distance(k1, k2)? + self.distance(v1, v2)?),
                _ => None,
            },
            Function { args: a1, ret: r1 } => match tk {
                Any => Some(6),
                Function { args: a2, ret: r2 } if a1.len() == a2.len() => {
                    let mut cost = self.distance(r1, r2)?;
                    for (x, y) in a1.iter().zip(&a2) {
                        cost += self.distance(*x, *y)?;
                    }
                    Some(cost)
                }
                FunctionObject { args: a2, ret: r2, .. } if a1.len() == a2.len() => {
                    let mut cost = 1 + self.distance(r1, r2)?;
                    for (x, y) in a1.iter().zip(&a2) {
                        cost += self.distance(*x, *y)?;
                    }
                    Some(cost)
                }
                _ => None,
            },
            FunctionObject { args: a1, ret: r1, .. } => match tk {
                Any => Some(1),
                FunctionObject { args: a2, ret: r2, .. } if a1.len() == a2.len() => {
                    let mut cost = self.distance(r1, r2)?;
                    for (x, y) in a1.iter().zip(&a2) {
                        cost += self.distance(*x, *y)?;
                    }
                    Some(cost)
                }
                _ => None,
            },
            Pointer(p1) => match tk {
                Any => Some(1),
                Pointer(p2) => self.distance(p1, p2),
                _ => None,
            },
            Placeholder(i) => match tk {
                Placeholder(j) if i == j => Some(0),
                Any => Some(1),
                _ => None,
            },
            Template { .. } => {
                if f == t {
                    Some(0)
                } else {
                    None
                }
            }
            Compound { .. } => None, // unreachable after fold
            MetaAdd(..) | MetaMul(..) | MetaBaseOf { .. } | MetaNotTemporary(..)
            | MetaNotVoid(..) => None,
        }
    }

    pub fn castable(&self, from: TypeId, to: TypeId) -> bool {
        self.distance(from, to).is_some()
    }

    /// Castable without crossing the dynamic-cast sentinel.
    pub fn strictly_castable(&self, from: TypeId, to: TypeId) -> bool {
        matches!(self.distance(from, to), Some(d) if d < TEMPLATE_SENTINEL)
    }

    // ---- predicates and accessors ---------------------------------------

    /// Unboxed machine representation.
    pub fn is_primitive(&self, t: TypeId) -> bool {
        matches!(
            self.kind(self.fold(t)),
            TypeKind::Boolean | TypeKind::Integer | TypeKind::Long | TypeKind::Real
                | TypeKind::Function { .. }
        )
    }

    /// Heap-managed representation.
    pub fn is_polymorphic(&self, t: TypeId) -> bool {
        matches!(
            self.kind(self.fold(t)),
            TypeKind::Any
                | TypeKind::Null
                | TypeKind::Str
                | TypeKind::BigInt
                | TypeKind::Array(_)
                | TypeKind::Set(_)
                | TypeKind::Map(..)
                | TypeKind::Interval
                | TypeKind::Object
                | TypeKind::Class(_)
                | TypeKind::FunctionObject { .. }
        )
    }

    pub fn is_any(&self, t: TypeId) -> bool {
        matches!(self.kind(self.fold(t)), TypeKind::Any)
    }

    pub fn is_void(&self, t: TypeId) -> bool {
        matches!(self.kind(self.fold(t)), TypeKind::Void)
    }

    pub fn is_number(&self, t: TypeId) -> bool {
        self.strictly_castable(self.fold(t), self.number)
    }

    pub fn is_iterable(&self, t: TypeId) -> bool {
        matches!(
            self.kind(self.fold(t)),
            TypeKind::Array(_)
                | TypeKind::Set(_)
                | TypeKind::Map(..)
                | TypeKind::Interval
                | TypeKind::Str
                | TypeKind::Any
        )
    }

    pub fn is_callable(&self, t: TypeId) -> bool {
        matches!(
            self.kind(self.fold(t)),
            TypeKind::Function { .. }
                | TypeKind::FunctionObject { .. }
                | TypeKind::Pointer(_)
                | TypeKind::Any
                | TypeKind::Class(_)
        )
    }

    /// Element type when iterated.
    pub fn element(&self, t: TypeId) -> TypeId {
        match self.kind(self.fold(t)) {
            TypeKind::Array(e) | TypeKind::Set(e) => *e,
            TypeKind::Map(_, v) => *v,
            TypeKind::Interval => self.integer,
            TypeKind::Str => self.string,
            _ => self.any,
        }
    }

    /// Key type when iterated with a key binder.
    pub fn key(&self, t: TypeId) -> TypeId {
        match self.kind(self.fold(t)) {
            TypeKind::Map(k, _) => *k,
            TypeKind::Array(_) | TypeKind::Str | TypeKind::Interval => self.integer,
            _ => self.any,
        }
    }

    pub fn return_type(&self, t: TypeId) -> TypeId {
        match self.kind(self.fold(t)) {
            TypeKind::Function { ret, .. } | TypeKind::FunctionObject { ret, .. } => *ret,
            TypeKind::Pointer(p) => self.return_type(*p),
            _ => self.any,
        }
    }

    pub fn arguments(&self, t: TypeId) -> Vec<TypeId> {
        match self.kind(self.fold(t)) {
            TypeKind::Function { args, .. } | TypeKind::FunctionObject { args, .. } => {
                args.clone()
            }
            TypeKind::Pointer(p) => self.arguments(*p),
            _ => Vec::new(),
        }
    }

    /// Name of the built-in class that services member lookups on `t`.
    pub fn class_of(&self, t: TypeId) -> &'static str {
        match self.kind(self.fold(t)) {
            TypeKind::Boolean => "Boolean",
            TypeKind::Integer | TypeKind::Long | TypeKind::Real | TypeKind::BigInt
            | TypeKind::Number => "Number",
            TypeKind::Str => "String",
            TypeKind::Array(_) => "Array",
            TypeKind::Set(_) => "Set",
            TypeKind::Map(..) => "Map",
            TypeKind::Interval => "Interval",
            TypeKind::Null => "Null",
            TypeKind::Object => "Object",
            TypeKind::Class(_) => "Class",
            TypeKind::Function { .. } | TypeKind::FunctionObject { .. } | TypeKind::Pointer(_) => {
                "Function"
            }
            _ => "Value",
        }
    }

    pub fn display(&self, t: TypeId) -> String {
        use TypeKind::*;
        let d = self.data(t);
        let mut s = match &d.kind {
            Void => "void".to_string(),
            Never => "never".to_string(),
            Any => "any".to_string(),
            Null => "null".to_string(),
            Boolean => "bool".to_string(),
            Integer => "int".to_string(),
            Long => "long".to_string(),
            Real => "real".to_string(),
            BigInt => "bigint".to_string(),
            Number => "number".to_string(),
            Str => "string".to_string(),
            Interval => "interval".to_string(),
            Object => "object".to_string(),
            Class(n) => n.clone(),
            Array(e) => format!("array<{}>", self.display(*e)),
            Set(e) => format!("set<{}>", self.display(*e)),
            Map(k, v) => format!("map<{}, {}>", self.display(*k), self.display(*v)),
            Function { args, ret } | FunctionObject { args, ret, closure: false } => {
                let args: Vec<String> = args.iter().map(|a| self.display(*a)).collect();
                format!("fun({}) => {}", args.join(", "), self.display(*ret))
            }
            FunctionObject { args, ret, closure: true } => {
                let args: Vec<String> = args.iter().map(|a| self.display(*a)).collect();
                format!("closure({}) => {}", args.join(", "), self.display(*ret))
            }
            Pointer(p) => format!("{}*", self.display(*p)),
            Template { name, .. } => name.clone(),
            Placeholder(i) => format!("p{i}"),
            Compound { members, .. } => {
                let members: Vec<String> = members.iter().map(|m| self.display(*m)).collect();
                members.join(" | ")
            }
            MetaAdd(a, b) => format!("{} + {}", self.display(*a), self.display(*b)),
            MetaMul(a, b) => format!("{} * {}", self.display(*a), self.display(*b)),
            MetaBaseOf { ty, base } => {
                format!("base_of({}, {})", self.display(*ty), self.display(*base))
            }
            MetaNotTemporary(x) => format!("not_temporary({})", self.display(*x)),
            MetaNotVoid(x) => format!("not_void({})", self.display(*x)),
        };
        if d.constant {
            s = format!("const:{s}");
        }
        if d.temporary {
            s.push_str("&&");
        }
        if d.reference {
            s.push('&');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_gives_identity() {
        let mut env = Environment::new();
        let a = env.array(env.integer);
        let b = env.array(env.integer);
        assert_eq!(a, b);
        let c = env.array(env.real);
        assert_ne!(a, c);
    }

    #[test]
    fn distance_is_zero_on_self_after_fold() {
        let mut env = Environment::new();
        let all = [
            env.integer,
            env.long,
            env.real,
            env.bigint,
            env.number,
            env.boolean,
            env.string,
            env.null,
            env.any,
            env.interval,
            env.object,
        ];
        for t in all {
            assert_eq!(env.distance(t, t), Some(0), "{}", env.display(t));
        }
        let c = env.compound(vec![env.integer, env.real]);
        let folded = env.fold(c);
        assert_eq!(env.distance(folded, folded), Some(0));
    }

    #[test]
    fn distance_orders_numeric_widening() {
        let env = Environment::new();
        let to_long = env.distance(env.integer, env.long).unwrap();
        let to_real = env.distance(env.integer, env.real).unwrap();
        let to_any = env.distance(env.integer, env.any).unwrap();
        assert!(to_long < to_real && to_real < to_any);
        // Narrowing costs more than any widening.
        let narrowing = env.distance(env.real, env.integer).unwrap();
        assert!(narrowing > to_any);
    }

    #[test]
    fn boolean_to_numeric_costs_more_than_any_narrowing() {
        let env = Environment::new();
        assert_eq!(env.distance(env.boolean, env.any), Some(1));
        let worst_narrowing = env.distance(env.bigint, env.boolean).unwrap();
        for t in [env.integer, env.long, env.real, env.bigint, env.number] {
            let d = env.distance(env.boolean, t).unwrap();
            assert!(d > worst_narrowing, "{}: {d}", env.display(t));
            assert!(d < TEMPLATE_SENTINEL);
        }
    }

    #[test]
    fn any_source_distances_cross_the_sentinel() {
        let env = Environment::new();
        let d = env.distance(env.any, env.integer).unwrap();
        assert!(d >= TEMPLATE_SENTINEL);
        assert_eq!(env.distance(env.any, env.any), Some(0));
        // Preference among downcast targets still follows the reverse order.
        let to_int = env.distance(env.any, env.integer).unwrap();
        let to_str = env.distance(env.any, env.string).unwrap();
        assert!(to_str < to_int);
    }

    #[test]
    fn temporary_requirement_rejects_plain_values() {
        let mut env = Environment::new();
        let arr = env.array(env.integer);
        let tmp = env.add_temporary(arr);
        assert_eq!(env.distance(arr, tmp), None);
        assert_eq!(env.distance(tmp, arr), Some(0));
    }

    #[test]
    fn array_distance_rules() {
        let mut env = Environment::new();
        let empty = env.array(env.never);
        let ints = env.array(env.integer);
        let reals = env.array(env.real);
        assert_eq!(env.distance(empty, ints), Some(0));
        assert_eq!(env.distance(ints, empty), Some(999));
        assert_eq!(env.distance(ints, ints), Some(0));
        assert_eq!(env.distance(ints, reals), None);
        assert_eq!(env.distance(ints, env.any), Some(1000));
    }

    #[test]
    fn union_is_commutative_after_interning() {
        let mut env = Environment::new();
        let ab = env.union(env.integer, env.real);
        let ba = env.union(env.real, env.integer);
        assert_eq!(ab, ba);
    }

    #[test]
    fn union_identity_and_absorption() {
        let mut env = Environment::new();
        assert_eq!(env.union(env.void, env.integer), env.integer);
        assert_eq!(env.union(env.never, env.string), env.string);
        assert_eq!(env.union(env.integer, env.integer), env.integer);
    }

    #[test]
    fn union_merges_arrays_componentwise() {
        let mut env = Environment::new();
        let a1 = env.array(env.integer);
        let a2 = env.array(env.real);
        let merged = env.union(a1, a2);
        let elem = env.union(env.integer, env.real);
        assert_eq!(merged, env.array(elem));
    }

    #[test]
    fn empty_array_unifies_with_map() {
        let mut env = Environment::new();
        let empty = env.array(env.never);
        let m = env.map(env.string, env.integer);
        assert_eq!(env.union(empty, m), m);
        assert_eq!(env.union(m, empty), m);
    }

    #[test]
    fn compound_flattens_and_dedups() {
        let mut env = Environment::new();
        let ir = env.compound(vec![env.integer, env.real]);
        let irs = env.compound(vec![ir, env.string]);
        match env.kind(irs).clone() {
            TypeKind::Compound { members, .. } => {
                assert_eq!(members.len(), 3);
                assert!(members.contains(&env.integer));
                assert!(members.contains(&env.real));
                assert!(members.contains(&env.string));
            }
            other => panic!("expected compound, got {other:?}"),
        }
        // Re-adding an existing member changes nothing.
        assert_eq!(env.compound(vec![irs, env.real]), irs);
    }

    #[test]
    fn meet_folds_to_a_common_representation() {
        let mut env = Environment::new();
        assert_eq!(env.meet(env.integer, env.real), env.real);
        assert_eq!(env.meet(env.real, env.integer), env.real);
        assert_eq!(env.meet(env.void, env.integer), env.integer);
        assert_eq!(env.meet(env.integer, env.integer), env.integer);
        // Mixed representations degrade to any.
        assert_eq!(env.meet(env.integer, env.string), env.any);
        assert_eq!(env.meet(env.boolean, env.integer), env.any);
        let arr = env.array(env.integer);
        assert_eq!(env.meet(arr, env.real), env.any);
    }

    #[test]
    fn compound_fold_is_the_pairwise_meet() {
        let mut env = Environment::new();
        let c = env.compound(vec![env.integer, env.real]);
        assert_eq!(env.fold(c), env.real);
        let c2 = env.compound(vec![env.integer, env.string]);
        assert_eq!(env.fold(c2), env.any);
    }

    #[test]
    fn transforms_are_idempotent_and_inverse() {
        let mut env = Environment::new();
        let arr = env.array(env.integer);
        let tmp = env.add_temporary(arr);
        assert_ne!(arr, tmp);
        assert_eq!(env.add_temporary(tmp), tmp);
        assert_eq!(env.not_temporary(tmp), arr);
        assert_eq!(env.not_temporary(arr), arr);

        let konst = env.add_constant(arr);
        assert_eq!(env.add_constant(konst), konst);
        assert_eq!(env.not_constant(konst), arr);
        // Adding const strips temporary first, and vice versa.
        assert_eq!(env.add_constant(tmp), konst);
        assert_eq!(env.add_temporary(konst), tmp);
    }

    #[test]
    fn temporary_is_a_no_op_on_primitives_and_placeholders() {
        let mut env = Environment::new();
        assert_eq!(env.add_temporary(env.integer), env.integer);
        assert_eq!(env.add_temporary(env.boolean), env.boolean);
        let p = env.generate_placeholder();
        assert_eq!(env.add_temporary(p), p);
    }

    #[test]
    fn placeholders_are_unique_and_contagious() {
        let mut env = Environment::new();
        let p1 = env.generate_placeholder();
        let p2 = env.generate_placeholder();
        assert_ne!(p1, p2);
        let arr = env.array(p1);
        assert!(env.data(arr).placeholder);
        let f = env.function(vec![env.integer], p1);
        assert!(env.data(f).placeholder);
    }

    #[test]
    fn iteration_accessors() {
        let mut env = Environment::new();
        let arr = env.array(env.string);
        assert_eq!(env.element(arr), env.string);
        assert_eq!(env.key(arr), env.integer);
        let m = env.map(env.string, env.real);
        assert_eq!(env.element(m), env.real);
        assert_eq!(env.key(m), env.string);
        assert_eq!(env.element(env.interval), env.integer);
        assert!(env.is_iterable(env.string));
        assert!(!env.is_iterable(env.integer));
    }

    #[test]
    fn display_is_stable() {
        let mut env = Environment::new();
        let elem = env.union(env.integer, env.real);
        let arr = env.tmp_array(elem);
        assert_eq!(env.display(arr), "array<int | real>&&");
        let f = env.function(vec![env.integer], env.string);
        assert_eq!(env.display(f), "fun(int) => string");
    }
}
