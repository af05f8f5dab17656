//! Type representation.
//!
//! Types are interned: the [`Environment`](crate::environment::Environment)
//! owns every [`TypeData`] ever built and hands out [`TypeId`] handles.
//! Two handles are equal exactly when the types are structurally equal, so
//! all comparisons downstream are integer comparisons.

/// Handle to an interned type. Only the owning environment can mint these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The structural shape of a type. Composite shapes reference their
/// components by id, never by value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Absence of a value; the type of empty blocks.
    Void,
    /// Bottom: the element type of empty containers. Unifies with anything.
    Never,
    /// Top: the dynamic type.
    Any,
    Null,
    Boolean,
    Integer,
    Long,
    Real,
    /// Arbitrary-precision integer.
    BigInt,
    /// Abstract numeric supertype.
    Number,
    Str,
    Interval,
    /// Structurally untyped object value.
    Object,
    Class(String),
    Array(TypeId),
    Set(TypeId),
    Map(TypeId, TypeId),
    /// Raw function signature.
    Function {
        args: Vec<TypeId>,
        ret: TypeId,
    },
    /// First-class function value; `closure` when it carries captures.
    FunctionObject {
        args: Vec<TypeId>,
        ret: TypeId,
        closure: bool,
    },
    Pointer(TypeId),
    /// Named unification variable of an overload version.
    Template {
        name: String,
        ordinal: u32,
    },
    /// Provisional return type of a not-yet-analyzed recursive function.
    Placeholder(u32),
    /// Flattened, deduplicated union. `folded` caches the pairwise meet of
    /// the members.
    Compound {
        members: Vec<TypeId>,
        folded: TypeId,
    },

    // Meta shapes, only legal inside overload version signatures. They are
    // eliminated by substitution before any concrete type reaches the rest
    // of the analyzer.
    MetaAdd(TypeId, TypeId),
    MetaMul(TypeId, TypeId),
    MetaBaseOf {
        ty: TypeId,
        base: TypeId,
    },
    MetaNotTemporary(TypeId),
    MetaNotVoid(TypeId),
}

/// A type: shape plus decoration flags. Flags never change in place; the
/// transforms on the environment intern a flipped copy instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeData {
    pub kind: TypeKind,
    /// The value is an intermediate result that may be consumed in place.
    pub temporary: bool,
    pub constant: bool,
    pub reference: bool,
    /// Transitively contains an unresolved [`TypeKind::Placeholder`].
    pub placeholder: bool,
}

impl TypeData {
    pub fn bare(kind: TypeKind) -> Self {
        Self {
            kind,
            temporary: false,
            constant: false,
            reference: false,
            placeholder: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_data_equality_includes_flags() {
        let a = TypeData::bare(TypeKind::Integer);
        let mut b = TypeData::bare(TypeKind::Integer);
        assert_eq!(a, b);
        b.temporary = true;
        assert_ne!(a, b);
    }
}
