//! Static types attached to arguments and statement results.
//!
//! Types are only consulted by the tracking classifier; the rest of the
//! pipeline works on handles.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A concrete static type as seen in a lowered function body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ty {
    Int,
    Float,
    Bool,
    Char,
    Nothing,
    /// Interned symbol.
    Symbol,
    /// Immutable text.
    Str,
    /// A type used as a value.
    TypeTag,
    Tuple(Vec<Ty>),
    Array(Box<Ty>),
    Dict(Box<Ty>, Box<Ty>),
    /// Mutable single-value cell.
    Ref(Box<Ty>),
    /// Raw pointer.
    Ptr,
    /// Callable value (closures may capture cells).
    Fn,
    /// Statically unknown.
    Any,
    Union(Vec<Ty>),
    /// User-declared struct, resolved through a [`TypeEnv`].
    Named(String),
}

impl Ty {
    pub fn array(elem: Ty) -> Self {
        Ty::Array(Box::new(elem))
    }

    pub fn dict(key: Ty, value: Ty) -> Self {
        Ty::Dict(Box::new(key), Box::new(value))
    }

    pub fn reference(inner: Ty) -> Self {
        Ty::Ref(Box::new(inner))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Ty::Named(name.into())
    }

    /// Built-in scalar types that carry no reachable state.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Ty::Int | Ty::Float | Ty::Bool | Ty::Char | Ty::Nothing
        )
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, items: &[Ty]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Ty::Int => f.write_str("Int"),
            Ty::Float => f.write_str("Float"),
            Ty::Bool => f.write_str("Bool"),
            Ty::Char => f.write_str("Char"),
            Ty::Nothing => f.write_str("Nothing"),
            Ty::Symbol => f.write_str("Symbol"),
            Ty::Str => f.write_str("Str"),
            Ty::TypeTag => f.write_str("Type"),
            Ty::Tuple(items) => {
                f.write_str("Tuple<")?;
                list(f, items)?;
                f.write_str(">")
            }
            Ty::Array(elem) => write!(f, "Array<{elem}>"),
            Ty::Dict(k, v) => write!(f, "Dict<{k}, {v}>"),
            Ty::Ref(inner) => write!(f, "Ref<{inner}>"),
            Ty::Ptr => f.write_str("Ptr"),
            Ty::Fn => f.write_str("Fn"),
            Ty::Any => f.write_str("Any"),
            Ty::Union(items) => {
                f.write_str("Union<")?;
                list(f, items)?;
                f.write_str(">")
            }
            Ty::Named(name) => f.write_str(name),
        }
    }
}

/// A user-declared struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    /// Fields of a mutable struct can be reassigned in place.
    pub mutable: bool,
    pub fields: Vec<(String, Ty)>,
}

impl StructDef {
    pub fn new(name: impl Into<String>, mutable: bool) -> Self {
        Self {
            name: name.into(),
            mutable,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: Ty) -> Self {
        self.fields.push((name.into(), ty));
        self
    }
}

/// Struct definitions visible to one function body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeEnv {
    structs: FxHashMap<String, StructDef>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: StructDef) {
        self.structs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&StructDef> {
        self.structs.get(name)
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StructDef> {
        self.structs.values()
    }

    /// Merge another environment into this one; later definitions win.
    pub fn extend(&mut self, other: &TypeEnv) {
        for def in other.iter() {
            self.insert(def.clone());
        }
    }
}
