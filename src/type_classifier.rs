//! Tracking classification for static types.
//!
//! A value is *tracked* when its type can carry mutable, reachable,
//! aliasable state. Untracked values are exempt from every check.
//!
//! | Type pattern                          | Tracked | Why |
//! |---------------------------------------|---------|-----|
//! | `Int`, `Float`, `Bool`, `Char`, `Nothing` | no  | plain scalars |
//! | `Symbol`, `Str`, `Type`               | no      | immutable identifiers |
//! | `Tuple<..>` of untracked              | no      | closed value |
//! | immutable struct of untracked fields  | no      | closed value |
//! | `Array`, `Dict`, `Ref`, `Ptr`, `Fn`   | yes     | mutable or captures cells |
//! | mutable struct                        | yes     | fields reassignable |
//! | `Any`, unknown struct names           | yes     | cannot prove otherwise |

use crate::ir::{Ty, TypeEnv};
use rustc_hash::FxHashMap;
use std::cell::RefCell;

/// Memoizing classifier bound to one type environment.
#[derive(Debug)]
pub struct TrackingClassifier<'a> {
    env: &'a TypeEnv,
    memo: RefCell<FxHashMap<Ty, bool>>,
}

impl<'a> TrackingClassifier<'a> {
    pub fn new(env: &'a TypeEnv) -> Self {
        Self {
            env,
            memo: RefCell::new(FxHashMap::default()),
        }
    }

    /// True if values of `ty` must be tracked.
    pub fn is_tracked(&self, ty: &Ty) -> bool {
        if let Some(hit) = self.memo.borrow().get(ty) {
            return *hit;
        }
        let mut visiting = Vec::new();
        let tracked = !self.is_inert(ty, &mut visiting);
        self.memo.borrow_mut().insert(ty.clone(), tracked);
        tracked
    }

    /// A type is inert when it is provably a closed, immutable value.
    fn is_inert(&self, ty: &Ty, visiting: &mut Vec<String>) -> bool {
        match ty {
            t if t.is_scalar() => true,
            Ty::Symbol | Ty::Str | Ty::TypeTag => true,
            Ty::Tuple(items) => items.iter().all(|t| self.is_inert(t, visiting)),
            Ty::Union(items) => items.iter().all(|t| self.is_inert(t, visiting)),
            Ty::Named(name) => {
                // A struct that (transitively) contains itself is inert iff
                // every other field is.
                if visiting.iter().any(|v| v == name) {
                    return true;
                }
                let Some(def) = self.env.get(name) else {
                    return false;
                };
                if def.mutable {
                    return false;
                }
                visiting.push(name.clone());
                let inert = def.fields.iter().all(|(_, t)| self.is_inert(t, visiting));
                visiting.pop();
                inert
            }
            _ => false,
        }
    }
}

/// One-shot classification without memoization.
pub fn is_tracked_type(ty: &Ty, env: &TypeEnv) -> bool {
    TrackingClassifier::new(env).is_tracked(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::StructDef;

    fn env() -> TypeEnv {
        let mut env = TypeEnv::new();
        env.insert(
            StructDef::new("Point", false)
                .field("x", Ty::Float)
                .field("y", Ty::Float),
        );
        env.insert(StructDef::new("Counter", true).field("n", Ty::Int));
        env.insert(StructDef::new("Holder", false).field("items", Ty::array(Ty::Int)));
        env.insert(
            StructDef::new("Node", false)
                .field("value", Ty::Int)
                .field("next", Ty::Union(vec![Ty::Nothing, Ty::named("Node")])),
        );
        env
    }

    #[test]
    fn test_scalars_and_identifiers_are_untracked() {
        let env = env();
        for ty in [Ty::Int, Ty::Float, Ty::Bool, Ty::Nothing, Ty::Symbol, Ty::Str, Ty::TypeTag] {
            assert!(!is_tracked_type(&ty, &env), "{ty} should be untracked");
        }
    }

    #[test]
    fn test_containers_are_tracked() {
        let env = env();
        assert!(is_tracked_type(&Ty::array(Ty::Int), &env));
        assert!(is_tracked_type(&Ty::dict(Ty::Symbol, Ty::Int), &env));
        assert!(is_tracked_type(&Ty::reference(Ty::Int), &env));
        assert!(is_tracked_type(&Ty::Any, &env));
        assert!(is_tracked_type(&Ty::Fn, &env));
    }

    #[test]
    fn test_struct_classification() {
        let env = env();
        // Immutable with scalar fields: a closed value.
        assert!(!is_tracked_type(&Ty::named("Point"), &env));
        // Mutable struct.
        assert!(is_tracked_type(&Ty::named("Counter"), &env));
        // Immutable wrapper around mutable storage.
        assert!(is_tracked_type(&Ty::named("Holder"), &env));
        // Self-referential immutable list.
        assert!(!is_tracked_type(&Ty::named("Node"), &env));
        // Unknown names cannot be proven inert.
        assert!(is_tracked_type(&Ty::named("Mystery"), &env));
    }

    #[test]
    fn test_tuples_follow_their_elements() {
        let env = env();
        assert!(!is_tracked_type(&Ty::Tuple(vec![Ty::Int, Ty::named("Point")]), &env));
        assert!(is_tracked_type(&Ty::Tuple(vec![Ty::Int, Ty::array(Ty::Int)]), &env));
    }

    #[test]
    fn test_memoization_is_consistent() {
        let env = env();
        let classifier = TrackingClassifier::new(&env);
        let ty = Ty::named("Holder");
        assert_eq!(classifier.is_tracked(&ty), classifier.is_tracked(&ty));
    }
}
