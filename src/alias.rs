//! Alias classes over tracked handles.
//!
//! An arena-indexed union-find forest with one element per handle. Each
//! tracked handle also gets an *origin*: the binding it was derived from.
//! Two live handles in the same class with different origins are the only
//! thing the detector treats as aliasing.

use crate::handles::{Handle, HandleSpace};
use crate::ir::{IrFunction, StmtKind};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OriginId(pub u32);

/// Mutable union-find used while scanning a function.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u32).collect(),
            rank: vec![0; len],
        }
    }

    /// Representative of `x`, halving the path on the way up.
    pub fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    pub fn union(&mut self, a: u32, b: u32) -> u32 {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }
        let (hi, lo) = if self.rank[ra as usize] >= self.rank[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[lo as usize] = hi;
        if self.rank[hi as usize] == self.rank[lo as usize] {
            self.rank[hi as usize] += 1;
        }
        hi
    }
}

/// Frozen alias classes and origins for one function.
#[derive(Debug, Clone)]
pub struct AliasMap {
    class: Vec<u32>,
    origin: Vec<Option<OriginId>>,
    origin_names: Vec<String>,
}

impl AliasMap {
    pub fn same_class(&self, a: Handle, b: Handle) -> bool {
        if a.is_none() || b.is_none() {
            return false;
        }
        match (self.class.get(a.index()), self.class.get(b.index())) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn origin(&self, handle: Handle) -> Option<OriginId> {
        self.origin.get(handle.index()).copied().flatten()
    }

    /// Binding name of a handle's origin.
    pub fn origin_name(&self, handle: Handle) -> Option<&str> {
        self.origin(handle)
            .and_then(|o| self.origin_names.get(o.0 as usize))
            .map(String::as_str)
    }

    pub fn origin_count(&self) -> usize {
        self.origin_names.len()
    }

    /// Handles sharing a class with `handle`, `handle` included.
    pub fn class_members(&self, handle: Handle) -> Vec<Handle> {
        if handle.is_none() {
            return Vec::new();
        }
        let Some(class) = self.class.get(handle.index()) else {
            return Vec::new();
        };
        self.class
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != 0 && *c == class && self.origin[*i].is_some())
            .map(|(i, _)| Handle(i as u32))
            .collect()
    }
}

struct OriginTable {
    ids: FxHashMap<String, OriginId>,
    names: Vec<String>,
}

impl OriginTable {
    fn intern(&mut self, name: &str) -> OriginId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = OriginId(self.names.len() as u32);
        self.ids.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        id
    }
}

/// What the result of a call statement aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultAliases {
    pub sources: Vec<Handle>,
    /// An unnamed result takes the origin of its first source. Calls whose
    /// target is unknown produce a new binding instead.
    pub inherits_origin: bool,
}

impl ResultAliases {
    pub fn of(sources: Vec<Handle>) -> Self {
        Self {
            sources,
            inherits_origin: true,
        }
    }
}

/// Scan `function` once, forward, building alias classes.
///
/// `call_aliases[i]` describes what the result of call statement `i` aliases,
/// as resolved from its effect summary.
pub fn build_alias_classes(
    function: &IrFunction,
    handles: &HandleSpace,
    call_aliases: &[ResultAliases],
) -> AliasMap {
    let mut uf = UnionFind::new(handles.len());
    let mut origin: Vec<Option<OriginId>> = vec![None; handles.len()];
    let mut table = OriginTable {
        ids: FxHashMap::default(),
        names: Vec::new(),
    };

    for index in 0..handles.arg_count() {
        let handle = handles.of_arg(index);
        if handles.is_tracked(handle) {
            origin[handle.index()] = Some(table.intern(handles.name(handle)));
        }
    }

    for (idx, stmt) in function.stmts.iter().enumerate() {
        let result = handles.defined_by(idx);
        if result.is_none() {
            continue;
        }

        let (sources, inherits): (Vec<Handle>, bool) = match &stmt.kind {
            StmtKind::Copy(op) => (vec![handles.of_operand(op)], true),
            StmtKind::Phi(edges) => (
                edges.iter().map(|(_, op)| handles.of_operand(op)).collect(),
                true,
            ),
            StmtKind::New { args, .. } => (
                args.iter().map(|op| handles.of_operand(op)).collect(),
                false,
            ),
            StmtKind::Call { .. } => match call_aliases.get(idx) {
                Some(aliases) => (aliases.sources.clone(), aliases.inherits_origin),
                None => (Vec::new(), false),
            },
            _ => (Vec::new(), false),
        };
        let sources: Vec<Handle> = sources.into_iter().filter(|h| !h.is_none()).collect();

        for source in &sources {
            uf.union(result.0, source.0);
        }

        // Named results keep their binding as origin so a rebinding of the
        // same name (`x = push(x, 1)`) is not seen as a second owner.
        let assigned = match &stmt.binding {
            Some(name) => table.intern(name),
            None => match sources.iter().find_map(|s| origin[s.index()]) {
                Some(inherited) if inherits => inherited,
                _ => table.intern(handles.name(result)),
            },
        };
        origin[result.index()] = Some(assigned);
    }

    let class = (0..handles.len() as u32).map(|h| uf.find(h)).collect();
    tracing::trace!(callable = %function.callable, origins = table.names.len(), "alias classes built");

    AliasMap {
        class,
        origin,
        origin_names: table.names,
    }
}
