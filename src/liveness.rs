//! Backward liveness of tracked handles.

use crate::handles::{Handle, HandleSpace};
use crate::ir::{BlockId, IrFunction, StmtKind};
use rustc_hash::FxHashSet;

pub type HandleSet = FxHashSet<Handle>;

/// Tracked handles a statement reads. Phi statements read nothing here; their
/// operands are used on the incoming edges.
pub fn uses_of(function: &IrFunction, handles: &HandleSpace, stmt: usize) -> Vec<Handle> {
    let kind = &function.stmts[stmt].kind;
    if kind.is_phi() {
        return Vec::new();
    }
    let mut out: Vec<Handle> = Vec::new();
    for op in kind.operands() {
        let h = handles.of_operand(op);
        if !h.is_none() && !out.contains(&h) {
            out.push(h);
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct Liveness {
    pub live_in: Vec<HandleSet>,
    pub live_out: Vec<HandleSet>,
}

impl Liveness {
    pub fn compute(function: &IrFunction, handles: &HandleSpace) -> Self {
        let n = function.blocks.len();
        let mut gen_sets = vec![HandleSet::default(); n];
        let mut kill_sets = vec![HandleSet::default(); n];
        // Phi operands are live on the edge from their predecessor only.
        let mut edge_uses = vec![HandleSet::default(); n];

        for block in &function.blocks {
            let b = block.id.index();
            for idx in block.stmts.clone() {
                for h in uses_of(function, handles, idx) {
                    if !kill_sets[b].contains(&h) {
                        gen_sets[b].insert(h);
                    }
                }
                let def = handles.defined_by(idx);
                if !def.is_none() {
                    kill_sets[b].insert(def);
                }

                if let StmtKind::Phi(edges) = &function.stmts[idx].kind {
                    for (pred, op) in edges {
                        let h = handles.of_operand(op);
                        if !h.is_none() {
                            edge_uses[pred.index()].insert(h);
                        }
                    }
                }
            }
        }

        // Post-order first for fast convergence, then anything unreachable.
        let mut order: Vec<BlockId> = function.reverse_post_order();
        order.reverse();
        let mut seen = vec![false; n];
        for b in &order {
            seen[b.index()] = true;
        }
        order.extend((0..n).filter(|b| !seen[*b]).map(BlockId));

        let mut live_in = vec![HandleSet::default(); n];
        let mut live_out = vec![HandleSet::default(); n];
        let mut rounds = 0usize;
        let mut changed = true;
        while changed {
            changed = false;
            rounds += 1;
            for &block in &order {
                let b = block.index();
                let mut out = edge_uses[b].clone();
                for succ in &function.blocks[b].succs {
                    out.extend(live_in[succ.index()].iter().copied());
                }

                let mut inn = gen_sets[b].clone();
                inn.extend(out.iter().filter(|h| !kill_sets[b].contains(*h)).copied());

                if inn != live_in[b] {
                    live_in[b] = inn;
                    changed = true;
                }
                live_out[b] = out;
            }
        }

        tracing::trace!(callable = %function.callable, rounds, "liveness converged");
        Self { live_in, live_out }
    }

    pub fn live_in(&self, block: BlockId) -> &HandleSet {
        &self.live_in[block.index()]
    }

    pub fn live_out(&self, block: BlockId) -> &HandleSet {
        &self.live_out[block.index()]
    }

    /// `(live_after, live_during)` for every statement of `block`, in
    /// statement order.
    pub fn statement_sets(
        &self,
        function: &IrFunction,
        handles: &HandleSpace,
        block: BlockId,
    ) -> Vec<(HandleSet, HandleSet)> {
        let range = function.block(block).stmts.clone();
        let mut live = self.live_out(block).clone();
        let mut sets = Vec::with_capacity(range.len());
        for idx in range.rev() {
            let uses = uses_of(function, handles, idx);
            let after = live.clone();
            let mut during = live.clone();
            during.extend(uses.iter().copied());
            sets.push((after, during));

            live.remove(&handles.defined_by(idx));
            live.extend(uses);
        }
        sets.reverse();
        sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse::parse_module;
    use crate::ir::TypeEnv;
    use crate::type_classifier::TrackingClassifier;

    fn function(src: &str) -> IrFunction {
        parse_module(src).unwrap().functions.remove(0)
    }

    #[test]
    fn straight_line_liveness() {
        let f = function(
            "fn f(xs: Array<Int>)
               %1 = copy xs : Array<Int> !ys
               %2 = call core.length(xs) : Int
               return %1
             end",
        );
        let env = TypeEnv::new();
        let handles = HandleSpace::new(&f, &TrackingClassifier::new(&env));
        let live = Liveness::compute(&f, &handles);
        let xs = handles.of_arg(0);
        let ys = handles.of_stmt(0);

        assert_eq!(live.live_in(BlockId(0)), &HandleSet::from_iter([xs]));
        let sets = live.statement_sets(&f, &handles, BlockId(0));
        // After the copy both xs (read by length) and ys (returned) are live.
        assert_eq!(sets[0].0, HandleSet::from_iter([xs, ys]));
        // During `length(xs)` xs is used; afterwards only ys remains.
        assert_eq!(sets[1].0, HandleSet::from_iter([ys]));
        assert_eq!(sets[1].1, HandleSet::from_iter([xs, ys]));
    }

    #[test]
    fn phi_operands_are_live_on_their_edge_only() {
        let f = function(
            "fn f(c: Bool, a: Array<Int>, b: Array<Int>)
               branch c bb1 bb2
             bb1:
               goto bb3
             bb2:
               goto bb3
             bb3:
               %4 = phi [bb1: a, bb2: b] : Array<Int> !r
               return %4
             end",
        );
        let env = TypeEnv::new();
        let handles = HandleSpace::new(&f, &TrackingClassifier::new(&env));
        let live = Liveness::compute(&f, &handles);
        let (a, b) = (handles.of_arg(1), handles.of_arg(2));

        assert_eq!(live.live_out(BlockId(1)), &HandleSet::from_iter([a]));
        assert_eq!(live.live_out(BlockId(2)), &HandleSet::from_iter([b]));
        assert!(live.live_in(BlockId(3)).is_empty());
        assert_eq!(live.live_in(BlockId(0)), &HandleSet::from_iter([a, b]));
    }

    #[test]
    fn loops_reach_a_fixpoint() {
        let f = function(
            "fn f(xs: Array<Int>, n: Int)
               goto bb1
             bb1:
               %2 = phi [bb0: xs, bb2: %4] : Array<Int> !acc
               branch n bb2 bb3
             bb2:
               %4 = call core.push(%2, n) : Array<Int> !acc
               goto bb1
             bb3:
               return %2
             end",
        );
        let env = TypeEnv::new();
        let handles = HandleSpace::new(&f, &TrackingClassifier::new(&env));
        let live = Liveness::compute(&f, &handles);
        let acc = handles.of_stmt(1);
        let next = handles.of_stmt(3);

        assert!(live.live_in(BlockId(2)).contains(&acc));
        assert!(live.live_out(BlockId(2)).contains(&next));
        assert!(!live.live_in(BlockId(1)).contains(&acc));
    }
}
