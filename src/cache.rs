//! Specialization cache.
//!
//! Records "this specialization passed under this policy at this code
//! generation". A miss is analysed while holding one re-entrant lock for the
//! whole check, nested interprocedural recursion included, so concurrent
//! misses serialize instead of repeating work. Hits are served from a
//! per-thread mirror without touching the lock.

use crate::config::ConfigSignature;
use crate::ir::{Generation, Specialization};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, const_mutex};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Ids of caches that have not been dropped yet.
static LIVE_CACHES: Mutex<BTreeSet<u64>> = const_mutex(BTreeSet::new());

/// Bumped on every drop so each thread knows to prune its mirror.
static RETIRED: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
struct Mirror {
    entries: FxHashMap<(u64, Specialization), Stamp>,
    /// `RETIRED` as of the last prune.
    pruned_at: u64,
}

impl Mirror {
    fn prune_dead(&mut self) {
        let retired = RETIRED.load(Ordering::Acquire);
        if self.pruned_at == retired {
            return;
        }
        let live = LIVE_CACHES.lock();
        self.entries.retain(|(owner, _), _| live.contains(owner));
        self.pruned_at = retired;
    }
}

thread_local! {
    static MIRROR: RefCell<Mirror> = RefCell::new(Mirror::default());
}

/// What a completed entry was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stamp {
    pub generation: Generation,
    pub signature: ConfigSignature,
    /// Bumped whenever the effect registry changes.
    pub registry_epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntry {
    InProgress,
    Done(Stamp),
}

/// Outcome of claiming a specialization for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Already checked under the same stamp.
    Hit,
    /// Being checked further up this traversal; treated as safe.
    InProgress,
    /// The caller must analyse it and then call `complete` or `abandon`.
    Claimed,
}

#[derive(Debug)]
pub struct SpecializationCache {
    id: u64,
    analysis: ReentrantMutex<()>,
    entries: Mutex<FxHashMap<Specialization, CacheEntry>>,
}

impl Default for SpecializationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecializationCache {
    pub fn new() -> Self {
        let id = NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed);
        LIVE_CACHES.lock().insert(id);
        Self {
            id,
            analysis: ReentrantMutex::new(()),
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Lock-free hit check against this thread's mirror.
    pub fn fast_hit(&self, spec: &Specialization, stamp: &Stamp) -> bool {
        MIRROR.with(|mirror| {
            mirror
                .borrow()
                .entries
                .get(&(self.id, spec.clone()))
                .is_some_and(|cached| cached == stamp)
        })
    }

    /// Lock held for the whole miss path. Re-entrant on the same thread.
    pub fn analysis_lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.analysis.lock()
    }

    pub fn claim(&self, spec: &Specialization, stamp: &Stamp) -> Claim {
        let mut entries = self.entries.lock();
        match entries.get(spec) {
            Some(CacheEntry::Done(cached)) if cached == stamp => {
                self.mirror(spec, *stamp);
                Claim::Hit
            }
            Some(CacheEntry::InProgress) => Claim::InProgress,
            _ => {
                entries.insert(spec.clone(), CacheEntry::InProgress);
                Claim::Claimed
            }
        }
    }

    /// Replace the in-progress marker with a completed stamp.
    pub fn complete(&self, spec: &Specialization, stamp: Stamp) {
        self.entries
            .lock()
            .insert(spec.clone(), CacheEntry::Done(stamp));
        self.mirror(spec, stamp);
    }

    /// Drop the in-progress marker after a failed or violating check.
    pub fn abandon(&self, spec: &Specialization) {
        let mut entries = self.entries.lock();
        if entries.get(spec) == Some(&CacheEntry::InProgress) {
            entries.remove(spec);
        }
    }

    pub fn entry(&self, spec: &Specialization) -> Option<CacheEntry> {
        self.entries.lock().get(spec).copied()
    }

    /// Forget every completed entry. In-progress markers are kept.
    pub fn clear(&self) {
        self.entries
            .lock()
            .retain(|_, entry| *entry == CacheEntry::InProgress);
        let id = self.id;
        MIRROR.with(|mirror| {
            mirror
                .borrow_mut()
                .entries
                .retain(|(owner, _), _| *owner != id)
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mirror(&self, spec: &Specialization, stamp: Stamp) {
        MIRROR.with(|mirror| {
            let mut mirror = mirror.borrow_mut();
            mirror.prune_dead();
            mirror.entries.insert((self.id, spec.clone()), stamp);
        });
    }
}

impl Drop for SpecializationCache {
    fn drop(&mut self) {
        let id = self.id;
        LIVE_CACHES.lock().remove(&id);
        RETIRED.fetch_add(1, Ordering::Release);
        // Other threads prune lazily on their next insert. This thread's
        // mirror may already be gone during teardown.
        let _ = MIRROR.try_with(|mirror| {
            if let Ok(mut mirror) = mirror.try_borrow_mut() {
                mirror.entries.retain(|(owner, _), _| *owner != id);
            }
        });
    }
}
