//! Top-level entry point and interprocedural driver.

use crate::analysis::analyze_function;
use crate::cache::{Claim, SpecializationCache, Stamp};
use crate::config::{Config, Scope};
use crate::detector::detect_violations;
use crate::diagnostics::{Violation, ViolationReport};
use crate::effects::{EffectRegistry, EffectSpec};
use crate::error::{BorrowCheckError, CheckResult};
use crate::instrument_block;
use crate::ir::{
    CallTarget, CallableRef, Generation, IrFunction, IrProvider, ModuleId, ModuleKind,
    Specialization, StmtKind,
};
use crate::summarize::{NormalizedCall, SummaryCache, Summarizer};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters accumulated over the lifetime of a [`Checker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckStats {
    pub checks: u64,
    pub functions_analysed: u64,
    pub cache_hits: u64,
    pub summaries_computed: u64,
}

/// Per-check traversal state.
struct Traversal<'a> {
    config: &'a Config,
    stamp: Stamp,
    /// Module used by [`Scope::Module`].
    home: ModuleId,
    violations: Vec<Violation>,
}

/// Checks specializations against an [`IrProvider`], caching clean results.
pub struct Checker {
    provider: Arc<dyn IrProvider>,
    registry: EffectRegistry,
    registry_epoch: AtomicU64,
    summaries: SummaryCache,
    cache: SpecializationCache,
    last_generation: AtomicU64,
    checks: AtomicU64,
    functions_analysed: AtomicU64,
    cache_hits: AtomicU64,
}

impl Checker {
    /// A checker with the built-in `core` effect registry.
    pub fn new(provider: Arc<dyn IrProvider>) -> Self {
        Self::with_registry(provider, EffectRegistry::with_builtins())
    }

    pub fn with_registry(provider: Arc<dyn IrProvider>, registry: EffectRegistry) -> Self {
        Self {
            provider,
            registry,
            registry_epoch: AtomicU64::new(0),
            summaries: SummaryCache::new(),
            cache: SpecializationCache::new(),
            last_generation: AtomicU64::new(0),
            checks: AtomicU64::new(0),
            functions_analysed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> &Arc<dyn IrProvider> {
        &self.provider
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    /// Add or replace an effect spec. Cached results no longer apply.
    pub fn register_effect(&self, callable: CallableRef, spec: EffectSpec) -> Option<EffectSpec> {
        let _guard = self.cache.analysis_lock();
        let previous = self.registry.register(callable, spec);
        self.registry_epoch.fetch_add(1, Ordering::Relaxed);
        self.summaries.clear();
        previous
    }

    pub fn cache(&self) -> &SpecializationCache {
        &self.cache
    }

    pub fn summaries(&self) -> &SummaryCache {
        &self.summaries
    }

    pub fn stats(&self) -> CheckStats {
        CheckStats {
            checks: self.checks.load(Ordering::Relaxed),
            functions_analysed: self.functions_analysed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            summaries_computed: self.summaries.computed(),
        }
    }

    /// Check `spec` at the provider's current generation.
    pub fn check(&self, spec: &Specialization, config: &Config) -> CheckResult<()> {
        self.check_at(spec, config, self.provider.generation())
    }

    /// Check `spec` under `config` at code generation `generation`.
    ///
    /// Returns [`BorrowCheckError::Violations`] with every violation found in
    /// `spec` and, when the scope walks the call graph, in its callees.
    pub fn check_at(
        &self,
        spec: &Specialization,
        config: &Config,
        generation: Generation,
    ) -> CheckResult<()> {
        self.checks.fetch_add(1, Ordering::Relaxed);
        let stamp = Stamp {
            generation,
            signature: config.signature(),
            registry_epoch: self.registry_epoch.load(Ordering::Relaxed),
        };

        if self.cache.fast_hit(spec, &stamp) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%spec, "cache hit");
            return Ok(());
        }

        let mut traversal = Traversal {
            config,
            stamp,
            home: config
                .target_module
                .clone()
                .unwrap_or_else(|| spec.callable.module.clone()),
            violations: Vec::new(),
        };

        let result = {
            let _guard = self.cache.analysis_lock();
            self.purge_if_new(generation);
            self.visit(spec, &mut traversal)
        };

        let stats = self.stats();
        tracing::debug!(
            %spec,
            violations = traversal.violations.len(),
            analysed = stats.functions_analysed,
            hits = stats.cache_hits,
            summaries = stats.summaries_computed,
            "check finished"
        );

        result?;
        if traversal.violations.is_empty() {
            Ok(())
        } else {
            Err(BorrowCheckError::Violations(ViolationReport::new(
                spec.to_string(),
                traversal.violations,
            )))
        }
    }

    fn purge_if_new(&self, generation: Generation) {
        let previous = self.last_generation.fetch_max(generation.0, Ordering::Relaxed);
        if generation.0 > previous {
            let purged = self.summaries.purge_stale(generation);
            if purged > 0 {
                tracing::debug!(%generation, purged, "dropped stale summaries");
            }
        }
    }

    /// Check one specialization, recursing into callees when the scope asks
    /// for it. Must run under the analysis lock.
    fn visit(&self, spec: &Specialization, traversal: &mut Traversal<'_>) -> CheckResult<()> {
        match self.cache.claim(spec, &traversal.stamp) {
            Claim::Hit => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Claim::InProgress => {
                tracing::trace!(%spec, "already being checked; assuming safe");
                return Ok(());
            }
            Claim::Claimed => {}
        }

        let before = traversal.violations.len();
        let result = self.analyse(spec, traversal);
        match &result {
            Ok(()) if traversal.violations.len() == before => {
                self.cache.complete(spec, traversal.stamp);
            }
            _ => self.cache.abandon(spec),
        }
        result
    }

    fn analyse(&self, spec: &Specialization, traversal: &mut Traversal<'_>) -> CheckResult<()> {
        let config = traversal.config;
        let function = self.provider.fetch(spec, config.ir_detail)?;
        self.functions_analysed.fetch_add(1, Ordering::Relaxed);

        let summarizer = Summarizer::new(
            self.provider.as_ref(),
            &self.registry,
            &self.summaries,
            config,
            traversal.stamp.generation,
        );
        let facts = analyze_function(function.clone(), &summarizer, config.max_summary_depth)?;
        let found = instrument_block!("detect", { detect_violations(&facts) });

        traversal.violations.extend(found);

        if !config.scope.traverses_calls() {
            return Ok(());
        }

        for callee in self.callees(&function)? {
            if !self.in_scope(&callee.callable, traversal) {
                continue;
            }
            match self.visit(&callee, traversal) {
                Ok(()) => {}
                Err(err) if config.scope == Scope::All && err.is_analysis_infeasible() => {
                    tracing::debug!(%callee, error = %err, "skipping callee that cannot be analysed");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Distinct statically resolved callees that have no registry entry.
    fn callees(&self, function: &IrFunction) -> CheckResult<Vec<Specialization>> {
        let mut out: Vec<Specialization> = Vec::new();
        for (idx, stmt) in function.stmts.iter().enumerate() {
            let StmtKind::Call {
                target: CallTarget::Static(callee),
                args,
            } = &stmt.kind
            else {
                continue;
            };
            if self.registry.contains(callee) {
                continue;
            }
            let call = NormalizedCall::normalize(function, idx, args)?;
            if call.is_variadic() {
                continue;
            }
            let spec = Specialization::new(callee.clone(), call.arg_types());
            if !out.contains(&spec) {
                out.push(spec);
            }
        }
        Ok(out)
    }

    fn in_scope(&self, callee: &CallableRef, traversal: &Traversal<'_>) -> bool {
        match traversal.config.scope {
            Scope::None | Scope::Function => false,
            Scope::Module => callee.module == traversal.home,
            Scope::User => self.provider.module_kind(&callee.module) == ModuleKind::User,
            Scope::All => true,
        }
    }
}
