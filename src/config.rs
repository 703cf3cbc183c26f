use crate::ir::ModuleId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How far the interprocedural driver recurses into callees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Check only the requested function; callees are never summarized.
    None,
    /// Check only the requested function, summarizing callees as needed.
    #[default]
    Function,
    /// Also check callees defined in the target module.
    Module,
    /// Also check callees defined in user (non-library) modules.
    User,
    /// Check every reachable callee. Analysis failures inside callees are
    /// tolerated.
    All,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::None => "none",
            Scope::Function => "function",
            Scope::Module => "module",
            Scope::User => "user",
            Scope::All => "all",
        }
    }

    /// Returns true if this scope walks the call graph.
    pub fn traverses_calls(&self) -> bool {
        matches!(self, Scope::Module | Scope::User | Scope::All)
    }

    /// Returns true if callee bodies may be summarized.
    pub fn allows_summaries(&self) -> bool {
        !matches!(self, Scope::None)
    }
}

/// What to assume about calls whose target cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownCallPolicy {
    /// Treat the call as a no-op unless one of its tracked arguments is
    /// visibly shared or still used afterwards.
    #[default]
    Permissive,
    /// Treat the call as writing every tracked argument and returning an
    /// alias of each of them.
    Conservative,
}

impl UnknownCallPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownCallPolicy::Permissive => "permissive",
            UnknownCallPolicy::Conservative => "conservative",
        }
    }
}

/// How much type information to request when fetching IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IrDetail {
    /// Types erased; every operand is tracked.
    Lowered,
    #[default]
    Typed,
}

/// Immutable analysis policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scope: Scope,
    pub max_summary_depth: usize,
    pub unknown_call_policy: UnknownCallPolicy,
    pub ir_detail: IrDetail,
    /// Emit per-statement trace events.
    pub debug: bool,
    /// Module used by [`Scope::Module`] filtering. Not part of the signature.
    pub target_module: Option<ModuleId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            max_summary_depth: 3,
            unknown_call_policy: UnknownCallPolicy::default(),
            ir_detail: IrDetail::default(),
            debug: false,
            target_module: None,
        }
    }
}

/// The policy-relevant part of a [`Config`], used in cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigSignature {
    pub scope: Scope,
    pub max_summary_depth: usize,
    pub unknown_call_policy: UnknownCallPolicy,
    pub ir_detail: IrDetail,
    pub debug: bool,
}

impl Config {
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_max_summary_depth(mut self, depth: usize) -> Self {
        self.max_summary_depth = depth;
        self
    }

    pub fn with_unknown_call_policy(mut self, policy: UnknownCallPolicy) -> Self {
        self.unknown_call_policy = policy;
        self
    }

    pub fn with_ir_detail(mut self, detail: IrDetail) -> Self {
        self.ir_detail = detail;
        self
    }

    pub fn with_target_module(mut self, module: impl Into<String>) -> Self {
        self.target_module = Some(ModuleId::new(module));
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn signature(&self) -> ConfigSignature {
        ConfigSignature {
            scope: self.scope,
            max_summary_depth: self.max_summary_depth,
            unknown_call_policy: self.unknown_call_policy,
            ir_detail: self.ir_detail,
            debug: self.debug,
        }
    }
}

// ============================================================================
// Config files
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct BorrowckConfigFile {
    #[serde(default)]
    pub check: Config,
}

pub const DEFAULT_CONFIG_FILE_NAME: &str = "ir-borrowck.toml";

pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut cur = Some(start_dir);
    while let Some(dir) = cur {
        let candidate = dir.join(DEFAULT_CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        cur = dir.parent();
    }
    None
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let cfg: BorrowckConfigFile = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(cfg.check)
}

pub fn load_config(explicit_path: Option<&Path>, start_dir: &Path) -> Result<Option<(PathBuf, Config)>> {
    if let Some(p) = explicit_path {
        let cfg = load_config_file(p)?;
        return Ok(Some((p.to_path_buf(), cfg)));
    }

    let Some(p) = find_config_file(start_dir) else {
        return Ok(None);
    };
    let cfg = load_config_file(&p)?;
    Ok(Some((p, cfg)))
}
