use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

/// Class of ownership bug a violation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A write through one binding is observable through another live one.
    WriteConflict,
    /// A value is consumed while another live binding still observes it.
    ConsumeConflict,
    /// A value is stored somewhere longer-lived and still used afterwards.
    Escape,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::WriteConflict => "write_conflict",
            ViolationKind::ConsumeConflict => "consume_conflict",
            ViolationKind::Escape => "escape",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort source location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLocation {
    Line { file: Option<String>, line: u32 },
    /// No line information; the lowered statement is shown instead.
    Lowered(String),
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Line {
                file: Some(file),
                line,
            } => write!(f, "{file}:{line}"),
            SourceLocation::Line { file: None, line } => write!(f, "line {line}"),
            SourceLocation::Lowered(stmt) => write!(f, "`{stmt}`"),
        }
    }
}

/// Enough structure for a renderer to underline exactly one occurrence of
/// the offending argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationDetail {
    pub kind: ViolationKind,
    /// Binding being written or consumed.
    pub primary: String,
    /// The other live binding that observes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    /// Call expression the argument appears in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_expr: Option<String>,
    /// 1-based position within `parent_expr`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg_position: Option<usize>,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Violation {
    /// Function the statement belongs to, as `module.name`.
    pub function: String,
    /// 1-based statement number, matching `%N` in the lowered form.
    pub stmt: usize,
    pub message: String,
    pub location: SourceLocation,
    /// Source text of the offending statement, or its lowered form.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ViolationDetail>,
}

impl Violation {
    pub fn kind(&self) -> Option<ViolationKind> {
        self.detail.as_ref().map(|d| d.kind)
    }
}

pub fn violation_message(kind: ViolationKind, primary: &str, secondary: Option<&str>) -> String {
    match (kind, secondary) {
        (ViolationKind::WriteConflict, Some(other)) => {
            format!("cannot write `{primary}`: value is aliased by another live binding `{other}`")
        }
        (ViolationKind::WriteConflict, None) => {
            format!("cannot write `{primary}`: value is aliased by another live binding")
        }
        (ViolationKind::ConsumeConflict, Some(other)) => {
            format!("cannot consume `{primary}`: value is aliased by another live binding `{other}`")
        }
        (ViolationKind::ConsumeConflict, None) => {
            format!("cannot consume `{primary}`: value is aliased by another live binding")
        }
        (ViolationKind::Escape, _) => {
            format!("`{primary}` escapes here but it, or an alias, is used later")
        }
    }
}

/// Every violation found in one check, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct ViolationReport {
    /// Specialization that was checked.
    pub callable: String,
    pub violations: Vec<Violation>,
}

impl ViolationReport {
    pub fn new(callable: impl Into<String>, violations: Vec<Violation>) -> Self {
        Self {
            callable: callable.into(),
            violations,
        }
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter()
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations
            .iter()
            .filter(|v| v.kind() == Some(kind))
            .count()
    }

    /// Multi-line message listing every violation.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let noun = if self.len() == 1 { "violation" } else { "violations" };
        let _ = writeln!(out, "{} borrow {noun} in {}", self.len(), self.callable);
        for v in &self.violations {
            let _ = writeln!(
                out,
                "  {} %{} at {}: {}",
                v.function, v.stmt, v.location, v.message
            );
            let _ = writeln!(out, "    | {}", v.text);
        }
        out.truncate(out.trim_end().len());
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ViolationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
