use thiserror::Error;

use crate::diagnostics::ViolationReport;

/// Result alias for errors emitted by the checker.
pub type CheckResult<T> = Result<T, BorrowCheckError>;

/// Structured error type for the checker and its IR front end.
///
/// `Violations` is the expected outcome of a failed check; every other variant
/// means the analysis itself could not run to completion.
#[derive(Debug, Error)]
pub enum BorrowCheckError {
    #[error("{0}")]
    Violations(ViolationReport),

    #[error("IR unavailable for `{callable}`: {reason}")]
    IrUnavailable { callable: String, reason: String },

    #[error("cannot model `{construct}` in `{callable}`")]
    Unmodelable { callable: String, construct: String },

    #[error("malformed IR in `{callable}`: {reason}")]
    InvalidIr { callable: String, reason: String },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("{0}")]
    Other(String),
}

impl BorrowCheckError {
    pub fn unavailable(callable: impl ToString, reason: impl Into<String>) -> Self {
        Self::IrUnavailable {
            callable: callable.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unmodelable(callable: impl ToString, construct: impl Into<String>) -> Self {
        Self::Unmodelable {
            callable: callable.to_string(),
            construct: construct.into(),
        }
    }

    pub fn invalid_ir(callable: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidIr {
            callable: callable.to_string(),
            reason: reason.into(),
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True when the analysis could not be carried out, as opposed to having
    /// found violations.
    pub fn is_analysis_infeasible(&self) -> bool {
        matches!(
            self,
            Self::IrUnavailable { .. } | Self::Unmodelable { .. } | Self::InvalidIr { .. }
        )
    }

    /// The violation report, if this error carries one.
    pub fn violations(&self) -> Option<&ViolationReport> {
        match self {
            Self::Violations(report) => Some(report),
            _ => None,
        }
    }
}
