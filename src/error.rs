//! Error types for reshop

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, analyzing, or reformulating a model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Caller passed a value that does not make sense for the operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A numerical or enum value is outside its legal range
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A variable/equation/node index is out of range
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    /// An object was used before its setup was completed
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Structurally wrong EMP input (cycle, bad root, bad LCA, foreign equation)
    #[error("incorrect EMP input: {issues} issue(s) found; first: {first}")]
    EmpIncorrectInput {
        /// Number of diagnostics raised while checking the graph
        issues: usize,
        /// First diagnostic message, for direct display
        first: String,
    },

    /// Syntax error caught upstream and surfaced here
    #[error("incorrect EMP syntax: {0}")]
    EmpIncorrectSyntax(String),

    /// Internal invariant violation; report as a bug
    #[error("EMP runtime error (please report as a bug): {0}")]
    EmpRuntimeError(String),

    /// Two parallel structures have different sizes
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionDifferent {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        got: usize,
    },

    /// Data that should agree does not
    #[error("inconsistency: {0}")]
    Inconsistency(String),

    /// Data present where none was expected, or of an unexpected shape
    #[error("unexpected data: {0}")]
    UnexpectedData(String),

    /// A reformulation or analysis path that is not wired
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Allocation failure; the model is left in a defined but partial state
    #[error("insufficient memory: {0}")]
    InsufficientMemory(String),

    /// NaN or infinity where a finite value is required
    #[error("math error: {0}")]
    MathError(String),

    /// The problem was detected to be unbounded
    #[error("model unbounded: {0}")]
    ModelUnbounded(String),

    /// The problem was detected to be infeasible
    #[error("infeasible: {0}")]
    Infeasible(String),

    /// A required parameter is missing from an OVF definition
    #[error("missing parameter in OVF definition: {0}")]
    OvfMissingParam(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid value error
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Create an index out of range error
    pub fn index_out_of_range(msg: impl Into<String>) -> Self {
        Self::IndexOutOfRange(msg.into())
    }

    /// Create a runtime (internal invariant) error
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::EmpRuntimeError(msg.into())
    }

    /// Create a dimension mismatch error
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionDifferent { expected, got }
    }

    /// Create a not implemented error
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }
}

/// Severity of a diagnostic raised during graph checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    /// Advisory; does not prevent processing
    Warning,
    /// Blocks processing once the current pass completes
    Error,
}

/// A single diagnostic naming the offending node and the rule violated
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    /// Severity of the finding
    pub severity: Severity,
    /// Stable message, suitable for test matching
    pub message: String,
}

/// Collector for diagnostics raised while visiting a graph
///
/// The analyzer visits every node before failing, so the caller sees the
/// total number of issues rather than only the first one.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error-severity diagnostic
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(target: "reshop::empdag", "{message}");
        self.items.push(Diagnostic {
            severity: Severity::Error,
            message,
        });
    }

    /// Record a warning-severity diagnostic
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "reshop::empdag", "{message}");
        self.items.push(Diagnostic {
            severity: Severity::Warning,
            message,
        });
    }

    /// Number of error-severity diagnostics
    pub fn error_count(&self) -> usize {
        self.items
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// All recorded diagnostics, in emission order
    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    /// True if no error-severity diagnostic was recorded
    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }

    /// Fold the collected errors into a single result
    ///
    /// Returns `Ok(())` when clean, otherwise `EmpIncorrectInput` carrying
    /// the issue count and the first error message.
    pub fn into_result(self) -> Result<()> {
        let issues = self.error_count();
        if issues == 0 {
            return Ok(());
        }
        let first = self
            .items
            .into_iter()
            .find(|d| d.severity == Severity::Error)
            .map(|d| d.message)
            .unwrap_or_default();
        Err(Error::EmpIncorrectInput { issues, first })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::dimension_mismatch(3, 5);
        assert_eq!(e.to_string(), "dimension mismatch: expected 3, got 5");
    }

    #[test]
    fn test_diagnostics_clean() {
        let mut diags = Diagnostics::new();
        diags.warn("row 2 is empty");
        assert!(diags.is_clean());
        assert!(diags.into_result().is_ok());
    }

    #[test]
    fn test_diagnostics_aggregate() {
        let mut diags = Diagnostics::new();
        diags.error("MP(a): cycle detected");
        diags.error("MP(b): no root");
        assert_eq!(diags.error_count(), 2);
        match diags.into_result() {
            Err(Error::EmpIncorrectInput { issues, first }) => {
                assert_eq!(issues, 2);
                assert_eq!(first, "MP(a): cycle detected");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
