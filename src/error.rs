//! Error types for the CPQ engine
//!
//! Variants follow the failure classes the engine distinguishes:
//! - construction errors (invalid model, group cardinality, tiers) fail fast
//! - input errors (unknown option, bad quantity, wrong model) reject one operation
//! - compilation errors (unparsable or unresolvable rule text)
//! - evaluation and analysis errors surfaced to the caller
//!
//! Violations and conflicts are NOT errors; they are returned as structured
//! results.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// CPQ engine errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Invalid group '{group}': {reason}")]
    InvalidGroup { group: String, reason: String },

    #[error("Invalid volume tier: {0}")]
    InvalidTier(String),

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Option is inactive: {0}")]
    InactiveOption(String),

    #[error("Invalid quantity {quantity} for option {option}")]
    InvalidQuantity { option: String, quantity: i64 },

    #[error("Configuration belongs to model '{actual}', expected '{expected}'")]
    ModelMismatch { expected: String, actual: String },

    #[error("Option is not selected: {0}")]
    SelectionNotFound(String),

    #[error("Option selected more than once: {0}")]
    DuplicateSelection(String),

    #[error("Expression parse error: {0}")]
    ExprParse(String),

    #[error("Unknown identifier '{identifier}' in expression: {expression}")]
    UnknownIdentifier {
        identifier: String,
        expression: String,
    },

    #[error("Variable '{name}' already declared as {existing}, cannot redeclare as {requested}")]
    VariableTypeConflict {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Compilation error in rule '{rule}': {reason}")]
    Compilation { rule: String, reason: String },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_norway::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors caused by the caller's input rather than the model
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownOption(_)
                | Error::InactiveOption(_)
                | Error::InvalidQuantity { .. }
                | Error::ModelMismatch { .. }
                | Error::SelectionNotFound(_)
                | Error::DuplicateSelection(_)
        )
    }

    /// True for compile-time failures of a single rule expression
    pub fn is_compilation_error(&self) -> bool {
        matches!(
            self,
            Error::ExprParse(_)
                | Error::UnknownIdentifier { .. }
                | Error::VariableTypeConflict { .. }
                | Error::Compilation { .. }
        )
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::Evaluation(format!("lock poisoned: {}", e))
    }
}
