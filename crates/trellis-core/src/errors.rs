//! Error types for the Trellis resolver.

use thiserror::Error;

/// Top-level error type for solver operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error(transparent)]
    AddConstraint(#[from] AddConstraintError),

    #[error(transparent)]
    RemoveConstraint(#[from] RemoveConstraintError),

    #[error(transparent)]
    EditVariable(#[from] EditVariableError),

    #[error(transparent)]
    SuggestValue(#[from] SuggestValueError),
}

/// Errors when adding a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddConstraintError {
    #[error("The constraint has already been added to the solver")]
    DuplicateConstraint,

    /// Only possible for required constraints.
    #[error("The required constraint cannot be satisfied")]
    UnsatisfiableConstraint,

    #[error("Internal solver error: {0}")]
    Internal(&'static str),
}

/// Errors when removing a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoveConstraintError {
    #[error("The constraint is not in the solver")]
    UnknownConstraint,

    #[error("Internal solver error: {0}")]
    Internal(&'static str),
}

/// Errors when adding or removing an edit variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditVariableError {
    #[error("The variable is already an edit variable")]
    DuplicateEditVariable,

    #[error("The variable is not an edit variable")]
    UnknownEditVariable,

    #[error("Edit variables cannot have required strength")]
    BadRequiredStrength,

    #[error("Internal solver error: {0}")]
    Internal(&'static str),
}

/// Errors when suggesting a value for an edit variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuggestValueError {
    #[error("The variable is not an edit variable")]
    UnknownEditVariable,

    #[error("Internal solver error: {0}")]
    Internal(&'static str),
}

impl From<RemoveConstraintError> for EditVariableError {
    fn from(err: RemoveConstraintError) -> Self {
        match err {
            RemoveConstraintError::UnknownConstraint => {
                EditVariableError::Internal("edit constraint missing from the solver")
            }
            RemoveConstraintError::Internal(msg) => EditVariableError::Internal(msg),
        }
    }
}

impl From<AddConstraintError> for EditVariableError {
    fn from(err: AddConstraintError) -> Self {
        match err {
            AddConstraintError::DuplicateConstraint => EditVariableError::DuplicateEditVariable,
            AddConstraintError::UnsatisfiableConstraint => {
                EditVariableError::Internal("non-required edit constraint rejected")
            }
            AddConstraintError::Internal(msg) => EditVariableError::Internal(msg),
        }
    }
}
