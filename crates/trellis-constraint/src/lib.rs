//! Constraint solving for Trellis layouts.
//!
//! This crate implements:
//! - An incremental Cassowary simplex solver with edit variables
//! - Touch proxy resolution for gesture-driven constraints
//! - Priority handling, with required constraints never violated

mod cassowary;
mod config;
mod proxy;
mod tableau;

pub use cassowary::{FlushOutcome, Solver};
pub use config::SolverConfig;
pub use proxy::{EditVariableChange, ProxyDelegate, ProxyResolver, SolverBinding, TouchPoint};

pub use trellis_core::{
    AddConstraintError, Constraint, EditVariableError, EntityHandle, Expression, Property, Relation,
    RemoveConstraintError, SolverError, Strength, SuggestValueError, Target, Term, TouchId,
    Variable,
};
