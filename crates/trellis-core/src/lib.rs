//! Core types for the Trellis layout resolver.
//!
//! This crate provides the value types shared between the solver and its
//! callers:
//! - Variable identity (entity or touch target plus property)
//! - Linear expressions and prioritized constraints
//! - Proxy resolution of touch-relative constraints
//! - Error types

pub mod constraint;
pub mod errors;
pub mod types;

pub use constraint::*;
pub use errors::*;
pub use types::*;
