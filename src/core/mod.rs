//! Core domain models
//!
//! Step definitions, document classes, job/step state, and the pure plan
//! resolution that turns a catalog snapshot into an ordered step list.

pub mod condition;
pub mod config;
pub mod context;
pub mod document_class;
pub mod plan;
pub mod state;
pub mod step;

pub use condition::*;
pub use context::*;
pub use document_class::*;
pub use plan::*;
pub use state::*;
pub use step::*;
