//! kgflow hooks - knowledge hooks over the store
//!
//! A hook pairs a predicate over the graph (ASK, threshold, result delta,
//! shape conformance) with the pipelines to run when it fires. The
//! [`HookEngine`] evaluates every hook on each tick and appends a receipt
//! per firing.

pub mod discover;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod model;

pub use discover::{discover, read_hook};
pub use engine::{Evaluation, FiredHook, HookAction, HookEngine, HookFailure, HookState, TickReport};
pub use error::HookError;
pub use evaluate::{check, fingerprint, Check};
pub use model::{Comparator, Constraint, Hook, Predicate, ThresholdTest};
