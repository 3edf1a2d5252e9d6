//! kgflow core - error taxonomy, configuration, clock, and vocabulary

pub mod clock;
pub mod config;
pub mod error;
pub mod types;
pub mod vocab;

pub use clock::{clock_from_env, Clock, FixedClock, SharedClock, SystemClock};
pub use config::EngineConfig;
pub use error::{Error, ExitCode, QueryErrorKind, Result, StepErrorKind};
pub use types::*;
