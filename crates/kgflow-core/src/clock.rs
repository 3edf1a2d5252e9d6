//! Time source for executions.
//!
//! Everything that stamps a time (step results, receipts, the `date` filter)
//! reads it from a `Clock`. `KGFLOW_NOW` pins the clock for reproducible runs.

use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const NOW_ENV: &str = "KGFLOW_NOW";

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    /// Whether this clock is pinned (deterministic).
    fn is_fixed(&self) -> bool {
        false
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn parse(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }

    fn is_fixed(&self) -> bool {
        true
    }
}

/// System clock unless `KGFLOW_NOW` holds an RFC 3339 timestamp.
pub fn clock_from_env() -> SharedClock {
    match std::env::var(NOW_ENV) {
        Ok(v) => match FixedClock::parse(&v) {
            Some(c) => Arc::new(c),
            None => {
                tracing::warn!("ignoring unparseable {}={}", NOW_ENV, v);
                Arc::new(SystemClock)
            }
        },
        Err(_) => Arc::new(SystemClock),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_parses_rfc3339() {
        let c = FixedClock::parse("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(c.now().to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert!(c.is_fixed());
        assert!(FixedClock::parse("yesterday").is_none());
    }
}
