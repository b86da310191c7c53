//! Time source abstraction.

use chrono::{DateTime, Utc};

/// Source of "now" for components that stamp their own operations.
///
/// Engine methods take an explicit timestamp so tests can drive time
/// directly; the sweeper and the binary read it from a `Clock`.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
