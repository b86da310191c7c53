//! Admission decision logic and blacklist reconciliation.

mod decision;
mod engine;
pub mod reconciler;
pub mod window;

pub use decision::{Decision, UsageSnapshot};
pub use engine::{AdmissionEngine, AdmissionPolicy};
