//! Per-key registry state and key issuance.

mod keygen;
mod record;

pub use keygen::{generate_api_key, DEFAULT_KEY_BYTES};
pub use record::{KeyRecord, RecordChange, RecordFilter};
