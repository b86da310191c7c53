//! API key generation.

use rand::RngCore;

/// Byte length of generated API keys before hex encoding.
pub const DEFAULT_KEY_BYTES: usize = 32;

/// Generate a random API key: `len` random bytes, hex-encoded.
pub fn generate_api_key(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
