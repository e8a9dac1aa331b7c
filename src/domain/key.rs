//! Filter key generation.
//!
//! Keys are opaque, collision-resistant identifiers: 16 bytes from the
//! operating system CSPRNG, hex-encoded to 32 characters.

use rand::rngs::OsRng;
use rand::RngCore;

/// Length of an encoded filter key in characters.
pub const FILTER_KEY_LEN: usize = 32;

/// Generate a new filter key.
pub fn generate_filter_key() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
