// Gateway API key helpers
// Decision: keys are prefixed with "sdmg_" for identification
// Decision: full key is shown only once at creation, stored hashed in DB

use rand::Rng;
use sha2::{Digest, Sha256};

/// API key prefix for identification
pub const API_KEY_PREFIX: &str = "sdmg_";
/// Random portion: 20 bytes = 40 hex chars
const API_KEY_RANDOM_BYTES: usize = 20;
/// Full plaintext length: prefix + 40 hex chars
pub const API_KEY_LENGTH: usize = 45;
/// Characters of the plaintext kept for display
const DISPLAY_PREFIX_LEN: usize = 12;

/// Generated API key (full key shown only at creation)
#[derive(Debug)]
pub struct GeneratedApiKey {
    /// Full API key (sdmg_<40 hex chars>)
    pub key: String,
    /// SHA-256 hash for database storage
    pub key_hash: String,
    /// First 12 chars of the plaintext, for display
    pub key_prefix: String,
}

/// Generate a new API key
pub fn generate_api_key() -> GeneratedApiKey {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..API_KEY_RANDOM_BYTES).map(|_| rng.gen()).collect();

    let key = format!("{}{}", API_KEY_PREFIX, hex::encode(&random_bytes));
    let key_hash = hash_api_key(&key);
    let key_prefix = key[..DISPLAY_PREFIX_LEN].to_string();

    GeneratedApiKey {
        key,
        key_hash,
        key_prefix,
    }
}

/// Hash an API key for database storage/lookup
pub fn hash_api_key(key: &str) -> String {
    let hash = Sha256::digest(key.as_bytes());
    hex::encode(hash)
}

/// Validate API key format without touching the database
pub fn is_valid_api_key_format(key: &str) -> bool {
    if !key.starts_with(API_KEY_PREFIX) || key.len() != API_KEY_LENGTH {
        return false;
    }
    key[API_KEY_PREFIX.len()..]
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_api_key() {
        let key = generate_api_key();

        assert!(key.key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.key.len(), API_KEY_LENGTH);
        assert!(is_valid_api_key_format(&key.key));

        // Hash is deterministic
        assert_eq!(key.key_hash, hash_api_key(&key.key));

        // Display prefix is the first 12 chars of the plaintext
        assert_eq!(key.key_prefix.len(), 12);
        assert!(key.key.starts_with(&key.key_prefix));
    }

    #[test]
    fn test_different_keys() {
        let key1 = generate_api_key();
        let key2 = generate_api_key();

        assert_ne!(key1.key, key2.key);
        assert_ne!(key1.key_hash, key2.key_hash);
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        let key = "sdmg_0000000000000000000000000000000000000000";
        let hash = hash_api_key(key);

        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable across calls
        assert_eq!(hash, hash_api_key(key));
    }

    #[test]
    fn test_is_valid_api_key_format() {
        let key = generate_api_key();
        assert!(is_valid_api_key_format(&key.key));

        // Wrong prefix
        assert!(!is_valid_api_key_format(
            "sk_000000000000000000000000000000000000000000"
        ));

        // Too short / too long
        assert!(!is_valid_api_key_format("sdmg_1234"));
        assert!(!is_valid_api_key_format(&format!(
            "{}{}",
            API_KEY_PREFIX,
            "0".repeat(41)
        )));

        // Non-hex and uppercase bodies
        assert!(!is_valid_api_key_format(&format!(
            "{}{}",
            API_KEY_PREFIX,
            "g".repeat(40)
        )));
        assert!(!is_valid_api_key_format(&format!(
            "{}{}",
            API_KEY_PREFIX,
            "A".repeat(40)
        )));

        // No prefix at all
        assert!(!is_valid_api_key_format(&"0".repeat(45)));
    }
}
