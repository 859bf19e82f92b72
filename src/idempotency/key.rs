use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const KEY_PREFIX: &str = "idem";
pub const MIN_KEY_LENGTH: usize = 10;
pub const MAX_KEY_LENGTH: usize = 255;

/// Returns true when the key is 10..=255 characters of `[A-Za-z0-9_-]`.
pub fn validate_key(key: &str) -> bool {
    if key.trim().is_empty() {
        return false;
    }

    if key.len() < MIN_KEY_LENGTH || key.len() > MAX_KEY_LENGTH {
        return false;
    }

    key.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Mints a key of the form `idem_<unix-millis>_<32 hex chars>`.
///
/// The suffix is 128 random bits. Uniqueness is a convenience, not a secrecy guarantee.
pub fn generate_key() -> String {
    generate_key_at(Utc::now())
}

/// Mints a key using the given wall-clock time.
pub fn generate_key_at(timestamp: DateTime<Utc>) -> String {
    let suffix = hex::encode(Uuid::new_v4().as_bytes());
    format!("{}_{}_{}", KEY_PREFIX, timestamp.timestamp_millis(), suffix)
}

/// Maps an arbitrary client-provided string onto a valid key.
/// The same client string always yields the same key.
pub fn normalize_client_key(client_key: &str) -> Option<String> {
    if client_key.trim().is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(client_key.as_bytes());
    let hash_hex = hex::encode(hasher.finalize());

    Some(format!("{}_{}", KEY_PREFIX, hash_hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_bounds() {
        assert!(!validate_key("abcdefghi"));
        assert!(validate_key("abcdefghij"));
        assert!(validate_key(&"a".repeat(255)));
        assert!(!validate_key(&"a".repeat(256)));
    }

    #[test]
    fn test_rejects_empty_and_whitespace() {
        assert!(!validate_key(""));
        assert!(!validate_key("          "));
    }

    #[test]
    fn test_character_set() {
        assert!(validate_key("order-2024_ABC-xyz"));
        assert!(!validate_key("order 2024 abc"));
        assert!(!validate_key("order.2024.abc"));
        assert!(!validate_key("order/2024/abc"));
        // Non-ASCII letters are outside the allowed set.
        assert!(!validate_key("zahlung-äöü-123"));
    }

    #[test]
    fn test_generated_key_format() {
        let timestamp = DateTime::parse_from_rfc3339("2023-11-14T22:13:20Z")
            .unwrap()
            .with_timezone(&Utc);
        let key = generate_key_at(timestamp);

        let parts: Vec<&str> = key.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "idem");
        assert_eq!(parts[1], "1700000000000");
        assert_eq!(parts[2].len(), 32);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(validate_key(&key));
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(generate_key(), generate_key());
    }

    #[test]
    fn test_normalize_client_key() {
        let key1 = normalize_client_key("order #42 / retry").unwrap();
        let key2 = normalize_client_key("order #42 / retry").unwrap();
        let key3 = normalize_client_key("order #43 / retry").unwrap();

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert!(key1.starts_with("idem_"));
        assert!(validate_key(&key1));
        assert!(normalize_client_key("   ").is_none());
    }
}
