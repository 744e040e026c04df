//! Node credential issuance.

use rand::distributions::Alphanumeric;
use rand::Rng;

const KEY_PREFIX: &str = "key-";
const KEY_LEN: usize = 40;

/// Issue a fresh node credential.
///
/// Drawn from the thread-local CSPRNG; never derived from caller input.
pub fn generate_api_key() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_LEN)
        .map(char::from)
        .collect();
    format!("{KEY_PREFIX}{token}")
}

/// Compare a presented credential with the stored one.
pub fn credentials_match(stored: &str, presented: &str) -> bool {
    !stored.is_empty() && stored == presented
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_and_sized() {
        let key = generate_api_key();
        assert!(key.starts_with("key-"));
        assert_eq!(key.len(), KEY_PREFIX.len() + KEY_LEN);
    }

    #[test]
    fn keys_are_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_stored_key_never_matches() {
        assert!(!credentials_match("", ""));
        assert!(credentials_match("key-abc", "key-abc"));
        assert!(!credentials_match("key-abc", "key-abd"));
    }
}
