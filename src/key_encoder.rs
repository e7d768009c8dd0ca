//! Stable key derivation for sequences of strings.

use std::hash::Hasher;

use twox_hash::XxHash64;

const PRIMARY_SEED: u64 = 0;
const SECONDARY_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Produce a 32 character hex digest for the given keys.
///
/// The digest is stable across calls and processes. Every element is
/// length-prefixed, so `["ab", "c"]` and `["a", "bc"]` hash differently and
/// appending any element (even an empty one) changes the result.
pub fn generate_hash<I, S>(keys: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut primary = XxHash64::with_seed(PRIMARY_SEED);
    let mut secondary = XxHash64::with_seed(SECONDARY_SEED);
    let mut count: u64 = 0;

    for key in keys {
        let bytes = key.as_ref().as_bytes();
        let len = (bytes.len() as u64).to_le_bytes();
        for hasher in [&mut primary, &mut secondary] {
            hasher.write(&len);
            hasher.write(bytes);
        }
        count += 1;
    }

    for hasher in [&mut primary, &mut secondary] {
        hasher.write(&count.to_le_bytes());
    }

    format!("{:016x}{:016x}", primary.finish(), secondary.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify_hash_equivalency(keys: &[&str]) {
        let hash1 = generate_hash(keys);
        let hash2 = generate_hash(keys);
        let hash3 = generate_hash(keys.iter().copied().chain(["another"]));

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        verify_hash_equivalency(&[]);
        verify_hash_equivalency(&["KeyEncoderTests"]);
        verify_hash_equivalency(&["KeyEncoderTests", "http://localhost", "zoo"]);
    }

    #[test]
    fn test_hash_has_fixed_length() {
        assert_eq!(generate_hash(Vec::<String>::new()).len(), 32);
        assert_eq!(generate_hash(["a", "b", "c"]).len(), 32);
    }

    #[test]
    fn test_element_boundaries_matter() {
        assert_ne!(generate_hash(["ab", "c"]), generate_hash(["a", "bc"]));
        assert_ne!(generate_hash(["a"]), generate_hash(["a", ""]));
    }
}
