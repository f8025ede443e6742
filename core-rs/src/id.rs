//! Identifier generation.
//!
//! Layers, images, and containers are all named with a 256-bit random value,
//! hex-encoded. The upstream project forbids ids that parse as a plain
//! decimal number (to keep them visually distinct from sequence numbers in
//! tooling output), so we regenerate on the rare collision with that shape.

use rand::rngs::OsRng;
use rand::RngCore;

/// Generate a new random 64-character hex id.
pub fn generate_id() -> String {
    loop {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let id = hex::encode(bytes);
        if !looks_like_decimal(&id) {
            return id;
        }
    }
}

fn looks_like_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_length_and_charset() {
        let id = generate_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_id_is_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_looks_like_decimal() {
        assert!(looks_like_decimal("1234567890"));
        assert!(!looks_like_decimal("12a4567890"));
        assert!(!looks_like_decimal(""));
    }

    #[test]
    fn test_many_ids_never_decimal() {
        for _ in 0..1000 {
            let id = generate_id();
            assert!(!looks_like_decimal(&id));
        }
    }
}
