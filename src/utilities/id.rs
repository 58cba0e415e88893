//! Identifier generation shared by the gossip and consensus layers.

use uuid::Uuid;

/// A 128-bit random value rendered as 32 lowercase hex digits (a v4 UUID with
/// its dashes stripped, since the wire format has no room for them).
pub fn random_hex128() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Round id generation per the wire spec: the originator's peer key, a colon,
/// then a fresh 128-bit hex value. Collisions are astronomically unlikely and
/// are treated as non-existent, as the spec allows.
pub fn round_id(origin: &str) -> String {
    format!("{origin}:{}", random_hex128())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_id_is_prefixed_and_unique() {
        let a = round_id("127.0.0.1:9000");
        let b = round_id("127.0.0.1:9000");
        assert!(a.starts_with("127.0.0.1:9000:"));
        assert_ne!(a, b);
    }

    #[test]
    fn random_hex128_is_32_lowercase_hex_chars() {
        let hex = random_hex128();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
