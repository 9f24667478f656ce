//! Peer-ID generation (BEP 20): a fixed prefix followed by random bytes.
use rand::RngCore;

pub const PEER_ID_LEN: usize = 20;

/// Builds a 20-byte peer ID: `prefix` truncated/padded as needed, followed
/// by random bytes filling the rest.
pub fn generate(prefix: &str) -> [u8; PEER_ID_LEN] {
    let mut id = [0u8; PEER_ID_LEN];
    let prefix_bytes = prefix.as_bytes();
    let copy_len = prefix_bytes.len().min(PEER_ID_LEN);
    id[..copy_len].copy_from_slice(&prefix_bytes[..copy_len]);
    rand::rng().fill_bytes(&mut id[copy_len..]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_preserved_and_id_is_full_length() {
        let id = generate("-ZB0100-");
        assert_eq!(&id[..8], b"-ZB0100-");
        assert_eq!(id.len(), PEER_ID_LEN);
    }

    #[test]
    fn two_generations_differ_in_the_random_suffix() {
        let a = generate("-ZB0100-");
        let b = generate("-ZB0100-");
        assert_ne!(a, b);
    }
}
