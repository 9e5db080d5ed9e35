//! Random tokens: session ids, reservation ids, voucher codes and hotspot passwords.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};

/// Voucher alphabet without the look-alike characters 0, O, 1 and I.
const VOUCHER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// 256-bit unguessable session token, URL-safe.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Identifies one redemption attempt's hold on a voucher.
pub fn generate_reservation_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn generate_voucher_code(length: usize) -> String {
    let mut rng = OsRng;
    (0..length.max(1))
        .map(|_| VOUCHER_ALPHABET[rng.gen_range(0..VOUCHER_ALPHABET.len())] as char)
        .collect()
}

pub fn generate_hotspot_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_ids_are_unique_and_url_safe() {
        let ids: HashSet<String> = (0..100).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 100);
        for id in ids {
            assert_eq!(id.len(), 43);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    #[test]
    fn test_reservation_ids_differ() {
        let a = generate_reservation_id();
        let b = generate_reservation_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
    }

    #[test]
    fn test_voucher_code_alphabet() {
        let code = generate_voucher_code(10);
        assert_eq!(code.len(), 10);
        assert!(code.bytes().all(|b| VOUCHER_ALPHABET.contains(&b)));
        assert!(!code.contains('O') && !code.contains('0'));
        assert_eq!(generate_voucher_code(0).len(), 1);
    }

    #[test]
    fn test_hotspot_password() {
        let password = generate_hotspot_password();
        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
