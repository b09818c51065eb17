//! The "super secret" override key.
//!
//! A partner can hand this string over instead of a code to lift a lock for
//! good. It is a friction gate, not a credential: anyone holding the secret
//! can compute it. Every symbol of the canonical secret text is moved half-way
//! round the Base32 alphabet. No position keeps its symbol, so the key never
//! equals the secret, and applying the same turn again gives the secret back.

use subtle::ConstantTimeEq;

use crate::secret::Secret;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const HALF_TURN: usize = ALPHABET.len() / 2;

fn rotate(symbol: u8) -> u8 {
    match ALPHABET.iter().position(|&a| a == symbol) {
        Some(index) => ALPHABET[(index + HALF_TURN) % ALPHABET.len()],
        None => symbol,
    }
}

pub fn derive_override_key(secret: &Secret) -> String {
    secret
        .canonical()
        .bytes()
        .map(rotate)
        .map(char::from)
        .collect()
}

/// Case- and whitespace-insensitive comparison against the key for `secret`.
pub fn matches_override_key(secret: &Secret, presented: &str) -> bool {
    let expected = derive_override_key(secret);
    let presented: String = presented
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    !presented.is_empty() && bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}
