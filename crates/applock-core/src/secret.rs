//! Shared secrets.
//!
//! A secret travels between devices as unpadded RFC 4648 Base32 text. Input
//! is accepted in any case and with stray whitespace or `=` padding; the
//! canonical form is uppercase with neither.

use std::fmt;
use std::str::FromStr;

use base32::Alphabet;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::DecodeError;

/// Raw length of a generated secret: 160 bits, the HMAC-SHA1 block-friendly size.
pub const SECRET_LEN: usize = 20;

const ALPHABET: Alphabet = Alphabet::Rfc4648 { padding: false };

/// Base32 text of a shared secret.
///
/// Values loaded from storage are kept verbatim and only checked when decoded,
/// so a corrupt record still loads; use [`Secret::parse`] for user input.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Validate and canonicalise user-supplied Base32 text.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let canonical = canonicalize(text);
        validate(&canonical)?;
        Ok(Self(canonical.to_string()))
    }

    /// Wrap stored text without validating it.
    pub fn from_stored(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(base32::encode(ALPHABET, bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Uppercase text with whitespace and padding removed.
    pub fn canonical(&self) -> Zeroizing<String> {
        canonicalize(&self.0)
    }

    /// Number of Base32 symbols in the canonical form.
    pub fn len(&self) -> usize {
        self.canonical().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw key bytes for HMAC.
    pub fn decode(&self) -> Result<Zeroizing<Vec<u8>>, DecodeError> {
        let canonical = self.canonical();
        validate(&canonical)?;
        base32::decode(ALPHABET, &canonical)
            .map(Zeroizing::new)
            .ok_or(DecodeError::Malformed)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&"<redacted>").finish()
    }
}

impl FromStr for Secret {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Fresh 160-bit secret from the OS randomness source.
pub fn generate_secret() -> Secret {
    let mut bytes = Zeroizing::new([0u8; SECRET_LEN]);
    OsRng.fill_bytes(&mut *bytes);
    Secret::from_bytes(&*bytes)
}

fn canonicalize(text: &str) -> Zeroizing<String> {
    let compact: Zeroizing<String> =
        Zeroizing::new(text.chars().filter(|c| !c.is_whitespace()).collect());
    Zeroizing::new(compact.trim_end_matches('=').to_ascii_uppercase())
}

fn validate(canonical: &str) -> Result<(), DecodeError> {
    if canonical.is_empty() {
        return Err(DecodeError::Empty);
    }
    match canonical
        .chars()
        .enumerate()
        .find(|(_, ch)| !matches!(ch, 'A'..='Z' | '2'..='7'))
    {
        Some((position, ch)) => Err(DecodeError::InvalidCharacter { ch, position }),
        // 1, 3 or 6 trailing symbols cannot hold a whole final byte
        None if matches!(canonical.len() % 8, 1 | 3 | 6) => Err(DecodeError::InvalidLength {
            len: canonical.len(),
        }),
        None => Ok(()),
    }
}
