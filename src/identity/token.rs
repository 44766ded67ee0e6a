//! Public key tokens.
//!
//! A public key token is the short form of an assembly's strong-name public key: the last
//! eight bytes of the key's SHA-1 hash, in reverse order. References normally carry the
//! token, while an assembly's own manifest carries the full key, so the binder reduces
//! keys to tokens before comparing identities.

use std::{fmt, str::FromStr};

use sha1::{Digest, Sha1};

use crate::error::BindError;

/// Eight-byte public key token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKeyToken([u8; 8]);

impl PublicKeyToken {
    /// Creates a token from its raw bytes, in display order.
    #[must_use]
    pub const fn new(bytes: [u8; 8]) -> Self {
        PublicKeyToken(bytes)
    }

    /// Reduces a full public key blob to its token.
    ///
    /// # Arguments
    ///
    /// * `public_key` - The public key blob as stored in the manifest
    #[must_use]
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = Sha1::digest(public_key);

        let mut token = [0u8; 8];
        for (slot, byte) in token.iter_mut().zip(digest.iter().rev()) {
            *slot = *byte;
        }

        PublicKeyToken(token)
    }

    /// Parses a 16 character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::MalformedIdentity`] if `text` is not exactly 8 hex bytes.
    pub fn parse(text: &str) -> Result<Self, BindError> {
        let malformed = |reason: &str| BindError::MalformedIdentity {
            input: text.to_string(),
            reason: reason.to_string(),
        };

        if text.len() != 16 {
            return Err(malformed("public key token must be exactly 8 hex bytes"));
        }

        let mut token = [0u8; 8];
        hex::decode_to_slice(text, &mut token)
            .map_err(|_| malformed("public key token is not a hex string"))?;

        Ok(PublicKeyToken(token))
    }

    /// The raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for PublicKeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PublicKeyToken {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecma_key_token() {
        let ecma_key = [0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
        let token = PublicKeyToken::from_public_key(&ecma_key);

        assert_eq!(token.to_string(), "b77a5c561934e089");
    }

    #[test]
    fn test_parse_display() {
        let token = PublicKeyToken::parse("B03F5F7F11D50A3A").unwrap();
        assert_eq!(
            token.as_bytes(),
            &[0xB0, 0x3F, 0x5F, 0x7F, 0x11, 0xD5, 0x0A, 0x3A]
        );
        assert_eq!(token.to_string(), "b03f5f7f11d50a3a");
        assert_eq!("b03f5f7f11d50a3a".parse::<PublicKeyToken>().unwrap(), token);
    }

    #[test]
    fn test_parse_invalid() {
        for text in ["", "b03f5f7f", "b03f5f7f11d50a3a00", "zz3f5f7f11d50a3a"] {
            match PublicKeyToken::parse(text) {
                Err(BindError::MalformedIdentity { input, .. }) => assert_eq!(input, text),
                other => panic!("{text}: unexpected {other:?}"),
            }
        }
    }
}
