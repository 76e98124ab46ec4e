//! Ephemeral key material for a single sync pass.
//!
//! The catalog encrypts every website credential with the public half we
//! send along with the page request, so only this process can read them.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rsa::{
    Oaep, RsaPrivateKey,
    pkcs8::{EncodePublicKey, LineEnding},
    rand_core::OsRng,
};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

const MIN_KEY_BITS: usize = 1024;

#[derive(Debug, Error)]
pub enum KeyGenerationError {
    #[error("unsupported key size: {bits} bits (minimum {MIN_KEY_BITS})")]
    UnsupportedKeySize { bits: usize },

    #[error("key generation failed: {0}")]
    Primitive(#[from] rsa::Error),

    #[error("failed to encode public key: {0}")]
    Encoding(String),

    #[error("key generation was interrupted: {0}")]
    Interrupted(String),
}

#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("credential is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("credential could not be decrypted: {0}")]
    Cipher(#[from] rsa::Error),

    #[error("decrypted credential is not valid UTF-8")]
    InvalidUtf8,
}

/// Source of the run's key pair.
pub trait KeyProvider: Send + Sync {
    fn generate(&self) -> Result<KeyPair, KeyGenerationError>;
}

/// RSA key pair used for one run. Never persisted; the private key is
/// zeroized when the pair is dropped.
pub struct KeyPair {
    public_key_pem: String,
    private_key: RsaPrivateKey,
}

impl KeyPair {
    pub fn from_private_key(
        private_key: RsaPrivateKey,
    ) -> Result<Self, KeyGenerationError> {
        let public_key_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| KeyGenerationError::Encoding(err.to_string()))?;

        Ok(Self {
            public_key_pem,
            private_key,
        })
    }

    /// SPKI PEM of the public half, as sent to the catalog.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Decrypts a base64 encoded RSA-OAEP (SHA-256) ciphertext.
    pub fn decrypt_credential(
        &self,
        encoded: &str,
    ) -> Result<Zeroizing<String>, DecryptionError> {
        let ciphertext = STANDARD.decode(encoded.trim())?;
        let plaintext = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)?;

        match String::from_utf8(plaintext) {
            Ok(text) => Ok(Zeroizing::new(text)),
            Err(err) => {
                let mut bytes = err.into_bytes();
                bytes.zeroize();
                Err(DecryptionError::InvalidUtf8)
            }
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key_pem_len", &self.public_key_pem.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RsaKeyProvider {
    bits: usize,
}

impl RsaKeyProvider {
    pub fn new(bits: usize) -> Self {
        Self { bits }
    }
}

impl Default for RsaKeyProvider {
    fn default() -> Self {
        Self::new(2048)
    }
}

impl KeyProvider for RsaKeyProvider {
    fn generate(&self) -> Result<KeyPair, KeyGenerationError> {
        if self.bits < MIN_KEY_BITS {
            return Err(KeyGenerationError::UnsupportedKeySize {
                bits: self.bits,
            });
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, self.bits)?;
        KeyPair::from_private_key(private_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::{RsaPublicKey, pkcs8::DecodePublicKey};

    fn seal(pem: &str, plaintext: &str) -> String {
        let public = RsaPublicKey::from_public_key_pem(pem).unwrap();
        let sealed = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext.as_bytes())
            .unwrap();
        STANDARD.encode(sealed)
    }

    #[test]
    fn credential_sealed_with_public_half_decrypts() {
        let pair = RsaKeyProvider::new(1024).generate().unwrap();
        assert!(pair.public_key_pem().starts_with("-----BEGIN PUBLIC KEY-----"));

        let sealed = seal(pair.public_key_pem(), "site-token-42");
        let opened = pair.decrypt_credential(&sealed).unwrap();
        assert_eq!(opened.as_str(), "site-token-42");
    }

    #[test]
    fn credential_for_another_key_is_rejected() {
        let ours = RsaKeyProvider::new(1024).generate().unwrap();
        let theirs = RsaKeyProvider::new(1024).generate().unwrap();

        let sealed = seal(theirs.public_key_pem(), "not-for-us");
        assert!(matches!(
            ours.decrypt_credential(&sealed),
            Err(DecryptionError::Cipher(_))
        ));
    }

    #[test]
    fn garbage_credential_is_an_encoding_error() {
        let pair = RsaKeyProvider::new(1024).generate().unwrap();
        assert!(matches!(
            pair.decrypt_credential("%%% not base64 %%%"),
            Err(DecryptionError::Encoding(_))
        ));
    }

    #[test]
    fn tiny_keys_are_refused() {
        let err = RsaKeyProvider::new(512).generate().unwrap_err();
        assert!(matches!(
            err,
            KeyGenerationError::UnsupportedKeySize { bits: 512 }
        ));
    }

    #[test]
    fn debug_output_hides_private_key() {
        let pair = RsaKeyProvider::new(1024).generate().unwrap();
        let shown = format!("{pair:?}");
        assert!(shown.contains("<redacted>"));
        assert!(!shown.contains("PRIVATE"));
    }
}
