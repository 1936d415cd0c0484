use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use crate::constants::{PUBKEY_SIZE, SECRET_KEY_SIZE};
use crate::error::IdentityError;
use crate::types::IdentityId;

/// A participant's cryptographic identity based on Ed25519.
/// The id is derived from the public key, so it is stable for the lifetime
/// of the key.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_SIZE]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Restore identity from a hex-encoded secret key
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, IdentityError> {
        let mut secret = [0u8; SECRET_KEY_SIZE];
        hex::decode_to_slice(secret_hex.trim(), &mut secret)
            .map_err(|_| IdentityError::InvalidKeyBytes)?;
        Ok(Self::from_secret_bytes(&secret))
    }

    /// Stable content-derived id of this identity
    pub fn id(&self) -> IdentityId {
        IdentityId::from_public_key(&self.public_key_bytes())
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; PUBKEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.signing_key.to_bytes()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_stable_and_distinct() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_eq!(a.id(), a.id());
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id().0, a.public_key_bytes());
    }

    #[test]
    fn test_from_secret_hex() {
        let id = Identity::generate();
        let restored = Identity::from_secret_hex(&hex::encode(id.secret_bytes())).unwrap();
        assert_eq!(restored.id(), id.id());
        assert!(Identity::from_secret_hex("zz").is_err());
    }
}
