use ed25519_dalek::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey},
    Signer, SigningKey,
};
use pkcs8::LineEnding;

use super::{ensure_family, Key, KeySign};
use crate::{
    algorithm::{Algorithm, SignatureAlgorithm},
    error::{Error, Result},
};

// ============================================================================
// Core Key Structure
// ============================================================================

/// Ed25519 signing key
///
/// Ed25519 signs the message directly, so the only valid signature
/// algorithm is [`SignatureAlgorithm::Ed25519`].
pub struct Ed25519Key {
    inner: SigningKey,
}

impl From<SigningKey> for Ed25519Key {
    fn from(value: SigningKey) -> Self {
        Self { inner: value }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Ed25519Key {
    /// Generate a new key from a random seed
    pub fn generate() -> Result<Self> {
        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed).map_err(|e| Error::GetrandomError(e.to_string()))?;
        Ok(SigningKey::from_bytes(&seed).into())
    }

    /// Create a key from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        SigningKey::from_bytes(seed).into()
    }

    /// Import from PKCS8 PEM format
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let inner = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::ImportError(format!("Ed25519 PKCS8 PEM import failed: {}", e)))?;
        Ok(Self { inner })
    }

    /// Import from PKCS8 DER format
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let inner = SigningKey::from_pkcs8_der(der)
            .map_err(|e| Error::ImportError(format!("Ed25519 PKCS8 DER import failed: {}", e)))?;
        Ok(Self { inner })
    }

    /// Export to PKCS8 PEM format
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = self
            .inner
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::ExportError(format!("Ed25519 PKCS8 PEM export failed: {}", e)))?;
        Ok(pem.to_string())
    }

    /// Export to PKCS8 DER format
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        let der = self
            .inner
            .to_pkcs8_der()
            .map_err(|e| Error::ExportError(format!("Ed25519 PKCS8 DER export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

impl Key for Ed25519Key {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Ed25519
    }

    fn spki_der(&self) -> Result<Vec<u8>> {
        let der = self
            .inner
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| Error::ExportError(format!("Ed25519 SPKI export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }

    fn key_size(&self) -> usize {
        256
    }
}

impl KeySign for Ed25519Key {
    fn sign(&self, algorithm: SignatureAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
        ensure_family(Algorithm::Ed25519, algorithm)?;
        Ok(self.inner.sign(message).to_bytes().to_vec())
    }

    fn default_signature_algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = Ed25519Key::generate().unwrap();
        let message = b"tbs certificate bytes";
        let signature = key.sign(SignatureAlgorithm::Ed25519, message).unwrap();
        assert_eq!(signature.len(), 64);

        let public = key.public_key().unwrap();
        public
            .verify(SignatureAlgorithm::Ed25519, message, &signature)
            .unwrap();
        assert!(public
            .verify(SignatureAlgorithm::Ed25519, b"other", &signature)
            .is_err());
    }

    #[test]
    fn test_rejects_foreign_algorithm() {
        let key = Ed25519Key::from_seed(&[7u8; 32]);
        let err = key.sign(SignatureAlgorithm::RsaSha256, b"msg").unwrap_err();
        assert!(matches!(err, Error::AlgorithmMismatch(_)));
    }

    #[test]
    fn test_pem_roundtrip() {
        let key = Ed25519Key::from_seed(&[42u8; 32]);
        let pem = key.to_pkcs8_pem().unwrap();
        let imported = Ed25519Key::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(key.spki_der().unwrap(), imported.spki_der().unwrap());
    }
}
