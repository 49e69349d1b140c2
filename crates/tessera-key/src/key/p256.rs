use p256::{
    ecdsa::{Signature, SigningKey},
    SecretKey,
};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashSigner;

use super::{ensure_family, Key, KeySign};
use crate::{
    algorithm::{Algorithm, SignatureAlgorithm},
    error::{Error, Result},
};

// ============================================================================
// Core Key Structure
// ============================================================================

/// NIST P-256 ECDSA signing key
///
/// Signatures are DER-encoded `Ecdsa-Sig-Value` structures, which is the form
/// X.509 expects in the signature BIT STRING.
pub struct P256Key {
    inner: SecretKey,
}

impl From<SecretKey> for P256Key {
    fn from(value: SecretKey) -> Self {
        Self { inner: value }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl P256Key {
    /// Generate a new P-256 key pair
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();
        Ok(SecretKey::random(&mut rng).into())
    }

    /// Import from PKCS8 PEM format
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let inner = SecretKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::ImportError(format!("P-256 PKCS8 PEM import failed: {}", e)))?;
        Ok(Self { inner })
    }

    /// Import from PKCS8 DER format
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let inner = SecretKey::from_pkcs8_der(der)
            .map_err(|e| Error::ImportError(format!("P-256 PKCS8 DER import failed: {}", e)))?;
        Ok(Self { inner })
    }

    /// Export to PKCS8 PEM format
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = self
            .inner
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::ExportError(format!("P-256 PKCS8 PEM export failed: {}", e)))?;
        Ok(pem.to_string())
    }

    /// Export to PKCS8 DER format
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        let der = self
            .inner
            .to_pkcs8_der()
            .map_err(|e| Error::ExportError(format!("P-256 PKCS8 DER export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

impl Key for P256Key {
    fn algorithm(&self) -> Algorithm {
        Algorithm::P256
    }

    fn spki_der(&self) -> Result<Vec<u8>> {
        let der = self
            .inner
            .public_key()
            .to_public_key_der()
            .map_err(|e| Error::ExportError(format!("P-256 SPKI export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }

    fn key_size(&self) -> usize {
        256
    }
}

impl KeySign for P256Key {
    fn sign(&self, algorithm: SignatureAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
        ensure_family(Algorithm::P256, algorithm)?;

        let prehash = match algorithm {
            SignatureAlgorithm::EcdsaSha384 => Sha384::digest(message).to_vec(),
            SignatureAlgorithm::EcdsaSha512 => Sha512::digest(message).to_vec(),
            _ => Sha256::digest(message).to_vec(),
        };

        let signing_key = SigningKey::from(&self.inner);
        let signature: Signature = signing_key
            .sign_prehash(&prehash)
            .map_err(|e| Error::SignatureError(format!("P-256 signing failed: {}", e)))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn default_signature_algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::EcdsaSha256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_all_digests() {
        let key = P256Key::generate().unwrap();
        let public = key.public_key().unwrap();
        for algorithm in [
            SignatureAlgorithm::EcdsaSha256,
            SignatureAlgorithm::EcdsaSha384,
            SignatureAlgorithm::EcdsaSha512,
        ] {
            let signature = key.sign(algorithm, b"payload").unwrap();
            public.verify(algorithm, b"payload", &signature).unwrap();
        }
    }

    #[test]
    fn test_digest_is_part_of_the_signature() {
        let key = P256Key::generate().unwrap();
        let public = key.public_key().unwrap();
        let signature = key.sign(SignatureAlgorithm::EcdsaSha384, b"payload").unwrap();
        assert!(public
            .verify(SignatureAlgorithm::EcdsaSha256, b"payload", &signature)
            .is_err());
    }

    #[test]
    fn test_rejects_ed25519_algorithm() {
        let key = P256Key::generate().unwrap();
        assert!(matches!(
            key.sign(SignatureAlgorithm::Ed25519, b"x"),
            Err(Error::AlgorithmMismatch(_))
        ));
    }
}
