use pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{traits::PublicKeyParts, Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::{ensure_family, Key, KeySign};
use crate::{
    algorithm::{Algorithm, SignatureAlgorithm},
    error::{Error, Result},
};

// ============================================================================
// Core Key Structure
// ============================================================================

/// RSA signing key using PKCS#1 v1.5 padding
pub struct RsaKey {
    inner: RsaPrivateKey,
}

impl From<RsaPrivateKey> for RsaKey {
    fn from(value: RsaPrivateKey) -> Self {
        Self { inner: value }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl RsaKey {
    /// Generate a new RSA key pair with the given modulus size
    pub fn generate(bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let inner = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| Error::KeyError(format!("Failed to generate RSA key: {}", e)))?;
        Ok(Self { inner })
    }

    /// Import from PKCS8 PEM format
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let inner = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::ImportError(format!("RSA PKCS8 PEM import failed: {}", e)))?;
        Ok(Self { inner })
    }

    /// Import from PKCS8 DER format
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let inner = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| Error::ImportError(format!("RSA PKCS8 DER import failed: {}", e)))?;
        Ok(Self { inner })
    }

    /// Export to PKCS8 PEM format
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = self
            .inner
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::ExportError(format!("RSA PKCS8 PEM export failed: {}", e)))?;
        Ok(pem.to_string())
    }

    /// Export to PKCS8 DER format
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        let der = self
            .inner
            .to_pkcs8_der()
            .map_err(|e| Error::ExportError(format!("RSA PKCS8 DER export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

impl Key for RsaKey {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Rsa
    }

    fn spki_der(&self) -> Result<Vec<u8>> {
        let der = self
            .inner
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| Error::ExportError(format!("RSA SPKI export failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }

    fn key_size(&self) -> usize {
        self.inner.size() * 8
    }
}

impl KeySign for RsaKey {
    fn sign(&self, algorithm: SignatureAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
        ensure_family(Algorithm::Rsa, algorithm)?;

        let mut rng = rand::thread_rng();
        let result = match algorithm {
            SignatureAlgorithm::RsaSha384 => self.inner.sign_with_rng(
                &mut rng,
                Pkcs1v15Sign::new::<Sha384>(),
                &Sha384::digest(message),
            ),
            SignatureAlgorithm::RsaSha512 => self.inner.sign_with_rng(
                &mut rng,
                Pkcs1v15Sign::new::<Sha512>(),
                &Sha512::digest(message),
            ),
            _ => self.inner.sign_with_rng(
                &mut rng,
                Pkcs1v15Sign::new::<Sha256>(),
                &Sha256::digest(message),
            ),
        };
        result.map_err(|e| Error::SignatureError(format!("RSA signing failed: {}", e)))
    }

    fn default_signature_algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::RsaSha256
    }
}
