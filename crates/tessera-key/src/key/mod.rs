pub mod ed25519;
pub mod p256;
pub mod rsa;
pub mod util;

use sha2::{Digest, Sha256};

pub use self::{ed25519::Ed25519Key, p256::P256Key, rsa::RsaKey};
use crate::{
    algorithm::{Algorithm, SignatureAlgorithm},
    error::{Error, Result},
    public::PublicKey,
};

// ============================================================================
// Core Traits
// ============================================================================

/// Common behaviour of every private key held by a CA or a responder
pub trait Key {
    /// Key family of this key
    fn algorithm(&self) -> Algorithm;

    /// Public half encoded as SubjectPublicKeyInfo DER
    fn spki_der(&self) -> Result<Vec<u8>>;

    /// Key size in bits (modulus size for RSA, curve size otherwise)
    fn key_size(&self) -> usize;

    /// Parsed public key
    fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_spki_der(&self.spki_der()?)
    }

    /// SHA-256 fingerprint over the SPKI encoding
    fn fingerprint_sha256_spki(&self) -> Result<Vec<u8>> {
        Ok(Sha256::digest(self.spki_der()?).to_vec())
    }
}

/// Signing capability
pub trait KeySign: Key {
    /// Sign `message` with the given algorithm.
    ///
    /// The algorithm has to belong to the key family of this key, otherwise
    /// `Error::AlgorithmMismatch` is returned and nothing is signed.
    fn sign(&self, algorithm: SignatureAlgorithm, message: &[u8]) -> Result<Vec<u8>>;

    /// Algorithm used when a caller does not choose one
    fn default_signature_algorithm(&self) -> SignatureAlgorithm;
}

/// Object-safe signing key shared between threads
pub trait SigningKey: KeySign + Send + Sync {}

impl<T: KeySign + Send + Sync> SigningKey for T {}

pub(crate) fn ensure_family(key: Algorithm, algorithm: SignatureAlgorithm) -> Result<()> {
    if algorithm.key_algorithm() != key {
        return Err(Error::AlgorithmMismatch(format!(
            "cannot sign {algorithm} with a {key} key"
        )));
    }
    Ok(())
}
