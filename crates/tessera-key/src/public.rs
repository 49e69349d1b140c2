//! Public keys parsed from SubjectPublicKeyInfo.
//!
//! Used to verify CSR, certificate and CRL signatures and to compute the
//! RFC 7638 JWK thumbprint that ACME key authorizations are built from.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Verifier, VerifyingKey};
use p256::{ecdsa::Signature as EcdsaSignature, elliptic_curve::sec1::ToEncodedPoint};
use pkcs8::{spki::SubjectPublicKeyInfoRef, DecodePublicKey, EncodePublicKey};
use rsa::{traits::PublicKeyParts, Pkcs1v15Sign, RsaPublicKey};
use serde_json::json;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier;

use crate::{
    algorithm::{Algorithm, SignatureAlgorithm, ID_EC_PUBLIC_KEY, ID_ED_25519, RSA_ENCRYPTION},
    error::{Error, Result},
};

#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519(VerifyingKey),
    P256(p256::PublicKey),
    Rsa(RsaPublicKey),
}

impl PublicKey {
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let info = SubjectPublicKeyInfoRef::try_from(der)?;
        let oid = info.algorithm.oid;

        if oid == ID_ED_25519 {
            let key = VerifyingKey::from_public_key_der(der)
                .map_err(|e| Error::ImportError(format!("Ed25519 SPKI import failed: {}", e)))?;
            return Ok(PublicKey::Ed25519(key));
        }
        if oid == ID_EC_PUBLIC_KEY {
            let key = p256::PublicKey::from_public_key_der(der)
                .map_err(|e| Error::ImportError(format!("P-256 SPKI import failed: {}", e)))?;
            return Ok(PublicKey::P256(key));
        }
        if oid == RSA_ENCRYPTION {
            let key = RsaPublicKey::from_public_key_der(der)
                .map_err(|e| Error::ImportError(format!("RSA SPKI import failed: {}", e)))?;
            return Ok(PublicKey::Rsa(key));
        }

        Err(Error::UnsupportedAlgorithm(format!(
            "public key algorithm OID {oid}"
        )))
    }

    pub fn to_spki_der(&self) -> Result<Vec<u8>> {
        let doc = match self {
            PublicKey::Ed25519(key) => key.to_public_key_der(),
            PublicKey::P256(key) => key.to_public_key_der(),
            PublicKey::Rsa(key) => key.to_public_key_der(),
        }
        .map_err(|e| Error::ExportError(format!("SPKI export failed: {}", e)))?;
        Ok(doc.as_bytes().to_vec())
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            PublicKey::Ed25519(_) => Algorithm::Ed25519,
            PublicKey::P256(_) => Algorithm::P256,
            PublicKey::Rsa(_) => Algorithm::Rsa,
        }
    }

    /// Key size in bits
    pub fn key_size(&self) -> usize {
        match self {
            PublicKey::Ed25519(_) | PublicKey::P256(_) => 256,
            PublicKey::Rsa(key) => key.size() * 8,
        }
    }

    /// Verify `signature` over `message`.
    ///
    /// Returns `Error::InvalidSignature` when the signature does not match and
    /// `Error::AlgorithmMismatch` when the algorithm is not usable with this key.
    pub fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        if algorithm.key_algorithm() != self.algorithm() {
            return Err(Error::AlgorithmMismatch(format!(
                "cannot verify {algorithm} with a {} key",
                self.algorithm()
            )));
        }

        match self {
            PublicKey::Ed25519(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| Error::InvalidSignature)?;
                key.verify(message, &signature)
                    .map_err(|_| Error::InvalidSignature)
            }
            PublicKey::P256(key) => {
                let signature =
                    EcdsaSignature::from_der(signature).map_err(|_| Error::InvalidSignature)?;
                let prehash = match algorithm {
                    SignatureAlgorithm::EcdsaSha384 => Sha384::digest(message).to_vec(),
                    SignatureAlgorithm::EcdsaSha512 => Sha512::digest(message).to_vec(),
                    _ => Sha256::digest(message).to_vec(),
                };
                p256::ecdsa::VerifyingKey::from(key)
                    .verify_prehash(&prehash, &signature)
                    .map_err(|_| Error::InvalidSignature)
            }
            PublicKey::Rsa(key) => {
                let result = match algorithm {
                    SignatureAlgorithm::RsaSha384 => key.verify(
                        Pkcs1v15Sign::new::<Sha384>(),
                        &Sha384::digest(message),
                        signature,
                    ),
                    SignatureAlgorithm::RsaSha512 => key.verify(
                        Pkcs1v15Sign::new::<Sha512>(),
                        &Sha512::digest(message),
                        signature,
                    ),
                    _ => key.verify(
                        Pkcs1v15Sign::new::<Sha256>(),
                        &Sha256::digest(message),
                        signature,
                    ),
                };
                result.map_err(|_| Error::InvalidSignature)
            }
        }
    }

    /// Public JWK with only the required members (RFC 7638 section 3.2)
    pub fn to_jwk(&self) -> serde_json::Value {
        match self {
            PublicKey::Ed25519(key) => json!({
                "crv": "Ed25519",
                "kty": "OKP",
                "x": URL_SAFE_NO_PAD.encode(key.as_bytes()),
            }),
            PublicKey::P256(key) => {
                let point = key.to_encoded_point(false);
                let x = point.x().map(|x| URL_SAFE_NO_PAD.encode(x)).unwrap_or_default();
                let y = point.y().map(|y| URL_SAFE_NO_PAD.encode(y)).unwrap_or_default();
                json!({
                    "crv": "P-256",
                    "kty": "EC",
                    "x": x,
                    "y": y,
                })
            }
            PublicKey::Rsa(key) => json!({
                "e": URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
                "kty": "RSA",
                "n": URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            }),
        }
    }

    /// base64url(SHA-256(canonical JWK))
    pub fn jwk_thumbprint(&self) -> Result<String> {
        // serde_json objects keep keys sorted, which is the canonical member order.
        let canonical = serde_json::to_string(&self.to_jwk())
            .map_err(|e| Error::ExportError(format!("JWK serialization failed: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Hex encoded SHA-256 over the SPKI encoding
    pub fn fingerprint_hex(&self) -> Result<String> {
        Ok(hex::encode(Sha256::digest(self.to_spki_der()?)))
    }
}
