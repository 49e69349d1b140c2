//! Key, hash and signature algorithm identifiers.

use std::{fmt, str::FromStr};

use const_oid::ObjectIdentifier;
use der::{asn1::Null, Any};
use serde::{Deserialize, Serialize};
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::error::{Error, Result};

pub const ID_ED_25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
pub const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
pub const SECP_256_R_1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

pub const ECDSA_WITH_SHA_256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
pub const ECDSA_WITH_SHA_384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
pub const ECDSA_WITH_SHA_512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");
pub const SHA_256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
pub const SHA_384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
pub const SHA_512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

pub const ID_SHA_256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");

/// Key algorithm families supported for signing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Ed25519,
    P256,
    Rsa,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Ed25519 => "Ed25519",
            Algorithm::P256 => "EC (P-256)",
            Algorithm::Rsa => "RSA",
        };
        f.write_str(name)
    }
}

/// Message digest used together with ECDSA and RSA signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(Error::UnsupportedAlgorithm(format!("unknown hash algorithm: {other}"))),
        }
    }
}

/// Complete signature algorithm: key family plus digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Ed25519,
    EcdsaSha256,
    EcdsaSha384,
    EcdsaSha512,
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl SignatureAlgorithm {
    /// Combine a key family with an optional digest.
    ///
    /// Ed25519 must not be given a digest, ECDSA and RSA must.
    pub fn for_key(algorithm: Algorithm, hash: Option<HashAlgorithm>) -> Result<Self> {
        match (algorithm, hash) {
            (Algorithm::Ed25519, None) => Ok(SignatureAlgorithm::Ed25519),
            (Algorithm::P256, Some(HashAlgorithm::Sha256)) => Ok(SignatureAlgorithm::EcdsaSha256),
            (Algorithm::P256, Some(HashAlgorithm::Sha384)) => Ok(SignatureAlgorithm::EcdsaSha384),
            (Algorithm::P256, Some(HashAlgorithm::Sha512)) => Ok(SignatureAlgorithm::EcdsaSha512),
            (Algorithm::Rsa, Some(HashAlgorithm::Sha256)) => Ok(SignatureAlgorithm::RsaSha256),
            (Algorithm::Rsa, Some(HashAlgorithm::Sha384)) => Ok(SignatureAlgorithm::RsaSha384),
            (Algorithm::Rsa, Some(HashAlgorithm::Sha512)) => Ok(SignatureAlgorithm::RsaSha512),
            (Algorithm::Ed25519, Some(hash)) => Err(Error::AlgorithmMismatch(format!(
                "Ed25519 keys sign without a separate digest, got {hash}"
            ))),
            (algorithm, None) => Err(Error::AlgorithmMismatch(format!(
                "{algorithm} keys require a hash algorithm"
            ))),
        }
    }

    pub fn key_algorithm(&self) -> Algorithm {
        match self {
            SignatureAlgorithm::Ed25519 => Algorithm::Ed25519,
            SignatureAlgorithm::EcdsaSha256
            | SignatureAlgorithm::EcdsaSha384
            | SignatureAlgorithm::EcdsaSha512 => Algorithm::P256,
            SignatureAlgorithm::RsaSha256
            | SignatureAlgorithm::RsaSha384
            | SignatureAlgorithm::RsaSha512 => Algorithm::Rsa,
        }
    }

    pub fn hash(&self) -> Option<HashAlgorithm> {
        match self {
            SignatureAlgorithm::Ed25519 => None,
            SignatureAlgorithm::EcdsaSha256 | SignatureAlgorithm::RsaSha256 => {
                Some(HashAlgorithm::Sha256)
            }
            SignatureAlgorithm::EcdsaSha384 | SignatureAlgorithm::RsaSha384 => {
                Some(HashAlgorithm::Sha384)
            }
            SignatureAlgorithm::EcdsaSha512 | SignatureAlgorithm::RsaSha512 => {
                Some(HashAlgorithm::Sha512)
            }
        }
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            SignatureAlgorithm::Ed25519 => ID_ED_25519,
            SignatureAlgorithm::EcdsaSha256 => ECDSA_WITH_SHA_256,
            SignatureAlgorithm::EcdsaSha384 => ECDSA_WITH_SHA_384,
            SignatureAlgorithm::EcdsaSha512 => ECDSA_WITH_SHA_512,
            SignatureAlgorithm::RsaSha256 => SHA_256_WITH_RSA,
            SignatureAlgorithm::RsaSha384 => SHA_384_WITH_RSA,
            SignatureAlgorithm::RsaSha512 => SHA_512_WITH_RSA,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        [
            SignatureAlgorithm::Ed25519,
            SignatureAlgorithm::EcdsaSha256,
            SignatureAlgorithm::EcdsaSha384,
            SignatureAlgorithm::EcdsaSha512,
            SignatureAlgorithm::RsaSha256,
            SignatureAlgorithm::RsaSha384,
            SignatureAlgorithm::RsaSha512,
        ]
        .into_iter()
        .find(|alg| alg.oid() == *oid)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("signature algorithm OID {oid}")))
    }

    /// AlgorithmIdentifier as it appears in certificates, CRLs and OCSP responses.
    ///
    /// RSA identifiers carry an explicit NULL parameter, ECDSA and Ed25519 carry none.
    pub fn algorithm_identifier(&self) -> Result<AlgorithmIdentifierOwned> {
        let parameters = match self.key_algorithm() {
            Algorithm::Rsa => Some(Any::encode_from(&Null)?),
            _ => None,
        };
        Ok(AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters,
        })
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignatureAlgorithm::Ed25519 => "ed25519",
            SignatureAlgorithm::EcdsaSha256 => "ecdsa-with-sha256",
            SignatureAlgorithm::EcdsaSha384 => "ecdsa-with-sha384",
            SignatureAlgorithm::EcdsaSha512 => "ecdsa-with-sha512",
            SignatureAlgorithm::RsaSha256 => "sha256-with-rsa",
            SignatureAlgorithm::RsaSha384 => "sha384-with-rsa",
            SignatureAlgorithm::RsaSha512 => "sha512-with-rsa",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_key_rejects_mismatches() {
        assert_eq!(
            SignatureAlgorithm::for_key(Algorithm::Ed25519, None).unwrap(),
            SignatureAlgorithm::Ed25519
        );
        assert!(matches!(
            SignatureAlgorithm::for_key(Algorithm::Ed25519, Some(HashAlgorithm::Sha256)),
            Err(Error::AlgorithmMismatch(_))
        ));
        assert!(matches!(
            SignatureAlgorithm::for_key(Algorithm::Rsa, None),
            Err(Error::AlgorithmMismatch(_))
        ));
        assert_eq!(
            SignatureAlgorithm::for_key(Algorithm::P256, Some(HashAlgorithm::Sha384)).unwrap(),
            SignatureAlgorithm::EcdsaSha384
        );
    }

    #[test]
    fn test_oid_lookup() {
        let alg = SignatureAlgorithm::from_oid(&SHA_512_WITH_RSA).unwrap();
        assert_eq!(alg, SignatureAlgorithm::RsaSha512);
        assert_eq!(alg.hash(), Some(HashAlgorithm::Sha512));
        assert!(SignatureAlgorithm::from_oid(&ID_SHA_256).is_err());
    }

    #[test]
    fn test_rsa_identifier_has_null_parameters() {
        let rsa = SignatureAlgorithm::RsaSha256.algorithm_identifier().unwrap();
        assert!(rsa.parameters.is_some());
        let ec = SignatureAlgorithm::EcdsaSha256.algorithm_identifier().unwrap();
        assert!(ec.parameters.is_none());
    }

    #[test]
    fn test_hash_from_str() {
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("sha512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
