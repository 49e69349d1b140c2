use std::{convert::TryFrom, path::Path};

use const_oid::ObjectIdentifier;
use pkcs8::{der::pem::PemLabel, spki::der::asn1::AnyRef, PrivateKeyInfo, SecretDocument};

use super::{ed25519::Ed25519Key, p256::P256Key, rsa::RsaKey, SigningKey};
use crate::{
    algorithm::{Algorithm, ID_EC_PUBLIC_KEY, ID_ED_25519, RSA_ENCRYPTION, SECP_256_R_1},
    error::{Error, Result},
};

/// Load a signing key from PKCS#8 PEM, detecting the algorithm from the
/// `PrivateKeyInfo` algorithm identifier.
pub fn load_signing_key_from_pkcs8_pem(pem: &str) -> Result<Box<dyn SigningKey>> {
    match detect_algorithm_from_pem(pem)? {
        Algorithm::Ed25519 => Ok(Box::new(Ed25519Key::from_pkcs8_pem(pem)?)),
        Algorithm::P256 => Ok(Box::new(P256Key::from_pkcs8_pem(pem)?)),
        Algorithm::Rsa => Ok(Box::new(RsaKey::from_pkcs8_pem(pem)?)),
    }
}

/// Load a signing key from PKCS#8 DER.
pub fn load_signing_key_from_pkcs8_der(der: &[u8]) -> Result<Box<dyn SigningKey>> {
    match detect_algorithm_from_der(der)? {
        Algorithm::Ed25519 => Ok(Box::new(Ed25519Key::from_pkcs8_der(der)?)),
        Algorithm::P256 => Ok(Box::new(P256Key::from_pkcs8_der(der)?)),
        Algorithm::Rsa => Ok(Box::new(RsaKey::from_pkcs8_der(der)?)),
    }
}

/// Load a signing key from a file holding either PKCS#8 PEM or raw DER.
pub fn load_signing_key_from_file(path: impl AsRef<Path>) -> Result<Box<dyn SigningKey>> {
    let bytes = std::fs::read(path)?;
    match std::str::from_utf8(&bytes) {
        Ok(text) if text.trim_start().starts_with("-----BEGIN") => {
            load_signing_key_from_pkcs8_pem(text)
        }
        _ => load_signing_key_from_pkcs8_der(&bytes),
    }
}

fn detect_algorithm(info: &PrivateKeyInfo<'_>) -> Result<Algorithm> {
    let oid = info.algorithm.oid;

    if oid == ID_ED_25519 {
        return Ok(Algorithm::Ed25519);
    }

    if oid == RSA_ENCRYPTION {
        return Ok(Algorithm::Rsa);
    }

    if oid == ID_EC_PUBLIC_KEY {
        let params = info.algorithm.parameters.ok_or_else(|| {
            Error::ImportError("EC key is missing curve parameters".to_string())
        })?;
        let curve_oid = parse_curve_oid(params)?;
        if curve_oid == SECP_256_R_1 {
            return Ok(Algorithm::P256);
        }
        return Err(Error::ImportError(format!(
            "Unsupported EC curve OID: {curve_oid}"
        )));
    }

    Err(Error::ImportError(format!(
        "Unsupported signing algorithm OID: {}",
        oid
    )))
}

fn parse_curve_oid(any: AnyRef<'_>) -> Result<ObjectIdentifier> {
    ObjectIdentifier::try_from(any)
        .map_err(|e| Error::ImportError(format!("Failed to parse curve OID: {e}")))
}

fn detect_algorithm_from_pem(pem: &str) -> Result<Algorithm> {
    let (label, doc) = SecretDocument::from_pem(pem)
        .map_err(|e| Error::ImportError(format!("Failed to decode PEM: {e}")))?;

    if label != PrivateKeyInfo::PEM_LABEL {
        return Err(Error::ImportError(format!("Invalid PKCS#8 label: {label}")));
    }

    let info = PrivateKeyInfo::try_from(doc.as_bytes())
        .map_err(|e| Error::ImportError(format!("Failed to parse PKCS#8: {e}")))?;

    detect_algorithm(&info)
}

fn detect_algorithm_from_der(der: &[u8]) -> Result<Algorithm> {
    let info = PrivateKeyInfo::try_from(der)
        .map_err(|e| Error::ImportError(format!("Failed to parse PKCS#8: {e}")))?;

    detect_algorithm(&info)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_detects_each_family() {
        let ed = Ed25519Key::from_seed(&[1u8; 32]).to_pkcs8_pem().unwrap();
        assert_eq!(
            load_signing_key_from_pkcs8_pem(&ed).unwrap().algorithm(),
            Algorithm::Ed25519
        );

        let ec = P256Key::generate().unwrap().to_pkcs8_der().unwrap();
        assert_eq!(
            load_signing_key_from_pkcs8_der(&ec).unwrap().algorithm(),
            Algorithm::P256
        );
    }

    #[test]
    fn test_load_from_file() {
        let pem = P256Key::generate().unwrap().to_pkcs8_pem().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(pem.as_bytes()).unwrap();

        let key = load_signing_key_from_file(file.path()).unwrap();
        assert_eq!(key.algorithm(), Algorithm::P256);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            load_signing_key_from_pkcs8_der(b"not a key"),
            Err(Error::ImportError(_))
        ));
    }
}
