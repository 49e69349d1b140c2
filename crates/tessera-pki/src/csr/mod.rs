//! Certificate Signing Request (CSR) module
//!
//! Parsing, verification and creation of PKCS#10 requests. Requests are
//! signed and verified through `tessera-key`, so every key family the CA
//! can sign with is also accepted here.

use der::{
    asn1::{BitString, SetOfVec},
    Any, Decode, Encode,
};
use tessera_key::{Key, KeySign, PublicKey, SignatureAlgorithm, SigningKey};
use x509_cert::{
    attr::Attribute,
    ext::{pkix::name::GeneralName as X509GeneralName, Extension as X509Extension},
    request::{CertReq, CertReqInfo, Version},
    spki::SubjectPublicKeyInfoOwned,
};

use crate::{
    error::{PkiError, Result},
    extension::GeneralName,
    name::Subject,
    oid,
};

/// Certificate Signing Request (CSR)
#[derive(Debug, Clone)]
pub struct Csr {
    inner: CertReq,
}

impl Csr {
    /// Create and sign a CSR for `subject`, optionally requesting SAN entries
    pub fn build(
        key: &dyn SigningKey,
        subject: &Subject,
        alternative_names: &[GeneralName],
    ) -> Result<Self> {
        let public_key = SubjectPublicKeyInfoOwned::from_der(&key.spki_der()?)
            .map_err(|e| PkiError::CsrError(format!("Failed to parse SPKI: {}", e)))?;

        let mut attributes = SetOfVec::new();
        if !alternative_names.is_empty() {
            let names = alternative_names
                .iter()
                .map(GeneralName::to_x509)
                .collect::<Result<Vec<X509GeneralName>>>()?;
            let san = X509Extension {
                extn_id: oid::SUBJECT_ALTERNATIVE_NAME,
                critical: false,
                extn_value: der::asn1::OctetString::new(names.to_der()?)?,
            };
            let mut values = SetOfVec::new();
            values.insert(Any::encode_from(&vec![san])?)?;
            attributes.insert(Attribute {
                oid: oid::EXTENSION_REQUEST,
                values,
            })?;
        }

        let info = CertReqInfo {
            version: Version::V1,
            subject: subject.to_name()?,
            public_key,
            attributes,
        };

        let algorithm = key.default_signature_algorithm();
        let info_der = info
            .to_der()
            .map_err(|e| PkiError::CsrError(format!("Failed to encode CertReqInfo: {}", e)))?;
        let signature = key
            .sign(algorithm, &info_der)
            .map_err(|e| PkiError::CsrError(format!("Failed to sign CSR: {}", e)))?;

        let inner = CertReq {
            info,
            algorithm: algorithm.algorithm_identifier()?,
            signature: BitString::from_bytes(&signature)
                .map_err(|e| PkiError::CsrError(format!("Failed to create signature: {}", e)))?,
        };
        Ok(Self { inner })
    }

    /// Parse CSR from PEM format
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = pem::parse(pem)
            .map_err(|e| PkiError::CsrError(format!("Failed to parse PEM: {}", e)))?;

        if der.tag() != "CERTIFICATE REQUEST" && der.tag() != "NEW CERTIFICATE REQUEST" {
            return Err(PkiError::CsrError(
                "Invalid PEM tag, expected CERTIFICATE REQUEST or NEW CERTIFICATE REQUEST"
                    .to_string(),
            ));
        }

        Self::from_der(der.contents())
    }

    /// Parse CSR from DER format
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = CertReq::from_der(der)
            .map_err(|e| PkiError::CsrError(format!("Failed to parse DER: {}", e)))?;

        Ok(Self { inner })
    }

    /// Parse either PEM or DER
    pub fn parse(data: &[u8]) -> Result<Self> {
        match std::str::from_utf8(data) {
            Ok(text) if text.trim_start().starts_with("-----BEGIN") => Self::from_pem(text),
            _ => Self::from_der(data),
        }
    }

    /// Export CSR to PEM format
    pub fn to_pem(&self) -> Result<String> {
        let der = self.to_der()?;
        Ok(pem::encode(&pem::Pem::new("CERTIFICATE REQUEST", der)))
    }

    /// Export CSR to DER format
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| PkiError::CsrError(format!("Failed to encode DER: {}", e)))
    }

    pub fn subject(&self) -> Result<Subject> {
        Subject::from_name(&self.inner.info.subject)
    }

    pub fn spki(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.info.public_key
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let spki_der = self.inner.info.public_key.to_der()?;
        Ok(PublicKey::from_spki_der(&spki_der)?)
    }

    /// Extensions requested through the PKCS#9 extensionRequest attribute
    pub fn requested_extensions(&self) -> Result<Vec<X509Extension>> {
        let mut extensions = Vec::new();
        for attribute in self.inner.info.attributes.iter() {
            if attribute.oid != oid::EXTENSION_REQUEST {
                continue;
            }
            for value in attribute.values.iter() {
                let requested: Vec<X509Extension> = value.decode_as().map_err(|e| {
                    PkiError::CsrError(format!("Invalid extension request: {}", e))
                })?;
                extensions.extend(requested);
            }
        }
        Ok(extensions)
    }

    /// Subject alternative names requested in the CSR
    pub fn requested_alternative_names(&self) -> Result<Vec<GeneralName>> {
        let mut names = Vec::new();
        for extension in self.requested_extensions()? {
            if extension.extn_id != oid::SUBJECT_ALTERNATIVE_NAME {
                continue;
            }
            let decoded = Vec::<X509GeneralName>::from_der(extension.extn_value.as_bytes())
                .map_err(|e| PkiError::CsrError(format!("Invalid SAN request: {}", e)))?;
            for name in &decoded {
                names.push(GeneralName::from_x509(name)?);
            }
        }
        Ok(names)
    }

    /// DNS names the CSR asks for: SAN dNSName entries plus CNs
    pub fn requested_dns_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .requested_alternative_names()?
            .into_iter()
            .filter_map(|name| match name {
                GeneralName::Dns(dns) => Some(dns.to_ascii_lowercase()),
                _ => None,
            })
            .collect();
        for cn in self.subject()?.common_names() {
            let cn = cn.to_ascii_lowercase();
            if !names.contains(&cn) {
                names.push(cn);
            }
        }
        Ok(names)
    }

    /// Verify the CSR self-signature
    pub fn verify_signature(&self) -> Result<()> {
        let info_der = self.inner.info.to_der().map_err(|e| {
            PkiError::CsrError(format!("Failed to encode info for verification: {}", e))
        })?;
        let algorithm = SignatureAlgorithm::from_oid(&self.inner.algorithm.oid)?;
        self.public_key()?
            .verify(algorithm, &info_der, self.inner.signature.raw_bytes())
            .map_err(|_| PkiError::CsrError("Signature verification failed".to_string()))
    }

    // ========================================================================
    // File I/O Operations
    // ========================================================================

    /// Save CSR to PEM file
    pub fn save_pem_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let pem = self.to_pem()?;
        std::fs::write(path, pem).map_err(PkiError::IoError)
    }

    /// Load CSR from a PEM or DER file
    pub fn load_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path).map_err(PkiError::IoError)?;
        Self::parse(&data)
    }
}
