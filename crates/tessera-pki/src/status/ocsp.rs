//! OCSP响应（RFC 6960）
//!
//! CertID的issuerNameHash是CA主体名称DER的摘要，issuerKeyHash是CA公钥位串的
//! 摘要。查询按请求自身的摘要算法（SHA-1或SHA-2系列）比对，响应中回显同一算法。
//! 响应由CA自身或委托响应器签名，委托响应器的证书随响应一起返回。

use std::sync::Arc;

use der::{
    asn1::{GeneralizedTime, Null, ObjectIdentifier, OctetString},
    Decode, Encode,
};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tessera_key::{Algorithm, Key, SignatureAlgorithm, SigningKey};
use time::OffsetDateTime;
use tracing::info;
use x509_cert::{name::Name, spki::AlgorithmIdentifierOwned, Certificate as X509Certificate};

use crate::{
    asn1::{
        self, BasicOcspResponse, CertId, CertStatus, CrlReason, OcspRequest, OcspResponse,
        OcspResponseStatus, Request, ResponderId, ResponseBytes, ResponseData, RevokedInfo,
        SingleResponse, TbsRequest,
    },
    builder,
    ca::CertificateAuthority,
    cert::Certificate,
    error::{PkiError, Result},
    extension::{ExtensionKind, ExtensionValue},
    oid,
    types::{CertificateStatus, RevocationReason},
};

/// CertID使用的摘要算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CertIdHash {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl CertIdHash {
    pub const ALL: [CertIdHash; 4] = [
        CertIdHash::Sha1,
        CertIdHash::Sha256,
        CertIdHash::Sha384,
        CertIdHash::Sha512,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CertIdHash::Sha1 => "sha1",
            CertIdHash::Sha256 => "sha256",
            CertIdHash::Sha384 => "sha384",
            CertIdHash::Sha512 => "sha512",
        }
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            CertIdHash::Sha1 => oid::ID_SHA_1,
            CertIdHash::Sha256 => oid::ID_SHA_256,
            CertIdHash::Sha384 => oid::ID_SHA_384,
            CertIdHash::Sha512 => oid::ID_SHA_512,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|hash| hash.oid() == *oid)
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            CertIdHash::Sha1 => Sha1::digest(data).to_vec(),
            CertIdHash::Sha256 => Sha256::digest(data).to_vec(),
            CertIdHash::Sha384 => Sha384::digest(data).to_vec(),
            CertIdHash::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn identifier(&self) -> AlgorithmIdentifierOwned {
        AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters: None,
        }
    }
}

/// CA在`hash`下的(issuerNameHash, issuerKeyHash)
fn issuer_hashes(
    ca: &CertificateAuthority,
    hash: CertIdHash,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let name = ca.certificate().tbs_certificate.subject.to_der()?;
    Ok((hash.digest(&name), hash.digest(ca.public_key_bits())))
}

/// 单个证书的状态查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspQuery {
    pub hash: CertIdHash,
    pub issuer_name_hash: Vec<u8>,
    pub issuer_key_hash: Vec<u8>,
    /// 大写十六进制序列号
    pub serial: String,
}

impl OcspQuery {
    /// 查询`ca`签发的`serial`，CertID使用SHA-256
    pub fn for_serial(ca: &CertificateAuthority, serial: &str) -> Result<Self> {
        Self::for_serial_with(ca, serial, CertIdHash::Sha256)
    }

    pub fn for_serial_with(
        ca: &CertificateAuthority,
        serial: &str,
        hash: CertIdHash,
    ) -> Result<Self> {
        let (issuer_name_hash, issuer_key_hash) = issuer_hashes(ca, hash)?;
        Ok(Self {
            hash,
            issuer_name_hash,
            issuer_key_hash,
            serial: asn1::serial_to_hex(&asn1::serial_from_hex(serial)?),
        })
    }

    pub fn from_cert_id(cert_id: &CertId) -> Result<Self> {
        let hash = CertIdHash::from_oid(&cert_id.hash_algorithm.oid).ok_or_else(|| {
            PkiError::OcspError(format!(
                "unsupported CertID hash algorithm {}",
                cert_id.hash_algorithm.oid
            ))
        })?;
        Ok(Self {
            hash,
            issuer_name_hash: cert_id.issuer_name_hash.as_bytes().to_vec(),
            issuer_key_hash: cert_id.issuer_key_hash.as_bytes().to_vec(),
            serial: asn1::serial_to_hex(&cert_id.serial_number),
        })
    }

    /// 解析只含一个请求的DER OCSPRequest
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let request = OcspRequest::from_der(der)
            .map_err(|e| PkiError::OcspError(format!("Failed to parse OCSP request: {}", e)))?;
        match request.tbs_request.request_list.as_slice() {
            [single] => Self::from_cert_id(&single.req_cert),
            list => Err(PkiError::OcspError(format!(
                "expected exactly one request, got {}",
                list.len()
            ))),
        }
    }

    pub fn cert_id(&self) -> Result<CertId> {
        Ok(CertId {
            hash_algorithm: self.hash.identifier(),
            issuer_name_hash: OctetString::new(self.issuer_name_hash.clone())?,
            issuer_key_hash: OctetString::new(self.issuer_key_hash.clone())?,
            serial_number: asn1::serial_from_hex(&self.serial)?,
        })
    }

    /// 未签名的DER OCSPRequest
    pub fn to_request_der(&self) -> Result<Vec<u8>> {
        let request = OcspRequest {
            tbs_request: TbsRequest {
                version: None,
                requestor_name: None,
                request_list: vec![Request {
                    req_cert: self.cert_id()?,
                    single_request_extensions: None,
                }],
                request_extensions: None,
            },
            optional_signature: None,
        };
        Ok(request.to_der()?)
    }

    pub fn matches_issuer(&self, ca: &CertificateAuthority) -> Result<bool> {
        let (name_hash, key_hash) = issuer_hashes(ca, self.hash)?;
        Ok(self.issuer_name_hash == name_hash && self.issuer_key_hash == key_hash)
    }
}

/// 委托OCSP响应器
pub struct OcspResponder {
    certificate: X509Certificate,
    key: Arc<dyn SigningKey>,
    algorithm: SignatureAlgorithm,
    not_after: OffsetDateTime,
}

impl std::fmt::Debug for OcspResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcspResponder")
            .field("algorithm", &self.algorithm)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl OcspResponder {
    /// 响应器证书必须由`ca`签发、带有`OCSPSigning`扩展密钥用途并与`key`匹配
    pub fn new(
        ca: &CertificateAuthority,
        certificate: &mut Certificate,
        key: Arc<dyn SigningKey>,
    ) -> Result<Self> {
        let parsed = certificate.parsed()?.clone();
        if certificate.ca_id != ca.id() || !ca.is_issuer_of(&parsed) {
            return Err(PkiError::OcspError(format!(
                "responder certificate {} was not issued by CA {}",
                certificate.serial,
                ca.name()
            )));
        }
        let signs_ocsp = matches!(
            certificate.extension(ExtensionKind::ExtendedKeyUsage)?.map(|ext| ext.value),
            Some(ExtensionValue::ExtendedKeyUsage(usages)) if usages.contains(&oid::KP_OCSP_SIGNING)
        );
        if !signs_ocsp {
            return Err(PkiError::OcspError(format!(
                "responder certificate {} lacks the OCSPSigning extended key usage",
                certificate.serial
            )));
        }
        if key.spki_der()? != parsed.tbs_certificate.subject_public_key_info.to_der()? {
            return Err(PkiError::OcspError(
                "responder key does not match its certificate".to_string(),
            ));
        }

        let hash = match key.algorithm() {
            Algorithm::Ed25519 => None,
            _ => Some(ca.settings().default_hash_algorithm),
        };
        let algorithm = SignatureAlgorithm::for_key(key.algorithm(), hash)
            .map_err(|e| PkiError::SigningError(e.to_string()))?;
        Ok(Self {
            certificate: parsed,
            key,
            algorithm,
            not_after: certificate.not_after,
        })
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn subject(&self) -> &Name {
        &self.certificate.tbs_certificate.subject
    }
}

/// 签名后的OCSP响应
#[derive(Debug, Clone)]
pub struct SignedOcspResponse {
    pub serial: String,
    pub status: CertificateStatus,
    pub this_update: OffsetDateTime,
    pub next_update: OffsetDateTime,
    der: Vec<u8>,
}

impl SignedOcspResponse {
    /// DER编码的OCSPResponse
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn basic_response(&self) -> Result<BasicOcspResponse> {
        parse_basic_response(&self.der)
    }
}

/// 从OCSPResponse中取出BasicOCSPResponse
pub fn parse_basic_response(der: &[u8]) -> Result<BasicOcspResponse> {
    let response = OcspResponse::from_der(der)
        .map_err(|e| PkiError::OcspError(format!("Failed to parse OCSP response: {}", e)))?;
    let bytes = response.response_bytes.ok_or_else(|| {
        PkiError::OcspError(format!(
            "response has status {:?} and no body",
            response.response_status
        ))
    })?;
    if bytes.response_type != oid::OCSP_BASIC {
        return Err(PkiError::OcspError(format!(
            "unsupported response type {}",
            bytes.response_type
        )));
    }
    BasicOcspResponse::from_der(bytes.response.as_bytes())
        .map_err(|e| PkiError::OcspError(format!("Failed to parse basic response: {}", e)))
}

/// 不带响应体的错误响应（如`malformedRequest`）
pub fn error_response(status: OcspResponseStatus) -> Result<Vec<u8>> {
    Ok(OcspResponse {
        response_status: status,
        response_bytes: None,
    }
    .to_der()?)
}

fn cert_status(status: &CertificateStatus) -> Result<CertStatus> {
    Ok(match status {
        CertificateStatus::Good => CertStatus::Good(Null),
        CertificateStatus::Unknown => CertStatus::Unknown(Null),
        CertificateStatus::Revoked { reason, revoked_at } => CertStatus::Revoked(RevokedInfo {
            revocation_time: asn1::to_generalized_time(*revoked_at)?,
            revocation_reason: match reason {
                RevocationReason::Unspecified => None,
                reason => Some(CrlReason::from(*reason)),
            },
        }),
    })
}

/// 构建并签名单个证书的响应
pub fn build_response(
    ca: &CertificateAuthority,
    responder: Option<&OcspResponder>,
    query: &OcspQuery,
    status: &CertificateStatus,
    this_update: OffsetDateTime,
    next_update: OffsetDateTime,
) -> Result<SignedOcspResponse> {
    let (signer, algorithm, responder_id, certs) = match responder {
        Some(responder) => (
            &responder.key,
            responder.algorithm,
            ResponderId::ByName(responder.subject().clone()),
            Some(vec![responder.certificate.clone()]),
        ),
        None => (
            ca.signing_key()?,
            ca.signature_algorithm(None)?,
            ResponderId::ByName(ca.certificate().tbs_certificate.subject.clone()),
            None,
        ),
    };

    let this_update_der: GeneralizedTime = asn1::to_generalized_time(this_update)?;
    let tbs_response_data = ResponseData {
        responder_id,
        produced_at: this_update_der,
        responses: vec![SingleResponse {
            cert_id: query.cert_id()?,
            cert_status: cert_status(status)?,
            this_update: this_update_der,
            next_update: Some(asn1::to_generalized_time(next_update)?),
            single_extensions: None,
        }],
        response_extensions: None,
    };
    let signature = builder::sign_der(&**signer, algorithm, &tbs_response_data)?;
    let basic = BasicOcspResponse {
        tbs_response_data,
        signature_algorithm: algorithm.algorithm_identifier()?,
        signature,
        certs,
    };
    let response = OcspResponse {
        response_status: OcspResponseStatus::Successful,
        response_bytes: Some(ResponseBytes {
            response_type: oid::OCSP_BASIC,
            response: OctetString::new(basic.to_der()?)?,
        }),
    };

    info!(
        ca = %ca.name(),
        serial = %query.serial,
        status = ?status,
        delegated = responder.is_some(),
        "Signed OCSP response"
    );
    Ok(SignedOcspResponse {
        serial: query.serial.clone(),
        status: status.clone(),
        this_update,
        next_update,
        der: response.to_der()?,
    })
}
