//! ASN.1 structures and conversions that `x509-cert` does not model the way
//! this crate needs them: distribution points with plain bit-string reason
//! flags, certificate policies, name and policy constraints, the Microsoft
//! template extension and the RFC 6960 OCSP messages.

use std::time::Duration;

use der::{
    asn1::{BitString, GeneralizedTime, Ia5String, Null, ObjectIdentifier, OctetString, UtcTime},
    Any, Choice, DateTime, Enumerated, Sequence,
};
use time::OffsetDateTime;
use x509_cert::{
    ext::{pkix::name::GeneralName, Extensions},
    name::{Name, RelativeDistinguishedName},
    serial_number::SerialNumber,
    spki::AlgorithmIdentifierOwned,
    time::Time,
    Certificate,
};

use crate::error::{PkiError, Result};

// ============================================================================
// Time
// ============================================================================

fn to_der_date_time(value: OffsetDateTime) -> Result<DateTime> {
    let secs = u64::try_from(value.unix_timestamp())
        .map_err(|_| PkiError::CertError(format!("timestamp before 1970: {value}")))?;
    Ok(DateTime::from_unix_duration(Duration::from_secs(secs))?)
}

/// X.509 `Time`: UTCTime through 2049, GeneralizedTime afterwards (RFC 5280 4.1.2.5)
pub fn to_x509_time(value: OffsetDateTime) -> Result<Time> {
    let date_time = to_der_date_time(value)?;
    if date_time.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_date_time(date_time)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(date_time)))
    }
}

pub fn to_generalized_time(value: OffsetDateTime) -> Result<GeneralizedTime> {
    Ok(GeneralizedTime::from_date_time(to_der_date_time(value)?))
}

pub fn from_unix_duration(duration: Duration) -> Result<OffsetDateTime> {
    let secs = i64::try_from(duration.as_secs())
        .map_err(|_| PkiError::CertError("timestamp out of range".to_string()))?;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| PkiError::CertError(format!("timestamp out of range: {e}")))
}

pub fn from_x509_time(value: &Time) -> Result<OffsetDateTime> {
    from_unix_duration(value.to_unix_duration())
}

// ============================================================================
// Named bit lists
// ============================================================================

/// DER encoding of a NamedBitList: trailing zero bits are dropped.
pub fn encode_named_bits(bits: impl IntoIterator<Item = usize>) -> Result<BitString> {
    let bits: Vec<usize> = bits.into_iter().collect();
    let Some(&highest) = bits.iter().max() else {
        return Ok(BitString::new(0, Vec::new())?);
    };

    let mut bytes = vec![0u8; highest / 8 + 1];
    for bit in bits {
        bytes[bit / 8] |= 0x80 >> (bit % 8);
    }
    let unused = (7 - highest % 8) as u8;
    Ok(BitString::new(unused, bytes)?)
}

/// Indexes of all set bits
pub fn decode_named_bits(bits: &BitString) -> Vec<usize> {
    let bytes = bits.raw_bytes();
    (0..bytes.len() * 8)
        .filter(|bit| bytes[bit / 8] & (0x80 >> (bit % 8)) != 0)
        .collect()
}

// ============================================================================
// Serial numbers
// ============================================================================

/// Big-endian bytes of an uppercase/lowercase hex serial, without leading zeros
pub fn serial_bytes_from_hex(serial: &str) -> Result<Vec<u8>> {
    let trimmed = serial.trim_start_matches('0');
    let padded = if trimmed.len() % 2 == 1 {
        format!("0{trimmed}")
    } else {
        trimmed.to_string()
    };
    let bytes = hex::decode(&padded)
        .map_err(|e| PkiError::CertError(format!("invalid serial {serial}: {e}")))?;
    if bytes.is_empty() {
        return Ok(vec![0]);
    }
    Ok(bytes)
}

pub fn serial_from_hex(serial: &str) -> Result<SerialNumber> {
    let mut bytes = serial_bytes_from_hex(serial)?;
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    Ok(SerialNumber::new(&bytes)?)
}

/// Uppercase hex without leading zeros, the format serials are stored in
pub fn serial_to_hex(serial: &SerialNumber) -> String {
    let hex = hex::encode_upper(serial.as_bytes());
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

// ============================================================================
// Extension values
// ============================================================================

/// `DistributionPointName` (RFC 5280 4.2.1.13)
#[derive(Clone, Debug, Eq, PartialEq, Choice)]
pub enum DistributionPointName {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", constructed = "true")]
    FullName(Vec<GeneralName>),

    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true")]
    NameRelativeToCrlIssuer(RelativeDistinguishedName),
}

/// `DistributionPoint` with `reasons` kept as a raw named bit list
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct DistributionPoint {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", constructed = "true", optional = "true")]
    pub distribution_point: Option<DistributionPointName>,

    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub reasons: Option<BitString>,

    #[asn1(context_specific = "2", tag_mode = "IMPLICIT", constructed = "true", optional = "true")]
    pub crl_issuer: Option<Vec<GeneralName>>,
}

/// `IssuingDistributionPoint` (RFC 5280 5.2.5)
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct IssuingDistributionPoint {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", constructed = "true", optional = "true")]
    pub distribution_point: Option<DistributionPointName>,

    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", default = "Default::default")]
    pub only_contains_user_certs: bool,

    #[asn1(context_specific = "2", tag_mode = "IMPLICIT", default = "Default::default")]
    pub only_contains_ca_certs: bool,

    #[asn1(context_specific = "3", tag_mode = "IMPLICIT", optional = "true")]
    pub only_some_reasons: Option<BitString>,

    #[asn1(context_specific = "4", tag_mode = "IMPLICIT", default = "Default::default")]
    pub indirect_crl: bool,

    #[asn1(context_specific = "5", tag_mode = "IMPLICIT", default = "Default::default")]
    pub only_contains_attribute_certs: bool,
}

/// `DisplayText`; only the two string types this crate writes are accepted
#[derive(Clone, Debug, Eq, PartialEq, Choice)]
pub enum DisplayText {
    #[asn1(type = "IA5String")]
    Ia5String(Ia5String),

    #[asn1(type = "UTF8String")]
    Utf8String(String),
}

impl DisplayText {
    pub fn text(&self) -> String {
        match self {
            DisplayText::Ia5String(value) => value.to_string(),
            DisplayText::Utf8String(value) => value.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct NoticeReference {
    pub organization: DisplayText,
    pub notice_numbers: Vec<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct UserNotice {
    pub notice_ref: Option<NoticeReference>,
    pub explicit_text: Option<DisplayText>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PolicyQualifierInfo {
    pub policy_qualifier_id: ObjectIdentifier,
    pub qualifier: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PolicyInformation {
    pub policy_identifier: ObjectIdentifier,
    pub policy_qualifiers: Option<Vec<PolicyQualifierInfo>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct GeneralSubtree {
    pub base: GeneralName,

    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", default = "Default::default")]
    pub minimum: u32,

    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub maximum: Option<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct NameConstraints {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", constructed = "true", optional = "true")]
    pub permitted_subtrees: Option<Vec<GeneralSubtree>>,

    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true", optional = "true")]
    pub excluded_subtrees: Option<Vec<GeneralSubtree>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PolicyConstraints {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub require_explicit_policy: Option<u32>,

    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub inhibit_policy_mapping: Option<u32>,
}

/// Microsoft `CertificateTemplate` (1.3.6.1.4.1.311.21.7)
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertificateTemplate {
    pub template_id: ObjectIdentifier,
    pub major_version: Option<u32>,
    pub minor_version: Option<u32>,
}

// ============================================================================
// OCSP (RFC 6960)
// ============================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq, Enumerated)]
#[repr(u32)]
pub enum CrlReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl From<crate::types::RevocationReason> for CrlReason {
    fn from(reason: crate::types::RevocationReason) -> Self {
        use crate::types::RevocationReason as R;
        match reason {
            R::Unspecified => CrlReason::Unspecified,
            R::KeyCompromise => CrlReason::KeyCompromise,
            R::CaCompromise => CrlReason::CaCompromise,
            R::AffiliationChanged => CrlReason::AffiliationChanged,
            R::Superseded => CrlReason::Superseded,
            R::CessationOfOperation => CrlReason::CessationOfOperation,
            R::CertificateHold => CrlReason::CertificateHold,
            R::RemoveFromCrl => CrlReason::RemoveFromCrl,
            R::PrivilegeWithdrawn => CrlReason::PrivilegeWithdrawn,
            R::AaCompromise => CrlReason::AaCompromise,
        }
    }
}

impl From<CrlReason> for crate::types::RevocationReason {
    fn from(reason: CrlReason) -> Self {
        use crate::types::RevocationReason as R;
        match reason {
            CrlReason::Unspecified => R::Unspecified,
            CrlReason::KeyCompromise => R::KeyCompromise,
            CrlReason::CaCompromise => R::CaCompromise,
            CrlReason::AffiliationChanged => R::AffiliationChanged,
            CrlReason::Superseded => R::Superseded,
            CrlReason::CessationOfOperation => R::CessationOfOperation,
            CrlReason::CertificateHold => R::CertificateHold,
            CrlReason::RemoveFromCrl => R::RemoveFromCrl,
            CrlReason::PrivilegeWithdrawn => R::PrivilegeWithdrawn,
            CrlReason::AaCompromise => R::AaCompromise,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Enumerated)]
#[repr(u32)]
pub enum OcspResponseStatus {
    Successful = 0,
    MalformedRequest = 1,
    InternalError = 2,
    TryLater = 3,
    SigRequired = 5,
    Unauthorized = 6,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertId {
    pub hash_algorithm: AlgorithmIdentifierOwned,
    pub issuer_name_hash: OctetString,
    pub issuer_key_hash: OctetString,
    pub serial_number: SerialNumber,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Request {
    pub req_cert: CertId,

    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub single_request_extensions: Option<Extensions>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TbsRequest {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub version: Option<u8>,

    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub requestor_name: Option<GeneralName>,

    pub request_list: Vec<Request>,

    #[asn1(context_specific = "2", tag_mode = "EXPLICIT", optional = "true")]
    pub request_extensions: Option<Extensions>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OcspRequest {
    pub tbs_request: TbsRequest,

    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub optional_signature: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RevokedInfo {
    pub revocation_time: GeneralizedTime,

    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub revocation_reason: Option<CrlReason>,
}

#[derive(Clone, Debug, Eq, PartialEq, Choice)]
pub enum CertStatus {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT")]
    Good(Null),

    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true")]
    Revoked(RevokedInfo),

    #[asn1(context_specific = "2", tag_mode = "IMPLICIT")]
    Unknown(Null),
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub cert_status: CertStatus,
    pub this_update: GeneralizedTime,

    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub next_update: Option<GeneralizedTime>,

    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub single_extensions: Option<Extensions>,
}

#[derive(Clone, Debug, Eq, PartialEq, Choice)]
pub enum ResponderId {
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", constructed = "true")]
    ByName(Name),

    #[asn1(context_specific = "2", tag_mode = "EXPLICIT", constructed = "true")]
    ByKey(OctetString),
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ResponseData {
    pub responder_id: ResponderId,
    pub produced_at: GeneralizedTime,
    pub responses: Vec<SingleResponse>,

    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub response_extensions: Option<Extensions>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct BasicOcspResponse {
    pub tbs_response_data: ResponseData,
    pub signature_algorithm: AlgorithmIdentifierOwned,
    pub signature: BitString,

    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub certs: Option<Vec<Certificate>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ResponseBytes {
    pub response_type: ObjectIdentifier,
    pub response: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OcspResponse {
    pub response_status: OcspResponseStatus,

    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub response_bytes: Option<ResponseBytes>,
}

#[cfg(test)]
mod tests {
    use der::{Decode, Encode};
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_named_bits_drop_trailing_zeros() {
        // digitalSignature + keyEncipherment -> 0b1010_0000, five unused bits
        let bits = encode_named_bits([0, 2]).unwrap();
        assert_eq!(bits.raw_bytes(), &[0xa0]);
        assert_eq!(bits.unused_bits(), 5);
        assert_eq!(decode_named_bits(&bits), vec![0, 2]);

        // decipherOnly is bit 8 and needs a second byte
        let bits = encode_named_bits([4, 8]).unwrap();
        assert_eq!(bits.raw_bytes(), &[0x08, 0x80]);
        assert_eq!(bits.unused_bits(), 7);
    }

    #[test]
    fn test_time_switches_to_generalized_in_2050() {
        let utc = to_x509_time(datetime!(2049-12-31 23:59:59 UTC)).unwrap();
        assert!(matches!(utc, Time::UtcTime(_)));
        let generalized = to_x509_time(datetime!(2050-01-01 00:00:00 UTC)).unwrap();
        assert!(matches!(generalized, Time::GeneralTime(_)));
        assert_eq!(
            from_x509_time(&generalized).unwrap(),
            datetime!(2050-01-01 00:00:00 UTC)
        );
    }

    #[test]
    fn test_serial_hex_keeps_positive_sign() {
        let serial = serial_from_hex("FF01").unwrap();
        let decoded = SerialNumber::from_der(&serial.to_der().unwrap()).unwrap();
        assert_eq!(serial_to_hex(&decoded), "FF01");
        assert_eq!(serial_to_hex(&serial_from_hex("00a1").unwrap()), "A1");
    }

    #[test]
    fn test_cert_status_tags() {
        let good = CertStatus::Good(Null).to_der().unwrap();
        assert_eq!(good, vec![0x80, 0x00]);
        let unknown = CertStatus::Unknown(Null).to_der().unwrap();
        assert_eq!(unknown, vec![0x82, 0x00]);
        assert_eq!(CertStatus::from_der(&good).unwrap(), CertStatus::Good(Null));
    }
}
