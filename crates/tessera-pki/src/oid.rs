//! Object identifiers used by the extension codec, CRLs and OCSP.

use const_oid::ObjectIdentifier;

const fn oid(s: &str) -> ObjectIdentifier {
    ObjectIdentifier::new_unwrap(s)
}

// Certificate extensions (RFC 5280 4.2)
pub const AUTHORITY_INFORMATION_ACCESS: ObjectIdentifier = oid("1.3.6.1.5.5.7.1.1");
pub const AUTHORITY_KEY_IDENTIFIER: ObjectIdentifier = oid("2.5.29.35");
pub const BASIC_CONSTRAINTS: ObjectIdentifier = oid("2.5.29.19");
pub const CRL_DISTRIBUTION_POINTS: ObjectIdentifier = oid("2.5.29.31");
pub const CRL_NUMBER: ObjectIdentifier = oid("2.5.29.20");
pub const CERTIFICATE_POLICIES: ObjectIdentifier = oid("2.5.29.32");
pub const DELTA_CRL_INDICATOR: ObjectIdentifier = oid("2.5.29.27");
pub const EXTENDED_KEY_USAGE: ObjectIdentifier = oid("2.5.29.37");
pub const FRESHEST_CRL: ObjectIdentifier = oid("2.5.29.46");
pub const INHIBIT_ANY_POLICY: ObjectIdentifier = oid("2.5.29.54");
pub const ISSUER_ALTERNATIVE_NAME: ObjectIdentifier = oid("2.5.29.18");
pub const ISSUING_DISTRIBUTION_POINT: ObjectIdentifier = oid("2.5.29.28");
pub const KEY_USAGE: ObjectIdentifier = oid("2.5.29.15");
pub const MS_CERTIFICATE_TEMPLATE: ObjectIdentifier = oid("1.3.6.1.4.1.311.21.7");
pub const NAME_CONSTRAINTS: ObjectIdentifier = oid("2.5.29.30");
pub const OCSP_NO_CHECK: ObjectIdentifier = oid("1.3.6.1.5.5.7.48.1.5");
pub const POLICY_CONSTRAINTS: ObjectIdentifier = oid("2.5.29.36");
pub const PRECERT_POISON: ObjectIdentifier = oid("1.3.6.1.4.1.11129.2.4.3");
pub const SUBJECT_ALTERNATIVE_NAME: ObjectIdentifier = oid("2.5.29.17");
pub const SUBJECT_INFORMATION_ACCESS: ObjectIdentifier = oid("1.3.6.1.5.5.7.1.11");
pub const SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = oid("2.5.29.14");
pub const TLS_FEATURE: ObjectIdentifier = oid("1.3.6.1.5.5.7.1.24");

// CRL entry extensions
pub const CRL_REASON: ObjectIdentifier = oid("2.5.29.21");
pub const INVALIDITY_DATE: ObjectIdentifier = oid("2.5.29.24");

// Access methods
pub const AD_OCSP: ObjectIdentifier = oid("1.3.6.1.5.5.7.48.1");
pub const AD_CA_ISSUERS: ObjectIdentifier = oid("1.3.6.1.5.5.7.48.2");
pub const AD_CA_REPOSITORY: ObjectIdentifier = oid("1.3.6.1.5.5.7.48.5");
pub const AD_TIME_STAMPING: ObjectIdentifier = oid("1.3.6.1.5.5.7.48.3");

// Extended key usages
pub const KP_SERVER_AUTH: ObjectIdentifier = oid("1.3.6.1.5.5.7.3.1");
pub const KP_CLIENT_AUTH: ObjectIdentifier = oid("1.3.6.1.5.5.7.3.2");
pub const KP_CODE_SIGNING: ObjectIdentifier = oid("1.3.6.1.5.5.7.3.3");
pub const KP_EMAIL_PROTECTION: ObjectIdentifier = oid("1.3.6.1.5.5.7.3.4");
pub const KP_IPSEC_IKE: ObjectIdentifier = oid("1.3.6.1.5.5.7.3.17");
pub const KP_TIME_STAMPING: ObjectIdentifier = oid("1.3.6.1.5.5.7.3.8");
pub const KP_OCSP_SIGNING: ObjectIdentifier = oid("1.3.6.1.5.5.7.3.9");
pub const KP_SMARTCARD_LOGON: ObjectIdentifier = oid("1.3.6.1.4.1.311.20.2.2");
pub const KP_MS_KDC: ObjectIdentifier = oid("1.3.6.1.5.2.3.5");
pub const ANY_EXTENDED_KEY_USAGE: ObjectIdentifier = oid("2.5.29.37.0");

// Policy qualifiers
pub const QT_CPS: ObjectIdentifier = oid("1.3.6.1.5.5.7.2.1");
pub const QT_UNOTICE: ObjectIdentifier = oid("1.3.6.1.5.5.7.2.2");

// OCSP
pub const OCSP_BASIC: ObjectIdentifier = oid("1.3.6.1.5.5.7.48.1.1");
pub const OCSP_NONCE: ObjectIdentifier = oid("1.3.6.1.5.5.7.48.1.2");

// CertID digests
pub const ID_SHA_1: ObjectIdentifier = oid("1.3.14.3.2.26");
pub const ID_SHA_256: ObjectIdentifier = oid("2.16.840.1.101.3.4.2.1");
pub const ID_SHA_384: ObjectIdentifier = oid("2.16.840.1.101.3.4.2.2");
pub const ID_SHA_512: ObjectIdentifier = oid("2.16.840.1.101.3.4.2.3");

// PKCS#9 extension request attribute
pub const EXTENSION_REQUEST: ObjectIdentifier = oid("1.2.840.113549.1.9.14");

// Name attributes
pub const AT_COUNTRY: ObjectIdentifier = oid("2.5.4.6");
pub const AT_STATE: ObjectIdentifier = oid("2.5.4.8");
pub const AT_LOCALITY: ObjectIdentifier = oid("2.5.4.7");
pub const AT_ORGANIZATION: ObjectIdentifier = oid("2.5.4.10");
pub const AT_ORGANIZATIONAL_UNIT: ObjectIdentifier = oid("2.5.4.11");
pub const AT_COMMON_NAME: ObjectIdentifier = oid("2.5.4.3");
pub const AT_SERIAL_NUMBER: ObjectIdentifier = oid("2.5.4.5");
pub const AT_TITLE: ObjectIdentifier = oid("2.5.4.12");
pub const AT_SURNAME: ObjectIdentifier = oid("2.5.4.4");
pub const AT_GIVEN_NAME: ObjectIdentifier = oid("2.5.4.42");
pub const AT_EMAIL_ADDRESS: ObjectIdentifier = oid("1.2.840.113549.1.9.1");
pub const AT_DOMAIN_COMPONENT: ObjectIdentifier = oid("0.9.2342.19200300.100.1.25");
pub const AT_USER_ID: ObjectIdentifier = oid("0.9.2342.19200300.100.1.1");
