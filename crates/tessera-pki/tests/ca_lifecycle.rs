use std::{collections::HashSet, io::Write, sync::Arc, thread};

use der::Encode;
use proptest::prelude::*;
use serde_json::json;
use tessera_key::{Ed25519Key, Key, P256Key, PublicKey, SignatureAlgorithm};
use tessera_pki::{
    asn1,
    prelude::*,
    status::{error_response, parse_basic_response},
    CertificateKind, ExtensionKind, GeneralName, IssueRequest, ProfileError,
};

fn settings() -> Arc<Settings> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
default_hash_algorithm = "sha384"
default_expires_days = 30

[crl_profiles.all]
scope = "all"
expires_seconds = 7200
refresh_seconds = 600
"#
    )
    .unwrap();
    Arc::new(Settings::load(file.path()).unwrap())
}

fn root() -> CertificateAuthority {
    CertificateAuthority::init_root(
        "Lifecycle Root",
        "CN=Lifecycle Root,O=Tessera".parse().unwrap(),
        Arc::new(P256Key::generate().unwrap()),
        3650,
        Some(1),
        settings(),
    )
    .unwrap()
}

fn subject_key() -> SubjectKey {
    SubjectKey::Spki(Ed25519Key::generate().unwrap().spki_der().unwrap())
}

fn verify(spki: &[u8], oid: &der::asn1::ObjectIdentifier, tbs: &[u8], signature: &[u8]) {
    let algorithm = SignatureAlgorithm::from_oid(oid).unwrap();
    PublicKey::from_spki_der(spki)
        .unwrap()
        .verify(algorithm, tbs, signature)
        .unwrap();
}

#[test]
fn test_server_certificate_from_intermediate() {
    let root = root();
    let intermediate = root
        .init_intermediate(
            "Lifecycle Issuing",
            "CN=Lifecycle Issuing".parse().unwrap(),
            Arc::new(P256Key::generate().unwrap()),
            1825,
            None,
        )
        .unwrap()
        .with_config(CaConfig::default().with_ocsp_url("http://ocsp.example.com"))
        .unwrap();
    assert_eq!(intermediate.path_length(), Some(0));

    let request = IssueRequest::new("CN=www.example.com".parse().unwrap(), subject_key())
        .with_profile("server");
    let mut certificate = intermediate.issue(&request).unwrap();
    assert_eq!(certificate.profile, "server");
    assert_eq!(certificate.kind, CertificateKind::EndEntity);

    let san = certificate
        .extension(ExtensionKind::SubjectAlternativeName)
        .unwrap()
        .unwrap();
    assert!(!san.critical);
    assert_eq!(
        san.value,
        ExtensionValue::SubjectAlternativeName(vec![GeneralName::Dns("www.example.com".into())])
    );

    let parsed = certificate.parsed().unwrap().clone();
    assert!(intermediate.is_issuer_of(&parsed));
    assert!(!root.is_issuer_of(&parsed));
    verify(
        &intermediate
            .certificate()
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .unwrap(),
        &parsed.signature_algorithm.oid,
        &parsed.tbs_certificate.to_der().unwrap(),
        parsed.signature.raw_bytes(),
    );
    // the CA key is P-256 and the configured hash is SHA-384
    assert_eq!(
        SignatureAlgorithm::from_oid(&parsed.signature_algorithm.oid).unwrap(),
        SignatureAlgorithm::EcdsaSha384
    );
}

#[test]
fn test_wire_overrides_flow_into_certificate() {
    let root = root();
    let request = IssueRequest::new("CN=api.example.com".parse().unwrap(), subject_key())
        .with_wire_extensions(&json!({
            "subject_alternative_name": {"value": ["DNS:api.example.com", "DNS:api2.example.com"]}
        }))
        .unwrap();
    let mut certificate = root.issue(&request).unwrap();
    match certificate
        .extension(ExtensionKind::SubjectAlternativeName)
        .unwrap()
        .map(|ext| ext.value)
    {
        Some(ExtensionValue::SubjectAlternativeName(names)) => assert_eq!(names.len(), 2),
        other => panic!("unexpected SAN {other:?}"),
    }

    let rejected = IssueRequest::new("CN=api.example.com".parse().unwrap(), subject_key())
        .with_wire_extensions(&json!({"ocsp_no_check": {}}))
        .unwrap();
    assert!(matches!(
        root.issue(&rejected),
        Err(PkiError::Profile(ProfileError::ExtensionNotAllowed { .. }))
    ));
}

#[test]
fn test_concurrent_issuance_uses_unique_serials() {
    let root = Arc::new(root());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let root = Arc::clone(&root);
            thread::spawn(move || {
                (0..5)
                    .map(|j| {
                        let request = IssueRequest::new(
                            format!("CN=host-{i}-{j}.example.com").parse().unwrap(),
                            subject_key(),
                        );
                        root.issue(&request).unwrap().serial
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let serials: HashSet<String> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(serials.len(), 40);
    assert!(!serials.contains("1"));
}

#[test]
fn test_unusable_authorities() {
    let root = root();
    root.set_enabled(false);
    let request = IssueRequest::new("CN=off.example.com".parse().unwrap(), subject_key());
    assert!(matches!(
        root.issue(&request),
        Err(PkiError::ExpiredOrDisabledCA(_))
    ));
    root.set_enabled(true);

    let public_only = CertificateAuthority::from_parts(
        "Public Only",
        root.certificate_der(),
        None,
        1,
        Arc::clone(root.settings()),
    )
    .unwrap();
    assert!(!public_only.has_private_key());
    assert!(matches!(
        public_only.issue(&request),
        Err(PkiError::KeyUnavailable(_))
    ));
}

#[test]
fn test_revocation_lifecycle() {
    let manager = StatusManager::new(Arc::new(root()));
    let crl = manager.crl("all").unwrap();
    assert_eq!(crl.number, 0);
    assert_eq!(crl.entries, 0);
    assert!(crl.to_pem().starts_with("-----BEGIN X509 CRL-----"));

    let list = crl.parse().unwrap();
    assert!(list.tbs_cert_list.revoked_certificates.is_none());
    let ca_spki = manager
        .ca()
        .certificate()
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .unwrap();
    verify(
        &ca_spki,
        &list.signature_algorithm.oid,
        &list.tbs_cert_list.to_der().unwrap(),
        list.signature.raw_bytes(),
    );

    let request = IssueRequest::new("CN=revoke.example.com".parse().unwrap(), subject_key());
    let certificate = manager.issue(&request).unwrap();
    assert_eq!(manager.status_of(&certificate.serial), CertificateStatus::Good);

    manager
        .revoke(&certificate.serial, RevocationReason::KeyCompromise, None)
        .unwrap();
    let err = manager
        .revoke(&certificate.serial, RevocationReason::Superseded, None)
        .unwrap_err();
    assert!(matches!(err, PkiError::CertificateRevoked(_)));
    assert!(matches!(
        manager.status_of(&certificate.serial),
        CertificateStatus::Revoked {
            reason: RevocationReason::KeyCompromise,
            ..
        }
    ));

    let crl = manager.crl("all").unwrap();
    assert_eq!(crl.number, 1);
    assert_eq!(crl.entries, 1);

    let query = OcspQuery::for_serial(manager.ca(), &certificate.serial).unwrap();
    let response = manager
        .answer_ocsp_der(&query.to_request_der().unwrap())
        .unwrap();
    let basic = parse_basic_response(&response).unwrap();
    verify(
        &ca_spki,
        &basic.signature_algorithm.oid,
        &basic.tbs_response_data.to_der().unwrap(),
        basic.signature.raw_bytes(),
    );
    assert_ne!(
        response,
        error_response(asn1::OcspResponseStatus::MalformedRequest).unwrap()
    );
}

proptest! {
    #[test]
    fn serial_hex_is_normalized(value in any::<u64>(), zeros in 0usize..4) {
        let input = format!("{}{:x}", "0".repeat(zeros), value);
        let serial = asn1::serial_from_hex(&input).unwrap();
        prop_assert_eq!(asn1::serial_to_hex(&serial), format!("{:X}", value));
    }
}
