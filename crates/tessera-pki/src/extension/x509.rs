//! Conversion between typed extensions and DER `x509_cert::ext::Extension`.

use std::collections::BTreeSet;

use der::{
    asn1::{BitString, Ia5String, Null, OctetString, SetOfVec},
    Any, Decode, Encode,
};
use x509_cert::{
    ext::{
        pkix::{
            name::GeneralName as X509GeneralName, AccessDescription as X509AccessDescription,
            AuthorityKeyIdentifier as X509AuthorityKeyIdentifier, BasicConstraints,
        },
        Extension as X509Extension,
    },
    name::{RdnSequence, RelativeDistinguishedName},
};

use super::{general_name::GeneralName, values::*, Extension, ExtensionKind, ExtensionValue};
use crate::{
    asn1::{self, decode_named_bits, encode_named_bits},
    error::{DecodeError, PkiError, Result},
    name::Subject,
    oid,
    types::RevocationReason,
};

pub(super) fn encode(extension: &Extension) -> Result<X509Extension> {
    let der = encode_value(&extension.value)?;
    Ok(X509Extension {
        extn_id: extension.kind().oid(),
        critical: extension.critical,
        extn_value: OctetString::new(der)?,
    })
}

pub(super) fn decode(extension: &X509Extension) -> Result<Option<Extension>> {
    let Some(kind) = ExtensionKind::from_oid(&extension.extn_id) else {
        return Ok(None);
    };
    let value = decode_value(kind, extension.extn_value.as_bytes()).map_err(|e| {
        PkiError::Decode(DecodeError::new(kind.name(), format!("invalid DER: {e}")))
    })?;
    let extension = Extension {
        critical: extension.critical,
        value,
    };
    extension.validate()?;
    Ok(Some(extension))
}

fn x509_names(names: &[GeneralName]) -> Result<Vec<X509GeneralName>> {
    names.iter().map(GeneralName::to_x509).collect()
}

fn domain_names(names: &[X509GeneralName]) -> Result<Vec<GeneralName>> {
    names.iter().map(GeneralName::from_x509).collect()
}

fn encode_value(value: &ExtensionValue) -> Result<Vec<u8>> {
    let der = match value {
        ExtensionValue::AuthorityInformationAccess(descriptions)
        | ExtensionValue::SubjectInformationAccess(descriptions) => descriptions
            .iter()
            .map(|description| {
                Ok(X509AccessDescription {
                    access_method: description.access_method,
                    access_location: description.access_location.to_x509()?,
                })
            })
            .collect::<Result<Vec<_>>>()?
            .to_der()?,
        ExtensionValue::AuthorityKeyIdentifier(aki) => X509AuthorityKeyIdentifier {
            key_identifier: aki
                .key_identifier
                .as_ref()
                .map(|id| OctetString::new(id.clone()))
                .transpose()?,
            authority_cert_issuer: aki
                .authority_cert_issuer
                .as_deref()
                .map(x509_names)
                .transpose()?,
            authority_cert_serial_number: aki
                .authority_cert_serial_number
                .as_deref()
                .map(asn1::serial_from_hex)
                .transpose()?,
        }
        .to_der()?,
        ExtensionValue::BasicConstraints { ca, path_length } => BasicConstraints {
            ca: *ca,
            path_len_constraint: *path_length,
        }
        .to_der()?,
        ExtensionValue::CrlDistributionPoints(points) | ExtensionValue::FreshestCrl(points) => {
            points
                .iter()
                .map(encode_distribution_point)
                .collect::<Result<Vec<_>>>()?
                .to_der()?
        }
        ExtensionValue::CrlNumber(number) | ExtensionValue::DeltaCrlIndicator(number) => {
            number.to_der()?
        }
        ExtensionValue::InhibitAnyPolicy(skip_certs) => skip_certs.to_der()?,
        ExtensionValue::CertificatePolicies(policies) => policies
            .iter()
            .map(encode_policy)
            .collect::<Result<Vec<_>>>()?
            .to_der()?,
        ExtensionValue::ExtendedKeyUsage(usages) => usages.to_der()?,
        ExtensionValue::IssuerAlternativeName(names)
        | ExtensionValue::SubjectAlternativeName(names) => x509_names(names)?.to_der()?,
        ExtensionValue::KeyUsage(usages) => {
            encode_named_bits(usages.iter().map(KeyUsage::bit))?.to_der()?
        }
        ExtensionValue::MsCertificateTemplate(template) => asn1::CertificateTemplate {
            template_id: template.template_id,
            major_version: template.major_version,
            minor_version: template.minor_version,
        }
        .to_der()?,
        ExtensionValue::NameConstraints(constraints) => asn1::NameConstraints {
            permitted_subtrees: encode_subtrees(&constraints.permitted_subtrees)?,
            excluded_subtrees: encode_subtrees(&constraints.excluded_subtrees)?,
        }
        .to_der()?,
        ExtensionValue::PolicyConstraints(constraints) => asn1::PolicyConstraints {
            require_explicit_policy: constraints.require_explicit_policy,
            inhibit_policy_mapping: constraints.inhibit_policy_mapping,
        }
        .to_der()?,
        ExtensionValue::OcspNoCheck | ExtensionValue::PrecertPoison => Null.to_der()?,
        ExtensionValue::SubjectKeyIdentifier(identifier) => {
            OctetString::new(identifier.clone())?.to_der()?
        }
        ExtensionValue::TlsFeature(features) => features
            .iter()
            .map(TlsFeature::code)
            .collect::<Vec<u32>>()
            .to_der()?,
    };
    Ok(der)
}

fn decode_value(kind: ExtensionKind, der: &[u8]) -> Result<ExtensionValue> {
    let value = match kind {
        ExtensionKind::AuthorityInformationAccess | ExtensionKind::SubjectInformationAccess => {
            let descriptions = Vec::<X509AccessDescription>::from_der(der)?
                .iter()
                .map(|description| {
                    Ok(AccessDescription {
                        access_method: description.access_method,
                        access_location: GeneralName::from_x509(&description.access_location)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if kind == ExtensionKind::AuthorityInformationAccess {
                ExtensionValue::AuthorityInformationAccess(descriptions)
            } else {
                ExtensionValue::SubjectInformationAccess(descriptions)
            }
        }
        ExtensionKind::AuthorityKeyIdentifier => {
            let aki = X509AuthorityKeyIdentifier::from_der(der)?;
            ExtensionValue::AuthorityKeyIdentifier(AuthorityKeyIdentifier {
                key_identifier: aki.key_identifier.map(|id| id.as_bytes().to_vec()),
                authority_cert_issuer: aki
                    .authority_cert_issuer
                    .as_deref()
                    .map(domain_names)
                    .transpose()?,
                authority_cert_serial_number: aki
                    .authority_cert_serial_number
                    .as_ref()
                    .map(asn1::serial_to_hex),
            })
        }
        ExtensionKind::BasicConstraints => {
            let constraints = BasicConstraints::from_der(der)?;
            ExtensionValue::BasicConstraints {
                ca: constraints.ca,
                path_length: constraints.path_len_constraint,
            }
        }
        ExtensionKind::CrlDistributionPoints | ExtensionKind::FreshestCrl => {
            let points = Vec::<asn1::DistributionPoint>::from_der(der)?
                .iter()
                .map(decode_distribution_point)
                .collect::<Result<Vec<_>>>()?;
            if kind == ExtensionKind::CrlDistributionPoints {
                ExtensionValue::CrlDistributionPoints(points)
            } else {
                ExtensionValue::FreshestCrl(points)
            }
        }
        ExtensionKind::CrlNumber => ExtensionValue::CrlNumber(u64::from_der(der)?),
        ExtensionKind::DeltaCrlIndicator => ExtensionValue::DeltaCrlIndicator(u64::from_der(der)?),
        ExtensionKind::InhibitAnyPolicy => ExtensionValue::InhibitAnyPolicy(u32::from_der(der)?),
        ExtensionKind::CertificatePolicies => ExtensionValue::CertificatePolicies(
            Vec::<asn1::PolicyInformation>::from_der(der)?
                .iter()
                .map(decode_policy)
                .collect::<Result<Vec<_>>>()?,
        ),
        ExtensionKind::ExtendedKeyUsage => ExtensionValue::ExtendedKeyUsage(Vec::from_der(der)?),
        ExtensionKind::IssuerAlternativeName => {
            ExtensionValue::IssuerAlternativeName(GeneralName::decode_list(der)?)
        }
        ExtensionKind::SubjectAlternativeName => {
            ExtensionValue::SubjectAlternativeName(GeneralName::decode_list(der)?)
        }
        ExtensionKind::KeyUsage => {
            let bits = BitString::from_der(der)?;
            let usages = decode_named_bits(&bits)
                .into_iter()
                .map(|bit| {
                    KeyUsage::from_bit(bit)
                        .ok_or_else(|| PkiError::CertError(format!("unknown key usage bit {bit}")))
                })
                .collect::<Result<BTreeSet<_>>>()?;
            ExtensionValue::KeyUsage(usages)
        }
        ExtensionKind::MsCertificateTemplate => {
            let template = asn1::CertificateTemplate::from_der(der)?;
            ExtensionValue::MsCertificateTemplate(MsCertificateTemplate {
                template_id: template.template_id,
                major_version: template.major_version,
                minor_version: template.minor_version,
            })
        }
        ExtensionKind::NameConstraints => {
            let constraints = asn1::NameConstraints::from_der(der)?;
            ExtensionValue::NameConstraints(NameConstraints {
                permitted_subtrees: decode_subtrees(constraints.permitted_subtrees)?,
                excluded_subtrees: decode_subtrees(constraints.excluded_subtrees)?,
            })
        }
        ExtensionKind::PolicyConstraints => {
            let constraints = asn1::PolicyConstraints::from_der(der)?;
            ExtensionValue::PolicyConstraints(PolicyConstraints {
                require_explicit_policy: constraints.require_explicit_policy,
                inhibit_policy_mapping: constraints.inhibit_policy_mapping,
            })
        }
        ExtensionKind::OcspNoCheck => {
            Null::from_der(der)?;
            ExtensionValue::OcspNoCheck
        }
        ExtensionKind::PrecertPoison => {
            Null::from_der(der)?;
            ExtensionValue::PrecertPoison
        }
        ExtensionKind::SubjectKeyIdentifier => {
            ExtensionValue::SubjectKeyIdentifier(OctetString::from_der(der)?.as_bytes().to_vec())
        }
        ExtensionKind::TlsFeature => ExtensionValue::TlsFeature(
            Vec::<u32>::from_der(der)?
                .into_iter()
                .map(|code| {
                    TlsFeature::from_code(code)
                        .ok_or_else(|| PkiError::CertError(format!("unknown TLS feature {code}")))
                })
                .collect::<Result<Vec<_>>>()?,
        ),
    };
    Ok(value)
}

fn encode_distribution_point(point: &DistributionPoint) -> Result<asn1::DistributionPoint> {
    let name = match &point.name {
        DistributionPointName::FullName(names) => {
            asn1::DistributionPointName::FullName(x509_names(names)?)
        }
        DistributionPointName::RelativeName(subject) => {
            asn1::DistributionPointName::NameRelativeToCrlIssuer(relative_name(subject)?)
        }
    };
    let reasons = point
        .reasons
        .as_ref()
        .map(|reasons| encode_named_bits(reasons.iter().filter_map(RevocationReason::flag_bit)))
        .transpose()?;
    Ok(asn1::DistributionPoint {
        distribution_point: Some(name),
        reasons,
        crl_issuer: point.crl_issuer.as_deref().map(x509_names).transpose()?,
    })
}

fn decode_distribution_point(point: &asn1::DistributionPoint) -> Result<DistributionPoint> {
    let name = match &point.distribution_point {
        Some(asn1::DistributionPointName::FullName(names)) => {
            DistributionPointName::FullName(domain_names(names)?)
        }
        Some(asn1::DistributionPointName::NameRelativeToCrlIssuer(rdn)) => {
            DistributionPointName::RelativeName(Subject::from_name(&RdnSequence(vec![rdn.clone()]))?)
        }
        None => {
            return Err(DecodeError::new(
                "crl_distribution_points",
                "distribution point without a name",
            )
            .into())
        }
    };
    let reasons = point
        .reasons
        .as_ref()
        .map(|bits| {
            decode_named_bits(bits)
                .into_iter()
                .map(|bit| {
                    RevocationReason::from_flag_bit(bit)
                        .ok_or_else(|| PkiError::CertError(format!("unknown reason flag {bit}")))
                })
                .collect::<Result<BTreeSet<_>>>()
        })
        .transpose()?;
    Ok(DistributionPoint {
        name,
        reasons,
        crl_issuer: point.crl_issuer.as_deref().map(domain_names).transpose()?,
    })
}

/// 将主体的所有属性放进同一个RDN
pub(crate) fn relative_name(subject: &Subject) -> Result<RelativeDistinguishedName> {
    let mut set = SetOfVec::new();
    for rdn in subject.to_name()?.0 {
        for atv in rdn.0.into_vec() {
            set.insert(atv)?;
        }
    }
    Ok(RelativeDistinguishedName(set))
}

fn encode_policy(policy: &PolicyInformation) -> Result<asn1::PolicyInformation> {
    let qualifiers = policy
        .policy_qualifiers
        .iter()
        .map(|qualifier| {
            let info = match qualifier {
                PolicyQualifier::Cps(text) => asn1::PolicyQualifierInfo {
                    policy_qualifier_id: oid::QT_CPS,
                    qualifier: Some(Any::encode_from(&Ia5String::new(text)?)?),
                },
                PolicyQualifier::UserNotice {
                    notice_reference,
                    explicit_text,
                } => {
                    let notice = asn1::UserNotice {
                        notice_ref: notice_reference.as_ref().map(|reference| {
                            asn1::NoticeReference {
                                organization: asn1::DisplayText::Utf8String(
                                    reference.organization.clone(),
                                ),
                                notice_numbers: reference.notice_numbers.clone(),
                            }
                        }),
                        explicit_text: explicit_text.clone().map(asn1::DisplayText::Utf8String),
                    };
                    asn1::PolicyQualifierInfo {
                        policy_qualifier_id: oid::QT_UNOTICE,
                        qualifier: Some(Any::encode_from(&notice)?),
                    }
                }
            };
            Ok(info)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(asn1::PolicyInformation {
        policy_identifier: policy.policy_identifier,
        policy_qualifiers: if qualifiers.is_empty() {
            None
        } else {
            Some(qualifiers)
        },
    })
}

fn decode_policy(policy: &asn1::PolicyInformation) -> Result<PolicyInformation> {
    let mut policy_qualifiers = Vec::new();
    for info in policy.policy_qualifiers.iter().flatten() {
        let Some(qualifier) = &info.qualifier else {
            continue;
        };
        if info.policy_qualifier_id == oid::QT_CPS {
            let text: Ia5String = qualifier.decode_as()?;
            policy_qualifiers.push(PolicyQualifier::Cps(text.to_string()));
        } else if info.policy_qualifier_id == oid::QT_UNOTICE {
            let notice: asn1::UserNotice = qualifier.decode_as()?;
            policy_qualifiers.push(PolicyQualifier::UserNotice {
                notice_reference: notice.notice_ref.map(|reference| NoticeReference {
                    organization: reference.organization.text(),
                    notice_numbers: reference.notice_numbers,
                }),
                explicit_text: notice.explicit_text.map(|text| text.text()),
            });
        } else {
            return Err(PkiError::CertError(format!(
                "unsupported policy qualifier {}",
                info.policy_qualifier_id
            )));
        }
    }
    Ok(PolicyInformation {
        policy_identifier: policy.policy_identifier,
        policy_qualifiers,
    })
}

fn encode_subtrees(names: &[GeneralName]) -> Result<Option<Vec<asn1::GeneralSubtree>>> {
    if names.is_empty() {
        return Ok(None);
    }
    let subtrees = names
        .iter()
        .map(|name| {
            Ok(asn1::GeneralSubtree {
                base: name.to_x509()?,
                minimum: 0,
                maximum: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(subtrees))
}

fn decode_subtrees(subtrees: Option<Vec<asn1::GeneralSubtree>>) -> Result<Vec<GeneralName>> {
    subtrees
        .unwrap_or_default()
        .iter()
        .map(|subtree| GeneralName::from_x509(&subtree.base))
        .collect()
}
