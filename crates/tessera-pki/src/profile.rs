//! 证书模板（Profile）
//!
//! 模板是签发时只读的命名配置：默认扩展、允许调用者覆盖的扩展、允许的
//! 密钥用途以及默认有效期。`resolve`把模板默认值与调用者的覆盖合并成
//! 最终的扩展集合。

use std::collections::{BTreeMap, BTreeSet};

use der::asn1::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{PkiError, ProfileError, Result},
    extension::{
        extended_key_usage_from_name, extended_key_usage_name, Extension, ExtensionKind,
        ExtensionOverride, ExtensionValue, KeyUsage,
    },
    oid,
    settings::Settings,
};

/// 配置文件中的模板
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub description: String,
    /// 把CN复制到SAN
    pub cn_in_san: bool,
    pub add_crl_url: bool,
    pub add_ocsp_url: bool,
    pub add_issuer_url: bool,
    pub add_issuer_alternative_name: bool,
    /// 默认有效期（天），未设置时使用全局默认值
    pub expires_days: Option<u32>,
    /// 默认扩展，线格式，键为扩展名
    pub extensions: BTreeMap<String, serde_json::Value>,
    /// 允许调用者覆盖的扩展名
    pub overridable: Vec<String>,
    /// 允许的密钥用途，未设置时不限制
    pub allowed_key_usage: Option<Vec<String>>,
    /// 允许的扩展密钥用途，未设置时不限制
    pub allowed_extended_key_usage: Option<Vec<String>>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            description: String::new(),
            cn_in_san: true,
            add_crl_url: true,
            add_ocsp_url: true,
            add_issuer_url: true,
            add_issuer_alternative_name: true,
            expires_days: None,
            extensions: BTreeMap::new(),
            overridable: Vec::new(),
            allowed_key_usage: None,
            allowed_extended_key_usage: None,
        }
    }
}

/// 签发时由模板决定的附加行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileFlags {
    pub cn_in_san: bool,
    pub add_crl_url: bool,
    pub add_ocsp_url: bool,
    pub add_issuer_url: bool,
    pub add_issuer_alternative_name: bool,
}

/// 解析后的模板
#[derive(Debug, Clone)]
pub struct Profile {
    name: String,
    description: String,
    flags: ProfileFlags,
    validity_days: Option<u32>,
    extensions: BTreeMap<ExtensionKind, Extension>,
    overridable: BTreeSet<ExtensionKind>,
    allowed_key_usage: Option<BTreeSet<KeyUsage>>,
    allowed_extended_key_usage: Option<BTreeSet<ObjectIdentifier>>,
}

/// 模板与覆盖合并后的扩展集合
#[derive(Debug, Clone)]
pub struct ResolvedExtensions {
    pub profile: String,
    pub flags: ProfileFlags,
    pub validity_days: Option<u32>,
    extensions: BTreeMap<ExtensionKind, Extension>,
}

impl ResolvedExtensions {
    /// 不来自任何模板的扩展集合
    pub fn unprofiled(name: &str, flags: ProfileFlags) -> Self {
        Self {
            profile: name.to_string(),
            flags,
            validity_days: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn get(&self, kind: ExtensionKind) -> Option<&Extension> {
        self.extensions.get(&kind)
    }

    pub fn contains(&self, kind: ExtensionKind) -> bool {
        self.extensions.contains_key(&kind)
    }

    pub fn insert(&mut self, extension: Extension) {
        self.extensions.insert(extension.kind(), extension);
    }

    /// 仅在该种扩展尚不存在时加入
    pub fn insert_if_absent(&mut self, extension: Extension) {
        self.extensions.entry(extension.kind()).or_insert(extension);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.values()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

fn invalid(profile: &str, reason: impl Into<String>) -> PkiError {
    PkiError::Profile(ProfileError::InvalidProfile {
        profile: profile.to_string(),
        reason: reason.into(),
    })
}

impl Profile {
    /// 从配置构造，并检查默认扩展本身满足模板限制
    pub fn from_config(name: &str, config: &ProfileConfig) -> Result<Self> {
        let mut extensions = BTreeMap::new();
        for (extension_name, entry) in &config.extensions {
            let kind: ExtensionKind = extension_name
                .parse()
                .map_err(|e| invalid(name, format!("{e}")))?;
            let entry = ExtensionOverride::from_wire(kind, entry)
                .map_err(|e| invalid(name, format!("{e}")))?;
            let critical = entry.critical.unwrap_or(kind.default_critical());
            extensions.insert(kind, Extension::with_critical(entry.value, critical)?);
        }

        let overridable = config
            .overridable
            .iter()
            .map(|extension_name| {
                ExtensionKind::from_name(extension_name)
                    .ok_or_else(|| invalid(name, format!("unknown extension {extension_name}")))
            })
            .collect::<Result<BTreeSet<_>>>()?;

        let allowed_key_usage = config
            .allowed_key_usage
            .as_ref()
            .map(|tokens| {
                tokens
                    .iter()
                    .map(|token| {
                        KeyUsage::from_name(token)
                            .ok_or_else(|| invalid(name, format!("unknown key usage {token}")))
                    })
                    .collect::<Result<BTreeSet<_>>>()
            })
            .transpose()?;

        let allowed_extended_key_usage = config
            .allowed_extended_key_usage
            .as_ref()
            .map(|names| {
                names
                    .iter()
                    .map(|usage| {
                        extended_key_usage_from_name(usage).ok_or_else(|| {
                            invalid(name, format!("unknown extended key usage {usage}"))
                        })
                    })
                    .collect::<Result<BTreeSet<_>>>()
            })
            .transpose()?;

        let profile = Self {
            name: name.to_string(),
            description: config.description.clone(),
            flags: ProfileFlags {
                cn_in_san: config.cn_in_san,
                add_crl_url: config.add_crl_url,
                add_ocsp_url: config.add_ocsp_url,
                add_issuer_url: config.add_issuer_url,
                add_issuer_alternative_name: config.add_issuer_alternative_name,
            },
            validity_days: config.expires_days,
            extensions,
            overridable,
            allowed_key_usage,
            allowed_extended_key_usage,
        };
        for extension in profile.extensions.values() {
            profile.check_permitted(&extension.value)?;
        }
        Ok(profile)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn flags(&self) -> ProfileFlags {
        self.flags
    }

    pub fn validity_days(&self) -> Option<u32> {
        self.validity_days
    }

    pub fn default_extensions(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.values()
    }

    pub fn is_overridable(&self, kind: ExtensionKind) -> bool {
        self.overridable.contains(&kind)
    }

    /// 合并模板默认值与调用者覆盖
    ///
    /// 覆盖不允许的扩展时返回`ExtensionNotAllowed`；覆盖项未指定critical时
    /// 沿用模板中该扩展的critical，模板中没有时使用该种扩展的默认值。
    pub fn resolve(
        &self,
        overrides: &BTreeMap<ExtensionKind, ExtensionOverride>,
    ) -> Result<ResolvedExtensions> {
        let mut extensions = self.extensions.clone();
        for (kind, entry) in overrides {
            if !self.is_overridable(*kind) {
                return Err(ProfileError::ExtensionNotAllowed {
                    profile: self.name.clone(),
                    extension: kind.name().to_string(),
                }
                .into());
            }
            self.check_permitted(&entry.value)?;
            let critical = entry.critical.unwrap_or_else(|| {
                extensions
                    .get(kind)
                    .map(|default| default.critical)
                    .unwrap_or(kind.default_critical())
            });
            extensions.insert(*kind, Extension::with_critical(entry.value.clone(), critical)?);
        }

        debug!(
            profile = %self.name,
            overrides = overrides.len(),
            extensions = extensions.len(),
            "Resolved profile extensions"
        );
        Ok(ResolvedExtensions {
            profile: self.name.clone(),
            flags: self.flags,
            validity_days: self.validity_days,
            extensions,
        })
    }

    /// 密钥用途与扩展密钥用途必须在允许范围内
    fn check_permitted(&self, value: &ExtensionValue) -> Result<()> {
        match value {
            ExtensionValue::KeyUsage(usages) => {
                if let Some(allowed) = &self.allowed_key_usage {
                    if let Some(usage) = usages.iter().find(|usage| !allowed.contains(*usage)) {
                        return Err(ProfileError::KeyUsageNotPermitted {
                            profile: self.name.clone(),
                            usage: usage.name().to_string(),
                        }
                        .into());
                    }
                }
            }
            ExtensionValue::ExtendedKeyUsage(usages) => {
                if let Some(allowed) = &self.allowed_extended_key_usage {
                    if let Some(usage) = usages.iter().find(|usage| !allowed.contains(*usage)) {
                        return Err(ProfileError::ExtendedKeyUsageNotPermitted {
                            profile: self.name.clone(),
                            usage: extended_key_usage_name(usage),
                        }
                        .into());
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// 内置模板
    pub fn builtin() -> Vec<Profile> {
        BUILTIN
            .iter()
            .map(|builtin| builtin.build())
            .collect()
    }
}

/// 终端实体证书可以使用的密钥用途
const END_ENTITY_KEY_USAGE: [KeyUsage; 7] = [
    KeyUsage::DigitalSignature,
    KeyUsage::ContentCommitment,
    KeyUsage::KeyEncipherment,
    KeyUsage::DataEncipherment,
    KeyUsage::KeyAgreement,
    KeyUsage::EncipherOnly,
    KeyUsage::DecipherOnly,
];

const COMMON_OVERRIDABLE: [ExtensionKind; 10] = [
    ExtensionKind::AuthorityInformationAccess,
    ExtensionKind::CertificatePolicies,
    ExtensionKind::CrlDistributionPoints,
    ExtensionKind::ExtendedKeyUsage,
    ExtensionKind::FreshestCrl,
    ExtensionKind::IssuerAlternativeName,
    ExtensionKind::KeyUsage,
    ExtensionKind::MsCertificateTemplate,
    ExtensionKind::SubjectAlternativeName,
    ExtensionKind::TlsFeature,
];

struct BuiltinProfile {
    name: &'static str,
    description: &'static str,
    cn_in_san: bool,
    add_ocsp_url: bool,
    key_usage: &'static [KeyUsage],
    extended_key_usage: &'static [ObjectIdentifier],
    allowed_extended_key_usage: Option<&'static [ObjectIdentifier]>,
    ocsp_no_check: bool,
}

const BUILTIN: [BuiltinProfile; 5] = [
    BuiltinProfile {
        name: "client",
        description: "A certificate for a client.",
        cn_in_san: true,
        add_ocsp_url: true,
        key_usage: &[KeyUsage::DigitalSignature],
        extended_key_usage: &[oid::KP_CLIENT_AUTH],
        allowed_extended_key_usage: None,
        ocsp_no_check: false,
    },
    BuiltinProfile {
        name: "server",
        description: "A certificate for a server, allows client and server authentication.",
        cn_in_san: true,
        add_ocsp_url: true,
        key_usage: &[
            KeyUsage::DigitalSignature,
            KeyUsage::KeyEncipherment,
            KeyUsage::KeyAgreement,
        ],
        extended_key_usage: &[oid::KP_CLIENT_AUTH, oid::KP_SERVER_AUTH],
        allowed_extended_key_usage: None,
        ocsp_no_check: false,
    },
    BuiltinProfile {
        name: "webserver",
        description: "A certificate for a webserver.",
        cn_in_san: true,
        add_ocsp_url: true,
        key_usage: &[
            KeyUsage::DigitalSignature,
            KeyUsage::KeyEncipherment,
            KeyUsage::KeyAgreement,
        ],
        extended_key_usage: &[oid::KP_SERVER_AUTH],
        allowed_extended_key_usage: None,
        ocsp_no_check: false,
    },
    BuiltinProfile {
        name: "enduser",
        description: "A certificate for an enduser, allows client authentication, code and email signing.",
        cn_in_san: false,
        add_ocsp_url: true,
        key_usage: &[
            KeyUsage::DigitalSignature,
            KeyUsage::DataEncipherment,
            KeyUsage::KeyEncipherment,
        ],
        extended_key_usage: &[
            oid::KP_CLIENT_AUTH,
            oid::KP_CODE_SIGNING,
            oid::KP_EMAIL_PROTECTION,
        ],
        allowed_extended_key_usage: None,
        ocsp_no_check: false,
    },
    BuiltinProfile {
        name: "ocsp",
        description: "A certificate for an OCSP responder.",
        cn_in_san: false,
        add_ocsp_url: false,
        key_usage: &[
            KeyUsage::DigitalSignature,
            KeyUsage::ContentCommitment,
            KeyUsage::KeyEncipherment,
        ],
        extended_key_usage: &[oid::KP_OCSP_SIGNING],
        allowed_extended_key_usage: Some(&[oid::KP_OCSP_SIGNING]),
        ocsp_no_check: true,
    },
];

impl BuiltinProfile {
    fn build(&self) -> Profile {
        let mut extensions = BTreeMap::new();
        let key_usage = Extension::new(ExtensionValue::KeyUsage(
            self.key_usage.iter().copied().collect(),
        ));
        extensions.insert(ExtensionKind::KeyUsage, key_usage);
        let extended_key_usage = Extension::new(ExtensionValue::ExtendedKeyUsage(
            self.extended_key_usage.to_vec(),
        ));
        extensions.insert(ExtensionKind::ExtendedKeyUsage, extended_key_usage);

        let mut overridable: BTreeSet<ExtensionKind> = COMMON_OVERRIDABLE.into_iter().collect();
        if self.ocsp_no_check {
            extensions.insert(
                ExtensionKind::OcspNoCheck,
                Extension::new(ExtensionValue::OcspNoCheck),
            );
            overridable.insert(ExtensionKind::OcspNoCheck);
        }

        Profile {
            name: self.name.to_string(),
            description: self.description.to_string(),
            flags: ProfileFlags {
                cn_in_san: self.cn_in_san,
                add_crl_url: true,
                add_ocsp_url: self.add_ocsp_url,
                add_issuer_url: true,
                add_issuer_alternative_name: true,
            },
            validity_days: None,
            extensions,
            overridable,
            allowed_key_usage: Some(END_ENTITY_KEY_USAGE.into_iter().collect()),
            allowed_extended_key_usage: self
                .allowed_extended_key_usage
                .map(|allowed| allowed.iter().copied().collect()),
        }
    }
}

/// 模板注册表
#[derive(Debug, Clone)]
pub struct Profiles {
    profiles: BTreeMap<String, Profile>,
    default_profile: String,
}

impl Profiles {
    /// 内置模板，再用配置中的同名模板替换或新增
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut profiles: BTreeMap<String, Profile> = Profile::builtin()
            .into_iter()
            .map(|profile| (profile.name.clone(), profile))
            .collect();
        for (name, config) in &settings.profiles {
            profiles.insert(name.clone(), Profile::from_config(name, config)?);
        }
        if !profiles.contains_key(&settings.default_profile) {
            return Err(PkiError::ConfigError(format!(
                "default profile {} is not defined",
                settings.default_profile
            )));
        }
        Ok(Self {
            profiles,
            default_profile: settings.default_profile.clone(),
        })
    }

    pub fn get(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| ProfileError::UnknownProfile(name.to_string()).into())
    }

    pub fn default_profile(&self) -> Result<&Profile> {
        self.get(&self.default_profile)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// 按名称查找模板并合并覆盖
    pub fn resolve(
        &self,
        name: &str,
        overrides: &BTreeMap<ExtensionKind, ExtensionOverride>,
    ) -> Result<ResolvedExtensions> {
        self.get(name)?.resolve(overrides)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::extension::{overrides_from_wire, GeneralName};

    fn profiles() -> Profiles {
        Settings::default().profiles().unwrap()
    }

    #[test]
    fn test_builtin_profiles_exist() {
        let profiles = profiles();
        let names: Vec<_> = profiles.names().collect();
        assert_eq!(names, vec!["client", "enduser", "ocsp", "server", "webserver"]);
        assert_eq!(profiles.default_profile().unwrap().name(), "webserver");
        assert!(matches!(
            profiles.get("nope"),
            Err(PkiError::Profile(ProfileError::UnknownProfile(_)))
        ));
    }

    #[test]
    fn test_override_keeps_profile_criticality() {
        let overrides = overrides_from_wire(&json!({
            "key_usage": {"value": ["digital_signature"]},
            "subject_alternative_name": {"value": ["DNS:example.com"]}
        }))
        .unwrap();
        let resolved = profiles().resolve("server", &overrides).unwrap();

        let ku = resolved.get(ExtensionKind::KeyUsage).unwrap();
        assert!(ku.critical);
        let san = resolved.get(ExtensionKind::SubjectAlternativeName).unwrap();
        assert!(!san.critical);
        assert_eq!(
            san.value,
            ExtensionValue::SubjectAlternativeName(vec![GeneralName::Dns("example.com".into())])
        );
    }

    #[test]
    fn test_explicit_criticality_wins() {
        let overrides = overrides_from_wire(&json!({
            "extended_key_usage": {"critical": true, "value": ["serverAuth"]}
        }))
        .unwrap();
        let resolved = profiles().resolve("webserver", &overrides).unwrap();
        assert!(resolved.get(ExtensionKind::ExtendedKeyUsage).unwrap().critical);
    }

    #[test]
    fn test_ocsp_no_check_only_in_ocsp_profile() {
        let overrides = overrides_from_wire(&json!({"ocsp_no_check": {}})).unwrap();
        for name in ["client", "server", "webserver", "enduser"] {
            let err = profiles().resolve(name, &overrides).unwrap_err();
            assert!(matches!(
                err,
                PkiError::Profile(ProfileError::ExtensionNotAllowed { .. })
            ));
        }
        let resolved = profiles().resolve("ocsp", &overrides).unwrap();
        assert!(resolved.contains(ExtensionKind::OcspNoCheck));
    }

    #[test]
    fn test_key_usage_must_be_permitted() {
        let overrides = overrides_from_wire(&json!({
            "key_usage": {"value": ["key_cert_sign"]}
        }))
        .unwrap();
        let err = profiles().resolve("client", &overrides).unwrap_err();
        assert!(matches!(
            err,
            PkiError::Profile(ProfileError::KeyUsageNotPermitted { ref usage, .. }) if usage == "key_cert_sign"
        ));

        let overrides = overrides_from_wire(&json!({
            "extended_key_usage": {"value": ["serverAuth"]}
        }))
        .unwrap();
        assert!(matches!(
            profiles().resolve("ocsp", &overrides),
            Err(PkiError::Profile(ProfileError::ExtendedKeyUsageNotPermitted { .. }))
        ));
    }

    #[test]
    fn test_configured_profile() {
        let mut config = ProfileConfig {
            description: "short lived".to_string(),
            expires_days: Some(7),
            overridable: vec!["subject_alternative_name".to_string()],
            ..Default::default()
        };
        config.extensions.insert(
            "key_usage".to_string(),
            json!({"value": ["digital_signature"]}),
        );
        let profile = Profile::from_config("short", &config).unwrap();
        assert_eq!(profile.validity_days(), Some(7));
        assert!(profile.is_overridable(ExtensionKind::SubjectAlternativeName));
        assert!(!profile.is_overridable(ExtensionKind::KeyUsage));

        config.extensions.insert("bogus".to_string(), json!({"value": 1}));
        assert!(matches!(
            Profile::from_config("short", &config),
            Err(PkiError::Profile(ProfileError::InvalidProfile { .. }))
        ));
    }
}
