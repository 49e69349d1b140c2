//! 全局配置
//!
//! 从TOML文件加载，所有字段都有默认值；加载后注入到各组件，不在运行时
//! 临时读取环境。

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use tessera_key::HashAlgorithm;

use crate::{
    error::{PkiError, Result},
    profile::{ProfileConfig, Profiles},
    status::CrlScope,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 默认摘要算法
    pub default_hash_algorithm: HashAlgorithm,
    /// 签发证书的默认有效期（天）
    pub default_expires_days: u32,
    /// not_before向前回拨的秒数
    pub clock_skew_seconds: u32,
    /// RSA公钥的最小长度
    pub min_key_size: usize,
    /// 生成RSA密钥时的默认长度
    pub default_key_size: usize,
    /// CA文件存放目录
    pub ca_storage_dir: String,
    /// 未指定模板时使用的模板
    pub default_profile: String,
    /// 叠加在内置模板之上的模板配置
    pub profiles: BTreeMap<String, ProfileConfig>,
    /// CRL配置，键为名称
    pub crl_profiles: BTreeMap<String, CrlProfileConfig>,
    pub ocsp: OcspSettings,
    pub acme: AcmeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let mut crl_profiles = BTreeMap::new();
        crl_profiles.insert(
            "user".to_string(),
            CrlProfileConfig {
                scope: CrlScope::User,
                expires_seconds: 86400,
                refresh_seconds: 3600,
            },
        );
        crl_profiles.insert(
            "ca".to_string(),
            CrlProfileConfig {
                scope: CrlScope::Ca,
                expires_seconds: 86400,
                refresh_seconds: 3600,
            },
        );

        Self {
            default_hash_algorithm: HashAlgorithm::Sha256,
            default_expires_days: 100,
            clock_skew_seconds: 0,
            min_key_size: 2048,
            default_key_size: 4096,
            ca_storage_dir: "files".to_string(),
            default_profile: "webserver".to_string(),
            profiles: BTreeMap::new(),
            crl_profiles,
            ocsp: OcspSettings::default(),
            acme: AcmeSettings::default(),
        }
    }
}

/// CRL配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlProfileConfig {
    pub scope: CrlScope,
    /// nextUpdate距thisUpdate的秒数
    pub expires_seconds: u64,
    /// 缓存的CRL多久后重新签名
    pub refresh_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcspSettings {
    pub response_validity_seconds: u64,
    /// 过期前多久开始后台重新签名
    pub refresh_margin_seconds: u64,
    pub responder_certificate_validity_days: u32,
}

impl Default for OcspSettings {
    fn default() -> Self {
        Self {
            response_validity_seconds: 3600,
            refresh_margin_seconds: 300,
            responder_certificate_validity_days: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeSettings {
    pub order_validity_seconds: u64,
    pub default_cert_validity_days: u32,
    pub max_cert_validity_days: u32,
    pub validation_timeout_seconds: u64,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            order_validity_seconds: 3600,
            default_cert_validity_days: 90,
            max_cert_validity_days: 90,
            validation_timeout_seconds: 10,
        }
    }
}

impl Settings {
    /// 从TOML文件加载
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(config_path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)
            .map_err(|e| PkiError::ConfigError(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// 检查字段之间的约束
    pub fn validate(&self) -> Result<()> {
        if self.default_key_size < self.min_key_size {
            return Err(PkiError::ConfigError(format!(
                "default_key_size ({}) is smaller than min_key_size ({})",
                self.default_key_size, self.min_key_size
            )));
        }
        if !(60..=86400).contains(&self.acme.order_validity_seconds) {
            return Err(PkiError::ConfigError(format!(
                "acme.order_validity_seconds must be between 60 and 86400, got {}",
                self.acme.order_validity_seconds
            )));
        }
        if self.acme.default_cert_validity_days > self.acme.max_cert_validity_days {
            return Err(PkiError::ConfigError(
                "acme.default_cert_validity_days exceeds acme.max_cert_validity_days".to_string(),
            ));
        }
        if self.ocsp.refresh_margin_seconds >= self.ocsp.response_validity_seconds {
            return Err(PkiError::ConfigError(
                "ocsp.refresh_margin_seconds must be smaller than ocsp.response_validity_seconds"
                    .to_string(),
            ));
        }
        for (name, crl) in &self.crl_profiles {
            if crl.refresh_seconds > crl.expires_seconds {
                return Err(PkiError::ConfigError(format!(
                    "CRL profile {name}: refresh_seconds exceeds expires_seconds"
                )));
            }
        }
        Ok(())
    }

    /// 内置模板加上配置中的模板
    pub fn profiles(&self) -> Result<Profiles> {
        Profiles::from_settings(self)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.default_expires_days, 100);
        assert_eq!(settings.default_profile, "webserver");
        assert_eq!(settings.crl_profiles["user"].scope, CrlScope::User);
        settings.validate().unwrap();
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_hash_algorithm = "sha512"
clock_skew_seconds = 60

[acme]
order_validity_seconds = 7200

[profiles.internal]
description = "internal services"
expires_days = 30
overridable = ["subject_alternative_name"]

[profiles.internal.extensions.extended_key_usage]
value = ["serverAuth", "clientAuth"]
"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.default_hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(settings.clock_skew_seconds, 60);
        assert_eq!(settings.acme.order_validity_seconds, 7200);
        assert_eq!(settings.acme.validation_timeout_seconds, 10);
        assert_eq!(settings.min_key_size, 2048);

        let profiles = settings.profiles().unwrap();
        assert!(profiles.get("internal").is_ok());
        assert!(profiles.get("server").is_ok());
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        assert!(Settings::from_toml_str("min_key_size = 4096\ndefault_key_size = 2048").is_err());
        assert!(Settings::from_toml_str("[acme]\norder_validity_seconds = 10").is_err());
        assert!(Settings::from_toml_str("default_expires_days = \"soon\"").is_err());
    }
}
