//! CA配置
//!
//! CRL/OCSP/签发者URL以及签发时的默认值。签发时按模板标志把这些URL写入
//! 证书扩展。

use serde::{Deserialize, Serialize};
use tessera_key::HashAlgorithm;

use crate::{
    error::{PkiError, Result},
    extension::{
        AccessDescription, DistributionPoint, Extension, ExtensionValue, GeneralName,
    },
    oid,
};

/// CA配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// CRL下载地址
    pub crl_urls: Vec<String>,
    /// OCSP响应器地址
    pub ocsp_urls: Vec<String>,
    /// CA证书下载地址（AIA caIssuers）
    pub issuer_urls: Vec<String>,
    /// 签发者备用名称，格式同SAN（如`URI:https://ca.example.com`）
    pub issuer_alternative_names: Vec<String>,
    /// 默认摘要算法，未设置时沿用CA证书自身的算法
    pub default_hash: Option<HashAlgorithm>,
    /// 默认模板，未设置时使用全局默认模板
    pub default_profile: Option<String>,
    /// 是否允许通过ACME签发
    pub acme_enabled: bool,
    /// ACME签发使用的模板
    pub acme_profile: Option<String>,
}

fn uri_names(urls: &[String]) -> Result<Vec<GeneralName>> {
    urls.iter()
        .map(|url| {
            GeneralName::parse_typed("URI", url)
                .map_err(|e| PkiError::ConfigError(format!("invalid URL {url}: {e}")))
        })
        .collect()
}

impl CaConfig {
    pub fn with_crl_url(mut self, url: impl Into<String>) -> Self {
        self.crl_urls.push(url.into());
        self
    }

    pub fn with_ocsp_url(mut self, url: impl Into<String>) -> Self {
        self.ocsp_urls.push(url.into());
        self
    }

    pub fn with_issuer_url(mut self, url: impl Into<String>) -> Self {
        self.issuer_urls.push(url.into());
        self
    }

    /// 检查URL与名称格式
    pub fn validate(&self) -> Result<()> {
        self.crl_distribution_points()?;
        self.authority_information_access(true, true)?;
        self.issuer_alternative_name()?;
        Ok(())
    }

    pub fn crl_names(&self) -> Result<Vec<GeneralName>> {
        uri_names(&self.crl_urls)
    }

    /// 由`crl_urls`生成CRL分发点扩展
    pub fn crl_distribution_points(&self) -> Result<Option<Extension>> {
        let names = self.crl_names()?;
        if names.is_empty() {
            return Ok(None);
        }
        Ok(Some(Extension::new(ExtensionValue::CrlDistributionPoints(
            vec![DistributionPoint::full_name(names)],
        ))))
    }

    /// 由OCSP和签发者URL生成AIA扩展
    pub fn authority_information_access(
        &self,
        include_ocsp: bool,
        include_issuers: bool,
    ) -> Result<Option<Extension>> {
        let mut descriptions = Vec::new();
        if include_ocsp {
            for name in uri_names(&self.ocsp_urls)? {
                descriptions.push(AccessDescription {
                    access_method: oid::AD_OCSP,
                    access_location: name,
                });
            }
        }
        if include_issuers {
            for name in uri_names(&self.issuer_urls)? {
                descriptions.push(AccessDescription {
                    access_method: oid::AD_CA_ISSUERS,
                    access_location: name,
                });
            }
        }
        if descriptions.is_empty() {
            return Ok(None);
        }
        Ok(Some(Extension::new(
            ExtensionValue::AuthorityInformationAccess(descriptions),
        )))
    }

    pub fn issuer_alternative_name(&self) -> Result<Option<Extension>> {
        let names = self
            .issuer_alternative_names
            .iter()
            .map(|name| {
                GeneralName::parse(name)
                    .map_err(|e| PkiError::ConfigError(format!("invalid issuer name {name}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        if names.is_empty() {
            return Ok(None);
        }
        Ok(Some(Extension::new(ExtensionValue::IssuerAlternativeName(
            names,
        ))))
    }
}
