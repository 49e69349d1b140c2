//! Tessera PKI - 证书颁发机构引擎
//!
//! 提供X.509扩展编解码、证书模板、证书签发、序列号分配，以及撤销、CRL与
//! OCSP服务

pub mod asn1;
pub mod builder;
pub mod ca;
pub mod cert;
pub mod csr;
pub mod error;
pub mod extension;
pub mod name;
pub mod oid;
pub mod profile;
pub mod serial;
pub mod settings;
pub mod status;
pub mod types;

// 重新导出常用类型
pub use builder::{IssueOptions, IssueRequest, SubjectKey};
pub use ca::{CaConfig, CertificateAuthority};
pub use cert::{Certificate, CertificateData};
pub use csr::Csr;
pub use error::{DecodeError, PkiError, ProfileError, Result};
pub use extension::{
    overrides_from_wire, Extension, ExtensionKind, ExtensionOverride, ExtensionValue, GeneralName,
};
pub use name::Subject;
pub use profile::{Profile, ProfileConfig, ProfileFlags, Profiles, ResolvedExtensions};
pub use serial::SerialAllocator;
pub use settings::Settings;
pub use status::{
    CertIdHash, CrlScope, OcspQuery, OcspResponder, RevocationEntry, SignedCrl,
    SignedOcspResponse, StatusManager,
};
pub use types::{CertificateKind, CertificateStatus, Revocation, RevocationReason};

/// 预导入模块，包含最常用的类型
pub mod prelude {
    pub use crate::{
        builder::{IssueRequest, SubjectKey},
        ca::{CaConfig, CertificateAuthority},
        cert::Certificate,
        error::{PkiError, Result},
        extension::{ExtensionKind, ExtensionValue},
        name::Subject,
        settings::Settings,
        status::{CrlScope, OcspQuery, StatusManager},
        types::{CertificateStatus, RevocationReason},
    };
}
