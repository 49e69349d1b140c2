pub mod algorithm;
pub mod error;
pub mod key;
pub mod public;

// Re-export core functionality
pub use algorithm::{Algorithm, HashAlgorithm, SignatureAlgorithm};
pub use error::{Error, Result};
pub use key::{
    util::{
        load_signing_key_from_file, load_signing_key_from_pkcs8_der,
        load_signing_key_from_pkcs8_pem,
    },
    Ed25519Key, Key, KeySign, P256Key, RsaKey, SigningKey,
};
pub use public::PublicKey;
