//! Bearer credential, resolved token info and the introspection body decoder.

pub mod access_token;
pub mod info;
pub mod mapper;

pub use access_token::AccessToken;
pub use info::{TimeUnit, TokenInfo};
pub use mapper::{MapperSettings, TokenInfoMapper};

use sha2::{Digest, Sha256};

/// Short SHA-256 fingerprint of a raw token, safe to put in logs.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect()
}
