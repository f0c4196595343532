//! Secret and identifier generation for protocol credentials.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use curve25519_dalek::montgomery::MontgomeryPoint;
use rand::RngCore;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Printable password of exactly `len` characters (base64 alphabet).
pub fn password(len: usize) -> String {
    let mut encoded = STANDARD.encode(random_bytes(len));
    encoded.truncate(len);
    encoded
}

/// Standard base64 of `byte_len` random bytes, as SS-2022 expects for its keys.
pub fn base64_key(byte_len: usize) -> String {
    STANDARD.encode(random_bytes(byte_len))
}

/// Lowercase hex string of `byte_len` random bytes.
pub fn hex_id(byte_len: usize) -> String {
    random_bytes(byte_len)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// X25519 key pair encoded the way Reality expects (base64url, no padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealityKeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl RealityKeyPair {
    pub fn generate() -> Self {
        let mut scalar = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut scalar);
        Self::from_private(scalar)
    }

    pub fn from_private(mut scalar: [u8; 32]) -> Self {
        scalar[0] &= 248;
        scalar[31] &= 127;
        scalar[31] |= 64;
        let public = MontgomeryPoint::mul_base_clamped(scalar);
        Self {
            private_key: URL_SAFE_NO_PAD.encode(scalar),
            public_key: URL_SAFE_NO_PAD.encode(public.to_bytes()),
        }
    }
}
