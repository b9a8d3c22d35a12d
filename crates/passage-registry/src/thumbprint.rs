//! Public-key thumbprint derivation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Derive the stable thumbprint for a PEM-encoded public key.
///
/// SHA-256 over the normalized PEM text (line endings and surrounding
/// whitespace stripped), base64url without padding. Two tunnels opened
/// with the same key always yield the same thumbprint.
pub fn key_thumbprint(public_key_pem: &str) -> String {
    let mut hasher = Sha256::new();
    for line in public_key_pem.lines() {
        hasher.update(line.trim().as_bytes());
    }
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
