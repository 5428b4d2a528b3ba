//! Per-network key material.
//!
//! A [`NetworkCredentials`] value is loaded once per network and never
//! mutated. It is owned by whoever drives the mesh (the controller) and passed
//! by reference into session handshakes; there is no process-wide key state.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Length of network and session keys
pub const KEY_LEN: usize = 16;

/// Length of truncated handshake proofs
pub const PROOF_LEN: usize = 8;

/// Suffix appended to the passphrase before hashing (`00 'M' 'C' 'P'`)
const PASSPHRASE_SUFFIX: [u8; 4] = [0x00, 0x4D, 0x43, 0x50];

const SESSION_MATERIAL_LABEL: &[u8] = b"halo/session-material";
const SESSION_KEY_INFO: &[u8] = b"halo/session";

/// 128-bit network key shared by every device in a mesh
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeshKey(#[serde(with = "hex")] [u8; KEY_LEN]);

impl MeshKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the network key from the network passphrase.
    ///
    /// SHA-256 over the passphrase and a fixed suffix, byte-reversed, first
    /// sixteen bytes.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        hasher.update(PASSPHRASE_SUFFIX);
        let digest = hasher.finalize();

        let mut key = [0u8; KEY_LEN];
        for (dst, src) in key.iter_mut().zip(digest.iter().rev()) {
            *dst = *src;
        }
        Self(key)
    }

    /// Parse a hex-encoded key
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut key = [0u8; KEY_LEN];
        hex::decode_to_slice(s.trim(), &mut key)?;
        Ok(Self(key))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short non-secret identifier for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for MeshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshKey({})", self.fingerprint())
    }
}

/// Per-connection key negotiated by the session handshake
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Cryptographic material for one mesh network
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkCredentials {
    network_id: String,
    network_key: MeshKey,
    session_material: [u8; 32],
}

impl NetworkCredentials {
    /// Build credentials from a network key
    pub fn new(network_id: impl Into<String>, network_key: MeshKey) -> Self {
        let mut mac = new_mac(network_key.as_bytes());
        mac.update(SESSION_MATERIAL_LABEL);
        let session_material = mac.finalize().into_bytes().into();

        Self {
            network_id: network_id.into(),
            network_key,
            session_material,
        }
    }

    /// Build credentials from the network passphrase
    pub fn from_passphrase(network_id: impl Into<String>, passphrase: &str) -> Self {
        Self::new(network_id, MeshKey::from_passphrase(passphrase))
    }

    /// Network identifier
    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    /// Network key
    pub fn network_key(&self) -> &MeshKey {
        &self.network_key
    }

    /// Truncated HMAC over a label and message parts, keyed by the network key
    pub fn proof(&self, label: &[u8], parts: &[&[u8]]) -> [u8; PROOF_LEN] {
        let mac = self.keyed_mac(label, parts);
        let tag = mac.finalize().into_bytes();

        let mut proof = [0u8; PROOF_LEN];
        proof.copy_from_slice(&tag[..PROOF_LEN]);
        proof
    }

    /// Constant-time check of a proof produced by [`proof`](Self::proof)
    pub fn verify_proof(&self, label: &[u8], parts: &[&[u8]], proof: &[u8]) -> bool {
        if proof.len() != PROOF_LEN {
            return false;
        }
        self.keyed_mac(label, parts)
            .verify_truncated_left(proof)
            .is_ok()
    }

    /// Derive the session key for one connection from both handshake nonces
    pub fn derive_session_key(&self, host_nonce: &[u8], device_nonce: &[u8]) -> SessionKey {
        let mut salt = Vec::with_capacity(host_nonce.len() + device_nonce.len());
        salt.extend_from_slice(host_nonce);
        salt.extend_from_slice(device_nonce);

        let hk = Hkdf::<Sha256>::new(Some(&salt), &self.session_material);
        let mut okm = [0u8; KEY_LEN];
        hk.expand(SESSION_KEY_INFO, &mut okm)
            .expect("16 bytes is a valid HKDF-SHA256 output length");
        SessionKey(okm)
    }

    fn keyed_mac(&self, label: &[u8], parts: &[&[u8]]) -> HmacSha256 {
        let mut mac = new_mac(self.network_key.as_bytes());
        mac.update(label);
        for part in parts {
            mac.update(part);
        }
        mac
    }
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("network_id", &self.network_id)
            .field("network_key", &self.network_key)
            .finish_non_exhaustive()
    }
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_key_is_stable() {
        let a = MeshKey::from_passphrase("correct horse");
        let b = MeshKey::from_passphrase("correct horse");
        let c = MeshKey::from_passphrase("battery staple");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_passphrase_key_is_reversed_digest() {
        let mut hasher = Sha256::new();
        hasher.update(b"abc");
        hasher.update(PASSPHRASE_SUFFIX);
        let digest = hasher.finalize();

        let key = MeshKey::from_passphrase("abc");
        assert_eq!(key.as_bytes()[0], digest[31]);
        assert_eq!(key.as_bytes()[15], digest[16]);
    }

    #[test]
    fn test_key_hex_serde() {
        let key = MeshKey::from_bytes([0xAB; KEY_LEN]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(KEY_LEN)));

        let back: MeshKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert_eq!(MeshKey::from_hex(&"ab".repeat(KEY_LEN)).unwrap(), key);
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let creds = NetworkCredentials::new("N1", MeshKey::from_bytes([0x11; KEY_LEN]));
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains(&"11".repeat(KEY_LEN)));
        assert!(rendered.contains("N1"));
    }

    #[test]
    fn test_proof_verification() {
        let creds = NetworkCredentials::from_passphrase("N1", "secret");
        let other = NetworkCredentials::from_passphrase("N1", "wrong");

        let proof = creds.proof(b"label", &[b"nonce"]);
        assert!(creds.verify_proof(b"label", &[b"nonce"], &proof));
        assert!(!creds.verify_proof(b"label", &[b"other"], &proof));
        assert!(!other.verify_proof(b"label", &[b"nonce"], &proof));
        assert!(!creds.verify_proof(b"label", &[b"nonce"], &proof[..4]));
    }

    #[test]
    fn test_session_key_depends_on_both_nonces() {
        let creds = NetworkCredentials::from_passphrase("N1", "secret");
        let k1 = creds.derive_session_key(&[1; 8], &[2; 8]);
        let k2 = creds.derive_session_key(&[1; 8], &[2; 8]);
        let k3 = creds.derive_session_key(&[1; 8], &[3; 8]);
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }
}
