//! # Crypto Attestation
//!
//! Kapabilitas hashing konten, signing, dan verifikasi attestation.
//!
//! Witness hanya memakai trait [`Hasher`], [`AttestationSigner`], dan
//! [`AttestationVerifier`]. Implementasi bawaan: Ed25519 (ed25519-dalek v2,
//! feature `rand_core`) serta digest SHA-2 / SHA-3.
//!
//! Format key gabungan (64 byte, hex untuk env/config):
//!   [0..32]  = private key bytes
//!   [32..64] = public key bytes

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hex::{decode as hex_decode, encode as hex_encode};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use sha3::Sha3_256;
use thiserror::Error;

use crate::types::{FabricRecord, WitnessAttestation};

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, found {found}")]
    InvalidKeyLength { expected: usize, found: usize },

    #[error("invalid signature length: expected 64, found {0}")]
    InvalidSignatureLength(usize),

    #[error("verification failed")]
    VerifyFailed,

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

// ════════════════════════════════════════════════════════════════════════════
// HASHER
// ════════════════════════════════════════════════════════════════════════════

/// Kapabilitas hash pengikat konten.
pub trait Hasher: Send + Sync {
    /// Tag algoritma singkat, dipakai sebagai prefix digest.
    fn algorithm(&self) -> &'static str;

    /// Digest hex dari `data`, tanpa prefix.
    fn digest_hex(&self, data: &[u8]) -> String;

    /// `<algorithm>:<hex>`
    fn tagged_digest(&self, data: &[u8]) -> String {
        format!("{}:{}", self.algorithm(), self.digest_hex(data))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn algorithm(&self) -> &'static str {
        "sha256"
    }

    fn digest_hex(&self, data: &[u8]) -> String {
        hex_encode(Sha256::digest(data))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha3Hasher;

impl Hasher for Sha3Hasher {
    fn algorithm(&self) -> &'static str {
        "sha3-256"
    }

    fn digest_hex(&self, data: &[u8]) -> String {
        hex_encode(Sha3_256::digest(data))
    }
}

/// State hash atas konten kanonik record.
pub fn record_state_hash(hasher: &dyn Hasher, record: &FabricRecord) -> String {
    hasher.tagged_digest(&record.content_bytes())
}

// ════════════════════════════════════════════════════════════════════════════
// SIGNER / VERIFIER
// ════════════════════════════════════════════════════════════════════════════

/// Kapabilitas signing attestation.
pub trait AttestationSigner: Send + Sync {
    /// Identitas publik key (hex public key untuk ed25519).
    fn key_id(&self) -> String;

    /// Sign `message`, mengembalikan signature hex.
    fn sign(&self, message: &[u8]) -> Result<String, CryptoError>;
}

/// Kapabilitas verifikasi attestation.
pub trait AttestationVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature_hex: &str) -> Result<bool, CryptoError>;
}

/// Signer ed25519 di atas `SigningKey` dalek.
#[derive(Clone)]
pub struct Ed25519Signer {
    key: SigningKey,
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.key_id())
            .finish()
    }
}

impl Ed25519Signer {
    /// Key acak baru.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            key: SigningKey::generate(&mut rng),
        }
    }

    /// Dari hex keypair gabungan 64 byte.
    pub fn from_keypair_hex(hexstr: &str) -> Result<Self, CryptoError> {
        let bytes = hex_decode(hexstr.trim())?;
        Ok(Self {
            key: signing_key_from_bytes(&bytes)?,
        })
    }

    /// Keypair gabungan sebagai hex (private + public).
    #[must_use]
    pub fn keypair_hex(&self) -> String {
        let mut combined = Vec::with_capacity(64);
        combined.extend_from_slice(&self.key.to_bytes());
        combined.extend_from_slice(&self.key.verifying_key().to_bytes());
        hex_encode(combined)
    }

    #[must_use]
    pub fn verifier(&self) -> Ed25519Verifier {
        Ed25519Verifier {
            key: self.key.verifying_key(),
        }
    }
}

impl AttestationSigner for Ed25519Signer {
    fn key_id(&self) -> String {
        hex_encode(self.key.verifying_key().to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Result<String, CryptoError> {
        let sig = self.key.sign(message);
        Ok(hex_encode(sig.to_bytes()))
    }
}

/// Verifier ed25519 untuk satu public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn from_public_key_hex(hexstr: &str) -> Result<Self, CryptoError> {
        let bytes = hex_decode(hexstr.trim())?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength { expected: 32, found: bytes.len() });
        }
        let mut pk_arr = [0u8; 32];
        pk_arr.copy_from_slice(&bytes);
        let key = VerifyingKey::from_bytes(&pk_arr).map_err(|_| CryptoError::VerifyFailed)?;
        Ok(Self { key })
    }
}

impl AttestationVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature_hex: &str) -> Result<bool, CryptoError> {
        let sig_bytes = hex_decode(signature_hex)?;
        if sig_bytes.len() != 64 {
            return Err(CryptoError::InvalidSignatureLength(sig_bytes.len()));
        }
        let mut sig_arr = [0u8; 64];
        sig_arr.copy_from_slice(&sig_bytes);
        let sig = Signature::from_bytes(&sig_arr);

        match self.key.verify(message, &sig) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey, CryptoError> {
    if bytes.len() != 64 {
        return Err(CryptoError::InvalidKeyLength { expected: 64, found: bytes.len() });
    }
    let mut sk_bytes = [0u8; 32];
    sk_bytes.copy_from_slice(&bytes[0..32]);
    Ok(SigningKey::from_bytes(&sk_bytes))
}

/// Cek signature attestation. Attestation tanpa signature menghasilkan `false`.
pub fn verify_attestation(
    verifier: &dyn AttestationVerifier,
    attestation: &WitnessAttestation,
) -> Result<bool, CryptoError> {
    match &attestation.signature {
        Some(sig) => verifier.verify(&attestation.signable_bytes(), sig),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StateView;
    use chrono::Utc;

    fn sample_attestation() -> WitnessAttestation {
        WitnessAttestation {
            witness_id: "w1".to_string(),
            accept: true,
            ts: Utc::now(),
            state_view: StateView {
                record_id: "r1".to_string(),
                order: 1,
                size: 23,
                state_hash: Some("sha256:00".to_string()),
                prev_record_id: None,
            },
            signature: None,
            conflict_ref: None,
        }
    }

    #[test]
    fn test_sign_verify_attestation() {
        let signer = Ed25519Signer::generate();
        let mut att = sample_attestation();
        att.signature = Some(signer.sign(&att.signable_bytes()).expect("sign"));

        let verifier = signer.verifier();
        assert!(verify_attestation(&verifier, &att).expect("verify"));

        // tamper state view
        att.state_view.order = 2;
        assert!(!verify_attestation(&verifier, &att).expect("verify"));
    }

    #[test]
    fn test_unsigned_attestation_does_not_verify() {
        let signer = Ed25519Signer::generate();
        let att = sample_attestation();
        assert!(!verify_attestation(&signer.verifier(), &att).expect("verify"));
    }

    #[test]
    fn test_keypair_hex_roundtrip() {
        let signer = Ed25519Signer::generate();
        let restored = Ed25519Signer::from_keypair_hex(&signer.keypair_hex()).expect("restore");
        assert_eq!(signer.key_id(), restored.key_id());

        let verifier = Ed25519Verifier::from_public_key_hex(&signer.key_id()).expect("pk");
        let sig = restored.sign(b"hello fabric").expect("sign");
        assert!(verifier.verify(b"hello fabric", &sig).expect("verify"));
    }

    #[test]
    fn test_bad_key_lengths() {
        assert!(matches!(
            Ed25519Signer::from_keypair_hex("abcd"),
            Err(CryptoError::InvalidKeyLength { expected: 64, found: 2 })
        ));
        assert!(matches!(
            Ed25519Verifier::from_public_key_hex("zz"),
            Err(CryptoError::Hex(_))
        ));
    }

    #[test]
    fn test_hashers_tag_their_digest() {
        let d = Sha256Hasher.tagged_digest(b"abc");
        assert_eq!(
            d,
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(Sha3Hasher.tagged_digest(b"abc").starts_with("sha3-256:"));
        assert_ne!(Sha256Hasher.digest_hex(b"abc"), Sha3Hasher.digest_hex(b"abc"));
    }
}
