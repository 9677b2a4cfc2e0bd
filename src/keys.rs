// ============================================
// File: src/keys.rs
// ============================================
//! # Key Material & Application Id
//!
//! ## Creation Reason
//! Defines the long-term identity types the handshake runs on, with
//! proper security properties (zeroize on drop, constant-time
//! comparison).
//!
//! ## Main Functionality
//! - `AppId`: 32-byte application tag shared out-of-band
//! - `KeyPair`: long-term Ed25519 signing keys, seed round-trippable
//! - `PublicKey`: raw 32-byte Ed25519 verification key
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  KeyPair (Long-term)                                       │
//! │  ├─ Generated once, or rebuilt from a stored 32-byte seed  │
//! │  ├─ Signs the handshake's auth and ack payloads            │
//! │  └─ Converts to an X25519 scalar for key agreement         │
//! │                                                            │
//! │  PublicKey (Long-term, public)                             │
//! │  ├─ Carried in config and in the client-auth message       │
//! │  ├─ Verifies handshake signatures                          │
//! │  └─ Converts to a Montgomery point for key agreement       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `PublicKey` stores UNVALIDATED bytes. A client configured with a
//!   corrupted server key must still send its auth message so that the
//!   mismatch is detected on the server side; validation happens only
//!   when a signature is actually verified.
//! - Private key material MUST never be logged or serialized carelessly.
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

// ============================================
// Constants
// ============================================

/// Size of an application id in bytes.
pub const APP_ID_SIZE: usize = 32;

/// Size of an Ed25519 seed in bytes.
pub const SEED_SIZE: usize = 32;

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

// ============================================
// AppId
// ============================================

/// An arbitrary 32-byte value identifying the higher-level application
/// protocol. Client and server must use the same `AppId` to connect.
///
/// The id is usually not secret; it scopes the handshake so that
/// unrelated applications sharing the key infrastructure cannot be
/// cross-connected.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AppId([u8; APP_ID_SIZE]);

impl AppId {
    /// Derives an id from a string: up to 32 bytes of the string are
    /// copied, and the rest is padded with zeroes. Longer strings are
    /// truncated without error.
    #[must_use]
    pub fn from_string(s: &str) -> Self {
        let mut id = [0u8; APP_ID_SIZE];
        let n = s.len().min(APP_ID_SIZE);
        id[..n].copy_from_slice(&s.as_bytes()[..n]);
        Self(id)
    }

    /// Creates an id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; APP_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw id bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; APP_ID_SIZE] {
        &self.0
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl fmt::Debug for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppId({})", hex::encode(self.0))
    }
}

// ============================================
// KeyPair (Ed25519)
// ============================================

/// Long-term Ed25519 identity key pair.
///
/// # Purpose
/// Signs the handshake's auth and ack payloads, proving the identity of
/// the sender, and converts to an X25519 scalar for the long-term
/// shared-secret contributions.
///
/// # Security
/// - The private key is zeroed on drop
/// - Equality compares seeds in constant time
/// - Generate using the OS random number generator
///
/// # Example
/// ```
/// use secret_channel::KeyPair;
///
/// let identity = KeyPair::generate();
/// let restored = KeyPair::from_seed(&identity.seed());
/// assert_eq!(identity, restored);
/// ```
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generates a new random key pair.
    ///
    /// Uses the operating system's secure random number generator.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Reconstitutes a key pair from its 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; SEED_SIZE]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Exports the seed for secure storage.
    ///
    /// # Security Warning
    /// Handle the returned bytes with extreme care. They should be
    /// encrypted before storage and zeroed after use.
    #[must_use]
    pub fn seed(&self) -> [u8; SEED_SIZE] {
        self.signing_key.to_bytes()
    }

    /// Returns the public key component.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Signs a message, returning the 64-byte Ed25519 signature.
    pub(crate) fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Returns the clamped X25519 scalar derived from this key, for
    /// long-term Diffie-Hellman contributions.
    pub(crate) fn to_curve_scalar(&self) -> [u8; 32] {
        self.signing_key.to_scalar_bytes()
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.signing_key.to_bytes();
        let mut b = other.signing_key.to_bytes();
        let eq = bool::from(a.ct_eq(&b));
        a.zeroize();
        b.zeroize();
        eq
    }
}

impl Eq for KeyPair {}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print private key material
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================
// PublicKey
// ============================================

/// A 32-byte Ed25519 public key, stored as raw wire bytes.
///
/// The bytes are deliberately not validated on construction: the
/// handshake must be able to carry a wrong or corrupted key all the way
/// to the peer that can detect the mismatch. Parsing into a verifying
/// key happens at signature-verification time.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Creates a public key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Returns the raw public key bytes (owned).
    #[must_use]
    pub const fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    /// Verifies a signature against this key. Returns `false` for an
    /// invalid signature or for bytes that are not a valid curve point.
    pub(crate) fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let signature = Signature::from_bytes(signature);
        key.verify(message, &signature).is_ok()
    }

    /// Converts to a Montgomery u-coordinate for X25519 key agreement.
    ///
    /// Bytes that fail Edwards decompression fall back to the raw bytes
    /// themselves: the result is deterministic garbage that keeps this
    /// side of the handshake moving, and the peer's box-open fails
    /// instead.
    pub(crate) fn to_curve_bytes(&self) -> [u8; 32] {
        match VerifyingKey::from_bytes(&self.0) {
            Ok(key) => key.to_montgomery().to_bytes(),
            Err(_) => self.0,
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(self.0))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            BASE64.decode(&s).map_err(serde::de::Error::custom)?
        } else {
            <Vec<u8>>::deserialize(deserializer)?
        };
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(serde::de::Error::invalid_length(bytes.len(), &"32 bytes"));
        }
        let mut arr = [0u8; PUBLIC_KEY_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use x25519_dalek::{PublicKey as ExchangePublicKey, StaticSecret};

    #[test]
    fn test_app_id_from_string() {
        let id = AppId::from_string("");
        assert_eq!(
            hex::encode(id.as_bytes()),
            "0000000000000000000000000000000000000000000000000000000000000000"
        );

        let id = AppId::from_string("ABCDEF");
        assert_eq!(
            hex::encode(id.as_bytes()),
            "4142434445460000000000000000000000000000000000000000000000000000"
        );

        let id = AppId::from_string("A string that is too long to fit in an AppID");
        assert_eq!(
            hex::encode(id.as_bytes()),
            "4120737472696e67207468617420697320746f6f206c6f6e6720746f20666974"
        );
    }

    #[test]
    fn test_keypair_generation() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();

        assert_ne!(kp1.public_key(), kp2.public_key());
        assert_ne!(kp1, kp2);
    }

    #[test]
    fn test_keypair_seed_roundtrip() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_seed(&kp.seed());

        assert_eq!(kp, restored);
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn test_sign_verify() {
        let kp = KeyPair::generate();
        let message = b"test message";

        let signature = kp.sign(message);
        assert!(kp.public_key().verify(message, &signature));
        assert!(!kp.public_key().verify(b"wrong message", &signature));

        let mut tampered = signature;
        tampered[0] ^= 0xFF;
        assert!(!kp.public_key().verify(message, &tampered));
    }

    #[test]
    fn test_curve_conversion_agrees() {
        // A's scalar times B's point must equal B's scalar times A's point.
        let a = KeyPair::generate();
        let b = KeyPair::generate();

        let a_secret = StaticSecret::from(a.to_curve_scalar());
        let b_secret = StaticSecret::from(b.to_curve_scalar());

        let ab = a_secret
            .diffie_hellman(&ExchangePublicKey::from(b.public_key().to_curve_bytes()));
        let ba = b_secret
            .diffie_hellman(&ExchangePublicKey::from(a.public_key().to_curve_bytes()));

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_curve_conversion_tolerates_invalid_points() {
        // Corrupted keys must still convert (to deterministic garbage)
        // rather than panic or error.
        let mut bytes = KeyPair::generate().public_key().to_bytes();
        bytes[17] = bytes[17].wrapping_add(1);
        let corrupted = PublicKey::from_bytes(bytes);

        let u1 = corrupted.to_curve_bytes();
        let u2 = corrupted.to_curve_bytes();
        assert_eq!(u1, u2);
    }

    #[test]
    fn test_public_key_serialization() {
        let public = KeyPair::generate().public_key();

        let json = serde_json::to_string(&public).unwrap();
        let restored: PublicKey = serde_json::from_str(&json).unwrap();

        assert_eq!(public, restored);
        assert_eq!(json.trim_matches('"'), public.to_string());
    }
}
