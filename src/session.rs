// ============================================
// File: src/session.rs
// ============================================
//! # Session Types
//!
//! ## Creation Reason
//! Defines the symmetric material a finished handshake produces: one
//! key and nonce per direction, plus the peer's authenticated identity.
//!
//! ## Main Functionality
//! - `SessionKey`: 32-byte secret-box key (zeroized, constant-time eq)
//! - `Nonce`: 24-byte big-endian frame counter
//! - `Session`: the full directional bundle
//!
//! ## ⚠️ Important Note for Next Developer
//! - The two nonce counters in a `Session` are independent; the
//!   encrypting and decrypting halves of a connection advance them
//!   separately.
//! - A `(key, nonce)` pair is NEVER reused. Counter wrap-around (2^192
//!   frames) is outside the protocol's scope.
//!
//! ## Last Modified
//! v0.1.0 - Initial session types

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::PublicKey;

// ============================================
// Constants
// ============================================

/// Size of a session key in bytes.
pub const SESSION_KEY_SIZE: usize = 32;

/// Size of a frame nonce in bytes.
pub const NONCE_SIZE: usize = 24;

// ============================================
// SessionKey
// ============================================

/// Symmetric session key for one direction of a channel.
///
/// # Security
/// - Zeroed on drop
/// - Never logged or serialized
/// - Constant-time comparison
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Creates a session key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    ///
    /// # Security Warning
    /// Handle the returned reference carefully. Do not log or store the
    /// key material in unprotected storage.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        write!(f, "SessionKey([REDACTED])")
    }
}

// ============================================
// Nonce
// ============================================

/// A 24-byte nonce, treated as a big-endian counter.
///
/// The handshake seeds each direction's initial nonce from an HMAC of
/// the sender's ephemeral key; each frame consumption increments it by
/// exactly one.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Creates a nonce from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw nonce bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Increments the counter by one, big-endian.
    pub(crate) fn increment(&mut self) {
        for byte in self.0.iter_mut().rev() {
            let (value, carry) = byte.overflowing_add(1);
            *byte = value;
            if !carry {
                break;
            }
        }
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

// ============================================
// Session
// ============================================

/// Result of a successful handshake: per-direction keys and nonces,
/// plus the peer's long-term public key (which is news to the server,
/// but not to the client).
///
/// Between two finished peers A and B, `A.encryption_key ==
/// B.decryption_key` and `A.encryption_nonce == B.decryption_nonce`,
/// and symmetrically. Fields are public so hosts and test harnesses can
/// split or fabricate sessions as needed.
#[derive(Clone, Debug)]
pub struct Session {
    /// Key for the outbound direction.
    pub encryption_key: SessionKey,
    /// Initial nonce for the outbound direction.
    pub encryption_nonce: Nonce,
    /// Key for the inbound direction.
    pub decryption_key: SessionKey,
    /// Initial nonce for the inbound direction.
    pub decryption_nonce: Nonce,
    /// The peer's authenticated long-term public key.
    pub peer_public_key: PublicKey,
}

// ============================================
// Tests
// ============================================
