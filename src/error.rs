// ============================================
// File: src/error.rs
// ============================================
//! # Error Types
//!
//! ## Creation Reason
//! Defines the error vocabulary for handshake and channel operations.
//! Hosts drive both state machines with caller-owned buffers, so most
//! "errors" are ordinary flow control (`IncompleteInput`, `OutTooSmall`)
//! rather than faults.
//!
//! ## Error Categories
//! 1. **Recoverable**: supply more input, or a bigger buffer, and retry
//! 2. **Fatal**: a MAC, box, or signature check failed; the instance is
//!    poisoned and must be discarded
//! 3. **Usage**: an operation was called out of turn; state is unchanged
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - Recoverable errors MUST NOT mutate nonces or buffers
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Result type for handshake and channel operations.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================
// Error
// ============================================

/// Errors reported by the handshake, message codec, and streams.
///
/// # Security Note
/// Error messages are informative for debugging without revealing
/// sensitive information like key material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================
    // Recoverable Conditions
    // ========================================

    /// Not enough input bytes yet; supply more and retry.
    #[error("incomplete input: more bytes are needed")]
    IncompleteInput,

    /// The caller-provided output buffer is too small.
    #[error("output buffer too small: {required} bytes required")]
    OutTooSmall {
        /// Capacity the operation needs
        required: usize,
    },

    /// Operation not valid in the current state. The state is unchanged.
    #[error("invalid state for operation: {operation}")]
    InvalidState {
        /// What operation was attempted
        operation: &'static str,
    },

    // ========================================
    // Fatal Conditions
    // ========================================

    /// Authentication of an encrypted frame failed (tampered data,
    /// wrong key, or a desynchronized nonce).
    #[error("corrupt data: authentication failed")]
    CorruptData,

    /// A message exceeds the per-frame size limit.
    #[error("message too large: max {max} bytes, got {size}")]
    MessageTooLarge {
        /// Maximum cleartext size per frame
        max: usize,
        /// Actual size submitted
        size: usize,
    },

    /// The peer's challenge was malformed: it is not speaking this
    /// protocol, or it uses a different application id.
    #[error("handshake failed: peer is not speaking this protocol")]
    HandshakeProtocol,

    /// The peer failed authentication: a box would not open or a
    /// signature did not verify.
    #[error("handshake failed: peer authentication error")]
    HandshakeAuth,
}

impl Error {
    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if retrying with more input or a larger buffer
    /// can succeed. Recoverable errors never mutate state.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::IncompleteInput | Self::OutTooSmall { .. } | Self::InvalidState { .. }
        )
    }

    /// Returns `true` if the instance that reported this error is
    /// poisoned and must be discarded.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CorruptData | Self::HandshakeProtocol | Self::HandshakeAuth
        )
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::OutTooSmall { required: 62 };
        assert!(err.to_string().contains("62"));

        let err = Error::MessageTooLarge { max: 65535, size: 70000 };
        assert!(err.to_string().contains("65535"));
        assert!(err.to_string().contains("70000"));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::IncompleteInput.is_recoverable());
        assert!(Error::OutTooSmall { required: 1 }.is_recoverable());
        assert!(!Error::IncompleteInput.is_fatal());

        assert!(Error::CorruptData.is_fatal());
        assert!(Error::HandshakeAuth.is_fatal());
        assert!(!Error::CorruptData.is_recoverable());

        let misuse = Error::InvalidState { operation: "send_completed" };
        assert!(misuse.is_recoverable());
        assert!(!misuse.is_fatal());
    }
}
