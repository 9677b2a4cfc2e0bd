// ============================================
// File: src/lib.rs
// ============================================
//! # Secret Channel - Handshake & Stream Encryption Library
//!
//! ## Creation Reason
//! Implements the ["Secret Handshake"](https://dominictarr.github.io/secret-handshake-paper/shs.pdf)
//! protocol of Tarr et al. and the box-stream channel encryption that
//! runs on the session keys it produces. A client and server, each with
//! a long-term Ed25519 key pair and a shared application id, form a
//! mutually authenticated connection; to connect, the client must
//! already know the server's public key.
//!
//! ## Main Functionality
//!
//! ### Handshake ([`handshake`])
//! - `Context` / `Handshake`: the four-message client/server state
//!   machine, driven entirely over caller-owned buffers
//! - Produces a [`Session`]: directional keys, nonces, and the peer's
//!   authenticated identity
//!
//! ### Channel ([`codec`], [`stream`])
//! - `Encryptor` / `Decryptor`: message-at-a-time framed encryption in
//!   either the Compact or the Scuttlebutt-compatible BoxStream layout
//! - `EncryptionStream` / `DecryptionStream`: byte-oriented adapters
//!   with internal buffering and arbitrary chunking
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 host application                    │
//! │        (owns sockets, timeouts, reconnects)         │
//! │            │                        │               │
//! │            ▼                        ▼               │
//! │        handshake ────Session───► codec / stream     │
//! │            │                        │               │
//! │            └──────────┬─────────────┘               │
//! │                       ▼                             │
//! │           keys · session · error                    │
//! └─────────────────────────────────────────────────────┘
//! ```
//! The crate never touches a file or socket: every object is a
//! synchronous, single-threaded state machine over caller buffers.
//!
//! ## Security Guarantees
//! - **Mutual authentication**: Ed25519 signatures inside the handshake
//! - **Forward secrecy**: fresh X25519 ephemerals per handshake
//! - **Confidentiality & integrity**: XSalsa20-Poly1305 secret boxes
//! - **Key binding**: every derived key commits to the application id
//!   and both identities
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses audited RustCrypto / dalek
//!   implementations. NEVER implement custom primitives.
//! - ALL secret material (keys, shared secrets, cleartext buffers) is
//!   zeroized on drop; keep it that way.
//! - The wire format is fixed by the protocol. Byte-order or
//!   concatenation changes break interop with other implementations.
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod error;
pub mod handshake;
pub mod keys;
pub mod session;
pub mod stream;

// Re-export commonly used items
pub use codec::{Decryptor, Encryptor, Frame, Protocol, MAX_MESSAGE_SIZE};
pub use error::{Error, Result};
pub use handshake::{Context, Handshake};
pub use keys::{AppId, KeyPair, PublicKey};
pub use session::{Nonce, Session, SessionKey};
pub use stream::{DecryptionStream, EncryptionStream};
