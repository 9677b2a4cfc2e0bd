// ============================================
// File: src/codec.rs
// ============================================
//! # Message Codec
//!
//! ## Creation Reason
//! Provides the framed, authenticated message encryption that runs over
//! the keys and nonces a finished handshake produced.
//!
//! ## Frame Formats
//! ```text
//! Compact (18 bytes overhead, default):
//! ┌──────────────┬─────────────┬──────────────────────────┐
//! │ len_be16     │ mac16       │ ciphertext (len bytes)   │
//! └──────────────┴─────────────┴──────────────────────────┘
//!   cleartext      secret box under (key, nonce); nonce += 1
//!   length
//!
//! BoxStream (34 bytes overhead, Scuttlebutt-compatible):
//! ┌───────────────────────────────┬──────────────────────────┐
//! │ sealed header (34 bytes)      │ ciphertext (len bytes)   │
//! │  = box[key, nonce](           │   detached-mac body      │
//! │      len_be16 ‖ body_mac16)   │   under (key, nonce + 1) │
//! └───────────────────────────────┴──────────────────────────┘
//!   nonce += 2 per frame; frame lengths are not eavesdroppable
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `IncompleteInput` and `OutTooSmall` MUST NOT lose progress: the
//!   caller retries with more data or a bigger buffer. The one nuance
//!   is the BoxStream header, which is opened exactly once and cached.
//! - A `(key, nonce)` pair is never reused; the counter only moves
//!   forward after the corresponding cipher operation succeeded.
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use crypto_secretbox::{
    aead::{AeadInPlace, KeyInit},
    Tag, XSalsa20Poly1305,
};

use crate::error::{Error, Result};
use crate::session::{Nonce, Session, SessionKey};

// ============================================
// Constants
// ============================================

/// Maximum cleartext bytes in a single frame.
pub const MAX_MESSAGE_SIZE: usize = 0xFFFF;

/// Size of a Poly1305 authentication tag in bytes.
pub const MAC_SIZE: usize = 16;

/// Size of the big-endian cleartext-length field.
const LENGTH_SIZE: usize = 2;

/// Compact frame overhead: length field plus box MAC.
const COMPACT_OVERHEAD: usize = LENGTH_SIZE + MAC_SIZE;

/// BoxStream sealed-header size: its own MAC plus the boxed
/// `len_be16 ‖ body_mac16` plaintext.
const BOX_STREAM_HEADER_SIZE: usize = MAC_SIZE + LENGTH_SIZE + MAC_SIZE;

// ============================================
// Protocol
// ============================================

/// Wire layout for encrypted frames, chosen at construction. Both
/// parties must agree; there is no runtime negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    /// Less overhead, but message lengths are eavesdroppable.
    #[default]
    Compact,
    /// Scuttlebutt box-stream compatible. More overhead, but message
    /// lengths are encrypted.
    BoxStream,
}

impl Protocol {
    /// Bytes of overhead per frame.
    #[must_use]
    pub const fn overhead(self) -> usize {
        match self {
            Self::Compact => COMPACT_OVERHEAD,
            Self::BoxStream => BOX_STREAM_HEADER_SIZE,
        }
    }

    /// The encrypted size of a message of `cleartext_size` bytes.
    #[must_use]
    pub const fn encrypted_size(self, cleartext_size: usize) -> usize {
        cleartext_size + self.overhead()
    }
}

// ============================================
// Encryptor
// ============================================

/// Message-oriented encryption bound to the outbound half of a
/// [`Session`]. Each message becomes one self-delimiting frame and
/// advances the nonce as the [`Protocol`] specifies.
pub struct Encryptor {
    key: SessionKey,
    nonce: Nonce,
    protocol: Protocol,
}

impl Encryptor {
    /// Creates an encryptor from a directional key and starting nonce.
    #[must_use]
    pub fn new(key: SessionKey, nonce: Nonce, protocol: Protocol) -> Self {
        Self { key, nonce, protocol }
    }

    /// Creates an encryptor over a session's outbound direction.
    #[must_use]
    pub fn for_session(session: &Session, protocol: Protocol) -> Self {
        Self::new(
            session.encryption_key.clone(),
            session.encryption_nonce.clone(),
            protocol,
        )
    }

    /// The encrypted size of a message of `cleartext_size` bytes.
    #[must_use]
    pub fn encrypted_size(&self, cleartext_size: usize) -> usize {
        self.protocol.encrypted_size(cleartext_size)
    }

    /// The nonce the next frame will consume.
    #[must_use]
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Encrypts one message into `out`, returning the frame size.
    ///
    /// # Errors
    /// - `OutTooSmall` if `out` is shorter than
    ///   [`encrypted_size`](Self::encrypted_size); nothing is consumed
    ///   and the nonce does not advance.
    /// - `MessageTooLarge` above [`MAX_MESSAGE_SIZE`] bytes.
    pub fn encrypt(&mut self, cleartext: &[u8], out: &mut [u8]) -> Result<usize> {
        let frame_size = self.checked_frame_size(cleartext.len(), out.len())?;
        let offset = self.protocol.overhead();
        out[offset..frame_size].copy_from_slice(cleartext);
        self.seal_frame(out, cleartext.len());
        Ok(frame_size)
    }

    /// Like [`encrypt`](Self::encrypt), but the cleartext starts at
    /// `buf[..cleartext_size]` and the frame is written over it; this
    /// is the overlapping-buffer form.
    ///
    /// # Errors
    /// As for [`encrypt`](Self::encrypt), with `buf.len()` as the
    /// output capacity.
    pub fn encrypt_in_place(&mut self, buf: &mut [u8], cleartext_size: usize) -> Result<usize> {
        let frame_size = self.checked_frame_size(cleartext_size, buf.len())?;
        buf.copy_within(..cleartext_size, self.protocol.overhead());
        self.seal_frame(buf, cleartext_size);
        Ok(frame_size)
    }

    fn checked_frame_size(&self, cleartext_size: usize, capacity: usize) -> Result<usize> {
        if cleartext_size > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge {
                max: MAX_MESSAGE_SIZE,
                size: cleartext_size,
            });
        }
        let required = self.protocol.encrypted_size(cleartext_size);
        if capacity < required {
            return Err(Error::OutTooSmall { required });
        }
        Ok(required)
    }

    /// Seals `n` payload bytes already sitting at the frame's payload
    /// offset, then writes the header in front of them.
    fn seal_frame(&mut self, buf: &mut [u8], n: usize) {
        let cipher = XSalsa20Poly1305::new(self.key.as_bytes().into());
        match self.protocol {
            Protocol::Compact => {
                let tag = cipher
                    .encrypt_in_place_detached(
                        self.nonce.as_bytes().into(),
                        b"",
                        &mut buf[COMPACT_OVERHEAD..COMPACT_OVERHEAD + n],
                    )
                    .expect("message size is checked");
                buf[LENGTH_SIZE..COMPACT_OVERHEAD].copy_from_slice(&tag);
                buf[..LENGTH_SIZE].copy_from_slice(&(n as u16).to_be_bytes());
                self.nonce.increment();
            }
            Protocol::BoxStream => {
                // The body seals under the successor nonce so that the
                // header, which carries the body's MAC, seals under the
                // current one and is opened first by the receiver.
                let mut body_nonce = self.nonce.clone();
                body_nonce.increment();
                let body_tag = cipher
                    .encrypt_in_place_detached(
                        body_nonce.as_bytes().into(),
                        b"",
                        &mut buf[BOX_STREAM_HEADER_SIZE..BOX_STREAM_HEADER_SIZE + n],
                    )
                    .expect("message size is checked");
                buf[MAC_SIZE..MAC_SIZE + LENGTH_SIZE]
                    .copy_from_slice(&(n as u16).to_be_bytes());
                buf[MAC_SIZE + LENGTH_SIZE..BOX_STREAM_HEADER_SIZE].copy_from_slice(&body_tag);
                let header_tag = cipher
                    .encrypt_in_place_detached(
                        self.nonce.as_bytes().into(),
                        b"",
                        &mut buf[MAC_SIZE..BOX_STREAM_HEADER_SIZE],
                    )
                    .expect("header size is fixed");
                buf[..MAC_SIZE].copy_from_slice(&header_tag);
                self.nonce = body_nonce;
                self.nonce.increment();
            }
        }
    }
}

// ============================================
// Decryptor
// ============================================

/// A decrypted frame's dimensions, as reported by
/// [`Decryptor::decrypt_in_place`].
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// Cleartext bytes now at the front of the buffer.
    pub cleartext_size: usize,
    /// Total frame bytes consumed from the buffer.
    pub consumed: usize,
}

/// An opened BoxStream header, kept until its body arrives.
#[derive(Clone, Copy)]
struct PendingHeader {
    cleartext_size: usize,
    body_tag: [u8; MAC_SIZE],
}

/// Message-oriented decryption bound to the inbound half of a
/// [`Session`]. Decrypts entire frames created by an [`Encryptor`], in
/// the order they were created.
pub struct Decryptor {
    key: SessionKey,
    nonce: Nonce,
    protocol: Protocol,
    pending: Option<PendingHeader>,
}

impl Decryptor {
    /// Creates a decryptor from a directional key and starting nonce.
    #[must_use]
    pub fn new(key: SessionKey, nonce: Nonce, protocol: Protocol) -> Self {
        Self {
            key,
            nonce,
            protocol,
            pending: None,
        }
    }

    /// Creates a decryptor over a session's inbound direction.
    #[must_use]
    pub fn for_session(session: &Session, protocol: Protocol) -> Self {
        Self::new(
            session.decryption_key.clone(),
            session.decryption_nonce.clone(),
            protocol,
        )
    }

    /// The nonce the next cipher operation will consume.
    #[must_use]
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Reports the cleartext size of the next frame, given its first
    /// bytes. Useful for sizing the output buffer before
    /// [`decrypt`](Self::decrypt).
    ///
    /// In the Compact protocol this reads the 2-byte length field
    /// without any cryptography; treat the answer as advisory until
    /// `decrypt` authenticates the frame. In the BoxStream protocol the
    /// sealed header must be opened, which consumes one nonce; the
    /// opened header is cached, so this is safe to call repeatedly and
    /// `decrypt` will not re-open it.
    ///
    /// # Errors
    /// - `IncompleteInput` below the header size.
    /// - `CorruptData` if the BoxStream header fails authentication.
    pub fn decrypted_size(&mut self, input: &[u8]) -> Result<usize> {
        match self.protocol {
            Protocol::Compact => {
                if input.len() < LENGTH_SIZE {
                    return Err(Error::IncompleteInput);
                }
                Ok(usize::from(u16::from_be_bytes([input[0], input[1]])))
            }
            Protocol::BoxStream => Ok(self.open_header(input)?.cleartext_size),
        }
    }

    /// Decrypts the next complete frame from `input` into `out`.
    ///
    /// On success the input slice is advanced past the consumed frame
    /// (it may still hold further frames, so call again) and the
    /// cleartext size is returned.
    ///
    /// # Errors
    /// - `IncompleteInput` if `input` holds less than one full frame;
    ///   nothing is consumed.
    /// - `OutTooSmall` if `out` cannot hold the cleartext; nothing is
    ///   consumed, and [`decrypted_size`](Self::decrypted_size) tells
    ///   the capacity needed.
    /// - `CorruptData` on authentication failure; the instance must be
    ///   discarded.
    pub fn decrypt(&mut self, input: &mut &[u8], out: &mut [u8]) -> Result<usize> {
        match self.protocol {
            Protocol::Compact => {
                let n = self.decrypted_size(*input)?;
                let frame_size = n + COMPACT_OVERHEAD;
                if input.len() < frame_size {
                    return Err(Error::IncompleteInput);
                }
                if out.len() < n {
                    return Err(Error::OutTooSmall { required: n });
                }
                out[..n].copy_from_slice(&input[COMPACT_OVERHEAD..frame_size]);
                self.cipher()
                    .decrypt_in_place_detached(
                        self.nonce.as_bytes().into(),
                        b"",
                        &mut out[..n],
                        Tag::from_slice(&input[LENGTH_SIZE..COMPACT_OVERHEAD]),
                    )
                    .map_err(|_| Error::CorruptData)?;
                self.nonce.increment();
                let (_, rest) = input.split_at(frame_size);
                *input = rest;
                Ok(n)
            }
            Protocol::BoxStream => {
                let header = self.open_header(*input)?;
                let n = header.cleartext_size;
                let frame_size = n + BOX_STREAM_HEADER_SIZE;
                if input.len() < frame_size {
                    return Err(Error::IncompleteInput);
                }
                if out.len() < n {
                    return Err(Error::OutTooSmall { required: n });
                }
                out[..n].copy_from_slice(&input[BOX_STREAM_HEADER_SIZE..frame_size]);
                self.cipher()
                    .decrypt_in_place_detached(
                        self.nonce.as_bytes().into(),
                        b"",
                        &mut out[..n],
                        Tag::from_slice(&header.body_tag),
                    )
                    .map_err(|_| Error::CorruptData)?;
                self.nonce.increment();
                self.pending = None;
                let (_, rest) = input.split_at(frame_size);
                *input = rest;
                Ok(n)
            }
        }
    }

    /// Decrypts the next complete frame within `buf` itself, leaving
    /// the cleartext at the front; the overlapping-buffer form.
    ///
    /// # Errors
    /// As for [`decrypt`](Self::decrypt), minus `OutTooSmall` (a frame
    /// always shrinks in place).
    pub fn decrypt_in_place(&mut self, buf: &mut [u8]) -> Result<Frame> {
        match self.protocol {
            Protocol::Compact => {
                let n = self.decrypted_size(buf)?;
                let frame_size = n + COMPACT_OVERHEAD;
                if buf.len() < frame_size {
                    return Err(Error::IncompleteInput);
                }
                let (head, body) = buf.split_at_mut(COMPACT_OVERHEAD);
                self.cipher()
                    .decrypt_in_place_detached(
                        self.nonce.as_bytes().into(),
                        b"",
                        &mut body[..n],
                        Tag::from_slice(&head[LENGTH_SIZE..]),
                    )
                    .map_err(|_| Error::CorruptData)?;
                self.nonce.increment();
                buf.copy_within(COMPACT_OVERHEAD..frame_size, 0);
                Ok(Frame {
                    cleartext_size: n,
                    consumed: frame_size,
                })
            }
            Protocol::BoxStream => {
                let header = self.open_header(buf)?;
                let n = header.cleartext_size;
                let frame_size = n + BOX_STREAM_HEADER_SIZE;
                if buf.len() < frame_size {
                    return Err(Error::IncompleteInput);
                }
                self.cipher()
                    .decrypt_in_place_detached(
                        self.nonce.as_bytes().into(),
                        b"",
                        &mut buf[BOX_STREAM_HEADER_SIZE..frame_size],
                        Tag::from_slice(&header.body_tag),
                    )
                    .map_err(|_| Error::CorruptData)?;
                self.nonce.increment();
                self.pending = None;
                buf.copy_within(BOX_STREAM_HEADER_SIZE..frame_size, 0);
                Ok(Frame {
                    cleartext_size: n,
                    consumed: frame_size,
                })
            }
        }
    }

    /// Opens (or returns the cached) BoxStream header at the front of
    /// `input`. Consumes one nonce on first success.
    fn open_header(&mut self, input: &[u8]) -> Result<PendingHeader> {
        if let Some(header) = self.pending {
            return Ok(header);
        }
        if input.len() < BOX_STREAM_HEADER_SIZE {
            return Err(Error::IncompleteInput);
        }
        let mut header = [0u8; LENGTH_SIZE + MAC_SIZE];
        header.copy_from_slice(&input[MAC_SIZE..BOX_STREAM_HEADER_SIZE]);
        self.cipher()
            .decrypt_in_place_detached(
                self.nonce.as_bytes().into(),
                b"",
                &mut header,
                Tag::from_slice(&input[..MAC_SIZE]),
            )
            .map_err(|_| Error::CorruptData)?;
        let mut body_tag = [0u8; MAC_SIZE];
        body_tag.copy_from_slice(&header[LENGTH_SIZE..]);
        let pending = PendingHeader {
            cleartext_size: usize::from(u16::from_be_bytes([header[0], header[1]])),
            body_tag,
        };
        self.nonce.increment();
        self.pending = Some(pending);
        Ok(pending)
    }

    fn cipher(&self) -> XSalsa20Poly1305 {
        XSalsa20Poly1305::new(self.key.as_bytes().into())
    }
}

// ============================================
// Tests
// ============================================
