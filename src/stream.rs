// ============================================
// File: src/stream.rs
// ============================================
//! # Byte-Oriented Stream Adapters
//!
//! ## Creation Reason
//! Wraps the message codec in a push/pull byte-stream API: hosts feed
//! bytes in whatever chunks their transport produces, and frames are
//! assembled or reassembled internally.
//!
//! ## Main Functionality
//! - `EncryptionStream`: push cleartext in, pull ciphertext out;
//!   framing boundaries set by `flush` (or forced by the frame cap)
//! - `DecryptionStream`: push ciphertext in, pull cleartext out;
//!   arbitrary partitions of the byte stream yield identical output
//!
//! ## Buffering Model
//! Each stream keeps one buffer laid out as processed bytes followed by
//! unprocessed bytes. Encryption rewrites the unprocessed tail into a
//! frame in place; decryption shrinks each completed frame in place and
//! drops the leftover gap.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A corrupt push permanently poisons a `DecryptionStream`: once a
//!   MAC fails, the nonce sequence cannot be resynchronized.
//! - Buffers hold cleartext; both are wiped on drop.
//!
//! ## Last Modified
//! v0.1.0 - Initial stream adapters

use tracing::debug;
use zeroize::Zeroize;

use crate::codec::{Decryptor, Encryptor, Protocol, MAX_MESSAGE_SIZE};
use crate::error::Error;
use crate::session::{Nonce, Session, SessionKey};

// ============================================
// StreamBuffer
// ============================================

/// Processed bytes followed by unprocessed bytes, with pull/skip access
/// to the processed prefix. Wiped on drop.
struct StreamBuffer {
    bytes: Vec<u8>,
    processed: usize,
}

impl StreamBuffer {
    const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            processed: 0,
        }
    }

    fn available(&self) -> &[u8] {
        &self.bytes[..self.processed]
    }

    fn unprocessed(&self) -> usize {
        self.bytes.len() - self.processed
    }

    fn skip(&mut self, max_size: usize) -> usize {
        let n = max_size.min(self.processed);
        if n > 0 {
            self.bytes.drain(..n);
            self.processed -= n;
        }
        n
    }

    fn pull(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.processed);
        if n > 0 {
            dst[..n].copy_from_slice(&self.bytes[..n]);
            self.skip(n);
        }
        n
    }

    fn wipe(&mut self) {
        self.bytes.zeroize();
        self.processed = 0;
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

// ============================================
// EncryptionStream
// ============================================

/// Stream-oriented adapter for session encryption: push cleartext
/// bytes in, pull encrypted bytes out. Pull does not have to keep up
/// with push; data is buffered as needed.
pub struct EncryptionStream {
    encryptor: Encryptor,
    buffer: StreamBuffer,
}

impl EncryptionStream {
    /// Creates a stream from a directional key and starting nonce.
    #[must_use]
    pub fn new(key: SessionKey, nonce: Nonce, protocol: Protocol) -> Self {
        Self {
            encryptor: Encryptor::new(key, nonce, protocol),
            buffer: StreamBuffer::new(),
        }
    }

    /// Creates a stream over a session's outbound direction.
    #[must_use]
    pub fn for_session(session: &Session, protocol: Protocol) -> Self {
        Self {
            encryptor: Encryptor::for_session(session, protocol),
            buffer: StreamBuffer::new(),
        }
    }

    /// Encrypts `data` as one frame (plus whatever was already
    /// accumulated). The ciphertext is then available to pull.
    pub fn push(&mut self, data: &[u8]) {
        self.push_partial(data);
        self.flush();
    }

    /// Appends cleartext to the internal accumulator without framing
    /// it yet; call [`flush`](Self::flush) to seal. If the accumulator
    /// would exceed the per-frame cap of [`MAX_MESSAGE_SIZE`] bytes, a
    /// frame is sealed automatically along the way.
    pub fn push_partial(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = MAX_MESSAGE_SIZE - self.buffer.unprocessed();
            let chunk = data.len().min(room);
            self.buffer.bytes.extend_from_slice(&data[..chunk]);
            data = &data[chunk..];
            if !data.is_empty() {
                self.flush();
            }
        }
    }

    /// Seals everything accumulated by
    /// [`push_partial`](Self::push_partial) into exactly one frame,
    /// which is then available to pull. Flushing an empty accumulator
    /// is a no-op: the protocol never emits empty frames.
    pub fn flush(&mut self) {
        let n = self.buffer.unprocessed();
        if n == 0 {
            return;
        }
        let frame_size = self.encryptor.encrypted_size(n);
        let start = self.buffer.processed;
        self.buffer.bytes.resize(start + frame_size, 0);
        let sealed = self.encryptor.encrypt_in_place(&mut self.buffer.bytes[start..], n);
        debug_assert!(sealed.is_ok(), "a sized frame cannot fail to seal");
        self.buffer.processed += frame_size;
    }

    /// Copies up to `dst.len()` ciphertext bytes into `dst`, consuming
    /// them. Returns the number of bytes copied.
    pub fn pull(&mut self, dst: &mut [u8]) -> usize {
        self.buffer.pull(dst)
    }

    /// Ciphertext bytes currently ready to pull.
    #[must_use]
    pub fn bytes_available(&self) -> usize {
        self.buffer.processed
    }

    /// Zero-copy view of the ciphertext ready to pull; call
    /// [`skip`](Self::skip) to consume it. Invalidated by any push.
    #[must_use]
    pub fn available_data(&self) -> &[u8] {
        self.buffer.available()
    }

    /// Drops up to `max_size` already-pullable bytes, returning the
    /// number dropped. Usually follows
    /// [`available_data`](Self::available_data).
    pub fn skip(&mut self, max_size: usize) -> usize {
        self.buffer.skip(max_size)
    }
}

// ============================================
// DecryptionStream
// ============================================

/// Stream-oriented adapter for session decryption: push encrypted
/// bytes in (from the network or wherever, in any chunking), pull
/// decrypted bytes out.
pub struct DecryptionStream {
    decryptor: Decryptor,
    buffer: StreamBuffer,
    poisoned: bool,
}

impl DecryptionStream {
    /// Creates a stream from a directional key and starting nonce.
    #[must_use]
    pub fn new(key: SessionKey, nonce: Nonce, protocol: Protocol) -> Self {
        Self {
            decryptor: Decryptor::new(key, nonce, protocol),
            buffer: StreamBuffer::new(),
            poisoned: false,
        }
    }

    /// Creates a stream over a session's inbound direction.
    #[must_use]
    pub fn for_session(session: &Session, protocol: Protocol) -> Self {
        Self {
            decryptor: Decryptor::for_session(session, protocol),
            buffer: StreamBuffer::new(),
            poisoned: false,
        }
    }

    /// Adds encrypted bytes received from the sender. Complete frames
    /// are decrypted immediately; a partial frame waits for more input.
    ///
    /// Returns `false` if the data is corrupted; the stream is then
    /// permanently poisoned, its buffers are wiped, and every later
    /// `push` or `pull` is inert.
    pub fn push(&mut self, data: &[u8]) -> bool {
        if self.poisoned {
            return false;
        }
        self.buffer.bytes.extend_from_slice(data);
        loop {
            let start = self.buffer.processed;
            match self.decryptor.decrypt_in_place(&mut self.buffer.bytes[start..]) {
                Ok(frame) => {
                    // The frame shrank in place; cut out the gap and
                    // look for another complete frame.
                    let end_of_clear = start + frame.cleartext_size;
                    self.buffer.bytes.drain(end_of_clear..start + frame.consumed);
                    self.buffer.processed = end_of_clear;
                }
                Err(Error::IncompleteInput) => return true,
                Err(error) => {
                    debug!("decryption stream poisoned: {error}");
                    self.poisoned = true;
                    self.buffer.wipe();
                    return false;
                }
            }
        }
    }

    /// Copies up to `dst.len()` cleartext bytes into `dst`, consuming
    /// them. Returns the number of bytes copied; `0` once poisoned.
    pub fn pull(&mut self, dst: &mut [u8]) -> usize {
        if self.poisoned {
            return 0;
        }
        self.buffer.pull(dst)
    }

    /// Cleartext bytes currently ready to pull, exactly what an
    /// unbounded [`pull`](Self::pull) would return.
    #[must_use]
    pub fn bytes_available(&self) -> usize {
        self.buffer.processed
    }

    /// Zero-copy view of the cleartext ready to pull; call
    /// [`skip`](Self::skip) to consume it. Invalidated by any push.
    #[must_use]
    pub fn available_data(&self) -> &[u8] {
        self.buffer.available()
    }

    /// Drops up to `max_size` already-pullable bytes, returning the
    /// number dropped.
    pub fn skip(&mut self, max_size: usize) -> usize {
        if self.poisoned {
            return 0;
        }
        self.buffer.skip(max_size)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{Context, Handshake};
    use crate::keys::{KeyPair, PublicKey};
    use rand::{rngs::OsRng, RngCore};

    fn random<const N: usize>() -> [u8; N] {
        let mut bytes = [0u8; N];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }

    /// Two sessions mirroring each other, as a finished handshake
    /// would produce.
    fn session_pair() -> (Session, Session) {
        let key_ab = random::<32>();
        let key_ba = random::<32>();
        let nonce_ab = random::<24>();
        let nonce_ba = random::<24>();

        let one = Session {
            encryption_key: SessionKey::from_bytes(key_ab),
            encryption_nonce: Nonce::from_bytes(nonce_ab),
            decryption_key: SessionKey::from_bytes(key_ba),
            decryption_nonce: Nonce::from_bytes(nonce_ba),
            peer_public_key: PublicKey::from_bytes(random::<32>()),
        };
        let two = Session {
            encryption_key: SessionKey::from_bytes(key_ba),
            encryption_nonce: Nonce::from_bytes(nonce_ba),
            decryption_key: SessionKey::from_bytes(key_ab),
            decryption_nonce: Nonce::from_bytes(nonce_ab),
            peer_public_key: PublicKey::from_bytes(random::<32>()),
        };
        (one, two)
    }

    fn streams(protocol: Protocol) -> (EncryptionStream, DecryptionStream) {
        let (session1, session2) = session_pair();
        (
            EncryptionStream::for_session(&session1, protocol),
            DecryptionStream::for_session(&session2, protocol),
        )
    }

    fn transfer(enc: &mut EncryptionStream, dec: &mut DecryptionStream, max_size: usize) {
        let mut wire = vec![0u8; max_size];
        let n = enc.pull(&mut wire);
        assert!(dec.push(&wire[..n]));
    }

    fn run_streaming_scenario(protocol: Protocol) {
        let overhead = protocol.overhead();
        let (mut enc, mut dec) = streams(protocol);
        let mut clear_buf = [0u8; 256];
        let mut got = Vec::new();

        assert_eq!(dec.pull(&mut clear_buf), 0);

        // Accumulate a message across partial pushes.
        enc.push_partial(b"Hel");
        assert_eq!(enc.bytes_available(), 0);
        enc.push_partial(b"lo");
        assert_eq!(enc.bytes_available(), 0);
        enc.flush();
        assert_eq!(enc.bytes_available(), 5 + overhead);

        // Transfer it in two parts; nothing decrypts until the frame
        // is complete.
        transfer(&mut enc, &mut dec, 10);
        assert_eq!(enc.bytes_available(), 5 + overhead - 10);
        assert_eq!(dec.bytes_available(), 0);
        transfer(&mut enc, &mut dec, 100);
        assert_eq!(enc.bytes_available(), 0);
        assert_eq!(dec.bytes_available(), 5);

        let n = dec.pull(&mut clear_buf);
        assert_eq!(n, 5);
        got.extend_from_slice(&clear_buf[..n]);
        assert_eq!(got, b"Hello");

        // Two more messages, but only the first is transferred yet.
        enc.push(b" there");
        enc.push_partial(b", world");
        transfer(&mut enc, &mut dec, 100);
        enc.flush();
        assert_eq!(enc.bytes_available(), 7 + overhead);

        // Read part of the first.
        assert_eq!(dec.bytes_available(), 6);
        let mut three = [0u8; 3];
        assert_eq!(dec.pull(&mut three), 3);
        got.extend_from_slice(&three);
        assert_eq!(got, b"Hello th");

        // Transfer the second and drain everything; a pull spans the
        // frame boundary transparently.
        transfer(&mut enc, &mut dec, 100);
        assert_eq!(enc.bytes_available(), 0);
        assert_eq!(dec.bytes_available(), 10);

        let n = dec.pull(&mut clear_buf);
        assert_eq!(n, 10);
        got.extend_from_slice(&clear_buf[..n]);
        assert_eq!(got, b"Hello there, world");

        assert_eq!(dec.pull(&mut clear_buf), 0);
        assert_eq!(dec.bytes_available(), 0);
    }

    #[test]
    fn test_streaming_across_frames_compact() {
        run_streaming_scenario(Protocol::Compact);
    }

    #[test]
    fn test_streaming_across_frames_box_stream() {
        run_streaming_scenario(Protocol::BoxStream);
    }

    fn run_large_stream(protocol: Protocol) {
        let overhead = protocol.overhead();
        let (mut enc, mut dec) = streams(protocol);

        let mut message = vec![0u8; 100_000];
        OsRng.fill_bytes(&mut message);

        // A 30,000-byte message assembled from two partial pushes.
        enc.push_partial(&message[..20_000]);
        assert_eq!(enc.bytes_available(), 0);
        enc.push_partial(&message[20_000..30_000]);
        assert_eq!(enc.bytes_available(), 0);
        enc.flush();
        assert_eq!(enc.bytes_available(), 30_000 + overhead);

        while enc.bytes_available() > 0 {
            transfer(&mut enc, &mut dec, 1000);
        }
        assert_eq!(dec.bytes_available(), 30_000);

        let mut got = vec![0u8; 100_000];
        let n = dec.pull(&mut got);
        assert_eq!(n, 30_000);
        assert_eq!(&got[..n], &message[..30_000]);

        // The remaining 70,000 bytes exceed the frame cap, so the
        // stream splits them into two frames on its own.
        enc.push_partial(&message[30_000..70_000]);
        enc.push_partial(&message[70_000..]);
        enc.flush();
        assert_eq!(enc.bytes_available(), 70_000 + 2 * overhead);

        while enc.bytes_available() > 0 {
            transfer(&mut enc, &mut dec, 1000);
        }
        assert_eq!(dec.bytes_available(), 70_000);

        let n = dec.pull(&mut got);
        assert_eq!(n, 70_000);
        assert_eq!(&got[..n], &message[30_000..]);
    }

    #[test]
    fn test_large_stream_compact() {
        run_large_stream(Protocol::Compact);
    }

    #[test]
    fn test_large_stream_box_stream() {
        run_large_stream(Protocol::BoxStream);
    }

    #[test]
    fn test_corrupt_push_poisons_stream() {
        for protocol in [Protocol::Compact, Protocol::BoxStream] {
            let (mut enc, mut dec) = streams(protocol);

            enc.push(b"an important message");
            let mut frame = vec![0u8; enc.bytes_available()];
            enc.pull(&mut frame);

            let last = frame.len() - 1;
            frame[last] ^= 0xFF;
            assert!(!dec.push(&frame));
            assert_eq!(dec.bytes_available(), 0);

            // Poisoned for good: later pushes and pulls are inert.
            enc.push(b"more data");
            let mut more = vec![0u8; enc.bytes_available()];
            enc.pull(&mut more);
            assert!(!dec.push(&more));
            assert_eq!(dec.pull(&mut [0u8; 64]), 0);
        }
    }

    #[test]
    fn test_available_data_and_skip() {
        let (mut enc, mut dec) = streams(Protocol::Compact);

        enc.push(b"zero copy");
        transfer(&mut enc, &mut dec, 256);

        assert_eq!(dec.available_data(), b"zero copy");
        assert_eq!(dec.skip(4), 4);
        assert_eq!(dec.available_data(), b" copy");
        assert_eq!(dec.skip(100), 5);
        assert_eq!(dec.bytes_available(), 0);
    }

    #[test]
    fn test_byte_by_byte_partition() {
        // Any partition of the ciphertext stream yields the same
        // cleartext; one byte at a time is the worst case.
        for protocol in [Protocol::Compact, Protocol::BoxStream] {
            let (mut enc, mut dec) = streams(protocol);
            enc.push(b"drip");
            enc.push(b"fed");

            let mut wire = vec![0u8; enc.bytes_available()];
            enc.pull(&mut wire);
            for byte in wire {
                assert!(dec.push(&[byte]));
            }

            let mut clear_buf = [0u8; 16];
            let n = dec.pull(&mut clear_buf);
            assert_eq!(&clear_buf[..n], b"dripfed");
        }
    }

    #[test]
    fn test_channel_end_to_end() {
        // Handshake, then talk both ways over the derived sessions.
        let server_keys = KeyPair::generate();
        let client_keys = KeyPair::generate();
        let mut server = Handshake::server(Context::new("App", server_keys.clone()));
        let mut client = Handshake::client(
            Context::new("App", client_keys),
            server_keys.public_key(),
        );

        fn step(src: &mut Handshake, dst: &mut Handshake) {
            let message = src.bytes_to_send().to_vec();
            dst.bytes_to_read().copy_from_slice(&message);
            dst.read_completed().unwrap();
            src.send_completed().unwrap();
        }
        step(&mut client, &mut server);
        step(&mut server, &mut client);
        step(&mut client, &mut server);
        step(&mut server, &mut client);
        let client_session = client.into_session().unwrap();
        let server_session = server.into_session().unwrap();

        let protocol = Protocol::BoxStream;
        let mut to_server = EncryptionStream::for_session(&client_session, protocol);
        let mut from_client = DecryptionStream::for_session(&server_session, protocol);
        let mut to_client = EncryptionStream::for_session(&server_session, protocol);
        let mut from_server = DecryptionStream::for_session(&client_session, protocol);

        to_server.push(b"hello from the client");
        transfer(&mut to_server, &mut from_client, 1024);
        let mut clear_buf = [0u8; 64];
        let n = from_client.pull(&mut clear_buf);
        assert_eq!(&clear_buf[..n], b"hello from the client");

        to_client.push(b"hello from the server");
        transfer(&mut to_client, &mut from_server, 1024);
        let n = from_server.pull(&mut clear_buf);
        assert_eq!(&clear_buf[..n], b"hello from the server");
    }
}
