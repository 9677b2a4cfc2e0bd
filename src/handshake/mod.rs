// ============================================
// File: src/handshake/mod.rs
// ============================================
//! # Handshake State Machine
//!
//! ## Creation Reason
//! Sequences the four-message Secret Handshake over caller-owned
//! buffers. The host supplies all I/O; this module only tells it what
//! to send and what to expect next.
//!
//! ## Handshake Flow
//! ```text
//! Client                                          Server
//!   │                                               │
//!   │  client challenge (64 bytes) ───────────────► │  verify HMAC
//!   │                                               │
//!   │  ◄─────────────── server challenge (64 bytes) │
//!   │  verify HMAC                                  │
//!   │                                               │
//!   │  client auth (112 bytes) ───────────────────► │  open box,
//!   │                                               │  verify signature
//!   │  ◄───────────────────── server ack (80 bytes) │
//!   │  open box, verify signature                   │
//!   │                                               │
//!   │ ══════════════ encrypted channel ═══════════ │
//! ```
//!
//! ## I/O Contract
//! At any moment at most one of `bytes_to_send()` and `bytes_to_read()`
//! returns a nonempty region, the side whose turn it is. The host
//! either uses that buffer pair plus `send_completed`/`read_completed`,
//! or the incremental `copy_bytes_to_send`/`receive_bytes` when it works
//! in arbitrary chunks. Out-of-turn completions return `InvalidState`
//! and change nothing.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A failed instance is poisoned: both regions become empty and
//!   `into_session` is invalid. There is no retry within an instance.
//! - A client that was configured with the wrong server key still sends
//!   its auth message; the SERVER is the side that fails. Do not "help"
//!   by short-circuiting on the client.
//!
//! ## Last Modified
//! v0.1.0 - Initial state machine

mod exchange;

use tracing::{debug, trace};
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::keys::{AppId, KeyPair, PublicKey};
use crate::session::Session;

use self::exchange::{Exchange, CHALLENGE_SIZE, CLIENT_AUTH_SIZE, SERVER_ACK_SIZE};

// ============================================
// Context
// ============================================

/// The local state needed to start a handshake: application id plus the
/// participant's own long-term key pair.
#[derive(Clone, Debug)]
pub struct Context {
    /// Arbitrary 32-byte value identifying the application protocol.
    pub app_id: AppId,
    /// The participant's long-term Ed25519 key pair.
    pub key_pair: KeyPair,
}

impl Context {
    /// Creates a context. Accepts anything convertible to an [`AppId`],
    /// including a plain string.
    #[must_use]
    pub fn new(app_id: impl Into<AppId>, key_pair: KeyPair) -> Self {
        Self {
            app_id: app_id.into(),
            key_pair,
        }
    }
}

// ============================================
// Steps & Roles
// ============================================

/// Which of the four wire messages is in flight, or a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    ClientChallenge,
    ServerChallenge,
    ClientAuth,
    ServerAck,
    Finished,
    Failed,
}

impl Step {
    const fn next(self) -> Self {
        match self {
            Self::ClientChallenge => Self::ServerChallenge,
            Self::ServerChallenge => Self::ClientAuth,
            Self::ClientAuth => Self::ServerAck,
            Self::ServerAck | Self::Finished => Self::Finished,
            Self::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

// ============================================
// Handshake
// ============================================

/// One side of a Secret Handshake, client or server.
///
/// # Example
/// ```
/// use secret_channel::{Context, Handshake, KeyPair};
///
/// let server_keys = KeyPair::generate();
/// let client_keys = KeyPair::generate();
///
/// let mut server = Handshake::server(Context::new("App", server_keys.clone()));
/// let mut client = Handshake::client(
///     Context::new("App", client_keys),
///     server_keys.public_key(),
/// );
///
/// let mut step = |src: &mut Handshake, dst: &mut Handshake| {
///     let message = src.bytes_to_send().to_vec();
///     if !message.is_empty() {
///         dst.bytes_to_read().copy_from_slice(&message);
///         dst.read_completed().unwrap();
///         src.send_completed().unwrap();
///     }
/// };
/// while !client.finished() || !server.finished() {
///     step(&mut client, &mut server);
///     step(&mut server, &mut client);
/// }
/// ```
pub struct Handshake {
    role: Role,
    step: Step,
    exchange: Exchange,
    input: Vec<u8>,
    output: Vec<u8>,
    error: Option<Error>,
}

impl Handshake {
    /// Creates the client side. The client must already know the
    /// server's long-term public key.
    #[must_use]
    pub fn client(context: Context, server_public_key: PublicKey) -> Self {
        let mut exchange = Exchange::new(context.app_id, context.key_pair);
        exchange.set_server_public_key(server_public_key);
        Self::new(Role::Client, exchange)
    }

    /// Creates the server side.
    #[must_use]
    pub fn server(context: Context) -> Self {
        Self::new(Role::Server, Exchange::new(context.app_id, context.key_pair))
    }

    fn new(role: Role, exchange: Exchange) -> Self {
        Self {
            role,
            step: Step::ClientChallenge,
            exchange,
            input: Vec::new(),
            output: Vec::new(),
            error: None,
        }
    }

    // ========================================
    // Buffer-Handshaking I/O
    // ========================================

    /// Returns the next outbound message, or an empty slice when it is
    /// not this side's turn to send (or the handshake is terminal).
    /// Call [`send_completed`](Self::send_completed) once the bytes have
    /// been fully consumed.
    pub fn bytes_to_send(&mut self) -> &[u8] {
        if matches!(self.step, Step::Failed | Step::Finished) {
            return &[];
        }
        if self.output.is_empty() && self.is_sender() {
            self.fill_output();
        }
        &self.output
    }

    /// Confirms that the bytes from [`bytes_to_send`](Self::bytes_to_send)
    /// were consumed, advancing the state machine.
    ///
    /// # Errors
    /// `InvalidState` if there was nothing queued to send; the state is
    /// unchanged.
    pub fn send_completed(&mut self) -> Result<()> {
        if self.output.is_empty() {
            return Err(Error::InvalidState {
                operation: "send_completed",
            });
        }
        self.output.clear();
        self.advance();
        Ok(())
    }

    /// Returns a writable region the caller must fill with the exact
    /// next inbound message, or an empty slice when nothing is expected.
    /// Call [`read_completed`](Self::read_completed) once it is filled.
    pub fn bytes_to_read(&mut self) -> &mut [u8] {
        let needed = if matches!(self.step, Step::Failed | Step::Finished) {
            0
        } else {
            self.bytes_needed()
        };
        self.input.resize(needed, 0);
        &mut self.input
    }

    /// Confirms that the region from [`bytes_to_read`](Self::bytes_to_read)
    /// is filled; verifies the message and advances the state machine.
    ///
    /// # Errors
    /// - `InvalidState` if no read was pending; the state is unchanged.
    /// - `HandshakeProtocol` / `HandshakeAuth` if verification failed;
    ///   the handshake is now terminally failed.
    pub fn read_completed(&mut self) -> Result<()> {
        let needed = self.bytes_needed();
        if needed == 0 || self.input.len() != needed {
            return Err(Error::InvalidState {
                operation: "read_completed",
            });
        }
        let ok = self.verify_input();
        self.input.clear();
        if ok {
            self.advance();
            Ok(())
        } else {
            Err(self.fail())
        }
    }

    // ========================================
    // Incremental I/O
    // ========================================

    /// Feeds inbound bytes in arbitrary chunks. Buffers up to the size
    /// of the expected message and completes the read automatically
    /// when it is full.
    ///
    /// Returns the number of bytes consumed; `0` when this side is not
    /// currently expecting input.
    ///
    /// # Errors
    /// The verification error if the completed message was invalid, or
    /// the stored error if the handshake already failed.
    pub fn receive_bytes(&mut self, data: &[u8]) -> Result<usize> {
        if self.step == Step::Failed {
            return Err(self.error.clone().unwrap_or(Error::InvalidState {
                operation: "receive_bytes",
            }));
        }
        let needed = self.bytes_needed();
        if needed == 0 {
            return Ok(0);
        }
        let take = data.len().min(needed - self.input.len());
        self.input.extend_from_slice(&data[..take]);
        if self.input.len() == needed {
            self.read_completed()?;
        } else {
            trace!("{:?} buffered {take} bytes, awaiting more", self.role);
        }
        Ok(take)
    }

    /// Copies outbound bytes into `dst` in arbitrary chunks, advancing
    /// the state machine once the whole message has been drained.
    ///
    /// Returns the number of bytes copied; `0` when there is nothing to
    /// send right now.
    pub fn copy_bytes_to_send(&mut self, dst: &mut [u8]) -> usize {
        if self.bytes_to_send().is_empty() {
            return 0;
        }
        let n = dst.len().min(self.output.len());
        dst[..n].copy_from_slice(&self.output[..n]);
        self.output.drain(..n);
        if self.output.is_empty() {
            self.advance();
        }
        n
    }

    // ========================================
    // Terminal State
    // ========================================

    /// Returns `true` once a verification step has failed. The instance
    /// is poisoned and should be discarded.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.step == Step::Failed
    }

    /// Returns `true` once all four messages have been exchanged.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.step == Step::Finished
    }

    /// The failure, if the handshake has failed.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Consumes the finished handshake and derives the session. The
    /// transcript is destroyed either way.
    ///
    /// # Errors
    /// `InvalidState` unless the handshake [`finished`](Self::finished).
    pub fn into_session(self) -> Result<Session> {
        if self.step != Step::Finished {
            return Err(Error::InvalidState {
                operation: "into_session",
            });
        }
        self.exchange.into_session().ok_or(Error::InvalidState {
            operation: "into_session",
        })
    }

    // ========================================
    // Internal
    // ========================================

    const fn is_sender(&self) -> bool {
        matches!(
            (self.role, self.step),
            (Role::Client, Step::ClientChallenge | Step::ClientAuth)
                | (Role::Server, Step::ServerChallenge | Step::ServerAck)
        )
    }

    const fn bytes_needed(&self) -> usize {
        match (self.role, self.step) {
            (Role::Client, Step::ServerChallenge) | (Role::Server, Step::ClientChallenge) => {
                CHALLENGE_SIZE
            }
            (Role::Server, Step::ClientAuth) => CLIENT_AUTH_SIZE,
            (Role::Client, Step::ServerAck) => SERVER_ACK_SIZE,
            _ => 0,
        }
    }

    fn fill_output(&mut self) {
        let message: Option<Vec<u8>> = match (self.role, self.step) {
            (Role::Client, Step::ClientChallenge) | (Role::Server, Step::ServerChallenge) => {
                Some(self.exchange.create_challenge().to_vec())
            }
            (Role::Client, Step::ClientAuth) => {
                self.exchange.create_client_auth().map(|m| m.to_vec())
            }
            (Role::Server, Step::ServerAck) => {
                self.exchange.create_server_ack().map(|m| m.to_vec())
            }
            _ => None,
        };
        if let Some(message) = message {
            debug!(
                "{:?} queued {} bytes at {:?}",
                self.role,
                message.len(),
                self.step
            );
            self.output = message;
        }
    }

    fn verify_input(&mut self) -> bool {
        match (self.role, self.step) {
            (Role::Client, Step::ServerChallenge) | (Role::Server, Step::ClientChallenge) => {
                match (&self.input[..]).try_into() {
                    Ok(message) => self.exchange.verify_challenge(message),
                    Err(_) => false,
                }
            }
            (Role::Server, Step::ClientAuth) => match (&self.input[..]).try_into() {
                Ok(message) => self.exchange.verify_client_auth(message),
                Err(_) => false,
            },
            (Role::Client, Step::ServerAck) => match (&self.input[..]).try_into() {
                Ok(message) => self.exchange.verify_server_ack(message),
                Err(_) => false,
            },
            _ => false,
        }
    }

    fn advance(&mut self) {
        self.step = self.step.next();
        if self.step == Step::Finished {
            debug!("{:?} handshake finished", self.role);
        } else {
            trace!("{:?} handshake advanced to {:?}", self.role, self.step);
        }
    }

    fn fail(&mut self) -> Error {
        // Failures on the challenges mean the peer speaks another
        // protocol or app id; later ones are authentication failures.
        let error = if matches!(self.step, Step::ClientChallenge | Step::ServerChallenge) {
            Error::HandshakeProtocol
        } else {
            Error::HandshakeAuth
        };
        debug!("{:?} handshake failed at {:?}: {error}", self.role, self.step);
        self.step = Step::Failed;
        self.error = Some(error.clone());
        self.input.zeroize();
        self.input.clear();
        self.output.clear();
        error
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn contexts() -> (KeyPair, KeyPair, Context, Context) {
        let server_keys = KeyPair::generate();
        let client_keys = KeyPair::generate();
        let server_ctx = Context::new("App", server_keys.clone());
        let client_ctx = Context::new("App", client_keys.clone());
        (server_keys, client_keys, server_ctx, client_ctx)
    }

    /// One step of the handshake, checking the alternation contract.
    fn send_from_to(src: &mut Handshake, dst: &mut Handshake, expected: usize) -> bool {
        assert!(src.bytes_to_read().is_empty());
        assert!(dst.bytes_to_send().is_empty());

        let message = src.bytes_to_send().to_vec();
        assert_eq!(message.len(), expected);

        let region = dst.bytes_to_read();
        assert_eq!(region.len(), message.len());
        region.copy_from_slice(&message);

        let read_ok = dst.read_completed().is_ok();
        src.send_completed().unwrap();
        read_ok && !src.failed() && !dst.failed()
    }

    #[test]
    fn test_successful_handshake() {
        let (server_keys, client_keys, server_ctx, client_ctx) = contexts();
        let mut server = Handshake::server(server_ctx);
        let mut client = Handshake::client(client_ctx, server_keys.public_key());

        assert!(send_from_to(&mut client, &mut server, 64));
        assert!(send_from_to(&mut server, &mut client, 64));
        assert!(send_from_to(&mut client, &mut server, 112));
        assert!(send_from_to(&mut server, &mut client, 80));

        assert!(server.finished());
        assert!(client.finished());

        let client_session = client.into_session().unwrap();
        let server_session = server.into_session().unwrap();

        assert_eq!(client_session.encryption_key, server_session.decryption_key);
        assert_eq!(client_session.encryption_nonce, server_session.decryption_nonce);
        assert_eq!(client_session.decryption_key, server_session.encryption_key);
        assert_eq!(client_session.decryption_nonce, server_session.encryption_nonce);

        assert_eq!(server_session.peer_public_key, client_keys.public_key());
        assert_eq!(client_session.peer_public_key, server_keys.public_key());
    }

    #[test]
    fn test_wrong_server_public_key() {
        let (server_keys, client_keys, server_ctx, _) = contexts();
        let mut server = Handshake::server(server_ctx);

        // A client that has the wrong server public key.
        let mut bad_key = server_keys.public_key().to_bytes();
        bad_key[17] = bad_key[17].wrapping_add(1);
        let mut client = Handshake::client(
            Context::new("App", client_keys),
            PublicKey::from_bytes(bad_key),
        );

        // Challenges still succeed; the server fails on the auth box.
        assert!(send_from_to(&mut client, &mut server, 64));
        assert!(send_from_to(&mut server, &mut client, 64));
        assert!(!send_from_to(&mut client, &mut server, 112));

        assert!(server.failed());
        assert_eq!(server.error(), Some(&Error::HandshakeAuth));

        // The poisoned instance offers no further I/O and no session.
        assert!(server.bytes_to_send().is_empty());
        assert!(server.bytes_to_read().is_empty());
        assert!(server.into_session().is_err());
    }

    #[test]
    fn test_mismatched_app_ids_fail_on_first_challenge() {
        let (server_keys, client_keys, server_ctx, _) = contexts();
        let mut server = Handshake::server(server_ctx);
        let mut client = Handshake::client(
            Context::new("Other app", client_keys),
            server_keys.public_key(),
        );

        assert!(!send_from_to(&mut client, &mut server, 64));
        assert!(server.failed());
        assert_eq!(server.error(), Some(&Error::HandshakeProtocol));
    }

    #[test]
    fn test_out_of_turn_calls_leave_state_unchanged() {
        let (server_keys, _, server_ctx, client_ctx) = contexts();
        let mut server = Handshake::server(server_ctx.clone());
        let mut client = Handshake::client(client_ctx, server_keys.public_key());

        // The client starts as the sender; reads are out of turn.
        assert!(matches!(
            client.read_completed(),
            Err(Error::InvalidState { .. })
        ));
        // And the server has nothing queued, so this is out of turn too.
        assert!(matches!(
            server.send_completed(),
            Err(Error::InvalidState { .. })
        ));
        assert!(!client.failed());
        assert!(!server.failed());

        // Both instances still complete normally afterwards.
        assert!(send_from_to(&mut client, &mut server, 64));
        assert!(send_from_to(&mut server, &mut client, 64));
        assert!(send_from_to(&mut client, &mut server, 112));
        assert!(send_from_to(&mut server, &mut client, 80));
        assert!(client.finished() && server.finished());
    }

    #[test]
    fn test_incremental_io() {
        let (server_keys, _, server_ctx, client_ctx) = contexts();
        let mut server = Handshake::server(server_ctx);
        let mut client = Handshake::client(client_ctx, server_keys.public_key());

        // Shuttle the whole handshake through a 7-byte scratch buffer.
        let mut wire = [0u8; 7];
        for _ in 0..200 {
            if client.finished() && server.finished() {
                break;
            }
            let n = client.copy_bytes_to_send(&mut wire);
            if n > 0 {
                assert_eq!(server.receive_bytes(&wire[..n]).unwrap(), n);
            }
            let n = server.copy_bytes_to_send(&mut wire);
            if n > 0 {
                assert_eq!(client.receive_bytes(&wire[..n]).unwrap(), n);
            }
        }

        assert!(client.finished());
        assert!(server.finished());

        let client_session = client.into_session().unwrap();
        let server_session = server.into_session().unwrap();
        assert_eq!(client_session.encryption_key, server_session.decryption_key);
        assert_eq!(client_session.decryption_key, server_session.encryption_key);
    }

    #[test]
    fn test_session_unavailable_before_finish() {
        let (server_keys, _, _, client_ctx) = contexts();
        let client = Handshake::client(client_ctx, server_keys.public_key());
        assert!(matches!(
            client.into_session(),
            Err(Error::InvalidState { .. })
        ));
    }
}
