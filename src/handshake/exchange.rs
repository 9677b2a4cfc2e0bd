// ============================================
// File: src/handshake/exchange.rs
// ============================================
//! # Handshake Exchange Core
//!
//! ## Creation Reason
//! Implements the cryptographic operations behind the four handshake
//! messages, separate from the I/O state machine that sequences them.
//!
//! ## Protocol Math
//! With `K` the application id, `(A, Ap)`/`(B, Bp)` the client/server
//! long-term Ed25519 pairs, and `(a, ap)`/`(b, bp)` the per-handshake
//! X25519 ephemerals (`x·y` is scalar multiplication, `hmac` is
//! HMAC-SHA-512 truncated to 32 bytes, `box` a zero-nonce
//! XSalsa20-Poly1305 secret box):
//!
//! ```text
//! 1. client challenge :  hmac[K](ap) ‖ ap                          (64)
//! 2. server challenge :  hmac[K](bp) ‖ bp                          (64)
//! 3. client auth      :  box[SHA256(K ‖ a·b ‖ a·B)](H)            (112)
//!                        where H = sign[A](K ‖ Bp ‖ SHA256(a·b)) ‖ Ap
//! 4. server ack       :  box[SHA256(K ‖ a·b ‖ a·B ‖ A·b)](        (80)
//!                            sign[B](K ‖ H ‖ SHA256(a·b)))
//! ```
//!
//! Afterwards, with `h = SHA256(SHA256(K ‖ a·b ‖ a·B ‖ A·b))`, each
//! side encrypts under `SHA256(h ‖ peer_longterm)` starting at nonce
//! `hmac[K](peer_ephemeral)[..24]`, and decrypts under the mirror pair.
//!
//! Long-term keys enter the scalar multiplications through the standard
//! Ed25519→X25519 birational map. The zero box nonces are safe because
//! every box key is derived from this handshake's ephemerals and used
//! exactly once.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The payload layouts and hash orderings above are the wire format;
//!   reordering any concatenation breaks interop.
//! - All shared secrets and the client proof are wiped on drop.
//!
//! ## Last Modified
//! v0.1.0 - Initial exchange implementation

use crypto_secretbox::{
    aead::{AeadInPlace, KeyInit},
    Nonce as SecretBoxNonce, Tag, XSalsa20Poly1305,
};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as ExchangePublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::keys::{AppId, KeyPair, PublicKey, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::session::{Nonce, Session, SessionKey, NONCE_SIZE};

// ============================================
// Constants
// ============================================

/// Wire size of the client and server challenge messages.
pub(crate) const CHALLENGE_SIZE: usize = 64;

/// Wire size of the client auth message.
pub(crate) const CLIENT_AUTH_SIZE: usize = 112;

/// Wire size of the server ack message.
pub(crate) const SERVER_ACK_SIZE: usize = 80;

const MAC_SIZE: usize = 16;

/// `sign[A](K ‖ Bp ‖ SHA256(a·b)) ‖ Ap`: the client auth payload.
const PROOF_SIZE: usize = SIGNATURE_SIZE + PUBLIC_KEY_SIZE;

// ============================================
// Primitive Helpers
// ============================================

type HmacSha512 = Hmac<Sha512>;

/// SHA-256 over the concatenation of `parts`.
fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// First 32 bytes of HMAC-SHA-512 (HMAC-SHA-512-256).
fn hmac_tag(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    let mut mac: HmacSha512 = Mac::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut tag = [0u8; 32];
    tag.copy_from_slice(&digest[..32]);
    tag
}

/// Constant-time check of a truncated HMAC-SHA-512 tag.
fn hmac_verify(key: &[u8; 32], data: &[u8], tag: &[u8]) -> bool {
    let mut mac: HmacSha512 = Mac::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.verify_truncated_left(tag).is_ok()
}

/// Zero-nonce secret box; `out` receives `mac ‖ ciphertext`.
fn seal(key: &[u8; 32], plaintext: &[u8], out: &mut [u8]) {
    debug_assert_eq!(out.len(), plaintext.len() + MAC_SIZE);
    let cipher = XSalsa20Poly1305::new(key.into());
    out[MAC_SIZE..].copy_from_slice(plaintext);
    let tag = cipher
        .encrypt_in_place_detached(&SecretBoxNonce::default(), b"", &mut out[MAC_SIZE..])
        .expect("handshake payloads are within the cipher limit");
    out[..MAC_SIZE].copy_from_slice(&tag);
}

/// Opens a zero-nonce secret box. On failure `out` holds garbage.
fn open(key: &[u8; 32], sealed: &[u8], out: &mut [u8]) -> bool {
    debug_assert_eq!(sealed.len(), out.len() + MAC_SIZE);
    let cipher = XSalsa20Poly1305::new(key.into());
    out.copy_from_slice(&sealed[MAC_SIZE..]);
    cipher
        .decrypt_in_place_detached(
            &SecretBoxNonce::default(),
            b"",
            out,
            Tag::from_slice(&sealed[..MAC_SIZE]),
        )
        .is_ok()
}

/// `K ‖ key ‖ SHA256(a·b)`: what the client signs and the server checks.
fn signing_payload(app_id: &AppId, key: &PublicKey, ee_hash: &[u8; 32]) -> [u8; 96] {
    let mut payload = [0u8; 96];
    payload[..32].copy_from_slice(app_id.as_bytes());
    payload[32..64].copy_from_slice(key.as_bytes());
    payload[64..].copy_from_slice(ee_hash);
    payload
}

/// `K ‖ H ‖ SHA256(a·b)`: what the server signs and the client checks.
fn ack_payload(app_id: &AppId, proof: &[u8; PROOF_SIZE], ee_hash: &[u8; 32]) -> [u8; 160] {
    let mut payload = [0u8; 160];
    payload[..32].copy_from_slice(app_id.as_bytes());
    payload[32..128].copy_from_slice(proof);
    payload[128..].copy_from_slice(ee_hash);
    payload
}

/// `SHA256(K ‖ a·b ‖ a·B)`: the client-auth box key.
fn derive_auth_key(app_id: &AppId, shared_ee: &[u8], shared_es: &[u8]) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(sha256(&[app_id.as_bytes(), shared_ee, shared_es]))
}

fn truncate_to_nonce(tag: &[u8; 32]) -> Nonce {
    let mut bytes = [0u8; NONCE_SIZE];
    bytes.copy_from_slice(&tag[..NONCE_SIZE]);
    Nonce::from_bytes(bytes)
}

// ============================================
// Exchange
// ============================================

/// Accumulating cryptographic state for one handshake attempt.
///
/// The surrounding state machine guarantees call order; every method
/// here simply reports `false`/`None` if invoked before its inputs
/// exist. Dropping an `Exchange` wipes the transcript.
pub(crate) struct Exchange {
    app_id: AppId,
    key_pair: KeyPair,
    public_key: PublicKey,
    ephemeral_secret: StaticSecret,
    ephemeral_public: [u8; 32],

    // Learned or derived as the handshake progresses:
    peer_public: Option<PublicKey>,
    peer_ephemeral: Option<[u8; 32]>,
    shared_ee: Option<Zeroizing<[u8; 32]>>, // a·b
    shared_ee_hash: Option<[u8; 32]>,       // SHA256(a·b)
    shared_es: Option<Zeroizing<[u8; 32]>>, // a·B, also B·ap
    shared_se: Option<Zeroizing<[u8; 32]>>, // A·b, also b·Ap
    ack_key: Option<Zeroizing<[u8; 32]>>,   // SHA256(K ‖ a·b ‖ a·B ‖ A·b)
    client_proof: Option<Zeroizing<[u8; PROOF_SIZE]>>, // H
}

impl Exchange {
    pub fn new(app_id: AppId, key_pair: KeyPair) -> Self {
        let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = ExchangePublicKey::from(&ephemeral_secret).to_bytes();
        let public_key = key_pair.public_key();
        Self {
            app_id,
            key_pair,
            public_key,
            ephemeral_secret,
            ephemeral_public,
            peer_public: None,
            peer_ephemeral: None,
            shared_ee: None,
            shared_ee_hash: None,
            shared_es: None,
            shared_se: None,
            ack_key: None,
            client_proof: None,
        }
    }

    /// Clients know the server's long-term key before connecting.
    pub fn set_server_public_key(&mut self, key: PublicKey) {
        self.peer_public = Some(key);
    }

    /// `hmac[K](xp) ‖ xp`: either side's challenge.
    pub fn create_challenge(&self) -> [u8; CHALLENGE_SIZE] {
        let mut challenge = [0u8; CHALLENGE_SIZE];
        let tag = hmac_tag(self.app_id.as_bytes(), &self.ephemeral_public);
        challenge[..32].copy_from_slice(&tag);
        challenge[32..].copy_from_slice(&self.ephemeral_public);
        challenge
    }

    /// Checks the peer's challenge HMAC; on success records the peer
    /// ephemeral and derives `a·b`.
    pub fn verify_challenge(&mut self, challenge: &[u8; CHALLENGE_SIZE]) -> bool {
        let (tag, peer_ephemeral) = challenge.split_at(32);
        if !hmac_verify(self.app_id.as_bytes(), peer_ephemeral, tag) {
            return false;
        }
        let mut ephemeral = [0u8; 32];
        ephemeral.copy_from_slice(peer_ephemeral);
        let shared = self
            .ephemeral_secret
            .diffie_hellman(&ExchangePublicKey::from(ephemeral));
        self.shared_ee_hash = Some(sha256(&[shared.as_bytes()]));
        self.shared_ee = Some(Zeroizing::new(shared.to_bytes()));
        self.peer_ephemeral = Some(ephemeral);
        true
    }

    /// `box[SHA256(K ‖ a·b ‖ a·B)](H)`: client side of message 3.
    pub fn create_client_auth(&mut self) -> Option<[u8; CLIENT_AUTH_SIZE]> {
        let (Some(server_public), Some(peer_ephemeral), Some(ee_hash)) =
            (self.peer_public, self.peer_ephemeral, self.shared_ee_hash)
        else {
            return None;
        };
        let shared_ee = self.shared_ee.as_ref()?;

        // H = sign[A](K ‖ Bp ‖ SHA256(a·b)) ‖ Ap
        let payload = signing_payload(&self.app_id, &server_public, &ee_hash);
        let signature = self.key_pair.sign(&payload);
        let mut proof = Zeroizing::new([0u8; PROOF_SIZE]);
        proof[..SIGNATURE_SIZE].copy_from_slice(&signature);
        proof[SIGNATURE_SIZE..].copy_from_slice(self.public_key.as_bytes());

        let longterm = StaticSecret::from(self.key_pair.to_curve_scalar());
        let shared_se = longterm.diffie_hellman(&ExchangePublicKey::from(peer_ephemeral));
        let shared_es = self
            .ephemeral_secret
            .diffie_hellman(&ExchangePublicKey::from(server_public.to_curve_bytes()));

        let key = derive_auth_key(&self.app_id, &shared_ee[..], shared_es.as_bytes());
        let mut auth = [0u8; CLIENT_AUTH_SIZE];
        seal(&key, &proof[..], &mut auth);

        self.shared_es = Some(Zeroizing::new(shared_es.to_bytes()));
        self.shared_se = Some(Zeroizing::new(shared_se.to_bytes()));
        self.client_proof = Some(proof);
        Some(auth)
    }

    /// Server side of message 3: opens the box, learns the client's
    /// identity, and checks its signature.
    pub fn verify_client_auth(&mut self, auth: &[u8; CLIENT_AUTH_SIZE]) -> bool {
        let (Some(peer_ephemeral), Some(ee_hash)) = (self.peer_ephemeral, self.shared_ee_hash)
        else {
            return false;
        };
        let Some(shared_ee) = self.shared_ee.as_ref() else {
            return false;
        };

        // a·B equals B·ap, so the server reconstructs it from its
        // long-term scalar and the client's ephemeral.
        let longterm = StaticSecret::from(self.key_pair.to_curve_scalar());
        let shared_es = longterm.diffie_hellman(&ExchangePublicKey::from(peer_ephemeral));
        let key = derive_auth_key(&self.app_id, &shared_ee[..], shared_es.as_bytes());

        let mut proof = Zeroizing::new([0u8; PROOF_SIZE]);
        if !open(&key, auth, &mut proof[..]) {
            return false;
        }
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&proof[..SIGNATURE_SIZE]);
        let mut client_key = [0u8; PUBLIC_KEY_SIZE];
        client_key.copy_from_slice(&proof[SIGNATURE_SIZE..]);
        let client_public = PublicKey::from_bytes(client_key);

        let payload = signing_payload(&self.app_id, &self.public_key, &ee_hash);
        if !client_public.verify(&payload, &signature) {
            return false;
        }

        // A·b equals b·Ap.
        let shared_se = self
            .ephemeral_secret
            .diffie_hellman(&ExchangePublicKey::from(client_public.to_curve_bytes()));

        self.shared_es = Some(Zeroizing::new(shared_es.to_bytes()));
        self.shared_se = Some(Zeroizing::new(shared_se.to_bytes()));
        self.peer_public = Some(client_public);
        self.client_proof = Some(proof);
        true
    }

    /// `box[SHA256(K ‖ a·b ‖ a·B ‖ A·b)](sign[B](K ‖ H ‖ SHA256(a·b)))`.
    pub fn create_server_ack(&mut self) -> Option<[u8; SERVER_ACK_SIZE]> {
        let key = self.derive_ack_key()?;
        let ee_hash = self.shared_ee_hash?;
        let proof = self.client_proof.as_ref()?;

        let payload = ack_payload(&self.app_id, proof, &ee_hash);
        let signature = self.key_pair.sign(&payload);
        let mut ack = [0u8; SERVER_ACK_SIZE];
        seal(&key, &signature, &mut ack);
        Some(ack)
    }

    /// Client side of message 4: opens the box and checks the server's
    /// signature over the transcript.
    pub fn verify_server_ack(&mut self, ack: &[u8; SERVER_ACK_SIZE]) -> bool {
        let Some(key) = self.derive_ack_key() else {
            return false;
        };
        let mut signature = [0u8; SIGNATURE_SIZE];
        if !open(&key, ack, &mut signature) {
            return false;
        }
        let (Some(server_public), Some(ee_hash)) = (self.peer_public, self.shared_ee_hash)
        else {
            return false;
        };
        let Some(proof) = self.client_proof.as_ref() else {
            return false;
        };
        let payload = ack_payload(&self.app_id, proof, &ee_hash);
        server_public.verify(&payload, &signature)
    }

    fn derive_ack_key(&mut self) -> Option<Zeroizing<[u8; 32]>> {
        let (Some(ee), Some(es), Some(se)) =
            (&self.shared_ee, &self.shared_es, &self.shared_se)
        else {
            return None;
        };
        let key = Zeroizing::new(sha256(&[self.app_id.as_bytes(), &ee[..], &es[..], &se[..]]));
        self.ack_key = Some(key.clone());
        Some(key)
    }

    /// Derives the directional session material and destroys the
    /// transcript.
    pub fn into_session(self) -> Option<Session> {
        let (Some(peer_public), Some(peer_ephemeral)) = (self.peer_public, self.peer_ephemeral)
        else {
            return None;
        };
        let ack_key = self.ack_key.as_ref()?;

        // h = SHA256(SHA256(K ‖ a·b ‖ a·B ‖ A·b))
        let mut key_hash = sha256(&[&ack_key[..]]);
        let encryption_key = SessionKey::from_bytes(sha256(&[&key_hash, peer_public.as_bytes()]));
        let decryption_key =
            SessionKey::from_bytes(sha256(&[&key_hash, self.public_key.as_bytes()]));
        key_hash.zeroize();

        let encryption_nonce =
            truncate_to_nonce(&hmac_tag(self.app_id.as_bytes(), &peer_ephemeral));
        let decryption_nonce =
            truncate_to_nonce(&hmac_tag(self.app_id.as_bytes(), &self.ephemeral_public));

        Some(Session {
            encryption_key,
            encryption_nonce,
            decryption_key,
            decryption_nonce,
            peer_public_key: peer_public,
        })
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        // The dalek key types and the Zeroizing fields wipe themselves.
        self.shared_ee_hash.zeroize();
    }
}

// ============================================
// Tests
// ============================================
