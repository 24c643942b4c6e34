//! secp256k1 recoverable-signature identity for channel participants.
//!
//! Participant addresses in `channel-spec` are the low 20 bytes of
//! keccak256 over an uncompressed public key, Ethereum-style. Signatures
//! are deterministic (RFC 6979) and recoverable: `recover_address` rebuilds
//! the signer's address from `(state_hash, signature)` alone, with no
//! separate public-key lookup required.
//!
//! ## Recovery id convention
//!
//! Two conventions exist in the wild for the signature's `v` byte: the raw
//! recovery id (`0`/`1`), and the Ethereum-offset form (`27`/`28`). This
//! crate *accepts* both on input (`normalize_recovery_id`) but always
//! *emits* the raw form — every `Signature` produced by `sign` has `v` in
//! `{0, 1}`. Callers bridging to Ethereum JSON-RPC or existing wire formats
//! that expect the offset form must add 27 themselves at that boundary.

use channel_spec::{Address, Hash32, Signature};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

/// Errors arising from key handling, signing, or recovery.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A 32-byte secret key slice did not decode to a valid scalar.
    #[error("invalid private key")]
    InvalidKey,
    /// A signature's `r`/`s` bytes or recovery id were not well-formed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Public key recovery succeeded but did not match the expected
    /// participant address.
    #[error("recovered address does not match expected signer")]
    SignerMismatch,
}

/// A secp256k1 signing identity: a private key plus its derived address.
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate<R: rand_core::RngCore + rand_core::CryptoRng>(rng: &mut R) -> Self {
        Self {
            signing_key: SigningKey::random(rng),
        }
    }

    /// Construct from a 32-byte secret scalar.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_bytes(bytes.into()).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { signing_key })
    }

    /// The secret scalar, for serialization by trusted callers only.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// This identity's Ethereum-style address.
    pub fn address(&self) -> Address {
        address_from_verifying_key(self.signing_key.verifying_key())
    }

    /// Sign a 32-byte digest (typically a `State::state_hash()`) with a
    /// deterministic (RFC 6979) recoverable ECDSA signature.
    pub fn sign_prehash(&self, digest: &Hash32) -> Result<Signature, CryptoError> {
        let (sig, recid): (K256Signature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(|_| CryptoError::InvalidSignature)?;
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(Signature {
            r,
            s,
            v: recid.to_byte(),
        })
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

/// Normalize a recovery id that may be in the raw (0/1) or Ethereum-offset
/// (27/28) convention down to the raw form this crate uses internally.
pub fn normalize_recovery_id(v: u8) -> Result<u8, CryptoError> {
    match v {
        0 | 1 => Ok(v),
        27 | 28 => Ok(v - 27),
        _ => Err(CryptoError::InvalidSignature),
    }
}

fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let uncompressed = point.as_bytes();
    // Skip the leading 0x04 tag; hash the 64-byte X||Y coordinate pair.
    let mut hasher = Keccak256::new();
    hasher.update(&uncompressed[1..]);
    let digest = hasher.finalize();
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    Address::new(addr)
}

/// Recover the signer's address from a digest and signature, accepting
/// either recovery-id convention on input.
pub fn recover_address(digest: &Hash32, signature: &Signature) -> Result<Address, CryptoError> {
    let v = normalize_recovery_id(signature.v)?;
    let recid = RecoveryId::from_byte(v).ok_or(CryptoError::InvalidSignature)?;
    let mut sig_bytes = [0u8; 64];
    sig_bytes[..32].copy_from_slice(&signature.r);
    sig_bytes[32..].copy_from_slice(&signature.s);
    let sig = K256Signature::from_slice(&sig_bytes).map_err(|_| CryptoError::InvalidSignature)?;
    let verifying_key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recid)
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(address_from_verifying_key(&verifying_key))
}

/// Recover the signer's address and confirm it matches `expected`.
pub fn verify(digest: &Hash32, signature: &Signature, expected: &Address) -> Result<(), CryptoError> {
    let recovered = recover_address(digest, signature)?;
    if &recovered != expected {
        return Err(CryptoError::SignerMismatch);
    }
    Ok(())
}
