//! Data model for the event-sourced state channel core.
//!
//! This crate defines the channel state model (`FixedPart`/`VariablePart`/
//! `Outcome`/`State`), the packed (non-padded) Ethereum-style ABI encoding
//! used to derive channel ids and state hashes, canonical JSON encoding used
//! for content-addressed event ids and snapshot payloads, and the closed
//! event taxonomy that flows through the event store. It performs no I/O and
//! holds no secret key material — see `channel-crypto` for signing/recovery.

#![deny(missing_docs)]

pub mod canonical;
pub mod encoding;
pub mod events;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// A 20-byte address, derived the Ethereum way: the low 20 bytes of the
/// keccak256 hash of an uncompressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Construct from raw bytes.
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A 32-byte keccak256 digest, used for channel ids, state hashes, event
/// ids, and allocation destinations.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// Construct from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// keccak256 of the given byte string.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Recoverable secp256k1 signature: `r` (32 bytes), `s` (32 bytes), and a
/// recovery id.
///
/// `v` is always the raw recovery id (0 or 1) once constructed by this
/// crate or by `channel-crypto`. Wire decoders that accept the Ethereum
/// 27/28-offset convention must normalize to 0/1 before building a
/// `Signature` — see `channel_crypto::normalize_recovery_id`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// First 32 bytes of the ECDSA signature.
    pub r: [u8; 32],
    /// Second 32 bytes of the ECDSA signature.
    pub s: [u8; 32],
    /// Raw recovery id, 0 or 1.
    pub v: u8,
}

impl Signature {
    /// Pack into the wire form: r(32) || s(32) || v(1), 65 bytes total.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    /// Unpack from the 65-byte wire form.
    pub fn from_bytes(bytes: &[u8; 65]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Self { r, s, v: bytes[64] }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

/// The immutable half of a channel's identity: anything changing these
/// fields produces a different `channel_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPart {
    /// Ordered participant addresses. Order is significant: it fixes
    /// signer indices used throughout the protocol.
    pub participants: Vec<Address>,
    /// Per-channel nonce, disambiguating channels with identical
    /// participants/app/challenge_duration.
    pub channel_nonce: u64,
    /// Address of the app-specific rules contract (or a sentinel zero
    /// address for a plain ledger channel).
    pub app_definition: Address,
    /// Challenge-response window, in seconds, used by on-chain disputes.
    pub challenge_duration: u32,
}

impl FixedPart {
    /// Construct a `FixedPart`, rejecting an empty participant list or a
    /// zero challenge duration at construction time rather than letting
    /// either surface later as a derivation or encoding failure.
    pub fn new(
        participants: Vec<Address>,
        channel_nonce: u64,
        app_definition: Address,
        challenge_duration: u32,
    ) -> Result<Self, ValidationError> {
        if participants.is_empty() {
            return Err(ValidationError::MalformedState(
                "fixed_part.participants must not be empty".to_string(),
            ));
        }
        if challenge_duration == 0 {
            return Err(ValidationError::MalformedState(
                "fixed_part.challenge_duration must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            participants,
            channel_nonce,
            app_definition,
            challenge_duration,
        })
    }
}

/// The mutable half of a channel's state: every `VariablePart` signed by
/// every participant under a shared `FixedPart` is a candidate channel
/// state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariablePart {
    /// Opaque application-specific data, interpreted only by the app
    /// contract at `app_definition`.
    pub app_data: Vec<u8>,
    /// Asset allocations in effect at this turn.
    pub outcome: Outcome,
    /// Strictly increasing turn number; funding rounds use 0, the
    /// application runs from turn 1 upward.
    pub turn_num: u64,
    /// Whether this is a terminal state the channel can close on.
    pub is_final: bool,
}

/// How an allocation entry is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    /// A plain payment to `destination`.
    Simple,
    /// A guarantee referencing funds held in another channel.
    Guarantee,
}

/// A single allocation entry within an asset's outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Destination: either a 20-byte address left-padded into 32 bytes,
    /// or a target channel id for guarantees.
    pub destination: Hash32,
    /// Amount in the asset's smallest unit, as a decimal string (u256
    /// range, too wide for a native integer type).
    pub amount: String,
    /// Simple payment or guarantee.
    pub kind: AllocationKind,
    /// Kind-specific auxiliary data (e.g. the guarantee target list).
    pub metadata: Vec<u8>,
}

impl Allocation {
    /// Construct an `Allocation`, rejecting an amount that does not parse
    /// as a non-negative base-10 u256 at construction time rather than
    /// letting it panic later during packed encoding.
    pub fn new(
        destination: Hash32,
        amount: String,
        kind: AllocationKind,
        metadata: Vec<u8>,
    ) -> Result<Self, ValidationError> {
        encoding::parse_uint256_decimal(&amount)?;
        Ok(Self {
            destination,
            amount,
            kind,
            metadata,
        })
    }
}

/// Allocations for a single asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOutcome {
    /// Asset contract address, or the zero address for the native asset.
    pub asset: Address,
    /// Ordered allocation entries for this asset.
    pub allocations: Vec<Allocation>,
}

/// The full outcome of a state: allocations across every asset in play.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome(pub Vec<AssetOutcome>);

/// A complete, hashable, signable channel state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Immutable channel identity fields.
    pub fixed_part: FixedPart,
    /// Mutable per-turn fields.
    pub variable_part: VariablePart,
}

impl State {
    /// `channel_id = keccak256(encode_packed(participants || nonce(u64) ||
    /// app_definition(address) || challenge_duration(u32)))`.
    pub fn channel_id(&self) -> Hash32 {
        channel_id(&self.fixed_part)
    }

    /// `state_hash = keccak256(encode_packed(fixed_part || variable_part))`.
    ///
    /// Fails if an allocation amount is not a valid u256 decimal string;
    /// well-formed `State`s built via checked constructors never hit this.
    pub fn state_hash(&self) -> Result<Hash32, ValidationError> {
        Ok(Hash32::digest(&encoding::encode_state(self)?))
    }
}

/// `channel_id = keccak256(encode_packed(participants || nonce(u64) ||
/// app_definition(address) || challenge_duration(u32)))`.
pub fn channel_id(fixed_part: &FixedPart) -> Hash32 {
    Hash32::digest(&encoding::encode_fixed_part(fixed_part))
}

/// The error taxonomy for everything that can go wrong validating state
/// channel data: malformed states, signature failures, and structural
/// violations of the event/objective protocol.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The first event appended under an objective/channel was not a
    /// creation event.
    #[error("expected a creation event to start the sequence, got {0}")]
    InvalidFirstEvent(String),
    /// An event referenced a channel id that does not match the
    /// channel/objective it was applied to.
    #[error("event belongs to channel {event_channel}, not {expected_channel}")]
    WrongChannel {
        /// Channel id carried by the event.
        event_channel: Hash32,
        /// Channel id of the aggregate the event was applied to.
        expected_channel: Hash32,
    },
    /// A signature was attributed to an address absent from
    /// `FixedPart::participants`.
    #[error("address {0} is not a participant in this channel")]
    ParticipantNotFound(Address),
    /// A state's `turn_num` did not strictly increase over its
    /// predecessor per the channel's turn-taking rule.
    #[error("turn {got} does not validly follow turn {previous}")]
    InvalidTurnProgression {
        /// Previous turn number.
        previous: u64,
        /// Rejected turn number.
        got: u64,
    },
    /// Signature recovery or verification failed.
    #[error("invalid signature over state {0}")]
    InvalidSignature(Hash32),
    /// A state or outcome failed basic structural checks (empty
    /// participant list, zero-length asset list, etc).
    #[error("malformed state: {0}")]
    MalformedState(String),
    /// Requested objective does not exist.
    #[error("objective {0} not found")]
    ObjectiveNotFound(String),
    /// Requested channel does not exist.
    #[error("channel {0} not found")]
    ChannelNotFound(Hash32),
    /// A read offset exceeded the event log's current length.
    #[error("offset {offset} is out of bounds (log length {len})")]
    OffsetOutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Current log length.
        len: u64,
    },
}
