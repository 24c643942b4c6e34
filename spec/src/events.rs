//! The closed event taxonomy: every event the store can ever hold, and the
//! content-addressed id derivation shared by all of them.
//!
//! `event_id = keccak256("ev1|" || kebab_event_name || "|" ||
//! canonical_json(payload))`. The event name is domain-separated into the
//! hash so that two semantically different event kinds whose payloads
//! happen to canonicalize identically never collide.

use crate::{canonical, Address, Hash32, Outcome, Signature, State};
use serde::{Deserialize, Serialize};

/// Schema version carried by every event. Bumped only on a breaking wire
/// change to the event payloads; currently always `1`.
pub const EVENT_VERSION: u32 = 1;

/// Milliseconds since the Unix epoch.
pub type TimestampMillis = u64;

/// Objective lifecycle events: the bookkeeping around an objective's
/// approval and completion, independent of what the objective actually
/// does.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ObjectiveEvent {
    /// A new objective was proposed, either locally or by a peer.
    ObjectiveCreated {
        /// Objective id, typically `<protocol>-<channel_id>`.
        objective_id: String,
        /// Channel the objective operates on.
        channel_id: Hash32,
        /// Protocol name, e.g. `direct-fund`.
        protocol: String,
        /// Participants the objective runs over, in `FixedPart` order.
        participants: Vec<Address>,
    },
    /// The local participant approved the objective, unblocking its crank.
    ObjectiveApproved {
        /// Objective id.
        objective_id: String,
    },
    /// The local participant rejected the objective; it will not progress.
    ObjectiveRejected {
        /// Objective id.
        objective_id: String,
        /// Human-readable rejection reason.
        reason: String,
    },
    /// A crank step ran and the objective's `WaitingFor` tag changed.
    ObjectiveCranked {
        /// Objective id.
        objective_id: String,
        /// `WaitingFor` tag the crank left the objective in, rendered as
        /// its kebab-case name (`my-turn-to-fund`, `nothing`, ...).
        waiting_for: String,
        /// Number of side effects the crank step produced.
        side_effect_count: u32,
        /// Whether the objective is blocked waiting on something external
        /// (true) or ready to crank again immediately (false).
        blocked: bool,
    },
    /// The objective reached its terminal state.
    ObjectiveCompleted {
        /// Objective id.
        objective_id: String,
        /// Whether the objective completed successfully.
        success: bool,
        /// The owning channel's final state hash, if one was reached.
        final_state_hash: Option<Hash32>,
    },
}

/// Channel state events: the signed-state gossip and derived-state
/// bookkeeping that channel state reconstruction folds over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelEvent {
    /// A channel's `FixedPart` was first observed (not yet funded).
    ChannelCreated {
        /// Channel id.
        channel_id: Hash32,
        /// Immutable channel identity.
        fixed_part: crate::FixedPart,
    },
    /// The local participant signed a candidate state.
    StateSigned {
        /// Channel id.
        channel_id: Hash32,
        /// The state that was signed.
        state: State,
        /// The local participant's signature over `state.state_hash()`.
        signature: Signature,
    },
    /// A signed state was received from a peer.
    StateReceived {
        /// Channel id.
        channel_id: Hash32,
        /// The state the peer signed.
        state: State,
        /// The sender's address.
        from: Address,
        /// The sender's signature over `state.state_hash()`.
        signature: Signature,
    },
    /// A turn became fully signed by every participant ("supported") and
    /// is now the channel's latest supported state.
    StateSupportedUpdated {
        /// Channel id.
        channel_id: Hash32,
        /// The previously supported turn number, if any.
        prev_turn_num: Option<u64>,
        /// The now-supported turn number.
        turn_num: u64,
        /// The state hash that became supported.
        state_hash: Hash32,
        /// Number of signatures that made this turn supported.
        num_signatures: u32,
    },
    /// The channel reached a final, on-chain-finalizable state.
    ChannelFinalized {
        /// Channel id.
        channel_id: Hash32,
        /// The final state's hash.
        state_hash: Hash32,
    },
}

/// Chain bridge events: observations of on-chain activity relevant to a
/// channel. Wei amounts are carried as decimal strings (same convention as
/// `Allocation::amount`) since they may exceed native integer range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChainEvent {
    /// A deposit transaction targeting a channel's holdings was observed.
    DepositDetected {
        /// Channel id.
        channel_id: Hash32,
        /// Asset deposited.
        asset: Address,
        /// Depositor address.
        depositor: Address,
        /// Amount deposited, in wei, as a decimal string.
        amount_wei: String,
        /// Chain transaction hash.
        tx_hash: Hash32,
    },
    /// The on-chain holdings for a channel/asset pair changed.
    AllocationUpdated {
        /// Channel id.
        channel_id: Hash32,
        /// Asset whose outcome changed.
        asset: Address,
        /// The new outcome for that asset.
        outcome: Outcome,
    },
    /// A challenge (on-chain dispute) was registered against a channel.
    ChallengeRegistered {
        /// Channel id.
        channel_id: Hash32,
        /// The state hash the challenge was registered with.
        state_hash: Hash32,
        /// Unix timestamp (seconds) the challenge expires at.
        expires_at: u64,
    },
    /// A registered challenge was cleared by a timely response.
    ChallengeCleared {
        /// Channel id.
        channel_id: Hash32,
    },
    /// A channel was concluded on-chain (finalized via consensus or
    /// challenge timeout).
    ChannelConcluded {
        /// Channel id.
        channel_id: Hash32,
        /// The final state hash the channel concluded with.
        final_state_hash: Hash32,
    },
    /// A withdrawal from a concluded channel completed.
    WithdrawCompleted {
        /// Channel id.
        channel_id: Hash32,
        /// Asset withdrawn.
        asset: Address,
        /// Recipient address.
        to: Address,
        /// Amount withdrawn, in wei, as a decimal string.
        amount_wei: String,
        /// Chain transaction hash.
        tx_hash: Hash32,
    },
}

/// Messaging events: delivery bookkeeping for signed-state gossip between
/// participants. These events record *that* a message moved, not its
/// payload's protocol effect (that's `ChannelEvent::StateReceived`, etc).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessageEvent {
    /// A message was handed to the transport for delivery.
    MessageSent {
        /// Recipient address.
        to: Address,
        /// Channel the message concerns, if any.
        channel_id: Option<Hash32>,
        /// Id of the payload event this message carries.
        payload_event_id: Hash32,
    },
    /// A message was received from a peer.
    MessageReceived {
        /// Sender address.
        from: Address,
        /// Channel the message concerns, if any.
        channel_id: Option<Hash32>,
        /// Id of the payload event this message carries.
        payload_event_id: Hash32,
    },
    /// A previously sent message was acknowledged by its recipient.
    MessageAcked {
        /// Id of the event describing the original send.
        message_event_id: Hash32,
    },
    /// A message could not be delivered and was dropped.
    MessageDropped {
        /// Id of the event describing the original send.
        message_event_id: Hash32,
        /// Human-readable drop reason.
        reason: String,
    },
}

/// The closed union of every event kind the store can hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "kebab-case")]
pub enum EventKind {
    /// Objective lifecycle domain.
    Objective(ObjectiveEvent),
    /// Channel state domain.
    Channel(ChannelEvent),
    /// Chain bridge domain.
    Chain(ChainEvent),
    /// Messaging domain.
    Message(MessageEvent),
}

impl EventKind {
    /// The kebab-case event name used in `event_id` derivation, e.g.
    /// `objective-created`, `state-signed`, `deposit-detected`.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Objective(e) => match e {
                ObjectiveEvent::ObjectiveCreated { .. } => "objective-created",
                ObjectiveEvent::ObjectiveApproved { .. } => "objective-approved",
                ObjectiveEvent::ObjectiveRejected { .. } => "objective-rejected",
                ObjectiveEvent::ObjectiveCranked { .. } => "objective-cranked",
                ObjectiveEvent::ObjectiveCompleted { .. } => "objective-completed",
            },
            EventKind::Channel(e) => match e {
                ChannelEvent::ChannelCreated { .. } => "channel-created",
                ChannelEvent::StateSigned { .. } => "state-signed",
                ChannelEvent::StateReceived { .. } => "state-received",
                ChannelEvent::StateSupportedUpdated { .. } => "state-supported-updated",
                ChannelEvent::ChannelFinalized { .. } => "channel-finalized",
            },
            EventKind::Chain(e) => match e {
                ChainEvent::DepositDetected { .. } => "deposit-detected",
                ChainEvent::AllocationUpdated { .. } => "allocation-updated",
                ChainEvent::ChallengeRegistered { .. } => "challenge-registered",
                ChainEvent::ChallengeCleared { .. } => "challenge-cleared",
                ChainEvent::ChannelConcluded { .. } => "channel-concluded",
                ChainEvent::WithdrawCompleted { .. } => "withdraw-completed",
            },
            EventKind::Message(e) => match e {
                MessageEvent::MessageSent { .. } => "message-sent",
                MessageEvent::MessageReceived { .. } => "message-received",
                MessageEvent::MessageAcked { .. } => "message-acked",
                MessageEvent::MessageDropped { .. } => "message-dropped",
            },
        }
    }

    /// The channel id this event concerns, if it concerns exactly one.
    /// Messaging events without a `channel_id` and acks/drops (which refer
    /// to another event, not a channel) return `None`.
    pub fn channel_id(&self) -> Option<Hash32> {
        match self {
            EventKind::Objective(ObjectiveEvent::ObjectiveCreated { channel_id, .. }) => {
                Some(*channel_id)
            }
            EventKind::Channel(e) => Some(*match e {
                ChannelEvent::ChannelCreated { channel_id, .. } => channel_id,
                ChannelEvent::StateSigned { channel_id, .. } => channel_id,
                ChannelEvent::StateReceived { channel_id, .. } => channel_id,
                ChannelEvent::StateSupportedUpdated { channel_id, .. } => channel_id,
                ChannelEvent::ChannelFinalized { channel_id, .. } => channel_id,
            }),
            EventKind::Chain(e) => Some(*match e {
                ChainEvent::DepositDetected { channel_id, .. } => channel_id,
                ChainEvent::AllocationUpdated { channel_id, .. } => channel_id,
                ChainEvent::ChallengeRegistered { channel_id, .. } => channel_id,
                ChainEvent::ChallengeCleared { channel_id } => channel_id,
                ChainEvent::ChannelConcluded { channel_id, .. } => channel_id,
                ChainEvent::WithdrawCompleted { channel_id, .. } => channel_id,
            }),
            EventKind::Message(MessageEvent::MessageSent { channel_id, .. })
            | EventKind::Message(MessageEvent::MessageReceived { channel_id, .. }) => *channel_id,
            _ => None,
        }
    }
}

/// An envelope around an `EventKind`: the fields common to every event
/// regardless of domain, plus the content-addressed id derived from them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Content-addressed event id.
    pub id: Hash32,
    /// Schema version, currently always `EVENT_VERSION`.
    pub event_version: u32,
    /// Milliseconds since the Unix epoch when the event was created.
    pub timestamp: TimestampMillis,
    /// The event payload.
    pub kind: EventKind,
}

impl Event {
    /// Build a new event, computing its id from `kind`.
    pub fn new(kind: EventKind, timestamp: TimestampMillis) -> serde_json::Result<Self> {
        let id = compute_event_id(&kind, timestamp)?;
        Ok(Self {
            id,
            event_version: EVENT_VERSION,
            timestamp,
            kind,
        })
    }
}

/// `event_id = keccak256("ev1|" || kebab_event_name || "|" ||
/// canonical_json(payload))`.
///
/// The timestamp is deliberately excluded from the hash preimage: it is
/// metadata about *when* the event was observed, not part of its semantic
/// payload, so two processes that independently construct the same logical
/// event (e.g. replaying a deterministic fixture) derive the same id
/// regardless of wall-clock skew.
pub fn compute_event_id(kind: &EventKind, _timestamp: TimestampMillis) -> serde_json::Result<Hash32> {
    let payload = canonical::to_canonical_bytes(kind)?;
    let mut preimage = Vec::with_capacity(4 + kind.name().len() + 1 + payload.len());
    preimage.extend_from_slice(b"ev1|");
    preimage.extend_from_slice(kind.name().as_bytes());
    preimage.push(b'|');
    preimage.extend_from_slice(&payload);
    Ok(Hash32::digest(&preimage))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_kind() -> EventKind {
        EventKind::Objective(ObjectiveEvent::ObjectiveCreated {
            objective_id: "direct-fund-0x01".to_string(),
            channel_id: Hash32::new([1u8; 32]),
            protocol: "direct-fund".to_string(),
            participants: vec![Address::new([1u8; 20]), Address::new([2u8; 20])],
        })
    }

    #[test]
    fn compute_id_is_deterministic() {
        let kind = sample_kind();
        let a = compute_event_id(&kind, 1_000).unwrap();
        let b = compute_event_id(&kind, 1_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn compute_id_is_independent_of_timestamp() {
        let kind = sample_kind();
        let a = compute_event_id(&kind, 1_000).unwrap();
        let b = compute_event_id(&kind, 2_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_events_get_different_ids() {
        let a = compute_event_id(&sample_kind(), 0).unwrap();
        let b = compute_event_id(
            &EventKind::Objective(ObjectiveEvent::ObjectiveApproved {
                objective_id: "direct-fund-0x01".to_string(),
            }),
            0,
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn event_names_are_kebab_case() {
        assert_eq!(sample_kind().name(), "objective-created");
    }

    #[test]
    fn roundtrip_event_envelope() {
        let kind = sample_kind();
        let event = Event::new(kind.clone(), 42).unwrap();
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.kind, kind);
        assert_eq!(decoded.id, event.id);
    }
}
