//! Channel state model invariants: turn progression, participant
//! membership, and signature authenticity. These checks are the pure
//! counterpart of `channel-spec`'s structural types — they decide whether
//! a state or signature is *valid*, not whether it has been seen before
//! (that is the event store's `event_exists` concern).

use channel_spec::events::{EventKind, ObjectiveEvent};
use channel_spec::{Address, FixedPart, Hash32, Signature, State, ValidationError};

use crate::store::EventStore;

/// Confirm `addr` is one of `fixed_part`'s participants.
pub fn validate_participant(fixed_part: &FixedPart, addr: &Address) -> Result<(), ValidationError> {
    if fixed_part.participants.contains(addr) {
        Ok(())
    } else {
        Err(ValidationError::ParticipantNotFound(*addr))
    }
}

/// Confirm `next` strictly increases over `previous`, the channel's
/// turn-taking rule.
pub fn validate_turn_progression(previous: u64, next: u64) -> Result<(), ValidationError> {
    if next > previous {
        Ok(())
    } else {
        Err(ValidationError::InvalidTurnProgression { previous, got: next })
    }
}

/// Confirm `state`'s outcome carries at least one asset, each with at
/// least one allocation — the minimal structural shape a state must have
/// to mean anything.
pub fn validate_state_shape(state: &State) -> Result<(), ValidationError> {
    if state.fixed_part.participants.is_empty() {
        return Err(ValidationError::MalformedState(
            "fixed_part.participants must not be empty".to_string(),
        ));
    }
    if state.fixed_part.challenge_duration == 0 {
        return Err(ValidationError::MalformedState(
            "fixed_part.challenge_duration must be at least 1".to_string(),
        ));
    }
    if state.variable_part.outcome.0.is_empty() {
        return Err(ValidationError::MalformedState(
            "variable_part.outcome must carry at least one asset".to_string(),
        ));
    }
    for asset_outcome in &state.variable_part.outcome.0 {
        if asset_outcome.allocations.is_empty() {
            return Err(ValidationError::MalformedState(format!(
                "asset {} has no allocations",
                asset_outcome.asset
            )));
        }
    }
    Ok(())
}

/// Confirm `signature` recovers to `signer` over `state.state_hash()`, and
/// that `signer` is a participant in `state.fixed_part`.
pub fn validate_signed_state(
    state: &State,
    signature: &Signature,
    signer: &Address,
) -> Result<(), ValidationError> {
    validate_participant(&state.fixed_part, signer)?;
    let digest: Hash32 = state.state_hash()?;
    channel_crypto::verify(&digest, signature, signer)
        .map_err(|_| ValidationError::InvalidSignature(digest))
}

/// Read-only existence queries over the event log, scoped to a single
/// objective or channel identifier. Distinct from `EventStore::event_exists`,
/// which checks whether a specific event (by content-addressed id) has been
/// seen, not whether an objective or channel has ever been created.
pub struct ValidationContext<'a> {
    store: &'a dyn EventStore,
}

impl<'a> ValidationContext<'a> {
    /// Build a context scanning `store`.
    pub fn new(store: &'a dyn EventStore) -> Self {
        Self { store }
    }

    /// True if any event in the log carries `objective_id`.
    pub fn objective_exists(&self, objective_id: &str) -> bool {
        self.store.read(0, usize::MAX).iter().any(|event| {
            matches!(
                &event.kind,
                EventKind::Objective(objective_event) if objective_event_id(objective_event) == objective_id
            )
        })
    }

    /// True if any event in the log carries `channel_id`.
    pub fn channel_exists(&self, channel_id: Hash32) -> bool {
        self.store
            .read(0, usize::MAX)
            .iter()
            .any(|event| event.kind.channel_id() == Some(channel_id))
    }
}

fn objective_event_id(event: &ObjectiveEvent) -> &str {
    match event {
        ObjectiveEvent::ObjectiveCreated { objective_id, .. } => objective_id,
        ObjectiveEvent::ObjectiveApproved { objective_id } => objective_id,
        ObjectiveEvent::ObjectiveRejected { objective_id, .. } => objective_id,
        ObjectiveEvent::ObjectiveCranked { objective_id, .. } => objective_id,
        ObjectiveEvent::ObjectiveCompleted { objective_id, .. } => objective_id,
    }
}
