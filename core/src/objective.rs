//! The objective/crank pattern: every channel-funding or -closing protocol
//! is expressed as a pure `step(objective, event) -> (objective', effects,
//! waiting_for)` function. `step` never performs I/O and never mutates
//! anything outside its inputs — every externally visible action is
//! returned as a `SideEffect` for a caller to actually carry out (send a
//! message, submit a transaction, hand off a consensus-channel proposal).
//!
//! `DirectFund` is the canonical shape every other objective follows:
//! every participant signs a prefund state, then deposits in participant
//! index order, then every participant signs a postfund state, then the
//! objective completes. `DirectDefund` and `ConsensusChannel` reuse that
//! same approve → exchange-signatures → act-in-turn → complete shape for
//! their own protocols.

use channel_spec::events::{ChainEvent, ChannelEvent, Event, EventKind, ObjectiveEvent};
use channel_spec::{Address, FixedPart, Hash32, Signature, State, ValidationError};
use serde::{Deserialize, Serialize};

/// What an objective is blocked on, surfaced to a caller deciding whether
/// there is local work to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitingFor {
    /// The local participant has not yet approved this objective.
    Approval,
    /// Waiting for every participant to sign the prefund state.
    CompletePrefund,
    /// Prefund is complete; waiting for this participant's deposit turn.
    MyTurnToFund,
    /// This participant has deposited; waiting for the remaining
    /// participants to fund in turn.
    CompleteFunding,
    /// Funding is complete; waiting for every participant to sign the
    /// postfund state.
    CompletePostfund,
    /// The objective is not blocked on anything further.
    Nothing,
}

/// An externally visible action a `step` call wants carried out. `step`
/// itself never performs these; a caller (the daemon's crank loop) does.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SideEffect {
    /// Send a signed state to a peer over the messaging transport.
    SendMessage {
        /// Recipient.
        to: Address,
        /// The state being gossiped.
        state: State,
        /// The local participant's signature over it.
        signature: Signature,
    },
    /// Submit an on-chain transaction (a deposit, a challenge response, a
    /// withdrawal).
    SubmitTx {
        /// Target contract address.
        to: Address,
        /// ABI-encoded calldata.
        data: Vec<u8>,
        /// Wei value attached to the call, as a decimal string.
        value: String,
    },
    /// Hand a ledger-channel funding update proposal to the consensus
    /// channel's leader/follower protocol.
    ProposeConsensusUpdate {
        /// Channel id of the consensus ledger channel.
        channel_id: Hash32,
        /// The proposed next state.
        proposed_state: State,
    },
}

/// A signature slot per participant index; `None` until that participant
/// signs.
pub type SignatureRound = Vec<Option<Signature>>;

fn all_signed(round: &SignatureRound) -> bool {
    round.iter().all(Option::is_some)
}

/// `DirectFund`: bring a brand-new channel from proposal to a fully
/// postfund-signed, on-chain-funded state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectFundData {
    /// Objective id.
    pub objective_id: String,
    /// Channel identity.
    pub fixed_part: FixedPart,
    /// This participant's index into `fixed_part.participants`.
    pub my_index: usize,
    /// The turn-0 prefund state.
    pub prefund: State,
    /// Prefund signatures collected so far, one slot per participant.
    pub prefund_signatures: SignatureRound,
    /// The turn-1 postfund state (identical outcome, turn_num advanced).
    pub postfund: State,
    /// Postfund signatures collected so far.
    pub postfund_signatures: SignatureRound,
    /// Which participant indices have deposited on-chain so far.
    pub funded: Vec<bool>,
    /// Whether the local participant has approved this objective.
    pub approved: bool,
    /// Whether the objective has reached `Complete`.
    pub completed: bool,
}

impl DirectFundData {
    /// Start a new `DirectFund` objective for `prefund`/`postfund` states
    /// sharing the given `fixed_part`.
    pub fn new(
        objective_id: String,
        fixed_part: FixedPart,
        my_index: usize,
        prefund: State,
        postfund: State,
    ) -> Self {
        let n = fixed_part.participants.len();
        Self {
            objective_id,
            fixed_part,
            my_index,
            prefund,
            prefund_signatures: vec![None; n],
            postfund,
            postfund_signatures: vec![None; n],
            funded: vec![false; n],
            approved: false,
            completed: false,
        }
    }

    fn channel_id(&self) -> Hash32 {
        channel_spec::channel_id(&self.fixed_part)
    }

    fn participant_index(&self, addr: &Address) -> Option<usize> {
        self.fixed_part.participants.iter().position(|p| p == addr)
    }

    fn waiting_for(&self) -> WaitingFor {
        if self.completed {
            return WaitingFor::Nothing;
        }
        if !self.approved {
            return WaitingFor::Approval;
        }
        if !all_signed(&self.prefund_signatures) {
            return WaitingFor::CompletePrefund;
        }
        if !self.funded[self.my_index] {
            return WaitingFor::MyTurnToFund;
        }
        if self.funded.iter().any(|f| !f) {
            return WaitingFor::CompleteFunding;
        }
        if !all_signed(&self.postfund_signatures) {
            return WaitingFor::CompletePostfund;
        }
        WaitingFor::Nothing
    }

    /// Whether it is this participant's turn to deposit: every
    /// lower-indexed participant has already funded.
    fn my_turn_to_fund(&self) -> bool {
        self.funded[..self.my_index].iter().all(|f| *f)
    }

    fn step(mut self, event: &Event) -> Result<(Self, Vec<SideEffect>, WaitingFor), ValidationError> {
        let mut effects = Vec::new();
        match &event.kind {
            EventKind::Objective(ObjectiveEvent::ObjectiveApproved { objective_id })
                if *objective_id == self.objective_id =>
            {
                self.approved = true;
                for (idx, participant) in self.fixed_part.participants.iter().enumerate() {
                    if idx != self.my_index {
                        effects.push(SideEffect::SendMessage {
                            to: *participant,
                            state: self.prefund.clone(),
                            signature: self.prefund_signatures[self.my_index]
                                .expect("local prefund signature recorded before approval effects"),
                        });
                    }
                }
            }
            EventKind::Channel(ChannelEvent::StateSigned { channel_id, state, signature })
                if *channel_id == self.channel_id() =>
            {
                if state.variable_part.turn_num == self.prefund.variable_part.turn_num {
                    self.prefund_signatures[self.my_index] = Some(*signature);
                } else if state.variable_part.turn_num == self.postfund.variable_part.turn_num {
                    self.postfund_signatures[self.my_index] = Some(*signature);
                }
            }
            EventKind::Channel(ChannelEvent::StateReceived {
                channel_id,
                state,
                from,
                signature,
            }) => {
                if *channel_id != self.channel_id() {
                    return Err(ValidationError::WrongChannel {
                        event_channel: *channel_id,
                        expected_channel: self.channel_id(),
                    });
                }
                let idx = self
                    .participant_index(from)
                    .ok_or(ValidationError::ParticipantNotFound(*from))?;
                if state.variable_part.turn_num == self.prefund.variable_part.turn_num {
                    self.prefund_signatures[idx] = Some(*signature);
                } else if state.variable_part.turn_num == self.postfund.variable_part.turn_num {
                    self.postfund_signatures[idx] = Some(*signature);
                }
                if all_signed(&self.prefund_signatures) && self.my_turn_to_fund() && !self.funded[self.my_index] {
                    effects.push(fund_tx(&self));
                }
            }
            EventKind::Chain(ChainEvent::DepositDetected { channel_id, depositor, .. })
                if *channel_id == self.channel_id() =>
            {
                if let Some(idx) = self.participant_index(depositor) {
                    self.funded[idx] = true;
                }
                if all_signed(&self.prefund_signatures) && self.my_turn_to_fund() && !self.funded[self.my_index] {
                    effects.push(fund_tx(&self));
                }
                // Once every participant has funded, the caller is expected
                // to sign the postfund state and append a StateSigned event;
                // step itself never signs on the objective's behalf.
            }
            _ => {}
        }

        if self.funded.iter().all(|f| *f) && all_signed(&self.postfund_signatures) {
            self.completed = true;
        }

        let waiting_for = self.waiting_for();
        Ok((self, effects, waiting_for))
    }
}

fn fund_tx(data: &DirectFundData) -> SideEffect {
    let me = data.fixed_part.participants[data.my_index];
    SideEffect::SubmitTx {
        to: data.fixed_part.app_definition,
        data: channel_spec::encoding::encode_fixed_part(&data.fixed_part),
        value: amount_owed(data, me),
    }
}

fn amount_owed(data: &DirectFundData, me: Address) -> String {
    for asset_outcome in &data.prefund.variable_part.outcome.0 {
        for allocation in &asset_outcome.allocations {
            if allocation.destination.as_bytes()[12..] == me.as_bytes()[..] {
                return allocation.amount.clone();
            }
        }
    }
    "0".to_string()
}

/// `DirectDefund`: cooperatively wind a funded channel down to its final
/// state and release on-chain holdings. Shares `DirectFund`'s
/// sign-then-act-in-turn shape: participants sign a final state, then
/// withdraw in participant index order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectDefundData {
    /// Objective id.
    pub objective_id: String,
    /// Channel identity.
    pub fixed_part: FixedPart,
    /// This participant's index.
    pub my_index: usize,
    /// The final (is_final = true) state being wound down to.
    pub final_state: State,
    /// Signatures collected over `final_state`.
    pub final_signatures: SignatureRound,
    /// Which participant indices have withdrawn so far.
    pub withdrawn: Vec<bool>,
    /// Whether the local participant has approved this objective.
    pub approved: bool,
    /// Whether the objective has reached `Complete`.
    pub completed: bool,
}

impl DirectDefundData {
    fn channel_id(&self) -> Hash32 {
        channel_spec::channel_id(&self.fixed_part)
    }

    fn waiting_for(&self) -> WaitingFor {
        if self.completed {
            return WaitingFor::Nothing;
        }
        if !self.approved {
            return WaitingFor::Approval;
        }
        if !all_signed(&self.final_signatures) {
            return WaitingFor::CompletePrefund;
        }
        if !self.withdrawn[self.my_index] {
            return WaitingFor::MyTurnToFund;
        }
        if self.withdrawn.iter().any(|w| !w) {
            return WaitingFor::CompleteFunding;
        }
        WaitingFor::Nothing
    }

    fn step(mut self, event: &Event) -> Result<(Self, Vec<SideEffect>, WaitingFor), ValidationError> {
        let mut effects = Vec::new();
        match &event.kind {
            EventKind::Objective(ObjectiveEvent::ObjectiveApproved { objective_id })
                if *objective_id == self.objective_id =>
            {
                self.approved = true;
                for (idx, participant) in self.fixed_part.participants.iter().enumerate() {
                    if idx != self.my_index {
                        effects.push(SideEffect::SendMessage {
                            to: *participant,
                            state: self.final_state.clone(),
                            signature: self.final_signatures[self.my_index]
                                .expect("local final-state signature recorded before approval effects"),
                        });
                    }
                }
            }
            EventKind::Channel(ChannelEvent::StateReceived { channel_id, from, signature, .. }) => {
                if *channel_id != self.channel_id() {
                    return Err(ValidationError::WrongChannel {
                        event_channel: *channel_id,
                        expected_channel: self.channel_id(),
                    });
                }
                let idx = self
                    .fixed_part
                    .participants
                    .iter()
                    .position(|p| p == from)
                    .ok_or(ValidationError::ParticipantNotFound(*from))?;
                self.final_signatures[idx] = Some(*signature);
            }
            EventKind::Chain(ChainEvent::WithdrawCompleted { channel_id, to, .. })
                if *channel_id == self.channel_id() =>
            {
                if let Some(idx) = self.fixed_part.participants.iter().position(|p| p == to) {
                    self.withdrawn[idx] = true;
                }
            }
            _ => {}
        }
        if self.withdrawn.iter().all(|w| *w) {
            self.completed = true;
        }
        let waiting_for = self.waiting_for();
        Ok((self, effects, waiting_for))
    }
}

/// `ConsensusChannel`: the leader/follower ledger-update protocol used by
/// a hub-and-spoke ledger channel to apply funding updates by round-robin
/// proposal rather than a fresh `DirectFund` per update.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusChannelData {
    /// Objective id.
    pub objective_id: String,
    /// Channel identity.
    pub fixed_part: FixedPart,
    /// Whether the local participant is the leader (proposer) for this
    /// round.
    pub is_leader: bool,
    /// The currently-proposed next state, if a proposal is outstanding.
    pub proposed: Option<State>,
    /// Signatures collected over the proposal.
    pub proposal_signatures: SignatureRound,
    /// Whether the local participant has approved this objective.
    pub approved: bool,
    /// Whether the current round has completed (proposal fully signed).
    pub completed: bool,
}

impl ConsensusChannelData {
    fn channel_id(&self) -> Hash32 {
        channel_spec::channel_id(&self.fixed_part)
    }

    fn waiting_for(&self) -> WaitingFor {
        if self.completed {
            return WaitingFor::Nothing;
        }
        if !self.approved {
            return WaitingFor::Approval;
        }
        match &self.proposed {
            None if self.is_leader => WaitingFor::MyTurnToFund,
            None => WaitingFor::CompleteFunding,
            Some(_) if !all_signed(&self.proposal_signatures) => WaitingFor::CompletePostfund,
            Some(_) => WaitingFor::Nothing,
        }
    }

    fn step(mut self, event: &Event) -> Result<(Self, Vec<SideEffect>, WaitingFor), ValidationError> {
        let mut effects = Vec::new();
        match &event.kind {
            EventKind::Objective(ObjectiveEvent::ObjectiveApproved { objective_id })
                if *objective_id == self.objective_id =>
            {
                self.approved = true;
                if self.is_leader {
                    if let Some(proposed) = &self.proposed {
                        effects.push(SideEffect::ProposeConsensusUpdate {
                            channel_id: self.channel_id(),
                            proposed_state: proposed.clone(),
                        });
                    }
                }
            }
            EventKind::Channel(ChannelEvent::StateReceived { channel_id, state, from, signature }) => {
                if *channel_id != self.channel_id() {
                    return Err(ValidationError::WrongChannel {
                        event_channel: *channel_id,
                        expected_channel: self.channel_id(),
                    });
                }
                let idx = self
                    .fixed_part
                    .participants
                    .iter()
                    .position(|p| p == from)
                    .ok_or(ValidationError::ParticipantNotFound(*from))?;
                self.proposed = Some(state.clone());
                self.proposal_signatures[idx] = Some(*signature);
                if all_signed(&self.proposal_signatures) {
                    self.completed = true;
                }
            }
            _ => {}
        }
        let waiting_for = self.waiting_for();
        Ok((self, effects, waiting_for))
    }
}

/// The closed set of objective protocols the engine can crank.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Objective {
    /// See `DirectFundData`.
    DirectFund(DirectFundData),
    /// See `DirectDefundData`.
    DirectDefund(DirectDefundData),
    /// See `ConsensusChannelData`.
    ConsensusChannel(ConsensusChannelData),
}

impl Objective {
    /// This objective's id.
    pub fn id(&self) -> &str {
        match self {
            Objective::DirectFund(d) => &d.objective_id,
            Objective::DirectDefund(d) => &d.objective_id,
            Objective::ConsensusChannel(d) => &d.objective_id,
        }
    }

    /// The channel state hash this objective's terminal state commits to,
    /// if it has one yet (a `ConsensusChannel` with no outstanding proposal
    /// has none).
    pub fn terminal_state_hash(&self) -> Option<Result<Hash32, ValidationError>> {
        match self {
            Objective::DirectFund(d) => Some(d.postfund.state_hash()),
            Objective::DirectDefund(d) => Some(d.final_state.state_hash()),
            Objective::ConsensusChannel(d) => d.proposed.as_ref().map(State::state_hash),
        }
    }
}

/// The pure crank step: fold one event into an objective, returning its
/// updated state, any side effects to carry out, and what it is now
/// waiting on.
pub fn step(
    objective: Objective,
    event: &Event,
) -> Result<(Objective, Vec<SideEffect>, WaitingFor), ValidationError> {
    match objective {
        Objective::DirectFund(data) => {
            let (data, effects, waiting_for) = data.step(event)?;
            Ok((Objective::DirectFund(data), effects, waiting_for))
        }
        Objective::DirectDefund(data) => {
            let (data, effects, waiting_for) = data.step(event)?;
            Ok((Objective::DirectDefund(data), effects, waiting_for))
        }
        Objective::ConsensusChannel(data) => {
            let (data, effects, waiting_for) = data.step(event)?;
            Ok((Objective::ConsensusChannel(data), effects, waiting_for))
        }
    }
}
