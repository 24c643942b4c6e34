//! Local engine backing the `channel-cli` binary: wires a transport to an
//! event store, keeps the in-memory table of active objectives, and cranks
//! them forward as events arrive.
#![deny(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use channel_core::reconstruct::Projection;
use channel_core::{EventStore, Offset};
use channel_spec::events::{ChannelEvent, Event, EventKind, MessageEvent, ObjectiveEvent};
use channel_spec::{Address, FixedPart, Hash32, Outcome, State, VariablePart};
use channel_transport::Transport;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use channel_core::objective::{step, DirectFundData, Objective, SideEffect, WaitingFor};

/// Engine wiring an identity, transport, and event store together, and
/// tracking the objectives the local participant is party to.
pub struct ChannelEngine {
    transport: Arc<dyn Transport>,
    store: Arc<dyn EventStore>,
    identity: Arc<channel_crypto::Identity>,
    objectives: RwLock<HashMap<String, Objective>>,
}

impl ChannelEngine {
    /// Construct an engine over `transport`/`store` (the transport's own
    /// backing store — see `InVmQueue::store`/`Loopback::with_store`),
    /// signing as `identity`.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn EventStore>,
        identity: channel_crypto::Identity,
    ) -> Self {
        Self {
            transport,
            store,
            identity: Arc::new(identity),
            objectives: RwLock::new(HashMap::new()),
        }
    }

    /// This engine's signing address.
    pub fn address(&self) -> Address {
        self.identity.address()
    }

    /// Propose a fresh `DirectFund` objective for a channel among
    /// `fixed_part.participants`, with `outcome` as the target funding
    /// split. `my_index` is this participant's position in the
    /// participant list.
    pub async fn propose_direct_fund(
        &self,
        fixed_part: FixedPart,
        my_index: usize,
        outcome: Outcome,
    ) -> anyhow::Result<String> {
        let channel_id = channel_spec::channel_id(&fixed_part);
        let objective_id = format!("direct-fund-{channel_id}");

        let prefund = State {
            fixed_part: fixed_part.clone(),
            variable_part: VariablePart {
                app_data: Vec::new(),
                outcome: outcome.clone(),
                turn_num: 0,
                is_final: false,
            },
        };
        let postfund = State {
            variable_part: VariablePart {
                turn_num: 1,
                ..prefund.variable_part.clone()
            },
            ..prefund.clone()
        };

        let mut data = DirectFundData::new(
            objective_id.clone(),
            fixed_part.clone(),
            my_index,
            prefund.clone(),
            postfund,
        );
        let signature = self.identity.sign_prehash(&prefund.state_hash()?)?;
        data.prefund_signatures[my_index] = Some(signature);

        self.objectives
            .write()
            .insert(objective_id.clone(), Objective::DirectFund(data));

        self.emit(EventKind::Objective(ObjectiveEvent::ObjectiveCreated {
            objective_id: objective_id.clone(),
            channel_id,
            protocol: "direct-fund".to_string(),
            participants: fixed_part.participants.clone(),
        }))
        .await?;

        Ok(objective_id)
    }

    /// Approve an objective, cranking it forward and carrying out any
    /// side effects the crank produces.
    pub async fn approve(&self, objective_id: &str) -> anyhow::Result<WaitingFor> {
        self.emit(EventKind::Objective(ObjectiveEvent::ObjectiveApproved {
            objective_id: objective_id.to_string(),
        }))
        .await?;
        let event = Event::new(
            EventKind::Objective(ObjectiveEvent::ObjectiveApproved {
                objective_id: objective_id.to_string(),
            }),
            now_millis(),
        )?;
        self.crank(objective_id, &event).await
    }

    /// Reject an objective; it will not be cranked further.
    pub async fn reject(&self, objective_id: &str, reason: String) -> anyhow::Result<()> {
        self.objectives.write().remove(objective_id);
        self.emit(EventKind::Objective(ObjectiveEvent::ObjectiveRejected {
            objective_id: objective_id.to_string(),
            reason,
        }))
        .await
    }

    async fn crank(&self, objective_id: &str, event: &Event) -> anyhow::Result<WaitingFor> {
        let current = self
            .objectives
            .write()
            .remove(objective_id)
            .ok_or_else(|| anyhow::anyhow!("objective {objective_id} not found"))?;
        let before = current.clone();
        let (next, effects, waiting_for) = match step(current, event) {
            Ok(result) => result,
            Err(err) => {
                self.objectives
                    .write()
                    .insert(objective_id.to_string(), before);
                return Err(err.into());
            }
        };
        let completed = waiting_for == WaitingFor::Nothing;
        let side_effect_count = effects.len() as u32;
        let final_state_hash = if completed {
            next.terminal_state_hash().transpose()?
        } else {
            None
        };
        self.objectives
            .write()
            .insert(objective_id.to_string(), next);

        for effect in effects {
            self.carry_out(effect).await?;
        }

        self.emit(EventKind::Objective(ObjectiveEvent::ObjectiveCranked {
            objective_id: objective_id.to_string(),
            waiting_for: waiting_for_name(waiting_for).to_string(),
            side_effect_count,
            blocked: waiting_for != WaitingFor::Nothing,
        }))
        .await?;

        if completed {
            self.emit(EventKind::Objective(ObjectiveEvent::ObjectiveCompleted {
                objective_id: objective_id.to_string(),
                success: true,
                final_state_hash,
            }))
            .await?;
        }
        Ok(waiting_for)
    }

    async fn carry_out(&self, effect: SideEffect) -> anyhow::Result<()> {
        match effect {
            SideEffect::SendMessage { to, state, signature } => {
                info!(to = %to, turn = state.variable_part.turn_num, "sending signed state");
                let channel_id = state.channel_id();
                let payload_event_id = state.state_hash()?;
                self.emit(EventKind::Message(MessageEvent::MessageSent {
                    to,
                    channel_id: Some(channel_id),
                    payload_event_id,
                }))
                .await?;
                // In-process transport: every participant shares this store, so
                // "sending" the signed state is appending it directly rather
                // than waiting on a peer to pull it off a wire.
                self.emit(EventKind::Channel(ChannelEvent::StateReceived {
                    channel_id,
                    state,
                    from: self.address(),
                    signature,
                }))
                .await?;
            }
            SideEffect::SubmitTx { to, value, .. } => {
                info!(to = %to, value = %value, "submitting on-chain transaction");
            }
            SideEffect::ProposeConsensusUpdate { channel_id, proposed_state } => {
                info!(channel_id = %channel_id, turn = proposed_state.variable_part.turn_num, "proposing consensus update");
            }
        }
        Ok(())
    }

    /// Send an arbitrary message to `to`, recording only that delivery was
    /// attempted (not its protocol effect).
    pub async fn send_message(&self, to: Address, channel_id: Option<Hash32>, payload: &str) -> anyhow::Result<()> {
        let payload_event_id = Hash32::digest(payload.as_bytes());
        self.emit(EventKind::Message(MessageEvent::MessageSent {
            to,
            channel_id,
            payload_event_id,
        }))
        .await
    }

    /// Rebuild a `LogSummary` by folding the entire event log, without
    /// mutating anything — the replay/audit path.
    pub async fn replay(&self) -> anyhow::Result<LogSummary> {
        let store = self.transport_store();
        let len = store.len();
        let events = store.read(0, len as usize);
        let mut summary = LogSummary::default();
        for event in &events {
            summary.apply(event);
        }
        Ok(summary)
    }

    /// Current length of the local event log.
    pub fn log_len(&self) -> u64 {
        self.transport_store().len()
    }

    /// Snapshot of currently tracked objectives and what they're waiting on.
    pub fn objective_statuses(&self) -> Vec<(String, WaitingFor)> {
        self.objectives
            .read()
            .iter()
            .map(|(id, objective)| {
                let waiting_for = step(objective.clone(), &noop_event())
                    .map(|(_, _, waiting_for)| waiting_for)
                    .unwrap_or(WaitingFor::Nothing);
                (id.clone(), waiting_for)
            })
            .collect()
    }

    async fn emit(&self, kind: EventKind) -> anyhow::Result<Offset> {
        let event = Event::new(kind, now_millis())?;
        self.transport.append(event.clone()).await?;
        Ok(self.log_len().saturating_sub(1))
    }

    fn transport_store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }
}

fn waiting_for_name(waiting_for: WaitingFor) -> &'static str {
    match waiting_for {
        WaitingFor::Approval => "approval",
        WaitingFor::CompletePrefund => "complete-prefund",
        WaitingFor::MyTurnToFund => "my-turn-to-fund",
        WaitingFor::CompleteFunding => "complete-funding",
        WaitingFor::CompletePostfund => "complete-postfund",
        WaitingFor::Nothing => "nothing",
    }
}

fn noop_event() -> Event {
    Event::new(
        EventKind::Objective(ObjectiveEvent::ObjectiveCranked {
            objective_id: String::new(),
            waiting_for: String::new(),
            side_effect_count: 0,
            blocked: false,
        }),
        0,
    )
    .expect("static payload always encodes")
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A fold over the event log tallying events per domain, used by `replay`
/// and `status` to report without reconstructing full objective state.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LogSummary {
    /// Total events folded.
    pub total: u64,
    /// Count of objective-domain events.
    pub objective_events: u64,
    /// Count of channel-domain events.
    pub channel_events: u64,
    /// Count of chain-domain events.
    pub chain_events: u64,
    /// Count of messaging-domain events.
    pub message_events: u64,
}

impl Projection for LogSummary {
    fn apply(&mut self, event: &Event) {
        self.total += 1;
        match &event.kind {
            EventKind::Objective(_) => self.objective_events += 1,
            EventKind::Channel(_) => self.channel_events += 1,
            EventKind::Chain(_) => self.chain_events += 1,
            EventKind::Message(_) => self.message_events += 1,
        }
    }
}
