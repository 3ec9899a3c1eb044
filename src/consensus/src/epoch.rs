//! Byzantine read/write epoch consensus.
//!
//! One [`EpochConsensus`] runs one epoch at one replica. It performs no I/O:
//! every handler mutates the replica's [`EpochState`] and returns the
//! [`EpochAction`]s the caller must carry out. Own votes (the leader's STATE,
//! every replica's ACCEPT) are recorded locally instead of being sent to self.
//!
//! A replica decides only on an ACCEPT certificate it collected itself; the
//! leader's DECIDE is checked against that certificate, never trusted.
//!
//! A timeout, or ABORT from `f + 1` replicas, only makes a replica give up on
//! the epoch: it broadcasts its own ABORT and stops answering READ and WRITE,
//! but keeps counting ACCEPTs. The epoch ends in an abort once `n - f`
//! distinct replicas, itself included, have given up.

use crate::error::{ConsensusError, Result};
use crate::message::{Abort, Accept, ConsensusMessage, Decide, Read, State, Write};
use crate::state::{EpochPhase, EpochState, QuorumCertificate, VoteOutcome};
use depchain_core::{EpochNumber, MembershipOracle, ReplicaId, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochAction {
    /// Send to one replica
    Send {
        to: ReplicaId,
        message: ConsensusMessage,
    },
    /// Send to every replica except self
    Broadcast(ConsensusMessage),
    /// The epoch decided `value`
    Decide { epoch: EpochNumber, value: Value },
    /// The epoch aborted
    Abort { epoch: EpochNumber },
    /// Arm the abort timeout for the epoch
    StartTimer { epoch: EpochNumber },
}

/// State reply as recorded in the STATE certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateReply {
    pub value: Option<Value>,
    pub last_write_epoch: EpochNumber,
}

/// Agreement state machine for one epoch
#[derive(Debug)]
pub struct EpochConsensus {
    local: ReplicaId,
    epoch: EpochNumber,
    leader: ReplicaId,
    replicas: BTreeSet<ReplicaId>,
    quorum: usize,
    abort_threshold: usize,
    phase: EpochPhase,
    proposal: Option<Value>,
    timer_started: bool,
    state_sent: bool,
    written: Option<Value>,
    states: QuorumCertificate<StateReply>,
    accepts: QuorumCertificate<Value>,
    aborts: BTreeSet<ReplicaId>,
    abandoned: bool,
    decided: Option<Value>,
    leader_decide: Option<Value>,
}

impl EpochConsensus {
    /// Create the instance for `epoch` at replica `local`
    pub fn new(local: ReplicaId, epoch: EpochNumber, membership: &dyn MembershipOracle) -> Self {
        Self {
            local,
            epoch,
            leader: membership.leader().clone(),
            replicas: membership.replicas().iter().cloned().collect(),
            quorum: membership.quorum_size(),
            abort_threshold: membership.max_faulty() + 1,
            phase: EpochPhase::Idle,
            proposal: None,
            timer_started: false,
            state_sent: false,
            written: None,
            states: QuorumCertificate::new(epoch),
            accepts: QuorumCertificate::new(epoch),
            aborts: BTreeSet::new(),
            abandoned: false,
            decided: None,
            leader_decide: None,
        }
    }

    pub fn epoch(&self) -> EpochNumber {
        self.epoch
    }

    pub fn leader(&self) -> &ReplicaId {
        &self.leader
    }

    pub fn phase(&self) -> EpochPhase {
        self.phase
    }

    /// Leader only: the value this epoch was started with
    pub fn proposal(&self) -> Option<&Value> {
        self.proposal.as_ref()
    }

    /// Whether this replica sent its own ABORT
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Value decided in this epoch
    pub fn decided_value(&self) -> Option<&Value> {
        self.decided.as_ref()
    }

    /// Started and not yet decided or aborted
    pub fn is_working(&self) -> bool {
        self.timer_started && !self.phase.is_terminal()
    }

    fn is_leader(&self) -> bool {
        self.local == self.leader
    }

    /// Arm the timeout the first time the instance sees any activity
    pub fn start(&mut self) -> Vec<EpochAction> {
        if self.timer_started || self.phase.is_terminal() {
            return Vec::new();
        }
        self.timer_started = true;
        vec![EpochAction::StartTimer { epoch: self.epoch }]
    }

    /// Leader only: start the epoch with `value` as its proposal
    pub fn propose(&mut self, value: Value, state: &mut EpochState) -> Result<Vec<EpochAction>> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader { epoch: self.epoch });
        }
        if self.phase != EpochPhase::Idle {
            return Err(ConsensusError::EpochInProgress { epoch: self.epoch });
        }

        info!(epoch = self.epoch, value_len = value.len(), "Proposing value");
        self.proposal = Some(value);
        self.phase = EpochPhase::Reading;

        let mut actions = self.start();
        actions.push(EpochAction::Broadcast(ConsensusMessage::Read(Read {
            epoch: self.epoch,
        })));

        self.phase = EpochPhase::Collecting;
        self.state_sent = true;
        let own = StateReply {
            value: state.value.clone(),
            last_write_epoch: state.last_write_epoch,
        };
        actions.extend(self.collect(self.local.clone(), own, state)?);
        Ok(actions)
    }

    /// Route a protocol message to its handler
    pub fn handle(
        &mut self,
        sender: &ReplicaId,
        message: ConsensusMessage,
        state: &mut EpochState,
    ) -> Result<Vec<EpochAction>> {
        if message.epoch() != self.epoch {
            return Err(ConsensusError::InvalidEpoch {
                expected: self.epoch,
                actual: message.epoch(),
            });
        }
        if !self.replicas.contains(sender) {
            return Err(ConsensusError::UnknownReplica(sender.clone()));
        }

        let handled = match message {
            ConsensusMessage::Read(_) => self.handle_read(sender, state),
            ConsensusMessage::State(reply) => self.handle_collected(sender, reply, state),
            ConsensusMessage::Write(write) => self.handle_write(sender, write.value, state),
            ConsensusMessage::Accept(accept) => self.handle_accept(sender, accept.value, state),
            ConsensusMessage::Decide(decide) => self.handle_decide(sender, decide.value, state),
            ConsensusMessage::Abort(_) => self.handle_abort(sender),
        }?;
        // rejected traffic must not arm the timer of an otherwise idle epoch
        let mut actions = self.start();
        actions.extend(handled);
        Ok(actions)
    }

    fn require_leader(&self, sender: &ReplicaId, command: &str) -> Result<()> {
        if *sender != self.leader {
            return Err(ConsensusError::UnexpectedSender {
                sender: sender.clone(),
                command: command.to_string(),
                epoch: self.epoch,
            });
        }
        Ok(())
    }

    /// READ: answer the leader with this replica's state, once per epoch
    pub fn handle_read(
        &mut self,
        sender: &ReplicaId,
        state: &EpochState,
    ) -> Result<Vec<EpochAction>> {
        self.require_leader(sender, "READ")?;
        if self.phase.is_terminal() || self.abandoned || self.state_sent {
            debug!(epoch = self.epoch, "Ignoring repeated READ");
            return Ok(Vec::new());
        }
        if state.last_write_epoch >= self.epoch {
            return Err(ConsensusError::StaleEpoch {
                epoch: self.epoch,
                last_write_epoch: state.last_write_epoch,
            });
        }

        self.state_sent = true;
        if self.phase == EpochPhase::Idle {
            self.phase = EpochPhase::Reading;
        }
        debug!(epoch = self.epoch, last_write_epoch = state.last_write_epoch, "Sending STATE");
        Ok(vec![EpochAction::Send {
            to: self.leader.clone(),
            message: ConsensusMessage::State(State {
                epoch: self.epoch,
                value: state.value.clone(),
                last_write_epoch: state.last_write_epoch,
            }),
        }])
    }

    /// STATE / COLLECTED: the leader gathers a STATE certificate
    pub fn handle_collected(
        &mut self,
        sender: &ReplicaId,
        reply: State,
        state: &mut EpochState,
    ) -> Result<Vec<EpochAction>> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader { epoch: self.epoch });
        }
        if self.phase != EpochPhase::Collecting || self.abandoned {
            debug!(epoch = self.epoch, sender = %sender, phase = ?self.phase, "Late STATE ignored");
            return Ok(Vec::new());
        }
        if reply.last_write_epoch >= self.epoch {
            return Err(ConsensusError::InvalidState {
                replica: sender.clone(),
                reason: format!(
                    "last write epoch {} not before epoch {}",
                    reply.last_write_epoch, self.epoch
                ),
            });
        }
        if reply.value.is_some() != (reply.last_write_epoch > 0) {
            return Err(ConsensusError::InvalidState {
                replica: sender.clone(),
                reason: "value and last write epoch disagree".to_string(),
            });
        }

        let reply = StateReply {
            value: reply.value,
            last_write_epoch: reply.last_write_epoch,
        };
        self.collect(sender.clone(), reply, state)
    }

    fn collect(
        &mut self,
        sender: ReplicaId,
        reply: StateReply,
        state: &mut EpochState,
    ) -> Result<Vec<EpochAction>> {
        match self.states.add(sender.clone(), reply) {
            VoteOutcome::New => {}
            VoteOutcome::Repeat => return Ok(Vec::new()),
            VoteOutcome::Conflict { .. } => {
                return Err(ConsensusError::Equivocation {
                    replica: sender,
                    epoch: self.epoch,
                })
            }
        }

        debug!(
            epoch = self.epoch,
            sender = %sender,
            collected = self.states.len(),
            quorum = self.quorum,
            "STATE collected"
        );
        if self.states.len() < self.quorum {
            return Ok(Vec::new());
        }

        let value = self.select_value()?;
        info!(epoch = self.epoch, "STATE certificate complete, writing value");
        self.phase = EpochPhase::Writing;
        let mut actions = vec![EpochAction::Broadcast(ConsensusMessage::Write(Write {
            epoch: self.epoch,
            value: value.clone(),
        }))];
        actions.extend(self.write_value(value, state)?);
        Ok(actions)
    }

    /// Value of the reply with the greatest last write epoch, lowest sender
    /// first on ties; the proposal when every reply is bottom.
    fn select_value(&self) -> Result<Value> {
        let mut best: Option<(&Value, EpochNumber)> = None;
        for reply in self.states.votes().values() {
            if let Some(value) = &reply.value {
                if best.map_or(true, |(_, epoch)| reply.last_write_epoch > epoch) {
                    best = Some((value, reply.last_write_epoch));
                }
            }
        }
        match best {
            Some((value, _)) => Ok(value.clone()),
            None => self
                .proposal
                .clone()
                .ok_or_else(|| ConsensusError::Internal("leader has no proposal".to_string())),
        }
    }

    /// WRITE: adopt the leader's value and announce it to everyone
    pub fn handle_write(
        &mut self,
        sender: &ReplicaId,
        value: Value,
        state: &mut EpochState,
    ) -> Result<Vec<EpochAction>> {
        self.require_leader(sender, "WRITE")?;
        if self.phase.is_terminal() {
            return Ok(Vec::new());
        }
        if self.abandoned {
            debug!(epoch = self.epoch, "WRITE after giving up, not accepting");
            return Ok(Vec::new());
        }
        if let Some(written) = &self.written {
            if *written == value {
                return Ok(Vec::new());
            }
            return Err(ConsensusError::Equivocation {
                replica: sender.clone(),
                epoch: self.epoch,
            });
        }
        if state.last_write_epoch >= self.epoch {
            return Err(ConsensusError::StaleEpoch {
                epoch: self.epoch,
                last_write_epoch: state.last_write_epoch,
            });
        }
        self.write_value(value, state)
    }

    fn write_value(&mut self, value: Value, state: &mut EpochState) -> Result<Vec<EpochAction>> {
        state.write(self.epoch, value.clone());
        self.written = Some(value.clone());
        self.phase = EpochPhase::Accepting;
        debug!(epoch = self.epoch, "Value written, sending ACCEPT");

        let mut actions = vec![EpochAction::Broadcast(ConsensusMessage::Accept(Accept {
            epoch: self.epoch,
            value: value.clone(),
        }))];
        actions.extend(self.record_accept(self.local.clone(), value, state)?);
        Ok(actions)
    }

    /// ACCEPT: count towards this replica's ACCEPT certificate
    pub fn handle_accept(
        &mut self,
        sender: &ReplicaId,
        value: Value,
        state: &mut EpochState,
    ) -> Result<Vec<EpochAction>> {
        if self.phase.is_terminal() {
            return Ok(Vec::new());
        }
        self.record_accept(sender.clone(), value, state)
    }

    fn record_accept(
        &mut self,
        sender: ReplicaId,
        value: Value,
        state: &mut EpochState,
    ) -> Result<Vec<EpochAction>> {
        match self.accepts.add(sender.clone(), value) {
            VoteOutcome::New => {}
            VoteOutcome::Repeat => return Ok(Vec::new()),
            VoteOutcome::Conflict { .. } => {
                return Err(ConsensusError::Equivocation {
                    replica: sender,
                    epoch: self.epoch,
                })
            }
        }
        debug!(epoch = self.epoch, sender = %sender, accepts = self.accepts.len(), "ACCEPT recorded");
        Ok(self.try_decide(state))
    }

    fn try_decide(&mut self, state: &mut EpochState) -> Vec<EpochAction> {
        if self.phase.is_terminal() {
            return Vec::new();
        }
        let value = match self.accepts.quorum_vote(self.quorum) {
            Some(value) => value.clone(),
            None => return Vec::new(),
        };

        if let Some(announced) = &self.leader_decide {
            if *announced != value {
                warn!(epoch = self.epoch, "Leader announced a value without a certificate");
            }
        }

        info!(epoch = self.epoch, "ACCEPT certificate complete, deciding");
        self.phase = EpochPhase::Decided;
        self.decided = Some(value.clone());
        state.commit();

        let mut actions = Vec::new();
        if self.is_leader() {
            actions.push(EpochAction::Broadcast(ConsensusMessage::Decide(Decide {
                epoch: self.epoch,
                value: value.clone(),
            })));
        }
        actions.push(EpochAction::Decide {
            epoch: self.epoch,
            value,
        });
        actions
    }

    /// DECIDE: checked against the local certificate, never adopted blindly
    pub fn handle_decide(
        &mut self,
        sender: &ReplicaId,
        value: Value,
        state: &mut EpochState,
    ) -> Result<Vec<EpochAction>> {
        self.require_leader(sender, "DECIDE")?;
        if let Some(decided) = &self.decided {
            if *decided != value {
                return Err(ConsensusError::Equivocation {
                    replica: sender.clone(),
                    epoch: self.epoch,
                });
            }
            return Ok(Vec::new());
        }
        if self.phase.is_terminal() {
            return Ok(Vec::new());
        }

        debug!(
            epoch = self.epoch,
            matching = self.accepts.count_matching(&value),
            quorum = self.quorum,
            "DECIDE received, waiting for own certificate"
        );
        self.leader_decide = Some(value);
        Ok(self.try_decide(state))
    }

    /// ABORT: `f + 1` distinct replicas make this one give up too; `n - f`
    /// end the epoch
    pub fn handle_abort(&mut self, sender: &ReplicaId) -> Result<Vec<EpochAction>> {
        if self.phase.is_terminal() {
            return Ok(Vec::new());
        }
        self.aborts.insert(sender.clone());
        debug!(epoch = self.epoch, sender = %sender, aborts = self.aborts.len(), "ABORT received");
        let mut actions = Vec::new();
        if !self.abandoned && self.aborts.len() >= self.abort_threshold {
            actions.extend(self.abandon("abort amplification"));
        }
        actions.extend(self.try_abort());
        Ok(actions)
    }

    /// The epoch timer fired
    pub fn on_timeout(&mut self) -> Vec<EpochAction> {
        if self.phase.is_terminal() || self.abandoned {
            return Vec::new();
        }
        let mut actions = self.abandon("timeout");
        actions.extend(self.try_abort());
        actions
    }

    fn abandon(&mut self, reason: &str) -> Vec<EpochAction> {
        warn!(epoch = self.epoch, phase = ?self.phase, reason, "Giving up on epoch");
        self.abandoned = true;
        self.aborts.insert(self.local.clone());
        vec![EpochAction::Broadcast(ConsensusMessage::Abort(Abort { epoch: self.epoch }))]
    }

    fn try_abort(&mut self) -> Vec<EpochAction> {
        if self.phase.is_terminal() || self.aborts.len() < self.quorum {
            return Vec::new();
        }
        warn!(epoch = self.epoch, aborts = self.aborts.len(), "ABORT certificate complete");
        self.phase = EpochPhase::Aborted;
        vec![EpochAction::Abort { epoch: self.epoch }]
    }
}
