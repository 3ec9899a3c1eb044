//! Replica runtime.
//!
//! A [`Replica`] owns one [`ReplicaCore`] inside a single tokio task. The task
//! wakes on the shared inbox [`Notify`], on epoch timers and on commands from
//! the handle, so all consensus state is mutated from one place without locks.

use crate::byzantine_detection::ByzantineDetector;
use crate::config::ConsensusConfig;
use crate::epoch::{EpochAction, EpochConsensus};
use crate::error::{ConsensusError, Result};
use crate::message::ConsensusMessage;
use crate::metrics::ConsensusMetrics;
use crate::role::{Dispatch, ReplicaRole, Role};
use crate::state::EpochState;
use depchain_core::{
    Block, Command, EpochNumber, Ledger, MembershipOracle, Message, ReplicaId, Value,
};
use depchain_network::AuthenticatedLink;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// How far ahead of the current epoch early messages are kept
const MAX_EARLY_EPOCHS: EpochNumber = 8;

/// Early messages kept per future epoch
const MAX_EARLY_PER_EPOCH: usize = 64;

const EVENT_CAPACITY: usize = 256;

/// Outcome of an epoch, published to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaEvent {
    Decided { epoch: EpochNumber, block: Block },
    Aborted { epoch: EpochNumber },
    /// A decided block could not be persisted; the replica stopped
    Halted { epoch: EpochNumber },
}

enum ReplicaCommand {
    Propose(Value),
    ChangeRole(Role),
}

/// Consensus state of one replica, owned by its event loop
pub struct ReplicaCore {
    pub(crate) local: ReplicaId,
    pub(crate) membership: Arc<dyn MembershipOracle>,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) role: Role,
    pub(crate) epoch_state: EpochState,
    epochs: BTreeMap<EpochNumber, EpochConsensus>,
    early: BTreeMap<EpochNumber, Vec<(ReplicaId, ConsensusMessage)>>,
    pub(crate) chain: Arc<RwLock<Vec<Block>>>,
    pub(crate) proposals: VecDeque<Value>,
    detector: ByzantineDetector,
    pub(crate) metrics: Arc<ConsensusMetrics>,
    links: Arc<BTreeMap<ReplicaId, AuthenticatedLink>>,
    notify: Arc<Notify>,
    events: broadcast::Sender<ReplicaEvent>,
    timer_tx: mpsc::UnboundedSender<EpochNumber>,
    timers: HashMap<EpochNumber, JoinHandle<()>>,
    status: Option<JoinHandle<()>>,
    started: Option<(EpochNumber, Instant)>,
    halted: bool,
    config: ConsensusConfig,
}

impl ReplicaCore {
    /// Recover the chain from `ledger` and build the core in its initial role.
    ///
    /// Epoch timers fire into the returned receiver.
    pub(crate) fn new(
        local: ReplicaId,
        membership: Arc<dyn MembershipOracle>,
        ledger: Arc<dyn Ledger>,
        links: BTreeMap<ReplicaId, AuthenticatedLink>,
        notify: Arc<Notify>,
        config: ConsensusConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EpochNumber>)> {
        if !membership.contains(&local) {
            return Err(ConsensusError::Configuration(format!(
                "{} is not a replica",
                local
            )));
        }
        if let Some(missing) = membership
            .peers_of(&local)
            .into_iter()
            .find(|peer| !links.contains_key(peer))
        {
            return Err(ConsensusError::Configuration(format!(
                "no link from {} to {}",
                local, missing
            )));
        }

        let chain = ledger.load_recovered_chain()?;
        let height = chain.len().saturating_sub(1) as EpochNumber;
        let leader = membership.leader().clone();
        let role = Role::of(&local, &leader);
        info!(
            replica = %local,
            role = ?role,
            replicas = membership.total(),
            quorum = membership.quorum_size(),
            height,
            "Starting replica"
        );

        let detector = ByzantineDetector::new(membership.replicas().iter().cloned());
        let metrics = Arc::new(ConsensusMetrics::new()?);
        metrics.current_epoch.set(height as i64);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let core = Self {
            local,
            membership,
            ledger,
            role,
            epoch_state: EpochState::recovered(leader, height),
            epochs: BTreeMap::new(),
            early: BTreeMap::new(),
            chain: Arc::new(RwLock::new(chain)),
            proposals: VecDeque::new(),
            detector,
            metrics,
            links: Arc::new(links),
            notify,
            events,
            timer_tx,
            timers: HashMap::new(),
            status: None,
            started: None,
            halted: false,
            config,
        };
        Ok((core, timer_rx))
    }

    /// Whether an epoch instance is started and not yet finished
    pub fn is_working(&self) -> bool {
        self.epochs.values().any(EpochConsensus::is_working)
    }

    /// Messages for an epoch beyond the one in progress wait in the inbox
    pub(crate) fn defers(&self, message: &ConsensusMessage) -> bool {
        message.epoch() > self.epoch_state.epoch && self.is_working()
    }

    /// Route a decoded protocol message to the instance of its epoch
    pub(crate) fn handle_protocol(&mut self, sender: &ReplicaId, message: ConsensusMessage) {
        if self.halted {
            return;
        }
        let epoch = message.epoch();
        let mut opened = false;
        if !self.epochs.contains_key(&epoch) {
            if epoch <= self.epoch_state.epoch {
                debug!(sender = %sender, epoch, current = self.epoch_state.epoch, "Dropping message for a past epoch");
                self.metrics.messages_dropped.inc();
                return;
            }
            if sender != self.membership.leader() {
                self.stash_early(sender, message);
                return;
            }
            self.open_epoch(epoch);
            opened = true;
        }

        let command = message.command();
        let result = match self.epochs.get_mut(&epoch) {
            Some(instance) => instance.handle(sender, message, &mut self.epoch_state),
            None => return,
        };
        match result {
            Ok(actions) => self.apply(actions),
            Err(e) => self.reject(sender, &command, e),
        }

        if opened {
            self.replay_early(epoch);
        }
    }

    fn stash_early(&mut self, sender: &ReplicaId, message: ConsensusMessage) {
        let epoch = message.epoch();
        if epoch > self.epoch_state.epoch + MAX_EARLY_EPOCHS {
            debug!(sender = %sender, epoch, "Dropping message too far ahead");
            self.metrics.messages_dropped.inc();
            return;
        }
        let stash = self.early.entry(epoch).or_default();
        if stash.len() >= MAX_EARLY_PER_EPOCH {
            self.metrics.messages_dropped.inc();
            return;
        }
        trace!(sender = %sender, epoch, "Holding message until the leader opens the epoch");
        stash.push((sender.clone(), message));
    }

    fn replay_early(&mut self, epoch: EpochNumber) {
        if let Some(early) = self.early.remove(&epoch) {
            for (sender, message) in early {
                self.handle_protocol(&sender, message);
            }
        }
    }

    fn open_epoch(&mut self, epoch: EpochNumber) {
        debug!(epoch, "Opening epoch");
        let instance = EpochConsensus::new(self.local.clone(), epoch, self.membership.as_ref());
        self.epoch_state.epoch = epoch;
        self.epoch_state.leader = instance.leader().clone();
        self.epochs.insert(epoch, instance);
        self.started = Some((epoch, Instant::now()));
        self.metrics.current_epoch.set(epoch as i64);

        // later epochs replace older instances and early messages
        while self.epochs.len() > self.config.retained_epochs.max(1) {
            self.epochs.pop_first();
        }
        self.early = self.early.split_off(&epoch);
    }

    /// Leader only: start an epoch for the next queued proposal when idle
    pub(crate) fn start_next_proposal(&mut self) {
        if self.halted || !self.role.is_leader() || self.is_working() {
            return;
        }
        let value = match self.proposals.pop_front() {
            Some(value) => value,
            None => return,
        };
        let epoch = self.epoch_state.epoch + 1;
        self.open_epoch(epoch);
        self.metrics.proposals.inc();

        let result = match self.epochs.get_mut(&epoch) {
            Some(instance) => instance.propose(value, &mut self.epoch_state),
            None => return,
        };
        match result {
            Ok(actions) => self.apply(actions),
            Err(e) => warn!(epoch, error = %e, "Proposal rejected"),
        }
        self.replay_early(epoch);
    }

    fn apply(&mut self, actions: Vec<EpochAction>) {
        let role = self.role;
        for action in actions {
            if self.halted {
                return;
            }
            match action {
                EpochAction::Send { to, message } => self.send(&to, &message),
                EpochAction::Broadcast(message) => match message.to_message() {
                    Ok(message) => self.broadcast(&message),
                    Err(e) => warn!(error = %e, "Failed to encode protocol message"),
                },
                EpochAction::Decide { epoch, value } => role.decided(self, epoch, value),
                EpochAction::Abort { epoch } => role.aborted(self, epoch),
                EpochAction::StartTimer { epoch } => self.start_timer(epoch),
            }
        }
    }

    fn start_timer(&mut self, epoch: EpochNumber) {
        let timer_tx = self.timer_tx.clone();
        let timeout = self.config.epoch_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timer_tx.send(epoch);
        });
        if let Some(previous) = self.timers.insert(epoch, handle) {
            previous.abort();
        }
    }

    fn on_timeout(&mut self, epoch: EpochNumber) {
        self.timers.remove(&epoch);
        let actions = match self.epochs.get_mut(&epoch) {
            Some(instance) => instance.on_timeout(),
            None => return,
        };
        if !actions.is_empty() {
            info!(epoch, "Epoch timed out");
        }
        self.apply(actions);
    }

    /// Leader only: queue the epoch's proposal again, ahead of later ones,
    /// unless the epoch decided it
    pub(crate) fn requeue_proposal(&mut self, epoch: EpochNumber, decided: Option<&Value>) {
        let proposal = match self.epochs.get(&epoch).and_then(EpochConsensus::proposal) {
            Some(proposal) => proposal.clone(),
            None => return,
        };
        if decided == Some(&proposal) {
            return;
        }
        info!(epoch, "Proposal was not decided, queueing it again");
        self.proposals.push_front(proposal);
    }

    /// Stop for good after a decided block could not be persisted
    pub(crate) fn halt(&mut self, epoch: EpochNumber, cause: &ConsensusError) {
        error!(replica = %self.local, epoch, error = %cause, "Failed to persist decided block, halting");
        self.halted = true;
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        self.stop_status_loop();
        let _ = self.events.send(ReplicaEvent::Halted { epoch });
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Stop the epoch's timer and let deferred traffic through
    pub(crate) fn finish_epoch(&mut self, epoch: EpochNumber) {
        if let Some(timer) = self.timers.remove(&epoch) {
            timer.abort();
        }
        self.notify.notify_one();
    }

    /// Log a protocol fault; faults never leave the dispatcher
    pub(crate) fn reject(&mut self, sender: &ReplicaId, command: &Command, error: ConsensusError) {
        self.metrics.messages_dropped.inc();
        if self.detector.observe(sender, &error).is_some() {
            self.metrics.byzantine_violations.inc();
        } else {
            debug!(sender = %sender, command = %command, error = %error, "Message rejected");
        }
    }

    fn send(&self, to: &ReplicaId, message: &ConsensusMessage) {
        match message.to_message() {
            Ok(message) => self.reply(to, message),
            Err(e) => warn!(error = %e, "Failed to encode protocol message"),
        }
    }

    /// Send `message` to one peer or client
    pub(crate) fn reply(&self, to: &ReplicaId, message: Message) {
        let link = match self.links.get(to) {
            Some(link) => link,
            None => {
                warn!(peer = %to, command = %message.command, "No link to peer");
                return;
            }
        };
        if let Err(e) = link.send_message(&message) {
            warn!(peer = %to, command = %message.command, error = %e, "Send failed");
        }
    }

    /// Send `message` to every other replica
    pub(crate) fn broadcast(&self, message: &Message) {
        for peer in self.membership.peers_of(&self.local) {
            self.reply(&peer, message.clone());
        }
    }

    pub(crate) fn emit_decided(&mut self, epoch: EpochNumber, block: Block) {
        if let Some((started_epoch, started_at)) = self.started {
            if started_epoch == epoch {
                self.metrics
                    .decision_time
                    .observe(started_at.elapsed().as_secs_f64() * 1000.0);
            }
        }
        let _ = self.events.send(ReplicaEvent::Decided { epoch, block });
    }

    pub(crate) fn emit_aborted(&mut self, epoch: EpochNumber) {
        let _ = self.events.send(ReplicaEvent::Aborted { epoch });
    }

    pub(crate) fn spawn_status_loop(&mut self) {
        if self.status.is_some() {
            return;
        }
        let links = self.links.clone();
        let metrics = self.metrics.clone();
        let local = self.local.clone();
        let interval = self.config.status_interval;
        self.status = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut total = 0;
                for (peer, link) in links.iter() {
                    let depth = link.len();
                    total += depth;
                    info!(replica = %local, peer = %peer, depth, unacknowledged = link.unacknowledged(), "Inbox status");
                }
                metrics.inbox_depth.set(total as i64);
            }
        }));
    }

    pub(crate) fn stop_status_loop(&mut self) {
        if let Some(status) = self.status.take() {
            status.abort();
        }
    }

    fn dispatch(&mut self, sender: &ReplicaId, message: Message) -> Dispatch {
        let role = self.role;
        if self.membership.contains(sender) {
            role.process_message(self, sender, message)
        } else if self.membership.clients().contains(sender) {
            role.process_client_command(self, sender, message)
        } else {
            warn!(sender = %sender, command = %message.command, "Message from outside the membership");
            self.metrics.messages_dropped.inc();
            Dispatch::Processed
        }
    }

    /// Process the messages queued when the pass starts, peer by peer
    fn drain_pass(&mut self) {
        let links = self.links.clone();
        let mut deferred = 0u64;
        for link in links.values() {
            let pending = link.len();
            for _ in 0..pending {
                if self.halted {
                    return;
                }
                let message = match link.pop() {
                    Some(message) => message,
                    None => break,
                };
                let sender = link.peer().clone();
                trace!(sender = %sender, command = %message.command, "Dispatching");
                if let Dispatch::Deferred(message) = self.dispatch(&sender, message) {
                    link.requeue(message);
                    deferred += 1;
                }
            }
        }

        if deferred > 0 {
            self.metrics.messages_deferred.inc_by(deferred);
            if !self.is_working() {
                self.notify.notify_one();
            }
        }
    }

    fn on_command(&mut self, command: ReplicaCommand) {
        let role = self.role;
        match command {
            ReplicaCommand::Propose(value) => role.propose_value(self, value),
            ReplicaCommand::ChangeRole(next) if next != role => {
                info!(replica = %self.local, from = ?role, to = ?next, "Changing role");
                self.role = next;
                next.start(self);
            }
            ReplicaCommand::ChangeRole(_) => {}
        }
    }
}

impl Drop for ReplicaCore {
    fn drop(&mut self) {
        self.stop_status_loop();
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

/// Handle to a running replica
pub struct Replica {
    local: ReplicaId,
    commands: mpsc::UnboundedSender<ReplicaCommand>,
    events: broadcast::Sender<ReplicaEvent>,
    chain: Arc<RwLock<Vec<Block>>>,
    ledger: Arc<dyn Ledger>,
    links: Arc<BTreeMap<ReplicaId, AuthenticatedLink>>,
    metrics: Arc<ConsensusMetrics>,
    shutdown: watch::Sender<bool>,
}

impl Replica {
    /// Recover the chain from `ledger` and start the event loop.
    ///
    /// `links` must hold one link per peer replica (clients optional), all
    /// created with the same `notify`.
    pub fn spawn(
        local: ReplicaId,
        membership: Arc<dyn MembershipOracle>,
        ledger: Arc<dyn Ledger>,
        links: BTreeMap<ReplicaId, AuthenticatedLink>,
        notify: Arc<Notify>,
        config: ConsensusConfig,
    ) -> Result<Self> {
        let (mut core, mut timer_rx) =
            ReplicaCore::new(local.clone(), membership, ledger.clone(), links, notify.clone(), config)?;
        let role = core.role;
        let chain = core.chain.clone();
        let links = core.links.clone();
        let metrics = core.metrics.clone();
        let events = core.events.clone();
        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            role.start(&mut core);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    Some(command) = command_rx.recv() => core.on_command(command),
                    Some(epoch) = timer_rx.recv() => {
                        core.on_timeout(epoch);
                        core.notify.notify_one();
                    }
                    _ = notify.notified() => core.drain_pass(),
                }
                if core.halted {
                    break;
                }
            }
            info!(replica = %core.local, "Replica stopped");
        });

        Ok(Self {
            local,
            commands,
            events,
            chain,
            ledger,
            links,
            metrics,
            shutdown,
        })
    }

    pub fn local(&self) -> &ReplicaId {
        &self.local
    }

    /// Queue a value for agreement; only the leader proposes
    pub fn propose_value(&self, value: impl Into<Value>) -> Result<()> {
        self.commands
            .send(ReplicaCommand::Propose(value.into()))
            .map_err(|_| ConsensusError::Internal("replica stopped".to_string()))
    }

    /// Swap the replica's role
    pub fn change_role(&self, role: Role) -> Result<()> {
        self.commands
            .send(ReplicaCommand::ChangeRole(role))
            .map_err(|_| ConsensusError::Internal("replica stopped".to_string()))
    }

    /// Decisions and aborts from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the committed chain, genesis first
    pub fn chain(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    /// Balance of `account` in the ledger's world state
    pub fn balance(&self, account: &str) -> Option<u64> {
        self.ledger.balance(account)
    }

    pub fn metrics(&self) -> Arc<ConsensusMetrics> {
        self.metrics.clone()
    }

    /// Messages waiting across all inboxes
    pub fn inbox_depth(&self) -> usize {
        self.links.values().map(AuthenticatedLink::len).sum()
    }

    /// Stop the event loop; links stop when the last handle drops
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Abort, Accept, Read, State, Write};
    use depchain_core::{CoreError, MemoryLedger, StaticMembership, WorldState};
    use depchain_crypto::ReplicaKeyPair;
    use depchain_network::{Delivery, LinkConfig, SimNetwork};

    const NAMES: [&str; 5] = ["leader", "member1", "member2", "member3", "client1"];

    /// A replica core whose peers and client are played by the test
    struct Harness {
        core: ReplicaCore,
        events: broadcast::Receiver<ReplicaEvent>,
        /// Remote ends of the core's links, used to seal injected traffic
        remotes: BTreeMap<ReplicaId, AuthenticatedLink>,
    }

    fn harness(local: &str, ledger: Arc<dyn Ledger>) -> Harness {
        let ids: Vec<ReplicaId> = NAMES.iter().map(|n| ReplicaId::from(*n)).collect();
        let keys: HashMap<ReplicaId, Arc<ReplicaKeyPair>> = ids
            .iter()
            .map(|id| (id.clone(), Arc::new(ReplicaKeyPair::generate())))
            .collect();
        let publics: HashMap<ReplicaId, [u8; 32]> =
            keys.iter().map(|(id, k)| (id.clone(), k.public_key())).collect();
        let membership = StaticMembership::with_clients(
            ids[..4].to_vec(),
            vec![ids[4].clone()],
            "leader".into(),
            publics.clone(),
        )
        .unwrap();

        let local = ReplicaId::from(local);
        let config = LinkConfig::default();
        let notify = Arc::new(Notify::new());
        let mut mesh = SimNetwork::reliable().mesh(&ids);
        let mut ends = mesh.remove(&local).unwrap();
        let mut links = BTreeMap::new();
        let mut remotes = BTreeMap::new();
        for peer in ids.iter().filter(|id| **id != local) {
            let near = ends.remove(peer).unwrap();
            let far = mesh.get_mut(peer).unwrap().remove(&local).unwrap();
            let link = AuthenticatedLink::connect(
                local.clone(),
                keys[&local].clone(),
                peer.clone(),
                publics[peer],
                Arc::new(near),
                &config,
                notify.clone(),
            )
            .unwrap();
            let remote = AuthenticatedLink::connect(
                peer.clone(),
                keys[peer].clone(),
                local.clone(),
                publics[&local],
                Arc::new(far),
                &config,
                Arc::new(Notify::new()),
            )
            .unwrap();
            links.insert(peer.clone(), link);
            remotes.insert(peer.clone(), remote);
        }

        let (core, _timers) = ReplicaCore::new(
            local,
            Arc::new(membership),
            ledger,
            links,
            notify,
            ConsensusConfig::default(),
        )
        .unwrap();
        let events = core.events.subscribe();
        Harness {
            core,
            events,
            remotes,
        }
    }

    fn memory_ledger() -> Arc<dyn Ledger> {
        Arc::new(MemoryLedger::new(WorldState::default()))
    }

    impl Harness {
        /// Put `message` from `from` in the core's inbox and run one pass
        fn deliver(&mut self, from: &str, message: Message) {
            let from = ReplicaId::from(from);
            let raw = self.remotes[&from]
                .seal_message(&message)
                .unwrap()
                .encode()
                .unwrap();
            assert_eq!(self.core.links[&from].on_message_received(&raw), Delivery::Accepted);
            self.core.drain_pass();
        }

        fn protocol(&mut self, from: &str, message: ConsensusMessage) {
            self.deliver(from, message.to_message().unwrap());
        }

        fn propose(&mut self, value: &[u8]) {
            let role = self.core.role;
            role.propose_value(&mut self.core, value.to_vec());
        }

        fn proposal_of(&self, epoch: EpochNumber) -> Option<&[u8]> {
            self.core.epochs.get(&epoch)?.proposal().map(Vec::as_slice)
        }
    }

    fn state(epoch: EpochNumber, value: Option<&[u8]>, last_write_epoch: EpochNumber) -> ConsensusMessage {
        ConsensusMessage::State(State {
            epoch,
            value: value.map(<[u8]>::to_vec),
            last_write_epoch,
        })
    }

    fn accept(epoch: EpochNumber, value: &[u8]) -> ConsensusMessage {
        ConsensusMessage::Accept(Accept {
            epoch,
            value: value.to_vec(),
        })
    }

    struct FailingLedger;

    impl Ledger for FailingLedger {
        fn append_block(&self, _block: &Block) -> depchain_core::Result<()> {
            Err(CoreError::ledger("disk full"))
        }

        fn load_recovered_chain(&self) -> depchain_core::Result<Vec<Block>> {
            Ok(vec![Block::genesis()])
        }

        fn balance(&self, _account: &str) -> Option<u64> {
            None
        }
    }

    #[tokio::test]
    async fn test_proposal_displaced_by_earlier_write_is_proposed_again() {
        let mut h = harness("leader", memory_ledger());
        h.propose(b"TX1");
        h.protocol("member1", state(1, None, 0));
        h.protocol("member2", state(1, None, 0));
        h.protocol("member1", accept(1, b"TX1"));
        h.protocol("member2", accept(1, b"TX1"));
        assert!(matches!(h.events.try_recv(), Ok(ReplicaEvent::Decided { epoch: 1, .. })));

        // member1 wrote TX1 in epoch 1 but never completed its certificate
        h.propose(b"TX2");
        assert_eq!(h.proposal_of(2), Some(&b"TX2"[..]));
        h.protocol("member1", state(2, Some(b"TX1"), 1));
        h.protocol("member2", state(2, None, 0));
        h.protocol("member1", accept(2, b"TX1"));
        h.protocol("member2", accept(2, b"TX1"));

        match h.events.try_recv() {
            Ok(ReplicaEvent::Decided { epoch, block }) => {
                assert_eq!(epoch, 2);
                assert_eq!(block.transactions[0].data, "TX1");
            }
            other => panic!("expected epoch 2 to decide, got {:?}", other),
        }
        assert_eq!(h.proposal_of(3), Some(&b"TX2"[..]));
        assert!(h.core.proposals.is_empty());
        assert_eq!(h.core.metrics.proposals.get(), 3);
    }

    #[tokio::test]
    async fn test_aborted_proposal_goes_ahead_of_later_ones() {
        let mut h = harness("leader", memory_ledger());
        h.propose(b"TX1");
        h.protocol("member1", state(1, None, 0));
        h.protocol("member2", state(1, None, 0));
        assert_eq!(h.core.epoch_state.value, Some(b"TX1".to_vec()));

        h.propose(b"TX2");
        assert_eq!(h.core.metrics.proposals.get(), 1);

        for member in ["member1", "member2"] {
            h.protocol(member, ConsensusMessage::Abort(Abort { epoch: 1 }));
        }
        assert_eq!(h.events.try_recv().unwrap(), ReplicaEvent::Aborted { epoch: 1 });
        assert_eq!(h.proposal_of(2), Some(&b"TX1"[..]));
        assert_eq!(h.core.proposals, VecDeque::from([b"TX2".to_vec()]));

        // the earlier write is re-imposed, then TX2 gets its own epoch
        h.protocol("member1", state(2, None, 0));
        h.protocol("member2", state(2, None, 0));
        h.protocol("member1", accept(2, b"TX1"));
        h.protocol("member2", accept(2, b"TX1"));
        assert!(matches!(h.events.try_recv(), Ok(ReplicaEvent::Decided { epoch: 2, .. })));
        assert_eq!(h.proposal_of(3), Some(&b"TX2"[..]));
    }

    #[tokio::test]
    async fn test_unpersisted_decision_halts_the_replica() {
        let mut h = harness("leader", Arc::new(FailingLedger));
        h.propose(b"TX1");
        h.protocol("member1", state(1, None, 0));
        h.protocol("member2", state(1, None, 0));
        h.protocol("member1", accept(1, b"TX1"));
        h.protocol("member2", accept(1, b"TX1"));

        assert_eq!(h.events.try_recv().unwrap(), ReplicaEvent::Halted { epoch: 1 });
        assert!(h.events.try_recv().is_err());
        assert!(h.core.is_halted());
        assert_eq!(h.core.chain.read().len(), 1);
        assert_eq!(h.core.metrics.decisions.get(), 0);

        // nothing new starts
        h.propose(b"TX2");
        h.protocol("member1", ConsensusMessage::Read(Read { epoch: 2 }));
        assert_eq!(h.core.metrics.proposals.get(), 1);
        assert!(!h.core.epochs.contains_key(&2));
    }

    #[tokio::test]
    async fn test_member_defers_next_epoch_while_accepting() {
        let mut h = harness("member1", memory_ledger());
        h.protocol("leader", ConsensusMessage::Read(Read { epoch: 1 }));
        h.protocol(
            "leader",
            ConsensusMessage::Write(Write {
                epoch: 1,
                value: b"TX1".to_vec(),
            }),
        );
        assert!(h.core.is_working());

        h.protocol("leader", ConsensusMessage::Read(Read { epoch: 2 }));
        assert_eq!(h.core.metrics.messages_deferred.get(), 1);
        assert!(!h.core.epochs.contains_key(&2));
        assert_eq!(h.core.epoch_state.epoch, 1);
        assert_eq!(h.core.links[&ReplicaId::from("leader")].len(), 1);

        // once epoch 1 decides the READ goes through
        h.protocol("leader", accept(1, b"TX1"));
        h.protocol("member2", accept(1, b"TX1"));
        assert!(matches!(h.events.try_recv(), Ok(ReplicaEvent::Decided { epoch: 1, .. })));
        h.core.drain_pass();
        assert!(h.core.epochs.contains_key(&2));
        assert_eq!(h.core.epoch_state.epoch, 2);
    }

    #[tokio::test]
    async fn test_client_proposal_waits_for_running_epoch() {
        let mut h = harness("leader", memory_ledger());
        h.propose(b"TX1");

        h.deliver("client1", Message::new(Command::AppendBlockchain, b"TX2".to_vec()));
        assert_eq!(h.core.metrics.messages_deferred.get(), 1);
        assert!(h.core.proposals.is_empty());
        assert_eq!(h.core.metrics.proposals.get(), 1);
        assert_eq!(h.core.links[&ReplicaId::from("client1")].len(), 1);

        h.protocol("member1", state(1, None, 0));
        h.protocol("member2", state(1, None, 0));
        h.protocol("member1", accept(1, b"TX1"));
        h.protocol("member2", accept(1, b"TX1"));
        h.core.drain_pass();

        assert_eq!(h.proposal_of(2), Some(&b"TX2"[..]));
        assert_eq!(h.core.metrics.proposals.get(), 2);
    }
}
