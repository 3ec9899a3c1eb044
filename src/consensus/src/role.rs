//! Leader and member behaviour of a replica.
//!
//! Both roles share the protocol dispatch: every replica validates and reacts
//! to protocol traffic the same way. The leader additionally accepts client
//! proposals, drives epochs and reports its inbox depth.

use crate::error::Result;
use crate::message::ConsensusMessage;
use crate::replica::ReplicaCore;
use depchain_core::{Block, Command, EpochNumber, Message, ReplicaId, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Outcome of dispatching one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Handled, answered or dropped
    Processed,
    /// Must go back to the end of the sender's inbox
    Deferred(Message),
}

/// Reply to `GET_BALANCE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReply {
    pub account: String,
    pub balance: Option<u64>,
}

/// Behaviour a replica delegates to its current role
pub trait ReplicaRole {
    /// Called once when the role takes effect
    fn start(&self, core: &mut ReplicaCore);

    /// Route a message from another replica
    fn process_message(&self, core: &mut ReplicaCore, sender: &ReplicaId, message: Message)
        -> Dispatch;

    /// Route a message from a client
    fn process_client_command(
        &self,
        core: &mut ReplicaCore,
        sender: &ReplicaId,
        message: Message,
    ) -> Dispatch;

    /// Queue a value for agreement
    fn propose_value(&self, core: &mut ReplicaCore, value: Value);

    /// An epoch decided `value`
    fn decided(&self, core: &mut ReplicaCore, epoch: EpochNumber, value: Value);

    /// An epoch aborted
    fn aborted(&self, core: &mut ReplicaCore, epoch: EpochNumber);

    /// Commit a decided block to the ledger; the chain grows only once the
    /// ledger has it
    fn save_block(&self, core: &mut ReplicaCore, epoch: EpochNumber, block: Block) -> Result<()>;
}

/// Role of a replica; swapped at runtime with `Replica::change_role`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Member,
}

impl Role {
    /// Role of `local` under `leader`
    pub fn of(local: &ReplicaId, leader: &ReplicaId) -> Self {
        if local == leader {
            Role::Leader
        } else {
            Role::Member
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }

    fn handle_balance_query(&self, core: &mut ReplicaCore, sender: &ReplicaId, message: &Message) {
        let account = match message.payload_str() {
            Some(account) => account.trim().to_string(),
            None => {
                warn!(sender = %sender, "GET_BALANCE with non-UTF-8 account");
                core.metrics.messages_dropped.inc();
                return;
            }
        };
        let reply = BalanceReply {
            balance: core.ledger.balance(&account),
            account,
        };
        debug!(sender = %sender, account = %reply.account, balance = ?reply.balance, "Answering balance query");
        match serde_json::to_vec(&reply) {
            Ok(payload) => core.reply(sender, Message::new(Command::Balance, payload)),
            Err(e) => warn!(error = %e, "Failed to encode balance reply"),
        }
    }

    fn handle_blockchain_query(&self, core: &mut ReplicaCore, sender: &ReplicaId) {
        let chain = core.chain.read().clone();
        match serde_json::to_vec(&chain) {
            Ok(payload) => core.reply(sender, Message::new(Command::Blockchain, payload)),
            Err(e) => warn!(error = %e, "Failed to encode blockchain reply"),
        }
    }

    fn handle_protocol(&self, core: &mut ReplicaCore, sender: &ReplicaId, message: Message) -> Dispatch {
        let decoded = match ConsensusMessage::from_message(&message) {
            Ok(decoded) => decoded,
            Err(e) => {
                core.reject(sender, &message.command, e);
                return Dispatch::Processed;
            }
        };
        if core.defers(&decoded) {
            return Dispatch::Deferred(message);
        }
        core.handle_protocol(sender, decoded);
        Dispatch::Processed
    }
}

impl ReplicaRole for Role {
    fn start(&self, core: &mut ReplicaCore) {
        info!(replica = %core.local, role = ?self, epoch = core.epoch_state.epoch, "Role started");
        match self {
            Role::Leader => {
                core.spawn_status_loop();
                core.start_next_proposal();
            }
            Role::Member => core.stop_status_loop(),
        }
    }

    fn process_message(
        &self,
        core: &mut ReplicaCore,
        sender: &ReplicaId,
        message: Message,
    ) -> Dispatch {
        core.metrics.messages_handled.inc();
        match message.command {
            Command::Read
            | Command::State
            | Command::Collected
            | Command::Write
            | Command::Accept
            | Command::Decide
            | Command::Abort => self.handle_protocol(core, sender, message),
            Command::GetBalance => {
                self.handle_balance_query(core, sender, &message);
                Dispatch::Processed
            }
            Command::LeaderBroadcast if sender == core.membership.leader() => {
                info!(
                    sender = %sender,
                    text = message.payload_str().unwrap_or("<binary>"),
                    "Leader broadcast"
                );
                Dispatch::Processed
            }
            _ => {
                warn!(sender = %sender, command = %message.command, "Dropping unexpected command");
                core.metrics.messages_dropped.inc();
                Dispatch::Processed
            }
        }
    }

    fn process_client_command(
        &self,
        core: &mut ReplicaCore,
        sender: &ReplicaId,
        message: Message,
    ) -> Dispatch {
        core.metrics.messages_handled.inc();
        match (self, &message.command) {
            (_, Command::GetBalance) => {
                self.handle_balance_query(core, sender, &message);
                Dispatch::Processed
            }
            (Role::Leader, Command::AppendBlockchain) => {
                if core.is_working() {
                    return Dispatch::Deferred(message);
                }
                info!(client = %sender, "Client proposal received");
                self.propose_value(core, message.payload);
                Dispatch::Processed
            }
            (Role::Leader, Command::GetBlockchain) => {
                self.handle_blockchain_query(core, sender);
                Dispatch::Processed
            }
            (Role::Leader, Command::Broadcast) => {
                info!(client = %sender, "Relaying client broadcast to members");
                core.broadcast(&Message::new(Command::LeaderBroadcast, message.payload));
                Dispatch::Processed
            }
            _ => {
                warn!(
                    client = %sender,
                    role = ?self,
                    command = %message.command,
                    "Dropping client command"
                );
                core.metrics.messages_dropped.inc();
                Dispatch::Processed
            }
        }
    }

    fn propose_value(&self, core: &mut ReplicaCore, value: Value) {
        match self {
            Role::Leader => {
                core.proposals.push_back(value);
                core.start_next_proposal();
            }
            Role::Member => {
                warn!(replica = %core.local, "Only the leader proposes; value dropped");
                core.metrics.messages_dropped.inc();
            }
        }
    }

    fn decided(&self, core: &mut ReplicaCore, epoch: EpochNumber, value: Value) {
        let previous_hash = core
            .chain
            .read()
            .last()
            .map(|block| block.hash.clone())
            .unwrap_or_else(Block::zero_hash);
        let block = Block::from_value(previous_hash, &value);
        info!(
            epoch,
            block_hash = %block.hash,
            transactions = block.transactions.len(),
            "Epoch decided"
        );
        if let Err(e) = self.save_block(core, epoch, block) {
            core.halt(epoch, &e);
            return;
        }
        core.requeue_proposal(epoch, Some(&value));
        core.finish_epoch(epoch);
        if self.is_leader() {
            core.start_next_proposal();
        }
    }

    fn aborted(&self, core: &mut ReplicaCore, epoch: EpochNumber) {
        warn!(epoch, role = ?self, "Epoch aborted");
        core.metrics.aborts.inc();
        core.emit_aborted(epoch);
        core.requeue_proposal(epoch, None);
        core.finish_epoch(epoch);
        if self.is_leader() {
            core.start_next_proposal();
        }
    }

    fn save_block(&self, core: &mut ReplicaCore, epoch: EpochNumber, block: Block) -> Result<()> {
        core.ledger.append_block(&block)?;
        core.chain.write().push(block.clone());
        core.metrics.decisions.inc();
        core.emit_decided(epoch, block);
        Ok(())
    }
}
