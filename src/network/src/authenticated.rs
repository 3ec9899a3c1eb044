//! Authenticated perfect link.
//!
//! Wraps a [`StubbornLink`] and delivers each distinct message exactly once:
//! messages are sealed for the peer, tagged, de-duplicated by id and queued
//! in a FIFO inbox that the replica drains.
//!
//! Only the most recent [`SEEN_CAPACITY`] ids are remembered per link. A
//! retransmission always arrives long before its id is evicted; a replay of
//! an older message is delivered again.

use crate::config::LinkConfig;
use crate::error::{NetworkError, Result};
use crate::stubborn::{Listener, StubbornLink};
use crate::transport::DatagramEndpoint;
use depchain_core::{Command, Message, ReplicaId};
use depchain_crypto::{open, seal, IntegrityTag, IntegrityTagger, ReplicaKeyPair, SealedEnvelope};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Ids remembered per link for de-duplication
pub const SEEN_CAPACITY: usize = 65_536;

/// Delivered ids, oldest evicted first
#[derive(Debug)]
struct SeenIds {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    /// False if `id` was already there
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Wire form of a message on an authenticated link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedMessage {
    /// Fresh per send; every retransmission carries the same id
    pub id: Uuid,
    /// Claimed sender
    pub sender: ReplicaId,
    /// `(command, payload)` sealed for the recipient
    pub sealed: SealedEnvelope,
    /// Integrity tag over `(id, sender, sealed)`
    pub tag: IntegrityTag,
}

impl AuthenticatedMessage {
    /// Encode with bincode
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode with bincode
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Outcome of handling one received wire message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Appended to the inbox
    Accepted,
    /// Id already accepted on this link
    Duplicate,
    /// Not an authenticated message, or from someone other than the peer
    Malformed,
    /// Integrity tag mismatch
    Forged,
    /// Envelope could not be opened
    Undecryptable,
}

/// Receive side of a link: validation, de-duplication and the inbox
struct LinkInbox {
    local: ReplicaId,
    peer: ReplicaId,
    keys: Arc<ReplicaKeyPair>,
    tagger: IntegrityTagger,
    seen: Mutex<SeenIds>,
    queue: Mutex<VecDeque<Message>>,
    notify: Arc<Notify>,
}

impl LinkInbox {
    fn on_message_received(&self, raw: &[u8]) -> Delivery {
        let wire = match AuthenticatedMessage::decode(raw) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Dropping undecodable message");
                return Delivery::Malformed;
            }
        };

        if wire.sender != self.peer {
            warn!(
                peer = %self.peer,
                claimed = %wire.sender,
                message_id = %wire.id,
                "Dropping message claiming a different sender"
            );
            return Delivery::Malformed;
        }

        if self.seen.lock().contains(&wire.id) {
            trace!(peer = %self.peer, message_id = %wire.id, "Duplicate message discarded");
            return Delivery::Duplicate;
        }

        let sealed_bytes = match bincode::serialize(&wire.sealed) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Dropping unencodable envelope");
                return Delivery::Malformed;
            }
        };
        if self
            .tagger
            .verify(wire.id.as_bytes(), wire.sender.as_str(), &sealed_bytes, &wire.tag)
            .is_err()
        {
            warn!(peer = %self.peer, message_id = %wire.id, "Integrity check failed");
            return Delivery::Forged;
        }

        let message = match open(&self.keys, &wire.sealed)
            .map_err(NetworkError::from)
            .and_then(|plain| decode_plaintext(&plain))
        {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %self.peer, message_id = %wire.id, error = %e, "Failed to open message");
                return Delivery::Undecryptable;
            }
        };

        // The id check and the insert must not interleave with another delivery
        // of the same id, so re-check under the lock.
        if !self.seen.lock().insert(wire.id) {
            return Delivery::Duplicate;
        }

        debug!(
            local = %self.local,
            peer = %self.peer,
            command = %message.command,
            message_id = %wire.id,
            "Message delivered"
        );
        self.queue.lock().push_back(message);
        self.notify.notify_one();
        Delivery::Accepted
    }
}

fn encode_plaintext(message: &Message) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&(message.command.as_str(), &message.payload))?)
}

fn decode_plaintext(plain: &[u8]) -> Result<Message> {
    let (command, payload): (String, Vec<u8>) = bincode::deserialize(plain)?;
    Ok(Message::new(Command::parse(&command), payload))
}

/// Exactly-once, integrity-checked, confidential link to one peer
pub struct AuthenticatedLink {
    local: ReplicaId,
    peer: ReplicaId,
    peer_public: [u8; 32],
    tagger: IntegrityTagger,
    inbox: Arc<LinkInbox>,
    stubborn: StubbornLink,
}

impl AuthenticatedLink {
    /// Open a link from `local` to `peer` over `endpoint`.
    ///
    /// `notify` is signalled whenever a message lands in the inbox; replicas
    /// share one `Notify` across all their links.
    pub fn connect(
        local: ReplicaId,
        keys: Arc<ReplicaKeyPair>,
        peer: ReplicaId,
        peer_public: [u8; 32],
        endpoint: Arc<dyn DatagramEndpoint>,
        config: &LinkConfig,
        notify: Arc<Notify>,
    ) -> Result<Self> {
        let tagger = IntegrityTagger::new(config.tag_scheme, &keys, &peer_public)?;
        let inbox = Arc::new(LinkInbox {
            local: local.clone(),
            peer: peer.clone(),
            keys,
            tagger: tagger.clone(),
            seen: Mutex::new(SeenIds::new(SEEN_CAPACITY)),
            queue: Mutex::new(VecDeque::new()),
            notify,
        });

        let receiver = inbox.clone();
        let listener: Listener = Arc::new(move |raw: Vec<u8>| {
            receiver.on_message_received(&raw);
        });
        let stubborn = StubbornLink::spawn(endpoint, config, listener);

        debug!(local = %local, peer = %peer, scheme = ?config.tag_scheme, "Authenticated link open");
        Ok(Self {
            local,
            peer,
            peer_public,
            tagger,
            inbox,
            stubborn,
        })
    }

    /// Remote end of this link
    pub fn peer(&self) -> &ReplicaId {
        &self.peer
    }

    /// Seal and tag `message` for the peer without sending it
    pub fn seal_message(&self, message: &Message) -> Result<AuthenticatedMessage> {
        let sealed = seal(&self.peer_public, &encode_plaintext(message)?)?;
        let id = Uuid::new_v4();
        let sealed_bytes = bincode::serialize(&sealed)?;
        let tag = self
            .tagger
            .tag(id.as_bytes(), self.local.as_str(), &sealed_bytes);
        Ok(AuthenticatedMessage {
            id,
            sender: self.local.clone(),
            sealed,
            tag,
        })
    }

    /// Send `message` to the peer; retransmitted until acknowledged
    pub fn send_message(&self, message: &Message) -> Result<Uuid> {
        let wire = self.seal_message(message)?;
        self.stubborn.send(wire.encode()?)?;
        trace!(peer = %self.peer, command = %message.command, message_id = %wire.id, "Message sent");
        Ok(wire.id)
    }

    /// Validate one raw wire message and queue it if it is new and authentic
    pub fn on_message_received(&self, raw: &[u8]) -> Delivery {
        self.inbox.on_message_received(raw)
    }

    /// Take every queued message, oldest first
    pub fn drain(&self) -> Vec<Message> {
        self.inbox.queue.lock().drain(..).collect()
    }

    /// Snapshot of the queued messages without removing them
    pub fn received_messages(&self) -> Vec<Message> {
        self.inbox.queue.lock().iter().cloned().collect()
    }

    /// Take the oldest queued message
    pub fn pop(&self) -> Option<Message> {
        self.inbox.queue.lock().pop_front()
    }

    /// Put a message back at the end of the inbox
    pub fn requeue(&self, message: Message) {
        self.inbox.queue.lock().push_back(message);
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.inbox.queue.lock().len()
    }

    /// Whether the inbox is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames still awaiting acknowledgement
    pub fn unacknowledged(&self) -> usize {
        self.stubborn.pending_len()
    }
}
