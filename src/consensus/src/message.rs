//! Consensus message types for the epoch protocol
//!
//! Protocol messages travel as application [`Message`]s whose payload is the
//! JSON encoding of one of the structs below.

use crate::error::{ConsensusError, Result};
use depchain_core::{Command, EpochNumber, Message, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Main consensus message enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    Read(Read),
    State(State),
    Write(Write),
    Accept(Accept),
    Decide(Decide),
    Abort(Abort),
}

/// Leader asks every replica for its state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Read {
    pub epoch: EpochNumber,
}

/// Reply to READ: the last written value and when it was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub epoch: EpochNumber,
    pub value: Option<Value>,
    pub last_write_epoch: EpochNumber,
}

/// Leader imposes the selected value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    pub epoch: EpochNumber,
    pub value: Value,
}

/// A replica wrote the value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accept {
    pub epoch: EpochNumber,
    pub value: Value,
}

/// Leader observed an ACCEPT certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decide {
    pub epoch: EpochNumber,
    pub value: Value,
}

/// A replica gave up on the epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abort {
    pub epoch: EpochNumber,
}

fn decode<T: DeserializeOwned>(message: &Message) -> Result<T> {
    serde_json::from_slice(&message.payload).map_err(|e| ConsensusError::Malformed {
        command: message.command.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(command: Command, payload: &T) -> Result<Message> {
    Ok(Message::new(command, serde_json::to_vec(payload)?))
}

impl ConsensusMessage {
    /// Epoch the message belongs to
    pub fn epoch(&self) -> EpochNumber {
        match self {
            ConsensusMessage::Read(m) => m.epoch,
            ConsensusMessage::State(m) => m.epoch,
            ConsensusMessage::Write(m) => m.epoch,
            ConsensusMessage::Accept(m) => m.epoch,
            ConsensusMessage::Decide(m) => m.epoch,
            ConsensusMessage::Abort(m) => m.epoch,
        }
    }

    /// Command carrying this message on the wire
    pub fn command(&self) -> Command {
        match self {
            ConsensusMessage::Read(_) => Command::Read,
            ConsensusMessage::State(_) => Command::State,
            ConsensusMessage::Write(_) => Command::Write,
            ConsensusMessage::Accept(_) => Command::Accept,
            ConsensusMessage::Decide(_) => Command::Decide,
            ConsensusMessage::Abort(_) => Command::Abort,
        }
    }

    /// Encode as an application message
    pub fn to_message(&self) -> Result<Message> {
        let command = self.command();
        match self {
            ConsensusMessage::Read(m) => encode(command, m),
            ConsensusMessage::State(m) => encode(command, m),
            ConsensusMessage::Write(m) => encode(command, m),
            ConsensusMessage::Accept(m) => encode(command, m),
            ConsensusMessage::Decide(m) => encode(command, m),
            ConsensusMessage::Abort(m) => encode(command, m),
        }
    }

    /// Decode an application message. `STATE` and `COLLECTED` both carry a state reply.
    pub fn from_message(message: &Message) -> Result<Self> {
        match &message.command {
            Command::Read => Ok(ConsensusMessage::Read(decode(message)?)),
            Command::State | Command::Collected => Ok(ConsensusMessage::State(decode(message)?)),
            Command::Write => Ok(ConsensusMessage::Write(decode(message)?)),
            Command::Accept => Ok(ConsensusMessage::Accept(decode(message)?)),
            Command::Decide => Ok(ConsensusMessage::Decide(decode(message)?)),
            Command::Abort => Ok(ConsensusMessage::Abort(decode(message)?)),
            other => Err(ConsensusError::Malformed {
                command: other.to_string(),
                reason: "not a consensus command".to_string(),
            }),
        }
    }
}
