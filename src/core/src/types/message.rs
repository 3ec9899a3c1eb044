//! Application-level message and its command vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed command vocabulary carried by every [`Message`].
///
/// On the wire a command is its case-sensitive string name. Strings outside the
/// vocabulary decode to [`Command::Unknown`] so that a hostile peer cannot make
/// decoding fail; the dispatcher logs and drops them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Command {
    Read,
    State,
    Collected,
    Write,
    Accept,
    Decide,
    Abort,
    GetBalance,
    Balance,
    KeyExchange,
    AppendBlockchain,
    GetBlockchain,
    Blockchain,
    Broadcast,
    LeaderBroadcast,
    Unknown(String),
}

impl Command {
    /// Wire name of the command
    pub fn as_str(&self) -> &str {
        match self {
            Command::Read => "READ",
            Command::State => "STATE",
            Command::Collected => "COLLECTED",
            Command::Write => "WRITE",
            Command::Accept => "ACCEPT",
            Command::Decide => "DECIDE",
            Command::Abort => "ABORT",
            Command::GetBalance => "GET_BALANCE",
            Command::Balance => "BALANCE",
            Command::KeyExchange => "KEY_EXCHANGE",
            Command::AppendBlockchain => "APPEND_BLOCKCHAIN",
            Command::GetBlockchain => "GET_BLOCKCHAIN",
            Command::Blockchain => "BLOCKCHAIN",
            Command::Broadcast => "BROADCAST",
            Command::LeaderBroadcast => "LEADER_BROADCAST",
            Command::Unknown(raw) => raw,
        }
    }

    /// Parse a wire name; never fails
    pub fn parse(raw: &str) -> Self {
        match raw {
            "READ" => Command::Read,
            "STATE" => Command::State,
            "COLLECTED" => Command::Collected,
            "WRITE" => Command::Write,
            "ACCEPT" => Command::Accept,
            "DECIDE" => Command::Decide,
            "ABORT" => Command::Abort,
            "GET_BALANCE" => Command::GetBalance,
            "BALANCE" => Command::Balance,
            "KEY_EXCHANGE" => Command::KeyExchange,
            "APPEND_BLOCKCHAIN" => Command::AppendBlockchain,
            "GET_BLOCKCHAIN" => Command::GetBlockchain,
            "BLOCKCHAIN" => Command::Blockchain,
            "BROADCAST" => Command::Broadcast,
            "LEADER_BROADCAST" => Command::LeaderBroadcast,
            other => Command::Unknown(other.to_string()),
        }
    }

    /// Commands that start a new epoch. While a replica is working on an
    /// epoch these are re-queued instead of processed.
    pub fn is_deferrable(&self) -> bool {
        matches!(self, Command::Read | Command::AppendBlockchain)
    }

    /// Commands that belong to the epoch consensus protocol
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Command::Read
                | Command::State
                | Command::Collected
                | Command::Write
                | Command::Accept
                | Command::Decide
                | Command::Abort
        )
    }
}

impl From<String> for Command {
    fn from(raw: String) -> Self {
        Command::parse(&raw)
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        command.as_str().to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response unit exchanged over an authenticated link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Command selecting the handler
    pub command: Command,
    /// Opaque command payload
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a new message
    pub fn new(command: Command, payload: impl Into<Vec<u8>>) -> Self {
        Message {
            command,
            payload: payload.into(),
        }
    }

    /// Create a message with a UTF-8 text payload
    pub fn text(command: Command, payload: &str) -> Self {
        Self::new(command, payload.as_bytes().to_vec())
    }

    /// Payload as UTF-8 text, if it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
