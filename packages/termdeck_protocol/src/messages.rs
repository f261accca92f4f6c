use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;

/// Opaque identifier of a live shell session.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One terminal as seen by clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub cols: u16,
    pub rows: u16,
}

/// The current set of sessions, in creation order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub terminals: Vec<TerminalInfo>,
}

impl Scene {
    pub fn contains(&self, id: &SessionId) -> bool {
        self.terminals.iter().any(|t| &t.id == id)
    }
}

/// Messages sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Ask for the current scene (answered to the sender only)
    GiveScene,
    /// Spawn a new shell session
    Create,
    /// Keystrokes for a session
    Input { id: SessionId, data: String },
    /// Terminal dimensions changed on the client. Values are clamped to at
    /// least 1 by the server, so out-of-range input is accepted here.
    Resize { id: SessionId, cols: i64, rows: i64 },
    /// Terminate a session's process
    Close { id: SessionId },
    /// Ask for a viewport-sized slice ending `lines_back` lines before the live end
    RequestHistory {
        id: SessionId,
        #[serde(rename = "linesBack")]
        lines_back: usize,
    },
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::GiveScene => "giveScene",
            ClientMessage::Create => "create",
            ClientMessage::Input { .. } => "input",
            ClientMessage::Resize { .. } => "resize",
            ClientMessage::Close { .. } => "close",
            ClientMessage::RequestHistory { .. } => "requestHistory",
        }
    }
}

/// Messages sent FROM the server TO the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Scene { data: Scene },
    /// Live output, fanned out to every attached client
    Output { id: SessionId, data: String },
    /// A history slice for the requesting client. `lines_back` is the offset
    /// the server actually used, which may be smaller than requested.
    HistoryChunk {
        id: SessionId,
        data: String,
        #[serde(rename = "linesBack")]
        lines_back: usize,
    },
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}
