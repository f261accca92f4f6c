use termdeck_protocol::SessionId;
use tokio::sync::mpsc;

use crate::error::PtyError;

/// Events emitted by spawned processes.
///
/// Events from one process arrive in order, and its `Exited` event is always
/// the last one sent for that id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    Output { id: SessionId, data: Vec<u8> },
    Exited { id: SessionId, exit_code: Option<u32> },
}

impl ProcessEvent {
    pub fn id(&self) -> &SessionId {
        match self {
            ProcessEvent::Output { id, .. } | ProcessEvent::Exited { id, .. } => id,
        }
    }
}

/// What to start and how big its terminal is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Tag attached to every event the process emits
    pub id: SessionId,
    pub cols: u16,
    pub rows: u16,
}

/// Starts shell processes.
pub trait ProcessSpawner: Send {
    /// Start a process. Output and the exit notification are delivered on
    /// `events`, tagged with `request.id`.
    fn spawn(
        &self,
        request: SpawnRequest,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<Box<dyn ProcessHandle>, PtyError>;
}

/// A live process owned by exactly one session.
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    fn write(&mut self, data: &[u8]) -> Result<(), PtyError>;

    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError>;

    /// Request termination. The matching `Exited` event arrives later.
    fn kill(&mut self) -> Result<(), PtyError>;
}
