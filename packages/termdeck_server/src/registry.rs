use std::collections::HashMap;

use termdeck_protocol::{Scene, SessionId, TerminalInfo};
use termdeck_pty::{ProcessEvent, ProcessHandle, ProcessSpawner, PtyError, SpawnRequest};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::decoder::Utf8StreamDecoder;
use crate::scrollback::ScrollbackBuffer;

/// Size and history settings applied to new sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionDefaults {
    pub cols: u16,
    pub rows: u16,
    pub scrollback_lines: usize,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            scrollback_lines: 5000,
        }
    }
}

/// One live shell.
pub struct Session {
    pub id: SessionId,
    pub name: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub buffer: ScrollbackBuffer,
    process: Box<dyn ProcessHandle>,
    decoder: Utf8StreamDecoder,
    seq: u64,
}

impl Session {
    pub fn info(&self) -> TerminalInfo {
        TerminalInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            cols: self.cols,
            rows: self.rows,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.process.write(data)
    }

    /// Decode a raw chunk, append it to the scrollback and return the text.
    pub fn ingest_output(&mut self, bytes: &[u8]) -> String {
        let text = self.decoder.decode(bytes);
        self.buffer.ingest(&text);
        text
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("lines", &self.buffer.len())
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    Unchanged,
    Resized,
    UnknownSession,
}

#[derive(Debug)]
pub enum CloseOutcome {
    /// Termination requested; the exit event removes the session later.
    Requested,
    UnknownSession,
    /// The kill request failed, so the session was dropped on the spot.
    ForceRemoved(PtyError),
}

/// The set of live sessions. Owned by a single task and passed explicitly.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    next_seq: u64,
    defaults: SessionDefaults,
}

impl SessionRegistry {
    pub fn new(defaults: SessionDefaults) -> Self {
        Self {
            sessions: HashMap::new(),
            next_seq: 0,
            defaults,
        }
    }

    /// Spawn a shell at the default size. Nothing is registered on failure.
    pub fn create(
        &mut self,
        spawner: &dyn ProcessSpawner,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<SessionId, PtyError> {
        let id = SessionId::generate();
        let request = SpawnRequest {
            id: id.clone(),
            cols: self.defaults.cols.max(1),
            rows: self.defaults.rows.max(1),
        };
        let process = spawner.spawn(request.clone(), events)?;

        self.next_seq += 1;
        let seq = self.next_seq;
        let name = match process.pid() {
            Some(pid) => format!("Terminal {pid}"),
            None => format!("Terminal {seq}"),
        };
        info!(session = %id, pid = ?process.pid(), "Created {}", name);

        self.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                name: Some(name),
                cols: request.cols,
                rows: request.rows,
                buffer: ScrollbackBuffer::new(self.defaults.scrollback_lines),
                process,
                decoder: Utf8StreamDecoder::new(),
                seq,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        let removed = self.sessions.remove(id);
        if removed.is_some() {
            debug!(session = %id, "Removed session");
        }
        removed
    }

    /// Dimensions are clamped to at least 1. Stored dimensions only change
    /// once the process has accepted them.
    pub fn resize(&mut self, id: &SessionId, cols: i64, rows: i64) -> Result<ResizeOutcome, PtyError> {
        let Some(session) = self.sessions.get_mut(id) else {
            return Ok(ResizeOutcome::UnknownSession);
        };
        let cols = clamp_dimension(cols);
        let rows = clamp_dimension(rows);
        if session.cols == cols && session.rows == rows {
            return Ok(ResizeOutcome::Unchanged);
        }

        session.process.resize(cols, rows)?;
        session.cols = cols;
        session.rows = rows;
        debug!(session = %id, cols, rows, "Resized");
        Ok(ResizeOutcome::Resized)
    }

    pub fn close(&mut self, id: &SessionId) -> CloseOutcome {
        let Some(session) = self.sessions.get_mut(id) else {
            return CloseOutcome::UnknownSession;
        };
        match session.process.kill() {
            Ok(()) => CloseOutcome::Requested,
            Err(e) => {
                warn!(session = %id, "Kill failed, dropping session: {}", e);
                self.sessions.remove(id);
                CloseOutcome::ForceRemoved(e)
            }
        }
    }

    /// Ids in creation order.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions.into_iter().map(|s| s.id.clone()).collect()
    }

    pub fn scene(&self) -> Scene {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.seq);
        Scene {
            terminals: sessions.into_iter().map(Session::info).collect(),
        }
    }
}

fn clamp_dimension(value: i64) -> u16 {
    value.clamp(1, u16::MAX as i64) as u16
}
