//! In-memory processes driven by test code.
//!
//! [`ScriptedSpawner`] hands out handles that record every call into a shared
//! [`ScriptLog`]. By default written input is echoed straight back as output,
//! and a kill is answered with an exit event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use termdeck_protocol::SessionId;
use tokio::sync::mpsc;

use crate::error::PtyError;
use crate::process::{ProcessEvent, ProcessHandle, ProcessSpawner, SpawnRequest};

/// Everything the scripted processes have been asked to do.
#[derive(Clone, Debug, Default)]
pub struct ScriptLog {
    pub spawned: Vec<SpawnRequest>,
    pub writes: Vec<(SessionId, Vec<u8>)>,
    pub resizes: Vec<(SessionId, u16, u16)>,
    pub kills: Vec<SessionId>,
}

#[derive(Default)]
struct Shared {
    log: ScriptLog,
    senders: HashMap<SessionId, mpsc::Sender<ProcessEvent>>,
    next_pid: u32,
}

#[derive(Clone, Copy, Debug)]
struct Behavior {
    fail_spawn: bool,
    fail_kill: bool,
    ignore_kill: bool,
    echo: bool,
}

#[derive(Clone)]
pub struct ScriptedSpawner {
    shared: Arc<Mutex<Shared>>,
    behavior: Behavior,
}

impl Default for ScriptedSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                next_pid: 4000,
                ..Default::default()
            })),
            behavior: Behavior {
                fail_spawn: false,
                fail_kill: false,
                ignore_kill: false,
                echo: true,
            },
        }
    }

    /// Every spawn attempt fails with [`PtyError::CreateFailed`].
    pub fn fail_spawn(mut self, fail: bool) -> Self {
        self.behavior.fail_spawn = fail;
        self
    }

    /// Every kill fails with [`PtyError::KillFailed`].
    pub fn fail_kill(mut self, fail: bool) -> Self {
        self.behavior.fail_kill = fail;
        self
    }

    /// Kills succeed but no exit event follows.
    pub fn ignore_kill(mut self, ignore: bool) -> Self {
        self.behavior.ignore_kill = ignore;
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.behavior.echo = echo;
        self
    }

    /// Snapshot of the calls recorded so far.
    pub fn log(&self) -> ScriptLog {
        lock(&self.shared).log.clone()
    }

    /// Ids of every process spawned so far, in order.
    pub fn spawned_ids(&self) -> Vec<SessionId> {
        lock(&self.shared)
            .log
            .spawned
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    /// Make process `id` print `data`. Returns false if it is unknown or gone.
    pub fn emit_output(&self, id: &SessionId, data: impl Into<Vec<u8>>) -> bool {
        send(
            &self.shared,
            ProcessEvent::Output {
                id: id.clone(),
                data: data.into(),
            },
        )
    }

    /// Make process `id` exit on its own.
    pub fn emit_exit(&self, id: &SessionId, exit_code: Option<u32>) -> bool {
        let sent = send(
            &self.shared,
            ProcessEvent::Exited {
                id: id.clone(),
                exit_code,
            },
        );
        lock(&self.shared).senders.remove(id);
        sent
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|p| p.into_inner())
}

fn send(shared: &Mutex<Shared>, event: ProcessEvent) -> bool {
    let sender = lock(shared).senders.get(event.id()).cloned();
    match sender {
        Some(tx) => tx.try_send(event).is_ok(),
        None => false,
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn(
        &self,
        request: SpawnRequest,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<Box<dyn ProcessHandle>, PtyError> {
        if self.behavior.fail_spawn {
            return Err(PtyError::CreateFailed("scripted spawn failure".to_string()));
        }

        let mut shared = lock(&self.shared);
        let pid = shared.next_pid;
        shared.next_pid += 1;
        shared.senders.insert(request.id.clone(), events);
        shared.log.spawned.push(request.clone());
        drop(shared);

        Ok(Box::new(ScriptedProcess {
            id: request.id,
            pid,
            shared: Arc::clone(&self.shared),
            behavior: self.behavior,
            killed: false,
        }))
    }
}

struct ScriptedProcess {
    id: SessionId,
    pid: u32,
    shared: Arc<Mutex<Shared>>,
    behavior: Behavior,
    killed: bool,
}

impl ProcessHandle for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        if self.killed {
            return Err(PtyError::ProcessExited);
        }
        lock(&self.shared)
            .log
            .writes
            .push((self.id.clone(), data.to_vec()));
        if self.behavior.echo {
            send(
                &self.shared,
                ProcessEvent::Output {
                    id: self.id.clone(),
                    data: data.to_vec(),
                },
            );
        }
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        lock(&self.shared)
            .log
            .resizes
            .push((self.id.clone(), cols, rows));
        Ok(())
    }

    fn kill(&mut self) -> Result<(), PtyError> {
        lock(&self.shared).log.kills.push(self.id.clone());
        if self.behavior.fail_kill {
            return Err(PtyError::KillFailed("scripted kill failure".to_string()));
        }
        self.killed = true;
        if !self.behavior.ignore_kill {
            send(
                &self.shared,
                ProcessEvent::Exited {
                    id: self.id.clone(),
                    exit_code: None,
                },
            );
            lock(&self.shared).senders.remove(&self.id);
        }
        Ok(())
    }
}
