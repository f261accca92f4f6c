use std::collections::HashMap;
use std::fmt;

use termdeck_protocol::{ClientMessage, ServerMessage, SessionId};
use termdeck_pty::{ProcessEvent, ProcessSpawner};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::registry::{CloseOutcome, ResizeOutcome, SessionRegistry};

/// Identifies one attached websocket connection.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Dispatches client messages and process events against the registry and
/// fans results out to attached clients.
pub struct MessageRouter {
    registry: SessionRegistry,
    spawner: Box<dyn ProcessSpawner>,
    process_tx: mpsc::Sender<ProcessEvent>,
    clients: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
}

impl MessageRouter {
    pub fn new(
        registry: SessionRegistry,
        spawner: Box<dyn ProcessSpawner>,
        process_tx: mpsc::Sender<ProcessEvent>,
    ) -> Self {
        Self {
            registry,
            spawner,
            process_tx,
            clients: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Subscribe a client and send it the current scene.
    pub fn attach(&mut self, conn: ConnectionId, tx: mpsc::Sender<ServerMessage>) {
        info!(conn = %conn, "Client attached");
        self.clients.insert(conn, tx);
        let scene = self.registry.scene();
        self.send_to(conn, ServerMessage::Scene { data: scene });
    }

    pub fn detach(&mut self, conn: ConnectionId) -> bool {
        let removed = self.clients.remove(&conn).is_some();
        if removed {
            info!(conn = %conn, "Client detached");
        }
        removed
    }

    pub fn handle_client_message(&mut self, conn: ConnectionId, message: ClientMessage) {
        debug!(conn = %conn, kind = message.kind(), "Inbound message");
        match message {
            ClientMessage::GiveScene => {
                let scene = self.registry.scene();
                self.send_to(conn, ServerMessage::Scene { data: scene });
            }
            ClientMessage::Create => {
                match self
                    .registry
                    .create(self.spawner.as_ref(), self.process_tx.clone())
                {
                    Ok(_) => self.broadcast_scene(),
                    Err(e) => error!(conn = %conn, "Failed to create terminal: {}", e),
                }
            }
            ClientMessage::Input { id, data } => match self.registry.get_mut(&id) {
                Some(session) => {
                    if let Err(e) = session.write(data.as_bytes()) {
                        warn!(session = %id, "Failed to write input: {}", e);
                    }
                }
                None => warn!(conn = %conn, session = %id, "Input for unknown terminal"),
            },
            ClientMessage::Resize { id, cols, rows } => {
                match self.registry.resize(&id, cols, rows) {
                    Ok(ResizeOutcome::UnknownSession) => {
                        warn!(conn = %conn, session = %id, "Resize for unknown terminal")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(session = %id, "Failed to resize: {}", e),
                }
            }
            ClientMessage::Close { id } => match self.registry.close(&id) {
                CloseOutcome::Requested => info!(session = %id, "Close requested"),
                CloseOutcome::UnknownSession => {
                    warn!(conn = %conn, session = %id, "Close for unknown terminal")
                }
                CloseOutcome::ForceRemoved(_) => self.broadcast_scene(),
            },
            ClientMessage::RequestHistory { id, lines_back } => {
                let Some(session) = self.registry.get(&id) else {
                    warn!(conn = %conn, session = %id, "History for unknown terminal");
                    return;
                };
                let slice = session.buffer.slice(lines_back, session.rows as usize);
                self.send_to(
                    conn,
                    ServerMessage::HistoryChunk {
                        id,
                        data: slice.data,
                        lines_back: slice.confirmed_offset,
                    },
                );
            }
        }
    }

    pub fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output { id, data } => {
                let Some(session) = self.registry.get_mut(&id) else {
                    debug!(session = %id, "Output from unregistered process");
                    return;
                };
                let text = session.ingest_output(&data);
                if text.is_empty() {
                    return;
                }
                self.broadcast(ServerMessage::Output { id, data: text });
            }
            ProcessEvent::Exited { id, exit_code } => {
                if self.registry.remove(&id).is_some() {
                    info!(session = %id, ?exit_code, "Terminal exited");
                    self.broadcast_scene();
                } else {
                    debug!(session = %id, "Exit from unregistered process");
                }
            }
        }
    }

    /// Drop every subscription. Each connection's writer sees its queue close.
    pub fn close_all_clients(&mut self) {
        let count = self.clients.len();
        self.clients.clear();
        info!("Closed {} client connection(s)", count);
    }

    /// Ask every live process to terminate. Returns the ids still awaiting an
    /// exit event; sessions whose kill failed are removed immediately.
    pub fn terminate_all(&mut self) -> Vec<SessionId> {
        let mut pending = Vec::new();
        for id in self.registry.ids() {
            match self.registry.close(&id) {
                CloseOutcome::Requested => pending.push(id),
                CloseOutcome::ForceRemoved(_) | CloseOutcome::UnknownSession => {}
            }
        }
        pending
    }

    fn broadcast_scene(&self) {
        let scene = self.registry.scene();
        self.broadcast(ServerMessage::Scene { data: scene });
    }

    fn send_to(&self, conn: ConnectionId, message: ServerMessage) {
        match self.clients.get(&conn) {
            Some(tx) => deliver(conn, tx, message),
            None => debug!(conn = %conn, "Reply for detached client dropped"),
        }
    }

    fn broadcast(&self, message: ServerMessage) {
        for (conn, tx) in &self.clients {
            deliver(*conn, tx, message.clone());
        }
    }
}

fn deliver(conn: ConnectionId, tx: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    match tx.try_send(message) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(conn = %conn, "Client queue full, dropping message")
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(conn = %conn, "Client queue closed, dropping message")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionDefaults;
    use termdeck_protocol::Scene;
    use termdeck_pty::scripted::ScriptedSpawner;

    struct Harness {
        router: MessageRouter,
        spawner: ScriptedSpawner,
        process_rx: mpsc::Receiver<ProcessEvent>,
    }

    impl Harness {
        fn new(spawner: ScriptedSpawner) -> Self {
            let (process_tx, process_rx) = mpsc::channel(256);
            let router = MessageRouter::new(
                SessionRegistry::new(SessionDefaults::default()),
                Box::new(spawner.clone()),
                process_tx,
            );
            Self {
                router,
                spawner,
                process_rx,
            }
        }

        fn attach(&mut self, n: u64) -> mpsc::Receiver<ServerMessage> {
            let (tx, rx) = mpsc::channel(64);
            self.router.attach(ConnectionId(n), tx);
            rx
        }

        fn send(&mut self, n: u64, message: ClientMessage) {
            self.router.handle_client_message(ConnectionId(n), message);
        }

        /// Deliver every process event produced so far.
        fn pump(&mut self) {
            while let Ok(event) = self.process_rx.try_recv() {
                self.router.handle_process_event(event);
            }
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn scene_of(message: &ServerMessage) -> &Scene {
        match message {
            ServerMessage::Scene { data } => data,
            other => panic!("expected scene, got {other:?}"),
        }
    }

    #[test]
    fn attach_sends_current_scene() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let mut rx = h.attach(1);
        let received = drain(&mut rx);
        assert_eq!(received.len(), 1);
        assert!(scene_of(&received[0]).terminals.is_empty());
    }

    #[test]
    fn create_broadcasts_scene_to_everyone() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let mut a = h.attach(1);
        let mut b = h.attach(2);
        drain(&mut a);
        drain(&mut b);

        h.send(1, ClientMessage::Create);
        for rx in [&mut a, &mut b] {
            let received = drain(rx);
            assert_eq!(received.len(), 1);
            assert_eq!(scene_of(&received[0]).terminals.len(), 1);
        }
    }

    #[test]
    fn failed_create_sends_nothing() {
        let mut h = Harness::new(ScriptedSpawner::new().fail_spawn(true));
        let mut a = h.attach(1);
        drain(&mut a);

        h.send(1, ClientMessage::Create);
        assert!(drain(&mut a).is_empty());
        assert!(h.router.registry().is_empty());
    }

    #[test]
    fn give_scene_replies_to_sender_only() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let mut a = h.attach(1);
        let mut b = h.attach(2);
        drain(&mut a);
        drain(&mut b);

        h.send(2, ClientMessage::GiveScene);
        assert!(drain(&mut a).is_empty());
        assert_eq!(drain(&mut b).len(), 1);
    }

    #[test]
    fn output_is_ingested_and_fanned_out() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let mut a = h.attach(1);
        let mut b = h.attach(2);
        h.send(1, ClientMessage::Create);
        let id = h.spawner.spawned_ids()[0].clone();
        drain(&mut a);
        drain(&mut b);

        h.spawner.emit_output(&id, "one\ntwo\n");
        h.pump();

        let expected = ServerMessage::Output {
            id: id.clone(),
            data: "one\ntwo\n".into(),
        };
        assert_eq!(drain(&mut a), vec![expected.clone()]);
        assert_eq!(drain(&mut b), vec![expected]);
        let session = h.router.registry().get(&id).unwrap();
        assert_eq!(session.buffer.lines().collect::<Vec<_>>(), ["one", "two"]);
    }

    #[test]
    fn input_reaches_process() {
        let mut h = Harness::new(ScriptedSpawner::new().echo(false));
        let _a = h.attach(1);
        h.send(1, ClientMessage::Create);
        let id = h.spawner.spawned_ids()[0].clone();

        h.send(
            1,
            ClientMessage::Input {
                id: id.clone(),
                data: "ls\r".into(),
            },
        );
        h.send(
            1,
            ClientMessage::Input {
                id: "ghost".into(),
                data: "x".into(),
            },
        );
        assert_eq!(h.spawner.log().writes, vec![(id, b"ls\r".to_vec())]);
    }

    #[test]
    fn history_goes_to_requester_with_confirmed_offset() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let mut a = h.attach(1);
        let mut b = h.attach(2);
        h.send(1, ClientMessage::Create);
        let id = h.spawner.spawned_ids()[0].clone();
        h.spawner.emit_output(&id, "a\nb\nc\n");
        h.pump();
        drain(&mut a);
        drain(&mut b);

        h.send(
            2,
            ClientMessage::RequestHistory {
                id: id.clone(),
                lines_back: 10,
            },
        );
        assert!(drain(&mut a).is_empty());
        assert_eq!(
            drain(&mut b),
            vec![ServerMessage::HistoryChunk {
                id,
                data: "\x1b[2J\x1b[H".into(),
                lines_back: 3,
            }]
        );
    }

    #[test]
    fn resize_never_broadcasts() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let mut a = h.attach(1);
        h.send(1, ClientMessage::Create);
        let id = h.spawner.spawned_ids()[0].clone();
        drain(&mut a);

        for _ in 0..2 {
            h.send(
                1,
                ClientMessage::Resize {
                    id: id.clone(),
                    cols: 100,
                    rows: 30,
                },
            );
        }
        assert!(drain(&mut a).is_empty());
        assert_eq!(h.spawner.log().resizes.len(), 1);
    }

    #[test]
    fn close_broadcasts_after_exit() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let mut a = h.attach(1);
        h.send(1, ClientMessage::Create);
        let id = h.spawner.spawned_ids()[0].clone();
        drain(&mut a);

        h.send(1, ClientMessage::Close { id: id.clone() });
        assert!(drain(&mut a).is_empty());
        assert!(h.router.registry().contains(&id));

        h.pump();
        let received = drain(&mut a);
        assert_eq!(received.len(), 1);
        assert!(scene_of(&received[0]).terminals.is_empty());
    }

    #[test]
    fn failed_kill_force_removes() {
        let mut h = Harness::new(ScriptedSpawner::new().fail_kill(true));
        let mut a = h.attach(1);
        h.send(1, ClientMessage::Create);
        let id = h.spawner.spawned_ids()[0].clone();
        drain(&mut a);

        h.send(1, ClientMessage::Close { id: id.clone() });
        let received = drain(&mut a);
        assert_eq!(received.len(), 1);
        assert!(!scene_of(&received[0]).contains(&id));
    }

    #[test]
    fn events_for_removed_sessions_are_ignored() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let mut a = h.attach(1);
        drain(&mut a);

        h.router.handle_process_event(ProcessEvent::Output {
            id: "gone".into(),
            data: b"late\n".to_vec(),
        });
        h.router.handle_process_event(ProcessEvent::Exited {
            id: "gone".into(),
            exit_code: Some(0),
        });
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn full_queue_does_not_block_other_clients() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        h.router.attach(ConnectionId(1), slow_tx);
        let mut fast = h.attach(2);
        h.send(2, ClientMessage::Create);
        let id = h.spawner.spawned_ids()[0].clone();
        drain(&mut fast);

        for i in 0..5 {
            h.spawner.emit_output(&id, format!("{i}\n"));
        }
        h.pump();
        assert_eq!(drain(&mut fast).len(), 5);
    }

    #[test]
    fn detach_is_deterministic() {
        let mut h = Harness::new(ScriptedSpawner::new());
        let mut a = h.attach(1);
        assert!(h.router.detach(ConnectionId(1)));
        assert!(!h.router.detach(ConnectionId(1)));
        drain(&mut a);

        h.send(2, ClientMessage::Create);
        assert!(drain(&mut a).is_empty());
        assert_eq!(h.router.client_count(), 0);
    }

    #[test]
    fn terminate_all_reports_pending_exits() {
        let mut h = Harness::new(ScriptedSpawner::new().ignore_kill(true));
        let _a = h.attach(1);
        h.send(1, ClientMessage::Create);
        h.send(1, ClientMessage::Create);

        let pending = h.router.terminate_all();
        assert_eq!(pending, h.spawner.spawned_ids());
        assert_eq!(h.spawner.log().kills.len(), 2);
    }
}
