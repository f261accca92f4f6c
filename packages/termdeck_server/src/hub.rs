//! Hub actor
//!
//! A single task owns the [`MessageRouter`] and with it every session,
//! scrollback buffer and client subscription. Websocket tasks and PTY reader
//! threads talk to it through channels, so all state changes happen in one
//! place and in arrival order.

use std::time::Duration;

use termdeck_protocol::{ClientMessage, ServerMessage};
use termdeck_pty::{ProcessEvent, ProcessSpawner};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::registry::{SessionDefaults, SessionRegistry};
use crate::router::{ConnectionId, MessageRouter};

/// Events processed by the hub, one at a time
#[derive(Debug)]
pub enum HubEvent {
    Attach {
        tx: mpsc::Sender<ServerMessage>,
        respond_to: oneshot::Sender<Option<ConnectionId>>,
    },
    Detach {
        conn: ConnectionId,
    },
    Inbound {
        conn: ConnectionId,
        message: ClientMessage,
    },
    Stats {
        respond_to: oneshot::Sender<HubStats>,
    },
    /// Disconnect every client, stop every process, then stop the hub
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubStats {
    pub active_terminals: usize,
    pub clients: usize,
}

#[derive(Clone, Debug)]
pub struct HubSettings {
    pub defaults: SessionDefaults,
    /// How long shutdown waits for killed processes to report their exit
    pub process_exit_timeout: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            defaults: SessionDefaults::default(),
            process_exit_timeout: Duration::from_secs(1),
        }
    }
}

/// Handle to communicate with the hub
#[derive(Clone, Debug)]
pub struct HubHandle {
    sender: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Register an outbound queue. `None` once the hub is shutting down.
    pub async fn attach(&self, tx: mpsc::Sender<ServerMessage>) -> Option<ConnectionId> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(HubEvent::Attach { tx, respond_to })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn detach(&self, conn: ConnectionId) {
        let _ = self.sender.send(HubEvent::Detach { conn }).await;
    }

    /// Returns false if the hub is gone.
    pub async fn inbound(&self, conn: ConnectionId, message: ClientMessage) -> bool {
        self.sender
            .send(HubEvent::Inbound { conn, message })
            .await
            .is_ok()
    }

    pub async fn stats(&self) -> Option<HubStats> {
        let (respond_to, rx) = oneshot::channel();
        self.sender.send(HubEvent::Stats { respond_to }).await.ok()?;
        rx.await.ok()
    }

    /// Resolves once clients are disconnected and processes have exited or
    /// timed out. Safe to call more than once.
    pub async fn shutdown(&self) {
        let (respond_to, rx) = oneshot::channel();
        if self
            .sender
            .send(HubEvent::Shutdown { respond_to })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

struct Hub {
    router: MessageRouter,
    events: mpsc::Receiver<HubEvent>,
    process_rx: mpsc::Receiver<ProcessEvent>,
    next_conn: u64,
    process_exit_timeout: Duration,
}

/// Start the hub task.
pub fn spawn_hub(
    spawner: Box<dyn ProcessSpawner>,
    settings: HubSettings,
) -> (HubHandle, JoinHandle<()>) {
    let (sender, events) = mpsc::channel(1024);
    let (process_tx, process_rx) = mpsc::channel(1024);
    let router = MessageRouter::new(SessionRegistry::new(settings.defaults), spawner, process_tx);

    let hub = Hub {
        router,
        events,
        process_rx,
        next_conn: 0,
        process_exit_timeout: settings.process_exit_timeout,
    };
    let task = tokio::spawn(hub.run());
    (HubHandle { sender }, task)
}

impl Hub {
    async fn run(mut self) {
        debug!("Hub started");
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        debug!("All hub handles dropped");
                        break;
                    };
                    if let HubEvent::Shutdown { respond_to } = event {
                        self.shutdown().await;
                        let _ = respond_to.send(());
                        break;
                    }
                    self.handle(event);
                }
                Some(event) = self.process_rx.recv() => {
                    self.router.handle_process_event(event);
                }
            }
        }
        debug!("Hub stopped");
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Attach { tx, respond_to } => {
                self.next_conn += 1;
                let conn = ConnectionId(self.next_conn);
                self.router.attach(conn, tx);
                if respond_to.send(Some(conn)).is_err() {
                    self.router.detach(conn);
                }
            }
            HubEvent::Detach { conn } => {
                self.router.detach(conn);
            }
            HubEvent::Inbound { conn, message } => {
                self.router.handle_client_message(conn, message);
            }
            HubEvent::Stats { respond_to } => {
                let _ = respond_to.send(HubStats {
                    active_terminals: self.router.registry().len(),
                    clients: self.router.client_count(),
                });
            }
            HubEvent::Shutdown { respond_to } => {
                // handled in run()
                let _ = respond_to.send(());
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down hub");
        self.router.close_all_clients();
        self.events.close();

        let pending = self.router.terminate_all();
        if !pending.is_empty() {
            info!("Waiting for {} terminal(s) to exit", pending.len());
        }

        let deadline = Instant::now() + self.process_exit_timeout;
        while !self.router.registry().is_empty() {
            match tokio::time::timeout_at(deadline, self.process_rx.recv()).await {
                Ok(Some(event)) => self.router.handle_process_event(event),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{} terminal(s) did not exit within {:?}",
                        self.router.registry().len(),
                        self.process_exit_timeout
                    );
                    break;
                }
            }
        }
        info!("Hub shutdown complete");
    }
}
