//! Connection driver
//!
//! One task owns the [`ConnectionLifecycle`] and the [`ClientSyncStore`] and
//! handles user commands, socket events and reconnect timers one at a time.
//! Each socket runs in its own task tagged with a generation number, so
//! events from a socket the driver has already given up on are ignored.

use std::collections::VecDeque;

use futures_util::{SinkExt, StreamExt};
use termdeck_protocol::{ClientMessage, ServerMessage, SessionId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::layout::{FileLayoutStore, LayoutRect, LayoutStore, MemoryLayoutStore};
use crate::lifecycle::{ConnectionLifecycle, ConnectionState, LifecycleAction};
use crate::store::{ClientSyncStore, Outbox, ScrollDirection, TerminalSink, TerminalView};

/// Commands sent from a [`ClientHandle`] to the driver
pub enum ClientCommand {
    Connect,
    Disconnect,
    CreateTerminal,
    CloseTerminal { id: SessionId },
    SendInput { id: SessionId, data: String },
    ResizeTerminal { id: SessionId, cols: u16, rows: u16 },
    UpdateLayout { id: SessionId, layout: LayoutRect },
    UpdateFontSize { id: SessionId, font_size: u32 },
    EnterHistory { id: SessionId },
    ExitHistory { id: SessionId },
    Scroll { id: SessionId, direction: ScrollDirection },
    RegisterSink { id: SessionId, sink: Box<dyn TerminalSink> },
    UnregisterSink { id: SessionId },
    Views { respond_to: oneshot::Sender<Vec<TerminalView>> },
    Shutdown,
}

/// Events raised by socket and timer tasks
#[derive(Debug)]
enum ClientEvent {
    Opened { generation: u64, outbox: Outbox },
    Incoming { generation: u64, text: String },
    Closed { generation: u64, clean: bool },
    ConnectFailed { generation: u64 },
    ReconnectDue { ticket: u64 },
}

/// Handle to communicate with the client driver
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl ClientHandle {
    fn send(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::DriverGone)
    }

    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(ClientCommand::Connect)
    }

    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(ClientCommand::Disconnect)
    }

    pub fn create_terminal(&self) -> Result<(), ClientError> {
        self.send(ClientCommand::CreateTerminal)
    }

    pub fn close_terminal(&self, id: SessionId) -> Result<(), ClientError> {
        self.send(ClientCommand::CloseTerminal { id })
    }

    pub fn send_input(&self, id: SessionId, data: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientCommand::SendInput {
            id,
            data: data.into(),
        })
    }

    pub fn resize_terminal(&self, id: SessionId, cols: u16, rows: u16) -> Result<(), ClientError> {
        self.send(ClientCommand::ResizeTerminal { id, cols, rows })
    }

    pub fn update_layout(&self, id: SessionId, layout: LayoutRect) -> Result<(), ClientError> {
        self.send(ClientCommand::UpdateLayout { id, layout })
    }

    pub fn update_font_size(&self, id: SessionId, font_size: u32) -> Result<(), ClientError> {
        self.send(ClientCommand::UpdateFontSize { id, font_size })
    }

    pub fn enter_history(&self, id: SessionId) -> Result<(), ClientError> {
        self.send(ClientCommand::EnterHistory { id })
    }

    pub fn exit_history(&self, id: SessionId) -> Result<(), ClientError> {
        self.send(ClientCommand::ExitHistory { id })
    }

    pub fn scroll(&self, id: SessionId, direction: ScrollDirection) -> Result<(), ClientError> {
        self.send(ClientCommand::Scroll { id, direction })
    }

    pub fn register_sink(
        &self,
        id: SessionId,
        sink: impl TerminalSink + 'static,
    ) -> Result<(), ClientError> {
        self.send(ClientCommand::RegisterSink {
            id,
            sink: Box::new(sink),
        })
    }

    pub fn unregister_sink(&self, id: SessionId) -> Result<(), ClientError> {
        self.send(ClientCommand::UnregisterSink { id })
    }

    /// Snapshot of tracked terminals in scene order.
    pub async fn views(&self) -> Result<Vec<TerminalView>, ClientError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(ClientCommand::Views { respond_to })?;
        rx.await.map_err(|_| ClientError::DriverGone)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection state satisfies `predicate`.
    pub async fn wait_for_state(
        &self,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<ConnectionState, ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(predicate)
            .await
            .map(|s| *s)
            .map_err(|_| ClientError::DriverGone)
    }

    /// Stop the driver, closing any open connection.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.send(ClientCommand::Shutdown)
    }
}

/// Entry point for embedding applications.
pub struct Client;

impl Client {
    /// Start a driver using the layout storage named by `config`.
    pub fn spawn(config: ClientConfig) -> (ClientHandle, JoinHandle<()>) {
        let layouts: Box<dyn LayoutStore> = match &config.layouts_path {
            Some(path) => Box::new(FileLayoutStore::new(path)),
            None => Box::new(MemoryLayoutStore::new()),
        };
        Self::spawn_with_layouts(config, layouts)
    }

    pub fn spawn_with_layouts(
        config: ClientConfig,
        layouts: Box<dyn LayoutStore>,
    ) -> (ClientHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        let driver = Driver {
            lifecycle: ConnectionLifecycle::new(config.reconnect_delay()),
            store: ClientSyncStore::new(layouts),
            config,
            commands,
            events,
            events_tx,
            state_tx,
            generation: 0,
            socket_cancel: None,
            reconnect_timer: None,
        };
        let task = tokio::spawn(driver.run());
        (
            ClientHandle {
                commands: commands_tx,
                state,
            },
            task,
        )
    }
}

struct Driver {
    config: ClientConfig,
    lifecycle: ConnectionLifecycle,
    store: ClientSyncStore,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    state_tx: watch::Sender<ConnectionState>,
    /// Identifies the current socket task
    generation: u64,
    socket_cancel: Option<CancellationToken>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }

        let actions = self.lifecycle.disconnect();
        self.apply(actions);
        debug!("Client driver stopped");
    }

    fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Connect => {
                let actions = self.lifecycle.connect();
                self.apply(actions);
            }
            ClientCommand::Disconnect => {
                info!("Disconnecting");
                let actions = self.lifecycle.disconnect();
                self.apply(actions);
            }
            ClientCommand::CreateTerminal => {
                self.store.create_terminal();
            }
            ClientCommand::CloseTerminal { id } => {
                self.store.close_terminal(&id);
            }
            ClientCommand::SendInput { id, data } => {
                self.store.send_input(&id, data);
            }
            ClientCommand::ResizeTerminal { id, cols, rows } => {
                self.store.resize_terminal(&id, cols, rows);
            }
            ClientCommand::UpdateLayout { id, layout } => self.store.update_layout(&id, layout),
            ClientCommand::UpdateFontSize { id, font_size } => {
                self.store.update_font_size(&id, font_size)
            }
            ClientCommand::EnterHistory { id } => self.store.enter_history(&id),
            ClientCommand::ExitHistory { id } => self.store.exit_history(&id),
            ClientCommand::Scroll { id, direction } => self.store.scroll(&id, direction),
            ClientCommand::RegisterSink { id, sink } => self.store.register_sink(id, sink),
            ClientCommand::UnregisterSink { id } => {
                self.store.unregister_sink(&id);
            }
            ClientCommand::Views { respond_to } => {
                let _ = respond_to.send(self.store.views());
            }
            // handled in run()
            ClientCommand::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Opened { generation, outbox } => {
                if generation != self.generation {
                    return;
                }
                self.store.set_outbox(outbox);
                let actions = self.lifecycle.on_open();
                self.apply(actions);
            }
            ClientEvent::Incoming { generation, text } => {
                if generation != self.generation {
                    return;
                }
                match ServerMessage::decode(&text) {
                    Ok(message) => self.store.handle_message(message),
                    Err(e) => warn!("Dropping malformed server message: {}", e),
                }
            }
            ClientEvent::Closed { generation, clean } => {
                if generation != self.generation {
                    return;
                }
                self.socket_cancel = None;
                self.store.set_outbox(Outbox::closed());
                let actions = self.lifecycle.on_closed(clean);
                self.apply(actions);
            }
            ClientEvent::ConnectFailed { generation } => {
                if generation != self.generation {
                    return;
                }
                self.socket_cancel = None;
                let actions = self.lifecycle.on_connect_failed();
                self.apply(actions);
            }
            ClientEvent::ReconnectDue { ticket } => {
                self.reconnect_timer = None;
                let actions = self.lifecycle.on_reconnect_timer(ticket);
                self.apply(actions);
            }
        }
    }

    fn apply(&mut self, actions: Vec<LifecycleAction>) {
        let mut work: VecDeque<LifecycleAction> = actions.into();
        while let Some(action) = work.pop_front() {
            match action {
                LifecycleAction::OpenSocket => self.open_socket(),
                LifecycleAction::CloseSocket => {
                    if let Some(cancel) = self.socket_cancel.take() {
                        cancel.cancel();
                    }
                    // Later events from that socket are stale.
                    self.generation += 1;
                    self.store.set_outbox(Outbox::closed());
                    work.extend(self.lifecycle.on_closed(true));
                }
                LifecycleAction::RequestScene => {
                    self.store.request_scene();
                }
                LifecycleAction::ScheduleReconnect { delay, ticket } => {
                    self.cancel_timer();
                    let events = self.events_tx.clone();
                    self.reconnect_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = events.send(ClientEvent::ReconnectDue { ticket });
                    }));
                }
                LifecycleAction::CancelReconnect => self.cancel_timer(),
                LifecycleAction::ClearViews => self.store.clear_views(),
                LifecycleAction::ClearAll => self.store.clear(),
            }
        }
        self.state_tx.send_replace(self.lifecycle.state());
    }

    fn open_socket(&mut self) {
        self.generation += 1;
        let cancel = CancellationToken::new();
        self.socket_cancel = Some(cancel.clone());
        info!("Connecting to {}", self.config.url);
        tokio::spawn(run_socket(
            self.config.url.clone(),
            self.generation,
            self.events_tx.clone(),
            cancel,
        ));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

async fn run_socket(
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connect_async(url.as_str()) => result,
    };
    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(source) => {
            warn!("{}", ClientError::Connect { url, source });
            let _ = events.send(ClientEvent::ConnectFailed { generation });
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (tx, mut outgoing) = mpsc::unbounded_channel::<ClientMessage>();
    let _ = events.send(ClientEvent::Opened {
        generation,
        outbox: Outbox::new(tx),
    });

    let clean = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_sender
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: Utf8Bytes::from_static("user disconnected"),
                    })))
                    .await;
                let _ = ws_sender.close().await;
                return;
            }
            message = outgoing.recv() => {
                // The driver dropped our outbox, so it no longer wants this socket.
                let Some(message) = message else {
                    let _ = ws_sender.close().await;
                    return;
                };
                match message.encode() {
                    Ok(json) => {
                        if ws_sender.send(Message::text(json)).await.is_err() {
                            break false;
                        }
                    }
                    Err(e) => warn!("Failed to serialize {}: {}", message.kind(), e),
                }
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ClientEvent::Incoming {
                        generation,
                        text: text.as_str().to_owned(),
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Server closed connection");
                    break frame.is_some_and(|f| f.code == CloseCode::Normal);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error: {}", e);
                    break false;
                }
                None => break false,
            },
        }
    };

    let _ = events.send(ClientEvent::Closed { generation, clean });
}
