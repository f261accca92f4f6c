//! Connection lifecycle
//!
//! A pure state machine: every input returns the actions the driver must
//! carry out, in order. Nothing here touches a socket or a timer, so every
//! transition can be tested synchronously.

use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// User asked to disconnect; the socket is being torn down
    Closing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleAction {
    OpenSocket,
    CloseSocket,
    RequestScene,
    /// Arm the reconnect timer, replacing any pending one. `ticket` comes
    /// back through [`ConnectionLifecycle::on_reconnect_timer`].
    ScheduleReconnect { delay: Duration, ticket: u64 },
    CancelReconnect,
    /// Forget tracked views, keep sink registrations
    ClearViews,
    /// Forget tracked views and sink registrations
    ClearAll,
}

#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    reconnect_delay: Duration,
    pending_ticket: Option<u64>,
    next_ticket: u64,
}

impl ConnectionLifecycle {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_delay,
            pending_ticket: None,
            next_ticket: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_pending(&self) -> bool {
        self.pending_ticket.is_some()
    }

    /// Start connecting. Ignored unless disconnected.
    pub fn connect(&mut self) -> Vec<LifecycleAction> {
        if self.state != ConnectionState::Disconnected {
            debug!(state = ?self.state, "Connect ignored");
            return Vec::new();
        }
        let mut actions = self.cancel_reconnect();
        self.state = ConnectionState::Connecting;
        actions.push(LifecycleAction::OpenSocket);
        actions
    }

    pub fn on_open(&mut self) -> Vec<LifecycleAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        info!("Connected");
        self.state = ConnectionState::Connected;
        let mut actions = self.cancel_reconnect();
        actions.push(LifecycleAction::RequestScene);
        actions
    }

    /// The socket never opened. Handled like an unclean close.
    pub fn on_connect_failed(&mut self) -> Vec<LifecycleAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.on_closed(false)
    }

    /// `clean` means the peer closed normally. Anything else schedules a
    /// reconnect, unless the user asked for the close.
    pub fn on_closed(&mut self, clean: bool) -> Vec<LifecycleAction> {
        match self.state {
            ConnectionState::Disconnected => Vec::new(),
            ConnectionState::Closing => {
                self.state = ConnectionState::Disconnected;
                Vec::new()
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                info!(clean, "Connection closed");
                self.state = ConnectionState::Disconnected;
                let mut actions = vec![LifecycleAction::ClearViews];
                if !clean {
                    actions.push(self.schedule_reconnect());
                }
                actions
            }
        }
    }

    /// User-initiated close. Cancels any pending reconnect and forgets all
    /// tracked state.
    pub fn disconnect(&mut self) -> Vec<LifecycleAction> {
        let mut actions = self.cancel_reconnect();
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.state = ConnectionState::Closing;
                actions.push(LifecycleAction::CloseSocket);
            }
            ConnectionState::Disconnected | ConnectionState::Closing => {}
        }
        actions.push(LifecycleAction::ClearAll);
        actions
    }

    /// Reconnects only if `ticket` is still the pending timer and nothing
    /// has connected in the meantime.
    pub fn on_reconnect_timer(&mut self, ticket: u64) -> Vec<LifecycleAction> {
        if self.pending_ticket != Some(ticket) {
            debug!(ticket, "Stale reconnect timer");
            return Vec::new();
        }
        self.pending_ticket = None;
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        info!("Reconnecting");
        self.connect()
    }

    fn schedule_reconnect(&mut self) -> LifecycleAction {
        self.next_ticket += 1;
        self.pending_ticket = Some(self.next_ticket);
        info!("Scheduling reconnect in {:?}", self.reconnect_delay);
        LifecycleAction::ScheduleReconnect {
            delay: self.reconnect_delay,
            ticket: self.next_ticket,
        }
    }

    fn cancel_reconnect(&mut self) -> Vec<LifecycleAction> {
        match self.pending_ticket.take() {
            Some(_) => vec![LifecycleAction::CancelReconnect],
            None => Vec::new(),
        }
    }
}
