//! termdeck client
//!
//! Keeps a local mirror of the server's sessions, remembers where each
//! terminal sits on the grid, and keeps the websocket connection alive.
//!
//! ```no_run
//! # async fn run() -> Result<(), termdeck_client::ClientError> {
//! use termdeck_client::{Client, ClientConfig, ConnectionState};
//!
//! let (client, _task) = Client::spawn(ClientConfig::from_env()?);
//! client.connect()?;
//! client
//!     .wait_for_state(|s| *s == ConnectionState::Connected)
//!     .await?;
//! client.create_terminal()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod layout;
pub mod lifecycle;
pub mod store;

pub use client::{Client, ClientCommand, ClientHandle};
pub use config::ClientConfig;
pub use error::ClientError;
pub use layout::{FileLayoutStore, LayoutRect, LayoutStore, Layouts, MemoryLayoutStore, PersistedLayout};
pub use lifecycle::{ConnectionLifecycle, ConnectionState, LifecycleAction};
pub use store::{ClientSyncStore, Outbox, ScrollDirection, TerminalSink, TerminalView};
