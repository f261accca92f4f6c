//! Shell process capability for termdeck
//!
//! The session core never touches a pseudo-terminal directly. It holds a
//! [`ProcessSpawner`] and the [`ProcessHandle`]s it hands out, and receives
//! output and exit notifications as [`ProcessEvent`]s on a channel it owns.
//!
//! # Example
//!
//! ```no_run
//! use termdeck_protocol::SessionId;
//! use termdeck_pty::{ProcessEvent, ProcessSpawner, PtyConfig, PtySpawner, SpawnRequest};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(1024);
//!     let spawner = PtySpawner::new(PtyConfig::default());
//!
//!     let id = SessionId::generate();
//!     let mut handle = spawner
//!         .spawn(SpawnRequest { id, cols: 80, rows: 24 }, events_tx)
//!         .unwrap();
//!     handle.write(b"echo hello\n").unwrap();
//!
//!     while let Some(event) = events_rx.recv().await {
//!         match event {
//!             ProcessEvent::Output { id, data } => {
//!                 println!("{}: {:?}", id, String::from_utf8_lossy(&data));
//!             }
//!             ProcessEvent::Exited { id, .. } => {
//!                 println!("{} exited", id);
//!                 break;
//!             }
//!         }
//!     }
//! }
//! ```

mod error;
mod process;
mod pty;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use error::PtyError;
pub use process::{ProcessEvent, ProcessHandle, ProcessSpawner, SpawnRequest};
pub use pty::{PtyConfig, PtyProcess, PtySpawner, default_shell};
