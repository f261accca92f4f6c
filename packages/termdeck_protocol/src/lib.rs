//! termdeck wire protocol
//!
//! Every frame on the websocket is a JSON object carrying a `type`
//! discriminant. The two directions are closed enums so both ends match them
//! exhaustively:
//!
//! ```
//! use termdeck_protocol::{ClientMessage, SessionId};
//!
//! let msg = ClientMessage::decode(r#"{"type":"requestHistory","id":"a1","linesBack":12}"#).unwrap();
//! assert_eq!(
//!     msg,
//!     ClientMessage::RequestHistory { id: SessionId::from("a1"), lines_back: 12 }
//! );
//! ```

mod error;
mod messages;

pub use error::ProtocolError;
pub use messages::{ClientMessage, Scene, ServerMessage, SessionId, TerminalInfo};

/// Control sequence prepended to every history slice: clear screen, cursor home.
pub const CLEAR_AND_HOME: &str = "\x1b[2J\x1b[H";
