//! Transport between the host and the execution target.
//!
//! The execution target connects to the host over a Unix domain socket and
//! the two exchange JSON envelopes with Content-Length framing:
//!
//! ```text
//! ┌──────────────────┐        Unix socket         ┌────────────────────┐
//! │  Host            │  ◄───────────────────────► │  Execution target  │
//! │  TargetListener  │  OutboundRequest / Inbound │  TargetAgent       │
//! └──────────────────┘  Reply, Content-Length     └────────────────────┘
//! ```
//!
//! ```text
//! Content-Length: 62\r\n
//! \r\n
//! {"id":"4c1e…","command":"get-node","args":{"id":"1:2"}}
//! ```

mod framing;
mod listener;
mod socket;

pub use framing::{read_message, write_message, MAX_MESSAGE_SIZE};
pub use listener::TargetListener;
pub use socket::{connect_with_retry, default_socket_path, IpcError, SOCKET_FILE_NAME};
