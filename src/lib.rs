//! canvas-bridge library.
//!
//! Lets many short-lived clients drive one long-lived, sandboxed
//! document-editing runtime that is only reachable by message passing:
//!
//! - `bridge` - correlation table, timeout policy, connection manager and the
//!   `submit` primitive
//! - `batch` - two-phase batch entity creation on the execution target
//! - `ipc` - Unix socket transport with Content-Length framing
//! - `target` - execution-target agent and the in-memory sandbox document
//! - `http` / `client` - HTTP front door and its reqwest client
//! - `mcp` - JSON-RPC tool-call server for agents
//! - `config` - environment configuration
//! - `models` - envelopes and bodies shared by all of the above
//!
//! ```ignore
//! use canvas_bridge::bridge::{ConnectionManager, Dispatcher, TimeoutPolicy};
//!
//! let dispatcher = Dispatcher::new(Arc::new(ConnectionManager::new()), TimeoutPolicy::default());
//! let node = dispatcher.submit("get-node", json!({"id": "1:2"}), None).await?;
//! ```

pub mod batch;
pub mod bridge;
pub mod client;
pub mod config;
pub mod http;
pub mod ipc;
pub mod mcp;
pub mod models;
pub mod target;
