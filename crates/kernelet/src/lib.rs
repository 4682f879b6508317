//! kernelet: session/message engine for interactive computation kernels.
//!
//! Sits between a transport (sockets, per-channel delivery loops) and an
//! execution engine, and owns the protocol state in between: message
//! authentication and framing, channel routing, request/reply correlation
//! via parent-header propagation, the busy/idle lifecycle around every
//! request, abort-on-error for queued requests, and comm lifecycle.
//!
//! # Architecture
//!
//! - **auth / codec**: signed envelope <-> [`protocol::Message`]
//! - **kernel**: the dispatch funnel, handler table, and abort controller
//! - **comm**: ephemeral bidirectional sub-channels
//! - **interpreter / transport**: seams to the external collaborators

pub mod auth;
pub mod codec;
pub mod comm;
pub mod interpreter;
pub mod kernel;
pub mod output;
pub mod protocol;
pub mod transport;

pub use auth::{Authenticator, HmacSha256Authenticator, NoAuth};
pub use codec::{DecodeError, MalformedMessage};
pub use comm::{CommRegistry, CommTarget};
pub use interpreter::{ExecuteRequest, HistoryArguments, Interpreter, InterpreterError};
pub use kernel::{Kernel, KernelConfig};
pub use output::KernelIo;
pub use protocol::{Channel, Header, Message, PROTOCOL_VERSION, ParentContext, WireMessage};
pub use transport::Transport;
