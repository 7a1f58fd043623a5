//! MCP (Model Context Protocol) Streamable HTTP transport.
//!
//! A single `POST /mcp` endpoint accepts JSON-RPC 2.0 requests and answers
//! with JSON or, for long-running tool calls, a Server-Sent Events stream.
//!
//! ## Session Management
//!
//! Sessions are identified by the `Mcp-Session-Id` header, assigned during
//! initialization and required for subsequent requests. Each session keeps
//! a bounded log of the stream events it was sent and the tasks it started,
//! so a client that reconnects with `Last-Event-ID` can catch up.

pub mod error;
pub mod event_log;
pub mod executor;
pub mod handler;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod streaming;
pub mod sweeper;
pub mod tasks;

pub use error::McpError;
pub use executor::{CatalogExecutor, ProgressReporter, RequestExecutor};
pub use handler::{McpHandler, McpOutcome, McpReply, RequestContext};
pub use protocol::{JsonRpcRequest, JsonRpcResponse};
pub use session::{Session, SessionStore};
pub use sweeper::CleanupSweeper;
