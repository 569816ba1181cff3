//! Remote debugging bridge speaking the Chrome DevTools Protocol
//!
//! The bridge lets a DevTools-compatible front end debug scripts running on
//! engine threads that know nothing about sockets. It sits between three
//! parties:
//!
//! - engine threads, which report pauses and answer inspection requests
//!   through a [`DebuggerServer`];
//! - the pilot ([`pilot`]), a single actor thread that owns every piece of
//!   shared bookkeeping: contexts, pages, breakpoints and the handshake
//!   session;
//! - network threads, one per WebSocket, that speak the handshake protocol
//!   ([`codec::handshake`]) or the CDP subset ([`codec`]) of one page.
//!
//! # Architecture
//!
//! Each execution unit of the engine is registered as a context. When a
//! context pauses, the pilot offers it to the connected client, which binds
//! it to one of a fixed number of pages with `getURL` and then opens
//! `/devtools/page/<n>`. From then on the page and the engine exchange
//! [`Message`]s over a pair of [`BoundedQueue`]s, one per direction.
//!
//! ```text
//!   engine thread ──outbound──▶ ┌──────┐ ──frames──▶ DevTools
//!                ◀──inbound──── │ page │ ◀──frames──
//!                               └──────┘
//!                                  │ pilot requests
//!                               ┌───────┐ ──session──▶ DevTools
//!                               │ pilot │
//!                               └───────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use cdp_bridge::{BridgeConfig, launch};
//!
//! let launched = launch(&BridgeConfig::default())?;
//! let ctx = launched.debugger.add_context()?;
//! // ... on each statement:
//! if launched.debugger.has_breakpoint("main.js", line) {
//!     pause_here(&*launched.debugger, &mut adapter, ctx, BreakInfo::breakpoint("main.js", line));
//! }
//! ```

pub mod auth;
pub mod breakpoints;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod page;
pub mod pilot;
pub mod queue;
pub mod registry;
pub mod server;
pub mod transport;

pub use auth::{AllowAll, Auth, Credentials, StaticCredentials};
pub use breakpoints::{Breakpoint, BreakpointSet, SharedBreakpoints};
pub use config::{Backend, BridgeConfig};
pub use engine::{
    CdpServer, DebuggerServer, DisabledServer, EngineAdapter, ResumeAction, pause_here,
};
pub use error::{BridgeError, BridgeResult};
pub use message::{
    BreakInfo, CallFrame, EngineCommand, EvalResult, LookupTarget, Message, PauseReason,
    Property, RemoteValue, ScopeKind,
};
pub use pilot::{Pilot, PilotHandle, PilotOptions, SessionState};
pub use queue::{BoundedQueue, OverflowPolicy, QueueError};
pub use registry::ContextId;
pub use server::{BridgeServer, Launch, launch};
pub use transport::{ChannelTransport, Transport, WebSocketTransport};
