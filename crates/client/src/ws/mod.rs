//! Websocket transport: one socket carrying RPC calls and server pushes.
//!
//! ```text
//!   callers ──call_method──▶ Transport ──Request──▶ server
//!                               │
//!            ◀──Response(id)────┤ pending[id] resolves the caller
//!                               │
//!            Notify(kind) ─────▶ NotificationRouter ──▶ managers
//! ```
//!
//! The connection loop reconnects after a fixed delay until the transport
//! is closed explicitly. Calls in flight when the socket drops resolve to
//! `ClientError::ConnectionLost`.

mod connection;
mod transport;

pub use connection::{
    ConnectionState, HandlerId, LifecycleEvent, LifecycleHandler, ReconnectConfig,
    TransportEvent,
};
pub use transport::Transport;
