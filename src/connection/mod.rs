//! The single live connection: close-code policy, backoff, heartbeat, and
//! the async driver that owns the socket.

pub mod manager;
pub mod policy;

pub use manager::{ConnectionManager, Endpoint};
pub use policy::{
    CloseDisposition, ConnectionState, ConnectionStatus, ReconnectPolicy, CLOSE_AUTH_FAILED,
    CLOSE_IDLE_TIMEOUT, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_RECONNECT_DELAY,
};
