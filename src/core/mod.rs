//! Session orchestration: the reducer, its effects and events, recovery,
//! and the handle a UI holds.

pub mod effect;
pub mod error;
pub mod events;
mod handle;
pub mod recovery;
mod session_core;

pub use effect::{Effect, TimerKey};
pub use error::SessionError;
pub use events::SessionEvent;
pub use handle::ChatSession;
pub use recovery::{ProviderCredentials, RecoveryCoordinator};
pub use session_core::{SessionCore, SessionSettings};
