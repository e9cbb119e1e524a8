//! Per-user session lifecycle: state, registry, reconnection and the
//! supervisor that ties them together.

pub mod error;
pub mod locks;
pub mod reconnect;
pub mod registry;
pub mod state;
pub mod supervisor;

pub use error::{Disconnected, SessionError, SessionStarted};
pub use locks::{UserGuard, UserLocks};
pub use reconnect::{CloseAction, ReconnectPolicy};
pub use registry::{ConnectionHandle, LiveState, Registry};
pub use state::{Artifact, AuthMethod, SessionId, SessionRecord, SessionStatus, UserId};
pub use supervisor::{ConnectionSupervisor, RestoreSummary, SupervisorBuilder};
