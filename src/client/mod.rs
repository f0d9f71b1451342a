//! Task client: session gate, task manager and the backends behind them.

pub mod backend;
pub mod error;
pub mod feed;
pub mod memory;
pub mod mirror;
pub mod postgres;
pub mod rest;
pub mod session;
pub mod tasks;

pub use backend::{
    AuthEvent, AuthEventKind, AuthProvider, AuthUser, ObjectStore, Realtime, Session, TaskTable,
    UploadOptions,
};
pub use error::{AuthError, AuthErrorKind, ClientError, UploadError};
pub use feed::{AuthSubscription, ChangeFeed, ChangeKind, EventFilter, RawChange};
pub use memory::MemoryBackend;
pub use mirror::{TaskChange, TaskMirror};
pub use postgres::{PgRealtime, PgTaskTable};
pub use rest::{RestAuth, RestStorage};
pub use session::{Screen, SessionController, SessionState, SignUpOutcome};
pub use tasks::{derive_object_path, ImageFile, TaskBackends, TaskManager, TaskManagerConfig};
