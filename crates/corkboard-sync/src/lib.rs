//! Board synchronization engine.
//!
//! Keeps one client's view of a board consistent with the user's drag
//! gestures, optimistic moves sent to the backend, and push notifications
//! about other users' changes.

pub mod drag;
pub mod error;
pub mod events;
pub mod push;
pub mod reconcile;
pub mod service;
pub mod session;
pub mod state;

pub use drag::{DragMachine, DragOutcome, DragSubject, HitTest, Point};
pub use error::{PushError, SyncError};
pub use events::{Invalidation, PushEvent};
pub use push::{ChannelEvent, ChannelStatus, PushChannel, NORMAL_CLOSURE, POLICY_VIOLATION};
pub use reconcile::{Effect, PendingMutation, Reconciler, RequestId};
pub use service::SyncMessage;
pub use session::{BoardSession, PushSettings, SessionEvent};
pub use state::{BoardState, ColumnState, Placement};
