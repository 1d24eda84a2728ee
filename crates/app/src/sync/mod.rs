//! Synchronization with remote observers.
//!
//! The server half ([`SyncBroadcaster`]) stamps every hub event with the
//! process instance and a counter and fans it out. The client half
//! ([`Reconciler`]) turns those frames plus two snapshot pulls into a
//! consistent mirror.

mod broadcaster;
mod reconciler;

pub use broadcaster::SyncBroadcaster;
pub use reconciler::{FrameOutcome, Reconciler, SyncError};
