//! Server side of the sync protocol, backed by a tokio broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};

use hearth_domain::event::HubEvent;
use hearth_domain::id::InstanceId;
use hearth_domain::service::ServiceSnapshot;
use hearth_domain::sync::{SyncCursor, SyncFrame, SyncPayload};
use tokio::sync::broadcast;

/// Fans out [`SyncFrame`]s.
///
/// Broadcasting succeeds even when nobody listens (the frame is simply
/// dropped). A subscriber only sees frames sent after it subscribed.
#[derive(Debug)]
pub struct SyncBroadcaster {
    instance: InstanceId,
    counter: AtomicU64,
    sender: broadcast::Sender<SyncFrame>,
}

impl SyncBroadcaster {
    /// Create a broadcaster with a fresh instance id.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            instance: InstanceId::new(),
            counter: AtomicU64::new(0),
            sender,
        }
    }

    #[must_use]
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Position of the last frame sent.
    #[must_use]
    pub fn cursor(&self) -> SyncCursor {
        SyncCursor {
            instance: self.instance,
            counter: self.counter.load(Ordering::SeqCst),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncFrame> {
        self.sender.subscribe()
    }

    /// Stamp and send one event. `snapshot` is the service description for
    /// `register` events.
    pub fn broadcast(&self, event: &HubEvent, snapshot: Option<ServiceSnapshot>) -> SyncFrame {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = SyncFrame {
            instance: self.instance,
            counter,
            payload: SyncPayload::from_event(event, snapshot),
        };
        // send fails only when there are no receivers
        let _ = self.sender.send(frame.clone());
        frame
    }
}
