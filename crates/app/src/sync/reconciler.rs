//! Client side of the sync protocol.
//!
//! Frames that arrive before any snapshot are buffered. A refresh pulls the
//! device and service snapshots; both must come from the same server
//! instance, otherwise the refresh is retried. The baseline is the lower of
//! the two counters, so frames already contained in one snapshot but not the
//! other are replayed, which is harmless since applying a frame twice gives
//! the same state.

use std::collections::BTreeMap;

use hearth_domain::device::DeviceIndex;
use hearth_domain::error::HearthError;
use hearth_domain::id::UniqueId;
use hearth_domain::service::ServiceSnapshot;
use hearth_domain::sync::{SyncCursor, SyncFrame, SyncPayload};

use crate::ports::SnapshotSource;

/// What [`Reconciler::accept`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No baseline yet; kept for replay after the next refresh.
    Buffered,
    Applied,
    /// Already reflected in the snapshots.
    Dropped,
    /// The server restarted or frames were missed; a refresh is needed.
    Resync,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("snapshot pull failed")]
    Fetch(#[from] HearthError),

    #[error("snapshots came from different server instances {attempts} times in a row")]
    Inconsistent { attempts: u32 },
}

/// Mirror of a remote hub's services and devices.
#[derive(Debug)]
pub struct Reconciler {
    baseline: Option<SyncCursor>,
    pending: Vec<SyncFrame>,
    services: BTreeMap<UniqueId, ServiceSnapshot>,
    devices: DeviceIndex,
    max_attempts: u32,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Reconciler {
    /// `max_attempts` bounds how many times a refresh retries when the two
    /// pulls disagree on the server instance.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            baseline: None,
            pending: Vec::new(),
            services: BTreeMap::new(),
            devices: DeviceIndex::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    #[must_use]
    pub fn baseline(&self) -> Option<SyncCursor> {
        self.baseline
    }

    #[must_use]
    pub fn services(&self) -> &BTreeMap<UniqueId, ServiceSnapshot> {
        &self.services
    }

    #[must_use]
    pub fn service(&self, id: &UniqueId) -> Option<&ServiceSnapshot> {
        self.services.get(id)
    }

    #[must_use]
    pub fn devices(&self) -> &DeviceIndex {
        &self.devices
    }

    /// Frames waiting for a baseline.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Take one streamed frame.
    pub fn accept(&mut self, frame: SyncFrame) -> FrameOutcome {
        let Some(baseline) = self.baseline else {
            self.pending.push(frame);
            return FrameOutcome::Buffered;
        };
        if frame.instance != baseline.instance {
            tracing::info!(previous = %baseline.instance, current = %frame.instance, "server instance changed");
            return self.invalidate(frame);
        }
        if frame.counter <= baseline.counter {
            return FrameOutcome::Dropped;
        }
        if frame.counter > baseline.counter + 1 {
            tracing::warn!(expected = baseline.counter + 1, received = frame.counter, "missed sync frames");
            return self.invalidate(frame);
        }
        let cursor = frame.cursor();
        self.apply(frame.payload);
        self.baseline = Some(cursor);
        FrameOutcome::Applied
    }

    /// Pull both snapshots, set the baseline and replay buffered frames.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Fetch`] if a pull fails and
    /// [`SyncError::Inconsistent`] when no attempt produced a consistent
    /// pair.
    pub async fn refresh<S: SnapshotSource>(&mut self, source: &S) -> Result<(), SyncError> {
        for attempt in 1..=self.max_attempts {
            let (device_cursor, devices) = source.fetch_devices().await?;
            let (service_cursor, services) = source.fetch_services().await?;
            if device_cursor.instance != service_cursor.instance {
                tracing::warn!(attempt, "snapshots came from different server instances, retrying");
                continue;
            }

            self.services = services;
            self.devices = DeviceIndex::from_devices(devices);
            self.baseline = Some(SyncCursor {
                instance: service_cursor.instance,
                counter: device_cursor.counter.min(service_cursor.counter),
            });

            let mut pending = std::mem::take(&mut self.pending);
            pending.sort_by_key(|frame| frame.counter);
            let mut consistent = true;
            for frame in pending {
                if !consistent {
                    self.pending.push(frame);
                } else if self.accept(frame) == FrameOutcome::Resync {
                    consistent = false;
                }
            }
            if consistent {
                tracing::debug!(baseline = ?self.baseline, services = self.services.len(), "mirror refreshed");
                return Ok(());
            }
        }
        Err(SyncError::Inconsistent {
            attempts: self.max_attempts,
        })
    }

    /// [`accept`](Self::accept) a frame and refresh when it asks for it.
    ///
    /// # Errors
    ///
    /// Propagates [`refresh`](Self::refresh) failures.
    pub async fn handle<S: SnapshotSource>(
        &mut self,
        frame: SyncFrame,
        source: &S,
    ) -> Result<FrameOutcome, SyncError> {
        let outcome = self.accept(frame);
        if outcome == FrameOutcome::Resync {
            self.refresh(source).await?;
        }
        Ok(outcome)
    }

    fn invalidate(&mut self, frame: SyncFrame) -> FrameOutcome {
        self.baseline = None;
        self.pending.clear();
        self.pending.push(frame);
        FrameOutcome::Resync
    }

    fn apply(&mut self, payload: SyncPayload) {
        match payload {
            SyncPayload::Register { id, service } => {
                self.services.insert(id, service);
            }
            SyncPayload::Unregister { id } => {
                self.services.remove(&id);
                self.devices.remove_service(&id);
            }
            SyncPayload::Identifier { id, identifier } => {
                if let Some(service) = self.services.get_mut(&id) {
                    let text = identifier.to_string();
                    if !service.identifiers.contains(&text) {
                        service.identifiers.push(text);
                    }
                }
                self.devices.apply(&id, &identifier);
            }
            SyncPayload::Update { id, key, value, .. } => {
                if let Some(service) = self.services.get_mut(&id) {
                    service.values.insert(key, value);
                }
            }
            SyncPayload::Event { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_domain::device::Device;
    use hearth_domain::id::InstanceId;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Pull<T> = (SyncCursor, T);

    /// Hands out scripted snapshot pairs, one per pull.
    #[derive(Default)]
    struct Scripted {
        services: Mutex<VecDeque<Pull<BTreeMap<UniqueId, ServiceSnapshot>>>>,
        devices: Mutex<VecDeque<Pull<Vec<Device>>>>,
    }

    impl Scripted {
        fn push(&self, devices: SyncCursor, services: SyncCursor) {
            self.devices.lock().unwrap().push_back((devices, Vec::new()));
            self.services
                .lock()
                .unwrap()
                .push_back((services, light_snapshot()));
        }
    }

    impl SnapshotSource for Scripted {
        async fn fetch_services(
            &self,
        ) -> Result<(SyncCursor, BTreeMap<UniqueId, ServiceSnapshot>), HearthError> {
            self.services
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| HearthError::backend("no more snapshots"))
        }

        async fn fetch_devices(&self) -> Result<(SyncCursor, Vec<Device>), HearthError> {
            self.devices
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| HearthError::backend("no more snapshots"))
        }
    }

    fn light() -> UniqueId {
        UniqueId::new("virtual", "light")
    }

    fn light_snapshot() -> BTreeMap<UniqueId, ServiceSnapshot> {
        let mut snapshot = ServiceSnapshot {
            name: "Light".to_string(),
            ..ServiceSnapshot::default()
        };
        snapshot.values.insert("level".to_string(), json!(0));
        BTreeMap::from([(light(), snapshot)])
    }

    fn cursor(instance: InstanceId, counter: u64) -> SyncCursor {
        SyncCursor { instance, counter }
    }

    fn level(instance: InstanceId, counter: u64) -> SyncFrame {
        SyncFrame {
            instance,
            counter,
            payload: SyncPayload::Update {
                id: light(),
                key: "level".to_string(),
                value: json!(counter),
                old_value: None,
            },
        }
    }

    fn level_of(reconciler: &Reconciler) -> serde_json::Value {
        reconciler.service(&light()).unwrap().values["level"].clone()
    }

    #[tokio::test]
    async fn should_replay_buffered_frames_above_baseline_in_order() {
        let x = InstanceId::new();
        let source = Scripted::default();
        source.push(cursor(x, 10), cursor(x, 10));
        let mut reconciler = Reconciler::default();

        assert_eq!(reconciler.accept(level(x, 12)), FrameOutcome::Buffered);
        assert_eq!(reconciler.accept(level(x, 9)), FrameOutcome::Buffered);
        assert_eq!(reconciler.accept(level(x, 11)), FrameOutcome::Buffered);
        reconciler.refresh(&source).await.unwrap();

        assert_eq!(reconciler.baseline(), Some(cursor(x, 12)));
        assert_eq!(level_of(&reconciler), json!(12));
        assert_eq!(reconciler.pending(), 0);
    }

    #[tokio::test]
    async fn should_drop_frames_at_or_below_baseline() {
        let x = InstanceId::new();
        let source = Scripted::default();
        source.push(cursor(x, 10), cursor(x, 10));
        let mut reconciler = Reconciler::default();
        reconciler.refresh(&source).await.unwrap();

        assert_eq!(reconciler.accept(level(x, 9)), FrameOutcome::Dropped);
        assert_eq!(reconciler.accept(level(x, 10)), FrameOutcome::Dropped);
        assert_eq!(level_of(&reconciler), json!(0));
        assert_eq!(reconciler.accept(level(x, 11)), FrameOutcome::Applied);
        assert_eq!(level_of(&reconciler), json!(11));
    }

    #[tokio::test]
    async fn should_take_lower_counter_as_baseline() {
        let x = InstanceId::new();
        let source = Scripted::default();
        source.push(cursor(x, 7), cursor(x, 9));
        let mut reconciler = Reconciler::default();
        reconciler.refresh(&source).await.unwrap();
        assert_eq!(reconciler.baseline(), Some(cursor(x, 7)));
    }

    #[tokio::test]
    async fn should_resync_when_instance_changes() {
        let x = InstanceId::new();
        let y = InstanceId::new();
        let source = Scripted::default();
        source.push(cursor(x, 10), cursor(x, 10));
        source.push(cursor(y, 3), cursor(y, 3));
        let mut reconciler = Reconciler::default();
        reconciler.refresh(&source).await.unwrap();

        let outcome = reconciler.handle(level(y, 4), &source).await.unwrap();

        assert_eq!(outcome, FrameOutcome::Resync);
        assert_eq!(reconciler.baseline(), Some(cursor(y, 4)));
        assert_eq!(level_of(&reconciler), json!(4));
    }

    #[tokio::test]
    async fn should_retry_when_pulls_hit_different_instances() {
        let x = InstanceId::new();
        let y = InstanceId::new();
        let source = Scripted::default();
        source.push(cursor(x, 5), cursor(y, 1));
        source.push(cursor(y, 1), cursor(y, 1));
        let mut reconciler = Reconciler::default();

        reconciler.refresh(&source).await.unwrap();

        assert_eq!(reconciler.baseline(), Some(cursor(y, 1)));
    }

    #[tokio::test]
    async fn should_give_up_after_max_attempts() {
        let source = Scripted::default();
        source.push(cursor(InstanceId::new(), 1), cursor(InstanceId::new(), 1));
        source.push(cursor(InstanceId::new(), 1), cursor(InstanceId::new(), 1));
        let mut reconciler = Reconciler::new(2);

        let err = reconciler.refresh(&source).await.unwrap_err();

        assert!(matches!(err, SyncError::Inconsistent { attempts: 2 }));
        assert_eq!(reconciler.baseline(), None);
    }

    #[tokio::test]
    async fn should_ask_for_resync_on_gap() {
        let x = InstanceId::new();
        let source = Scripted::default();
        source.push(cursor(x, 10), cursor(x, 10));
        let mut reconciler = Reconciler::default();
        reconciler.refresh(&source).await.unwrap();

        assert_eq!(reconciler.accept(level(x, 13)), FrameOutcome::Resync);
        assert_eq!(reconciler.baseline(), None);
        assert_eq!(reconciler.pending(), 1);
    }

    #[tokio::test]
    async fn should_mirror_device_membership_from_identifier_frames() {
        let x = InstanceId::new();
        let source = Scripted::default();
        source.push(cursor(x, 0), cursor(x, 0));
        let mut reconciler = Reconciler::default();
        reconciler.refresh(&source).await.unwrap();

        let frame = SyncFrame {
            instance: x,
            counter: 1,
            payload: SyncPayload::Identifier {
                id: light(),
                identifier: "mac:aa".parse().unwrap(),
            },
        };
        assert_eq!(reconciler.accept(frame), FrameOutcome::Applied);

        let device = reconciler.devices().device_of(&light()).unwrap();
        assert!(device.identifiers.contains(&"mac:aa".parse().unwrap()));
        assert_eq!(
            reconciler.service(&light()).unwrap().identifiers,
            vec!["mac:aa".to_string()]
        );
    }
}
