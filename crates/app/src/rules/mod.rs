//! Rules — reactive bodies re-executed when what they read changes.
//!
//! A rule's lifecycle: `idle → executing → (idle | scheduled)`, until it is
//! unloaded. Each execution starts by undoing the previous one (timer,
//! handlers, sub-rules) and ends by applying the effects the body collected.
//! Constraints are diffed instead of undone: a claim repeated on the next
//! run stays in place, one that is not is released.

mod context;
mod script;

pub use context::{RuleBody, RuleContext, rule_fn};
pub use script::ScriptRule;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hearth_domain::event::HubEvent;
use hearth_domain::id::{DeviceKey, HandleId, RuleId, UniqueId};
use hearth_domain::time::{Timestamp, now};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::hub::Hub;
use context::{Effects, Watches};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where a rule is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    Idle,
    Executing,
    Scheduled,
}

/// Read-only view of a loaded rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    pub id: RuleId,
    pub name: String,
    pub enabled: bool,
    pub state: RuleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<RuleId>,
    pub runs: u64,
    pub watches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct RuleEntry {
    seq: u64,
    name: String,
    body: Arc<dyn RuleBody>,
    handle: HandleId,
    parent: Option<RuleId>,
    enabled: bool,
    state: RuleState,
    watches: Watches,
    constraints: HashSet<(UniqueId, String)>,
    handlers: Vec<(UniqueId, String)>,
    children: Vec<RuleId>,
    timer: Option<AbortHandle>,
    runs: u64,
    last_run: Option<Timestamp>,
    last_error: Option<String>,
}

impl RuleEntry {
    fn info(&self, id: RuleId) -> RuleInfo {
        RuleInfo {
            id,
            name: self.name.clone(),
            enabled: self.enabled,
            state: self.state,
            parent: self.parent,
            runs: self.runs,
            watches: self.watches.len(),
            last_run: self.last_run,
            last_error: self.last_error.clone(),
        }
    }
}

/// What an execution needs, taken out of the entry under the lock.
struct Prepared {
    name: String,
    body: Arc<dyn RuleBody>,
    handle: HandleId,
    previous_constraints: HashSet<(UniqueId, String)>,
    previous_handlers: Vec<(UniqueId, String)>,
    previous_children: Vec<RuleId>,
}

/// Every loaded rule.
pub struct Rules {
    entries: Mutex<HashMap<RuleId, RuleEntry>>,
    next_seq: AtomicU64,
    wake: mpsc::UnboundedSender<RuleId>,
}

impl std::fmt::Debug for Rules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rules")
            .field("loaded", &self.entries().len())
            .finish_non_exhaustive()
    }
}

impl Rules {
    pub(crate) fn new(wake: mpsc::UnboundedSender<RuleId>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            wake,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RuleId, RuleEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a rule without running it.
    pub(crate) fn insert(
        &self,
        name: impl Into<String>,
        body: Arc<dyn RuleBody>,
        parent: Option<RuleId>,
        enabled: bool,
    ) -> RuleId {
        let id = RuleId::new();
        let entry = RuleEntry {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            body,
            handle: HandleId::new(),
            parent,
            enabled,
            state: RuleState::Idle,
            watches: Watches::default(),
            constraints: HashSet::new(),
            handlers: Vec::new(),
            children: Vec::new(),
            timer: None,
            runs: 0,
            last_run: None,
            last_error: None,
        };
        let mut entries = self.entries();
        if let Some(parent) = parent.and_then(|p| entries.get_mut(&p)) {
            parent.children.push(id);
        }
        entries.insert(id, entry);
        id
    }

    /// Queue an execution on the hub loop.
    pub(crate) fn wake(&self, id: RuleId) {
        if self.wake.send(id).is_err() {
            tracing::debug!(rule = %id, "hub loop gone, dropping rule wake-up");
        }
    }

    #[must_use]
    pub fn info(&self, id: RuleId) -> Option<RuleInfo> {
        self.entries().get(&id).map(|e| e.info(id))
    }

    /// Loaded rules in load order.
    #[must_use]
    pub fn list(&self) -> Vec<RuleInfo> {
        let entries = self.entries();
        let mut rules: Vec<_> = entries.iter().collect();
        rules.sort_by_key(|(_, e)| e.seq);
        rules.into_iter().map(|(id, e)| e.info(*id)).collect()
    }

    pub(crate) fn ids(&self) -> Vec<RuleId> {
        self.list().into_iter().map(|r| r.id).collect()
    }

    /// Enable or disable a rule and its sub-rules. Disabling keeps watches,
    /// claims and any pending timer; executions are skipped until the rule
    /// is enabled again, at which point it runs. Returns `false` if the rule
    /// is unknown.
    pub fn set_enabled(&self, id: RuleId, enabled: bool) -> bool {
        let was_enabled = {
            let mut entries = self.entries();
            let Some(was_enabled) = entries.get(&id).map(|e| e.enabled) else {
                return false;
            };
            let mut stack = vec![id];
            while let Some(current) = stack.pop() {
                if let Some(entry) = entries.get_mut(&current) {
                    entry.enabled = enabled;
                    stack.extend(entry.children.iter().copied());
                }
            }
            was_enabled
        };
        if enabled && !was_enabled {
            self.wake(id);
        }
        true
    }

    /// Enabled rules whose watches match the event, in load order.
    pub(crate) fn matching(&self, event: &HubEvent, changed_device: Option<&DeviceKey>) -> Vec<RuleId> {
        let entries = self.entries();
        let mut matched: Vec<_> = entries
            .iter()
            .filter(|(_, e)| e.enabled && e.watches.matches(event, changed_device))
            .map(|(id, e)| (e.seq, *id))
            .collect();
        matched.sort_unstable();
        matched.into_iter().map(|(_, id)| id).collect()
    }

    fn begin(&self, id: RuleId) -> Option<Prepared> {
        let mut entries = self.entries();
        let entry = entries.get_mut(&id)?;
        if !entry.enabled {
            tracing::debug!(rule = %entry.name, "rule disabled, skipping execution");
            if entry.timer.as_ref().is_some_and(AbortHandle::is_finished) {
                entry.timer = None;
                entry.state = RuleState::Idle;
            }
            return None;
        }
        entry.state = RuleState::Executing;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        entry.watches = Watches::default();
        Some(Prepared {
            name: entry.name.clone(),
            body: Arc::clone(&entry.body),
            handle: entry.handle,
            previous_constraints: std::mem::take(&mut entry.constraints),
            previous_handlers: std::mem::take(&mut entry.handlers),
            previous_children: std::mem::take(&mut entry.children),
        })
    }

    /// Run a rule's body and apply its effects.
    pub(crate) fn execute<'a>(&'a self, hub: &'a Hub, id: RuleId) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(prepared) = self.begin(id) else {
                return;
            };
            let Prepared {
                name,
                body,
                handle,
                previous_constraints,
                previous_handlers,
                previous_children,
            } = prepared;

            for (service, key) in &previous_handlers {
                hub.handlers().remove(service, key, handle);
            }
            for child in previous_children {
                self.unload(hub, child).await;
            }

            let mut ctx = RuleContext::new(id, &name, hub.registry(), hub.devices());
            let result = body.run(&mut ctx);
            let (watches, effects) = ctx.finish();
            let last_error = match result {
                Ok(()) => None,
                Err(err) => {
                    tracing::error!(rule = %name, error = %err.message(), "rule body failed");
                    Some(err.message())
                }
            };
            let Effects {
                constraints: claims,
                writes,
                triggers,
                handlers,
                next_run,
                sub_rules,
                unload,
            } = effects;

            let mut installed = Vec::with_capacity(handlers.len());
            for (service, key, handler) in handlers {
                hub.handlers().add(&service, &key, handle, handler);
                installed.push((service, key));
            }

            let mut claimed = HashSet::with_capacity(claims.len());
            for claim in claims {
                if let Err(err) = hub
                    .constrain(&claim.service, &claim.key, handle, claim.priority, claim.value)
                    .await
                {
                    tracing::warn!(rule = %name, service = %claim.service, key = %claim.key, error = %err.message(), "constraint write failed");
                }
                claimed.insert((claim.service, claim.key));
            }

            {
                let mut entries = self.entries();
                if let Some(entry) = entries.get_mut(&id) {
                    entry.watches = watches;
                    entry.handlers = installed;
                    entry.constraints = claimed.clone();
                    entry.runs += 1;
                    entry.last_run = Some(now());
                    entry.last_error = last_error;
                }
            }

            for (service, key) in previous_constraints.difference(&claimed) {
                if let Err(err) = hub.release(service, key, handle).await {
                    tracing::warn!(rule = %name, service = %service, key, error = %err.message(), "constraint release failed");
                }
            }

            for write in writes {
                if let Err(err) = hub.write(&write.service, &write.key, write.value).await {
                    tracing::warn!(rule = %name, service = %write.service, key = %write.key, error = %err.message(), "rule write failed");
                }
            }
            for trigger in triggers {
                if let Err(err) = hub
                    .trigger_action(&trigger.service, &trigger.key, trigger.value)
                    .await
                {
                    tracing::warn!(rule = %name, service = %trigger.service, action = %trigger.key, error = %err.message(), "rule action failed");
                }
            }

            for (child_name, child_body) in sub_rules {
                let child = self.insert(child_name, child_body, Some(id), true);
                self.execute(hub, child).await;
            }

            if unload {
                self.unload(hub, id).await;
                return;
            }

            let mut entries = self.entries();
            if let Some(entry) = entries.get_mut(&id) {
                match next_run {
                    Some(at) => {
                        let wake = self.wake.clone();
                        let timer = tokio::spawn(async move {
                            tokio::time::sleep_until(at).await;
                            if wake.send(id).is_err() {
                                tracing::debug!(rule = %id, "hub loop gone, timer dropped");
                            }
                        });
                        entry.timer = Some(timer.abort_handle());
                        entry.state = RuleState::Scheduled;
                    }
                    None => entry.state = RuleState::Idle,
                }
            }
            tracing::debug!(rule = %name, "rule executed");
        })
    }

    /// Remove a rule: cancel its timer, drop its handlers, unload its
    /// sub-rules and release its constraints. Returns `false` if unknown.
    pub(crate) fn unload<'a>(&'a self, hub: &'a Hub, id: RuleId) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let entry = {
                let mut entries = self.entries();
                let Some(entry) = entries.remove(&id) else {
                    return false;
                };
                if let Some(timer) = &entry.timer {
                    timer.abort();
                }
                if let Some(parent) = entry.parent.and_then(|p| entries.get_mut(&p)) {
                    parent.children.retain(|child| *child != id);
                }
                entry
            };

            for (service, key) in &entry.handlers {
                hub.handlers().remove(service, key, entry.handle);
            }
            for child in entry.children {
                self.unload(hub, child).await;
            }
            for (service, key) in &entry.constraints {
                if let Err(err) = hub.release(service, key, entry.handle).await {
                    tracing::warn!(rule = %entry.name, service = %service, key, error = %err.message(), "constraint release failed");
                }
            }
            tracing::info!(rule = %entry.name, "rule unloaded");
            true
        })
    }
}
