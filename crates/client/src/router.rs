//! Fan-out of server pushes to the listeners registered per object kind.

use std::collections::HashMap;
use std::sync::Arc;

use livesync_shared::{Action, Notify, ObjectKind, ProtocolError};
use parking_lot::Mutex;
use serde_json::Value;

pub type Notifier = Arc<dyn Fn(Action, &Value) + Send + Sync>;

/// Token returned by [`NotificationRouter::register_notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifierId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_kind: HashMap<ObjectKind, Vec<(NotifierId, Notifier)>>,
}

/// Dispatches notify frames by object kind.
///
/// Listeners are called synchronously on the task that read the frame, in
/// registration order, so pushes reach a manager in the order the server
/// sent them.
#[derive(Default)]
pub struct NotificationRouter {
    listeners: Mutex<Listeners>,
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock();
        let counts: HashMap<_, _> = listeners
            .by_kind
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("NotificationRouter")
            .field("listeners", &counts)
            .finish()
    }
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_notifier(
        &self,
        kind: ObjectKind,
        notifier: impl Fn(Action, &Value) + Send + Sync + 'static,
    ) -> NotifierId {
        let mut listeners = self.listeners.lock();
        listeners.next_id += 1;
        let id = NotifierId(listeners.next_id);
        listeners
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(notifier)));
        tracing::debug!("registered notifier {:?} for {}", id, kind);
        id
    }

    /// Register by wire name. Unknown names fail here rather than never
    /// firing.
    pub fn register_notifier_by_name(
        &self,
        name: &str,
        notifier: impl Fn(Action, &Value) + Send + Sync + 'static,
    ) -> Result<NotifierId, ProtocolError> {
        let kind = name.parse::<ObjectKind>()?;
        Ok(self.register_notifier(kind, notifier))
    }

    pub fn unregister_notifier(&self, kind: ObjectKind, id: NotifierId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = before != list.len();
        if list.is_empty() {
            listeners.by_kind.remove(&kind);
        }
        removed
    }

    pub fn listener_count(&self, kind: ObjectKind) -> usize {
        self.listeners
            .lock()
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Route a decoded notify frame. Pushes for kinds this client does not
    /// know are ignored.
    pub fn on_notify(&self, notify: &Notify) {
        match notify.kind() {
            Ok(kind) => self.dispatch(kind, notify.action, &notify.data),
            Err(_) => tracing::debug!("ignoring notify for unknown kind {:?}", notify.name),
        }
    }

    pub fn dispatch(&self, kind: ObjectKind, action: Action, data: &Value) {
        let targets: Vec<Notifier> = {
            let listeners = self.listeners.lock();
            match listeners.by_kind.get(&kind) {
                Some(list) => list.iter().map(|(_, n)| n.clone()).collect(),
                None => Vec::new(),
            }
        };
        if targets.is_empty() {
            tracing::debug!("no listeners for {} {}", kind, action);
            return;
        }
        for notifier in targets {
            notifier(action, data);
        }
    }
}
