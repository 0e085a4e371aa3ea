//! A collection of one object kind kept in step with the server.
//!
//! Items arrive through a paginated `<kind>.list` load and are then kept
//! current by create/update/delete pushes. Pushes that arrive while a load
//! or reload is running are queued and applied, in order, once it ends.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use livesync_shared::{Action, ObjectKind, Pk, ProtocolError};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};
use crate::rpc::RpcClient;
use crate::stores::{CollectionStore, FacetField, Facets, ItemRef};
use crate::ws::{HandlerId, LifecycleEvent, Transport};

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// How a manager talks to the server about its kind.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub kind: ObjectKind,
    pub pk_field: String,
    pub batch_size: usize,
    pub facets: Vec<FacetField>,
    /// Extra parameters sent with every `<kind>.list` page.
    pub list_params: Map<String, Value>,
    /// Reload the collection whenever the transport reopens.
    pub auto_reload: bool,
}

impl ManagerOptions {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            pk_field: "id".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            facets: Vec::new(),
            list_params: Map::new(),
            auto_reload: false,
        }
    }

    pub fn with_pk_field(mut self, pk_field: impl Into<String>) -> Self {
        self.pk_field = pk_field.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_facet(mut self, facet: FacetField) -> Self {
        self.facets.push(facet);
        self
    }

    pub fn with_list_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.list_params.insert(name.into(), value);
        self
    }

    pub fn with_auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = auto_reload;
        self
    }
}

#[derive(Debug)]
struct ManagerState {
    store: CollectionStore,
    loaded: bool,
    ever_loaded: bool,
    loading: bool,
    queue: VecDeque<(Action, Value)>,
    /// Bumped after every successful load or reload.
    generation: u64,
}

impl ManagerState {
    fn drain_queue(&mut self) {
        while let Some((action, data)) = self.queue.pop_front() {
            self.store.apply(action, &data);
        }
    }
}

/// Marks the manager as loading for its lifetime. Dropping it clears the
/// flag and applies every queued push, also when the load failed or its
/// task was cancelled.
struct LoadingGuard<'a> {
    state: &'a Mutex<ManagerState>,
}

impl<'a> LoadingGuard<'a> {
    fn new(state: &'a Mutex<ManagerState>) -> Self {
        state.lock().loading = true;
        Self { state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.loading = false;
        state.drain_queue();
    }
}

pub struct CollectionManager {
    options: ManagerOptions,
    rpc: Arc<dyn RpcClient>,
    state: Mutex<ManagerState>,
    load_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for CollectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CollectionManager")
            .field("kind", &self.options.kind)
            .field("items", &state.store.len())
            .field("loaded", &state.loaded)
            .field("loading", &state.loading)
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl CollectionManager {
    pub fn new(options: ManagerOptions, rpc: Arc<dyn RpcClient>) -> Arc<Self> {
        let store = CollectionStore::new(options.pk_field.clone(), options.facets.clone());
        Arc::new(Self {
            options,
            rpc,
            state: Mutex::new(ManagerState {
                store,
                loaded: false,
                ever_loaded: false,
                loading: false,
                queue: VecDeque::new(),
                generation: 0,
            }),
            load_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn kind(&self) -> ObjectKind {
        self.options.kind
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    /// Whether any load or reload of this manager ever completed.
    pub fn was_loaded(&self) -> bool {
        self.state.lock().ever_loaded
    }

    pub fn len(&self) -> usize {
        self.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().store.is_empty()
    }

    pub fn items(&self) -> Vec<ItemRef> {
        self.state.lock().store.items()
    }

    pub fn get_item_from_list(&self, pk: &Pk) -> Option<ItemRef> {
        self.state.lock().store.get(pk)
    }

    pub fn facets(&self) -> Facets {
        self.state.lock().store.facets().clone()
    }

    pub fn queued_notifications(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Load every item of the kind, one `<kind>.list` page at a time.
    ///
    /// An already loaded manager reloads instead. Concurrent callers share
    /// one load: whoever waits behind a load that succeeded gets its result.
    pub async fn load_items(&self) -> Result<Vec<ItemRef>> {
        let generation = self.state.lock().generation;
        let _load = self.load_lock.lock().await;
        let (finished_meanwhile, loaded) = {
            let state = self.state.lock();
            (state.generation != generation, state.loaded)
        };
        if finished_meanwhile {
            return Ok(self.items());
        }
        if loaded {
            return self.reload_locked().await;
        }

        let loading = LoadingGuard::new(&self.state);
        let result = self.load_pages().await;
        {
            let mut state = self.state.lock();
            if result.is_ok() {
                state.loaded = true;
                state.ever_loaded = true;
                state.generation += 1;
            }
        }
        drop(loading);

        match result {
            Ok(()) => {
                tracing::debug!("loaded {} {} items", self.len(), self.kind());
                Ok(self.items())
            }
            Err(e) => Err(ClientError::load(self.kind(), e)),
        }
    }

    /// Fetch the full collection again and reconcile it with the live items.
    pub async fn reload_items(&self) -> Result<Vec<ItemRef>> {
        let _load = self.load_lock.lock().await;
        self.reload_locked().await
    }

    async fn reload_locked(&self) -> Result<Vec<ItemRef>> {
        let loading = LoadingGuard::new(&self.state);
        let result = self.fetch_all().await;
        if let Ok(fresh) = &result {
            let mut state = self.state.lock();
            state.store.reconcile(fresh.clone());
            state.loaded = true;
            state.ever_loaded = true;
            state.generation += 1;
        }
        drop(loading);

        match result {
            Ok(_) => Ok(self.items()),
            Err(e) => Err(ClientError::load(self.kind(), e)),
        }
    }

    /// Initial load: append each page to the live items as it arrives.
    async fn load_pages(&self) -> Result<()> {
        let mut start = None;
        loop {
            let page = self.fetch_page(start.as_ref()).await?;
            let full = page.len() >= self.options.batch_size;
            let mut state = self.state.lock();
            start = self.last_pk(&state.store, &page)?;
            for data in &page {
                state.store.insert(data);
            }
            if !full || start.is_none() {
                return Ok(());
            }
        }
    }

    /// Reload: gather every page into a scratch listing.
    async fn fetch_all(&self) -> Result<Vec<Value>> {
        let mut fresh = Vec::new();
        let mut start = None;
        loop {
            let page = self.fetch_page(start.as_ref()).await?;
            let full = page.len() >= self.options.batch_size;
            start = self.last_pk(&self.state.lock().store, &page)?;
            fresh.extend(page);
            if !full || start.is_none() {
                return Ok(fresh);
            }
        }
    }

    async fn fetch_page(&self, start: Option<&Pk>) -> Result<Vec<Value>> {
        let mut params = self.options.list_params.clone();
        params.insert("count".to_string(), Value::from(self.options.batch_size));
        if let Some(start) = start {
            params.insert("start".to_string(), start.to_value());
        }
        let result = self
            .rpc
            .call_method(&self.options.kind.method("list"), Value::Object(params))
            .await?;
        match result {
            Value::Array(items) => Ok(items),
            _ => Err(ProtocolError::InvalidField("result").into()),
        }
    }

    fn last_pk(&self, store: &CollectionStore, page: &[Value]) -> Result<Option<Pk>> {
        match page.last() {
            None => Ok(None),
            Some(last) => store
                .pk_of(last)
                .map(Some)
                .ok_or_else(|| ProtocolError::MissingPk(self.options.pk_field.clone()).into()),
        }
    }

    /// Apply a push for this kind, or queue it while a load is running.
    pub fn on_notify(&self, action: Action, data: &Value) {
        let mut state = self.state.lock();
        if state.loading {
            state.queue.push_back((action, data.clone()));
            return;
        }
        state.store.apply(action, data);
    }

    /// A router listener feeding this manager. Holds only a weak reference.
    pub fn notifier(self: &Arc<Self>) -> impl Fn(Action, &Value) + Send + Sync + 'static {
        let manager: Weak<Self> = Arc::downgrade(self);
        move |action, data: &Value| {
            if let Some(manager) = manager.upgrade() {
                manager.on_notify(action, data);
            }
        }
    }

    /// Reload after every reconnect so pushes missed while the socket was
    /// down are picked up. Managers that never loaded are left alone.
    pub fn enable_auto_reload(self: &Arc<Self>, transport: &Transport) -> HandlerId {
        let manager = Arc::downgrade(self);
        transport.register_handler(LifecycleEvent::Open, move |_| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if !manager.was_loaded() {
                return;
            }
            tokio::spawn(async move {
                if let Err(e) = manager.reload_items().await {
                    tracing::warn!("reload of {} after reconnect failed: {}", manager.kind(), e);
                }
            });
        })
    }

    /// Ask the server to create an object. The collection only changes when
    /// the matching push arrives.
    pub async fn create_item(&self, obj: Value) -> Result<Value> {
        self.rpc
            .call_method(&self.options.kind.method("create"), obj)
            .await
    }

    /// Ask the server to update an object. Like create, local state follows
    /// the push.
    pub async fn update_item(&self, obj: Value) -> Result<Value> {
        self.rpc
            .call_method(&self.options.kind.method("update"), obj)
            .await
    }

    /// Ask the server to delete an object by its primary key.
    pub async fn delete_item(&self, obj: &Value) -> Result<Value> {
        let pk = Pk::from_field(obj, &self.options.pk_field)
            .ok_or_else(|| ProtocolError::MissingPk(self.options.pk_field.clone()))?;
        let mut params = Map::new();
        params.insert(self.options.pk_field.clone(), pk.to_value());
        self.rpc
            .call_method(&self.options.kind.method("delete"), Value::Object(params))
            .await
    }

    /// Fetch one object and apply it as an update.
    pub async fn get_item(&self, pk: &Pk) -> Result<Value> {
        let mut params = Map::new();
        params.insert(self.options.pk_field.clone(), pk.to_value());
        let obj = self
            .rpc
            .call_method(&self.options.kind.method("get"), Value::Object(params))
            .await?;
        self.on_notify(Action::Update, &obj);
        Ok(obj)
    }

    pub fn select(&self, pk: &Pk) -> bool {
        self.state.lock().store.select(pk)
    }

    pub fn unselect(&self, pk: &Pk) -> bool {
        self.state.lock().store.unselect(pk)
    }

    pub fn unselect_all(&self) {
        self.state.lock().store.unselect_all();
    }

    pub fn is_selected(&self, pk: &Pk) -> bool {
        self.state.lock().store.is_selected(pk)
    }

    pub fn selected_items(&self) -> Vec<ItemRef> {
        self.state.lock().store.selected_items()
    }

    /// Forget every item. The next `load_items` starts from scratch.
    pub fn clear_items(&self) {
        let mut state = self.state.lock();
        state.store.clear();
        state.queue.clear();
        state.loaded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRpc;
    use serde_json::json;

    fn manager(rpc: &Arc<FakeRpc>) -> Arc<CollectionManager> {
        let options = ManagerOptions::new(ObjectKind::Node).with_facet(FacetField::new("status"));
        CollectionManager::new(options, rpc.clone())
    }

    fn pks(manager: &CollectionManager) -> Vec<Pk> {
        manager
            .items()
            .iter()
            .filter_map(|item| Pk::from_field(&item.read().to_value(), "id"))
            .collect()
    }

    #[tokio::test]
    async fn load_pages_through_the_list_cursor() {
        let rpc = FakeRpc::with_ids(120);
        let manager = manager(&rpc);

        let items = manager.load_items().await.unwrap();

        assert_eq!(items.len(), 120);
        assert!(manager.is_loaded());
        assert!(!manager.is_loading());
        let calls = rpc.calls_to("node.list");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], json!({"count": 50}));
        assert_eq!(calls[1], json!({"count": 50, "start": 50}));
        assert_eq!(calls[2], json!({"count": 50, "start": 100}));
    }

    #[tokio::test]
    async fn list_params_and_batch_size_are_sent_with_every_page() {
        let rpc = FakeRpc::new("id");
        rpc.set_items(
            (1..=5)
                .map(|id| json!({"id": id, "node_id": if id % 2 == 0 { 2 } else { 1 }}))
                .collect(),
        );
        let options = ManagerOptions::new(ObjectKind::Event)
            .with_batch_size(2)
            .with_list_param("node_id", json!(1));
        let manager = CollectionManager::new(options, rpc.clone());

        manager.load_items().await.unwrap();

        assert_eq!(pks(&manager), vec![Pk::Int(1), Pk::Int(3), Pk::Int(5)]);
        let calls = rpc.calls_to("event.list");
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|params| params["node_id"] == json!(1)));
    }

    #[tokio::test]
    async fn delete_received_while_loading_is_applied_after() {
        let rpc = FakeRpc::with_ids(120);
        let manager = manager(&rpc);
        let observer = manager.clone();
        rpc.on_call(move |index, _, _| {
            if index == 1 {
                assert!(observer.is_loading());
                observer.on_notify(Action::Delete, &json!({"id": 7}));
                assert_eq!(observer.queued_notifications(), 1);
            }
        });

        manager.load_items().await.unwrap();

        assert_eq!(manager.len(), 119);
        assert!(manager.get_item_from_list(&Pk::Int(7)).is_none());
        assert_eq!(manager.queued_notifications(), 0);
    }

    #[tokio::test]
    async fn queued_notifications_apply_in_arrival_order() {
        let rpc = FakeRpc::with_ids(10);
        let manager = manager(&rpc);
        let observer = manager.clone();
        rpc.on_call(move |index, _, _| {
            if index == 0 {
                observer.on_notify(Action::Update, &json!({"id": 3, "status": "Commissioning"}));
                observer.on_notify(Action::Create, &json!({"id": 500, "status": "New"}));
                observer.on_notify(Action::Update, &json!({"id": 3, "status": "Ready"}));
                observer.on_notify(Action::Delete, &json!({"id": 500}));
            }
        });

        manager.load_items().await.unwrap();

        let item = manager.get_item_from_list(&Pk::Int(3)).unwrap();
        assert_eq!(item.read().get("status"), Some(&json!("Ready")));
        assert!(manager.get_item_from_list(&Pk::Int(500)).is_none());
        assert_eq!(manager.facets().count("status", &json!("Ready")), 1);
        assert_eq!(manager.facets().total("status"), 1);
    }

    #[tokio::test]
    async fn pushes_during_a_reload_apply_after_the_reconcile() {
        let rpc = FakeRpc::with_ids(120);
        let manager = manager(&rpc);
        manager.load_items().await.unwrap();
        let observer = manager.clone();
        rpc.on_call(move |index, _, _| {
            if index == 3 {
                assert!(observer.is_loading());
                observer.on_notify(Action::Delete, &json!({"id": 7}));
                observer.on_notify(Action::Update, &json!({"id": 8, "status": "Ready"}));
                observer.on_notify(Action::Create, &json!({"id": 500, "status": "Ready"}));
                assert_eq!(observer.queued_notifications(), 3);
            }
        });

        manager.reload_items().await.unwrap();

        assert_eq!(rpc.calls_to("node.list").len(), 6);
        assert_eq!(manager.len(), 120);
        assert!(manager.get_item_from_list(&Pk::Int(7)).is_none());
        assert!(manager.get_item_from_list(&Pk::Int(500)).is_some());
        assert_eq!(manager.facets().count("status", &json!("Ready")), 2);
        assert_eq!(manager.queued_notifications(), 0);
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let rpc = FakeRpc::with_ids(120);
        let manager = manager(&rpc);

        let (a, b) = tokio::join!(manager.load_items(), manager.load_items());

        assert_eq!(a.unwrap().len(), 120);
        assert_eq!(b.unwrap().len(), 120);
        assert_eq!(rpc.calls_to("node.list").len(), 3);
    }

    #[tokio::test]
    async fn reload_keeps_item_handles_and_follows_the_server() {
        let rpc = FakeRpc::with_ids(3);
        let manager = manager(&rpc);
        manager.load_items().await.unwrap();
        let first = manager.items();
        manager.select(&Pk::Int(2));

        manager.reload_items().await.unwrap();
        let second = manager.items();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert!(Arc::ptr_eq(a, b));
        }

        rpc.set_items(vec![
            json!({"id": 1, "status": "Ready"}),
            json!({"id": 3, "name": "item-3"}),
            json!({"id": 4, "name": "item-4"}),
        ]);
        manager.reload_items().await.unwrap();

        assert_eq!(pks(&manager), vec![Pk::Int(1), Pk::Int(3), Pk::Int(4)]);
        assert!(Arc::ptr_eq(&first[0], &manager.items()[0]));
        assert!(manager.selected_items().is_empty());
        assert_eq!(manager.facets().count("status", &json!("Ready")), 1);
    }

    #[tokio::test]
    async fn load_of_a_loaded_manager_reloads() {
        let rpc = FakeRpc::with_ids(3);
        let manager = manager(&rpc);
        manager.load_items().await.unwrap();
        let before = manager.items();

        manager.load_items().await.unwrap();

        assert_eq!(rpc.calls_to("node.list").len(), 2);
        assert!(Arc::ptr_eq(&before[0], &manager.items()[0]));
    }

    #[tokio::test]
    async fn failed_page_keeps_earlier_pages_and_clears_loading() {
        let rpc = FakeRpc::with_ids(120);
        rpc.fail_call(1);
        let manager = manager(&rpc);
        let observer = manager.clone();
        rpc.on_call(move |index, _, _| {
            if index == 1 {
                observer.on_notify(Action::Create, &json!({"id": 900}));
            }
        });

        let err = manager.load_items().await.unwrap_err();

        assert!(matches!(err, ClientError::Load { kind: ObjectKind::Node, .. }));
        assert_eq!(
            err.rpc_payload().map(|payload| payload.to_string()).as_deref(),
            Some("scripted failure")
        );
        assert!(!manager.is_loading());
        assert!(!manager.is_loaded());
        assert_eq!(manager.len(), 51);
        assert_eq!(manager.queued_notifications(), 0);
    }

    #[tokio::test]
    async fn create_update_and_delete_do_not_touch_local_items() {
        let rpc = FakeRpc::with_ids(3);
        rpc.respond("node.create", json!({"id": 4}));
        let manager = manager(&rpc);
        manager.load_items().await.unwrap();

        let created = manager.create_item(json!({"name": "new"})).await.unwrap();
        manager.update_item(json!({"id": 1, "name": "renamed"})).await.unwrap();
        manager.delete_item(&json!({"id": 2, "name": "item-2"})).await.unwrap();

        assert_eq!(created, json!({"id": 4}));
        assert_eq!(manager.len(), 3);
        assert_eq!(
            manager.get_item_from_list(&Pk::Int(1)).unwrap().read().get("name"),
            Some(&json!("item-1"))
        );
        assert_eq!(rpc.calls_to("node.create"), vec![json!({"name": "new"})]);
        assert_eq!(rpc.calls_to("node.delete"), vec![json!({"id": 2})]);
    }

    #[tokio::test]
    async fn delete_without_a_key_is_rejected_locally() {
        let rpc = FakeRpc::new("id");
        let manager = manager(&rpc);

        let err = manager.delete_item(&json!({"name": "x"})).await.unwrap_err();

        assert!(matches!(err, ClientError::Protocol(ProtocolError::MissingPk(_))));
        assert!(rpc.calls().is_empty());
    }

    #[tokio::test]
    async fn get_item_applies_the_fetched_object() {
        let rpc = FakeRpc::with_ids(2);
        rpc.respond("node.get", json!({"id": 1, "name": "fresh", "status": "Ready"}));
        let manager = manager(&rpc);
        manager.load_items().await.unwrap();
        let handle = manager.get_item_from_list(&Pk::Int(1)).unwrap();

        manager.get_item(&Pk::Int(1)).await.unwrap();

        assert_eq!(rpc.calls_to("node.get"), vec![json!({"id": 1})]);
        assert_eq!(handle.read().get("name"), Some(&json!("fresh")));
        assert_eq!(manager.facets().count("status", &json!("Ready")), 1);
    }

    #[tokio::test]
    async fn notifier_holds_the_manager_weakly() {
        let rpc = FakeRpc::new("id");
        let manager = manager(&rpc);
        let notify = manager.notifier();

        notify(Action::Create, &json!({"id": 1, "status": "New"}));
        assert_eq!(manager.len(), 1);

        drop(manager);
        notify(Action::Create, &json!({"id": 2}));
    }

    #[tokio::test]
    async fn clear_items_forgets_everything() {
        let rpc = FakeRpc::with_ids(3);
        let manager = manager(&rpc);
        manager.load_items().await.unwrap();
        manager.select(&Pk::Int(1));

        manager.clear_items();

        assert!(manager.is_empty());
        assert!(!manager.is_loaded());
        assert!(manager.was_loaded());
        assert!(manager.selected_items().is_empty());
        assert_eq!(manager.facets().total("status"), 0);
    }
}
