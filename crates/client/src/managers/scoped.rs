//! Per-scope managers for kinds that only make sense under a parent object,
//! such as the results or events of one node.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use livesync_shared::{Action, ObjectKind, Pk};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::collection::{CollectionManager, ManagerOptions};
use crate::error::Result;
use crate::rpc::RpcClient;

#[derive(Debug, Clone)]
pub struct ScopedOptions {
    /// Options every child starts from. The scope is added to its list
    /// parameters.
    pub manager: ManagerOptions,
    /// List and clear parameter carrying the scope id.
    pub scope_param: String,
    /// Field of a pushed object naming its scope.
    pub scope_field: String,
}

impl ScopedOptions {
    pub fn new(
        manager: ManagerOptions,
        scope_param: impl Into<String>,
        scope_field: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            scope_param: scope_param.into(),
            scope_field: scope_field.into(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.manager.kind
    }
}

/// Creates, tracks and tears down one [`CollectionManager`] per scope, and
/// fans pushes for the kind out to the matching child.
pub struct ScopedManagerFactory {
    options: ScopedOptions,
    rpc: Arc<dyn RpcClient>,
    managers: Mutex<IndexMap<Pk, Arc<CollectionManager>>>,
}

impl std::fmt::Debug for ScopedManagerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedManagerFactory")
            .field("kind", &self.options.kind())
            .field("scopes", &self.managers.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ScopedManagerFactory {
    pub fn new(options: ScopedOptions, rpc: Arc<dyn RpcClient>) -> Arc<Self> {
        Arc::new(Self {
            options,
            rpc,
            managers: Mutex::new(IndexMap::new()),
        })
    }

    pub fn kind(&self) -> ObjectKind {
        self.options.kind()
    }

    pub fn len(&self) -> usize {
        self.managers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.lock().is_empty()
    }

    pub fn managers(&self) -> Vec<Arc<CollectionManager>> {
        self.managers.lock().values().cloned().collect()
    }

    /// The live manager for `scope`, if one was created.
    pub fn lookup(&self, scope: &Pk) -> Option<Arc<CollectionManager>> {
        self.managers.lock().get(scope).cloned()
    }

    /// The manager for `scope`, created on first use.
    pub fn get_manager(&self, scope: impl Into<Pk>) -> Arc<CollectionManager> {
        let scope = scope.into();
        let mut managers = self.managers.lock();
        if let Some(manager) = managers.get(&scope) {
            return manager.clone();
        }
        let options = self
            .options
            .manager
            .clone()
            .with_list_param(self.options.scope_param.clone(), scope.to_value());
        let manager = CollectionManager::new(options, self.rpc.clone());
        tracing::debug!("created {} manager for scope {}", self.kind(), scope);
        managers.insert(scope, manager.clone());
        manager
    }

    /// Drop a child. When it was ever loaded the server is told, through
    /// `<kind>.clear`, to stop tracking the scope.
    pub async fn destroy_manager(&self, manager: &Arc<CollectionManager>) -> Result<()> {
        let scope = {
            let mut managers = self.managers.lock();
            let Some(index) = managers.values().position(|m| Arc::ptr_eq(m, manager)) else {
                return Ok(());
            };
            managers.shift_remove_index(index).map(|(scope, _)| scope)
        };
        let Some(scope) = scope else {
            return Ok(());
        };
        manager.clear_items();
        if !manager.was_loaded() {
            return Ok(());
        }
        let mut params = Map::new();
        params.insert(self.options.scope_param.clone(), scope.to_value());
        self.rpc
            .call_method(&self.kind().method("clear"), Value::Object(params))
            .await?;
        Ok(())
    }

    /// Route a push to the child owning its scope. Deletes that name no
    /// scope go to every child; a key lives in at most one of them.
    pub fn on_notify(&self, action: Action, data: &Value) {
        let scope = Pk::from_field(data, &self.options.scope_field);
        let targets: Vec<Arc<CollectionManager>> = {
            let managers = self.managers.lock();
            match (&scope, action) {
                (Some(scope), _) => managers.get(scope).cloned().into_iter().collect(),
                (None, Action::Delete) => managers.values().cloned().collect(),
                (None, _) => {
                    tracing::debug!(
                        "{} {} without {:?}, ignored",
                        self.kind(),
                        action,
                        self.options.scope_field
                    );
                    Vec::new()
                }
            }
        };
        for manager in targets {
            manager.on_notify(action, data);
        }
    }

    /// A router listener feeding this factory. Holds only a weak reference.
    pub fn notifier(self: &Arc<Self>) -> impl Fn(Action, &Value) + Send + Sync + 'static {
        let factory: Weak<Self> = Arc::downgrade(self);
        move |action, data: &Value| {
            if let Some(factory) = factory.upgrade() {
                factory.on_notify(action, data);
            }
        }
    }

    /// Drop every child without telling the server.
    pub fn clear(&self) {
        for (_, manager) in self.managers.lock().drain(..) {
            manager.clear_items();
        }
    }
}
