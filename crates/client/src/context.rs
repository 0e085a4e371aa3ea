//! The client's registry: one transport, one router, and the managers fed
//! by them. Built once at startup and torn down with [`ClientContext::shutdown`].

use std::collections::HashMap;
use std::sync::Arc;

use livesync_shared::ObjectKind;
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::managers::{
    CollectionManager, ManagerOptions, PollingManager, PollingOptions, ScopedManagerFactory,
    ScopedOptions,
};
use crate::router::{NotificationRouter, NotifierId};
use crate::rpc::RpcClient;
use crate::ws::{HandlerId, LifecycleEvent, Transport};

struct Registered<T> {
    value: Arc<T>,
    notifier: NotifierId,
    reload: Option<HandlerId>,
}

#[derive(Default)]
struct Registry {
    managers: HashMap<ObjectKind, Registered<CollectionManager>>,
    scoped: HashMap<ObjectKind, Registered<ScopedManagerFactory>>,
    pollers: HashMap<ObjectKind, Arc<PollingManager>>,
}

pub struct ClientContext {
    transport: Transport,
    router: Arc<NotificationRouter>,
    rpc: Arc<dyn RpcClient>,
    registry: Mutex<Registry>,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("ClientContext")
            .field("state", &self.transport.state())
            .field("managers", &registry.managers.keys().collect::<Vec<_>>())
            .field("scoped", &registry.scoped.keys().collect::<Vec<_>>())
            .field("pollers", &registry.pollers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ClientContext {
    pub fn new(config: ClientConfig) -> Self {
        let router = Arc::new(NotificationRouter::new());
        let transport = Transport::new(config, router.clone());
        let rpc: Arc<dyn RpcClient> = Arc::new(transport.clone());
        Self {
            transport,
            router,
            rpc,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// Open the socket and wait until it is usable.
    pub async fn connect(&self) -> Result<()> {
        self.transport.default_connect().await
    }

    /// The push-fed manager for `kind`, built with the kind's defaults on
    /// first use.
    pub fn manager(&self, kind: ObjectKind) -> Arc<CollectionManager> {
        self.manager_with(ManagerOptions::new(kind).with_pk_field(kind.default_pk_field()))
    }

    /// The push-fed manager for `options.kind`. Options only apply when the
    /// manager does not exist yet.
    pub fn manager_with(&self, options: ManagerOptions) -> Arc<CollectionManager> {
        let kind = options.kind;
        let mut registry = self.registry.lock();
        if let Some(existing) = registry.managers.get(&kind) {
            return existing.value.clone();
        }
        let auto_reload = options.auto_reload;
        let manager = CollectionManager::new(options, self.rpc.clone());
        let notifier = self.router.register_notifier(kind, manager.notifier());
        let reload = auto_reload.then(|| manager.enable_auto_reload(&self.transport));
        registry.managers.insert(
            kind,
            Registered {
                value: manager.clone(),
                notifier,
                reload,
            },
        );
        manager
    }

    /// The scoped factory for `options.kind`, the kind's only push listener
    /// besides a plain manager registered for the same kind.
    pub fn scoped_factory(&self, options: ScopedOptions) -> Arc<ScopedManagerFactory> {
        let kind = options.kind();
        let mut registry = self.registry.lock();
        if let Some(existing) = registry.scoped.get(&kind) {
            return existing.value.clone();
        }
        let factory = ScopedManagerFactory::new(options, self.rpc.clone());
        let notifier = self.router.register_notifier(kind, factory.notifier());
        registry.scoped.insert(
            kind,
            Registered {
                value: factory.clone(),
                notifier,
                reload: None,
            },
        );
        factory
    }

    /// A timer-refreshed manager for `options.kind`. It does not listen to
    /// pushes.
    pub fn polling_manager(
        &self,
        options: ManagerOptions,
        polling: PollingOptions,
    ) -> Arc<PollingManager> {
        let kind = options.kind;
        let mut registry = self.registry.lock();
        registry
            .pollers
            .entry(kind)
            .or_insert_with(|| {
                PollingManager::new(CollectionManager::new(options, self.rpc.clone()), polling)
            })
            .clone()
    }

    /// Stop polling, detach every manager from the router and transport,
    /// drop their items and close the socket.
    pub fn shutdown(&self) {
        let registry = std::mem::take(&mut *self.registry.lock());

        for poller in registry.pollers.values() {
            poller.stop_polling();
            poller.manager().clear_items();
        }
        for (kind, registered) in &registry.managers {
            self.router.unregister_notifier(*kind, registered.notifier);
            if let Some(id) = registered.reload {
                self.transport.unregister_handler(LifecycleEvent::Open, id);
            }
            registered.value.clear_items();
        }
        for (kind, registered) in &registry.scoped {
            self.router.unregister_notifier(*kind, registered.notifier);
            registered.value.clear();
        }

        self.transport.close();
        tracing::info!("client context shut down");
    }
}
