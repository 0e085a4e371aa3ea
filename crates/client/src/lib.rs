//! Livesync client
//!
//! Keeps in-memory collections of server objects in step with a server
//! over one websocket: RPC calls for listing and mutation, pushed
//! notifications for every change.

pub mod config;
pub mod context;
pub mod error;
pub mod managers;
pub mod router;
pub mod rpc;
pub mod stores;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ClientConfig;
pub use context::ClientContext;
pub use error::{ClientError, Result};
pub use managers::{
    CollectionManager, ManagerOptions, PollingManager, PollingOptions, ScopedManagerFactory,
    ScopedOptions,
};
pub use router::{NotificationRouter, NotifierId};
pub use rpc::RpcClient;
pub use stores::{FacetEntry, FacetField, Facets, Item, ItemRef};
pub use ws::{ConnectionState, LifecycleEvent, Transport, TransportEvent};
