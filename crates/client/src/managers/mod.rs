//! Managers keep collections of server objects current.
//!
//! - [`CollectionManager`]: paginated load, reload and live pushes.
//! - [`PollingManager`]: the same collection refreshed on a timer.
//! - [`ScopedManagerFactory`]: one manager per parent object.

pub mod collection;
pub mod polling;
pub mod scoped;

pub use collection::{CollectionManager, ManagerOptions, DEFAULT_BATCH_SIZE};
pub use polling::{PollingManager, PollingOptions};
pub use scoped::{ScopedManagerFactory, ScopedOptions};
