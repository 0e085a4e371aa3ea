//! Collections refreshed on a timer instead of by pushes.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::collection::CollectionManager;
use crate::error::Result;
use crate::stores::ItemRef;

/// Delays between polls, picked from the outcome of the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingOptions {
    /// After a poll that returned items.
    pub poll_timeout: Duration,
    /// After a poll that returned nothing, so a first item shows up sooner.
    pub poll_empty_timeout: Duration,
    /// After a failed poll.
    pub poll_error_timeout: Duration,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(10),
            poll_empty_timeout: Duration::from_secs(3),
            poll_error_timeout: Duration::from_millis(500),
        }
    }
}

impl PollingOptions {
    pub fn next_delay(&self, outcome: &Result<Vec<ItemRef>>) -> Duration {
        match outcome {
            Ok(items) if items.is_empty() => self.poll_empty_timeout,
            Ok(_) => self.poll_timeout,
            Err(_) => self.poll_error_timeout,
        }
    }
}

/// Keeps a [`CollectionManager`] current by listing its kind on an adaptive
/// interval. The wrapped manager still owns items, selection and facets.
pub struct PollingManager {
    manager: Arc<CollectionManager>,
    options: PollingOptions,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PollingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingManager")
            .field("manager", &self.manager)
            .field("options", &self.options)
            .field("polling", &self.is_polling())
            .finish()
    }
}

impl PollingManager {
    pub fn new(manager: Arc<CollectionManager>, options: PollingOptions) -> Arc<Self> {
        Arc::new(Self {
            manager,
            options,
            task: Mutex::new(None),
        })
    }

    pub fn manager(&self) -> &Arc<CollectionManager> {
        &self.manager
    }

    pub fn options(&self) -> &PollingOptions {
        &self.options
    }

    pub fn is_polling(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Poll now and keep polling until stopped. Returns false, leaving the
    /// running schedule alone, when polling is already active.
    pub fn start_polling(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }
        tracing::debug!("start polling {}", self.manager.kind());
        *task = Some(tokio::spawn(poll_loop(Arc::downgrade(self))));
        true
    }

    pub fn stop_polling(&self) {
        if let Some(task) = self.task.lock().take() {
            tracing::debug!("stop polling {}", self.manager.kind());
            task.abort();
        }
    }

    /// Run one poll and return how long to wait before the next. Failures
    /// are logged, never returned.
    pub async fn poll_once(&self) -> Duration {
        let outcome = self.manager.load_items().await;
        if let Err(e) = &outcome {
            tracing::warn!("polling {} failed: {}", self.manager.kind(), e);
        }
        self.options.next_delay(&outcome)
    }
}

impl Drop for PollingManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn poll_loop(poller: Weak<PollingManager>) {
    loop {
        let Some(this) = poller.upgrade() else {
            return;
        };
        let delay = this.poll_once().await;
        drop(this);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::ManagerOptions;
    use crate::testing::FakeRpc;
    use crate::ClientError;
    use livesync_shared::{ObjectKind, RpcErrorPayload};
    use serde_json::json;

    fn poller(rpc: &Arc<FakeRpc>) -> Arc<PollingManager> {
        let manager = CollectionManager::new(ManagerOptions::new(ObjectKind::Node), rpc.clone());
        PollingManager::new(manager, PollingOptions::default())
    }

    fn list_calls(rpc: &FakeRpc) -> usize {
        rpc.calls_to("node.list").len()
    }

    #[test]
    fn delay_follows_the_last_outcome() {
        let options = PollingOptions::default();
        let item: ItemRef = Default::default();
        assert_eq!(options.next_delay(&Ok(vec![item])), Duration::from_secs(10));
        assert_eq!(options.next_delay(&Ok(Vec::new())), Duration::from_secs(3));
        let err = Err(ClientError::Rpc {
            method: "node.list".to_string(),
            error: RpcErrorPayload(json!("boom")),
        });
        assert_eq!(options.next_delay(&err), Duration::from_millis(500));
        assert!(options.poll_error_timeout < options.poll_empty_timeout);
        assert!(options.poll_empty_timeout < options.poll_timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_the_regular_interval_while_items_exist() {
        let rpc = FakeRpc::with_ids(5);
        let poller = poller(&rpc);

        assert!(poller.start_polling());
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(list_calls(&rpc), 3);
        assert_eq!(poller.manager().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_results_poll_sooner() {
        let rpc = FakeRpc::new("id");
        let poller = poller(&rpc);

        poller.start_polling();
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        // t = 0, 3, 6, 9
        assert_eq!(list_calls(&rpc), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_retried_quickly_and_forever() {
        let rpc = FakeRpc::with_ids(5);
        rpc.set_failing(true);
        let poller = poller(&rpc);

        poller.start_polling();
        tokio::time::sleep(Duration::from_millis(2_250)).await;
        assert_eq!(list_calls(&rpc), 5);
        assert!(poller.is_polling());

        rpc.set_failing(false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(poller.manager().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_keeps_a_single_schedule() {
        let rpc = FakeRpc::with_ids(5);
        let poller = poller(&rpc);

        assert!(poller.start_polling());
        assert!(!poller.start_polling());
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(list_calls(&rpc), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_timer() {
        let rpc = FakeRpc::with_ids(5);
        let poller = poller(&rpc);

        poller.start_polling();
        tokio::time::sleep(Duration::from_secs(1)).await;
        poller.stop_polling();
        poller.stop_polling();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(list_calls(&rpc), 1);
        assert!(!poller.is_polling());
        assert!(poller.start_polling());
    }
}
