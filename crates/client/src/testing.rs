//! Scripted RPC double used by the manager tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use livesync_shared::{Pk, RpcErrorPayload};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::{ClientError, Result};
use crate::rpc::RpcClient;

type Hook = Box<dyn FnMut(usize, &str, &Value) + Send>;

/// Answers `<kind>.list` from an in-memory server collection with the
/// `start`/`count` cursor semantics and records every call. Any other
/// method answers with a canned response or `null`.
pub(crate) struct FakeRpc {
    pk_field: String,
    items: Mutex<Vec<Value>>,
    calls: Mutex<Vec<(String, Value)>>,
    fail_calls: Mutex<HashSet<usize>>,
    failing: AtomicBool,
    responses: Mutex<HashMap<String, Value>>,
    hook: Mutex<Option<Hook>>,
}

impl FakeRpc {
    pub(crate) fn new(pk_field: &str) -> Arc<Self> {
        Arc::new(Self {
            pk_field: pk_field.to_string(),
            items: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_calls: Mutex::new(HashSet::new()),
            failing: AtomicBool::new(false),
            responses: Mutex::new(HashMap::new()),
            hook: Mutex::new(None),
        })
    }

    pub(crate) fn with_ids(count: i64) -> Arc<Self> {
        let rpc = Self::new("id");
        rpc.set_items(
            (1..=count)
                .map(|id| json!({"id": id, "name": format!("item-{}", id)}))
                .collect(),
        );
        rpc
    }

    pub(crate) fn set_items(&self, mut items: Vec<Value>) {
        items.sort_by_key(|item| Pk::from_field(item, &self.pk_field));
        *self.items.lock() = items;
    }

    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub(crate) fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    /// Make the call with this zero-based index fail.
    pub(crate) fn fail_call(&self, index: usize) {
        self.fail_calls.lock().insert(index);
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn respond(&self, method: &str, result: Value) {
        self.responses.lock().insert(method.to_string(), result);
    }

    /// Run `hook` inside every call, before the reply is produced.
    pub(crate) fn on_call(&self, hook: impl FnMut(usize, &str, &Value) + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    fn list(&self, params: &Value) -> Value {
        let start = params.get("start").and_then(Pk::from_value);
        let count = params
            .get("count")
            .and_then(Value::as_u64)
            .map_or(usize::MAX, |c| c as usize);
        let filters: Vec<(&String, &Value)> = params
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(key, _)| key.as_str() != "start" && key.as_str() != "count")
                    .collect()
            })
            .unwrap_or_default();

        let items = self.items.lock();
        let page: Vec<Value> = items
            .iter()
            .filter(|item| {
                let pk = Pk::from_field(item, &self.pk_field);
                start.as_ref().map_or(true, |start| pk.as_ref() > Some(start))
            })
            .filter(|item| filters.iter().all(|(key, value)| item.get(*key) == Some(*value)))
            .take(count)
            .cloned()
            .collect();
        Value::Array(page)
    }
}

#[async_trait]
impl RpcClient for FakeRpc {
    async fn call_method(&self, method: &str, params: Value) -> Result<Value> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push((method.to_string(), params.clone()));
            calls.len() - 1
        };
        tokio::task::yield_now().await;

        if let Some(hook) = self.hook.lock().as_mut() {
            hook(index, method, &params);
        }

        if self.failing.load(Ordering::SeqCst) || self.fail_calls.lock().contains(&index) {
            return Err(ClientError::Rpc {
                method: method.to_string(),
                error: RpcErrorPayload(json!("scripted failure")),
            });
        }

        if method.ends_with(".list") {
            return Ok(self.list(&params));
        }
        Ok(self
            .responses
            .lock()
            .get(method)
            .cloned()
            .unwrap_or(Value::Null))
    }
}
