//! Items held by a collection.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Fields starting with this prefix are client-side state and survive
/// server updates.
pub const TRANSIENT_PREFIX: char = '$';
pub const SELECTED_FIELD: &str = "$selected";

/// Shared handle to an item. Updates mutate the item behind the handle, so
/// a handle taken before an update observes the new fields.
pub type ItemRef = Arc<RwLock<Item>>;

/// One object of a collection: the server's fields plus transient
/// `$`-prefixed fields owned by the client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    fields: Map<String, Value>,
}

impl Item {
    /// Build an item from a server payload. Transient keys in the payload
    /// are dropped; the client owns them.
    pub fn new(mut fields: Map<String, Value>) -> Self {
        fields.retain(|name, _| !is_transient(name));
        fields.insert(SELECTED_FIELD.to_string(), Value::Bool(false));
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn is_selected(&self) -> bool {
        self.fields
            .get(SELECTED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.fields
            .insert(SELECTED_FIELD.to_string(), Value::Bool(selected));
    }

    /// Set a client-side field. Returns false if `name` is not transient.
    pub fn set_transient(&mut self, name: &str, value: Value) -> bool {
        if !is_transient(name) {
            return false;
        }
        self.fields.insert(name.to_string(), value);
        true
    }

    /// Replace every server field with `data`, keeping transient fields.
    pub(crate) fn replace_fields(&mut self, data: &Map<String, Value>) {
        self.fields.retain(|name, _| is_transient(name));
        for (name, value) in data {
            if !is_transient(name) {
                self.fields.insert(name.clone(), value.clone());
            }
        }
    }

    /// The server fields as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .filter(|(name, _)| !is_transient(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }
}

pub fn is_transient(name: &str) -> bool {
    name.starts_with(TRANSIENT_PREFIX)
}
