//! Per-field value counts over a collection.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::item::Item;

type Accessor = Arc<dyn Fn(&Item) -> Option<Value> + Send + Sync>;

/// A field whose values are counted, optionally read through an accessor
/// for derived values such as a nested object's name.
#[derive(Clone)]
pub struct FacetField {
    name: String,
    accessor: Option<Accessor>,
}

impl fmt::Debug for FacetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacetField")
            .field("name", &self.name)
            .field("derived", &self.accessor.is_some())
            .finish()
    }
}

impl FacetField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accessor: None,
        }
    }

    pub fn with_accessor(
        name: impl Into<String>,
        accessor: impl Fn(&Item) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            accessor: Some(Arc::new(accessor)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The item's value for this facet, or `None` when blank.
    pub fn value_of(&self, item: &Item) -> Option<Value> {
        let value = match &self.accessor {
            Some(accessor) => accessor(item),
            None => item.get(&self.name).cloned(),
        }?;
        if is_blank(&value) {
            None
        } else {
            Some(value)
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetEntry {
    pub value: Value,
    pub count: usize,
}

/// Value counts per tracked field. Entries whose count drops to zero are
/// removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Facets {
    fields: IndexMap<String, Vec<FacetEntry>>,
}

impl Facets {
    pub fn new(fields: &[FacetField]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|field| (field.name().to_string(), Vec::new()))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> &[FacetEntry] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, field: &str, value: &Value) -> usize {
        self.get(field)
            .iter()
            .find(|entry| &entry.value == value)
            .map_or(0, |entry| entry.count)
    }

    /// Sum of all counts for a field.
    pub fn total(&self, field: &str) -> usize {
        self.get(field).iter().map(|entry| entry.count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<FacetEntry>)> {
        self.fields.iter()
    }

    pub(crate) fn add_item(&mut self, defs: &[FacetField], item: &Item) {
        for def in defs {
            if let Some(value) = def.value_of(item) {
                self.increment(def.name(), value);
            }
        }
    }

    pub(crate) fn remove_item(&mut self, defs: &[FacetField], item: &Item) {
        for def in defs {
            if let Some(value) = def.value_of(item) {
                self.decrement(def.name(), &value);
            }
        }
    }

    /// Apply the delta between `old` (from [`snapshot`]) and the item's
    /// current values.
    pub(crate) fn update_item(&mut self, defs: &[FacetField], old: &[Option<Value>], item: &Item) {
        for (def, old_value) in defs.iter().zip(old) {
            let new_value = def.value_of(item);
            if *old_value == new_value {
                continue;
            }
            if let Some(old_value) = old_value {
                self.decrement(def.name(), old_value);
            }
            if let Some(new_value) = new_value {
                self.increment(def.name(), new_value);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        for entries in self.fields.values_mut() {
            entries.clear();
        }
    }

    fn increment(&mut self, field: &str, value: Value) {
        let entries = self.fields.entry(field.to_string()).or_default();
        match entries.iter_mut().find(|entry| entry.value == value) {
            Some(entry) => entry.count += 1,
            None => entries.push(FacetEntry { value, count: 1 }),
        }
    }

    fn decrement(&mut self, field: &str, value: &Value) {
        let Some(entries) = self.fields.get_mut(field) else {
            return;
        };
        if let Some(pos) = entries.iter().position(|entry| &entry.value == value) {
            entries[pos].count -= 1;
            if entries[pos].count == 0 {
                entries.remove(pos);
            }
        }
    }
}

/// Current facet values of an item, in `defs` order.
pub(crate) fn snapshot(defs: &[FacetField], item: &Item) -> Vec<Option<Value>> {
    defs.iter().map(|def| def.value_of(item)).collect()
}
