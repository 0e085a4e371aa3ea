//! The item set, selection and facets of one collection.
//!
//! A `CollectionStore` is plain synchronous state. Managers own one behind a
//! lock and feed it list pages, notifications and reload results.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use livesync_shared::{Action, Pk};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::facets::{snapshot, FacetField, Facets};
use super::item::{Item, ItemRef};

#[derive(Debug)]
pub struct CollectionStore {
    pk_field: String,
    facet_fields: Vec<FacetField>,
    items: IndexMap<Pk, ItemRef>,
    selected: IndexMap<Pk, ItemRef>,
    facets: Facets,
}

impl CollectionStore {
    pub fn new(pk_field: impl Into<String>, facet_fields: Vec<FacetField>) -> Self {
        let facets = Facets::new(&facet_fields);
        Self {
            pk_field: pk_field.into(),
            facet_fields,
            items: IndexMap::new(),
            selected: IndexMap::new(),
            facets,
        }
    }

    pub fn pk_field(&self) -> &str {
        &self.pk_field
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in arrival order.
    pub fn items(&self) -> Vec<ItemRef> {
        self.items.values().cloned().collect()
    }

    pub fn get(&self, pk: &Pk) -> Option<ItemRef> {
        self.items.get(pk).cloned()
    }

    pub fn contains(&self, pk: &Pk) -> bool {
        self.items.contains_key(pk)
    }

    pub fn facets(&self) -> &Facets {
        &self.facets
    }

    /// The primary key of an object payload.
    pub fn pk_of(&self, data: &Value) -> Option<Pk> {
        Pk::from_field(data, &self.pk_field)
    }

    /// Apply one notification.
    pub fn apply(&mut self, action: Action, data: &Value) {
        match action {
            Action::Create => {
                self.insert(data);
            }
            Action::Update => {
                self.update(data);
            }
            Action::Delete => {
                // Deletes carry either the object or just its key.
                let pk = self.pk_of(data).or_else(|| Pk::from_value(data));
                match pk {
                    Some(pk) => {
                        self.remove(&pk);
                    }
                    None => tracing::warn!("delete without a primary key: {}", data),
                }
            }
        }
    }

    /// Append a new item. An item whose key is already present is updated
    /// in place instead.
    pub fn insert(&mut self, data: &Value) -> Option<ItemRef> {
        let (pk, fields) = self.split(data)?;
        if self.items.contains_key(&pk) {
            return self.update_fields(&pk, fields);
        }
        let item = Item::new(fields.clone());
        self.facets.add_item(&self.facet_fields, &item);
        let item = Arc::new(RwLock::new(item));
        self.items.insert(pk, item.clone());
        Some(item)
    }

    /// Replace an item's fields in place, or append it if unknown.
    pub fn update(&mut self, data: &Value) -> Option<ItemRef> {
        let (pk, fields) = self.split(data)?;
        if !self.items.contains_key(&pk) {
            return self.insert(data);
        }
        self.update_fields(&pk, fields)
    }

    pub fn remove(&mut self, pk: &Pk) -> Option<ItemRef> {
        let item = self.items.shift_remove(pk)?;
        self.selected.shift_remove(pk);
        let mut guard = item.write();
        guard.set_selected(false);
        self.facets.remove_item(&self.facet_fields, &guard);
        drop(guard);
        Some(item)
    }

    /// Merge an authoritative full listing into the live items.
    ///
    /// Items missing from `fresh` are removed, items present in both are
    /// updated in place (keeping their handle and transient fields), and
    /// the rest are appended in `fresh` order.
    pub fn reconcile(&mut self, fresh: Vec<Value>) {
        let mut order = Vec::with_capacity(fresh.len());
        let mut incoming: HashMap<Pk, Map<String, Value>> = HashMap::with_capacity(fresh.len());
        for data in fresh {
            let Some((pk, fields)) = self.split(&data).map(|(pk, f)| (pk, f.clone())) else {
                continue;
            };
            if incoming.insert(pk.clone(), fields).is_none() {
                order.push(pk);
            }
        }

        let stale: Vec<Pk> = self
            .items
            .keys()
            .filter(|pk| !incoming.contains_key(*pk))
            .cloned()
            .collect();
        for pk in &stale {
            self.remove(pk);
        }

        for (pk, item) in &self.items {
            if let Some(fields) = incoming.remove(pk) {
                let mut item = item.write();
                let old = snapshot(&self.facet_fields, &item);
                item.replace_fields(&fields);
                self.facets.update_item(&self.facet_fields, &old, &item);
            }
        }

        for pk in order {
            if let Some(fields) = incoming.remove(&pk) {
                let item = Item::new(fields);
                self.facets.add_item(&self.facet_fields, &item);
                self.items.insert(pk, Arc::new(RwLock::new(item)));
            }
        }
    }

    pub fn select(&mut self, pk: &Pk) -> bool {
        let Some(item) = self.items.get(pk) else {
            return false;
        };
        item.write().set_selected(true);
        self.selected.insert(pk.clone(), item.clone());
        true
    }

    pub fn unselect(&mut self, pk: &Pk) -> bool {
        let Some(item) = self.selected.shift_remove(pk) else {
            return false;
        };
        item.write().set_selected(false);
        true
    }

    pub fn unselect_all(&mut self) {
        for (_, item) in self.selected.drain(..) {
            item.write().set_selected(false);
        }
    }

    pub fn is_selected(&self, pk: &Pk) -> bool {
        self.selected.contains_key(pk)
    }

    /// Selected items in selection order.
    pub fn selected_items(&self) -> Vec<ItemRef> {
        self.selected.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.unselect_all();
        self.items.clear();
        self.facets.clear();
    }

    fn split<'a>(&self, data: &'a Value) -> Option<(Pk, &'a Map<String, Value>)> {
        let Some(fields) = data.as_object() else {
            tracing::warn!("ignoring non-object payload: {}", data);
            return None;
        };
        let Some(pk) = self.pk_of(data) else {
            tracing::warn!("ignoring object without {:?}: {}", self.pk_field, data);
            return None;
        };
        Some((pk, fields))
    }

    fn update_fields(&mut self, pk: &Pk, fields: &Map<String, Value>) -> Option<ItemRef> {
        let item = self.items.get(pk)?.clone();
        let mut guard = item.write();
        let old = snapshot(&self.facet_fields, &guard);
        guard.replace_fields(fields);
        self.facets.update_item(&self.facet_fields, &old, &guard);
        drop(guard);
        Some(item)
    }
}
