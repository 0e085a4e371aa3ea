//! In-memory collection state: items, selection and facets.

pub mod collection;
pub mod facets;
pub mod item;

pub use collection::CollectionStore;
pub use facets::{FacetEntry, FacetField, Facets};
pub use item::{is_transient, Item, ItemRef, SELECTED_FIELD, TRANSIENT_PREFIX};
