//! Where a data source reads its filters from.

use std::{fmt, sync::Arc};

use shared::protocol::{FilterMap, FilterValue};
use tokio::sync::watch;

type FilterProvider = Arc<dyn Fn() -> FilterMap + Send + Sync>;

/// A filter mapping that can be edited after a data source has been built.
///
/// Every data source constructed over the store observes each entry: changing,
/// inserting or removing any key schedules a refresh, while assigning an equal
/// value does not. Clones share the same underlying mapping.
#[derive(Clone)]
pub struct FilterStore {
    tx: Arc<watch::Sender<FilterMap>>,
}

impl FilterStore {
    pub fn new() -> Self {
        Self::with_entries(FilterMap::new())
    }

    pub fn with_entries(entries: FilterMap) -> Self {
        let (tx, _) = watch::channel(entries);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true when the stored value actually changed.
    pub fn set(&self, key: impl Into<String>, value: impl Into<FilterValue>) -> bool {
        let key = key.into();
        let value = value.into();
        self.tx.send_if_modified(|entries| {
            if entries.get(&key) == Some(&value) {
                return false;
            }
            entries.insert(key, value);
            true
        })
    }

    pub fn remove(&self, key: &str) -> bool {
        self.tx.send_if_modified(|entries| entries.remove(key).is_some())
    }

    pub fn clear(&self) -> bool {
        self.tx.send_if_modified(|entries| {
            if entries.is_empty() {
                return false;
            }
            entries.clear();
            true
        })
    }

    /// Replaces all entries in one change.
    pub fn replace(&self, entries: FilterMap) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == entries {
                return false;
            }
            *current = entries;
            true
        })
    }

    pub fn get(&self, key: &str) -> Option<FilterValue> {
        self.tx.borrow().get(key).cloned()
    }

    pub fn snapshot(&self) -> FilterMap {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FilterMap> {
        self.tx.subscribe()
    }
}

impl Default for FilterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterStore").field(&*self.tx.borrow()).finish()
    }
}

#[derive(Clone)]
pub enum FilterSource {
    Static(FilterMap),
    /// Called on every payload build.
    Provider(FilterProvider),
    Reactive(FilterStore),
}

impl FilterSource {
    pub fn from_fn(provider: impl Fn() -> FilterMap + Send + Sync + 'static) -> Self {
        Self::Provider(Arc::new(provider))
    }

    pub fn resolve(&self) -> FilterMap {
        match self {
            Self::Static(entries) => entries.clone(),
            Self::Provider(provider) => provider(),
            Self::Reactive(store) => store.snapshot(),
        }
    }

    /// Change feed for sources that can change on their own.
    pub(crate) fn subscribe(&self) -> Option<watch::Receiver<FilterMap>> {
        match self {
            Self::Reactive(store) => Some(store.subscribe()),
            Self::Static(_) | Self::Provider(_) => None,
        }
    }
}

impl Default for FilterSource {
    fn default() -> Self {
        Self::Static(FilterMap::new())
    }
}

impl fmt::Debug for FilterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(entries) => f.debug_tuple("Static").field(entries).finish(),
            Self::Provider(_) => f.write_str("Provider(..)"),
            Self::Reactive(store) => f.debug_tuple("Reactive").field(store).finish(),
        }
    }
}

impl From<FilterMap> for FilterSource {
    fn from(value: FilterMap) -> Self {
        Self::Static(value)
    }
}

impl From<FilterStore> for FilterSource {
    fn from(value: FilterStore) -> Self {
        Self::Reactive(value)
    }
}
