use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// User-supplied data made available to preconditioners built on top of an operator.
///
/// The context is cheap to clone and is forwarded unchanged to every sub-operator extracted
/// from an operator.
#[derive(Clone, Default)]
pub struct AppContext {
    entries: Arc<FxHashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl AppContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(mut self, key: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.insert(key, value);
        self
    }

    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        Arc::make_mut(&mut self.entries).insert(key.into(), Arc::new(value));
    }

    /// The entry stored under `key`, if it exists and has type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|value| value.downcast_ref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("AppContext").field("keys", &keys).finish()
    }
}
