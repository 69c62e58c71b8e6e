use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;

/// Handle returned by [`Listeners::add`], used to unsubscribe one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T: ?Sized> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered subscriber list for one kind of event.
pub struct Listeners<T: ?Sized> {
    entries: RwLock<Vec<(ListenerId, Callback<T>)>>,
    next_id: AtomicU64,
}

impl<T: ?Sized> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T: ?Sized> Listeners<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, Arc::new(callback)));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Calls every subscriber in registration order.
    ///
    /// Returns `false` when nobody is subscribed. The list is snapshotted first
    /// so callbacks may add or remove listeners without deadlocking.
    pub fn emit(&self, value: &T) -> bool {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in &snapshot {
            callback(value);
        }
        !snapshot.is_empty()
    }
}
