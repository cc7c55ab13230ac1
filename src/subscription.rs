//! Observer registries and subscription handles.
//!
//! Every `subscribe*` call returns a [`Subscription`]. Dropping it (or calling
//! [`Subscription::unsubscribe`]) removes the listener, so a forgotten handle
//! cannot keep a listener set alive.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::error;

/// Handle for a registered listener. Removes the listener on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Listeners grouped by key. Empty groups are pruned on removal.
pub(crate) struct KeyedListeners<K, T: ?Sized> {
    next_id: u64,
    groups: HashMap<K, Vec<(u64, Rc<T>)>>,
}

impl<K: Eq + Hash, T: ?Sized> Default for KeyedListeners<K, T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            groups: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, T: ?Sized> KeyedListeners<K, T> {
    pub fn insert(&mut self, key: K, listener: Rc<T>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.groups.entry(key).or_default().push((id, listener));
        id
    }

    pub fn remove(&mut self, key: &K, id: u64) -> bool {
        let Some(group) = self.groups.get_mut(key) else {
            return false;
        };
        let before = group.len();
        group.retain(|(entry_id, _)| *entry_id != id);
        let removed = group.len() != before;
        if group.is_empty() {
            self.groups.remove(key);
        }
        removed
    }

    /// Clone out the listeners for `key` so callers can invoke them without
    /// holding a borrow on the registry.
    pub fn snapshot(&self, key: &K) -> Vec<Rc<T>> {
        self.groups
            .get(key)
            .map(|group| group.iter().map(|(_, l)| Rc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub fn has_listeners(&self, key: &K) -> bool {
        self.groups.contains_key(key)
    }

    #[cfg(test)]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Run a listener, containing any panic so the remaining listeners still run.
pub(crate) fn guarded(label: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(listener = label, panic = %panic_message(payload.as_ref()), "listener panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
