use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::Transfer;
use crate::types::XferId;

/// Live transfers of one manager.
///
/// Holds weak references only: a transfer leaves the registry when its
/// last strong handle is dropped.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<BTreeMap<XferId, Weak<Transfer>>>,
}

impl Registry {
    pub(crate) fn add(&self, xfer: &Arc<Transfer>) {
        self.lock().insert(xfer.id(), Arc::downgrade(xfer));
    }

    pub(crate) fn remove(&self, id: XferId) {
        self.lock().remove(&id);
    }

    pub fn get(&self, id: XferId) -> Option<Arc<Transfer>> {
        self.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Every transfer still alive, oldest first.
    pub fn all(&self) -> Vec<Arc<Transfer>> {
        self.lock().values().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<XferId, Weak<Transfer>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
