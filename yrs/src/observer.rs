use crate::transaction::TransactionMut;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

type CallbackId = u32;

struct Callback<F: ?Sized> {
    id: CallbackId,
    func: Box<F>,
}

type Registry<F> = Arc<RwLock<Vec<Callback<F>>>>;

/// A registry of listeners for a single event, called synchronously and in
/// registration order from within the transaction commit pipeline. Dropping
/// the returned [Subscription] unregisters the callback.
pub struct Observer<T> {
    next_id: AtomicU32,
    callbacks: Registry<dyn Fn(&TransactionMut, &T) + Send + Sync>,
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Observer {
            next_id: AtomicU32::new(0),
            callbacks: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<T> Observer<T> {
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionMut, &T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.write().unwrap().push(Callback {
            id,
            func: Box::new(f),
        });
        let registry = self.callbacks.clone();
        Subscription::new(id, move |id| {
            registry.write().unwrap().retain(|cb| cb.id != id);
        })
    }

    /// Returns a guard over the currently registered callbacks, or `None`
    /// if there are none (avoids constructing an event for nobody to see).
    pub fn callbacks(&self) -> Option<CallbackGuard<'_, T>> {
        let guard = self.callbacks.read().unwrap();
        if guard.is_empty() {
            None
        } else {
            Some(CallbackGuard { guard })
        }
    }

    pub fn has_subscribers(&self) -> bool {
        !self.callbacks.read().unwrap().is_empty()
    }
}

pub struct CallbackGuard<'a, T> {
    guard: RwLockReadGuard<'a, Vec<Callback<dyn Fn(&TransactionMut, &T) + Send + Sync>>>,
}

impl<'a, T> CallbackGuard<'a, T> {
    pub fn trigger(&mut self, txn: &TransactionMut, value: &T) {
        for cb in self.guard.iter() {
            (cb.func)(txn, value);
        }
    }
}

/// Like [Observer] but callbacks may mutate the in-flight transaction (used
/// for `after_transaction`, where a listener can still append to the delete
/// set or schedule follow-up work before cleanup proceeds).
pub struct ObserverMut<T> {
    next_id: AtomicU32,
    callbacks: Registry<dyn Fn(&mut TransactionMut, &mut T) + Send + Sync>,
}

impl<T> Default for ObserverMut<T> {
    fn default() -> Self {
        ObserverMut {
            next_id: AtomicU32::new(0),
            callbacks: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<T> ObserverMut<T> {
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&mut TransactionMut, &mut T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.write().unwrap().push(Callback {
            id,
            func: Box::new(f),
        });
        let registry = self.callbacks.clone();
        Subscription::new(id, move |id| {
            registry.write().unwrap().retain(|cb| cb.id != id);
        })
    }

    pub fn callbacks(&self) -> Option<CallbackGuardMut<'_, T>> {
        let guard = self.callbacks.read().unwrap();
        if guard.is_empty() {
            None
        } else {
            Some(CallbackGuardMut { guard })
        }
    }
}

pub struct CallbackGuardMut<'a, T> {
    guard: RwLockReadGuard<'a, Vec<Callback<dyn Fn(&mut TransactionMut, &mut T) + Send + Sync>>>,
}

impl<'a, T> CallbackGuardMut<'a, T> {
    pub fn trigger(&mut self, txn: &mut TransactionMut, value: &mut T) {
        for cb in self.guard.iter() {
            (cb.func)(txn, value);
        }
    }
}

/// A handle to a single registered callback. Dropping it unsubscribes; call
/// [Subscription::forget] to keep the callback alive for the document's
/// remaining lifetime instead.
#[must_use = "the callback is unsubscribed as soon as the Subscription is dropped"]
pub struct Subscription {
    id: CallbackId,
    unsubscribe: Option<Box<dyn FnOnce(CallbackId) + Send + Sync>>,
}

impl Subscription {
    fn new<F>(id: CallbackId, unsubscribe: F) -> Self
    where
        F: FnOnce(CallbackId) + Send + Sync + 'static,
    {
        Subscription {
            id,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Leaks the subscription so the callback stays registered even after
    /// this handle goes out of scope.
    pub fn forget(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f(self.id);
        }
    }
}
