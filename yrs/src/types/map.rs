//! The `Map` shared type: string-keyed, last-writer-wins (by causal order)
//! storage for arbitrary values.

use crate::block::{ItemContent, Prelim};
use crate::branch::{Branch, BranchPtr, TypeRef};
use crate::observer::Subscription;
use crate::transaction::TransactionMut;
use crate::types::{compute_keys, EntryChange, Observable, SharedRef, ToJson, Value};
use lib0::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MapRef(BranchPtr);

impl From<BranchPtr> for MapRef {
    fn from(branch: BranchPtr) -> Self {
        MapRef(branch)
    }
}

impl AsRef<Branch> for MapRef {
    fn as_ref(&self) -> &Branch {
        &self.0
    }
}

impl SharedRef for MapRef {}

impl MapRef {
    pub fn len(&self) -> u32 {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0
            .map
            .get(key)
            .map(|item| !item.is_deleted())
            .unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let item = self.0.map.get(key)?;
        if item.is_deleted() {
            return None;
        }
        item.content.get_last()
    }

    pub fn insert<V: Into<Any>>(&self, txn: &mut TransactionMut, key: impl Into<Box<str>>, value: V) {
        let key = key.into();
        txn.insert_content_map(self.0, &key, ItemContent::Any(vec![value.into()]));
    }

    pub fn insert_nested<V: Prelim>(&self, txn: &mut TransactionMut, key: impl Into<Box<str>>, value: V) -> V::Return {
        let key = key.into();
        let (content, rest) = value.into_content(txn);
        let item_ptr = txn.insert_content_map(self.0, &key, content);
        let inner_ref = match &item_ptr.content {
            ItemContent::Type(b) => BranchPtr::from(b.as_ref()),
            _ => unreachable!("Prelim::into_content with a remainder must produce Type content"),
        };
        rest.expect("Prelim::into_content must return Some(self) when integrate is needed")
            .integrate(txn, inner_ref)
    }

    pub fn remove(&self, txn: &mut TransactionMut, key: &str) -> Option<Value> {
        let item = *self.0.map.get(key)?;
        if item.is_deleted() {
            return None;
        }
        let value = item.content.get_last();
        txn.delete_item(item);
        value
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0
            .map
            .iter()
            .filter(|(_, item)| !item.is_deleted())
            .map(|(k, _)| k.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> {
        self.0.map.iter().filter_map(|(k, item)| {
            if item.is_deleted() {
                None
            } else {
                item.content.get_last().map(|v| (k.as_ref(), v))
            }
        })
    }
}

impl ToJson for MapRef {
    fn to_json(&self) -> Any {
        let mut map = HashMap::new();
        for (k, v) in self.iter() {
            map.insert(k.to_string(), v.to_json());
        }
        Any::Map(Box::new(map))
    }
}

/// Raised after a transaction inserts, updates or removes one or more keys
/// of a [MapRef].
#[derive(Debug, Clone)]
pub struct MapEvent {
    pub target: MapRef,
    pub keys: HashMap<Arc<str>, EntryChange>,
}

impl MapEvent {
    pub(crate) fn new(target: MapRef, keys: HashMap<Arc<str>, EntryChange>) -> Self {
        MapEvent { target, keys }
    }
}

impl Observable for MapRef {
    type Event = MapEvent;

    fn observe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionMut, &MapEvent) + Send + Sync + 'static,
    {
        self.0.observers.shallow.subscribe(move |txn, event| {
            if let crate::types::Event::Map(e) = event {
                f(txn, e);
            }
        })
    }
}

pub(crate) fn map_event(
    branch: BranchPtr,
    before_state: &crate::block_store::StateVector,
    delete_set: &crate::id_set::DeleteSet,
    changed_keys: &HashSet<Option<Arc<str>>>,
) -> MapEvent {
    MapEvent::new(MapRef::from(branch), compute_keys(branch, before_state, delete_set, changed_keys))
}

/// A not-yet-integrated map value: `parent.insert_nested(txn, "meta",
/// MapPrelim::from([("a", 1), ("b", 2)]))`.
pub struct MapPrelim<V>(Vec<(Box<str>, V)>);

impl<V> MapPrelim<V> {
    pub fn new(entries: impl IntoIterator<Item = (impl Into<Box<str>>, V)>) -> Self {
        MapPrelim(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<K: Into<Box<str>>, V> FromIterator<(K, V)> for MapPrelim<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        MapPrelim(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<V: Into<Any>> Prelim for MapPrelim<V> {
    type Return = MapRef;

    fn into_content(self, _txn: &mut TransactionMut) -> (ItemContent, Option<Self>) {
        (ItemContent::Type(Box::new(Branch::new(TypeRef::Map))), Some(self))
    }

    fn integrate(self, txn: &mut TransactionMut, inner_ref: BranchPtr) -> Self::Return {
        let map = MapRef::from(inner_ref);
        for (key, value) in self.0 {
            map.insert(txn, key, value);
        }
        map
    }
}
