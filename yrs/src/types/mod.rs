//! Shared, CRDT-backed collection types layered on top of [crate::branch::Branch]:
//! [array]/[map]/[text]/[xml]. This module holds the pieces common to all of
//! them - the [Value] enum returned from reads, event/delta computation, and
//! path resolution.

pub mod array;
pub mod map;
pub mod text;
pub mod xml;

pub use crate::branch::{Branch, BranchPtr, TypeRef};

use crate::block::{ItemContent, ItemPtr};
use crate::id_set::DeleteSet;
use crate::transaction::TransactionMut;
use crate::types::array::{ArrayEvent, ArrayRef};
use crate::types::map::{MapEvent, MapRef};
use crate::types::text::{TextEvent, TextRef};
use crate::types::xml::{XmlEvent, XmlFragmentRef, XmlNode, XmlTextEvent, XmlTextRef};
use lib0::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A value read out of a shared type: either a plain JSON-like [Any] or a
/// handle to a nested shared collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Any(Any),
    YText(TextRef),
    YArray(ArrayRef),
    YMap(MapRef),
    YXmlFragment(XmlFragmentRef),
    YXmlText(XmlTextRef),
    /// A root type integrated from a remote update before anything local
    /// asked for it by name, so its concrete kind isn't known yet.
    UndefinedRef(BranchPtr),
}

impl From<BranchPtr> for Value {
    fn from(branch: BranchPtr) -> Self {
        match branch.type_ref() {
            TypeRef::Array => Value::YArray(ArrayRef::from(branch)),
            TypeRef::Map => Value::YMap(MapRef::from(branch)),
            TypeRef::Text => Value::YText(TextRef::from(branch)),
            TypeRef::XmlFragment | TypeRef::XmlElement(_) => {
                Value::YXmlFragment(XmlFragmentRef::from(branch))
            }
            TypeRef::XmlText => Value::YXmlText(XmlTextRef::from(branch)),
            _ => Value::UndefinedRef(branch),
        }
    }
}

impl<T: Into<Any>> From<T> for Value {
    fn from(v: T) -> Self {
        Value::Any(v.into())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Any(Any::Null)
    }
}

impl Value {
    pub fn to_json(&self) -> Any {
        match self {
            Value::Any(a) => a.clone(),
            Value::YText(v) => Any::from(v.get_string()),
            Value::YArray(v) => v.to_json(),
            Value::YMap(v) => v.to_json(),
            Value::YXmlFragment(v) => Any::from(v.get_string()),
            Value::YXmlText(v) => Any::from(v.get_string()),
            Value::UndefinedRef(_) => Any::Undefined,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

pub trait ToJson {
    fn to_json(&self) -> Any;
}

/// Renders a shared type's content as a plain string. Implemented by [text::TextRef]
/// and the XML types.
pub trait GetString {
    fn get_string(&self) -> String;
}

pub trait SharedRef: From<BranchPtr> + AsRef<Branch> {}

/// Implemented by every shared-type reference so callers can subscribe to
/// shallow and deep change events without touching [Branch] internals
/// directly. Each concrete type (`ArrayRef`, `MapRef`, ...) provides its own
/// `observe`, unwrapping the matching [Event] variant for its callback.
pub trait Observable: AsRef<Branch> {
    type Event;

    fn observe<F>(&self, f: F) -> crate::observer::Subscription
    where
        F: Fn(&TransactionMut, &Self::Event) + Send + Sync + 'static;

    fn observe_deep<F>(&self, f: F) -> crate::observer::Subscription
    where
        F: Fn(&TransactionMut, &[Event]) + Send + Sync + 'static,
    {
        let branch = BranchPtr::from(self.as_ref());
        branch
            .observers
            .deep
            .subscribe(move |txn, events: &Vec<Event>| f(txn, events.as_slice()))
    }
}

/// A path from a root type down to the shared type that raised an [Event]:
/// a sequence of map keys and/or list indices.
pub type Path = VecDeque<PathSegment>;

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(Arc<str>),
    Index(u32),
}

/// Walks up `to`'s `item -> parent` chain until it reaches `from`, recording
/// the key or index that leads to each ancestor along the way.
pub(crate) fn path_to(from: BranchPtr, to: BranchPtr) -> Path {
    let mut path = Path::new();
    let mut child = to;
    while let Some(item) = child.item {
        if child == from {
            break;
        }
        let parent = match &item.parent {
            crate::block::TypePtr::Branch(b) => *b,
            _ => break,
        };
        if let Some(key) = &item.parent_sub {
            path.push_front(PathSegment::Key(Arc::from(key.as_ref())));
        } else {
            let mut index = 0u32;
            let mut cur = parent.start;
            while let Some(ptr) = cur {
                if ptr == item {
                    break;
                }
                if !ptr.is_deleted() && ptr.is_countable() {
                    index += ptr.len();
                }
                cur = ptr.right;
            }
            path.push_front(PathSegment::Index(index));
        }
        child = parent;
        if child == from {
            break;
        }
    }
    path
}

/// A single run in an array-like delta: a contiguous span of inserted
/// values, deleted values, or unchanged (retained) values.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added(Vec<Value>),
    Removed(u32),
    Retain(u32),
}

/// What happened to a single map entry during a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryChange {
    Inserted(Value),
    Updated(Value, Value),
    Removed(Value),
}

/// A single run in a text-like delta, mirroring the Quill "delta" format:
/// insertions optionally carry the formatting attributes active at the
/// insertion point, retains optionally carry attribute changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Inserted(Value, Option<Box<Attrs>>),
    Deleted(u32),
    Retain(u32, Option<Box<Attrs>>),
}

pub type Attrs = HashMap<Arc<str>, Any>;

/// True when `item` was created during the transaction currently being
/// committed (i.e. doesn't appear in `before_state`).
pub(crate) fn was_added(before_state: &crate::block_store::StateVector, id: &crate::id::ID) -> bool {
    id.clock >= before_state.get(&id.client)
}

pub(crate) fn was_deleted(delete_set: &DeleteSet, id: &crate::id::ID) -> bool {
    delete_set.is_deleted(id)
}

/// Computes the `keys` map for a [MapEvent]/[XmlEvent]: for every key that
/// changed during the transaction, whether it was inserted, updated or
/// removed, and the relevant old/new values. Mirrors the original
/// implementation's `YEvent.GetKeys`.
pub(crate) fn compute_keys(
    branch: BranchPtr,
    before_state: &crate::block_store::StateVector,
    delete_set: &DeleteSet,
    changed_keys: &HashSet<Option<Arc<str>>>,
) -> HashMap<Arc<str>, EntryChange> {
    let mut keys = HashMap::new();
    for key in changed_keys.iter().flatten() {
        let item = match branch.map.get(key.as_ref()) {
            Some(ptr) => *ptr,
            None => continue,
        };
        if was_added(before_state, &item.id) {
            let mut prev = item.left;
            while let Some(p) = prev {
                if !was_added(before_state, &p.id) {
                    break;
                }
                prev = p.left;
            }
            if was_deleted(delete_set, &item.id) {
                if let Some(p) = prev {
                    if was_deleted(delete_set, &p.id) {
                        let old = p.content.get_last().unwrap_or_default();
                        keys.insert(key.clone(), EntryChange::Removed(old));
                    }
                }
            } else {
                let new_value = item.content.get_last().unwrap_or_default();
                if let Some(p) = prev {
                    if was_deleted(delete_set, &p.id) {
                        let old = p.content.get_last().unwrap_or_default();
                        keys.insert(key.clone(), EntryChange::Updated(old, new_value));
                        continue;
                    }
                }
                keys.insert(key.clone(), EntryChange::Inserted(new_value));
            }
        } else if was_deleted(delete_set, &item.id) {
            let old = item.content.get_last().unwrap_or_default();
            keys.insert(key.clone(), EntryChange::Removed(old));
        }
    }
    keys
}

/// Computes the `delta` for an [ArrayEvent]/[XmlEvent]: walks the branch's
/// item list start to end, packing runs of added/deleted/retained items.
/// Mirrors the original implementation's `YEvent.GetChanges`.
pub(crate) fn compute_delta(
    start: Option<ItemPtr>,
    before_state: &crate::block_store::StateVector,
    delete_set: &DeleteSet,
) -> Vec<Change> {
    let mut delta = Vec::new();
    let mut current = start;
    while let Some(item) = current {
        if item.is_deleted() {
            if was_deleted(delete_set, &item.id) && !was_added(before_state, &item.id) {
                match delta.last_mut() {
                    Some(Change::Removed(n)) => *n += item.len(),
                    _ => delta.push(Change::Removed(item.len())),
                }
            }
        } else if was_added(before_state, &item.id) {
            let mut values = item.content.get_content();
            match delta.last_mut() {
                Some(Change::Added(v)) => v.append(&mut values),
                _ => delta.push(Change::Added(values)),
            }
        } else if item.is_countable() {
            match delta.last_mut() {
                Some(Change::Retain(n)) => *n += item.len(),
                _ => delta.push(Change::Retain(item.len())),
            }
        }
        current = item.right;
    }
    delta
}

/// Generalized wrapper around the events fired by each concrete shared type,
/// dispatched through [crate::branch::fire_shallow]/[crate::branch::fire_deep].
#[derive(Clone)]
pub enum Event {
    Array(ArrayEvent),
    Map(MapEvent),
    Text(TextEvent),
    Xml(XmlEvent),
    XmlText(XmlTextEvent),
}

impl Event {
    pub fn target(&self) -> Value {
        match self {
            Event::Array(e) => Value::YArray(e.target.clone()),
            Event::Map(e) => Value::YMap(e.target.clone()),
            Event::Text(e) => Value::YText(e.target.clone()),
            Event::Xml(e) => match e.target.clone() {
                XmlNode::Fragment(n) => Value::YXmlFragment(n),
                XmlNode::Text(n) => Value::YXmlText(n),
            },
            Event::XmlText(e) => Value::YXmlText(e.target.clone()),
        }
    }

    pub fn branch(&self) -> BranchPtr {
        match self {
            Event::Array(e) => e.target.as_ref().into(),
            Event::Map(e) => e.target.as_ref().into(),
            Event::Text(e) => e.target.as_ref().into(),
            Event::Xml(e) => match &e.target {
                XmlNode::Fragment(n) => n.as_ref().into(),
                XmlNode::Text(n) => n.as_ref().into(),
            },
            Event::XmlText(e) => e.target.as_ref().into(),
        }
    }

    pub fn path(&self, root: BranchPtr) -> Path {
        path_to(root, self.branch())
    }
}

impl<'a> TryFrom<&'a Event> for &'a ArrayEvent {
    type Error = ();
    fn try_from(e: &'a Event) -> Result<Self, Self::Error> {
        match e {
            Event::Array(e) => Ok(e),
            _ => Err(()),
        }
    }
}

impl<'a> TryFrom<&'a Event> for &'a MapEvent {
    type Error = ();
    fn try_from(e: &'a Event) -> Result<Self, Self::Error> {
        match e {
            Event::Map(e) => Ok(e),
            _ => Err(()),
        }
    }
}

impl<'a> TryFrom<&'a Event> for &'a TextEvent {
    type Error = ();
    fn try_from(e: &'a Event) -> Result<Self, Self::Error> {
        match e {
            Event::Text(e) => Ok(e),
            _ => Err(()),
        }
    }
}

impl<'a> TryFrom<&'a Event> for &'a XmlEvent {
    type Error = ();
    fn try_from(e: &'a Event) -> Result<Self, Self::Error> {
        match e {
            Event::Xml(e) => Ok(e),
            _ => Err(()),
        }
    }
}

impl<'a> TryFrom<&'a Event> for &'a XmlTextEvent {
    type Error = ();
    fn try_from(e: &'a Event) -> Result<Self, Self::Error> {
        match e {
            Event::XmlText(e) => Ok(e),
            _ => Err(()),
        }
    }
}

/// Extracts the single [Value] held at `offset` units into `content`, used
/// by [array::ArrayRef::get]/[Branch::get_at] callers. For content kinds that
/// are never split mid-unit (binary, embed, nested types) `offset` is always
/// `0`.
pub(crate) fn content_value_at(content: &ItemContent, offset: u32) -> Value {
    match content {
        ItemContent::Any(values) => values
            .get(offset as usize)
            .cloned()
            .map(Value::Any)
            .unwrap_or_default(),
        ItemContent::JSON(values) => values
            .get(offset as usize)
            .map(|v| Value::Any(Any::String(v.as_str().into())))
            .unwrap_or_default(),
        ItemContent::Type(b) => BranchPtr::from(b.as_ref()).into(),
        _ => content.get_last().unwrap_or_default(),
    }
}

pub(crate) fn clone_content(content: &ItemContent) -> ItemContent {
    match content {
        ItemContent::Any(v) => ItemContent::Any(v.clone()),
        ItemContent::String(s) => ItemContent::String(s.clone()),
        ItemContent::Binary(b) => ItemContent::Binary(b.clone()),
        ItemContent::JSON(v) => ItemContent::JSON(v.clone()),
        ItemContent::Embed(v) => ItemContent::Embed(v.clone()),
        ItemContent::Format(k, v) => ItemContent::Format(k.clone(), v.clone()),
        ItemContent::Type(b) => ItemContent::Type(Box::new(Branch::new(b.type_ref().clone()))),
        ItemContent::Doc(g, o) => ItemContent::Doc(g.clone(), o.clone()),
        ItemContent::Deleted(len) => ItemContent::Deleted(*len),
    }
}
