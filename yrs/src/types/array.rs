//! The `Array` shared type: an insertion-ordered, CRDT-merged sequence of
//! arbitrary values (primitives, embeds or nested shared types).

use crate::block::{ItemContent, Prelim};
use crate::branch::{Branch, BranchPtr, TypeRef};
use crate::observer::Subscription;
use crate::transaction::TransactionMut;
use crate::types::{compute_delta, Change, Observable, SharedRef, ToJson, Value};
use lib0::any::Any;

/// A reference to an `Array` root or nested shared type. Cheap to clone -
/// it's just a pointer to the underlying [Branch].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ArrayRef(BranchPtr);

impl From<BranchPtr> for ArrayRef {
    fn from(branch: BranchPtr) -> Self {
        ArrayRef(branch)
    }
}

impl AsRef<Branch> for ArrayRef {
    fn as_ref(&self) -> &Branch {
        &self.0
    }
}

impl SharedRef for ArrayRef {}

impl ArrayRef {
    pub fn len(&self) -> u32 {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    pub fn get(&self, index: u32) -> Option<Value> {
        let mut branch = self.0;
        let (content, offset) = branch.get_at(index)?;
        Some(crate::types::content_value_at(&content, offset))
    }

    /// Inserts a plain value (anything convertible to [Any]) at `index`,
    /// shifting everything at or after it one position to the right.
    pub fn insert<V: Into<Any>>(&self, txn: &mut TransactionMut, index: u32, value: V) {
        assert!(index <= self.len(), "index {} exceeds length {}", index, self.len());
        txn.insert_content_at(self.0, index, ItemContent::Any(vec![value.into()]));
    }

    /// Inserts several plain values at once, cheaper than calling
    /// [ArrayRef::insert] in a loop since they share one [ItemContent::Any].
    pub fn insert_range<V: Into<Any>>(&self, txn: &mut TransactionMut, index: u32, values: impl IntoIterator<Item = V>) {
        assert!(index <= self.len(), "index {} exceeds length {}", index, self.len());
        let values: Vec<Any> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return;
        }
        txn.insert_content_at(self.0, index, ItemContent::Any(values));
    }

    pub fn push_back<V: Into<Any>>(&self, txn: &mut TransactionMut, value: V) {
        self.insert(txn, self.len(), value);
    }

    pub fn push_front<V: Into<Any>>(&self, txn: &mut TransactionMut, value: V) {
        self.insert(txn, 0, value);
    }

    /// Inserts a nested shared type (or any other [Prelim] value that needs
    /// post-integration setup) at `index`, returning a handle to it.
    pub fn insert_nested<V: Prelim>(&self, txn: &mut TransactionMut, index: u32, value: V) -> V::Return {
        assert!(index <= self.len(), "index {} exceeds length {}", index, self.len());
        let (content, rest) = value.into_content(txn);
        let item_ptr = txn.insert_content_at(self.0, index, content);
        let inner_ref = match &item_ptr.content {
            ItemContent::Type(b) => BranchPtr::from(b.as_ref()),
            _ => unreachable!("Prelim::into_content with a remainder must produce Type content"),
        };
        rest.expect("Prelim::into_content must return Some(self) when integrate is needed")
            .integrate(txn, inner_ref)
    }

    pub fn remove(&self, txn: &mut TransactionMut, index: u32) {
        self.remove_range(txn, index, 1);
    }

    pub fn remove_range(&self, txn: &mut TransactionMut, index: u32, len: u32) {
        txn.remove_range(self.0, index, len);
    }

    pub fn iter(&self) -> ArrayIter<'_> {
        ArrayIter {
            array: self,
            next: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.iter().collect()
    }
}

impl ToJson for ArrayRef {
    fn to_json(&self) -> Any {
        let items: Vec<Any> = self.iter().map(|v| v.to_json()).collect();
        Any::Array(items)
    }
}

pub struct ArrayIter<'a> {
    array: &'a ArrayRef,
    next: u32,
}

impl<'a> Iterator for ArrayIter<'a> {
    type Item = Value;

    fn next(&mut self) -> Option<Self::Item> {
        let v = self.array.get(self.next)?;
        self.next += 1;
        Some(v)
    }
}

/// Raised after a transaction inserts into, removes from, or otherwise
/// changes an [ArrayRef]'s contents.
#[derive(Debug, Clone)]
pub struct ArrayEvent {
    pub target: ArrayRef,
    pub delta: Vec<Change>,
}

impl ArrayEvent {
    pub(crate) fn new(target: ArrayRef, delta: Vec<Change>) -> Self {
        ArrayEvent { target, delta }
    }
}

impl Observable for ArrayRef {
    type Event = ArrayEvent;

    fn observe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionMut, &ArrayEvent) + Send + Sync + 'static,
    {
        self.0.observers.shallow.subscribe(move |txn, event| {
            if let crate::types::Event::Array(e) = event {
                f(txn, e);
            }
        })
    }
}

pub(crate) fn array_event(
    branch: BranchPtr,
    before_state: &crate::block_store::StateVector,
    delete_set: &crate::id_set::DeleteSet,
) -> ArrayEvent {
    ArrayEvent::new(ArrayRef::from(branch), compute_delta(branch.start, before_state, delete_set))
}

/// A not-yet-integrated array value, used to insert a nested array in one
/// shot: `parent.insert_nested(txn, 0, ArrayPrelim::from(vec![1, 2, 3]))`.
pub struct ArrayPrelim<T>(Vec<T>);

impl<T> ArrayPrelim<T> {
    pub fn new(values: impl IntoIterator<Item = T>) -> Self {
        ArrayPrelim(values.into_iter().collect())
    }
}

impl<T> From<Vec<T>> for ArrayPrelim<T> {
    fn from(values: Vec<T>) -> Self {
        ArrayPrelim(values)
    }
}

impl<T: Into<Any>> Prelim for ArrayPrelim<T> {
    type Return = ArrayRef;

    fn into_content(self, _txn: &mut TransactionMut) -> (ItemContent, Option<Self>) {
        (ItemContent::Type(Box::new(Branch::new(TypeRef::Array))), Some(self))
    }

    fn integrate(self, txn: &mut TransactionMut, inner_ref: BranchPtr) -> Self::Return {
        let array = ArrayRef::from(inner_ref);
        for value in self.0 {
            array.insert(txn, array.len(), value);
        }
        array
    }
}
