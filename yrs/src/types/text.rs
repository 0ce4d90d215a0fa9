//! The `Text` shared type: a mergeable run of UTF-16-indexed text, with
//! inline rich-text formatting carried as zero-length `Format` markers.

use crate::block::{ItemContent, ItemPtr, Prelim};
use crate::branch::{Branch, BranchPtr, TypeRef};
use crate::id_set::DeleteSet;
use crate::observer::Subscription;
use crate::transaction::TransactionMut;
use crate::types::{was_added, was_deleted, Attrs, Delta, GetString, Observable, SharedRef};
use lib0::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TextRef(BranchPtr);

impl From<BranchPtr> for TextRef {
    fn from(branch: BranchPtr) -> Self {
        TextRef(branch)
    }
}

impl AsRef<Branch> for TextRef {
    fn as_ref(&self) -> &Branch {
        &self.0
    }
}

impl SharedRef for TextRef {}

impl TextRef {
    /// Length in UTF-16 code units, matching the Yjs/Yjs-over-the-wire index
    /// space used by every other positional operation on this type.
    pub fn len(&self) -> u32 {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    pub fn insert(&self, txn: &mut TransactionMut, index: u32, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        assert!(index <= self.len(), "index {} exceeds length {}", index, self.len());
        txn.insert_content_at(self.0, index, ItemContent::String(chunk.into()));
    }

    pub fn push(&self, txn: &mut TransactionMut, chunk: &str) {
        self.insert(txn, self.len(), chunk);
    }

    pub fn remove_range(&self, txn: &mut TransactionMut, index: u32, len: u32) {
        txn.remove_range(self.0, index, len);
        self.cleanup_formatting_gap(txn, index, index);
    }

    /// Applies `attrs` to the `[index, index+len)` span, recording enough
    /// information (the attribute's previously-active value) that removing
    /// the format later restores what was there before.
    pub fn format(&self, txn: &mut TransactionMut, index: u32, len: u32, attrs: Attrs) {
        for (key, value) in attrs {
            let prev = self.active_attr_at(index, &key);
            self.delete_conflicting_format(txn, index, len, &key);
            txn.insert_content_at(
                self.0,
                index,
                ItemContent::Format(key.as_ref().into(), Box::new(value)),
            );
            txn.insert_content_at(
                self.0,
                index + len,
                ItemContent::Format(key.as_ref().into(), Box::new(prev)),
            );
        }
    }

    /// Deletes any existing, non-deleted `Format` item for `key` found within
    /// `[index, index+len)` before a new marker for the same key is inserted
    /// there, so re-formatting a span doesn't leave a stale, overridden
    /// marker behind. Mirrors the reference implementation's `FormatText`
    /// loop, which does the equivalent cleanup inline as it walks the range.
    fn delete_conflicting_format(&self, txn: &mut TransactionMut, index: u32, len: u32, key: &str) {
        let end = index + len;
        let mut position = 0u32;
        let mut cur = self.0.start;
        while let Some(item) = cur {
            if position >= end {
                break;
            }
            if position >= index && !item.is_deleted() {
                if let ItemContent::Format(k, _) = &item.content {
                    if k.as_ref() == key {
                        txn.delete_item(item);
                    }
                }
            }
            if !item.is_deleted() && item.is_countable() {
                position += item.len();
            }
            cur = item.right;
        }
    }

    /// Removes `Format` items sitting at the `[start_index, end_index]` gap
    /// left by a deletion, when their value is already implied by the
    /// attributes active just past `end_index`, or they change nothing
    /// relative to what was active just before `start_index`. Mirrors the
    /// reference implementation's `CleanupFormattingGap`.
    fn cleanup_formatting_gap(&self, txn: &mut TransactionMut, start_index: u32, end_index: u32) {
        let start_attrs = self.attrs_at(start_index);
        let end_attrs = self.attrs_at(end_index);

        let mut position = 0u32;
        let mut cur = self.0.start;
        while let Some(item) = cur {
            if position > end_index {
                break;
            }
            if position >= start_index && !item.is_deleted() {
                if let ItemContent::Format(key, value) = &item.content {
                    let end_val = end_attrs.get(key.as_ref()).cloned().unwrap_or(Any::Null);
                    let start_val = start_attrs.get(key.as_ref()).cloned().unwrap_or(Any::Null);
                    if value.as_ref() != &end_val || value.as_ref() == &start_val {
                        txn.delete_item(item);
                    }
                }
            }
            if !item.is_deleted() && item.is_countable() {
                position += item.len();
            }
            cur = item.right;
        }
    }

    /// The full set of attributes active immediately before countable index
    /// `index`, built by walking every `Format` marker from the start of the
    /// list. General-purpose counterpart to [TextRef::active_attr_at], which
    /// tracks a single key.
    fn attrs_at(&self, index: u32) -> Attrs {
        let mut remaining = index;
        let mut cur = self.0.start;
        let mut attrs: Attrs = HashMap::new();
        while let Some(item) = cur {
            match &item.content {
                ItemContent::Format(k, v) => {
                    if !item.is_deleted() {
                        if matches!(v.as_ref(), Any::Null) {
                            attrs.remove(k.as_ref());
                        } else {
                            attrs.insert(Arc::from(k.as_ref()), (**v).clone());
                        }
                    }
                }
                _ if !item.is_deleted() && item.is_countable() => {
                    let len = item.len();
                    if remaining < len {
                        break;
                    }
                    remaining -= len;
                }
                _ => {}
            }
            cur = item.right;
        }
        attrs
    }

    pub fn insert_with_attributes(&self, txn: &mut TransactionMut, index: u32, chunk: &str, attrs: Attrs) {
        self.insert(txn, index, chunk);
        if !attrs.is_empty() {
            self.format(txn, index, chunk.chars().map(|c| c.len_utf16() as u32).sum(), attrs);
        }
    }

    /// Walks the formatting markers up to `index`, returning the value `key`
    /// held at that point (`Any::Null` if never set or explicitly cleared).
    fn active_attr_at(&self, index: u32, key: &str) -> Any {
        let mut remaining = index;
        let mut cur = self.0.start;
        let mut value = Any::Null;
        while let Some(item) = cur {
            match &item.content {
                ItemContent::Format(k, v) if k.as_ref() == key => {
                    value = (**v).clone();
                }
                _ if !item.is_deleted() && item.is_countable() => {
                    let len = item.len();
                    if remaining < len {
                        break;
                    }
                    remaining -= len;
                }
                _ => {}
            }
            cur = item.right;
        }
        value
    }
}

impl GetString for TextRef {
    fn get_string(&self) -> String {
        let mut s = String::new();
        let mut cur = self.0.start;
        while let Some(item) = cur {
            if !item.is_deleted() {
                if let ItemContent::String(text) = &item.content {
                    s.push_str(text.as_str());
                }
            }
            cur = item.right;
        }
        s
    }
}

/// Raised after a transaction inserts, removes, or (re)formats a span of a
/// [TextRef].
#[derive(Debug, Clone)]
pub struct TextEvent {
    pub target: TextRef,
    pub delta: Vec<Delta>,
}

impl TextEvent {
    pub(crate) fn new(target: TextRef, delta: Vec<Delta>) -> Self {
        TextEvent { target, delta }
    }
}

impl Observable for TextRef {
    type Event = TextEvent;

    fn observe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionMut, &TextEvent) + Send + Sync + 'static,
    {
        self.0.observers.shallow.subscribe(move |txn, event| {
            if let crate::types::Event::Text(e) = event {
                f(txn, e);
            }
        })
    }
}

pub(crate) fn text_event(branch: BranchPtr, before_state: &crate::block_store::StateVector, delete_set: &DeleteSet) -> TextEvent {
    TextEvent::new(TextRef::from(branch), compute_text_delta(branch.start, before_state, delete_set))
}

/// Walks a text-like item list start to end, packing runs of
/// inserted/deleted/retained content the same way [crate::types::compute_delta]
/// does for arrays, additionally tracking which `Format` attributes are
/// active at each insertion point. Mirrors the spirit of the original
/// implementation's `YTextEvent` delta computation, simplified to attach
/// whichever attributes are active at the *start* of an inserted run rather
/// than re-splitting runs at every attribute change.
pub(crate) fn compute_text_delta(
    start: Option<ItemPtr>,
    before_state: &crate::block_store::StateVector,
    delete_set: &DeleteSet,
) -> Vec<Delta> {
    let mut delta = Vec::new();
    let mut current = start;
    let mut active: Attrs = HashMap::new();
    while let Some(item) = current {
        match &item.content {
            ItemContent::Format(key, value) => {
                if !item.is_deleted() {
                    if matches!(value.as_ref(), Any::Null) {
                        active.remove(key.as_ref());
                    } else {
                        active.insert(Arc::from(key.as_ref()), (**value).clone());
                    }
                }
            }
            _ => {
                if item.is_deleted() {
                    if was_deleted(delete_set, &item.id) && !was_added(before_state, &item.id) {
                        match delta.last_mut() {
                            Some(Delta::Deleted(n)) => *n += item.len(),
                            _ => delta.push(Delta::Deleted(item.len())),
                        }
                    }
                } else if was_added(before_state, &item.id) {
                    let value = item.content.get_last().unwrap_or_default();
                    let attrs = if active.is_empty() { None } else { Some(Box::new(active.clone())) };
                    delta.push(Delta::Inserted(value, attrs));
                } else if item.is_countable() {
                    match delta.last_mut() {
                        Some(Delta::Retain(n, None)) => *n += item.len(),
                        _ => delta.push(Delta::Retain(item.len(), None)),
                    }
                }
            }
        }
        current = item.right;
    }
    delta
}

/// A not-yet-integrated text value: `parent.insert_nested(txn, "body",
/// TextPrelim::from("hello"))`.
pub struct TextPrelim(String);

impl From<&str> for TextPrelim {
    fn from(s: &str) -> Self {
        TextPrelim(s.to_string())
    }
}

impl From<String> for TextPrelim {
    fn from(s: String) -> Self {
        TextPrelim(s)
    }
}

impl Prelim for TextPrelim {
    type Return = TextRef;

    fn into_content(self, _txn: &mut TransactionMut) -> (ItemContent, Option<Self>) {
        (ItemContent::Type(Box::new(Branch::new(TypeRef::Text))), Some(self))
    }

    fn integrate(self, txn: &mut TransactionMut, inner_ref: BranchPtr) -> Self::Return {
        let text = TextRef::from(inner_ref);
        if !self.0.is_empty() {
            text.insert(txn, 0, &self.0);
        }
        text
    }
}
