//! The `XmlFragment`/`XmlElement`/`XmlText` shared types. An element is
//! represented by the same [Branch] shape as a fragment - attributes live in
//! its map slots, child nodes in its array-like item list - distinguished
//! only by [TypeRef::XmlElement] carrying a tag name where
//! [TypeRef::XmlFragment] carries none.

use crate::block::{ItemContent, Prelim};
use crate::branch::{Branch, BranchPtr, TypeRef};
use crate::id_set::DeleteSet;
use crate::observer::Subscription;
use crate::transaction::TransactionMut;
use crate::types::text::compute_text_delta;
use crate::types::{compute_delta, compute_keys, Change, Delta, EntryChange, GetString, Observable, SharedRef, ToJson, Value};
use lib0::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct XmlFragmentRef(BranchPtr);

impl From<BranchPtr> for XmlFragmentRef {
    fn from(branch: BranchPtr) -> Self {
        XmlFragmentRef(branch)
    }
}

impl AsRef<Branch> for XmlFragmentRef {
    fn as_ref(&self) -> &Branch {
        &self.0
    }
}

impl SharedRef for XmlFragmentRef {}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct XmlTextRef(BranchPtr);

impl From<BranchPtr> for XmlTextRef {
    fn from(branch: BranchPtr) -> Self {
        XmlTextRef(branch)
    }
}

impl AsRef<Branch> for XmlTextRef {
    fn as_ref(&self) -> &Branch {
        &self.0
    }
}

impl SharedRef for XmlTextRef {}

/// A child of an [XmlFragmentRef]: either a nested element/fragment or a run
/// of text.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum XmlNode {
    Fragment(XmlFragmentRef),
    Text(XmlTextRef),
}

impl From<BranchPtr> for XmlNode {
    fn from(branch: BranchPtr) -> Self {
        match branch.type_ref() {
            TypeRef::XmlText => XmlNode::Text(XmlTextRef::from(branch)),
            _ => XmlNode::Fragment(XmlFragmentRef::from(branch)),
        }
    }
}

impl XmlNode {
    pub fn get_string(&self) -> String {
        match self {
            XmlNode::Fragment(f) => f.get_string(),
            XmlNode::Text(t) => t.get_string(),
        }
    }
}

impl XmlFragmentRef {
    /// `None` for the document fragment root, `Some(tag)` for an element.
    pub fn tag(&self) -> Option<Arc<str>> {
        match self.0.type_ref() {
            TypeRef::XmlElement(tag) => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn len(&self) -> u32 {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    pub fn get(&self, index: u32) -> Option<XmlNode> {
        let mut branch = self.0;
        let (content, _) = branch.get_at(index)?;
        match content {
            ItemContent::Type(b) => Some(XmlNode::from(BranchPtr::from(b.as_ref()))),
            _ => None,
        }
    }

    pub fn iter(&self) -> XmlIter<'_> {
        XmlIter { frag: self, next: 0 }
    }

    pub fn insert_element(&self, txn: &mut TransactionMut, index: u32, tag: impl Into<Arc<str>>) -> XmlFragmentRef {
        assert!(index <= self.len(), "index {} exceeds length {}", index, self.len());
        let branch = Branch::new(TypeRef::XmlElement(tag.into()));
        let item = txn.insert_content_at(self.0, index, ItemContent::Type(Box::new(branch)));
        match &item.content {
            ItemContent::Type(b) => XmlFragmentRef::from(BranchPtr::from(b.as_ref())),
            _ => unreachable!(),
        }
    }

    pub fn insert_text(&self, txn: &mut TransactionMut, index: u32) -> XmlTextRef {
        assert!(index <= self.len(), "index {} exceeds length {}", index, self.len());
        let prelim = XmlTextPrelim::from("");
        let (content, rest) = prelim.into_content(txn);
        let item_ptr = txn.insert_content_at(self.0, index, content);
        let inner_ref = match &item_ptr.content {
            ItemContent::Type(b) => BranchPtr::from(b.as_ref()),
            _ => unreachable!(),
        };
        rest.expect("XmlTextPrelim::into_content always returns Some").integrate(txn, inner_ref)
    }

    pub fn push_back_text(&self, txn: &mut TransactionMut) -> XmlTextRef {
        self.insert_text(txn, self.len())
    }

    pub fn push_back_element(&self, txn: &mut TransactionMut, tag: impl Into<Arc<str>>) -> XmlFragmentRef {
        self.insert_element(txn, self.len(), tag)
    }

    pub fn remove_range(&self, txn: &mut TransactionMut, index: u32, len: u32) {
        txn.remove_range(self.0, index, len);
    }

    pub fn get_attribute(&self, key: &str) -> Option<String> {
        let item = self.0.map.get(key)?;
        if item.is_deleted() {
            return None;
        }
        match item.content.get_last()? {
            Value::Any(Any::String(s)) => Some(s.to_string()),
            _ => None,
        }
    }

    pub fn insert_attribute(&self, txn: &mut TransactionMut, key: impl Into<Box<str>>, value: impl Into<String>) {
        let key = key.into();
        let value: String = value.into();
        txn.insert_content_map(self.0, &key, ItemContent::Any(vec![Any::String(value.into_boxed_str())]));
    }

    pub fn remove_attribute(&self, txn: &mut TransactionMut, key: &str) {
        if let Some(item) = self.0.map.get(key).copied() {
            if !item.is_deleted() {
                txn.delete_item(item);
            }
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, String)> {
        self.0.map.iter().filter_map(|(k, item)| {
            if item.is_deleted() {
                return None;
            }
            match item.content.get_last()? {
                Value::Any(Any::String(s)) => Some((k.as_ref(), s.to_string())),
                _ => None,
            }
        })
    }
}

impl GetString for XmlFragmentRef {
    fn get_string(&self) -> String {
        let mut out = String::new();
        if let Some(tag) = self.tag() {
            let _ = write!(out, "<{}", tag);
            for (k, v) in self.attributes() {
                let _ = write!(out, " {}=\"{}\"", k, v);
            }
            out.push('>');
        }
        for child in self.iter() {
            out.push_str(&child.get_string());
        }
        if let Some(tag) = self.tag() {
            let _ = write!(out, "</{}>", tag);
        }
        out
    }
}

impl ToJson for XmlFragmentRef {
    fn to_json(&self) -> Any {
        Any::String(self.get_string().into_boxed_str())
    }
}

pub struct XmlIter<'a> {
    frag: &'a XmlFragmentRef,
    next: u32,
}

impl<'a> Iterator for XmlIter<'a> {
    type Item = XmlNode;

    fn next(&mut self) -> Option<Self::Item> {
        let v = self.frag.get(self.next)?;
        self.next += 1;
        Some(v)
    }
}

/// Raised after a transaction inserts/removes children of, or changes the
/// attributes of, an [XmlFragmentRef]/element.
#[derive(Debug, Clone)]
pub struct XmlEvent {
    pub target: XmlNode,
    pub delta: Vec<Change>,
    pub keys: HashMap<Arc<str>, EntryChange>,
}

impl XmlEvent {
    pub(crate) fn new(target: XmlNode, delta: Vec<Change>, keys: HashMap<Arc<str>, EntryChange>) -> Self {
        XmlEvent { target, delta, keys }
    }
}

impl Observable for XmlFragmentRef {
    type Event = XmlEvent;

    fn observe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionMut, &XmlEvent) + Send + Sync + 'static,
    {
        self.0.observers.shallow.subscribe(move |txn, event| {
            if let crate::types::Event::Xml(e) = event {
                f(txn, e);
            }
        })
    }
}

pub(crate) fn xml_event(
    branch: BranchPtr,
    before_state: &crate::block_store::StateVector,
    delete_set: &DeleteSet,
    changed_keys: &HashSet<Option<Arc<str>>>,
) -> XmlEvent {
    XmlEvent::new(
        XmlNode::from(branch),
        compute_delta(branch.start, before_state, delete_set),
        compute_keys(branch, before_state, delete_set, changed_keys),
    )
}

/// Raised after a transaction changes an [XmlTextRef]'s content or
/// formatting.
#[derive(Debug, Clone)]
pub struct XmlTextEvent {
    pub target: XmlTextRef,
    pub delta: Vec<Delta>,
    pub keys: HashMap<Arc<str>, EntryChange>,
}

impl XmlTextEvent {
    pub(crate) fn new(target: XmlTextRef, delta: Vec<Delta>, keys: HashMap<Arc<str>, EntryChange>) -> Self {
        XmlTextEvent { target, delta, keys }
    }
}

impl Observable for XmlTextRef {
    type Event = XmlTextEvent;

    fn observe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionMut, &XmlTextEvent) + Send + Sync + 'static,
    {
        self.0.observers.shallow.subscribe(move |txn, event| {
            if let crate::types::Event::XmlText(e) = event {
                f(txn, e);
            }
        })
    }
}

pub(crate) fn xml_text_event(
    branch: BranchPtr,
    before_state: &crate::block_store::StateVector,
    delete_set: &DeleteSet,
    changed_keys: &HashSet<Option<Arc<str>>>,
) -> XmlTextEvent {
    XmlTextEvent::new(
        XmlTextRef::from(branch),
        compute_text_delta(branch.start, before_state, delete_set),
        compute_keys(branch, before_state, delete_set, changed_keys),
    )
}

impl XmlTextRef {
    pub fn len(&self) -> u32 {
        self.0.len
    }

    pub fn insert(&self, txn: &mut TransactionMut, index: u32, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        txn.insert_content_at(self.0, index, ItemContent::String(chunk.into()));
    }

    pub fn push(&self, txn: &mut TransactionMut, chunk: &str) {
        self.insert(txn, self.len(), chunk);
    }

    pub fn remove_range(&self, txn: &mut TransactionMut, index: u32, len: u32) {
        txn.remove_range(self.0, index, len);
    }

    pub fn get_attribute(&self, key: &str) -> Option<String> {
        let item = self.0.map.get(key)?;
        if item.is_deleted() {
            return None;
        }
        match item.content.get_last()? {
            Value::Any(Any::String(s)) => Some(s.to_string()),
            _ => None,
        }
    }

    pub fn insert_attribute(&self, txn: &mut TransactionMut, key: impl Into<Box<str>>, value: impl Into<String>) {
        let key = key.into();
        let value: String = value.into();
        txn.insert_content_map(self.0, &key, ItemContent::Any(vec![Any::String(value.into_boxed_str())]));
    }
}

impl GetString for XmlTextRef {
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

/// A not-yet-integrated XML element: `parent.insert_nested_element(txn, 0,
/// "p")` is usually more convenient, but this lets an element be built via
/// the generic `Prelim` machinery (e.g. from inside an [crate::types::array::ArrayPrelim]).
pub struct XmlElementPrelim {
    tag: Arc<str>,
}

impl XmlElementPrelim {
    pub fn new(tag: impl Into<Arc<str>>) -> Self {
        XmlElementPrelim { tag: tag.into() }
    }
}

impl Prelim for XmlElementPrelim {
    type Return = XmlFragmentRef;

    fn into_content(self, _txn: &mut TransactionMut) -> (ItemContent, Option<Self>) {
        (ItemContent::Type(Box::new(Branch::new(TypeRef::XmlElement(self.tag.clone())))), Some(self))
    }

    fn integrate(self, _txn: &mut TransactionMut, inner_ref: BranchPtr) -> Self::Return {
        XmlFragmentRef::from(inner_ref)
    }
}

pub struct XmlTextPrelim(String);

impl From<&str> for XmlTextPrelim {
    fn from(s: &str) -> Self {
        XmlTextPrelim(s.to_string())
    }
}

impl Prelim for XmlTextPrelim {
    type Return = XmlTextRef;

    fn into_content(self, _txn: &mut TransactionMut) -> (ItemContent, Option<Self>) {
        (ItemContent::Type(Box::new(Branch::new(TypeRef::XmlText))), Some(self))
    }

    fn integrate(self, txn: &mut TransactionMut, inner_ref: BranchPtr) -> Self::Return {
        let text = XmlTextRef::from(inner_ref);
        if !self.0.is_empty() {
            text.insert(txn, 0, &self.0);
        }
        text
    }
}
