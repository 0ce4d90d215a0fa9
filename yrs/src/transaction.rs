//! Transactions: the only way to mutate a [crate::doc::Doc]. A
//! [TransactionMut] batches every change made while it's open, then on
//! commit (explicit, or implicit via `Drop`) computes the deltas needed for
//! shared-type observers, encodes the resulting update bytes, and fires
//! [crate::event::UpdateEvent]/[crate::event::TransactionCleanupEvent].
//!
//! Every item, whether created locally or decoded off the wire, is
//! integrated through the same [TransactionMut::integrate] conflict
//! resolution walk (see `item.go`'s `Integrate` in the reference
//! implementation for the algorithm this mirrors) - a local insert simply
//! arrives with `origin`/`right_origin` already pointing at its intended
//! neighbours, so the walk trivially confirms them.

use crate::block::{Block, BlockRange, Item, ItemContent, ItemPtr, TypePtr};
use crate::block_store::StateVector;
use crate::branch::{fire_deep, fire_shallow, BranchPtr, TypeRef};
use crate::doc::Doc;
use crate::error::Error;
use crate::event::{TransactionCleanupEvent, UpdateEvent};
use crate::id::{ClientID, ID};
use crate::id_set::DeleteSet;
use crate::store::{PendingUpdate, Store, StoreRef};
use crate::types::Event;
use crate::update::{clone_block, split_block_suffix, Update};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

/// Opaque tag a transaction can be stamped with, so observers can tell local
/// changes from ones that arrived over the wire (or distinguish one remote
/// peer's changes from another's).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Origin(Box<[u8]>);

impl From<&str> for Origin {
    fn from(s: &str) -> Self {
        Origin(s.as_bytes().into())
    }
}

impl From<String> for Origin {
    fn from(s: String) -> Self {
        Origin(s.into_bytes().into_boxed_slice())
    }
}

impl From<u64> for Origin {
    fn from(v: u64) -> Self {
        Origin(v.to_be_bytes().into())
    }
}

impl AsRef<[u8]> for Origin {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A single mutation scope. Borrowed from a [Doc] via [Doc::transact_mut];
/// commits automatically when dropped. Every shared-type operation
/// (`ArrayRef::insert`, `MapRef::remove`, ...) goes through one of the
/// `pub(crate)` methods here.
pub struct TransactionMut<'doc> {
    store: StoreRef,
    origin: Option<Origin>,
    local: bool,
    before_state: StateVector,
    delete_set: DeleteSet,
    /// Branches touched this transaction, each with the set of map keys
    /// changed on it (`None` standing in for "the list/text structure
    /// itself", as opposed to a specific map key).
    changed: HashMap<BranchPtr, HashSet<Option<Arc<str>>>>,
    committed: bool,
    _doc: PhantomData<&'doc Doc>,
}

impl<'doc> TransactionMut<'doc> {
    pub(crate) fn new(doc: &'doc Doc, origin: Option<Origin>, local: bool) -> Self {
        let store = doc.store().clone();
        let before_state = store.borrow().state_vector();
        TransactionMut {
            store,
            origin,
            local,
            before_state,
            delete_set: DeleteSet::new(),
            changed: HashMap::new(),
            committed: false,
            _doc: PhantomData,
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn before_state(&self) -> &StateVector {
        &self.before_state
    }

    pub(crate) fn store(&self) -> atomic_refcell::AtomicRef<'_, Store> {
        self.store.borrow()
    }

    pub(crate) fn store_mut(&mut self) -> atomic_refcell::AtomicRefMut<'_, Store> {
        self.store.borrow_mut()
    }

    fn next_id(&self) -> ID {
        let store = self.store.borrow();
        let client = store.client_id();
        let clock = store.get_state(&client);
        ID::new(client, clock)
    }

    fn mark_changed(&mut self, branch: BranchPtr, parent_sub: Option<Arc<str>>) {
        self.changed.entry(branch).or_default().insert(parent_sub);
    }

    // -- positional helpers --------------------------------------------

    /// Splits `ptr` at `offset` units from its start, inserting the suffix
    /// into the store and rewiring `ptr.right`/the old right neighbour's
    /// `left` to point at it. Returns the suffix.
    fn split_item(&mut self, mut ptr: ItemPtr, offset: u32) -> ItemPtr {
        let suffix = ptr.split(offset);
        let mut suffix_ptr = {
            let mut store = self.store.borrow_mut();
            store
                .blocks
                .add_and_get_item(Block::Item(suffix))
                .expect("split suffix clock is contiguous with its prefix")
        };
        let old_right = ptr.right;
        suffix_ptr.left = Some(ptr);
        suffix_ptr.right = old_right;
        ptr.right = Some(suffix_ptr);
        if let Some(mut r) = old_right {
            r.left = Some(suffix_ptr);
        }
        suffix_ptr
    }

    /// Returns the `(left, right)` pair an insertion at `index` should sit
    /// between, splitting an item in two if `index` lands in its middle.
    /// Starts from the closest cached [crate::branch::SearchMarker] instead
    /// of `parent.start` when one is within range, per spec.md §4.12.
    fn index_to_ptr(&mut self, mut parent: BranchPtr, index: u32) -> (Option<ItemPtr>, Option<ItemPtr>) {
        if index == 0 {
            return (None, parent.start);
        }
        let marker = parent.search_markers.closest(index);
        let (mut cur, mut remaining) = match marker {
            Some(m) if m.index <= index => (Some(m.ptr), index - m.index),
            _ => (parent.start, index),
        };
        let mut last = None;
        while let Some(ptr) = cur {
            last = Some(ptr);
            if !ptr.is_deleted() && ptr.is_countable() {
                let len = ptr.len();
                let abs = index - remaining;
                parent.search_markers.update(ptr, abs);
                if remaining < len {
                    let suffix = self.split_item(ptr, remaining);
                    return (Some(ptr), Some(suffix));
                }
                remaining -= len;
                if remaining == 0 {
                    return (Some(ptr), ptr.right);
                }
            }
            cur = ptr.right;
        }
        (last, None)
    }

    /// Returns the item that starts exactly at countable index `index`,
    /// splitting one in two if necessary. `None` once `index` runs past the
    /// end of the list. Starts from the closest cached
    /// [crate::branch::SearchMarker] instead of `parent.start` when one is
    /// within range, per spec.md §4.12.
    fn item_at(&mut self, mut parent: BranchPtr, index: u32) -> Option<ItemPtr> {
        let marker = parent.search_markers.closest(index);
        let (mut cur, mut remaining) = match marker {
            Some(m) if m.index <= index => (Some(m.ptr), index - m.index),
            _ => (parent.start, index),
        };
        while let Some(ptr) = cur {
            if !ptr.is_deleted() && ptr.is_countable() {
                let len = ptr.len();
                let abs = index - remaining;
                parent.search_markers.update(ptr, abs);
                if remaining < len {
                    if remaining == 0 {
                        return Some(ptr);
                    }
                    return Some(self.split_item(ptr, remaining));
                }
                remaining -= len;
            }
            cur = ptr.right;
        }
        None
    }

    // -- mutation entry points, called by the shared-type modules -------

    pub(crate) fn insert_content_at(&mut self, mut parent: BranchPtr, index: u32, content: ItemContent) -> ItemPtr {
        let (left, right) = self.index_to_ptr(parent, index);
        // a `Format` marker disturbs positional math for every cached cursor
        // downstream of it; everything else just shifts cached indices.
        let is_format = matches!(content, ItemContent::Format(_, _));
        let len = content.len();
        let ptr = self.create_item(parent, left, right, None, content);
        if is_format {
            parent.search_markers.invalidate();
        } else if len > 0 {
            parent.search_markers.adjust(index, len as i32);
        }
        ptr
    }

    pub(crate) fn insert_content_map(&mut self, parent: BranchPtr, key: &str, content: ItemContent) -> ItemPtr {
        let left = parent.map.get(key).copied();
        self.create_item(parent, left, None, Some(key.into()), content)
    }

    pub(crate) fn remove_range(&mut self, mut parent: BranchPtr, index: u32, len: u32) {
        if len == 0 {
            return;
        }
        let mut remaining = len;
        let mut cur = self.item_at(parent, index);
        while let Some(ptr) = cur {
            if remaining == 0 {
                break;
            }
            if !ptr.is_deleted() && ptr.is_countable() {
                let item_len = ptr.len();
                if item_len > remaining {
                    let suffix = self.split_item(ptr, remaining);
                    self.delete_item(ptr);
                    let _ = suffix;
                    break;
                } else {
                    let next = ptr.right;
                    self.delete_item(ptr);
                    remaining -= item_len;
                    cur = next;
                    continue;
                }
            }
            cur = ptr.right;
        }
        let deleted = len - remaining;
        if deleted > 0 {
            parent.search_markers.adjust(index, -(deleted as i32));
        }
    }

    pub(crate) fn delete_item(&mut self, mut item: ItemPtr) {
        if item.is_deleted() {
            return;
        }
        let was_countable = item.is_countable();
        let len = item.len();
        let id = item.id;
        item.mark_deleted();
        let parent = match item.parent.clone() {
            TypePtr::Branch(mut b) => {
                if was_countable {
                    b.len = b.len.saturating_sub(len);
                }
                b
            }
            _ => return,
        };
        self.delete_set.insert(id, len);
        let sub = item.parent_sub.as_ref().map(|k| Arc::from(k.as_ref()));
        self.mark_changed(parent, sub);
    }

    fn create_item(
        &mut self,
        parent: BranchPtr,
        left: Option<ItemPtr>,
        right: Option<ItemPtr>,
        parent_sub: Option<Box<str>>,
        content: ItemContent,
    ) -> ItemPtr {
        let id = self.next_id();
        let origin = left.map(|l| l.last_id());
        let right_origin = right.map(|r| r.id());
        let item = Item::new(
            id,
            left,
            origin,
            right,
            right_origin,
            TypePtr::Branch(parent),
            parent_sub,
            content,
        );
        self.integrate(item)
            .expect("locally created item always integrates cleanly")
            .expect("locally created item always has a resolvable parent")
    }

    fn resolve_parent(&mut self, ptr: &TypePtr) -> Result<BranchPtr, Error> {
        match ptr {
            TypePtr::Branch(b) => Ok(*b),
            TypePtr::Named(name) => {
                let mut store = self.store.borrow_mut();
                Ok(store.get_or_create_type(name, TypeRef::Undefined))
            }
            TypePtr::Id(id) => {
                let store = self.store.borrow();
                let block = store.blocks.find(id)?;
                match block.as_item() {
                    Some(item) => match &item.content {
                        ItemContent::Type(b) => Ok(BranchPtr::from(b.as_ref())),
                        _ => Err(Error::IdNotFound(*id)),
                    },
                    None => Err(Error::IdNotFound(*id)),
                }
            }
            TypePtr::Unknown => Err(Error::IdNotFound(ID::new(0, 0))),
        }
    }

    /// Resolves a map-like slot's chain to its current visible head (the
    /// item at the bottom of the `left` chain starting from `map[key]`).
    fn map_head(parent: BranchPtr, sub: &str) -> Option<ItemPtr> {
        let mut cur = parent.map.get(sub).copied();
        while let Some(c) = cur {
            if c.left.is_none() {
                break;
            }
            cur = c.left;
        }
        cur
    }

    /// The unified integration algorithm: resolves `item`'s final
    /// left/right neighbours (running a conflict resolution walk only when
    /// something concurrent may have happened between its creation and now),
    /// links it into its parent's item list or map slot, and updates the
    /// parent's length.
    pub(crate) fn integrate(&mut self, mut item: Item) -> Result<Option<ItemPtr>, Error> {
        // Resolve origin/right-origin to concrete neighbours first: a wire
        // parent of [TypePtr::Unknown] (written whenever either origin is
        // present, since the parent is then redundant - see spec.md §4.4
        // step 2) must be inferred from whichever neighbour resolves.
        let mut left = match item.origin {
            Some(id) => self.store.borrow_mut().blocks.get_item_clean_end(&id).ok(),
            None => None,
        };
        let right = match item.right_origin {
            Some(id) => self.store.borrow_mut().blocks.get_item_clean_start(&id).ok(),
            None => None,
        };

        if matches!(item.parent, TypePtr::Unknown) {
            if let Some(l) = left {
                item.parent = l.parent.clone();
                item.parent_sub = l.parent_sub.clone();
            } else if let Some(r) = right {
                item.parent = r.parent.clone();
                item.parent_sub = r.parent_sub.clone();
            }
        }

        let mut parent = match self.resolve_parent(&item.parent) {
            Ok(p) => p,
            Err(_) => {
                // Dependency missing (parent id not seen yet) or its sole
                // anchor was itself collected: can't place this item
                // anywhere, so it degrades to a standalone GC placeholder
                // rather than aborting the whole incoming update.
                let range = BlockRange::new(item.id, item.len());
                self.store.borrow_mut().blocks.add(Block::GC(range))?;
                return Ok(None);
            }
        };
        item.parent = TypePtr::Branch(parent);
        let parent_sub = item.parent_sub.clone();

        let needs_scan = match (left, right) {
            (None, None) => true,
            (None, Some(r)) => r.left.is_some(),
            (Some(l), r) => l.right != r,
        };

        if needs_scan {
            let mut o = if let Some(l) = left {
                l.right
            } else if let Some(sub) = &parent_sub {
                Self::map_head(parent, sub)
            } else {
                parent.start
            };
            let mut items_before_origin: HashSet<ItemPtr> = HashSet::new();
            let mut conflicting_items: HashSet<ItemPtr> = HashSet::new();
            while let Some(o_ptr) = o {
                if Some(o_ptr) == right {
                    break;
                }
                items_before_origin.insert(o_ptr);
                conflicting_items.insert(o_ptr);
                if item.origin == o_ptr.origin {
                    if o_ptr.id().client < item.id.client {
                        left = Some(o_ptr);
                        conflicting_items.clear();
                    } else if item.right_origin == o_ptr.right_origin {
                        break;
                    }
                } else if let Some(o_origin_id) = o_ptr.origin {
                    let o_origin_ptr = {
                        let store = self.store.borrow();
                        match store.blocks.find(&o_origin_id).ok().and_then(|b| b.as_item()) {
                            Some(it) => Some(ItemPtr::from(it)),
                            None => None,
                        }
                    };
                    match o_origin_ptr {
                        Some(o_origin_ptr) if items_before_origin.contains(&o_origin_ptr) => {
                            if !conflicting_items.contains(&o_origin_ptr) {
                                left = Some(o_ptr);
                                conflicting_items.clear();
                            }
                        }
                        _ => break,
                    }
                } else {
                    break;
                }
                o = o_ptr.right;
            }
        }

        let final_right = if let Some(l) = left {
            l.right
        } else if let Some(sub) = &parent_sub {
            Self::map_head(parent, sub)
        } else {
            parent.start
        };

        item.left = left;
        item.right = final_right;

        let is_countable = item.is_countable();
        let item_len = item.len();

        let item_ptr = {
            let mut store = self.store.borrow_mut();
            store.blocks.add_and_get_item(Block::Item(item))?
        };

        if let Some(mut r) = final_right {
            r.left = Some(item_ptr);
        }
        if let Some(mut l) = left {
            l.right = Some(item_ptr);
        } else if let Some(sub) = &parent_sub {
            let old_head = parent.map.get(sub.as_ref()).copied();
            parent.map.insert(sub.clone(), item_ptr);
            if let Some(old) = old_head {
                if !old.is_deleted() {
                    self.delete_item(old);
                }
            }
        } else {
            parent.start = Some(item_ptr);
        }

        if is_countable && !item_ptr.is_deleted() {
            parent.len += item_len;
        }

        let sub = parent_sub.map(|k| Arc::from(k.as_ref()));
        self.mark_changed(parent, sub);

        // Content's own integration hook (spec.md §4.4 step 7): a struct
        // that carries `Deleted` content is tombstoned the moment it's
        // integrated, not by a later explicit delete.
        if matches!(item_ptr.content, ItemContent::Deleted(_)) {
            self.delete_item(item_ptr);
        }

        Ok(Some(item_ptr))
    }

    // -- remote update application ---------------------------------------

    /// Integrates a decoded [Update], buffering it instead if it depends on
    /// clocks this document hasn't seen yet. Once integrated, retries
    /// whatever update was previously buffered, since this one may have
    /// unblocked it.
    pub fn apply_update(&mut self, update: Update) -> Result<(), Error> {
        let sv = self.store.borrow().state_vector();
        let missing = missing_state(&update, &sv);
        if !missing.is_empty() {
            let mut store = self.store.borrow_mut();
            store.pending = Some(PendingUpdate { missing, update });
            return Ok(());
        }
        self.integrate_update(update)?;
        let pending = {
            let mut store = self.store.borrow_mut();
            store.pending.take()
        };
        if let Some(p) = pending {
            self.apply_update(p.update)?;
        }
        Ok(())
    }

    fn integrate_update(&mut self, update: Update) -> Result<(), Error> {
        for (_client, blocks) in update.structs {
            for block in blocks {
                let known = self.store.borrow().blocks.get_state(&block.id().client);
                if block.clock_end() <= known {
                    continue;
                }
                let block = if block.id().clock < known {
                    split_block_suffix(&block, known - block.id().clock)
                } else {
                    block
                };
                match block {
                    Block::Item(item) => {
                        self.integrate(item)?;
                    }
                    Block::GC(range) => {
                        self.store.borrow_mut().blocks.add(Block::GC(range))?;
                    }
                    Block::Skip(range) => {
                        self.store.borrow_mut().blocks.add(Block::Skip(range))?;
                    }
                }
            }
        }
        for (client, ranges) in update.delete_set.iter() {
            for range in ranges {
                let mut clock = range.clock;
                while clock < range.end() {
                    let id = ID::new(*client, clock);
                    let item_ptr = match self.store.borrow_mut().blocks.get_item_clean_start(&id) {
                        Ok(ptr) => ptr,
                        Err(_) => break,
                    };
                    let len = item_ptr.len();
                    self.delete_item(item_ptr);
                    clock += len;
                }
            }
        }
        Ok(())
    }

    // -- commit -----------------------------------------------------------

    fn encode_update(&self) -> Vec<u8> {
        let store = self.store.borrow();
        let mut structs: BTreeMap<ClientID, Vec<Block>> = BTreeMap::new();
        for (client, list) in store.blocks.iter_clients() {
            let blocks: Vec<Block> = list.iter().map(clone_block).collect();
            structs.insert(*client, blocks);
        }
        let full = Update {
            structs,
            delete_set: self.delete_set.clone(),
        };
        full.diff(&self.before_state).encode()
    }

    fn dispatch_events(&mut self) {
        let before = self.before_state.clone();
        let ds = self.delete_set.clone();
        let mut own_events: HashMap<BranchPtr, Event> = HashMap::new();
        for (&branch, changed_keys) in self.changed.iter() {
            let event = match branch.type_ref() {
                TypeRef::Array => Event::Array(crate::types::array::array_event(branch, &before, &ds)),
                TypeRef::Map => Event::Map(crate::types::map::map_event(branch, &before, &ds, changed_keys)),
                TypeRef::Text => Event::Text(crate::types::text::text_event(branch, &before, &ds)),
                TypeRef::XmlFragment | TypeRef::XmlElement(_) => {
                    Event::Xml(crate::types::xml::xml_event(branch, &before, &ds, changed_keys))
                }
                TypeRef::XmlText => Event::XmlText(crate::types::xml::xml_text_event(branch, &before, &ds, changed_keys)),
                _ => continue,
            };
            own_events.insert(branch, event);
        }

        let mut deep: HashMap<BranchPtr, Vec<Event>> = HashMap::new();
        for (&branch, event) in own_events.iter() {
            for ancestor in ancestors(branch) {
                deep.entry(ancestor).or_default().push(event.clone());
            }
        }

        for (branch, event) in own_events {
            fire_shallow(branch, &*self, event);
        }
        for (branch, events) in deep {
            fire_deep(branch, &*self, events);
        }
    }

    /// Finalizes this transaction: merges the delete set, dispatches
    /// shallow/deep shared-type events, and emits an [UpdateEvent] plus a
    /// [TransactionCleanupEvent] to anyone subscribed via [Doc]. Idempotent -
    /// safe to call explicitly and then let `Drop` run again.
    pub fn commit(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        self.delete_set.sort_and_merge();
        self.dispatch_events();

        let update = self.encode_update();
        if !update.is_empty() {
            let event = UpdateEvent::new(update);
            let store = self.store.borrow();
            if let Some(mut callbacks) = store.update_v1_events.callbacks() {
                callbacks.trigger(&*self, &event);
            }
        }

        let after_state = self.store.borrow().state_vector();

        if !self.local {
            let client_id = self.store.borrow().client_id();
            if after_state.get(&client_id) != self.before_state.get(&client_id) {
                let new_id = crate::doc::random_client_id();
                self.store.borrow_mut().options.client_id = new_id;
                log::info!("changed the client-id because another client seems to be using it");
            }
        }

        let cleanup = TransactionCleanupEvent {
            before_state: self.before_state.clone(),
            after_state,
            delete_set: self.delete_set.clone(),
        };
        let store = self.store.borrow();
        if let Some(mut callbacks) = store.transaction_cleanup_events.callbacks() {
            callbacks.trigger(&*self, &cleanup);
        }
    }
}

impl<'doc> Drop for TransactionMut<'doc> {
    fn drop(&mut self) {
        self.commit();
    }
}

/// For each client with structs in `update`, the clock this document still
/// needs before it can integrate that client's first struct - i.e. the gap
/// between what `sv` has seen and where `update` picks up. Empty when
/// `update` can be applied outright.
fn missing_state(update: &Update, sv: &StateVector) -> StateVector {
    let mut missing = StateVector::new();
    for (client, blocks) in update.structs.iter() {
        if let Some(first) = blocks.first() {
            let needed = sv.get(client);
            if first.id().clock > needed {
                missing.set(*client, needed);
            }
        }
    }
    missing
}

/// Walks up from `branch` through the items it's nested under, collecting
/// every enclosing [BranchPtr] - the set of deep observers that should see
/// this branch's change.
fn ancestors(branch: BranchPtr) -> Vec<BranchPtr> {
    let mut result = Vec::new();
    let mut cur = branch;
    while let Some(item) = cur.item {
        if let TypePtr::Branch(p) = &item.parent {
            result.push(*p);
            cur = *p;
        } else {
            break;
        }
    }
    result
}
