//! A position that survives concurrent edits by referencing a character
//! slot rather than a raw index - an index drifts as soon as anyone inserts
//! or deletes ahead of it, a [RelativePosition] doesn't.

use crate::block::ItemContent;
use crate::branch::BranchPtr;
use crate::error::Error;
use crate::id::ID;
use crate::store::Store;
use crate::updates::decoder::Decoder;
use crate::updates::encoder::Encoder;
use std::sync::Arc;

/// What a [RelativePosition] is anchored to: either a root type (addressed
/// by its registered name) or a nested type (addressed by the ID of the
/// item that introduced it).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PositionTarget {
    Named(Arc<str>),
    Id(ID),
}

/// An Item ID plus left/right association, or just the association when the
/// slot referenced is the very start or end of the type (`item = None`).
/// `assoc >= 0` sticks to the character on the right of the slot (content
/// inserted exactly at this position lands *before* it); `assoc < 0` sticks
/// to the character on the left (new content lands *after* it).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RelativePosition {
    parent: PositionTarget,
    item: Option<ID>,
    assoc: i32,
}

impl RelativePosition {
    pub fn new(parent: PositionTarget, item: Option<ID>, assoc: i32) -> Self {
        RelativePosition { parent, item, assoc }
    }

    /// Converts `(branch, index)` into a position that will keep pointing at
    /// the same character slot across further concurrent edits.
    pub fn from_type_index(branch: BranchPtr, index: u32, assoc: i32) -> Self {
        let parent = match &branch.name {
            Some(name) => PositionTarget::Named(name.clone()),
            None => match branch.item {
                Some(item) => PositionTarget::Id(item.id()),
                None => PositionTarget::Named(Arc::from("")),
            },
        };
        let item = find_slot(branch, index, assoc);
        RelativePosition { parent, item, assoc }
    }

    /// Resolves back to `(branch, index)` as of the store's current state,
    /// `Ok(None)` if the referenced type or item no longer exists (e.g. was
    /// garbage collected).
    pub fn to_absolute(&self, store: &Store) -> Result<Option<(BranchPtr, u32)>, Error> {
        let branch = match &self.parent {
            PositionTarget::Named(name) => match store.get_type(name) {
                Some(b) => b,
                None => return Ok(None),
            },
            PositionTarget::Id(id) => match resolve_nested_branch(store, id) {
                Some(b) => b,
                None => return Ok(None),
            },
        };

        let anchor = match self.item {
            None => {
                let index = if self.assoc < 0 { branch.len } else { 0 };
                return Ok(Some((branch, index)));
            }
            Some(id) => id,
        };

        let resolved = match store.follow_redone(anchor) {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };
        let block = match store.blocks.find(&resolved) {
            Ok(b) => b,
            Err(_) => return Ok(None),
        };
        let item = match block.as_item() {
            Some(it) => it,
            None => return Ok(None),
        };

        let mut index = 0u32;
        let mut cur = branch.start;
        while let Some(ptr) = cur {
            if ptr.id == item.id {
                break;
            }
            if !ptr.is_deleted() && ptr.is_countable() {
                index += ptr.len();
            }
            cur = ptr.right;
        }
        if !item.is_deleted() {
            let offset = resolved.clock - item.id.clock;
            index += if self.assoc < 0 { offset + 1 } else { offset };
        }
        Ok(Some((branch, index)))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        match &self.parent {
            PositionTarget::Named(name) => {
                encoder.write_u8(1);
                encoder.write_string(name);
            }
            PositionTarget::Id(id) => {
                encoder.write_u8(0);
                crate::id::write_id(id, encoder);
            }
        }
        match self.item {
            Some(id) => {
                encoder.write_u8(1);
                crate::id::write_id(&id, encoder);
            }
            None => encoder.write_u8(0),
        }
        encoder.write_var_i64(self.assoc as i64);
    }

    pub fn decode<'a, D: Decoder<'a>>(decoder: &mut D) -> lib0::Result<Self> {
        let parent = if decoder.read_u8()? != 0 {
            PositionTarget::Named(decoder.read_string()?.into())
        } else {
            PositionTarget::Id(crate::id::read_id(decoder)?)
        };
        let item = if decoder.read_u8()? != 0 {
            Some(crate::id::read_id(decoder)?)
        } else {
            None
        };
        let assoc = decoder.read_var_i64()? as i32;
        Ok(RelativePosition { parent, item, assoc })
    }
}

fn resolve_nested_branch(store: &Store, id: &ID) -> Option<BranchPtr> {
    let block = store.blocks.find(id).ok()?;
    let item = block.as_item()?;
    match &item.content {
        ItemContent::Type(b) => Some(BranchPtr::from(b.as_ref())),
        _ => None,
    }
}

/// Finds the unit-level ID at `index`, preferring the left neighbour's last
/// unit when `assoc < 0` and the right neighbour's first unit otherwise.
fn find_slot(branch: BranchPtr, index: u32, assoc: i32) -> Option<ID> {
    let mut remaining = index;
    let mut cur = branch.start;
    if assoc < 0 {
        if index == 0 {
            return None;
        }
        while let Some(ptr) = cur {
            if !ptr.is_deleted() && ptr.is_countable() {
                let len = ptr.len();
                if remaining <= len {
                    return Some(ptr.id.successor(remaining - 1));
                }
                remaining -= len;
            }
            cur = ptr.right;
        }
        None
    } else {
        while let Some(ptr) = cur {
            if !ptr.is_deleted() && ptr.is_countable() {
                let len = ptr.len();
                if remaining < len {
                    return Some(ptr.id.successor(remaining));
                }
                remaining -= len;
            }
            cur = ptr.right;
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::doc::Doc;
    use crate::types::GetString;

    #[test]
    fn shifts_when_content_is_inserted_ahead_of_it() {
        let doc = Doc::new();
        let text = doc.get_or_insert_text("text");
        {
            let mut txn = doc.transact_mut();
            text.insert(&mut txn, 0, "ace");
        }
        let branch = BranchPtr::from(text.as_ref());
        // sticks immediately after 'a'
        let pos = RelativePosition::from_type_index(branch, 1, -1);

        {
            let mut txn = doc.transact_mut();
            text.insert(&mut txn, 0, "X");
        }
        assert_eq!(text.get_string(), "Xace");

        let store = doc.store().borrow();
        let (_resolved_branch, index) = pos.to_absolute(&store).unwrap().unwrap();
        assert_eq!(index, 2);
    }
}
