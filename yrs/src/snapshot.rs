//! A point-in-time view of a document: which clocks had been integrated and
//! which had already been deleted. See [crate::store::Store::snapshot] and
//! [create_doc_from_snapshot].

use crate::block::{Block, BlockRange};
use crate::block_store::{BlockStore, StateVector};
use crate::doc::Doc;
use crate::error::Error;
use crate::id::{ClientID, ID};
use crate::id_set::DeleteSet;
use crate::update::{clone_block, clone_item, Update};
use crate::updates::decoder::Decoder;
use crate::updates::encoder::Encoder;
use lib0::decoding::Cursor;
use lib0::encoding::EncoderV1;
use std::collections::BTreeMap;

/// An immutable `(deleteSet, stateVector)` pair. Doesn't borrow from the
/// store it was taken from, so it's safe to hold onto across further
/// mutation of the live document.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Snapshot {
    pub delete_set: DeleteSet,
    pub state_vector: StateVector,
}

impl Snapshot {
    pub fn new(delete_set: DeleteSet, state_vector: StateVector) -> Self {
        Snapshot {
            delete_set,
            state_vector,
        }
    }

    /// True iff `id` had already been integrated and not yet deleted at the
    /// moment this snapshot was taken.
    pub fn is_visible(&self, id: &ID) -> bool {
        id.clock < self.state_vector.get(&id.client) && !self.delete_set.is_deleted(id)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = EncoderV1::new();
        self.delete_set.encode(&mut encoder);
        self.state_vector.encode(&mut encoder);
        encoder.to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Snapshot, Error> {
        let mut decoder = Cursor::new(buf);
        let delete_set = DeleteSet::decode(&mut decoder)?;
        let state_vector = StateVector::decode(&mut decoder)?;
        Ok(Snapshot::new(delete_set, state_vector))
    }
}

fn split_block_prefix(block: &Block, offset: u32) -> Block {
    match block {
        Block::GC(r) => Block::GC(BlockRange::new(r.id, offset)),
        Block::Skip(r) => Block::Skip(BlockRange::new(r.id, offset)),
        Block::Item(item) => {
            let mut prefix = clone_item(item);
            let _suffix = prefix.split(offset);
            Block::Item(prefix)
        }
    }
}

/// Builds the update needed to bring a fresh document to exactly the state
/// `snapshot` describes: every struct integrated before the snapshot's state
/// vector, truncated at the boundary, plus the snapshot's own delete set.
pub(crate) fn encode_state_as_update(blocks: &BlockStore, snapshot: &Snapshot) -> Update {
    let mut structs: BTreeMap<ClientID, Vec<Block>> = BTreeMap::new();
    for (client, list) in blocks.iter_clients() {
        let known = snapshot.state_vector.get(client);
        if known == 0 {
            continue;
        }
        let mut out = Vec::new();
        for block in list.iter() {
            if block.id().clock >= known {
                break;
            }
            if block.clock_end() <= known {
                out.push(clone_block(block));
            } else {
                out.push(split_block_prefix(block, known - block.id().clock));
            }
        }
        if !out.is_empty() {
            structs.insert(*client, out);
        }
    }
    Update {
        structs,
        delete_set: snapshot.delete_set.clone(),
    }
}

/// Writes an update covering only `snapshot`'s visible prefix of `source`,
/// then applies it to `dest` - the destination ends up in exactly the state
/// `source` was in at the moment `snapshot` was taken.
pub fn create_doc_from_snapshot(source: &Doc, snapshot: &Snapshot, dest: &Doc) -> Result<(), Error> {
    let update = {
        let store = source.store().borrow();
        encode_state_as_update(&store.blocks, snapshot)
    };
    let mut txn = dest.transact_mut();
    txn.apply_update(update)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::doc::Doc;
    use crate::types::GetString;

    #[test]
    fn visible_prefix_matches_snapshot_moment() {
        let doc = Doc::new();
        let text = doc.get_or_insert_text("text");
        {
            let mut txn = doc.transact_mut();
            text.insert(&mut txn, 0, "hello");
        }
        let snap = doc.store().borrow().snapshot();
        {
            let mut txn = doc.transact_mut();
            text.insert(&mut txn, 5, " world");
        }

        let copy = Doc::new();
        create_doc_from_snapshot(&doc, &snap, &copy).unwrap();
        let copy_text = copy.get_or_insert_text("text");
        assert_eq!(copy_text.get_string(), "hello");
    }
}
