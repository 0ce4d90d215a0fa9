use crate::block::{Block, BlockRange, Item, ItemPtr};
use crate::error::Error;
use crate::id::{ClientID, ID};
use crate::utils::client_hasher::ClientHasher;
use lib0::decoding::Read;
use lib0::encoding::Write;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;

/// `client → next-expected-clock`. Identifies exactly what a replica has
/// seen: a receiver with state vector `sv` is missing everything with
/// `clock >= sv[client]` for each client.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct StateVector(HashMap<ClientID, u32, BuildHasherDefault<ClientHasher>>);

impl StateVector {
    pub fn new() -> Self {
        StateVector::default()
    }

    pub fn get(&self, client: &ClientID) -> u32 {
        self.0.get(client).copied().unwrap_or(0)
    }

    pub fn set(&mut self, client: ClientID, clock: u32) {
        self.0.insert(client, clock);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientID, &u32)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `self` has seen everything `other` has, client by client.
    pub fn contains(&self, other: &StateVector) -> bool {
        other.iter().all(|(c, clock)| self.get(c) >= *clock)
    }

    pub fn merge(&mut self, other: &StateVector) {
        for (client, clock) in other.iter() {
            let entry = self.0.entry(*client).or_insert(0);
            *entry = (*entry).max(*clock);
        }
    }

    pub fn encode<E: crate::updates::encoder::Encoder>(&self, encoder: &mut E) {
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort_by_key(|(c, _)| **c);
        encoder.write_var_u64(entries.len() as u64);
        for (client, clock) in entries {
            encoder.write_var_u64(*client);
            encoder.write_var_u64(*clock as u64);
        }
    }

    pub fn decode<'a, D: crate::updates::decoder::Decoder<'a>>(
        decoder: &mut D,
    ) -> lib0::Result<StateVector> {
        let mut sv = StateVector::new();
        let len = decoder.read_var_u64()?;
        for _ in 0..len {
            let client = decoder.read_var_u64()?;
            let clock = decoder.read_var_u32()?;
            sv.set(client, clock);
        }
        Ok(sv)
    }
}

impl From<&BlockStore> for StateVector {
    fn from(store: &BlockStore) -> Self {
        store.state_vector()
    }
}

/// The contiguous, clock-ordered log of [Block]s created by a single client.
/// `blocks[i].id().clock + blocks[i].len() == blocks[i+1].id().clock` is
/// enforced by [ClientBlockList::push] and never otherwise violated.
#[derive(Debug, Default)]
pub struct ClientBlockList {
    // Boxed so that `ItemPtr`s handed out via `find_index_clean_start` et al.
    // stay valid across later inserts/removals that reallocate this `Vec` -
    // only the `Box` pointers move, never the `Item`s they point to.
    blocks: Vec<Box<Block>>,
}

impl ClientBlockList {
    pub fn new() -> Self {
        ClientBlockList::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().map(|b| b.as_ref())
    }

    /// Next clock this client's list expects; `0` for an empty list.
    pub fn next_clock(&self) -> u32 {
        self.blocks.last().map(|b| b.clock_end()).unwrap_or(0)
    }

    /// Appends `block`, verifying contiguity with the current tail.
    pub fn push(&mut self, block: Block) -> Result<(), Error> {
        let expected = self.next_clock();
        let actual = block.id().clock;
        if !self.blocks.is_empty() && actual != expected {
            return Err(Error::Contiguity {
                client: block.id().client,
                expected,
                actual,
            });
        }
        self.blocks.push(Box::new(block));
        Ok(())
    }

    /// Binary search for the index of the block containing `clock`.
    fn find_pivot(&self, clock: u32) -> Option<usize> {
        let mut lo = 0i64;
        let mut hi = self.blocks.len() as i64 - 1;
        while lo <= hi {
            let mid = (lo + hi) / 2;
            let block = &self.blocks[mid as usize];
            let start = block.id().clock;
            let end = block.clock_end();
            if clock < start {
                hi = mid - 1;
            } else if clock >= end {
                lo = mid + 1;
            } else {
                return Some(mid as usize);
            }
        }
        None
    }

    pub fn find(&self, clock: u32) -> Option<&Block> {
        self.find_pivot(clock).map(|i| self.blocks[i].as_ref())
    }

    pub fn find_mut(&mut self, clock: u32) -> Option<&mut Block> {
        let i = self.find_pivot(clock)?;
        Some(self.blocks[i].as_mut())
    }

    pub fn get(&self, index: usize) -> &Block {
        self.blocks[index].as_ref()
    }

    /// Splits the block straddling `clock` so that a fresh block begins
    /// exactly there, and returns that new block's index. A no-op (returns
    /// the existing index) when `clock` is already a block boundary.
    pub fn find_index_clean_start(&mut self, clock: u32) -> Result<usize, Error> {
        let i = self
            .find_pivot(clock)
            .ok_or_else(|| Error::IdNotFound(ID::new(0, clock)))?;
        let start = self.blocks[i].id().clock;
        if start == clock {
            return Ok(i);
        }
        let offset = clock - start;
        match self.blocks[i].as_mut() {
            Block::Item(item) => {
                let right = item.split(offset);
                self.blocks.insert(i + 1, Box::new(Block::Item(right)));
                Ok(i + 1)
            }
            Block::GC(range) => {
                let left_len = offset;
                let right = BlockRange::new(ID::new(range.id.client, range.id.clock + offset), range.len - left_len);
                range.len = left_len;
                self.blocks.insert(i + 1, Box::new(Block::GC(right)));
                Ok(i + 1)
            }
            Block::Skip(range) => {
                let left_len = offset;
                let right = BlockRange::new(ID::new(range.id.client, range.id.clock + offset), range.len - left_len);
                range.len = left_len;
                self.blocks.insert(i + 1, Box::new(Block::Skip(right)));
                Ok(i + 1)
            }
        }
    }

    /// Splits so that the block ending at `clock` (inclusive) becomes its
    /// own block; returns that block's index.
    pub fn find_index_clean_end(&mut self, clock: u32) -> Result<usize, Error> {
        self.find_index_clean_start(clock + 1).map(|i| i - 1)
    }

    pub fn replace(&mut self, index: usize, block: Block) {
        self.blocks[index] = Box::new(block);
    }

    /// Attempts to merge adjacent blocks starting at `index` with their
    /// successors, right-to-left, removing merged-away entries.
    pub fn try_merge_at(&mut self, index: usize) {
        if index + 1 >= self.blocks.len() {
            return;
        }
        let next = self.blocks.remove(index + 1);
        match self.blocks[index].try_merge(*next) {
            Ok(()) => {}
            Err(rejected) => self.blocks.insert(index + 1, Box::new(rejected)),
        }
    }
}

/// `client → ClientBlockList`, the complete struct log for a document.
#[derive(Debug, Default)]
pub struct BlockStore {
    clients: HashMap<ClientID, ClientBlockList, BuildHasherDefault<ClientHasher>>,
}

impl BlockStore {
    pub fn new() -> Self {
        BlockStore::default()
    }

    pub fn get(&self, client: &ClientID) -> Option<&ClientBlockList> {
        self.clients.get(client)
    }

    pub fn get_mut(&mut self, client: &ClientID) -> Option<&mut ClientBlockList> {
        self.clients.get_mut(client)
    }

    pub fn entry(&mut self, client: ClientID) -> &mut ClientBlockList {
        self.clients.entry(client).or_default()
    }

    pub fn iter_clients(&self) -> impl Iterator<Item = (&ClientID, &ClientBlockList)> {
        self.clients.iter()
    }

    pub fn iter_clients_mut(&mut self) -> impl Iterator<Item = (&ClientID, &mut ClientBlockList)> {
        self.clients.iter_mut()
    }

    pub fn get_state(&self, client: &ClientID) -> u32 {
        self.clients.get(client).map(|l| l.next_clock()).unwrap_or(0)
    }

    pub fn state_vector(&self) -> StateVector {
        let mut sv = StateVector::new();
        for (client, list) in self.clients.iter() {
            if !list.is_empty() {
                sv.set(*client, list.next_clock());
            }
        }
        sv
    }

    pub fn add(&mut self, block: Block) -> Result<(), Error> {
        self.entry(block.id().client).push(block)
    }

    /// Like [BlockStore::add], but returns a pointer to the just-appended
    /// item. Panics if `block` isn't an [Block::Item] - GC/Skip ranges have
    /// no addressable content to point to.
    pub fn add_and_get_item(&mut self, block: Block) -> Result<ItemPtr, Error> {
        let client = block.id().client;
        let list = self.entry(client);
        list.push(block)?;
        match list.get(list.len() - 1) {
            Block::Item(item) => Ok(ItemPtr::from(item)),
            _ => panic!("add_and_get_item called with a non-Item block"),
        }
    }

    pub fn find(&self, id: &ID) -> Result<&Block, Error> {
        self.clients
            .get(&id.client)
            .ok_or(Error::ClientNotPresent(id.client))?
            .find(id.clock)
            .ok_or(Error::IdNotFound(*id))
    }

    /// Resolves `id` to a live item pointer, splitting at the id's clock if
    /// it falls in the middle of a multi-unit item.
    pub fn get_item_clean_start(&mut self, id: &ID) -> Result<ItemPtr, Error> {
        let list = self
            .clients
            .get_mut(&id.client)
            .ok_or(Error::ClientNotPresent(id.client))?;
        let idx = list.find_index_clean_start(id.clock)?;
        match list.get(idx) {
            Block::Item(item) => Ok(ItemPtr::from(item)),
            _ => Err(Error::IdNotFound(*id)),
        }
    }

    /// Resolves `id` to a live item pointer whose *last* clock is `id.clock`,
    /// splitting its right neighbour off if necessary.
    pub fn get_item_clean_end(&mut self, id: &ID) -> Result<ItemPtr, Error> {
        let list = self
            .clients
            .get_mut(&id.client)
            .ok_or(Error::ClientNotPresent(id.client))?;
        let idx = list.find_index_clean_end(id.clock)?;
        match list.get(idx) {
            Block::Item(item) => Ok(ItemPtr::from(item)),
            _ => Err(Error::IdNotFound(*id)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::{ItemContent, TypePtr};

    fn item(client: ClientID, clock: u32, len: u32) -> Block {
        Block::Item(Item::new(
            ID::new(client, clock),
            None,
            None,
            None,
            None,
            TypePtr::Unknown,
            None,
            ItemContent::JSON(vec!["x".to_string(); len as usize]),
        ))
    }

    #[test]
    fn contiguity_is_enforced() {
        let mut list = ClientBlockList::new();
        list.push(item(1, 0, 3)).unwrap();
        assert!(list.push(item(1, 5, 2)).is_err());
        list.push(item(1, 3, 2)).unwrap();
        assert_eq!(list.next_clock(), 5);
    }

    #[test]
    fn find_pivot_binary_search() {
        let mut list = ClientBlockList::new();
        list.push(item(1, 0, 3)).unwrap();
        list.push(item(1, 3, 4)).unwrap();
        list.push(item(1, 7, 1)).unwrap();
        assert_eq!(list.find(5).unwrap().id().clock, 3);
        assert_eq!(list.find(7).unwrap().id().clock, 7);
        assert!(list.find(8).is_none());
    }

    #[test]
    fn state_vector_tracks_next_clock() {
        let mut store = BlockStore::new();
        store.add(item(1, 0, 3)).unwrap();
        store.add(item(2, 0, 5)).unwrap();
        let sv = store.state_vector();
        assert_eq!(sv.get(&1), 3);
        assert_eq!(sv.get(&2), 5);
        assert_eq!(sv.get(&99), 0);
    }
}
