use crate::block::BlockRange;
use crate::block_store::BlockStore;
use crate::id::{ClientID, ID};
use crate::updates::decoder::Decoder;
use crate::updates::encoder::Encoder;
use lib0::decoding::Read;
use lib0::encoding::Write;
use std::collections::HashMap;

/// A single `[clock, clock+len)` deleted range for one client.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IdRange {
    pub clock: u32,
    pub len: u32,
}

impl IdRange {
    pub fn new(clock: u32, len: u32) -> Self {
        IdRange { clock, len }
    }

    pub fn end(&self) -> u32 {
        self.clock + self.len
    }

    pub fn contains(&self, clock: u32) -> bool {
        clock >= self.clock && clock < self.end()
    }
}

/// Per-client sorted, disjoint ranges of deleted clocks. Built either
/// incrementally during a transaction (as items are marked deleted) or in
/// bulk from a [BlockStore] snapshot.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DeleteSet {
    clients: HashMap<ClientID, Vec<IdRange>>,
}

impl DeleteSet {
    pub fn new() -> Self {
        DeleteSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.values().all(|v| v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientID, &Vec<IdRange>)> {
        self.clients.iter()
    }

    /// Appends a range for `id.client`. Ranges are not kept sorted here;
    /// call [DeleteSet::sort_and_merge] once a batch of insertions is done.
    pub fn insert(&mut self, id: ID, len: u32) {
        if len == 0 {
            return;
        }
        self.clients
            .entry(id.client)
            .or_default()
            .push(IdRange::new(id.clock, len));
    }

    /// Sorts each client's ranges by clock and collapses any that touch or
    /// overlap: `[a,b) ∪ [c,d)` collapses to `[a, max(b,d))` whenever
    /// `c <= b`. After this call, ranges are strictly increasing and
    /// disjoint, matching the invariant required by [DeleteSet::is_deleted].
    pub fn sort_and_merge(&mut self) {
        for ranges in self.clients.values_mut() {
            if ranges.len() <= 1 {
                continue;
            }
            ranges.sort_by_key(|r| r.clock);
            let mut merged: Vec<IdRange> = Vec::with_capacity(ranges.len());
            for &r in ranges.iter() {
                if let Some(last) = merged.last_mut() {
                    if r.clock <= last.end() {
                        let new_end = last.end().max(r.end());
                        last.len = new_end - last.clock;
                        continue;
                    }
                }
                merged.push(r);
            }
            *ranges = merged;
        }
    }

    /// Binary search for whether `id` falls in any deleted range for its
    /// client. Requires the set to have been through
    /// [DeleteSet::sort_and_merge].
    pub fn is_deleted(&self, id: &ID) -> bool {
        if let Some(ranges) = self.clients.get(&id.client) {
            ranges
                .binary_search_by(|r| {
                    if id.clock < r.clock {
                        std::cmp::Ordering::Greater
                    } else if id.clock >= r.end() {
                        std::cmp::Ordering::Less
                    } else {
                        std::cmp::Ordering::Equal
                    }
                })
                .is_ok()
        } else {
            false
        }
    }

    /// Merges `other` into `self`, concatenating per-client range lists and
    /// re-running [DeleteSet::sort_and_merge] once over the combined set -
    /// cheaper than merging N sets pairwise with a sort each time.
    pub fn merge(&mut self, other: DeleteSet) {
        for (client, ranges) in other.clients {
            self.clients.entry(client).or_default().extend(ranges);
        }
        self.sort_and_merge();
    }

    pub fn merge_all(sets: impl IntoIterator<Item = DeleteSet>) -> DeleteSet {
        let mut result = DeleteSet::new();
        for set in sets {
            result.merge(set);
        }
        result
    }

    /// Scans `store` for every tombstoned range across all clients,
    /// building a delete set equivalent to one accumulated incrementally by
    /// a transaction that deleted the same items.
    pub fn from_store(store: &BlockStore) -> DeleteSet {
        let mut ds = DeleteSet::new();
        for (client, blocks) in store.iter_clients() {
            for block in blocks.iter() {
                if block.is_deleted() {
                    ds.insert(*block.id(), block.len());
                }
            }
            let _ = client;
        }
        ds.sort_and_merge();
        ds
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        let mut clients: Vec<_> = self.clients.iter().filter(|(_, r)| !r.is_empty()).collect();
        clients.sort_by_key(|(c, _)| **c);
        encoder.write_var_u64(clients.len() as u64);
        for (client, ranges) in clients {
            encoder.write_var_u64(*client);
            encoder.write_var_u64(ranges.len() as u64);
            for r in ranges {
                encoder.write_var_u64(r.clock as u64);
                encoder.write_var_u64(r.len as u64);
            }
        }
    }

    pub fn decode<'a, D: Decoder<'a>>(decoder: &mut D) -> lib0::Result<DeleteSet> {
        let mut ds = DeleteSet::new();
        let num_clients = decoder.read_var_u64()?;
        for _ in 0..num_clients {
            let client = decoder.read_var_u64()?;
            let num_ranges = decoder.read_var_u64()?;
            let ranges = ds.clients.entry(client).or_default();
            for _ in 0..num_ranges {
                let clock = decoder.read_var_u32()?;
                let len = decoder.read_var_u32()?;
                ranges.push(IdRange::new(clock, len));
            }
        }
        Ok(ds)
    }
}

impl From<&BlockStore> for DeleteSet {
    fn from(store: &BlockStore) -> Self {
        DeleteSet::from_store(store)
    }
}

/// Converts a decoded block range into a [DeleteSet] entry; used by the GC
/// struct decode path.
pub(crate) fn range_to_delete_set(range: &BlockRange, ds: &mut DeleteSet) {
    ds.insert(range.id, range.len);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sort_and_merge_collapses_overlaps() {
        let mut ds = DeleteSet::new();
        ds.insert(ID::new(1, 0), 3); // [0,3)
        ds.insert(ID::new(1, 5), 2); // [5,7)
        ds.insert(ID::new(1, 3), 2); // [3,5) touches both -> collapse all
        ds.sort_and_merge();
        let ranges = &ds.clients[&1];
        assert_eq!(ranges, &vec![IdRange::new(0, 7)]);
    }

    #[test]
    fn is_deleted_uses_binary_search() {
        let mut ds = DeleteSet::new();
        ds.insert(ID::new(1, 10), 5);
        ds.sort_and_merge();
        assert!(ds.is_deleted(&ID::new(1, 12)));
        assert!(!ds.is_deleted(&ID::new(1, 20)));
        assert!(!ds.is_deleted(&ID::new(2, 12)));
    }

    #[test]
    fn merge_multiple_sets() {
        let mut a = DeleteSet::new();
        a.insert(ID::new(1, 0), 2);
        let mut b = DeleteSet::new();
        b.insert(ID::new(1, 2), 2);
        b.insert(ID::new(2, 0), 1);
        let merged = DeleteSet::merge_all([a, b]);
        assert_eq!(merged.clients[&1], vec![IdRange::new(0, 4)]);
        assert_eq!(merged.clients[&2], vec![IdRange::new(0, 1)]);
    }
}
