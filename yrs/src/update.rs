use crate::block::{Block, BlockRange, Item, ItemContent, TypePtr};
use crate::block_store::StateVector;
use crate::branch::{Branch, TypeRef, TYPE_REFS_XML_ELEMENT};
use crate::error::Error;
use crate::id::{read_id, write_id, ClientID, ID};
use crate::id_set::DeleteSet;
use crate::updates::decoder::Decoder;
use crate::updates::encoder::{
    Encoder, BLOCK_GC_REF_NUMBER, BLOCK_ITEM_ANY_REF_NUMBER, BLOCK_ITEM_BINARY_REF_NUMBER,
    BLOCK_ITEM_DELETED_REF_NUMBER, BLOCK_ITEM_DOC_REF_NUMBER, BLOCK_ITEM_EMBED_REF_NUMBER,
    BLOCK_ITEM_FORMAT_REF_NUMBER, BLOCK_ITEM_JSON_REF_NUMBER, BLOCK_ITEM_STRING_REF_NUMBER,
    BLOCK_ITEM_TYPE_REF_NUMBER, BLOCK_SKIP_REF_NUMBER, HAS_ORIGIN, HAS_PARENT_SUB,
    HAS_RIGHT_ORIGIN,
};
use lib0::decoding::{Cursor, Read};
use lib0::encoding::{EncoderV1, Write};
use std::collections::BTreeMap;

/// Streaming decoder over a single update's struct section. Reads one block
/// at a time off the wire without materialising the whole update, so a
/// caller integrating structs one by one (see
/// [crate::transaction::TransactionMut::apply_update]) never holds more than
/// the current block in memory beyond the borrowed input slice.
pub struct LazyStructReader<'a> {
    decoder: Cursor<'a>,
    clients_remaining: u64,
    current_client: ClientID,
    current_clock: u32,
    structs_remaining: u64,
    filter_skips: bool,
}

impl<'a> LazyStructReader<'a> {
    pub fn new(buf: &'a [u8], filter_skips: bool) -> Result<Self, Error> {
        let mut decoder = Cursor::new(buf);
        let clients_remaining = decoder.read_var_u64()?;
        let mut reader = LazyStructReader {
            decoder,
            clients_remaining,
            current_client: 0,
            current_clock: 0,
            structs_remaining: 0,
            filter_skips,
        };
        reader.advance_client()?;
        Ok(reader)
    }

    fn advance_client(&mut self) -> Result<(), Error> {
        while self.clients_remaining > 0 {
            self.clients_remaining -= 1;
            self.structs_remaining = self.decoder.read_var_u64()?;
            self.current_client = self.decoder.read_var_u64()?;
            self.current_clock = self.decoder.read_var_u32()?;
            if self.structs_remaining > 0 {
                return Ok(());
            }
        }
        self.structs_remaining = 0;
        Ok(())
    }

    pub fn read_delete_set(mut self) -> Result<DeleteSet, Error> {
        Ok(DeleteSet::decode(&mut self.decoder)?)
    }

    /// Pulls the next `(client, block)` pair, or `None` once every client's
    /// struct section has been consumed (the cursor then sits exactly at the
    /// start of the delete set).
    pub fn next_block(&mut self) -> Result<Option<(ClientID, Block)>, Error> {
        loop {
            if self.structs_remaining == 0 {
                if self.clients_remaining == 0 {
                    return Ok(None);
                }
                self.advance_client()?;
                if self.structs_remaining == 0 {
                    return Ok(None);
                }
            }
            self.structs_remaining -= 1;
            let info = self.decoder.read_info()?;
            let kind = info & 0b0001_1111;
            let client = self.current_client;
            let id = ID::new(client, self.current_clock);
            if kind == BLOCK_GC_REF_NUMBER {
                let len = self.decoder.read_len()?;
                self.current_clock += len;
                return Ok(Some((client, Block::GC(BlockRange::new(id, len)))));
            } else if kind == BLOCK_SKIP_REF_NUMBER {
                let len = self.decoder.read_len()?;
                self.current_clock += len;
                if self.filter_skips {
                    continue;
                }
                return Ok(Some((client, Block::Skip(BlockRange::new(id, len)))));
            } else {
                let item = decode_item(id, info, kind, &mut self.decoder)?;
                self.current_clock += item.len();
                return Ok(Some((client, Block::Item(item))));
            }
        }
    }
}

fn decode_item(
    id: ID,
    info: u8,
    kind: u8,
    decoder: &mut Cursor,
) -> Result<Item, Error> {
    let origin = if info & HAS_ORIGIN != 0 {
        Some(read_id(decoder)?)
    } else {
        None
    };
    let right_origin = if info & HAS_RIGHT_ORIGIN != 0 {
        Some(read_id(decoder)?)
    } else {
        None
    };
    let (parent, parent_sub) = if origin.is_none() && right_origin.is_none() {
        let has_name = decoder.read_u8()? != 0;
        let parent = if has_name {
            TypePtr::Named(decoder.read_string()?.into())
        } else {
            TypePtr::Id(read_id(decoder)?)
        };
        let parent_sub = if info & HAS_PARENT_SUB != 0 {
            Some(decoder.read_key()?.into())
        } else {
            None
        };
        (parent, parent_sub)
    } else {
        (TypePtr::Unknown, None)
    };
    let content = decode_content(kind, decoder)?;
    Ok(Item::new(
        id,
        None,
        origin,
        None,
        right_origin,
        parent,
        parent_sub,
        content,
    ))
}

fn decode_content(kind: u8, decoder: &mut Cursor) -> Result<ItemContent, Error> {
    Ok(match kind {
        BLOCK_ITEM_ANY_REF_NUMBER => {
            let len = decoder.read_len()?;
            let mut values = Vec::with_capacity(len as usize);
            for _ in 0..len {
                values.push(decoder.read_any()?);
            }
            ItemContent::Any(values)
        }
        BLOCK_ITEM_DELETED_REF_NUMBER => ItemContent::Deleted(decoder.read_len()?),
        BLOCK_ITEM_STRING_REF_NUMBER => ItemContent::String(decoder.read_string()?.into()),
        BLOCK_ITEM_BINARY_REF_NUMBER => ItemContent::Binary(decoder.read_buf()?.into()),
        BLOCK_ITEM_JSON_REF_NUMBER => {
            let len = decoder.read_len()?;
            let mut values = Vec::with_capacity(len as usize);
            for _ in 0..len {
                values.push(decoder.read_string()?.to_owned());
            }
            ItemContent::JSON(values)
        }
        BLOCK_ITEM_EMBED_REF_NUMBER => ItemContent::Embed(decoder.read_json()?),
        BLOCK_ITEM_FORMAT_REF_NUMBER => {
            let key = decoder.read_key()?.into();
            let value = Box::new(decoder.read_json()?);
            ItemContent::Format(key, value)
        }
        BLOCK_ITEM_TYPE_REF_NUMBER => {
            let kind = decoder.read_type_ref()?;
            let type_ref = if kind == TYPE_REFS_XML_ELEMENT {
                TypeRef::XmlElement(decoder.read_string()?.into())
            } else {
                TypeRef::from_kind(kind)
            };
            ItemContent::Type(Box::new(Branch::new(type_ref)))
        }
        BLOCK_ITEM_DOC_REF_NUMBER => {
            let guid = decoder.read_string()?.into();
            let opts = decoder.read_json()?;
            ItemContent::Doc(guid, opts)
        }
        other => return Err(Error::Codec(lib0::Error::UnexpectedValue(other))),
    })
}

fn encode_item<E: Encoder>(item: &Item, encoder: &mut E) {
    let mut info = item.content.kind();
    if item.origin.is_some() {
        info |= HAS_ORIGIN;
    }
    if item.right_origin.is_some() {
        info |= HAS_RIGHT_ORIGIN;
    }
    if item.origin.is_none() && item.right_origin.is_none() && item.parent_sub.is_some() {
        info |= HAS_PARENT_SUB;
    }
    encoder.write_info(info);
    if let Some(origin) = item.origin {
        write_id(&origin, encoder);
    }
    if let Some(right_origin) = item.right_origin {
        write_id(&right_origin, encoder);
    }
    if item.origin.is_none() && item.right_origin.is_none() {
        match &item.parent {
            TypePtr::Named(name) => {
                encoder.write_u8(1);
                encoder.write_string(name);
            }
            TypePtr::Id(parent_id) => {
                encoder.write_u8(0);
                write_id(parent_id, encoder);
            }
            TypePtr::Branch(branch) => {
                if let Some(name) = &branch.name {
                    encoder.write_u8(1);
                    encoder.write_string(name);
                } else if let Some(item) = branch.item {
                    encoder.write_u8(0);
                    write_id(&item.id(), encoder);
                } else {
                    encoder.write_u8(1);
                    encoder.write_string("");
                }
            }
            TypePtr::Unknown => {
                encoder.write_u8(1);
                encoder.write_string("");
            }
        }
        if let Some(key) = &item.parent_sub {
            encoder.write_key(key);
        }
    }
    item.content.encode(encoder);
}

/// Buffers freshly created or re-encoded structs per client, emitting the
/// `numClients · (numStructs · client · startClock · struct*)*` header once
/// [LazyStructWriter::finish] is called.
#[derive(Default)]
pub struct LazyStructWriter {
    clients: BTreeMap<ClientID, Vec<(ID, EncodedBlock)>>,
}

enum EncodedBlock {
    Item(Vec<u8>),
    Range { gc: bool, len: u32 },
}

impl LazyStructWriter {
    pub fn new() -> Self {
        LazyStructWriter::default()
    }

    pub fn write_block(&mut self, client: ClientID, block: &Block) {
        let encoded = match block {
            Block::Item(item) => {
                let mut enc = EncoderV1::new();
                encode_item(item, &mut enc);
                EncodedBlock::Item(enc.to_vec())
            }
            Block::GC(r) => EncodedBlock::Range { gc: true, len: r.len },
            Block::Skip(r) => EncodedBlock::Range { gc: false, len: r.len },
        };
        self.clients.entry(client).or_default().push((*block.id(), encoded));
    }

    pub fn finish(self) -> Vec<u8> {
        let mut enc = EncoderV1::new();
        enc.write_var_u64(self.clients.len() as u64);
        for (client, blocks) in self.clients.into_iter() {
            enc.write_var_u64(blocks.len() as u64);
            enc.write_var_u64(client);
            let start_clock = blocks.first().map(|(id, _)| id.clock).unwrap_or(0);
            enc.write_var_u64(start_clock as u64);
            for (_, block) in blocks {
                match block {
                    EncodedBlock::Item(bytes) => enc.write_bytes(&bytes),
                    EncodedBlock::Range { gc, len } => {
                        enc.write_info(if gc { BLOCK_GC_REF_NUMBER } else { BLOCK_SKIP_REF_NUMBER });
                        enc.write_len(len);
                    }
                }
            }
        }
        enc.to_vec()
    }
}

/// A fully decoded binary update: every struct grouped by client in clock
/// order, plus the delete set that travelled with them. This is the
/// materialised counterpart to [LazyStructReader]'s streaming view - used
/// once a whole update needs random access (merging, diffing, or buffering
/// as [crate::store::PendingUpdate]).
#[derive(Debug, Clone, Default)]
pub struct Update {
    pub structs: BTreeMap<ClientID, Vec<Block>>,
    pub delete_set: DeleteSet,
}

impl Update {
    pub fn decode(buf: &[u8]) -> Result<Update, Error> {
        let mut reader = LazyStructReader::new(buf, false)?;
        let mut structs: BTreeMap<ClientID, Vec<Block>> = BTreeMap::new();
        while let Some((client, block)) = reader.next_block()? {
            structs.entry(client).or_default().push(block);
        }
        let delete_set = reader.read_delete_set()?;
        Ok(Update { structs, delete_set })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = LazyStructWriter::new();
        for (client, blocks) in self.structs.iter() {
            for block in blocks {
                writer.write_block(*client, block);
            }
        }
        let mut bytes = writer.finish();
        let mut ds_enc = EncoderV1::new();
        self.delete_set.encode(&mut ds_enc);
        bytes.extend_from_slice(ds_enc.as_slice());
        bytes
    }

    pub fn is_empty(&self) -> bool {
        self.structs.values().all(|v| v.is_empty()) && self.delete_set.is_empty()
    }

    /// Per client, if the log starts at clock 0 and the first struct isn't a
    /// `Skip`, the receiver's resulting clock for that client is exactly the
    /// end of the last struct; clients with a leading gap contribute nothing
    /// (the sender can't vouch for clock 0 onward).
    pub fn state_vector(&self) -> StateVector {
        let mut sv = StateVector::new();
        for (client, blocks) in self.structs.iter() {
            if let Some(first) = blocks.first() {
                if first.id().clock == 0 && !matches!(first, Block::Skip(_)) {
                    let end = blocks.last().unwrap().clock_end();
                    sv.set(*client, end);
                }
            }
        }
        sv
    }

    /// Combines several updates into one, concatenating and re-sorting each
    /// client's structs and merging adjacent ones where possible. Produces
    /// the same resulting document state as applying the inputs one at a
    /// time; struct boundaries may differ from a byte-identical multi-way
    /// merge since this implementation materialises rather than streams (see
    /// this crate's design notes for the tradeoff).
    pub fn merge_updates(updates: impl IntoIterator<Item = Update>) -> Update {
        let mut structs: BTreeMap<ClientID, Vec<Block>> = BTreeMap::new();
        let mut delete_sets = Vec::new();
        for update in updates {
            for (client, blocks) in update.structs {
                structs.entry(client).or_default().extend(blocks);
            }
            delete_sets.push(update.delete_set);
        }
        for blocks in structs.values_mut() {
            blocks.sort_by_key(|b| b.id().clock);
            let mut merged: Vec<Block> = Vec::with_capacity(blocks.len());
            for block in std::mem::take(blocks) {
                let adjacent = merged
                    .last()
                    .map(|last| last.clock_end() == block.id().clock)
                    .unwrap_or(false);
                if adjacent {
                    let mut prev = merged.pop().unwrap();
                    match prev.try_merge(block) {
                        Ok(()) => merged.push(prev),
                        Err(rejected) => {
                            merged.push(prev);
                            merged.push(rejected);
                        }
                    }
                } else {
                    merged.push(block);
                }
            }
            *blocks = merged;
        }
        Update {
            structs,
            delete_set: DeleteSet::merge_all(delete_sets),
        }
    }

    /// Returns the subset of `self` that `sv` hasn't seen yet, splitting any
    /// struct that straddles the boundary.
    pub fn diff(&self, sv: &StateVector) -> Update {
        let mut structs: BTreeMap<ClientID, Vec<Block>> = BTreeMap::new();
        for (client, blocks) in self.structs.iter() {
            let known = sv.get(client);
            let mut out = Vec::new();
            for block in blocks {
                if block.clock_end() <= known {
                    continue;
                }
                if block.id().clock >= known {
                    out.push(clone_block(block));
                } else {
                    let offset = known - block.id().clock;
                    out.push(split_block_suffix(block, offset));
                }
            }
            if !out.is_empty() {
                structs.insert(*client, out);
            }
        }
        Update {
            structs,
            delete_set: self.delete_set.clone(),
        }
    }
}

pub(crate) fn clone_block(block: &Block) -> Block {
    match block {
        Block::GC(r) => Block::GC(*r),
        Block::Skip(r) => Block::Skip(*r),
        Block::Item(item) => Block::Item(clone_item(item)),
    }
}

pub(crate) fn clone_item(item: &Item) -> Item {
    let content = match &item.content {
        ItemContent::Any(v) => ItemContent::Any(v.clone()),
        ItemContent::String(s) => ItemContent::String(s.clone()),
        ItemContent::Binary(b) => ItemContent::Binary(b.clone()),
        ItemContent::JSON(v) => ItemContent::JSON(v.clone()),
        ItemContent::Embed(v) => ItemContent::Embed(v.clone()),
        ItemContent::Format(k, v) => ItemContent::Format(k.clone(), v.clone()),
        ItemContent::Type(b) => ItemContent::Type(Box::new(Branch::new(b.type_ref.clone()))),
        ItemContent::Doc(g, o) => ItemContent::Doc(g.clone(), o.clone()),
        ItemContent::Deleted(len) => ItemContent::Deleted(*len),
    };
    let mut cloned = Item::new(
        item.id,
        None,
        item.origin,
        None,
        item.right_origin,
        item.parent.clone(),
        item.parent_sub.clone(),
        content,
    );
    cloned.info = item.info;
    cloned
}

pub(crate) fn split_block_suffix(block: &Block, offset: u32) -> Block {
    match block {
        Block::GC(r) => Block::GC(BlockRange::new(ID::new(r.id.client, r.id.clock + offset), r.len - offset)),
        Block::Skip(r) => Block::Skip(BlockRange::new(ID::new(r.id.client, r.id.clock + offset), r.len - offset)),
        Block::Item(item) => {
            let mut prefix = clone_item(item);
            let suffix = prefix.split(offset);
            Block::Item(suffix)
        }
    }
}

impl TypeRef {
    /// Inverse of [TypeRef::kind] for the non-`XmlElement` variants (that one
    /// carries a tag name which must be read separately).
    pub fn from_kind(kind: u8) -> TypeRef {
        match kind {
            crate::branch::TYPE_REFS_ARRAY => TypeRef::Array,
            crate::branch::TYPE_REFS_MAP => TypeRef::Map,
            crate::branch::TYPE_REFS_TEXT => TypeRef::Text,
            crate::branch::TYPE_REFS_XML_FRAGMENT => TypeRef::XmlFragment,
            crate::branch::TYPE_REFS_XML_HOOK => TypeRef::XmlHook,
            crate::branch::TYPE_REFS_XML_TEXT => TypeRef::XmlText,
            crate::branch::TYPE_REFS_DOC => TypeRef::SubDoc,
            _ => TypeRef::Undefined,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_item(client: ClientID, clock: u32, text: &str) -> Block {
        Block::Item(Item::new(
            ID::new(client, clock),
            None,
            None,
            None,
            None,
            TypePtr::Named("text".into()),
            None,
            ItemContent::String(text.into()),
        ))
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut structs = BTreeMap::new();
        structs.insert(1u64, vec![sample_item(1, 0, "hello")]);
        let update = Update {
            structs,
            delete_set: DeleteSet::new(),
        };
        let bytes = update.encode();
        let decoded = Update::decode(&bytes).unwrap();
        assert_eq!(decoded.structs.len(), 1);
        let item = decoded.structs[&1][0].as_item().unwrap();
        match &item.content {
            ItemContent::String(s) => assert_eq!(s.as_str(), "hello"),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn state_vector_skips_non_zero_start() {
        let mut structs = BTreeMap::new();
        structs.insert(1u64, vec![sample_item(1, 0, "ab")]);
        structs.insert(2u64, vec![sample_item(2, 5, "cd")]);
        let update = Update {
            structs,
            delete_set: DeleteSet::new(),
        };
        let sv = update.state_vector();
        assert_eq!(sv.get(&1), 2);
        assert_eq!(sv.get(&2), 0);
    }

    #[test]
    fn diff_splits_straddling_struct() {
        let mut structs = BTreeMap::new();
        structs.insert(1u64, vec![sample_item(1, 0, "hello")]);
        let update = Update {
            structs,
            delete_set: DeleteSet::new(),
        };
        let mut sv = StateVector::new();
        sv.set(1, 2);
        let diffed = update.diff(&sv);
        let item = diffed.structs[&1][0].as_item().unwrap();
        assert_eq!(item.id.clock, 2);
        match &item.content {
            ItemContent::String(s) => assert_eq!(s.as_str(), "llo"),
            other => panic!("unexpected content {:?}", other),
        }
    }
}
