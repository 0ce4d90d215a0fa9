use crate::branch::{Branch, BranchPtr};
use crate::id::{read_id, write_id, ID};
use crate::transaction::TransactionMut;
use crate::updates::decoder::Decoder;
use crate::updates::encoder::Encoder;
use lib0::any::Any;
use lib0::encoding::Write;
use smallstr::SmallString;
use std::fmt;
use std::ptr::NonNull;

/// Inline-capacity string type used for `ItemContent::String`. Most runs of
/// user-typed text are short; this avoids a heap allocation for the common
/// case while still supporting arbitrarily long runs.
pub type InnerStr = SmallString<[u8; 8]>;

bitflags::bitflags! {
    /// Bit flags stored alongside every [Item]. `info` doubles as both the
    /// content-kind discriminant (low 5 bits, see [crate::updates::encoder])
    /// and these runtime flags (high 3 bits) once a struct has been
    /// materialized in memory.
    #[derive(Default)]
    pub struct ItemFlags: u8 {
        /// Item has been marked deleted. Its content is logically invisible
        /// but its `left`/`right`/`origin` pointers remain intact until GC.
        const DELETED  = 0b0000_0001;
        /// Item contributes to its parent's countable length.
        const COUNTABLE = 0b0000_0010;
        /// Protected from garbage collection, typically because an undo
        /// manager may need to revive it.
        const KEEP = 0b0000_0100;
        /// A marker struct used only internally by [crate::branch::SearchMarker]
        /// bookkeeping; never observed by callers.
        const MARKER = 0b0000_1000;
    }
}

/// A single entry in a client's append-only log. `GC` and `Skip` carry no
/// content; `Item` carries user content and participates in the doubly
/// linked list that gives shared types their positional structure.
pub enum Block {
    Item(Item),
    GC(BlockRange),
    Skip(BlockRange),
}

/// A tombstoned or not-yet-integrated clock range with no content attached.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BlockRange {
    pub id: ID,
    pub len: u32,
}

impl BlockRange {
    pub fn new(id: ID, len: u32) -> Self {
        BlockRange { id, len }
    }

    pub fn clock_end(&self) -> u32 {
        self.id.clock + self.len
    }
}

impl Block {
    pub fn id(&self) -> &ID {
        match self {
            Block::Item(item) => &item.id,
            Block::GC(r) | Block::Skip(r) => &r.id,
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            Block::Item(item) => item.len(),
            Block::GC(r) | Block::Skip(r) => r.len,
        }
    }

    pub fn clock_end(&self) -> u32 {
        self.id().clock + self.len()
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            Block::Item(item) => item.is_deleted(),
            Block::GC(_) => true,
            Block::Skip(_) => false,
        }
    }

    pub fn as_item(&self) -> Option<&Item> {
        match self {
            Block::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_item_mut(&mut self) -> Option<&mut Item> {
        match self {
            Block::Item(item) => Some(item),
            _ => None,
        }
    }

    /// Attempts to merge `other` into `self` in place, consuming it on
    /// success. Both must be the same variant, adjacent in clock space, and
    /// (for items) satisfy the content-merge rules in [ItemContent::try_merge].
    pub fn try_merge(&mut self, other: Block) -> Result<(), Block> {
        match (self, other) {
            (Block::GC(a), Block::GC(b)) if a.clock_end() == b.id.clock => {
                a.len += b.len;
                Ok(())
            }
            (Block::Skip(a), Block::Skip(b)) if a.clock_end() == b.id.clock => {
                a.len += b.len;
                Ok(())
            }
            (Block::Item(a), Block::Item(b)) => a.try_merge(b).map_err(Block::Item),
            (_, other) => Err(other),
        }
    }
}

/// A handle to an [Item] stored in the [crate::block_store::BlockStore]. Items
/// live in a `Box` owned by the client's block list, so their address is
/// stable even as the surrounding `Vec<Box<Block>>` grows or shifts - the
/// pointer remains valid for as long as the store is alive and the item
/// hasn't been replaced by a `GC` tombstone.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct ItemPtr(NonNull<Item>);

impl ItemPtr {
    pub fn id(&self) -> ID {
        self.deref().id
    }

    pub fn last_id(&self) -> ID {
        let item = self.deref();
        ID::new(item.id.client, item.id.clock + item.len() - 1)
    }
}

impl From<&Item> for ItemPtr {
    fn from(item: &Item) -> Self {
        ItemPtr(NonNull::from(item))
    }
}

impl From<&mut Item> for ItemPtr {
    fn from(item: &mut Item) -> Self {
        ItemPtr(NonNull::from(item))
    }
}

impl std::ops::Deref for ItemPtr {
    type Target = Item;

    fn deref(&self) -> &Self::Target {
        // SAFETY: items are heap-allocated once inside their client's block
        // list and are never moved or freed while a store lives; only their
        // fields are mutated in place (e.g. on delete, split or GC).
        unsafe { self.0.as_ref() }
    }
}

impl std::ops::DerefMut for ItemPtr {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { self.0.as_mut() }
    }
}

impl fmt::Debug for ItemPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.deref())
    }
}

/// A doubly-linked-list cell carrying user content. See the data model
/// section of the crate root documentation for the meaning of each field.
pub struct Item {
    pub id: ID,
    /// Resolved left neighbour, valid only after integration.
    pub left: Option<ItemPtr>,
    /// Resolved right neighbour, valid only after integration.
    pub right: Option<ItemPtr>,
    /// ID of the left neighbour *at the time this item was created*. Fixed
    /// for the item's lifetime; used by the integration algorithm to
    /// resolve concurrent insertions deterministically.
    pub origin: Option<ID>,
    /// ID of the right neighbour at creation time. Fixed for the item's
    /// lifetime.
    pub right_origin: Option<ID>,
    /// The shared type (or, transiently during decode, the ID of a parent
    /// item not yet resolved) this item belongs to.
    pub parent: TypePtr,
    /// Key under which this item is slotted when `parent` is map-like.
    /// `None` for list-like insertions.
    pub parent_sub: Option<Box<str>>,
    /// If this item was replaced by an undo/redo operation, the ID of its
    /// replacement. See [crate::store::Store::follow_redone].
    pub redone: Option<ID>,
    pub content: ItemContent,
    pub info: ItemFlags,
}

impl Item {
    pub fn new(
        id: ID,
        left: Option<ItemPtr>,
        origin: Option<ID>,
        right: Option<ItemPtr>,
        right_origin: Option<ID>,
        parent: TypePtr,
        parent_sub: Option<Box<str>>,
        content: ItemContent,
    ) -> Self {
        let mut info = ItemFlags::empty();
        if content.is_countable() {
            info |= ItemFlags::COUNTABLE;
        }
        Item {
            id,
            left,
            right,
            origin,
            right_origin,
            parent,
            parent_sub,
            redone: None,
            content,
            info,
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.content.len()
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.info.contains(ItemFlags::DELETED)
    }

    #[inline]
    pub fn is_countable(&self) -> bool {
        self.info.contains(ItemFlags::COUNTABLE)
    }

    #[inline]
    pub fn is_keep(&self) -> bool {
        self.info.contains(ItemFlags::KEEP)
    }

    pub fn mark_deleted(&mut self) {
        self.info.insert(ItemFlags::DELETED);
    }

    pub fn set_keep(&mut self, keep: bool) {
        if keep {
            self.info.insert(ItemFlags::KEEP);
        } else {
            self.info.remove(ItemFlags::KEEP);
        }
    }

    pub fn last_id(&self) -> ID {
        ID::new(self.id.client, self.id.clock + self.len() - 1)
    }

    /// Splits this item at `offset` units from its start. `self` keeps the
    /// prefix; the returned item holds the suffix and must be inserted into
    /// the block store immediately by the caller (the split does not touch
    /// neighbouring pointers besides its own `left`/`origin`; rewiring the
    /// previous right neighbour's `left` pointer is the caller's job, see
    /// [crate::store::Store::find_index_clean_start]).
    pub fn split(&mut self, offset: u32) -> Item {
        debug_assert!(offset > 0 && offset < self.len());
        let right_content = self.content.split(offset);
        let right_id = ID::new(self.id.client, self.id.clock + offset);
        let mut right = Item::new(
            right_id,
            None,
            Some(ID::new(self.id.client, self.id.clock + offset - 1)),
            self.right,
            self.right_origin,
            self.parent.clone(),
            self.parent_sub.clone(),
            right_content,
        );
        right.info = self.info;
        right.redone = self.redone.map(|r| r.successor(offset));
        // the new split boundary becomes this item's right origin
        self.right_origin = Some(right_id);
        right
    }

    /// Attempts to merge `other` (assumed to be this item's current right
    /// neighbour in clock space) into `self`. Requires: same client,
    /// adjacent clocks, equal deletion state, mergeable content, and no
    /// `redone` pointer on either side (an undone item must never silently
    /// grow).
    pub fn try_merge(&mut self, other: Item) -> Result<(), Item> {
        let mergeable = self.id.client == other.id.client
            && self.id.clock + self.len() == other.id.clock
            && self.is_deleted() == other.is_deleted()
            && self.redone.is_none()
            && other.redone.is_none()
            // `other` must have been this item's right neighbour at
            // integration time, and vice versa, or neither ever had one.
            && self.right_origin == Some(other.id)
            && other.origin == Some(self.last_id())
            && self.parent == other.parent
            && self.parent_sub == other.parent_sub
            && self.content.can_merge(&other.content);
        if mergeable && self.content.try_merge(&other.content) {
            self.right = other.right;
            self.right_origin = other.right_origin;
            Ok(())
        } else {
            Err(other)
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if self.is_deleted() {
            write!(f, "(deleted)")?;
        }
        write!(f, ": {:?}", self.content)
    }
}

/// Either a resolved pointer to a shared type, or (transiently, while a
/// decoded-but-not-yet-integrated item is waiting on its parent to show up)
/// an unresolved name or item ID.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TypePtr {
    Branch(BranchPtr),
    Named(std::sync::Arc<str>),
    Id(ID),
    Unknown,
}

/// The nine content variants a wire struct may carry. See the data model
/// section for a description of each.
pub enum ItemContent {
    Any(Vec<Any>),
    String(InnerStr),
    Binary(Box<[u8]>),
    JSON(Vec<String>),
    Embed(Any),
    Format(Box<str>, Box<Any>),
    Type(Box<Branch>),
    Doc(Box<str>, Any),
    /// A struct that is deleted from the moment it is created - e.g. content
    /// produced by splitting an already-deleted item. Carries only a length;
    /// never countable, never visible through [ItemContent::get_content].
    Deleted(u32),
}

impl ItemContent {
    /// The number of countable units this content occupies. `Format` is
    /// always zero-length: it never advances positional indices.
    pub fn len(&self) -> u32 {
        match self {
            ItemContent::Any(v) => v.len() as u32,
            ItemContent::String(s) => s.chars().map(|c| c.len_utf16() as u32).sum(),
            ItemContent::Binary(_) => 1,
            ItemContent::JSON(v) => v.len() as u32,
            ItemContent::Embed(_) => 1,
            ItemContent::Format(_, _) => 0,
            ItemContent::Type(_) => 1,
            ItemContent::Doc(_, _) => 1,
            ItemContent::Deleted(len) => *len,
        }
    }

    pub fn is_countable(&self) -> bool {
        !matches!(self, ItemContent::Format(_, _) | ItemContent::Deleted(_))
    }

    pub fn splittable(&self) -> bool {
        matches!(
            self,
            ItemContent::Any(_) | ItemContent::String(_) | ItemContent::JSON(_) | ItemContent::Deleted(_)
        )
    }

    pub fn can_merge(&self, other: &ItemContent) -> bool {
        matches!(
            (self, other),
            (ItemContent::Any(_), ItemContent::Any(_))
                | (ItemContent::String(_), ItemContent::String(_))
                | (ItemContent::JSON(_), ItemContent::JSON(_))
                | (ItemContent::Deleted(_), ItemContent::Deleted(_))
        )
    }

    /// Splits content at `offset` units, mutating `self` into the prefix and
    /// returning the suffix. Only called on `splittable` content.
    pub fn split(&mut self, offset: u32) -> ItemContent {
        match self {
            ItemContent::Any(values) => {
                let right = values.split_off(offset as usize);
                ItemContent::Any(right)
            }
            ItemContent::JSON(values) => {
                let right = values.split_off(offset as usize);
                ItemContent::JSON(right)
            }
            ItemContent::String(s) => {
                let (left, right) = split_utf16(s, offset);
                *s = left;
                ItemContent::String(right)
            }
            ItemContent::Deleted(len) => {
                let offset = offset.min(*len);
                let right_len = *len - offset;
                *len = offset;
                ItemContent::Deleted(right_len)
            }
            other => panic!("content variant {:?} is not splittable", other),
        }
    }

    pub fn try_merge(&mut self, other: &ItemContent) -> bool {
        match (self, other) {
            (ItemContent::Any(a), ItemContent::Any(b)) => {
                a.extend_from_slice(b);
                true
            }
            (ItemContent::JSON(a), ItemContent::JSON(b)) => {
                a.extend_from_slice(b);
                true
            }
            (ItemContent::String(a), ItemContent::String(b)) => {
                a.push_str(b);
                true
            }
            (ItemContent::Deleted(a), ItemContent::Deleted(b)) => {
                *a += *b;
                true
            }
            _ => false,
        }
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self {
            ItemContent::Any(values) => {
                encoder.write_len(values.len() as u32);
                for v in values {
                    encoder.write_any(v);
                }
            }
            ItemContent::String(s) => encoder.write_string(s),
            ItemContent::Binary(b) => encoder.write_buf(b),
            ItemContent::JSON(values) => {
                encoder.write_len(values.len() as u32);
                for v in values {
                    encoder.write_string(v);
                }
            }
            ItemContent::Embed(any) => encoder.write_json(any),
            ItemContent::Format(key, value) => {
                encoder.write_key(key);
                encoder.write_json(value);
            }
            ItemContent::Type(branch) => encoder.write_type_ref(branch.type_ref().kind()),
            ItemContent::Doc(guid, opts) => {
                encoder.write_string(guid);
                encoder.write_json(opts);
            }
            ItemContent::Deleted(len) => encoder.write_len(*len),
        }
    }

    /// Expands this content into one [crate::types::Value] per countable unit,
    /// in order. Used when building [crate::types::Change::Added] runs for
    /// array-like event deltas.
    pub fn get_content(&self) -> Vec<crate::types::Value> {
        match self {
            ItemContent::Any(values) => values.iter().cloned().map(crate::types::Value::Any).collect(),
            ItemContent::String(s) => vec![crate::types::Value::Any(Any::String(s.as_str().into()))],
            ItemContent::Binary(b) => vec![crate::types::Value::Any(Any::Buffer(b.clone()))],
            ItemContent::JSON(values) => values
                .iter()
                .map(|v| crate::types::Value::Any(Any::String(v.as_str().into())))
                .collect(),
            ItemContent::Embed(v) => vec![crate::types::Value::Any(v.clone())],
            ItemContent::Format(_, _) => Vec::new(),
            ItemContent::Type(b) => vec![crate::types::BranchPtr::from(b.as_ref()).into()],
            ItemContent::Doc(guid, _) => vec![crate::types::Value::Any(Any::String(guid.as_ref().into()))],
            ItemContent::Deleted(_) => Vec::new(),
        }
    }

    /// The single value a map-like slot holding this content should report,
    /// i.e. the last element for multi-valued content.
    pub fn get_last(&self) -> Option<crate::types::Value> {
        match self {
            ItemContent::Any(values) => values.last().cloned().map(crate::types::Value::Any),
            ItemContent::Type(b) => Some(crate::types::BranchPtr::from(b.as_ref()).into()),
            _ => self.get_content().pop(),
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            ItemContent::Any(_) => crate::updates::encoder::BLOCK_ITEM_ANY_REF_NUMBER,
            ItemContent::String(_) => crate::updates::encoder::BLOCK_ITEM_STRING_REF_NUMBER,
            ItemContent::Binary(_) => crate::updates::encoder::BLOCK_ITEM_BINARY_REF_NUMBER,
            ItemContent::JSON(_) => crate::updates::encoder::BLOCK_ITEM_JSON_REF_NUMBER,
            ItemContent::Embed(_) => crate::updates::encoder::BLOCK_ITEM_EMBED_REF_NUMBER,
            ItemContent::Format(_, _) => crate::updates::encoder::BLOCK_ITEM_FORMAT_REF_NUMBER,
            ItemContent::Type(_) => crate::updates::encoder::BLOCK_ITEM_TYPE_REF_NUMBER,
            ItemContent::Doc(_, _) => crate::updates::encoder::BLOCK_ITEM_DOC_REF_NUMBER,
            ItemContent::Deleted(_) => crate::updates::encoder::BLOCK_ITEM_DELETED_REF_NUMBER,
        }
    }
}

/// Splits `s` at `offset` UTF-16 code units. When `offset` falls cleanly on a
/// char boundary the split is exact; when it falls inside an astral char's
/// surrogate pair (impossible to split without breaking the pair), both
/// halves instead get a U+FFFD replacement character at the boundary rather
/// than producing an invalid lone surrogate.
fn split_utf16(s: &str, offset: u32) -> (InnerStr, InnerStr) {
    let mut units = 0u32;
    for (i, c) in s.char_indices() {
        let width = c.len_utf16() as u32;
        if units == offset {
            return (InnerStr::from(&s[..i]), InnerStr::from(&s[i..]));
        }
        if units < offset && offset < units + width {
            let mut left = InnerStr::from(&s[..i]);
            left.push('\u{FFFD}');
            let mut right = InnerStr::from("\u{FFFD}");
            right.push_str(&s[i + c.len_utf8()..]);
            return (left, right);
        }
        units += width;
    }
    (InnerStr::from(s), InnerStr::new())
}

impl fmt::Debug for ItemContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemContent::Any(v) => write!(f, "Any({:?})", v),
            ItemContent::String(s) => write!(f, "String({:?})", s.as_str()),
            ItemContent::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
            ItemContent::JSON(v) => write!(f, "JSON({:?})", v),
            ItemContent::Embed(v) => write!(f, "Embed({:?})", v),
            ItemContent::Format(k, v) => write!(f, "Format({:?}={:?})", k, v),
            ItemContent::Type(b) => write!(f, "Type({})", b.type_ref()),
            ItemContent::Doc(guid, _) => write!(f, "Doc({})", guid),
            ItemContent::Deleted(len) => write!(f, "Deleted({})", len),
        }
    }
}

/// A value not yet integrated into the document: constructed by the caller
/// (e.g. `ArrayRef::insert(0, MapPrelim::from([...]))`) and turned into an
/// [ItemContent] only once a transaction and insertion point are known.
pub trait Prelim {
    type Return;

    fn into_content(self, txn: &mut TransactionMut) -> (ItemContent, Option<Self>)
    where
        Self: Sized;

    fn integrate(self, txn: &mut TransactionMut, inner_ref: BranchPtr) -> Self::Return;
}

pub(crate) fn write_block_range<E: Encoder>(range: &BlockRange, encoder: &mut E) {
    write_id(&range.id, encoder);
    encoder.write_len(range.len);
}

pub(crate) fn read_block_range<'a, D: Decoder<'a>>(decoder: &mut D) -> lib0::Result<BlockRange> {
    let id = read_id(decoder)?;
    let len = decoder.read_len()?;
    Ok(BlockRange::new(id, len))
}
