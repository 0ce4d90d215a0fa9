use lib0::any::Any;
use lib0::encoding::Write;

/// Content-kind tags occupying the low bits of a struct's `info` byte (see
/// [crate::updates::decoder] for the matching reads). These match the wire
/// numbering of the reference Yjs v1 format, not the order the variants are
/// listed in anywhere in this crate - `GC` is `0` and `Skip` is `10`; the
/// nine content variants fall in between.
pub const BLOCK_ITEM_DELETED_REF_NUMBER: u8 = 1;
pub const BLOCK_ITEM_JSON_REF_NUMBER: u8 = 2;
pub const BLOCK_ITEM_BINARY_REF_NUMBER: u8 = 3;
pub const BLOCK_ITEM_STRING_REF_NUMBER: u8 = 4;
pub const BLOCK_ITEM_EMBED_REF_NUMBER: u8 = 5;
pub const BLOCK_ITEM_FORMAT_REF_NUMBER: u8 = 6;
pub const BLOCK_ITEM_TYPE_REF_NUMBER: u8 = 7;
pub const BLOCK_ITEM_ANY_REF_NUMBER: u8 = 8;
pub const BLOCK_ITEM_DOC_REF_NUMBER: u8 = 9;

pub const BLOCK_GC_REF_NUMBER: u8 = 0;
pub const BLOCK_SKIP_REF_NUMBER: u8 = 10;

/// `info` byte flags for a wire struct. The low bits (below bit 6) carry the
/// content-kind tag above; these three occupy the high bits.
pub const HAS_ORIGIN: u8 = 0b1000_0000;
pub const HAS_RIGHT_ORIGIN: u8 = 0b0100_0000;
pub const HAS_PARENT_SUB: u8 = 0b0010_0000;

/// Higher-level writes layered on [lib0::encoding::Write]'s primitives,
/// shared by every struct/content encode path. A blanket impl covers any
/// type that already implements the primitive trait, so `EncoderV1` needs
/// no wrapper of its own.
pub trait Encoder: Write {
    fn write_info(&mut self, info: u8) {
        self.write_u8(info);
    }

    fn write_len(&mut self, len: u32) {
        self.write_var_u64(len as u64);
    }

    fn write_any(&mut self, value: &Any) {
        value.encode(self);
    }

    /// `Embed`/`Format` payloads are themselves `Any` values; named
    /// separately so call sites read like the wire-format sections they
    /// implement rather than leaking the `Any` encoding detail.
    fn write_json(&mut self, value: &Any) {
        self.write_any(value);
    }

    fn write_key(&mut self, key: &str) {
        self.write_string(key);
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.write_u8(type_ref);
    }
}

impl Encoder for lib0::encoding::EncoderV1 {}
