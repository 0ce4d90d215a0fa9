use lib0::any::Any;
use lib0::decoding::Read;

/// Mirror of [crate::updates::encoder::Encoder]'s higher-level reads. A
/// blanket impl covers any type already implementing the primitive
/// [lib0::decoding::Read] trait.
pub trait Decoder<'a>: Read<'a> {
    fn read_info(&mut self) -> lib0::Result<u8> {
        self.read_u8()
    }

    fn read_len(&mut self) -> lib0::Result<u32> {
        self.read_var_u32()
    }

    fn read_any(&mut self) -> lib0::Result<Any> {
        Any::decode(self)
    }

    fn read_json(&mut self) -> lib0::Result<Any> {
        self.read_any()
    }

    fn read_key(&mut self) -> lib0::Result<&'a str> {
        self.read_string()
    }

    fn read_type_ref(&mut self) -> lib0::Result<u8> {
        self.read_u8()
    }
}

impl<'a> Decoder<'a> for lib0::decoding::Cursor<'a> {}
