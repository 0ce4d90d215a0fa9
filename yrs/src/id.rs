use lib0::decoding::Read;
use lib0::encoding::Write;
use std::fmt;

/// A per-replica identifier. Clients pick a random 32-bit value on document
/// creation; collisions are resolved lazily (see
/// [crate::transaction::TransactionMut::commit]'s client-id regeneration for
/// non-local transactions whose clock advanced - another replica was
/// impersonating this one).
pub type ClientID = u64;

/// A globally unique identifier of a single [crate::block::Item]: the
/// client that created it and the logical clock value at the moment of
/// creation. Two IDs are equal iff both components match.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ID {
    pub client: ClientID,
    pub clock: u32,
}

impl ID {
    pub fn new(client: ClientID, clock: u32) -> Self {
        ID { client, clock }
    }

    /// Returns this ID shifted forward by `offset` clock ticks. Used when
    /// resolving an ID that falls in the middle of a multi-unit struct.
    pub fn successor(&self, offset: u32) -> ID {
        ID {
            client: self.client,
            clock: self.clock + offset,
        }
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.client, self.clock)
    }
}

pub(crate) fn write_id<W: Write>(id: &ID, encoder: &mut W) {
    encoder.write_var_u64(id.client);
    encoder.write_var_u64(id.clock as u64);
}

pub(crate) fn read_id<'a, R: Read<'a>>(decoder: &mut R) -> lib0::Result<ID> {
    let client = decoder.read_var_u64()?;
    let clock = decoder.read_var_u32()?;
    Ok(ID::new(client, clock))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equality() {
        assert_eq!(ID::new(1, 2), ID::new(1, 2));
        assert_ne!(ID::new(1, 2), ID::new(1, 3));
        assert_ne!(ID::new(1, 2), ID::new(2, 2));
    }
}
