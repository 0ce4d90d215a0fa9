use crate::id::ID;

/// Errors surfaced by the public API. Codec and store-contiguity failures
/// abort the update that triggered them while leaving the document in its
/// prior, consistent state; they are never partially applied.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// Failed to decode a binary update: truncated buffer, an over-long
    /// length prefix, or an unrecognized tag byte.
    #[error("failed to decode update: {0}")]
    Codec(#[from] lib0::Error),

    /// A struct was about to be appended to a client's block list at a
    /// clock that doesn't immediately follow the list's current end.
    #[error("struct store contiguity violated for client {client}: expected clock {expected}, got {actual}")]
    Contiguity {
        client: u64,
        expected: u32,
        actual: u32,
    },

    /// [crate::store::Store::find] was asked about a client with no
    /// entries in the block store.
    #[error("client {0} is not present in the store")]
    ClientNotPresent(u64),

    /// An [ID] fell outside of every range held for its client.
    #[error("id {0} could not be found in the store")]
    IdNotFound(ID),

    /// An index passed to an insert/delete/get operation on a shared type
    /// exceeded that type's current length.
    #[error("index {index} exceeds length {len}")]
    LengthExceeded { index: u32, len: u32 },

    /// `doc.get_or_insert_*` was called twice for the same root type name
    /// with incompatible constructors.
    #[error("root type '{name}' was already defined with a different type")]
    TypeRedefined { name: String },

    /// [crate::store::Store::follow_redone] detected a cycle in the
    /// `redone` chain; this should never happen in a sound document, so it
    /// is treated as a hard error rather than silently truncated.
    #[error("cycle detected while following redone chain from {0}")]
    RedoneCycle(ID),

    /// `skip_gc` is required for the attempted operation (e.g. encoding a
    /// state from an arbitrary snapshot) but is not enabled on this
    /// document.
    #[error("this operation requires garbage collection to be disabled (Options::skip_gc)")]
    Gc,
}
