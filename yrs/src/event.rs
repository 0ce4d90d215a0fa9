//! Document-level (as opposed to per-shared-type) events: a transaction's
//! encoded update bytes, and a transaction having finished cleanup.

use crate::block_store::StateVector;
use crate::id_set::DeleteSet;

/// Fired once per committed transaction that produced any change, carrying
/// the same bytes [crate::transaction::TransactionMut::encode_update] would
/// produce. Subscribe via [crate::doc::Doc::observe_update_v1].
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub update: Vec<u8>,
}

impl UpdateEvent {
    pub fn new(update: Vec<u8>) -> Self {
        UpdateEvent { update }
    }
}

/// Fired after a transaction has fully committed - state vectors settled,
/// shared-type observers dispatched, update bytes emitted. Useful for undo
/// managers and other bookkeeping that needs to see the document in its
/// final post-commit state.
#[derive(Debug, Clone)]
pub struct TransactionCleanupEvent {
    pub before_state: StateVector,
    pub after_state: StateVector,
    pub delete_set: DeleteSet,
}
