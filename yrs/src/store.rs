use crate::block_store::{BlockStore, StateVector};
use crate::branch::{Branch, BranchPtr, TypeRef};
use crate::doc::Options;
use crate::error::Error;
use crate::event::{TransactionCleanupEvent, UpdateEvent};
use crate::id::ID;
use crate::id_set::DeleteSet;
use crate::observer::Observer;
use crate::snapshot::Snapshot;
use crate::update::Update;
use std::collections::HashMap;
use std::sync::Arc;

pub type StoreRef = Arc<atomic_refcell::AtomicRefCell<Store>>;

/// An update this document couldn't fully integrate because it referenced
/// clocks from a client it hasn't seen yet. Held until a later update
/// satisfies `missing`, then retried in full.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub missing: StateVector,
    pub update: Update,
}

/// Everything a [crate::doc::Doc] owns: the struct store, the named root
/// shared types, and bookkeeping for updates that couldn't be fully applied
/// yet. Reached only through `Arc<AtomicRefCell<_>>` so a [crate::doc::Doc]
/// can be cheaply cloned while every clone still sees the same state.
pub struct Store {
    pub options: Options,
    /// Root shared types, keyed by the name they were registered under. Each
    /// is held in its own single-owner `Arc` so [BranchPtr] can be derived
    /// from it via `Arc::get_mut` - nothing else is ever given a clone of
    /// this `Arc`, only the raw pointer.
    types: HashMap<Arc<str>, Arc<Branch>>,
    pub blocks: BlockStore,
    pub pending: Option<PendingUpdate>,
    pub pending_ds: Option<DeleteSet>,
    pub(crate) update_v1_events: Observer<UpdateEvent>,
    pub(crate) transaction_cleanup_events: Observer<TransactionCleanupEvent>,
}

impl Store {
    pub fn new(options: Options) -> Self {
        Store {
            options,
            types: HashMap::new(),
            blocks: BlockStore::new(),
            pending: None,
            pending_ds: None,
            update_v1_events: Observer::default(),
            transaction_cleanup_events: Observer::default(),
        }
    }

    pub fn client_id(&self) -> u64 {
        self.options.client_id
    }

    /// Looks up an already-registered root type without creating it.
    pub fn get_type(&self, name: &str) -> Option<BranchPtr> {
        self.types.get(name).map(BranchPtr::from)
    }

    /// Returns the root type registered under `name`, creating it with
    /// `type_ref` if absent. If it exists but was registered as
    /// [TypeRef::Undefined] (e.g. integrated from a remote update before any
    /// local process asked for it by name), its type is repaired in place.
    pub fn get_or_create_type(&mut self, name: &str, type_ref: TypeRef) -> BranchPtr {
        if let Some(branch) = self.types.get_mut(name) {
            let mut ptr = BranchPtr::from(branch);
            ptr.repair_type_ref(type_ref);
            ptr
        } else {
            let mut arc = Arc::new(Branch::new(type_ref));
            {
                let b = Arc::get_mut(&mut arc).expect("freshly created Arc is uniquely owned");
                b.name = Some(Arc::from(name));
            }
            let ptr = BranchPtr::from(&mut arc);
            self.types.insert(Arc::from(name), arc);
            ptr
        }
    }

    pub fn state_vector(&self) -> StateVector {
        self.blocks.state_vector()
    }

    pub fn get_state(&self, client: &u64) -> u32 {
        self.blocks.get_state(client)
    }

    /// Follows an item's `redone` chain to the item that ultimately replaced
    /// it, failing instead of looping forever if the chain cycles back on
    /// itself - see the crate root documentation's note on this being an
    /// explicit hardening of the reference implementation's behaviour.
    pub fn follow_redone(&self, start: ID) -> Result<ID, Error> {
        let mut visited = std::collections::HashSet::new();
        let mut current = start;
        loop {
            if !visited.insert(current) {
                return Err(Error::RedoneCycle(start));
            }
            let block = self.blocks.find(&current)?;
            match block.as_item().and_then(|item| item.redone) {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
    }

    pub fn is_deleted(&self, id: &ID, ds: &DeleteSet) -> bool {
        ds.is_deleted(id)
    }

    pub fn root_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.types.keys()
    }

    /// Captures the current state as an immutable point in time: every
    /// tombstoned range scanned directly off the block log, rather than
    /// relying on whatever a transaction happened to accumulate.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(DeleteSet::from_store(&self.blocks), self.state_vector())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("client_id", &self.options.client_id)
            .field("roots", &self.types.len())
            .finish()
    }
}
