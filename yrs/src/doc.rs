use crate::branch::{BranchPtr, TypeRef};
use crate::event::{TransactionCleanupEvent, UpdateEvent};
use crate::observer::Subscription;
use crate::store::{Store, StoreRef};
use crate::transaction::{Origin, TransactionMut};
use rand::Rng;
use std::fmt;
use std::sync::Arc;

/// Configuration a [Doc] is created with. Mirrors the handful of knobs the
/// reference implementation exposes; `client_id` is randomised unless the
/// caller pins it (tests and the end-to-end scenarios in this crate's test
/// suite pin it for determinism).
#[derive(Debug, Clone)]
pub struct Options {
    pub client_id: u64,
    /// Globally unique id, used to address this document as a subdocument.
    pub guid: Arc<str>,
    /// When true, deleted items are never rewritten to `GC` tombstones -
    /// required while any live reference (e.g. another process's snapshot)
    /// might still need their content.
    pub skip_gc: bool,
    /// Subdocuments are loaded eagerly rather than on first access.
    pub auto_load: bool,
    /// Opaque, host-defined metadata carried alongside a subdocument
    /// reference; never interpreted by the core.
    pub meta: Option<lib0::Any>,
}

impl Options {
    pub fn new(client_id: u64) -> Self {
        Options {
            client_id,
            guid: Arc::from(random_guid()),
            skip_gc: false,
            auto_load: false,
            meta: None,
        }
    }

    pub fn with_guid(mut self, guid: impl Into<Arc<str>>) -> Self {
        self.guid = guid.into();
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::new(random_client_id())
    }
}

pub(crate) fn random_client_id() -> u64 {
    rand::thread_rng().gen::<u32>() as u64
}

fn random_guid() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A single collaborative document: a struct store plus a set of named root
/// shared types. All mutation happens through [Doc::transact_mut]; reads of
/// already-resolved content can happen directly through a [crate::types::Value]
/// handle without opening a transaction.
#[derive(Clone)]
pub struct Doc {
    store: StoreRef,
}

impl Doc {
    pub fn new() -> Self {
        Doc::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        log::debug!("creating document with client id {}", options.client_id);
        Doc {
            store: Arc::new(atomic_refcell::AtomicRefCell::new(Store::new(options))),
        }
    }

    pub fn client_id(&self) -> u64 {
        self.store.borrow().options.client_id
    }

    pub fn guid(&self) -> Arc<str> {
        self.store.borrow().options.guid.clone()
    }

    pub(crate) fn store(&self) -> &StoreRef {
        &self.store
    }

    /// Captures the document's current state as an immutable point in time.
    /// See [crate::snapshot::Snapshot].
    pub fn snapshot(&self) -> crate::snapshot::Snapshot {
        self.store.borrow().snapshot()
    }

    /// The clocks this document has integrated per client, as of right now.
    pub fn state_vector(&self) -> crate::block_store::StateVector {
        self.store.borrow().state_vector()
    }

    /// Opens a mutation scope. The returned [TransactionMut] commits
    /// automatically when dropped; callers that need to inspect the update
    /// bytes or events it produced should call [TransactionMut::commit]
    /// explicitly before it goes out of scope.
    pub fn transact_mut(&self) -> TransactionMut<'_> {
        self.transact_mut_with(None, true)
    }

    pub fn transact_mut_with_origin(&self, origin: Origin) -> TransactionMut<'_> {
        self.transact_mut_with(Some(origin), true)
    }

    pub(crate) fn transact_mut_with(&self, origin: Option<Origin>, local: bool) -> TransactionMut<'_> {
        TransactionMut::new(self, origin, local)
    }

    fn get_or_create_branch(&self, name: &str, type_ref: TypeRef) -> BranchPtr {
        let mut store = self.store.borrow_mut();
        store.get_or_create_type(name, type_ref)
    }

    pub fn get_or_insert_array(&self, name: &str) -> crate::types::array::ArrayRef {
        crate::types::array::ArrayRef::from(self.get_or_create_branch(name, TypeRef::Array))
    }

    pub fn get_or_insert_map(&self, name: &str) -> crate::types::map::MapRef {
        crate::types::map::MapRef::from(self.get_or_create_branch(name, TypeRef::Map))
    }

    pub fn get_or_insert_text(&self, name: &str) -> crate::types::text::TextRef {
        crate::types::text::TextRef::from(self.get_or_create_branch(name, TypeRef::Text))
    }

    pub fn get_or_insert_xml_fragment(&self, name: &str) -> crate::types::xml::XmlFragmentRef {
        crate::types::xml::XmlFragmentRef::from(self.get_or_create_branch(name, TypeRef::XmlFragment))
    }

    /// Subscribes to every committed transaction's encoded update bytes,
    /// suitable for forwarding to another replica over the network.
    pub fn observe_update_v1<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionMut, &UpdateEvent) + Send + Sync + 'static,
    {
        self.store.borrow().update_v1_events.subscribe(f)
    }

    /// Subscribes to the post-commit state of every transaction, once state
    /// vectors have settled and every shared-type observer has already run.
    pub fn observe_transaction_cleanup<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionMut, &TransactionCleanupEvent) + Send + Sync + 'static,
    {
        self.store.borrow().transaction_cleanup_events.subscribe(f)
    }
}

impl Default for Doc {
    fn default() -> Self {
        Doc::new()
    }
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc").field("guid", &self.guid()).finish()
    }
}

impl Eq for Doc {}
impl PartialEq for Doc {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}
