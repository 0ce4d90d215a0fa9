//! `ycrdt` is a client-side CRDT engine compatible with the Yjs v1 binary
//! update format. It implements a struct store of [Item]s addressed by
//! per-client logical clocks, the YATA conflict resolution algorithm for
//! concurrent insertions, and a handful of shared types (`Array`, `Map`,
//! `Text`, `XmlFragment`, `XmlText`) built on top of it.
//!
//! A [Doc] owns the struct store. All mutation happens inside a
//! [TransactionMut] opened via [Doc::transact_mut]; on commit it computes
//! the deltas needed for shared-type observers, encodes an update in the
//! Yjs v1 binary format, and fires [UpdateEvent]/[TransactionCleanupEvent].
//! There is no `ReadTxn`: once a shared-type ref or [types::Value] has been
//! obtained, reading through it needs no open transaction.
//!
//! ```
//! use ycrdt::Doc;
//!
//! let doc = Doc::new();
//! let text = doc.get_or_insert_text("greeting");
//! {
//!     let mut txn = doc.transact_mut();
//!     text.insert(&mut txn, 0, "hello");
//! }
//! ```

mod block;
mod block_store;
mod branch;
pub mod doc;
mod error;
mod event;
mod id;
mod id_set;
mod observer;
mod relative_position;
mod snapshot;
mod store;
pub mod transaction;
pub mod types;
mod update;
pub mod updates;
mod utils;

pub use crate::block::{Item, ItemContent, Prelim};
pub use crate::doc::{Doc, Options};
pub use crate::error::Error;
pub use crate::event::{TransactionCleanupEvent, UpdateEvent};
pub use crate::id::{ClientID, ID};
pub use crate::id_set::{DeleteSet, IdRange};
pub use crate::observer::Subscription;
pub use crate::relative_position::{PositionTarget, RelativePosition};
pub use crate::snapshot::{create_doc_from_snapshot, Snapshot};
pub use crate::store::Store;
pub use crate::transaction::{Origin, TransactionMut};
pub use crate::update::Update;
pub use crate::block_store::StateVector;

pub use crate::types::array::ArrayRef;
pub use crate::types::map::MapRef;
pub use crate::types::text::TextRef;
pub use crate::types::xml::{XmlFragmentRef, XmlNode, XmlTextRef};
pub use crate::types::{
    Attrs, Change, Delta, EntryChange, Event, GetString, Observable, Path, PathSegment, ToJson,
    TypeRef, Value,
};
