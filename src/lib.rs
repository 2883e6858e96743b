//! Transactional per-entity event boxes.
//!
//! Producers [`emit`] events to an entity's box. A consumer later calls
//! [`process_batch`], which feeds the pending events and the entity's state
//! to a [`Processor`] and applies the resulting [`Transition`]s atomically,
//! guarded by the entity's [`EVersion`].

mod batch;
mod error;
mod event;
mod key;
mod processor;
mod side_effect;
mod store;

pub use batch::{process_batch, process_batch_with, ProcessOptions};
pub use error::{BoxError, Error, StoreError};
pub use event::{emit, emit_json, list, list_limited, Event, EventId, EVENT_KIND};
pub use key::Key;
pub use processor::{EVersion, Processor, Transition};
pub use side_effect::{chain, side_effect, PostProcessFn, SideEffectFn};
pub use store::{Access, FileStore, FileStoreBuilder, LockMode, MemoryStore, Store};
