use crate::error::StoreError;
use crate::key::Key;
use crate::store::Access;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of the child records that hold an entity's pending events.
pub const EVENT_KIND: &str = "EventBoxItem";

/// Creation-ordered identifier of an [`Event`].
///
/// Ids compare lexicographically in the order they were minted: a 20-digit
/// nanosecond stamp that strictly increases within a process, then the
/// process id so that two processes never mint the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

impl EventId {
    /// Mint a new id, greater than every id minted before it by this process.
    pub fn mint() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let prev = LAST_STAMP
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        let stamp = now.max(prev.saturating_add(1));
        EventId(format!("{stamp:020}-{:010}", std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        EventId(id)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        EventId(id.to_string())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pending message in an entity's box.
///
/// The `value` is opaque to this crate; processors give it meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Event {
    /// Position of the event in its box.
    pub id: EventId,

    /// Payload chosen by the producer.
    pub value: Vec<u8>,
}

impl Event {
    pub fn new(id: impl Into<EventId>, value: Vec<u8>) -> Self {
        Event {
            id: id.into(),
            value,
        }
    }

    /// Decode a payload written by [`emit_json`].
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.value)
    }
}

/// Queue `value` for the entity at `recipient`.
///
/// `db` may be a store, in which case the event is durable on return, or a
/// transaction handle, in which case it appears only if the transaction
/// commits. Nothing is read. Processing the event is left to whoever calls
/// [`process_batch`](crate::process_batch) for the recipient next.
///
/// # Examples
///
/// ```
/// use eventbox::{emit, list, Key, MemoryStore};
///
/// let store = MemoryStore::new();
/// let project = Key::new("Project", "chromium");
///
/// emit(&store, b"poke".to_vec(), &project).unwrap();
///
/// let events = list(&store, &project).unwrap();
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].value, b"poke");
/// ```
pub fn emit(db: &dyn Access, value: Vec<u8>, recipient: &Key) -> Result<EventId, StoreError> {
    let id = EventId::mint();
    db.put(&recipient.child(EVENT_KIND, id.as_str()), value)?;
    log::debug!("{recipient}: queued event {id}");
    Ok(id)
}

/// Serialize `value` as JSON and [`emit`] it.
pub fn emit_json<T: Serialize>(
    db: &dyn Access,
    value: &T,
    recipient: &Key,
) -> Result<EventId, StoreError> {
    emit(db, serde_json::to_vec(value)?, recipient)
}

/// All pending events of `recipient`, oldest first.
///
/// A snapshot: nothing is locked or consumed. An entity without pending
/// events yields an empty vec.
pub fn list(db: &dyn Access, recipient: &Key) -> Result<Vec<Event>, StoreError> {
    list_limited(db, recipient, None)
}

/// The oldest `limit` pending events of `recipient`, or all of them when
/// `limit` is `None`.
pub fn list_limited(
    db: &dyn Access,
    recipient: &Key,
    limit: Option<usize>,
) -> Result<Vec<Event>, StoreError> {
    let records = db.children(recipient, EVENT_KIND)?;
    let take = limit.unwrap_or(records.len());
    Ok(records
        .into_iter()
        .take(take)
        .map(|(key, value)| Event::new(key.id(), value))
        .collect())
}
