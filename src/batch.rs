use crate::error::Error;
use crate::event::{list_limited, Event, EventId, EVENT_KIND};
use crate::key::Key;
use crate::processor::Processor;
use crate::side_effect::PostProcessFn;
use crate::store::Store;
use std::collections::BTreeSet;

/// Knobs for [`process_batch_with`].
///
/// # Examples
///
/// ```
/// use eventbox::ProcessOptions;
///
/// let opts = ProcessOptions::default().with_max_events(100);
/// assert_eq!(opts.max_events, Some(100));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ProcessOptions {
    /// Consider at most this many of the oldest pending events per batch.
    /// The rest stay queued for the next call. `None` means all of them.
    pub max_events: Option<usize>,
}

impl ProcessOptions {
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = Some(max_events);
        self
    }
}

/// Apply the pending events of `recipient` to its state.
///
/// Lists the box, loads the state, and asks the processor for transitions.
/// If there are none, or all of them are no-ops, returns without opening a
/// transaction (and without calling [`Processor::fetch_eversion`]).
/// Otherwise, in a single transaction: re-checks the EVersion, runs each
/// transition's side effect in order, deletes every consumed event, and saves
/// the last transition's state under the next EVersion.
///
/// On success returns the post-process functions of the committed
/// transitions, in order, for the caller to run. Any error leaves the store
/// untouched. [`Error::ConcurrentModification`] means another writer got in
/// first; nothing is retried here.
///
/// # Panics
///
/// Panics if a transition consumes an event that was not passed to
/// [`Processor::mutate`]. That is a bug in the processor.
pub fn process_batch<D, P>(
    store: &D,
    recipient: &Key,
    processor: &P,
) -> Result<Vec<PostProcessFn>, Error>
where
    D: Store,
    P: Processor,
{
    process_batch_with(store, recipient, processor, &ProcessOptions::default())
}

/// [`process_batch`] with explicit [`ProcessOptions`].
pub fn process_batch_with<D, P>(
    store: &D,
    recipient: &Key,
    processor: &P,
    options: &ProcessOptions,
) -> Result<Vec<PostProcessFn>, Error>
where
    D: Store,
    P: Processor,
{
    let events = list_limited(store, recipient, options.max_events)?;
    let (state, eversion) = processor.load_state(store)?;

    let transitions = processor.mutate(&events, &state)?;
    if transitions
        .iter()
        .all(|t| t.is_noop_against(&state, |a, b| processor.is_unchanged(a, b)))
    {
        log::debug!(
            "{recipient}: nothing to do with {} pending events at EVersion {eversion}",
            events.len()
        );
        return Ok(Vec::new());
    }

    let consumed = consumed_keys(recipient, &events, transitions.iter().map(|t| t.events()));

    let mut side_effects = Vec::with_capacity(transitions.len());
    let mut post_process = Vec::new();
    let mut last_state = None;
    let count = transitions.len();
    for transition in transitions {
        let (side_effect, _, transition_to, post) = transition.into_parts();
        side_effects.extend(side_effect);
        post_process.extend(post);
        last_state = Some(transition_to);
    }
    let Some(last_state) = last_state else {
        return Ok(Vec::new());
    };

    let next = eversion.next();
    store.run_in_transaction(|tx| {
        let current = processor.fetch_eversion(tx)?;
        if current != eversion {
            log::warn!(
                "{recipient}: concurrent modification, loaded EVersion {eversion} but found {current}"
            );
            return Err(Error::ConcurrentModification {
                expected: eversion,
                actual: current,
            });
        }
        for side_effect in side_effects {
            side_effect(tx)?;
        }
        tx.delete(&consumed)?;
        processor.save_state(tx, last_state, next)
    })?;

    log::debug!(
        "{recipient}: committed {count} transitions consuming {} of {} events, now at EVersion {next}",
        consumed.len(),
        events.len()
    );
    Ok(post_process)
}

/// Keys of the events named by any transition.
///
/// Panics on an id that is not among `events`.
fn consumed_keys<'a>(
    recipient: &Key,
    events: &[Event],
    named: impl Iterator<Item = &'a [EventId]>,
) -> Vec<Key> {
    let known: BTreeSet<&EventId> = events.iter().map(|e| &e.id).collect();
    let mut ids: BTreeSet<&EventId> = BTreeSet::new();
    for id in named.flatten() {
        assert!(
            known.contains(id),
            "{recipient}: transition consumes event {id} which was not passed to mutate"
        );
        ids.insert(id);
    }
    ids.into_iter()
        .map(|id| recipient.child(EVENT_KIND, id.as_str()))
        .collect()
}
