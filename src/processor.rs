use crate::error::Error;
use crate::event::{Event, EventId};
use crate::side_effect::{PostProcessFn, SideEffectFn};
use crate::store::Access;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-entity version counter used for optimistic concurrency control.
///
/// Grows by exactly one on every committed batch. An entity that was never
/// saved is at `EVersion(0)`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EVersion(pub u64);

impl EVersion {
    /// The version a successful save assigns after this one.
    pub fn next(self) -> EVersion {
        EVersion(self.0 + 1)
    }
}

impl fmt::Display for EVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// State machine for one kind of entity, driven by
/// [`process_batch`](crate::process_batch).
///
/// The engine never looks inside `State`: it hands the loaded value to
/// [`mutate`](Processor::mutate), compares candidate states with
/// [`is_unchanged`](Processor::is_unchanged) to detect no-ops, and passes the
/// final one to [`save_state`](Processor::save_state).
pub trait Processor {
    type State: PartialEq;

    /// Load the persisted state and its version.
    ///
    /// A missing entity must be reported as its default state at
    /// `EVersion(0)`, not as an error.
    fn load_state(&self, db: &dyn Access) -> Result<(Self::State, EVersion), Error>;

    /// Read only the current version.
    ///
    /// Called inside the batch transaction with the transaction handle, and
    /// only when there is something to commit.
    fn fetch_eversion(&self, db: &dyn Access) -> Result<EVersion, Error>;

    /// Decide what to do with the pending events.
    ///
    /// Must not persist anything. It may be called again for the same input
    /// when the caller retries, so effects belong in
    /// [`Transition::with_side_effect`].
    fn mutate(
        &self,
        events: &[Event],
        state: &Self::State,
    ) -> Result<Vec<Transition<Self::State>>, Error>;

    /// Persist `state` tagged with `eversion`. Called inside the batch
    /// transaction exactly once per committed batch.
    fn save_state(
        &self,
        db: &dyn Access,
        state: Self::State,
        eversion: EVersion,
    ) -> Result<(), Error>;

    /// Whether `after` counts as the same state as `before` for no-op
    /// detection. Defaults to structural equality.
    fn is_unchanged(&self, before: &Self::State, after: &Self::State) -> bool {
        before == after
    }
}

/// One atomic step computed by [`Processor::mutate`].
///
/// Transitions returned together are threaded: each one's target state
/// already includes the effect of the ones before it, and only the last
/// target state is saved.
///
/// # Examples
///
/// ```
/// use eventbox::{Event, Transition};
///
/// let events = vec![
///     Event::new("00000000000000000001-0000000001", b"+".to_vec()),
///     Event::new("00000000000000000002-0000000001", b"-".to_vec()),
/// ];
///
/// let t = Transition::to(1u32).consuming(&events[..1]);
/// assert_eq!(t.events().len(), 1);
/// assert!(!t.is_noop_against(&1, |a, b| a == b));
/// ```
pub struct Transition<S> {
    side_effect: Option<SideEffectFn>,
    events: Vec<EventId>,
    transition_to: S,
    post_process: Option<PostProcessFn>,
}

impl<S> Transition<S> {
    /// A transition to `state` with no side effect that consumes nothing.
    pub fn to(state: S) -> Self {
        Transition {
            side_effect: None,
            events: Vec::new(),
            transition_to: state,
            post_process: None,
        }
    }

    /// Mark `events` as consumed by this transition.
    ///
    /// Every event must come from the slice passed to `mutate`.
    pub fn consuming<'a>(mut self, events: impl IntoIterator<Item = &'a Event>) -> Self {
        self.events.extend(events.into_iter().map(|e| e.id.clone()));
        self
    }

    /// Run `side_effect` inside the batch transaction.
    pub fn with_side_effect(
        self,
        side_effect: impl FnOnce(&dyn Access) -> Result<(), Error> + 'static,
    ) -> Self {
        self.with_optional_side_effect(Some(Box::new(side_effect)))
    }

    /// Like [`with_side_effect`](Transition::with_side_effect), but accepts
    /// `None` so the result of [`chain`](crate::chain) can be passed through
    /// without turning a no-op into a real transition.
    pub fn with_optional_side_effect(mut self, side_effect: Option<SideEffectFn>) -> Self {
        self.side_effect = side_effect;
        self
    }

    /// Hand `post_process` back to the caller once the batch has committed.
    pub fn with_post_process(
        mut self,
        post_process: impl FnOnce() -> Result<(), Error> + 'static,
    ) -> Self {
        self.post_process = Some(Box::new(post_process));
        self
    }

    pub fn events(&self) -> &[EventId] {
        &self.events
    }

    pub fn transition_to(&self) -> &S {
        &self.transition_to
    }

    pub fn has_side_effect(&self) -> bool {
        self.side_effect.is_some()
    }

    /// A transition is a no-op if it has nothing to run, consumes nothing and
    /// leaves the state as `current` according to `unchanged`.
    pub fn is_noop_against(&self, current: &S, unchanged: impl Fn(&S, &S) -> bool) -> bool {
        self.side_effect.is_none()
            && self.post_process.is_none()
            && self.events.is_empty()
            && unchanged(current, &self.transition_to)
    }

    pub(crate) fn into_parts(
        self,
    ) -> (Option<SideEffectFn>, Vec<EventId>, S, Option<PostProcessFn>) {
        (
            self.side_effect,
            self.events,
            self.transition_to,
            self.post_process,
        )
    }
}

impl<S: fmt::Debug> fmt::Debug for Transition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("side_effect", &self.side_effect.is_some())
            .field("events", &self.events)
            .field("transition_to", &self.transition_to)
            .field("post_process", &self.post_process.is_some())
            .finish()
    }
}
