use crate::error::Error;
use crate::store::Access;

/// Effect run inside the batch transaction, e.g. emitting events to other
/// entities through the transaction handle.
pub type SideEffectFn = Box<dyn FnOnce(&dyn Access) -> Result<(), Error>>;

/// Hook run by the caller after the batch has committed.
pub type PostProcessFn = Box<dyn FnOnce() -> Result<(), Error>>;

/// Box a closure as a [`SideEffectFn`].
pub fn side_effect(f: impl FnOnce(&dyn Access) -> Result<(), Error> + 'static) -> SideEffectFn {
    Box::new(f)
}

/// Combine optional side effects into one.
///
/// `None` entries are skipped. If nothing remains, the result is `None`
/// rather than an empty closure, so a transition built from it can still be
/// recognized as a no-op. The combined function runs the remaining effects
/// in order and stops at the first error.
///
/// # Examples
///
/// ```
/// use eventbox::{chain, side_effect, SideEffectFn};
///
/// assert!(chain(Vec::<Option<SideEffectFn>>::new()).is_none());
/// assert!(chain([None, None]).is_none());
///
/// let combined = chain([None, Some(side_effect(|_db| Ok(())))]);
/// assert!(combined.is_some());
/// ```
pub fn chain(fns: impl IntoIterator<Item = Option<SideEffectFn>>) -> Option<SideEffectFn> {
    let fns: Vec<SideEffectFn> = fns.into_iter().flatten().collect();
    if fns.is_empty() {
        return None;
    }
    Some(Box::new(move |db: &dyn Access| {
        for f in fns {
            f(db)?;
        }
        Ok(())
    }))
}
