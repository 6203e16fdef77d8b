//! Generic two-phase optimistic command.
//!
//! Pattern: apply a local patch immediately and keep its inverse; run the
//! remote call; on success discard the inverse, on failure apply it. Every
//! optimistic mutation in the client goes through this one helper instead
//! of growing its own try/rollback shape.

use std::future::Future;

/// Inverse of a local patch.
pub type Inverse<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Apply `patch` to `state`, then await `remote`. On remote failure the
/// inverse returned by the patch is applied before the error propagates.
///
/// The remote future must not borrow `state`; clone what it needs up front.
pub async fn run_optimistic<S, T, E, Fut>(
    state: &mut S,
    patch: impl FnOnce(&mut S) -> Inverse<S>,
    remote: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let inverse = patch(state);
    match remote.await {
        Ok(value) => Ok(value),
        Err(e) => {
            inverse(state);
            Err(e)
        }
    }
}
