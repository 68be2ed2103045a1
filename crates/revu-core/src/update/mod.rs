//! Batched, atomic change updates.
//!
//! An op is a unit of mutation with three ordered phases:
//!
//! 1. [`RepoOnlyOp::update_repo`] stages ref updates and validates input.
//! 2. [`BatchUpdateOp::update_change`] mutates the freshly loaded change
//!    state and records metadata deltas.
//! 3. [`RepoOnlyOp::post_update`] runs after everything is durably
//!    committed: events and email.
//!
//! A [`BatchUpdate`] runs phase 1 for every op, then phase 2, commits all
//! staged refs (code refs and metadata refs) in one compare-and-swap
//! transaction, then runs phase 3. A [`RetryHelper`] rebuilds and re-runs
//! the whole batch when the transaction loses a ref race.

mod batch;
mod context;
mod retry;
mod view;

pub use batch::{BatchResult, BatchUpdate, ChangeResult};
pub use context::{ChangeContext, Env, PostUpdateContext, RepoContext};
pub use retry::RetryHelper;
pub use view::RepoView;

use crate::error::Result;
use crate::model::{Change, ChangeId};

/// Phases every op has. Ops that never touch change metadata implement only
/// this trait.
pub trait RepoOnlyOp {
    /// Stage ref updates. Nothing staged here is applied before the batch
    /// commits.
    ///
    /// # Errors
    /// Any error aborts the batch.
    fn update_repo(&mut self, _ctx: &mut RepoContext<'_>) -> Result<()> {
        Ok(())
    }

    /// React to the committed batch.
    ///
    /// # Errors
    /// Errors are logged and otherwise ignored.
    fn post_update(&mut self, _ctx: &PostUpdateContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// An op that mutates one change.
pub trait BatchUpdateOp: RepoOnlyOp {
    /// Mutate the change. Return `false` when nothing changed; the op's
    /// metadata delta is then discarded.
    ///
    /// # Errors
    /// Any error aborts the batch.
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool>;
}

/// An op that creates a change.
pub trait InsertChangeOp: BatchUpdateOp {
    /// Id reserved for the new change.
    fn change_id(&self) -> ChangeId;

    /// Build the initial change record. Called before
    /// [`BatchUpdateOp::update_change`] for the same op.
    ///
    /// # Errors
    /// Any error aborts the batch.
    fn create_change(&mut self, env: &Env<'_>) -> Result<Change>;
}
