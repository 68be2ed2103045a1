//! Rebasing a change's patch set onto a new base.
//!
//! [`RebaseUtil`] resolves where a patch set should go; [`RebaseChangeOp`]
//! performs the three-way merge and stores the result as a new patch set.

mod op;
mod util;

pub use op::{RebaseChangeOp, RebaseTarget};
pub use util::{Base, RebaseUtil, next_patch_set_id};

/// Conflict marker label for the patch set side.
pub const PATCH_SET_LABEL: &str = "PATCH SET";
/// Conflict marker label for the new base side.
pub const BASE_LABEL: &str = "BASE";
/// Conflict marker label for the original parent in diff3 output.
pub const PARENT_LABEL: &str = "PARENT";
