//! Carrying votes over to a new patch set.

use crate::change_kind::ChangeKind;
use crate::config::{Config, CopyCondition};
use crate::model::{PatchSetApproval, PatchSetId};
use crate::notes::ChangeUpdater;

/// Whether a vote governed by `conditions` survives a transition of `kind`.
#[must_use]
pub fn should_copy(conditions: &[CopyCondition], kind: ChangeKind) -> bool {
    conditions.iter().any(|condition| match condition {
        CopyCondition::AnyChange => true,
        CopyCondition::NoChange => kind == ChangeKind::NoChange,
        // An unchanged commit is also a trivial rebase and a code-neutral
        // change.
        CopyCondition::NoCodeChange => {
            matches!(kind, ChangeKind::NoCodeChange | ChangeKind::NoChange)
        }
        CopyCondition::TrivialRebase => {
            matches!(kind, ChangeKind::TrivialRebase | ChangeKind::NoChange)
        }
        CopyCondition::MergeFirstParentUpdate => kind == ChangeKind::MergeFirstParentUpdate,
    })
}

/// Copy every eligible non-zero vote on `prior` to the updater's patch set.
/// Returns the copied votes.
pub fn copy_approvals(
    config: &Config,
    update: &mut ChangeUpdater<'_>,
    prior: PatchSetId,
    kind: ChangeKind,
) -> Vec<PatchSetApproval> {
    let eligible: Vec<PatchSetApproval> = update
        .notes()
        .approvals_on(prior)
        .filter(|a| a.value != 0 && should_copy(config.copy_conditions(&a.label), kind))
        .cloned()
        .collect();
    for approval in &eligible {
        update.copy_approval(approval);
    }
    eligible
}
