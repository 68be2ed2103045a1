//! Built-in change operations.

pub mod approvals;
mod delete;
mod flags;
mod insert;
mod merged;
mod patch_set;
mod reviewers;
mod state;
mod topic;
mod vote;

pub use delete::DeleteChangeOp;
pub use flags::{SetPrivateOp, WorkInProgressOp};
pub use insert::ChangeInserter;
pub use merged::MarkMergedOp;
pub use patch_set::PatchSetInserter;
pub use reviewers::{AddReviewersOp, DeleteReviewerOp};
pub use state::AbandonOp;
pub use topic::{MAX_TOPIC_LENGTH, SetTopicOp};
pub use vote::PostVoteOp;

use crate::error::Result;
use crate::model::ChangeId;
use crate::notify::{EmailJob, EmailKind};
use crate::rebase::RebaseChangeOp;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoContext, RepoOnlyOp};

/// Queue an email about `change` if the batch committed it.
pub(crate) fn send_email(
    ctx: &PostUpdateContext<'_>,
    kind: EmailKind,
    change: ChangeId,
    message: Option<String>,
) {
    let Some(notes) = ctx.notes(change) else {
        return;
    };
    let job = EmailJob {
        kind,
        project: ctx.project().clone(),
        change,
        subject: notes.change.subject.clone(),
        from: ctx.account_id(),
        to: Vec::new(),
        message,
    };
    ctx.email(job, notes);
}

/// Every op that edits an existing change.
#[derive(Debug)]
pub enum ChangeOp {
    PatchSet(PatchSetInserter),
    Rebase(Box<RebaseChangeOp>),
    Abandon(AbandonOp),
    AddReviewers(AddReviewersOp),
    DeleteReviewer(DeleteReviewerOp),
    SetTopic(SetTopicOp),
    WorkInProgress(WorkInProgressOp),
    SetPrivate(SetPrivateOp),
    PostVote(PostVoteOp),
    MarkMerged(MarkMergedOp),
    Delete(DeleteChangeOp),
}

macro_rules! dispatch {
    ($self:ident, $op:ident => $call:expr) => {
        match $self {
            Self::PatchSet($op) => $call,
            Self::Rebase($op) => $call,
            Self::Abandon($op) => $call,
            Self::AddReviewers($op) => $call,
            Self::DeleteReviewer($op) => $call,
            Self::SetTopic($op) => $call,
            Self::WorkInProgress($op) => $call,
            Self::SetPrivate($op) => $call,
            Self::PostVote($op) => $call,
            Self::MarkMerged($op) => $call,
            Self::Delete($op) => $call,
        }
    };
}

impl RepoOnlyOp for ChangeOp {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<()> {
        dispatch!(self, op => op.update_repo(ctx))
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        dispatch!(self, op => op.post_update(ctx))
    }
}

impl BatchUpdateOp for ChangeOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        dispatch!(self, op => op.update_change(ctx))
    }
}

macro_rules! impl_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(impl From<$ty> for ChangeOp {
            fn from(op: $ty) -> Self {
                Self::$variant(op)
            }
        })*
    };
}

impl_from!(
    PatchSet(PatchSetInserter),
    Abandon(AbandonOp),
    AddReviewers(AddReviewersOp),
    DeleteReviewer(DeleteReviewerOp),
    SetTopic(SetTopicOp),
    WorkInProgress(WorkInProgressOp),
    SetPrivate(SetPrivateOp),
    PostVote(PostVoteOp),
    MarkMerged(MarkMergedOp),
    Delete(DeleteChangeOp),
);

impl From<RebaseChangeOp> for ChangeOp {
    fn from(op: RebaseChangeOp) -> Self {
        Self::Rebase(Box::new(op))
    }
}
