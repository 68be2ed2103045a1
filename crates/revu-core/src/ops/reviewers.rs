//! Reviewer set edits.

use super::send_email;
use crate::error::{Error, Result};
use crate::events::ChangeEvent;
use crate::model::{AccountId, ChangeId, ReviewerState, dedup_accounts};
use crate::notify::EmailKind;
use crate::permission::ChangePermission;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoOnlyOp};

/// Adds accounts as reviewers or CCs. Accounts already in that state are
/// left alone.
#[derive(Debug)]
pub struct AddReviewersOp {
    reviewers: Vec<AccountId>,
    state: ReviewerState,
    added: Vec<AccountId>,
    change: Option<ChangeId>,
}

impl AddReviewersOp {
    #[must_use]
    pub fn new(reviewers: Vec<AccountId>, state: ReviewerState) -> Self {
        Self {
            reviewers: dedup_accounts(&reviewers),
            state,
            added: Vec::new(),
            change: None,
        }
    }

    /// Accounts whose state the op changed.
    #[must_use]
    pub fn added(&self) -> &[AccountId] {
        &self.added
    }
}

impl RepoOnlyOp for AddReviewersOp {
    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        let Some(change) = self.change else {
            return Ok(());
        };
        ctx.fire(&ChangeEvent::ReviewersAdded {
            project: ctx.project().clone(),
            change,
            reviewers: self.added.clone(),
            actor: ctx.account_id(),
        });
        send_email(ctx, EmailKind::AddReviewer, change, None);
        Ok(())
    }
}

impl BatchUpdateOp for AddReviewersOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        if self.state == ReviewerState::Removed {
            return Err(Error::BadRequest(
                "use DeleteReviewerOp to remove reviewers".into(),
            ));
        }
        let change = ctx.change();
        ctx.check(change, &ChangePermission::AddReviewer)?;

        let fresh: Vec<AccountId> = self
            .reviewers
            .iter()
            .copied()
            .filter(|a| ctx.notes().reviewers.get(a) != Some(&self.state))
            .collect();
        if fresh.is_empty() {
            return Ok(false);
        }

        let id = change.id;
        let ps = change.current_patch_set_id();
        let mut update = ctx.update(ps);
        for account in &fresh {
            update.put_reviewer(*account, self.state);
        }
        self.added = fresh;
        self.change = Some(id);
        Ok(true)
    }
}

/// Removes a reviewer or CC and drops their votes on the current patch set.
#[derive(Debug)]
pub struct DeleteReviewerOp {
    reviewer: AccountId,
    message: Option<String>,
    change: Option<ChangeId>,
}

impl DeleteReviewerOp {
    #[must_use]
    pub const fn new(reviewer: AccountId) -> Self {
        Self {
            reviewer,
            message: None,
            change: None,
        }
    }
}

impl RepoOnlyOp for DeleteReviewerOp {
    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        let Some(change) = self.change else {
            return Ok(());
        };
        ctx.fire(&ChangeEvent::ReviewerDeleted {
            project: ctx.project().clone(),
            change,
            reviewer: self.reviewer,
            actor: ctx.account_id(),
        });
        send_email(ctx, EmailKind::DeleteReviewer, change, self.message.clone());
        Ok(())
    }
}

impl BatchUpdateOp for DeleteReviewerOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        let change = ctx.change();
        match ctx.notes().reviewers.get(&self.reviewer) {
            None | Some(ReviewerState::Removed) => {
                return Err(Error::NotFound(format!(
                    "user {} is not a reviewer of change {}",
                    self.reviewer, change.id
                )));
            }
            Some(_) => {}
        }
        ctx.check(change, &ChangePermission::RemoveReviewer)?;

        let id = change.id;
        let ps = change.current_patch_set_id();
        let mut update = ctx.update(ps);
        update.put_reviewer(self.reviewer, ReviewerState::Removed);
        let removed = update.remove_approvals_by(self.reviewer);

        let message = if removed.is_empty() {
            format!("Removed reviewer user {}.", self.reviewer)
        } else {
            let votes: Vec<String> = removed.iter().map(|a| a.label_vote()).collect();
            format!(
                "Removed reviewer user {} with the following votes:\n\n* {}",
                self.reviewer,
                votes.join("\n* ")
            )
        };
        update.add_change_message(&message, Some("autogenerated:revu:deleteReviewer"));

        self.message = Some(message);
        self.change = Some(id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PatchSetId;
    use crate::notes::ChangeNotes;
    use crate::ops::PostVoteOp;
    use crate::testing::{self, TestSite};
    use crate::update::ChangeResult;

    #[test]
    fn test_add_reviewers_skips_existing() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(
            id,
            AddReviewersOp::new(vec![AccountId(2), AccountId(2)], ReviewerState::Reviewer),
        );
        batch.execute().unwrap();

        let notes = ChangeNotes::load_required(&site.repo.repo, id).unwrap();
        assert_eq!(notes.reviewers_in(ReviewerState::Reviewer), vec![AccountId(2)]);
        let before = site.repo.repo.exact_ref(&id.meta_ref()).unwrap();

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, AddReviewersOp::new(vec![AccountId(2)], ReviewerState::Reviewer));
        let result = batch.execute().unwrap();
        assert_eq!(result.change(id), Some(ChangeResult::Skipped));
        assert_eq!(site.repo.repo.exact_ref(&id.meta_ref()).unwrap(), before);
        assert_eq!(
            site.listener
                .names()
                .iter()
                .filter(|n| **n == "reviewers-added")
                .count(),
            1
        );
    }

    #[test]
    fn test_cc_becomes_reviewer() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, AddReviewersOp::new(vec![AccountId(3)], ReviewerState::Cc));
        batch.add_op(id, AddReviewersOp::new(vec![AccountId(3)], ReviewerState::Reviewer));
        batch.execute().unwrap();

        let notes = ChangeNotes::load_required(&site.repo.repo, id).unwrap();
        assert_eq!(notes.reviewers_in(ReviewerState::Reviewer), vec![AccountId(3)]);
        assert!(notes.reviewers_in(ReviewerState::Cc).is_empty());
    }

    #[test]
    fn test_delete_reviewer_removes_votes() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, AddReviewersOp::new(vec![AccountId(2)], ReviewerState::Reviewer));
        batch.execute().unwrap();
        let mut batch = testing::batch(&site, 2);
        batch.add_op(id, PostVoteOp::new("Code-Review", -1));
        batch.execute().unwrap();

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, DeleteReviewerOp::new(AccountId(2)));
        batch.execute().unwrap();

        let notes = ChangeNotes::load_required(&site.repo.repo, id).unwrap();
        assert_eq!(notes.reviewers.get(&AccountId(2)), Some(&ReviewerState::Removed));
        assert_eq!(notes.approvals_on(PatchSetId::new(id, 1)).count(), 0);
        assert_eq!(
            notes.messages.last().unwrap().message,
            "Removed reviewer user 2 with the following votes:\n\n* Code-Review-1"
        );
        assert!(site.listener.names().contains(&"reviewer-deleted"));
    }

    #[test]
    fn test_delete_unknown_reviewer_not_found() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, DeleteReviewerOp::new(AccountId(7)));
        assert!(matches!(batch.execute(), Err(Error::NotFound(_))));
    }
}
