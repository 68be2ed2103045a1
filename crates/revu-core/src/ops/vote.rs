//! Label votes.

use super::send_email;
use crate::error::{Error, Result};
use crate::events::ChangeEvent;
use crate::model::{PatchSetId, ReviewerState, format_vote};
use crate::notify::EmailKind;
use crate::permission::ChangePermission;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoContext, RepoOnlyOp};

/// Sets the acting user's vote on a label of the current patch set. A zero
/// value removes the vote. Voting makes the user a reviewer.
#[derive(Debug)]
pub struct PostVoteOp {
    label: String,
    value: i16,
    voted: Option<PatchSetId>,
}

impl PostVoteOp {
    #[must_use]
    pub fn new(label: impl Into<String>, value: i16) -> Self {
        Self {
            label: label.into(),
            value,
            voted: None,
        }
    }
}

impl RepoOnlyOp for PostVoteOp {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<()> {
        if ctx.services().config.labels.contains_key(&self.label) {
            Ok(())
        } else {
            Err(Error::BadRequest(format!(
                "label \"{}\" is not a configured label",
                self.label
            )))
        }
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        let Some(patch_set) = self.voted else {
            return Ok(());
        };
        ctx.fire(&ChangeEvent::VoteCast {
            project: ctx.project().clone(),
            patch_set,
            label: self.label.clone(),
            value: self.value,
            actor: ctx.account_id(),
        });
        send_email(
            ctx,
            EmailKind::Vote,
            patch_set.change,
            Some(format_vote(&self.label, self.value)),
        );
        Ok(())
    }
}

impl BatchUpdateOp for PostVoteOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        let voter = ctx.user().require_account()?;
        let change = ctx.change();
        if !change.is_new() {
            return Err(Error::Conflict(format!(
                "change {} is {}",
                change.id, change.status
            )));
        }
        ctx.check(change, &ChangePermission::Vote(self.label.clone()))?;

        let ps = change.current_patch_set_id();
        let current = ctx
            .notes()
            .approvals_on(ps)
            .find(|a| a.account == voter && a.label == self.label)
            .map_or(0, |a| a.value);
        if current == self.value {
            return Ok(false);
        }
        let becomes_reviewer = voter != change.owner
            && ctx.notes().reviewers.get(&voter) != Some(&ReviewerState::Reviewer);

        let mut update = ctx.update(ps);
        update.put_approval(voter, &self.label, self.value);
        if becomes_reviewer {
            update.put_reviewer(voter, ReviewerState::Reviewer);
        }
        update.add_change_message(
            &format!("Patch Set {}: {}", ps.num, format_vote(&self.label, self.value)),
            None,
        );
        self.voted = Some(ps);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccountId;
    use crate::notes::ChangeNotes;
    use crate::testing::{self, TestSite};
    use crate::update::ChangeResult;

    #[test]
    fn test_vote_replaces_and_removes() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);
        let ps = PatchSetId::new(id, 1);

        let mut batch = testing::batch(&site, 2);
        batch.add_op(id, PostVoteOp::new("Code-Review", 1));
        batch.add_op(id, PostVoteOp::new("Code-Review", 2));
        batch.execute().unwrap();

        let notes = ChangeNotes::load_required(&site.repo.repo, id).unwrap();
        let votes: Vec<_> = notes.approvals_on(ps).map(|a| (a.account, a.value)).collect();
        assert_eq!(votes, vec![(AccountId(2), 2)]);
        assert_eq!(notes.reviewers_in(ReviewerState::Reviewer), vec![AccountId(2)]);
        assert_eq!(notes.messages.last().unwrap().message, "Patch Set 1: Code-Review+2");

        let mut batch = testing::batch(&site, 2);
        batch.add_op(id, PostVoteOp::new("Code-Review", 2));
        assert_eq!(
            batch.execute().unwrap().change(id),
            Some(ChangeResult::Skipped)
        );

        let mut batch = testing::batch(&site, 2);
        batch.add_op(id, PostVoteOp::new("Code-Review", 0));
        batch.execute().unwrap();
        let notes = ChangeNotes::load_required(&site.repo.repo, id).unwrap();
        assert_eq!(notes.approvals_on(ps).count(), 0);
        assert_eq!(notes.messages.last().unwrap().message, "Patch Set 1: Code-Review=0");
    }

    #[test]
    fn test_unknown_label_rejected() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 2);
        batch.add_op(id, PostVoteOp::new("Quality", 1));
        assert!(matches!(batch.execute(), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_owner_vote_does_not_add_reviewer() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, PostVoteOp::new("Verified", 1));
        batch.execute().unwrap();

        let notes = ChangeNotes::load_required(&site.repo.repo, id).unwrap();
        assert!(notes.reviewers.is_empty());
        assert_eq!(site.listener.names().last(), Some(&"vote-cast"));
    }
}
