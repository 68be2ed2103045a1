//! Creating a change with its first patch set.

use revu_git::{CommitInfo, Oid, RefUpdate};

use super::send_email;
use crate::error::{Error, Result};
use crate::events::ChangeEvent;
use crate::footer;
use crate::model::{
    AccountId, BranchName, Change, ChangeId, ChangeKey, ChangeStatus, PatchSet, PatchSetId,
    ReviewerState,
};
use crate::notify::EmailKind;
use crate::update::{
    BatchUpdateOp, ChangeContext, Env, InsertChangeOp, PostUpdateContext, RepoContext, RepoOnlyOp,
};
use crate::validation::{self, CommitReceivedEvent};

/// Creates change `id` for `commit` on `dest`, owned by the acting user.
#[derive(Debug)]
pub struct ChangeInserter {
    id: ChangeId,
    commit: Oid,
    dest: BranchName,
    topic: Option<String>,
    work_in_progress: bool,
    private: bool,
    reviewers: Vec<AccountId>,
    ccs: Vec<AccountId>,
    groups: Option<Vec<String>>,
    message: Option<String>,
    validate: bool,
    send_email: bool,

    info: Option<CommitInfo>,
    key: Option<ChangeKey>,
    change: Option<Change>,
}

impl ChangeInserter {
    #[must_use]
    pub const fn new(id: ChangeId, commit: Oid, dest: BranchName) -> Self {
        Self {
            id,
            commit,
            dest,
            topic: None,
            work_in_progress: false,
            private: false,
            reviewers: Vec::new(),
            ccs: Vec::new(),
            groups: None,
            message: None,
            validate: true,
            send_email: true,
            info: None,
            key: None,
            change: None,
        }
    }

    #[must_use]
    pub fn topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic.filter(|t| !t.trim().is_empty());
        self
    }

    #[must_use]
    pub const fn work_in_progress(mut self, wip: bool) -> Self {
        self.work_in_progress = wip;
        self
    }

    #[must_use]
    pub const fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    #[must_use]
    pub fn reviewers(mut self, reviewers: Vec<AccountId>) -> Self {
        self.reviewers = reviewers;
        self
    }

    #[must_use]
    pub fn ccs(mut self, ccs: Vec<AccountId>) -> Self {
        self.ccs = ccs;
        self
    }

    #[must_use]
    pub fn groups(mut self, groups: Vec<String>) -> Self {
        self.groups = Some(groups);
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub const fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    #[must_use]
    pub const fn send_email(mut self, send: bool) -> Self {
        self.send_email = send;
        self
    }

    /// The created change, once the batch built it.
    #[must_use]
    pub const fn change(&self) -> Option<&Change> {
        self.change.as_ref()
    }

    const fn ps_id(&self) -> PatchSetId {
        PatchSetId::new(self.id, 1)
    }
}

impl RepoOnlyOp for ChangeInserter {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<()> {
        ctx.services()
            .permissions
            .check_create(ctx.user(), ctx.project(), &self.dest)?;

        let info = ctx.repo().commit_info(self.commit)?;
        let key = footer::change_key_or_derive(&info.message, self.commit);
        if self.validate {
            validation::validate_all(
                &ctx.services().validators,
                &CommitReceivedEvent {
                    project: ctx.project(),
                    branch: &self.dest,
                    commit: &info,
                    change_key: &key,
                    user: ctx.user(),
                },
            )?;
        }

        let ref_name = self.ps_id().ref_name();
        if ctx.get_ref(&ref_name)?.is_some() {
            return Err(Error::Conflict(format!("change {} already exists", self.id)));
        }
        ctx.add_ref_update(RefUpdate::create(ref_name, self.commit))?;
        self.info = Some(info);
        self.key = Some(key);
        Ok(())
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        if self.change.is_none() {
            return Ok(());
        }
        ctx.fire(&ChangeEvent::ChangeCreated {
            project: ctx.project().clone(),
            change: self.id,
            actor: ctx.account_id(),
        });
        if self.send_email {
            send_email(ctx, EmailKind::NewChange, self.id, self.message.clone());
        }
        Ok(())
    }
}

impl InsertChangeOp for ChangeInserter {
    fn change_id(&self) -> ChangeId {
        self.id
    }

    fn create_change(&mut self, env: &Env<'_>) -> Result<Change> {
        let (Some(info), Some(key)) = (&self.info, &self.key) else {
            return Err(Error::Unprocessable("change commit was not staged".into()));
        };
        Ok(Change {
            id: self.id,
            key: key.clone(),
            project: env.project().clone(),
            dest: self.dest.clone(),
            owner: env.user().require_account()?,
            status: ChangeStatus::New,
            current_patch_set: 1,
            subject: info.subject().to_string(),
            topic: None,
            work_in_progress: false,
            private: false,
            created_on: env.when(),
            last_updated_on: env.when(),
        })
    }
}

impl BatchUpdateOp for ChangeInserter {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        let owner = ctx.change().owner;
        let ps = PatchSet {
            id: self.ps_id(),
            commit: self.commit,
            uploader: owner,
            created_on: ctx.when(),
            groups: self
                .groups
                .clone()
                .unwrap_or_else(|| PatchSet::default_groups(self.commit)),
            description: None,
        };
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| "Uploaded patch set 1.".to_string());

        let mut update = ctx.update(self.ps_id());
        update.create_change();
        update.add_patch_set(ps);
        if let Some(topic) = &self.topic {
            update.set_topic(Some(topic.trim().to_string()));
        }
        if self.work_in_progress {
            update.set_work_in_progress(true);
        }
        if self.private {
            update.set_private(true);
        }
        for reviewer in self.reviewers.iter().filter(|r| **r != owner) {
            update.put_reviewer(*reviewer, ReviewerState::Reviewer);
        }
        for cc in self
            .ccs
            .iter()
            .filter(|c| **c != owner && !self.reviewers.contains(*c))
        {
            update.put_reviewer(*cc, ReviewerState::Cc);
        }
        update.add_change_message(&message, Some("autogenerated:revu:newPatchSet"));

        self.change = Some(update.notes().change.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::ChangeNotes;
    use crate::testing::{self, TestSite};
    use crate::update::BatchUpdate;

    #[test]
    fn test_insert_creates_refs_and_notes() {
        let site = TestSite::new();
        let t = &site.repo;
        let base = t.commit(&[], &[("a", "1\n")], "base\n");
        let commit = t.commit(
            &[base],
            &[("a", "2\n")],
            "Add feature\n\nChange-Id: I1111111111111111111111111111111111111111\n",
        );

        let mut batch = BatchUpdate::new(
            &t.repo,
            &site.services,
            testing::project(),
            testing::user(1),
            testing::when(),
        );
        batch.insert_change(
            ChangeInserter::new(ChangeId(1), commit, BranchName::new("main"))
                .topic(Some("feature-x".into()))
                .reviewers(vec![AccountId(1), AccountId(2)])
                .ccs(vec![AccountId(3)]),
        );
        let result = batch.execute().unwrap();
        assert_eq!(result.change(ChangeId(1)), Some(crate::update::ChangeResult::Upserted));
        assert_eq!(result.ref_updates.len(), 2);

        let notes = ChangeNotes::load_required(&t.repo, ChangeId(1)).unwrap();
        assert_eq!(notes.change.owner, AccountId(1));
        assert_eq!(notes.change.subject, "Add feature");
        assert_eq!(
            notes.change.key.as_str(),
            "I1111111111111111111111111111111111111111"
        );
        assert_eq!(notes.change.topic.as_deref(), Some("feature-x"));
        // The owner is never their own reviewer.
        assert_eq!(notes.reviewers_in(ReviewerState::Reviewer), vec![AccountId(2)]);
        assert_eq!(notes.reviewers_in(ReviewerState::Cc), vec![AccountId(3)]);
        assert_eq!(
            t.repo.exact_ref("refs/changes/01/1/1").unwrap(),
            Some(commit)
        );

        assert_eq!(site.listener.names(), vec!["change-created"]);
        let jobs = site.sender.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].to, vec![AccountId(2), AccountId(3)]);
    }

    #[test]
    fn test_insert_existing_change_conflicts() {
        let site = TestSite::new();
        let t = &site.repo;
        let commit = t.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);

        let other = t.commit(&[], &[("a", "2\n")], "other\n");
        let mut batch = BatchUpdate::new(
            &t.repo,
            &site.services,
            testing::project(),
            testing::user(1),
            testing::when(),
        );
        batch.insert_change(ChangeInserter::new(id, other, BranchName::new("main")));
        assert!(matches!(batch.execute(), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_internal_user_cannot_own_change() {
        let site = TestSite::new();
        let t = &site.repo;
        let commit = t.commit(&[], &[("a", "1\n")], "root\n");
        let mut batch = BatchUpdate::new(
            &t.repo,
            &site.services,
            testing::project(),
            crate::model::CurrentUser::Internal,
            testing::when(),
        );
        batch.insert_change(ChangeInserter::new(ChangeId(1), commit, BranchName::new("main")));
        assert!(matches!(batch.execute(), Err(Error::BadRequest(_))));
        assert!(t.repo.exact_ref("refs/changes/01/1/1").unwrap().is_none());
    }
}
