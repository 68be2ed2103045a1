//! Change service: runs change ops through retried batches.
//!
//! Every mutation loads fresh change state, builds its op and executes a
//! one-op batch inside the retry helper, so a lost ref race rebuilds from
//! the new state.

use anyhow::{Context, Result};
use chrono::Utc;
use revu_core::ops::ChangeInserter;
use revu_core::{
    BatchUpdate, BranchName, ChangeId, ChangeNotes, ChangeOp, ChangeResult, CurrentUser, Project,
    RebaseChangeOp, RebaseTarget, RebaseUtil, RetryHelper, Sequences, Services, SiteStore,
};
use revu_git::{MergeStrategy, Repository};

/// Options for a new change.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub branch: String,
    pub commit: String,
    pub topic: Option<String>,
    pub work_in_progress: bool,
    pub private: bool,
    pub reviewers: Vec<u32>,
}

/// Options for a rebase.
#[derive(Debug, Clone, Default)]
pub struct RebaseRequest {
    pub base: Option<String>,
    pub allow_conflicts: bool,
    pub match_author_date: bool,
    pub strategy: Option<MergeStrategy>,
}

/// What a mutation did.
#[derive(Debug)]
pub struct Outcome {
    pub result: ChangeResult,
    /// State after the batch; `None` when nothing was written or the change
    /// was deleted.
    pub notes: Option<ChangeNotes>,
}

/// Service for creating and editing changes with trait-based site storage.
pub struct ChangeService<'a, S: SiteStore> {
    store: &'a S,
    services: &'a Services,
    user: CurrentUser,
}

impl<'a, S: SiteStore> ChangeService<'a, S> {
    /// Create a new change service acting as `user`.
    pub const fn new(store: &'a S, services: &'a Services, user: CurrentUser) -> Self {
        Self {
            store,
            services,
            user,
        }
    }

    fn retry(&self) -> RetryHelper {
        RetryHelper::new(&self.services.config.update)
    }

    fn batch<'r>(&'r self, repo: &'r Repository, project: &Project) -> BatchUpdate<'r> {
        BatchUpdate::new(
            repo,
            self.services,
            project.clone(),
            self.user.clone(),
            Utc::now(),
        )
    }

    /// Create a change whose first patch set is `request.commit`.
    pub fn create(&self, project: &Project, request: &CreateRequest) -> Result<ChangeNotes> {
        let repo = self.store.open_project(project)?;
        let commit = repo
            .resolve_commit(&request.commit)
            .with_context(|| format!("Unknown revision: {}", request.commit))?;
        let id = Sequences::new(&repo, self.services.server_ident(Utc::now())).next_change_id()?;
        let branch = BranchName::new(&request.branch);
        let reviewers: Vec<_> = request
            .reviewers
            .iter()
            .copied()
            .map(revu_core::AccountId)
            .collect();

        let mut result = self.retry().execute(|| {
            let mut batch = self.batch(&repo, project);
            batch.insert_change(
                ChangeInserter::new(id, commit, branch.clone())
                    .topic(request.topic.clone())
                    .work_in_progress(request.work_in_progress)
                    .private(request.private)
                    .reviewers(reviewers.clone()),
            );
            batch.execute()
        })?;
        result
            .notes
            .remove(&id)
            .with_context(|| format!("Change {id} was not created"))
    }

    /// Current state of a change.
    pub fn show(&self, project: &Project, id: ChangeId) -> Result<ChangeNotes> {
        let repo = self.store.open_project(project)?;
        Ok(ChangeNotes::load_required(&repo, id)?)
    }

    /// Run the op `build` makes from the change's latest state.
    pub fn apply(
        &self,
        project: &Project,
        id: ChangeId,
        build: impl Fn(&Repository, &ChangeNotes) -> revu_core::Result<ChangeOp>,
    ) -> Result<Outcome> {
        let repo = self.store.open_project(project)?;
        let mut result = self.retry().execute(|| {
            let notes = ChangeNotes::load_required(&repo, id)?;
            let op = build(&repo, &notes)?;
            let mut batch = self.batch(&repo, project);
            batch.add_op(id, op);
            batch.execute()
        })?;
        Ok(Outcome {
            result: result.change(id).unwrap_or(ChangeResult::Skipped),
            notes: result.notes.remove(&id),
        })
    }

    /// Rebase the current patch set of `id`.
    pub fn rebase(
        &self,
        project: &Project,
        id: ChangeId,
        request: &RebaseRequest,
    ) -> Result<Outcome> {
        self.apply(project, id, |repo, notes| {
            let util = RebaseUtil::new(repo);
            let ps = notes.require_current_patch_set()?;
            util.verify_rebase_preconditions(notes, ps)?;
            let base = util.parse_or_find_base_revision(notes, ps, request.base.as_deref())?;

            let mut op = RebaseChangeOp::new(notes, ps, RebaseTarget::Commit(base))
                .allow_conflicts(request.allow_conflicts)
                .match_author_date(request.match_author_date);
            if let Some(strategy) = request.strategy {
                op = op.strategy(strategy);
            }
            Ok(op.into())
        })
    }
}
