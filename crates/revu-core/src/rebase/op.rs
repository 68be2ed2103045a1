//! Rebasing a patch set with a three-way merge.

use std::collections::BTreeSet;

use revu_git::{
    MarkerLabels, MergeOutcome, MergeStrategy, NewCommit, Oid, PersonIdent, ThreeWayMerger,
};
use tracing::{debug, info};

use super::util::{RebaseUtil, next_patch_set_id, sole_parent};
use super::{BASE_LABEL, PARENT_LABEL, PATCH_SET_LABEL};
use crate::change_kind::ChangeKind;
use crate::error::{Error, Result};
use crate::footer;
use crate::model::{ChangeId, PatchSet, PatchSetId};
use crate::notes::ChangeNotes;
use crate::ops::PatchSetInserter;
use crate::permission::ChangePermission;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoContext, RepoOnlyOp};

/// What a patch set is rebased onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseTarget {
    /// An explicit commit.
    Commit(Oid),
    /// The current patch set of another change, read when the batch runs.
    Change(ChangeId),
    /// The tip of the change's destination branch.
    BranchTip,
}

/// Rebases `original` onto a new base and stores the result as the next
/// patch set of the change.
#[derive(Debug)]
pub struct RebaseChangeOp {
    notes: ChangeNotes,
    original: PatchSet,
    target: RebaseTarget,
    allow_conflicts: bool,
    detailed_commit_message: bool,
    post_message: bool,
    match_author_date: bool,
    committer: Option<PersonIdent>,
    strategy: Option<MergeStrategy>,
    validate: bool,
    check_permission: bool,
    fire_revision_created: bool,
    send_email: bool,

    rebased: Option<Oid>,
    files_with_conflicts: BTreeSet<String>,
    inserter: Option<PatchSetInserter>,
}

impl RebaseChangeOp {
    #[must_use]
    pub fn new(notes: &ChangeNotes, original: &PatchSet, target: RebaseTarget) -> Self {
        Self {
            notes: notes.clone(),
            original: original.clone(),
            target,
            allow_conflicts: false,
            detailed_commit_message: false,
            post_message: true,
            match_author_date: false,
            committer: None,
            strategy: None,
            validate: true,
            check_permission: true,
            fire_revision_created: true,
            send_email: true,
            rebased: None,
            files_with_conflicts: BTreeSet::new(),
            inserter: None,
        }
    }

    /// Store conflicts as markers instead of failing.
    #[must_use]
    pub const fn allow_conflicts(mut self, allow: bool) -> Self {
        self.allow_conflicts = allow;
        self
    }

    /// Rewrite the message with submit footers (`Reviewed-on`, votes).
    #[must_use]
    pub const fn detailed_commit_message(mut self, detailed: bool) -> Self {
        self.detailed_commit_message = detailed;
        self
    }

    #[must_use]
    pub const fn post_message(mut self, post: bool) -> Self {
        self.post_message = post;
        self
    }

    /// Give the author the committer's timestamp.
    #[must_use]
    pub const fn match_author_date(mut self, matched: bool) -> Self {
        self.match_author_date = matched;
        self
    }

    /// Commit as `committer` instead of the acting user.
    #[must_use]
    pub fn committer(mut self, committer: PersonIdent) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Merge with `strategy` instead of the configured one.
    #[must_use]
    pub const fn strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub const fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    #[must_use]
    pub const fn check_permission(mut self, check: bool) -> Self {
        self.check_permission = check;
        self
    }

    #[must_use]
    pub const fn fire_revision_created(mut self, fire: bool) -> Self {
        self.fire_revision_created = fire;
        self
    }

    #[must_use]
    pub const fn send_email(mut self, send: bool) -> Self {
        self.send_email = send;
        self
    }

    /// The rebased commit, once the repo phase ran.
    #[must_use]
    pub const fn rebased_commit(&self) -> Option<Oid> {
        self.rebased
    }

    /// Files whose content carries conflict markers.
    #[must_use]
    pub const fn files_with_conflicts(&self) -> &BTreeSet<String> {
        &self.files_with_conflicts
    }

    #[must_use]
    pub fn patch_set_id(&self) -> Option<PatchSetId> {
        self.inserter.as_ref().map(PatchSetInserter::patch_set_id)
    }

    /// The stored patch set, once the change phase ran.
    #[must_use]
    pub fn patch_set(&self) -> Option<&PatchSet> {
        self.inserter.as_ref().and_then(PatchSetInserter::patch_set)
    }

    #[must_use]
    pub fn change_kind(&self) -> Option<ChangeKind> {
        self.inserter.as_ref().and_then(PatchSetInserter::change_kind)
    }

    fn resolve_base(&self, ctx: &RepoContext<'_>) -> Result<Oid> {
        match &self.target {
            RebaseTarget::Commit(commit) => Ok(*commit),
            RebaseTarget::Change(id) => {
                let notes = ChangeNotes::load_required(ctx.repo(), *id)?;
                Ok(notes.require_current_patch_set()?.commit)
            }
            RebaseTarget::BranchTip => {
                let dest = &self.notes.change.dest;
                ctx.get_ref(dest.as_ref_name())?.ok_or_else(|| {
                    Error::Unprocessable(format!(
                        "The destination branch does not exist: {}",
                        dest.as_ref_name()
                    ))
                })
            }
        }
    }

    fn commit_message(&self, ctx: &RepoContext<'_>, original: &str) -> String {
        if !self.detailed_commit_message {
            return original.to_string();
        }
        let approvals: Vec<_> = self
            .notes
            .approvals_on(self.original.id)
            .cloned()
            .collect();
        footer::submit_message(
            original,
            &self.notes.change,
            &approvals,
            ctx.services().config.server.canonical_web_url.as_deref(),
        )
    }

    /// Merge the original onto `base` and write the rebased commit.
    fn rebase_commit(&mut self, ctx: &RepoContext<'_>, base: Oid) -> Result<Oid> {
        let repo = ctx.repo();
        let info = repo.commit_info(self.original.commit)?;
        let parent = sole_parent(&info)?;
        if base == parent {
            return Err(Error::Conflict("Change is already up to date.".into()));
        }

        let strategy = self.strategy.unwrap_or_else(|| ctx.services().strategy());
        let merger = ThreeWayMerger::new(repo, strategy);
        let tree = match merger.merge(Some(parent), info.id, base)? {
            MergeOutcome::Clean(tree) => tree,
            MergeOutcome::Conflicted(conflicted) => {
                if !self.allow_conflicts {
                    return Err(Error::MergeConflict {
                        paths: conflicted.unmerged_paths().to_vec(),
                    });
                }
                let marked = conflicted.write_tree_with_markers(
                    repo,
                    MarkerLabels {
                        ours: PATCH_SET_LABEL,
                        theirs: BASE_LABEL,
                        base: PARENT_LABEL,
                    },
                    ctx.services().config.merge.diff3,
                )?;
                self.files_with_conflicts = marked.files_with_markers;
                marked.tree
            }
        };

        let committer = self
            .committer
            .clone()
            .unwrap_or_else(|| ctx.user_ident());
        let author = if self.match_author_date {
            info.author
                .with_when(committer.when, committer.tz_offset_minutes)
        } else {
            info.author.clone()
        };
        let message = self.commit_message(ctx, &info.message);
        let rebased = repo.write_commit(&NewCommit {
            tree,
            parents: &[base],
            author: &author,
            committer: &committer,
            message: &message,
        })?;
        debug!(original = %info.id, %base, %rebased, "wrote rebased commit");
        Ok(rebased)
    }

    fn change_message(&self, ps: PatchSetId) -> String {
        let mut message = format!(
            "Patch Set {}: Patch Set {} was rebased",
            ps.num, self.original.id.num
        );
        if !self.files_with_conflicts.is_empty() {
            message.push_str("\n\nThe following files contain Git conflicts:\n");
            for path in &self.files_with_conflicts {
                message.push_str("* ");
                message.push_str(path);
                message.push('\n');
            }
        }
        message
    }
}

impl RepoOnlyOp for RebaseChangeOp {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<()> {
        let base = self.resolve_base(ctx)?;
        let rebased = self.rebase_commit(ctx, base)?;

        let change = &self.notes.change;
        let refs = ctx.refs_by_prefix(&change.id.ref_prefix())?;
        let ps_id = next_patch_set_id(refs.keys(), change.current_patch_set_id());

        let mut inserter = PatchSetInserter::new(&self.notes, ps_id, rebased)
            .description("Rebase")
            .validate(self.validate)
            .check_permission(self.check_permission)
            .fire_revision_created(self.fire_revision_created)
            .send_email(self.send_email);
        if self.post_message {
            inserter.set_message(self.change_message(ps_id));
        }
        if !self.files_with_conflicts.is_empty() && !change.work_in_progress {
            inserter.set_work_in_progress(true);
        }
        // Join the base change's relation chain; a merged base starts a new
        // one.
        if let Some(base) = RebaseUtil::new(ctx.repo()).parse_base(&base.to_string())? {
            if base.notes.change.is_merged() {
                inserter.set_groups(PatchSet::default_groups(rebased));
            } else {
                inserter.set_groups(base.patch_set.groups);
            }
        }

        inserter.update_repo(ctx)?;
        info!(
            change = %change.id,
            patch_set = %ps_id,
            conflicts = self.files_with_conflicts.len(),
            "rebased change"
        );
        self.rebased = Some(rebased);
        self.inserter = Some(inserter);
        Ok(())
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        match &mut self.inserter {
            Some(inserter) => inserter.post_update(ctx),
            None => Ok(()),
        }
    }
}

impl BatchUpdateOp for RebaseChangeOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        if self.check_permission {
            ctx.check(ctx.change(), &ChangePermission::Rebase)?;
        }
        let Some(inserter) = &mut self.inserter else {
            return Err(Error::Unprocessable("rebased commit was not staged".into()));
        };
        inserter.update_change(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeEvent;
    use crate::testing::{self, TestSite};

    struct Fixture {
        site: TestSite,
        base: Oid,
        id: ChangeId,
    }

    impl Fixture {
        /// `main` at `base`, one change editing line 1 of `a`.
        fn new() -> Self {
            let site = TestSite::new();
            let base = site
                .repo
                .commit(&[], &[("a", "1\n2\n3\n"), ("b", "x\n")], "base\n");
            site.repo.set_ref("refs/heads/main", base);
            let commit = site.repo.commit(
                &[base],
                &[("a", "one\n2\n3\n"), ("b", "x\n")],
                "Edit a\n\nChange-Id: I0123456789abcdef0123456789abcdef01234567\n",
            );
            let id = testing::create_change(&site, commit);
            Self { site, base, id }
        }

        fn advance_main(&self, files: &[(&str, &str)]) -> Oid {
            let tip = self.site.repo.commit(&[self.base], files, "upstream\n");
            self.site.repo.set_ref("refs/heads/main", tip);
            tip
        }

        fn notes(&self) -> ChangeNotes {
            ChangeNotes::load_required(&self.site.repo.repo, self.id).unwrap()
        }

        fn rebase(&self, configure: impl FnOnce(RebaseChangeOp) -> RebaseChangeOp) -> Result<()> {
            let notes = self.notes();
            let ps = notes.current_patch_set().unwrap();
            let op = configure(RebaseChangeOp::new(&notes, ps, RebaseTarget::BranchTip));
            let mut batch = testing::batch(&self.site, 1);
            batch.add_op(self.id, op);
            batch.execute().map(|_| ())
        }
    }

    #[test]
    fn test_clean_rebase_is_trivial() {
        let f = Fixture::new();
        let tip = f.advance_main(&[("a", "1\n2\n3\n"), ("b", "y\n")]);
        f.rebase(|op| op).unwrap();

        let notes = f.notes();
        assert_eq!(notes.change.current_patch_set, 2);
        let ps1 = notes.patch_set(1).unwrap();
        let ps2 = notes.patch_set(2).unwrap();
        assert_eq!(ps2.description.as_deref(), Some("Rebase"));
        assert_eq!(ps2.groups, ps1.groups);

        let repo = &f.site.repo.repo;
        let info = repo.commit_info(ps2.commit).unwrap();
        assert_eq!(info.parents, vec![tip]);
        assert_eq!(info.message, repo.commit_info(ps1.commit).unwrap().message);
        assert_eq!(info.committer.name, "User 1");
        assert_eq!(
            repo.read_path(info.tree, "a").unwrap().unwrap(),
            b"one\n2\n3\n"
        );
        assert_eq!(repo.read_path(info.tree, "b").unwrap().unwrap(), b"y\n");

        assert_eq!(
            f.site.services.change_kind.get(repo, Some(ps1.commit), ps2.commit),
            ChangeKind::TrivialRebase
        );
        assert!(f.site.listener.events().iter().any(|e| matches!(
            e,
            ChangeEvent::RevisionCreated { kind: ChangeKind::TrivialRebase, .. }
        )));
        assert_eq!(
            notes.messages.last().unwrap().message,
            "Patch Set 2: Patch Set 1 was rebased"
        );
    }

    #[test]
    fn test_already_up_to_date() {
        let f = Fixture::new();
        let before = f.site.repo.repo.exact_ref(&f.id.meta_ref()).unwrap();
        let notes = f.notes();
        let ps = notes.current_patch_set().unwrap();
        let op = RebaseChangeOp::new(&notes, ps, RebaseTarget::Commit(f.base));
        let mut batch = testing::batch(&f.site, 1);
        batch.add_op(f.id, op);
        let err = batch.execute().unwrap_err();
        assert_eq!(err.to_string(), "Change is already up to date.");
        assert_eq!(f.site.repo.repo.exact_ref(&f.id.meta_ref()).unwrap(), before);
        assert_eq!(f.notes().change.current_patch_set, 1);
    }

    #[test]
    fn test_conflict_lists_paths() {
        let f = Fixture::new();
        f.advance_main(&[("a", "uno\n2\n3\n"), ("b", "x\n")]);
        let err = f.rebase(|op| op).unwrap_err();
        match &err {
            Error::MergeConflict { paths } => assert_eq!(paths, &vec!["a".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().ends_with("merge conflict(s):\na"));
        assert_eq!(f.notes().change.current_patch_set, 1);
    }

    #[test]
    fn test_allowed_conflicts_force_wip() {
        let f = Fixture::new();
        f.advance_main(&[("a", "uno\n2\n3\n"), ("b", "x\n")]);
        f.rebase(|op| op.allow_conflicts(true)).unwrap();

        let notes = f.notes();
        assert!(notes.change.work_in_progress);
        assert_eq!(
            notes.messages.last().unwrap().message,
            "Patch Set 2: Patch Set 1 was rebased\n\nThe following files contain Git conflicts:\n* a\n"
        );
        let repo = &f.site.repo.repo;
        let tree = repo.commit_info(notes.patch_set(2).unwrap().commit).unwrap().tree;
        let content = String::from_utf8(repo.read_path(tree, "a").unwrap().unwrap()).unwrap();
        assert!(content.contains("<<<<<<< PATCH SET"));
        assert!(content.contains(">>>>>>> BASE"));
    }

    #[test]
    fn test_onto_dependent_change() {
        let f = Fixture::new();
        let parent_commit = f.site.repo.commit(
            &[f.base],
            &[("a", "1\n2\n3\n"), ("b", "x\n"), ("c", "new\n")],
            "Add c\n",
        );
        let parent = testing::create_change(&f.site, parent_commit);

        let notes = f.notes();
        let ps = notes.current_patch_set().unwrap();
        let op = RebaseChangeOp::new(&notes, ps, RebaseTarget::Change(parent));
        let mut batch = testing::batch(&f.site, 1);
        batch.add_op(f.id, op);
        batch.execute().unwrap();

        let notes = f.notes();
        let ps2 = notes.patch_set(2).unwrap();
        let parent_notes = ChangeNotes::load_required(&f.site.repo.repo, parent).unwrap();
        assert_eq!(ps2.groups, parent_notes.patch_set(1).unwrap().groups);
        let info = f.site.repo.repo.commit_info(ps2.commit).unwrap();
        assert_eq!(info.parents, vec![parent_commit]);
    }

    #[test]
    fn test_match_author_date_and_committer() {
        let f = Fixture::new();
        f.advance_main(&[("a", "1\n2\n3\n"), ("b", "y\n")]);
        let committer =
            PersonIdent::new("Bot", "bot@example.com", testing::at(testing::EPOCH + 60));
        f.rebase(|op| op.committer(committer.clone()).match_author_date(true))
            .unwrap();

        let notes = f.notes();
        let info = f
            .site
            .repo
            .repo
            .commit_info(notes.patch_set(2).unwrap().commit)
            .unwrap();
        assert_eq!(info.committer.name, "Bot");
        assert_eq!(info.author.name, "Author");
        assert_eq!(info.author.when, committer.when);
    }
}
