//! Adding a patch set to an existing change.

use revu_git::{CommitInfo, Oid, RefUpdate};
use tracing::debug;

use super::{approvals, send_email};
use crate::change_kind::ChangeKind;
use crate::error::{Error, Result};
use crate::events::ChangeEvent;
use crate::model::{BranchName, ChangeKey, PatchSet, PatchSetId};
use crate::notes::ChangeNotes;
use crate::notify::EmailKind;
use crate::permission::ChangePermission;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoContext, RepoOnlyOp};
use crate::validation::{self, CommitReceivedEvent};

/// Creates patch set `ps_id` pointing at `commit` and makes it current.
#[derive(Debug)]
pub struct PatchSetInserter {
    ps_id: PatchSetId,
    commit: Oid,
    key: ChangeKey,
    dest: BranchName,
    message: Option<String>,
    description: Option<String>,
    groups: Option<Vec<String>>,
    work_in_progress: Option<bool>,
    validate: bool,
    check_permission: bool,
    fire_revision_created: bool,
    send_email: bool,
    copy_approvals: bool,

    info: Option<CommitInfo>,
    patch_set: Option<PatchSet>,
    kind: Option<ChangeKind>,
}

impl PatchSetInserter {
    #[must_use]
    pub fn new(notes: &ChangeNotes, ps_id: PatchSetId, commit: Oid) -> Self {
        Self {
            ps_id,
            commit,
            key: notes.change.key.clone(),
            dest: notes.change.dest.clone(),
            message: None,
            description: None,
            groups: None,
            work_in_progress: None,
            validate: true,
            check_permission: true,
            fire_revision_created: true,
            send_email: true,
            copy_approvals: true,
            info: None,
            patch_set: None,
            kind: None,
        }
    }

    /// Change message; defaults to "Uploaded patch set N.".
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Relation-chain groups; defaults to the previous patch set's.
    #[must_use]
    pub fn groups(mut self, groups: Vec<String>) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn set_groups(&mut self, groups: Vec<String>) {
        self.groups = Some(groups);
    }

    pub fn set_message(&mut self, message: String) {
        self.message = Some(message);
    }

    pub const fn set_work_in_progress(&mut self, wip: bool) {
        self.work_in_progress = Some(wip);
    }

    #[must_use]
    pub const fn work_in_progress(mut self, wip: bool) -> Self {
        self.work_in_progress = Some(wip);
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

    #[must_use]
    pub const fn copy_approvals(mut self, copy: bool) -> Self {
        self.copy_approvals = copy;
        self
    }

    #[must_use]
    pub const fn patch_set_id(&self) -> PatchSetId {
        self.ps_id
    }

    /// The stored patch set, once the change phase ran.
    #[must_use]
    pub const fn patch_set(&self) -> Option<&PatchSet> {
        self.patch_set.as_ref()
    }

    /// Classification against the previous current patch set.
    #[must_use]
    pub const fn change_kind(&self) -> Option<ChangeKind> {
        self.kind
    }
}

impl RepoOnlyOp for PatchSetInserter {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<()> {
        let info = ctx.repo().commit_info(self.commit)?;
        if self.validate {
            validation::validate_all(
                &ctx.services().validators,
                &CommitReceivedEvent {
                    project: ctx.project(),
                    branch: &self.dest,
                    commit: &info,
                    change_key: &self.key,
                    user: ctx.user(),
                },
            )?;
        }

        let ref_name = self.ps_id.ref_name();
        if ctx.get_ref(&ref_name)?.is_some() {
            return Err(Error::Conflict(format!(
                "patch set {} already exists",
                self.ps_id
            )));
        }
        ctx.add_ref_update(RefUpdate::create(ref_name, self.commit))?;
        self.info = Some(info);
        Ok(())
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        let (Some(_), Some(kind)) = (&self.patch_set, self.kind) else {
            return Ok(());
        };
        if self.fire_revision_created {
            ctx.fire(&ChangeEvent::RevisionCreated {
                project: ctx.project().clone(),
                patch_set: self.ps_id,
                kind,
                actor: ctx.account_id(),
            });
        }
        if self.send_email {
            send_email(ctx, EmailKind::ReplacePatchSet, self.ps_id.change, self.message.clone());
        }
        Ok(())
    }
}

impl BatchUpdateOp for PatchSetInserter {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        let change = ctx.change();
        if !change.is_new() {
            return Err(Error::Conflict(format!(
                "Cannot create new patch set of change {} because it is {}",
                change.id, change.status
            )));
        }
        if self.check_permission {
            ctx.check(change, &ChangePermission::AddPatchSet)?;
        }
        if ctx.notes().patch_set(self.ps_id.num).is_some() {
            return Err(Error::Conflict(format!(
                "patch set {} already exists",
                self.ps_id
            )));
        }
        let info = self
            .info
            .clone()
            .ok_or_else(|| Error::Unprocessable("patch set commit was not staged".into()))?;

        let prior = ctx.notes().current_patch_set().cloned();
        let kind = ctx
            .services()
            .change_kind
            .get(ctx.repo(), prior.as_ref().map(|p| p.commit), self.commit);

        let groups = self
            .groups
            .clone()
            .filter(|g| !g.is_empty())
            .or_else(|| prior.as_ref().map(|p| p.groups.clone()))
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| PatchSet::default_groups(self.commit));
        let ps = PatchSet {
            id: self.ps_id,
            commit: self.commit,
            uploader: ctx.account_id().unwrap_or(change.owner),
            created_on: ctx.when(),
            groups,
            description: self.description.clone(),
        };
        let wip = self
            .work_in_progress
            .filter(|wip| *wip != change.work_in_progress);
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("Uploaded patch set {}.", self.ps_id.num));

        let config = &ctx.services().config;
        let mut update = ctx.update(self.ps_id);
        update.add_patch_set(ps.clone());
        update.set_subject(info.subject());
        if let Some(wip) = wip {
            update.set_work_in_progress(wip);
        }
        update.add_change_message(&message, Some("autogenerated:revu:newPatchSet"));
        if let (true, Some(prior)) = (self.copy_approvals, &prior) {
            let copied = approvals::copy_approvals(config, &mut update, prior.id, kind);
            debug!(patch_set = %self.ps_id, %kind, copied = copied.len(), "copied approvals");
        }

        self.patch_set = Some(ps);
        self.kind = Some(kind);
        Ok(true)
    }
}
