//! Deleting a change outright.

use revu_git::RefUpdate;

use crate::error::{Error, Result};
use crate::events::ChangeEvent;
use crate::model::{ChangeId, PatchSetId};
use crate::notes::ChangeNotes;
use crate::notify::{EmailJob, EmailKind};
use crate::permission::ChangePermission;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoContext, RepoOnlyOp};

/// Removes every patch set ref and the metadata ref of a change that is
/// not merged.
#[derive(Debug)]
pub struct DeleteChangeOp {
    id: ChangeId,
    deleted: Option<ChangeNotes>,
}

impl DeleteChangeOp {
    #[must_use]
    pub const fn new(id: ChangeId) -> Self {
        Self { id, deleted: None }
    }
}

fn ensure_deletable(notes: &ChangeNotes) -> Result<()> {
    if notes.change.is_merged() {
        return Err(Error::Conflict(format!(
            "Deleting merged change {} is not allowed",
            notes.change.id
        )));
    }
    Ok(())
}

impl RepoOnlyOp for DeleteChangeOp {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<()> {
        let notes = ChangeNotes::load_required(ctx.repo(), self.id)?;
        ensure_deletable(&notes)?;
        for (name, old) in ctx.refs_by_prefix(&self.id.ref_prefix())? {
            if PatchSetId::from_ref(&name).is_some_and(|ps| ps.change == self.id) {
                ctx.add_ref_update(RefUpdate::delete(name, old))?;
            }
        }
        Ok(())
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        let Some(notes) = self.deleted.take() else {
            return Ok(());
        };
        ctx.fire(&ChangeEvent::ChangeDeleted {
            project: ctx.project().clone(),
            change: self.id,
            actor: ctx.account_id(),
        });
        let job = EmailJob {
            kind: EmailKind::Deleted,
            project: ctx.project().clone(),
            change: self.id,
            subject: notes.change.subject.clone(),
            from: ctx.account_id(),
            to: Vec::new(),
            message: None,
        };
        ctx.email(job, &notes);
        Ok(())
    }
}

impl BatchUpdateOp for DeleteChangeOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        ctx.check(ctx.change(), &ChangePermission::Delete)?;
        ensure_deletable(ctx.notes())?;
        self.deleted = Some(ctx.notes().clone());
        ctx.delete_change();
        Ok(true)
    }
}
