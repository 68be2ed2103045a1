//! Recording a change merged by a direct push.

use super::send_email;
use crate::error::{Error, Result};
use crate::events::ChangeEvent;
use crate::model::{ChangeStatus, PatchSetId};
use crate::notify::EmailKind;
use crate::permission::ChangePermission;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoOnlyOp};

/// Marks a change MERGED at patch set `num`, whose commit must already be
/// reachable from the destination branch.
#[derive(Debug)]
pub struct MarkMergedOp {
    num: u32,
    merged: Option<PatchSetId>,
}

impl MarkMergedOp {
    #[must_use]
    pub const fn new(num: u32) -> Self {
        Self { num, merged: None }
    }
}

impl RepoOnlyOp for MarkMergedOp {
    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        let Some(patch_set) = self.merged else {
            return Ok(());
        };
        ctx.fire(&ChangeEvent::ChangeMerged {
            project: ctx.project().clone(),
            patch_set,
            actor: ctx.account_id(),
        });
        send_email(ctx, EmailKind::Merged, patch_set.change, None);
        Ok(())
    }
}

impl BatchUpdateOp for MarkMergedOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        let change = ctx.change();
        ctx.check(change, &ChangePermission::Submit)?;
        match change.status {
            ChangeStatus::Merged => return Ok(false),
            ChangeStatus::Abandoned => {
                return Err(Error::Conflict(format!("change {} is abandoned", change.id)));
            }
            ChangeStatus::New => {}
        }

        let ps = PatchSetId::new(change.id, self.num);
        let commit = ctx
            .notes()
            .patch_set(self.num)
            .map(|p| p.commit)
            .ok_or_else(|| Error::NotFound(format!("patch set {ps} not found")))?;
        let dest = &change.dest;
        let tip = ctx.get_ref(dest.as_ref_name())?.ok_or_else(|| {
            Error::Unprocessable(format!("The destination branch does not exist: {dest}"))
        })?;
        if !ctx.repo().is_ancestor(commit, tip)? {
            return Err(Error::Conflict(format!(
                "patch set {ps} is not reachable from {dest}"
            )));
        }

        let mut update = ctx.update(ps);
        update.set_current_patch_set(self.num);
        update.set_status(ChangeStatus::Merged);
        update.add_change_message(
            "Change has been successfully pushed.",
            Some("autogenerated:revu:merged"),
        );
        self.merged = Some(ps);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::ChangeNotes;
    use crate::testing::{self, TestSite};
    use crate::update::ChangeResult;

    #[test]
    fn test_mark_merged() {
        let site = TestSite::new();
        let t = &site.repo;
        let base = t.commit(&[], &[("a", "1\n")], "base\n");
        t.set_ref("refs/heads/main", base);
        let commit = t.commit(&[base], &[("a", "2\n")], "feature\n");
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, MarkMergedOp::new(1));
        let err = batch.execute().unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        t.set_ref("refs/heads/main", commit);
        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, MarkMergedOp::new(1));
        batch.execute().unwrap();

        let notes = ChangeNotes::load_required(&t.repo, id).unwrap();
        assert_eq!(notes.change.status, ChangeStatus::Merged);
        assert!(site.listener.names().contains(&"change-merged"));

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, MarkMergedOp::new(1));
        assert_eq!(batch.execute().unwrap().change(id), Some(ChangeResult::Skipped));
    }

    #[test]
    fn test_unknown_patch_set() {
        let site = TestSite::new();
        let t = &site.repo;
        let commit = t.commit(&[], &[("a", "1\n")], "root\n");
        t.set_ref("refs/heads/main", commit);
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, MarkMergedOp::new(4));
        assert!(matches!(batch.execute(), Err(Error::NotFound(_))));
    }
}
