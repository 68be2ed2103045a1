//! Work-in-progress and private flag toggles.

use crate::error::{Error, Result};
use crate::events::ChangeEvent;
use crate::model::ChangeId;
use crate::permission::ChangePermission;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoOnlyOp};

/// Marks a change work in progress, or ready for review.
#[derive(Debug)]
pub struct WorkInProgressOp {
    work_in_progress: bool,
    message: Option<String>,
    changed: Option<ChangeId>,
}

impl WorkInProgressOp {
    #[must_use]
    pub fn new(work_in_progress: bool, message: Option<String>) -> Self {
        Self {
            work_in_progress,
            message: message.filter(|m| !m.trim().is_empty()),
            changed: None,
        }
    }
}

impl RepoOnlyOp for WorkInProgressOp {
    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        if let Some(change) = self.changed {
            ctx.fire(&ChangeEvent::WorkInProgressStateChanged {
                project: ctx.project().clone(),
                change,
                work_in_progress: self.work_in_progress,
                actor: ctx.account_id(),
            });
        }
        Ok(())
    }
}

impl BatchUpdateOp for WorkInProgressOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        let change = ctx.change();
        if !change.is_new() {
            return Err(Error::Conflict(format!("change is {}", change.status)));
        }
        if change.work_in_progress == self.work_in_progress {
            return Err(Error::Conflict(if self.work_in_progress {
                "change is already work in progress".into()
            } else {
                "change is already ready for review".into()
            }));
        }
        ctx.check(change, &ChangePermission::ToggleWorkInProgress)?;

        let mut text = if self.work_in_progress {
            "Set Work In Progress".to_string()
        } else {
            "Set Ready For Review".to_string()
        };
        if let Some(message) = &self.message {
            text.push_str("\n\n");
            text.push_str(message.trim());
        }
        let tag = if self.work_in_progress {
            "autogenerated:revu:setWorkInProgress"
        } else {
            "autogenerated:revu:setReadyForReview"
        };

        let id = change.id;
        let ps = change.current_patch_set_id();
        let mut update = ctx.update(ps);
        update.set_work_in_progress(self.work_in_progress);
        update.add_change_message(&text, Some(tag));
        self.changed = Some(id);
        Ok(true)
    }
}

/// Sets or clears the private flag.
#[derive(Debug)]
pub struct SetPrivateOp {
    private: bool,
    changed: Option<ChangeId>,
}

impl SetPrivateOp {
    #[must_use]
    pub const fn new(private: bool) -> Self {
        Self {
            private,
            changed: None,
        }
    }
}

impl RepoOnlyOp for SetPrivateOp {
    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        if let Some(change) = self.changed {
            ctx.fire(&ChangeEvent::PrivateStateChanged {
                project: ctx.project().clone(),
                change,
                private: self.private,
                actor: ctx.account_id(),
            });
        }
        Ok(())
    }
}

impl BatchUpdateOp for SetPrivateOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        let change = ctx.change();
        if change.private == self.private {
            return Err(Error::Conflict(if self.private {
                "change is already private".into()
            } else {
                "change is not private".into()
            }));
        }
        if self.private && change.is_merged() {
            return Err(Error::Conflict(
                "change is merged and cannot be made private".into(),
            ));
        }
        ctx.check(change, &ChangePermission::TogglePrivate)?;

        let (text, tag) = if self.private {
            ("Set private", "autogenerated:revu:setPrivate")
        } else {
            ("Unset private", "autogenerated:revu:unsetPrivate")
        };
        let id = change.id;
        let ps = change.current_patch_set_id();
        let mut update = ctx.update(ps);
        update.set_private(self.private);
        update.add_change_message(text, Some(tag));
        self.changed = Some(id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::ChangeNotes;
    use crate::testing::{self, TestSite};

    #[test]
    fn test_wip_round_trip() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, WorkInProgressOp::new(true, Some("needs tests".into())));
        batch.execute().unwrap();
        let notes = ChangeNotes::load_required(&site.repo.repo, id).unwrap();
        assert!(notes.change.work_in_progress);
        assert_eq!(
            notes.messages.last().unwrap().message,
            "Set Work In Progress\n\nneeds tests"
        );

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, WorkInProgressOp::new(true, None));
        assert!(matches!(batch.execute(), Err(Error::Conflict(_))));

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, WorkInProgressOp::new(false, None));
        batch.execute().unwrap();
        let notes = ChangeNotes::load_required(&site.repo.repo, id).unwrap();
        assert!(!notes.change.work_in_progress);
        assert_eq!(site.listener.names().iter().filter(|n| **n == "wip-state-changed").count(), 2);
    }

    #[test]
    fn test_wip_on_closed_change() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);
        testing::abandon(&site, id);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, WorkInProgressOp::new(true, None));
        let err = batch.execute().unwrap_err();
        assert_eq!(err.to_string(), "change is abandoned");
    }

    #[test]
    fn test_private_toggle() {
        let site = TestSite::new();
        let commit = site.repo.commit(&[], &[("a", "1\n")], "root\n");
        let id = testing::create_change(&site, commit);

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, SetPrivateOp::new(false));
        let err = batch.execute().unwrap_err();
        assert_eq!(err.to_string(), "change is not private");

        let mut batch = testing::batch(&site, 1);
        batch.add_op(id, SetPrivateOp::new(true));
        batch.execute().unwrap();
        let notes = ChangeNotes::load_required(&site.repo.repo, id).unwrap();
        assert!(notes.change.private);
        assert_eq!(notes.messages.last().unwrap().message, "Set private");
        assert!(site.listener.names().contains(&"private-state-changed"));
    }
}
