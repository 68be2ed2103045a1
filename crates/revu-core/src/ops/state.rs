//! Abandoning a change.

use super::send_email;
use crate::error::{Error, Result};
use crate::events::ChangeEvent;
use crate::model::{ChangeId, ChangeStatus};
use crate::notify::EmailKind;
use crate::permission::ChangePermission;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoOnlyOp};

/// Moves an open change to ABANDONED.
#[derive(Debug, Default)]
pub struct AbandonOp {
    message: Option<String>,
    abandoned: Option<ChangeId>,
}

impl AbandonOp {
    #[must_use]
    pub fn new(message: Option<String>) -> Self {
        Self {
            message: message.filter(|m| !m.trim().is_empty()),
            abandoned: None,
        }
    }
}

impl RepoOnlyOp for AbandonOp {
    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        let Some(change) = self.abandoned else {
            return Ok(());
        };
        ctx.fire(&ChangeEvent::ChangeAbandoned {
            project: ctx.project().clone(),
            change,
            actor: ctx.account_id(),
        });
        send_email(ctx, EmailKind::Abandoned, change, self.message.clone());
        Ok(())
    }
}

impl BatchUpdateOp for AbandonOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        let change = ctx.change();
        if !change.is_new() {
            return Err(Error::Conflict(format!(
                "change {} is {}",
                change.id, change.status
            )));
        }
        ctx.check(change, &ChangePermission::Abandon)?;

        let id = change.id;
        let mut text = "Abandoned".to_string();
        if let Some(message) = &self.message {
            text.push_str("\n\n");
            text.push_str(message.trim());
        }
        let ps = change.current_patch_set_id();
        let mut update = ctx.update(ps);
        update.set_status(ChangeStatus::Abandoned);
        update.add_change_message(&text, Some("autogenerated:revu:abandon"));
        self.abandoned = Some(id);
        Ok(true)
    }
}
