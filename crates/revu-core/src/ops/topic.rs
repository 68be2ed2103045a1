//! Setting or clearing a change's topic.

use crate::error::{Error, Result};
use crate::events::ChangeEvent;
use crate::model::ChangeId;
use crate::permission::ChangePermission;
use crate::update::{BatchUpdateOp, ChangeContext, PostUpdateContext, RepoContext, RepoOnlyOp};

/// Longest topic accepted, in characters.
pub const MAX_TOPIC_LENGTH: usize = 2048;

/// Sets, changes or removes the topic. An empty topic removes it.
#[derive(Debug)]
pub struct SetTopicOp {
    topic: Option<String>,
    edited: Option<(ChangeId, Option<String>)>,
}

impl SetTopicOp {
    #[must_use]
    pub fn new(topic: Option<String>) -> Self {
        Self {
            topic: topic
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            edited: None,
        }
    }
}

impl RepoOnlyOp for SetTopicOp {
    fn update_repo(&mut self, _ctx: &mut RepoContext<'_>) -> Result<()> {
        match &self.topic {
            Some(topic) if topic.chars().count() > MAX_TOPIC_LENGTH => Err(Error::BadRequest(
                format!("topic length exceeds the limit ({MAX_TOPIC_LENGTH})"),
            )),
            _ => Ok(()),
        }
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        let Some((change, old_topic)) = self.edited.take() else {
            return Ok(());
        };
        ctx.fire(&ChangeEvent::TopicEdited {
            project: ctx.project().clone(),
            change,
            old_topic,
            actor: ctx.account_id(),
        });
        Ok(())
    }
}

impl BatchUpdateOp for SetTopicOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        let change = ctx.change();
        ctx.check(change, &ChangePermission::EditTopic)?;
        let old = change.topic.clone();
        if old == self.topic {
            return Ok(false);
        }

        let message = match (&old, &self.topic) {
            (None, Some(new)) => format!("Topic set to {new}"),
            (Some(old), Some(new)) => format!("Topic changed from {old} to {new}"),
            (Some(old), None) => format!("Topic {old} removed"),
            (None, None) => return Ok(false),
        };
        let id = change.id;
        let ps = change.current_patch_set_id();
        let mut update = ctx.update(ps);
        update.set_topic(self.topic.clone());
        update.add_change_message(&message, Some("autogenerated:revu:setTopic"));
        self.edited = Some((id, old));
        Ok(true)
    }
}
