//! Typed change events delivered to listeners after a batch commits.

use std::sync::Arc;

use tracing::warn;

use crate::change_kind::ChangeKind;
use crate::error::Result;
use crate::model::{AccountId, ChangeId, PatchSetId, Project};

/// Something that happened to a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    ChangeCreated {
        project: Project,
        change: ChangeId,
        actor: Option<AccountId>,
    },
    RevisionCreated {
        project: Project,
        patch_set: PatchSetId,
        kind: ChangeKind,
        actor: Option<AccountId>,
    },
    ChangeAbandoned {
        project: Project,
        change: ChangeId,
        actor: Option<AccountId>,
    },
    ChangeMerged {
        project: Project,
        patch_set: PatchSetId,
        actor: Option<AccountId>,
    },
    ChangeDeleted {
        project: Project,
        change: ChangeId,
        actor: Option<AccountId>,
    },
    ReviewersAdded {
        project: Project,
        change: ChangeId,
        reviewers: Vec<AccountId>,
        actor: Option<AccountId>,
    },
    ReviewerDeleted {
        project: Project,
        change: ChangeId,
        reviewer: AccountId,
        actor: Option<AccountId>,
    },
    TopicEdited {
        project: Project,
        change: ChangeId,
        old_topic: Option<String>,
        actor: Option<AccountId>,
    },
    WorkInProgressStateChanged {
        project: Project,
        change: ChangeId,
        work_in_progress: bool,
        actor: Option<AccountId>,
    },
    PrivateStateChanged {
        project: Project,
        change: ChangeId,
        private: bool,
        actor: Option<AccountId>,
    },
    VoteCast {
        project: Project,
        patch_set: PatchSetId,
        label: String,
        value: i16,
        actor: Option<AccountId>,
    },
}

impl ChangeEvent {
    /// Kebab-case event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ChangeCreated { .. } => "change-created",
            Self::RevisionCreated { .. } => "revision-created",
            Self::ChangeAbandoned { .. } => "change-abandoned",
            Self::ChangeMerged { .. } => "change-merged",
            Self::ChangeDeleted { .. } => "change-deleted",
            Self::ReviewersAdded { .. } => "reviewers-added",
            Self::ReviewerDeleted { .. } => "reviewer-deleted",
            Self::TopicEdited { .. } => "topic-edited",
            Self::WorkInProgressStateChanged { .. } => "wip-state-changed",
            Self::PrivateStateChanged { .. } => "private-state-changed",
            Self::VoteCast { .. } => "vote-cast",
        }
    }

    /// The change the event is about.
    #[must_use]
    pub const fn change(&self) -> ChangeId {
        match self {
            Self::RevisionCreated { patch_set, .. }
            | Self::ChangeMerged { patch_set, .. }
            | Self::VoteCast { patch_set, .. } => patch_set.change,
            Self::ChangeCreated { change, .. }
            | Self::ChangeAbandoned { change, .. }
            | Self::ChangeDeleted { change, .. }
            | Self::ReviewersAdded { change, .. }
            | Self::ReviewerDeleted { change, .. }
            | Self::TopicEdited { change, .. }
            | Self::WorkInProgressStateChanged { change, .. }
            | Self::PrivateStateChanged { change, .. } => *change,
        }
    }
}

/// Receives change events.
pub trait EventListener: Send + Sync {
    /// Handle one event.
    ///
    /// # Errors
    /// Failures are logged by the bus and never affect other listeners.
    fn on_event(&self, event: &ChangeEvent) -> Result<()>;
}

/// Ordered set of listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    /// Deliver `event` to every listener in registration order.
    pub fn fire(&self, event: &ChangeEvent) {
        for (index, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.on_event(event) {
                warn!(
                    event = event.name(),
                    change = %event.change(),
                    listener = index,
                    error = %e,
                    "event listener failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
