//! The batch executor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use revu_git::{RefUpdate, Repository};
use tracing::{debug, debug_span, info_span, warn};

use crate::error::{Error, Result};
use crate::model::{ChangeId, CurrentUser, Project};
use crate::notes::{self, ChangeNotes};
use crate::notify::NotifyHandling;
use crate::services::Services;

use super::context::{ChangeContext, Env, PostUpdateContext, RepoContext};
use super::view::RepoView;
use super::{BatchUpdateOp, InsertChangeOp, RepoOnlyOp};

/// What a batch did to one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeResult {
    /// Every op reported no change; nothing was written.
    Skipped,
    /// A metadata commit was written.
    Upserted,
    /// The metadata ref was removed.
    Deleted,
}

/// Outcome of a committed batch.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub changes: BTreeMap<ChangeId, ChangeResult>,
    /// Committed state of every upserted change.
    pub notes: BTreeMap<ChangeId, ChangeNotes>,
    /// Ref updates applied by the transaction.
    pub ref_updates: Vec<RefUpdate>,
}

impl BatchResult {
    #[must_use]
    pub fn change(&self, id: ChangeId) -> Option<ChangeResult> {
        self.changes.get(&id).copied()
    }
}

enum Slot {
    Change(ChangeId, Box<dyn BatchUpdateOp>),
    Insert(ChangeId, Box<dyn InsertChangeOp>),
    Repo(Box<dyn RepoOnlyOp>),
}

impl Slot {
    const fn change_id(&self) -> Option<ChangeId> {
        match self {
            Self::Change(id, _) | Self::Insert(id, _) => Some(*id),
            Self::Repo(_) => None,
        }
    }

    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<()> {
        match self {
            Self::Change(_, op) => op.update_repo(ctx),
            Self::Insert(_, op) => op.update_repo(ctx),
            Self::Repo(op) => op.update_repo(ctx),
        }
    }

    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool> {
        match self {
            Self::Change(_, op) => op.update_change(ctx),
            Self::Insert(_, op) => op.update_change(ctx),
            Self::Repo(_) => Ok(false),
        }
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> Result<()> {
        match self {
            Self::Change(_, op) => op.post_update(ctx),
            Self::Insert(_, op) => op.post_update(ctx),
            Self::Repo(op) => op.post_update(ctx),
        }
    }
}

/// Ops for one project, one actor and one timestamp, executed as a single
/// ref transaction.
pub struct BatchUpdate<'a> {
    repo: &'a Repository,
    services: &'a Services,
    project: Project,
    user: CurrentUser,
    when: DateTime<Utc>,
    notify: NotifyHandling,
    slots: Vec<Slot>,
}

impl<'a> BatchUpdate<'a> {
    #[must_use]
    pub const fn new(
        repo: &'a Repository,
        services: &'a Services,
        project: Project,
        user: CurrentUser,
        when: DateTime<Utc>,
    ) -> Self {
        Self {
            repo,
            services,
            project,
            user,
            when,
            notify: NotifyHandling::All,
            slots: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_notify(mut self, notify: NotifyHandling) -> Self {
        self.notify = notify;
        self
    }

    pub fn set_notify(&mut self, notify: NotifyHandling) {
        self.notify = notify;
    }

    /// Add an op for an existing change. Ops on the same change run in the
    /// order they were added.
    pub fn add_op(&mut self, change: ChangeId, op: impl BatchUpdateOp + 'static) -> &mut Self {
        self.slots.push(Slot::Change(change, Box::new(op)));
        self
    }

    /// Add an op that only stages refs and reacts after commit.
    pub fn add_repo_only_op(&mut self, op: impl RepoOnlyOp + 'static) -> &mut Self {
        self.slots.push(Slot::Repo(Box::new(op)));
        self
    }

    /// Add an op creating a new change. It runs before any other op on
    /// that change.
    pub fn insert_change(&mut self, op: impl InsertChangeOp + 'static) -> &mut Self {
        self.slots.push(Slot::Insert(op.change_id(), Box::new(op)));
        self
    }

    /// Run all phases and commit.
    ///
    /// Ops see the repository through a handle whose object writes are held
    /// in memory. Objects reachable from the committed refs are written to
    /// the object database just before the ref transaction.
    ///
    /// # Errors
    /// Returns the first phase 1 or phase 2 error, or a contention error if
    /// a ref moved since it was read. Nothing is written in either case.
    pub fn execute(self) -> Result<BatchResult> {
        let Self {
            repo,
            services,
            project,
            user,
            when,
            notify,
            mut slots,
        } = self;
        let span = info_span!("batch", project = %project, ops = slots.len());
        let _enter = span.enter();

        // Objects written by ops stay in memory until the refs are committed.
        let staged = repo.in_memory()?;
        let env = Env {
            repo: &staged,
            services,
            project: &project,
            user: &user,
            when,
            notify,
        };

        let mut view = RepoView::default();
        for slot in &mut slots {
            slot.update_repo(&mut RepoContext {
                env,
                view: &mut view,
            })?;
        }
        debug!(staged = view.pending().len(), "repo phase done");

        let mut result = BatchResult::default();
        for id in change_order(&slots) {
            let span = debug_span!("change", change = %id);
            let _enter = span.enter();
            let (status, notes) = update_change(env, &mut view, &mut slots, id)?;
            if let Some(notes) = notes {
                result.notes.insert(id, notes);
            }
            result.changes.insert(id, status);
        }

        let updates = view.into_updates();
        if !updates.is_empty() {
            let tips: Vec<_> = updates.iter().filter_map(|u| u.new).collect();
            let copied = repo.import_objects(&staged, &tips)?;
            debug!(objects = copied, "staged objects written");
            let mut tx = repo
                .ref_transaction()
                .with_message(format!("revu: update {project}"));
            for update in updates {
                tx.add(update)?;
            }
            result.ref_updates = tx.commit(&env.server_ident())?;
        }
        debug!(
            refs = result.ref_updates.len(),
            changes = result.changes.len(),
            "batch committed"
        );

        let post = PostUpdateContext {
            env,
            result: &result,
        };
        for slot in &mut slots {
            if let Err(e) = slot.post_update(&post) {
                warn!(change = ?slot.change_id(), error = %e, "post-update failed");
            }
        }
        Ok(result)
    }
}

impl std::fmt::Debug for BatchUpdate<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUpdate")
            .field("project", &self.project)
            .field("ops", &self.slots.len())
            .finish_non_exhaustive()
    }
}

/// Changes in order of first appearance.
fn change_order(slots: &[Slot]) -> Vec<ChangeId> {
    let mut order = Vec::new();
    for id in slots.iter().filter_map(Slot::change_id) {
        if !order.contains(&id) {
            order.push(id);
        }
    }
    order
}

/// Run phase 2 for one change and stage its metadata ref update.
fn update_change(
    env: Env<'_>,
    view: &mut RepoView,
    slots: &mut [Slot],
    id: ChangeId,
) -> Result<(ChangeResult, Option<ChangeNotes>)> {
    let insert = slots
        .iter()
        .position(|s| matches!(s, Slot::Insert(cid, _) if *cid == id));
    let mut order: Vec<usize> = insert.into_iter().collect();
    order.extend(
        slots
            .iter()
            .enumerate()
            .filter(|(i, s)| Some(*i) != insert && s.change_id() == Some(id))
            .map(|(i, _)| i),
    );

    let mut notes = match insert.map(|index| &mut slots[index]) {
        Some(Slot::Insert(_, op)) => {
            if env.repo.exact_ref(&id.meta_ref())?.is_some() {
                return Err(Error::Conflict(format!("change {id} already exists")));
            }
            ChangeNotes::new(op.create_change(&env)?)
        }
        _ => ChangeNotes::load_required(env.repo, id)?,
    };

    let mut updates = Vec::new();
    let mut deleted = false;
    let mut dirty = false;
    for index in order {
        let checkpoint = (notes.clone(), updates.clone(), deleted);
        let changed = slots[index].update_change(&mut ChangeContext {
            env,
            view: &*view,
            notes: &mut notes,
            updates: &mut updates,
            deleted: &mut deleted,
        })?;
        if changed {
            dirty = true;
        } else {
            (notes, updates, deleted) = checkpoint;
        }
    }

    if !dirty {
        debug!("no op changed the change, skipping");
        return Ok((ChangeResult::Skipped, None));
    }

    let meta_ref = id.meta_ref();
    if deleted {
        if let Some(old) = notes.meta_id() {
            view.stage(RefUpdate::delete(meta_ref, old))?;
        }
        return Ok((ChangeResult::Deleted, None));
    }

    let meta = notes::write_meta_commit(
        env.repo,
        &notes,
        &updates,
        &env.user_ident(),
        &env.server_ident(),
    )?;
    view.stage(RefUpdate {
        name: meta_ref,
        old: notes.meta_id(),
        new: Some(meta),
    })?;
    notes.set_meta_id(meta);
    Ok((ChangeResult::Upserted, Some(notes)))
}
