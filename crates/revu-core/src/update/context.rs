//! Per-phase handles passed to ops.

use std::collections::BTreeMap;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use revu_git::{Oid, PersonIdent, RefUpdate, Repository};

use crate::error::Result;
use crate::events::ChangeEvent;
use crate::model::{AccountId, Change, ChangeId, CurrentUser, PatchSetId, Project};
use crate::notes::{ChangeNotes, ChangeUpdate, ChangeUpdater};
use crate::notify::{EmailJob, NotifyHandling};
use crate::permission::ChangePermission;
use crate::services::Services;

use super::batch::BatchResult;
use super::view::RepoView;

/// What every phase can see: repository, services, project, acting user and
/// the batch timestamp.
#[derive(Debug, Clone, Copy)]
pub struct Env<'a> {
    pub(super) repo: &'a Repository,
    pub(super) services: &'a Services,
    pub(super) project: &'a Project,
    pub(super) user: &'a CurrentUser,
    pub(super) when: DateTime<Utc>,
    pub(super) notify: NotifyHandling,
}

impl<'a> Env<'a> {
    #[must_use]
    pub const fn repo(&self) -> &'a Repository {
        self.repo
    }

    #[must_use]
    pub const fn services(&self) -> &'a Services {
        self.services
    }

    #[must_use]
    pub const fn project(&self) -> &'a Project {
        self.project
    }

    #[must_use]
    pub const fn user(&self) -> &'a CurrentUser {
        self.user
    }

    #[must_use]
    pub const fn account_id(&self) -> Option<AccountId> {
        self.user.account_id()
    }

    #[must_use]
    pub const fn when(&self) -> DateTime<Utc> {
        self.when
    }

    #[must_use]
    pub const fn notify(&self) -> NotifyHandling {
        self.notify
    }

    /// Identity of the server at the batch timestamp.
    #[must_use]
    pub fn server_ident(&self) -> PersonIdent {
        self.services.server_ident(self.when)
    }

    /// Identity of the acting user; the server's for the internal user.
    #[must_use]
    pub fn user_ident(&self) -> PersonIdent {
        match self.user {
            CurrentUser::Identified(account) => account.ident(self.when),
            CurrentUser::Internal => self.server_ident(),
        }
    }

    /// Check that the acting user may do `perm` on `change`.
    ///
    /// # Errors
    /// Returns `AuthDenied` from the permission backend.
    pub fn check(&self, change: &Change, perm: &ChangePermission) -> Result<()> {
        self.services.permissions.check(self.user, change, perm)
    }
}

/// Phase 1 handle: stage ref updates.
#[derive(Debug)]
pub struct RepoContext<'a> {
    pub(super) env: Env<'a>,
    pub(super) view: &'a mut RepoView,
}

impl<'a> Deref for RepoContext<'a> {
    type Target = Env<'a>;

    fn deref(&self) -> &Env<'a> {
        &self.env
    }
}

impl RepoContext<'_> {
    /// Ref value including updates staged earlier in this batch.
    ///
    /// # Errors
    /// Returns error if the ref cannot be read.
    pub fn get_ref(&self, name: &str) -> Result<Option<Oid>> {
        self.view.get_ref(self.env.repo, name)
    }

    /// Refs under `prefix` including staged updates.
    ///
    /// # Errors
    /// Returns error if refs cannot be listed.
    pub fn refs_by_prefix(&self, prefix: &str) -> Result<BTreeMap<String, Oid>> {
        self.view.refs_by_prefix(self.env.repo, prefix)
    }

    /// Stage a ref update for the batch transaction.
    ///
    /// # Errors
    /// Returns error if the ref is already staged.
    pub fn add_ref_update(&mut self, update: RefUpdate) -> Result<()> {
        self.view.stage(update)
    }

    #[must_use]
    pub fn view(&self) -> &RepoView {
        self.view
    }
}

/// Phase 2 handle: the loaded change and its pending metadata updates.
#[derive(Debug)]
pub struct ChangeContext<'a> {
    pub(super) env: Env<'a>,
    pub(super) view: &'a RepoView,
    pub(super) notes: &'a mut ChangeNotes,
    pub(super) updates: &'a mut Vec<ChangeUpdate>,
    pub(super) deleted: &'a mut bool,
}

impl<'a> Deref for ChangeContext<'a> {
    type Target = Env<'a>;

    fn deref(&self) -> &Env<'a> {
        &self.env
    }
}

impl ChangeContext<'_> {
    #[must_use]
    pub fn notes(&self) -> &ChangeNotes {
        self.notes
    }

    #[must_use]
    pub fn change(&self) -> &Change {
        &self.notes.change
    }

    /// Metadata updater for patch set `ps`. Updates for the same patch set
    /// share one delta.
    pub fn update(&mut self, ps: PatchSetId) -> ChangeUpdater<'_> {
        let index = match self.updates.iter().position(|u| u.patch_set() == ps) {
            Some(index) => index,
            None => {
                self.updates.push(ChangeUpdate::new(ps));
                self.updates.len() - 1
            }
        };
        ChangeUpdater::new(
            &mut *self.notes,
            &mut self.updates[index],
            self.env.account_id(),
            self.env.when,
        )
    }

    /// Remove the change's metadata ref when the batch commits.
    pub fn delete_change(&mut self) {
        *self.deleted = true;
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        *self.deleted
    }

    /// Ref value including updates staged in phase 1.
    ///
    /// # Errors
    /// Returns error if the ref cannot be read.
    pub fn get_ref(&self, name: &str) -> Result<Option<Oid>> {
        self.view.get_ref(self.env.repo, name)
    }
}

/// Phase 3 handle: the committed result.
#[derive(Debug)]
pub struct PostUpdateContext<'a> {
    pub(super) env: Env<'a>,
    pub(super) result: &'a BatchResult,
}

impl<'a> Deref for PostUpdateContext<'a> {
    type Target = Env<'a>;

    fn deref(&self) -> &Env<'a> {
        &self.env
    }
}

impl PostUpdateContext<'_> {
    /// Committed state of a change touched by the batch.
    #[must_use]
    pub fn notes(&self, change: ChangeId) -> Option<&ChangeNotes> {
        self.result.notes.get(&change)
    }

    #[must_use]
    pub const fn result(&self) -> &BatchResult {
        self.result
    }

    /// Deliver an event to registered listeners.
    pub fn fire(&self, event: &ChangeEvent) {
        self.env.services.events.fire(event);
    }

    /// Address `job` per the batch's notify handling and queue it.
    pub fn email(&self, job: EmailJob, notes: &ChangeNotes) {
        let interested = notes.interested_accounts();
        if let Some(job) = job.addressed(self.env.notify, notes.change.owner, &interested) {
            self.env.services.send_email(job);
        }
    }
}
