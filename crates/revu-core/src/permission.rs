//! Permission checks consulted by ops before they mutate a change.

use crate::error::{Error, Result};
use crate::model::{BranchName, Change, CurrentUser, Project};

/// Something a user may or may not do to a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangePermission {
    Abandon,
    AddPatchSet,
    AddReviewer,
    RemoveReviewer,
    EditTopic,
    ToggleWorkInProgress,
    TogglePrivate,
    Rebase,
    Vote(String),
    Submit,
    Delete,
}

impl ChangePermission {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Abandon => "abandon".into(),
            Self::AddPatchSet => "add patch set".into(),
            Self::AddReviewer => "add reviewer".into(),
            Self::RemoveReviewer => "remove reviewer".into(),
            Self::EditTopic => "edit topic".into(),
            Self::ToggleWorkInProgress => "toggle work in progress".into(),
            Self::TogglePrivate => "toggle private".into(),
            Self::Rebase => "rebase".into(),
            Self::Vote(label) => format!("vote on {label}"),
            Self::Submit => "submit".into(),
            Self::Delete => "delete".into(),
        }
    }
}

/// Authorization backend.
#[allow(clippy::missing_errors_doc)]
pub trait PermissionBackend: Send + Sync {
    /// Fail with [`Error::AuthDenied`] unless `user` may do `perm` on
    /// `change`.
    fn check(&self, user: &CurrentUser, change: &Change, perm: &ChangePermission) -> Result<()>;

    /// Fail unless `user` may upload a new change for `branch`.
    fn check_create(&self, user: &CurrentUser, project: &Project, branch: &BranchName)
    -> Result<()>;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionBackend for AllowAll {
    fn check(&self, _: &CurrentUser, _: &Change, _: &ChangePermission) -> Result<()> {
        Ok(())
    }

    fn check_create(&self, _: &CurrentUser, _: &Project, _: &BranchName) -> Result<()> {
        Ok(())
    }
}

/// Grants change-scoped permissions only to the change owner and the
/// internal user. Anyone may create changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOnly;

impl PermissionBackend for OwnerOnly {
    fn check(&self, user: &CurrentUser, change: &Change, perm: &ChangePermission) -> Result<()> {
        match user {
            CurrentUser::Internal => Ok(()),
            CurrentUser::Identified(a) if a.id == change.owner => Ok(()),
            CurrentUser::Identified(_) if matches!(perm, ChangePermission::Vote(_)) => Ok(()),
            CurrentUser::Identified(_) => Err(denied(change, perm)),
        }
    }

    fn check_create(&self, _: &CurrentUser, _: &Project, _: &BranchName) -> Result<()> {
        Ok(())
    }
}

/// The standard denial error.
#[must_use]
pub fn denied(change: &Change, perm: &ChangePermission) -> Error {
    Error::AuthDenied(format!("{} not permitted on change {}", perm.describe(), change.id))
}
