//! Commit validation run before a commit becomes a patch set.

use revu_git::CommitInfo;

use crate::error::{Error, Result};
use crate::footer;
use crate::model::{BranchName, ChangeKey, CurrentUser, Project};

/// A commit about to be stored as a patch set.
#[derive(Debug, Clone, Copy)]
pub struct CommitReceivedEvent<'a> {
    pub project: &'a Project,
    pub branch: &'a BranchName,
    pub commit: &'a CommitInfo,
    /// Key of the change the commit is uploaded to.
    pub change_key: &'a ChangeKey,
    pub user: &'a CurrentUser,
}

/// A validation hook.
pub trait CommitValidator: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Reject the commit with [`Error::Validation`].
    ///
    /// # Errors
    /// Returns error if the commit is not acceptable.
    fn validate(&self, event: &CommitReceivedEvent<'_>) -> Result<()>;
}

/// Rejects commits whose `Change-Id` footer is malformed, duplicated, or
/// names a different change.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeIdValidator;

impl CommitValidator for ChangeIdValidator {
    fn name(&self) -> &'static str {
        "change-id"
    }

    fn validate(&self, event: &CommitReceivedEvent<'_>) -> Result<()> {
        let values = footer::values(&event.commit.message, footer::CHANGE_ID);
        match values.as_slice() {
            [] => Ok(()),
            [value] => {
                let key = ChangeKey::parse(value).ok_or_else(|| {
                    Error::Validation(format!(
                        "invalid Change-Id line format in commit message footer: {value}"
                    ))
                })?;
                if &key == event.change_key {
                    Ok(())
                } else {
                    Err(Error::Validation(format!(
                        "Change-Id {key} in commit {} does not match change {}",
                        event.commit.id, event.change_key
                    )))
                }
            }
            _ => Err(Error::Validation(
                "multiple Change-Id lines in commit message footer".into(),
            )),
        }
    }
}

/// Run every validator in order, stopping at the first rejection.
///
/// # Errors
/// Returns the first validation failure.
pub fn validate_all(
    validators: &[std::sync::Arc<dyn CommitValidator>],
    event: &CommitReceivedEvent<'_>,
) -> Result<()> {
    for validator in validators {
        validator.validate(event).inspect_err(|e| {
            tracing::debug!(validator = validator.name(), error = %e, "commit rejected");
        })?;
    }
    Ok(())
}
