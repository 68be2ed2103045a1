//! Atomic multi-ref compare-and-swap updates.
//!
//! A [`RefTransaction`] locks every ref it touches, verifies each ref still
//! has the value the caller read, then applies all updates or none of them.

use git2::Oid;
use tracing::debug;

use crate::error::{Error, Result};
use crate::repository::{PersonIdent, Repository};

/// One staged ref update.
///
/// `old == None` means the ref must not exist; `new == None` deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    pub old: Option<Oid>,
    pub new: Option<Oid>,
}

impl RefUpdate {
    /// Create a ref that must not exist yet.
    #[must_use]
    pub fn create(name: impl Into<String>, new: Oid) -> Self {
        Self {
            name: name.into(),
            old: None,
            new: Some(new),
        }
    }

    /// Move an existing ref from `old` to `new`.
    #[must_use]
    pub fn fast_forward(name: impl Into<String>, old: Oid, new: Oid) -> Self {
        Self {
            name: name.into(),
            old: Some(old),
            new: Some(new),
        }
    }

    /// Delete a ref currently at `old`.
    #[must_use]
    pub fn delete(name: impl Into<String>, old: Oid) -> Self {
        Self {
            name: name.into(),
            old: Some(old),
            new: None,
        }
    }

    /// Whether applying this update changes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

fn describe(oid: Option<Oid>) -> String {
    oid.map_or_else(|| "(missing)".to_string(), |o| o.to_string())
}

/// A batch of ref updates applied all-or-nothing.
pub struct RefTransaction<'r> {
    repo: &'r Repository,
    updates: Vec<RefUpdate>,
    message: String,
}

impl<'r> RefTransaction<'r> {
    pub(crate) fn new(repo: &'r Repository) -> Self {
        Self {
            repo,
            updates: Vec::new(),
            message: "revu: batch update".to_string(),
        }
    }

    /// Set the reflog message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Stage an update.
    ///
    /// # Errors
    /// Returns `DuplicateRefUpdate` if the ref is already staged.
    pub fn add(&mut self, update: RefUpdate) -> Result<()> {
        if self.updates.iter().any(|u| u.name == update.name) {
            return Err(Error::DuplicateRefUpdate(update.name));
        }
        self.updates.push(update);
        Ok(())
    }

    /// Staged updates in insertion order.
    #[must_use]
    pub fn updates(&self) -> &[RefUpdate] {
        &self.updates
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Apply every staged update atomically.
    ///
    /// Every staged ref is locked and checked against its expected old
    /// value, including updates that leave the ref where it is. Only the
    /// updates that move a ref are written and returned.
    ///
    /// # Errors
    /// Returns `Locked` when another writer holds a ref lock and
    /// `LockFailure` when a ref no longer has its expected old value. In
    /// both cases no ref has moved.
    pub fn commit(self, committer: &PersonIdent) -> Result<Vec<RefUpdate>> {
        if self.repo.is_in_memory() {
            return Err(Error::Git2(git2::Error::from_str(
                "refusing to update refs through an in-memory repository",
            )));
        }
        if self.updates.is_empty() {
            return Ok(Vec::new());
        }
        let (writes, unchanged): (Vec<RefUpdate>, Vec<RefUpdate>) =
            self.updates.into_iter().partition(|u| !u.is_noop());

        let inner = self.repo.inner();
        let mut tx = inner.transaction()?;
        // Never committed; dropping it releases the locks on unchanged refs.
        let mut held = inner.transaction()?;
        for update in &writes {
            lock(&mut tx, &update.name)?;
        }
        for update in &unchanged {
            lock(&mut held, &update.name)?;
        }

        for update in writes.iter().chain(&unchanged) {
            let actual = self.repo.exact_ref(&update.name)?;
            if actual != update.old {
                return Err(Error::LockFailure {
                    refname: update.name.clone(),
                    expected: describe(update.old),
                    actual: describe(actual),
                });
            }
        }

        if !writes.is_empty() {
            let signature = committer.to_signature()?;
            for update in &writes {
                match update.new {
                    Some(target) => {
                        tx.set_target(&update.name, target, Some(&signature), &self.message)?;
                    }
                    None => tx.remove(&update.name)?,
                }
            }
            tx.commit()?;
        }
        drop(held);

        debug!(
            refs = writes.len(),
            checked = unchanged.len(),
            "ref transaction committed"
        );
        Ok(writes)
    }
}

fn lock(tx: &mut git2::Transaction<'_>, name: &str) -> Result<()> {
    tx.lock_ref(name).map_err(|e| match e.code() {
        git2::ErrorCode::Locked | git2::ErrorCode::Exists => Error::Locked(name.to_string()),
        _ => Error::Git2(e),
    })
}

impl std::fmt::Debug for RefTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefTransaction")
            .field("updates", &self.updates)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
