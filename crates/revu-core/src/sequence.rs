//! Change number allocation.
//!
//! The next free change number is kept as a decimal blob referenced by
//! `refs/sequences/changes` and advanced with compare-and-swap.

use revu_git::{PersonIdent, RefUpdate, Repository};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::ChangeId;

pub const CHANGES_SEQUENCE: &str = "refs/sequences/changes";

const FIRST_CHANGE_ID: u32 = 1;
const MAX_ATTEMPTS: u32 = 10;

/// Allocator for site-unique change numbers.
#[derive(Debug)]
pub struct Sequences<'r> {
    repo: &'r Repository,
    committer: PersonIdent,
}

impl<'r> Sequences<'r> {
    #[must_use]
    pub const fn new(repo: &'r Repository, committer: PersonIdent) -> Self {
        Self { repo, committer }
    }

    /// The number the next allocation would return.
    ///
    /// # Errors
    /// Returns error if the stored value is not a number.
    pub fn peek(&self) -> Result<u32> {
        Ok(self.read()?.1)
    }

    fn read(&self) -> Result<(Option<revu_git::Oid>, u32)> {
        let Some(blob) = self.repo.exact_ref(CHANGES_SEQUENCE)? else {
            return Ok((None, FIRST_CHANGE_ID));
        };
        let raw = self.repo.read_blob(blob)?;
        let text = String::from_utf8_lossy(&raw);
        let next = text.trim().parse::<u32>().map_err(|_| {
            Error::Io(std::io::Error::other(format!(
                "{CHANGES_SEQUENCE} holds invalid value {text:?}"
            )))
        })?;
        Ok((Some(blob), next))
    }

    /// Allocate the next change number.
    ///
    /// # Errors
    /// Returns `RetryExhausted` if the sequence ref keeps moving.
    pub fn next_change_id(&self) -> Result<ChangeId> {
        let mut last = None;
        for _ in 0..MAX_ATTEMPTS {
            let (old, next) = self.read()?;
            let blob = self.repo.write_blob(format!("{}", next + 1).as_bytes())?;
            let mut tx = self
                .repo
                .ref_transaction()
                .with_message("revu: allocate change number");
            tx.add(RefUpdate {
                name: CHANGES_SEQUENCE.to_string(),
                old,
                new: Some(blob),
            })?;
            match tx.commit(&self.committer) {
                Ok(_) => {
                    debug!(change = next, "allocated change number");
                    return Ok(ChangeId(next));
                }
                Err(e) if e.is_lock_failure() => last = Some(Error::from(e)),
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::RetryExhausted {
            attempts: MAX_ATTEMPTS,
            last: Box::new(
                last.unwrap_or_else(|| Error::Conflict("sequence contention".into())),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use tempfile::TempDir;

    #[test]
    fn test_allocates_increasing_ids() {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init_bare(temp.path().join("p.git")).unwrap();
        let ident = PersonIdent::new("S", "s@x", DateTime::from_timestamp(0, 0).unwrap());
        let seq = Sequences::new(&repo, ident);

        assert_eq!(seq.peek().unwrap(), 1);
        assert_eq!(seq.next_change_id().unwrap(), ChangeId(1));
        assert_eq!(seq.next_change_id().unwrap(), ChangeId(2));
        assert_eq!(seq.peek().unwrap(), 3);
    }
}
