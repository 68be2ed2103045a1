//! Ref view that includes updates staged earlier in the same batch.

use std::collections::BTreeMap;

use revu_git::{Oid, RefUpdate, Repository};

use crate::error::Result;

/// Staged ref updates layered over the repository's refs.
#[derive(Debug, Default)]
pub struct RepoView {
    pending: Vec<RefUpdate>,
}

impl RepoView {
    /// Updates staged so far, in staging order.
    #[must_use]
    pub fn pending(&self) -> &[RefUpdate] {
        &self.pending
    }

    fn staged(&self, name: &str) -> Option<&RefUpdate> {
        self.pending.iter().find(|u| u.name == name)
    }

    /// Value of `name` after the staged updates apply.
    ///
    /// # Errors
    /// Returns error if the ref cannot be read.
    pub fn get_ref(&self, repo: &Repository, name: &str) -> Result<Option<Oid>> {
        match self.staged(name) {
            Some(update) => Ok(update.new),
            None => Ok(repo.exact_ref(name)?),
        }
    }

    /// Refs under `prefix` after the staged updates apply.
    ///
    /// # Errors
    /// Returns error if refs cannot be listed.
    pub fn refs_by_prefix(&self, repo: &Repository, prefix: &str) -> Result<BTreeMap<String, Oid>> {
        let mut refs = repo.refs_by_prefix(prefix)?;
        for update in self.pending.iter().filter(|u| u.name.starts_with(prefix)) {
            match update.new {
                Some(new) => refs.insert(update.name.clone(), new),
                None => refs.remove(&update.name),
            };
        }
        Ok(refs)
    }

    /// Stage an update. Each ref may be staged once per batch.
    pub(crate) fn stage(&mut self, update: RefUpdate) -> Result<()> {
        if self.staged(&update.name).is_some() {
            return Err(revu_git::Error::DuplicateRefUpdate(update.name).into());
        }
        self.pending.push(update);
        Ok(())
    }

    pub(crate) fn into_updates(self) -> Vec<RefUpdate> {
        self.pending
    }
}
