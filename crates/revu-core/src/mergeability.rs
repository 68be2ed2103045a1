//! Submit-time mergeability prediction.
//!
//! A dry run of submission: would `commit` combine cleanly into the current
//! destination tip under the project's submit type? Results are cached by
//! content (commit, destination tip, submit type, strategy) and fail closed.

use std::fmt;
use std::str::FromStr;

use revu_git::{MergeStrategy, Oid, Repository, ThreeWayMerger};
use tracing::{debug, warn};

use crate::cache::codec::{self, CacheCodec, Reader};
use crate::cache::{CacheDef, PersistentCache};
use crate::error::{Error, Result};

/// How a change is integrated on submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubmitType {
    FastForwardOnly,
    #[default]
    MergeIfNecessary,
    MergeAlways,
    RebaseIfNecessary,
    RebaseAlways,
    CherryPick,
}

impl SubmitType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FastForwardOnly => "FAST_FORWARD_ONLY",
            Self::MergeIfNecessary => "MERGE_IF_NECESSARY",
            Self::MergeAlways => "MERGE_ALWAYS",
            Self::RebaseIfNecessary => "REBASE_IF_NECESSARY",
            Self::RebaseAlways => "REBASE_ALWAYS",
            Self::CherryPick => "CHERRY_PICK",
        }
    }
}

impl fmt::Display for SubmitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmitType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.to_ascii_uppercase().replace('-', "_");
        [
            Self::FastForwardOnly,
            Self::MergeIfNecessary,
            Self::MergeAlways,
            Self::RebaseIfNecessary,
            Self::RebaseAlways,
            Self::CherryPick,
        ]
        .into_iter()
        .find(|t| t.as_str() == normalized)
        .ok_or_else(|| Error::BadRequest(format!("unknown submit type: {s}")))
    }
}

/// Cache key. `dest` is the zero id for an unborn branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeabilityKey {
    pub commit: Oid,
    pub dest: Oid,
    pub submit_type: SubmitType,
    pub strategy: String,
}

impl CacheCodec for MergeabilityKey {
    fn encode(&self, out: &mut Vec<u8>) {
        codec::put_oid(out, self.commit);
        codec::put_oid(out, self.dest);
        codec::put_str(out, self.submit_type.as_str());
        codec::put_str(out, &self.strategy);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            commit: reader.oid()?,
            dest: reader.oid()?,
            submit_type: reader
                .string()?
                .parse()
                .map_err(|e: Error| Error::CacheCodec(e.to_string()))?,
            strategy: reader.string()?,
        })
    }
}

pub const CACHE_DEF: CacheDef<MergeabilityKey, bool> = CacheDef {
    name: "mergeability",
    version: 1,
    max_weight: 1 << 20,
    weigher: weigh,
};

fn weigh(key: &MergeabilityKey, _: &bool) -> u64 {
    40 + key.submit_type.as_str().len() as u64 + key.strategy.len() as u64 + 1
}

/// Shared mergeability cache.
#[derive(Debug)]
pub struct MergeabilityCache {
    cache: PersistentCache<MergeabilityKey, bool>,
    max_object_size: Option<u64>,
}

impl MergeabilityCache {
    #[must_use]
    pub const fn new(
        cache: PersistentCache<MergeabilityKey, bool>,
        max_object_size: Option<u64>,
    ) -> Self {
        Self {
            cache,
            max_object_size,
        }
    }

    fn key(
        commit: Oid,
        dest: Option<Oid>,
        submit_type: SubmitType,
        strategy: MergeStrategy,
    ) -> MergeabilityKey {
        MergeabilityKey {
            commit,
            dest: dest.unwrap_or_else(Oid::zero),
            submit_type,
            strategy: strategy.name().to_string(),
        }
    }

    /// Whether `commit` can be submitted onto `dest` (the branch tip, or
    /// `None` if the branch does not exist yet). Errors count as "no" and
    /// are not cached.
    pub fn get(
        &self,
        repo: &Repository,
        commit: Oid,
        dest: Option<Oid>,
        submit_type: SubmitType,
        strategy: MergeStrategy,
    ) -> bool {
        let Some(tip) = dest.filter(|d| !d.is_zero()) else {
            return true;
        };
        let key = Self::key(commit, dest, submit_type, strategy);
        let loaded = self.cache.get_or_load(&key, |_| {
            let mergeable =
                dry_run(repo, commit, tip, submit_type, strategy, self.max_object_size)?;
            debug!(%commit, dest = %tip, %submit_type, mergeable, "computed mergeability");
            Ok(mergeable)
        });
        loaded.unwrap_or_else(|e| {
            warn!(
                %commit,
                dest = %tip,
                error = %e,
                "mergeability check failed, assuming not mergeable"
            );
            false
        })
    }

    /// Cached answer without computing one.
    #[must_use]
    pub fn peek(
        &self,
        commit: Oid,
        dest: Option<Oid>,
        submit_type: SubmitType,
        strategy: MergeStrategy,
    ) -> Option<bool> {
        if dest.is_none_or(|d| d.is_zero()) {
            return Some(true);
        }
        self.cache
            .peek(&Self::key(commit, dest, submit_type, strategy))
    }

    /// Persist entries.
    ///
    /// # Errors
    /// Returns error if the cache file cannot be written.
    pub fn flush(&self) -> Result<()> {
        self.cache.flush()
    }
}

/// Simulate submitting `commit` onto `dest`.
///
/// Everything reachable from `dest` counts as accepted. The rebase types
/// replay every unaccepted ancestor along with the commit, so they are
/// tested as a merge from the merge base rather than a cherry-pick of the
/// tip alone, which would conflict with edits its predecessors make. When
/// the parent is already accepted the two are the same delta.
///
/// # Errors
/// Returns error if objects are missing or a merge fails.
pub fn dry_run(
    repo: &Repository,
    commit: Oid,
    dest: Oid,
    submit_type: SubmitType,
    strategy: MergeStrategy,
    max_object_size: Option<u64>,
) -> Result<bool> {
    let info = repo.commit_info(commit)?;

    // Already merged into the branch.
    if repo.is_ancestor(commit, dest)? {
        return Ok(true);
    }

    let owned;
    let scratch = if repo.is_in_memory() {
        repo
    } else {
        owned = repo.in_memory()?;
        &owned
    };
    let merger = ThreeWayMerger::new(scratch, strategy).with_max_object_size(max_object_size);

    let can_fast_forward = repo.is_ancestor(dest, commit)?;
    let can_merge = || -> Result<bool> {
        let base = scratch.merge_base(dest, commit)?;
        Ok(merger.merge(base, dest, commit)?.clean_tree().is_some())
    };
    let can_cherry_pick = || -> Result<bool> {
        match info.parents.as_slice() {
            [] => Ok(false),
            [parent] => Ok(merger
                .merge(Some(*parent), dest, commit)?
                .clean_tree()
                .is_some()),
            // Merge commits are never cherry-picked; treat as merge-if-necessary.
            _ => Ok(can_fast_forward || can_merge()?),
        }
    };
    let can_rebase = || -> Result<bool> {
        match info.parents.as_slice() {
            [] => Ok(false),
            [_] => can_merge(),
            _ => Ok(can_fast_forward || can_merge()?),
        }
    };

    match submit_type {
        SubmitType::FastForwardOnly => Ok(can_fast_forward),
        SubmitType::MergeIfNecessary => Ok(can_fast_forward || can_merge()?),
        SubmitType::MergeAlways => can_merge(),
        SubmitType::RebaseIfNecessary => Ok(can_fast_forward || can_rebase()?),
        SubmitType::RebaseAlways => can_rebase(),
        SubmitType::CherryPick => can_cherry_pick(),
    }
}
