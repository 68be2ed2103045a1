//! Classification of a patch set transition: rework, trivial rebase or
//! metadata-only change.

use std::fmt;

use revu_git::{CommitInfo, MergeStrategy, Oid, Repository, ThreeWayMerger};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::codec::{self, CacheCodec, Reader};
use crate::cache::{CacheDef, PersistentCache};
use crate::error::{Error, Result};

/// How the next patch set relates to the prior one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// Content changed.
    Rework,
    /// Same content replayed on a new parent.
    TrivialRebase,
    /// Merge commit whose first parent moved, other parents unchanged.
    MergeFirstParentUpdate,
    /// Only the commit message (or identity) changed.
    NoCodeChange,
    /// Same tree, parents and message.
    NoChange,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rework => "REWORK",
            Self::TrivialRebase => "TRIVIAL_REBASE",
            Self::MergeFirstParentUpdate => "MERGE_FIRST_PARENT_UPDATE",
            Self::NoCodeChange => "NO_CODE_CHANGE",
            Self::NoChange => "NO_CHANGE",
        }
    }

    const fn tag(self) -> u8 {
        match self {
            Self::Rework => 0,
            Self::TrivialRebase => 1,
            Self::MergeFirstParentUpdate => 2,
            Self::NoCodeChange => 3,
            Self::NoChange => 4,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CacheCodec for ChangeKind {
    fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u8(out, self.tag());
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        match reader.u8()? {
            0 => Ok(Self::Rework),
            1 => Ok(Self::TrivialRebase),
            2 => Ok(Self::MergeFirstParentUpdate),
            3 => Ok(Self::NoCodeChange),
            4 => Ok(Self::NoChange),
            other => Err(Error::CacheCodec(format!("invalid change kind tag {other}"))),
        }
    }
}

/// Cache key: the commit pair and the merge strategy used to compare them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeKindKey {
    pub prior: Oid,
    pub next: Oid,
    pub strategy: String,
}

impl CacheCodec for ChangeKindKey {
    fn encode(&self, out: &mut Vec<u8>) {
        codec::put_oid(out, self.prior);
        codec::put_oid(out, self.next);
        codec::put_str(out, &self.strategy);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            prior: reader.oid()?,
            next: reader.oid()?,
            strategy: reader.string()?,
        })
    }
}

/// Cache definition; bump `version` when [`compute`] changes semantics.
pub const CACHE_DEF: CacheDef<ChangeKindKey, ChangeKind> = CacheDef {
    name: "change_kind",
    version: 1,
    max_weight: 1 << 20,
    weigher: weigh,
};

fn weigh(key: &ChangeKindKey, _: &ChangeKind) -> u64 {
    // Two object ids, the strategy name and the enum tag.
    40 + key.strategy.len() as u64 + 1
}

/// Shared classification cache.
#[derive(Debug)]
pub struct ChangeKindCache {
    cache: PersistentCache<ChangeKindKey, ChangeKind>,
    strategy: MergeStrategy,
    max_object_size: Option<u64>,
}

impl ChangeKindCache {
    #[must_use]
    pub const fn new(
        cache: PersistentCache<ChangeKindKey, ChangeKind>,
        strategy: MergeStrategy,
        max_object_size: Option<u64>,
    ) -> Self {
        Self {
            cache,
            strategy,
            max_object_size,
        }
    }

    /// Classify `prior -> next`. A missing prior (first patch set) is always
    /// a rework. Never fails: errors degrade to [`ChangeKind::Rework`],
    /// which is returned but not cached.
    pub fn get(&self, repo: &Repository, prior: Option<Oid>, next: Oid) -> ChangeKind {
        let Some(prior) = prior else {
            return ChangeKind::Rework;
        };
        let key = ChangeKindKey {
            prior,
            next,
            strategy: self.strategy.name().to_string(),
        };
        self.cache
            .get_or_load(&key, |k| self.compute_checked(repo, k.prior, k.next))
            .unwrap_or_else(|e| {
                warn!(%prior, %next, error = %e, "cannot classify change kind, assuming rework");
                ChangeKind::Rework
            })
    }

    /// Classify without consulting or filling the cache.
    pub fn get_uncached(&self, repo: &Repository, prior: Option<Oid>, next: Oid) -> ChangeKind {
        prior.map_or(ChangeKind::Rework, |prior| {
            self.compute_logged(repo, prior, next)
        })
    }

    /// Cached classification, if present.
    #[must_use]
    pub fn peek(&self, prior: Oid, next: Oid) -> Option<ChangeKind> {
        self.cache.peek(&ChangeKindKey {
            prior,
            next,
            strategy: self.strategy.name().to_string(),
        })
    }

    /// Persist entries.
    ///
    /// # Errors
    /// Returns error if the cache file cannot be written.
    pub fn flush(&self) -> Result<()> {
        self.cache.flush()
    }

    fn compute_checked(&self, repo: &Repository, prior: Oid, next: Oid) -> Result<ChangeKind> {
        let kind = compute(repo, prior, next, self.strategy, self.max_object_size)?;
        debug!(%prior, %next, %kind, "classified patch set transition");
        Ok(kind)
    }

    fn compute_logged(&self, repo: &Repository, prior: Oid, next: Oid) -> ChangeKind {
        self.compute_checked(repo, prior, next).unwrap_or_else(|e| {
            warn!(%prior, %next, error = %e, "cannot classify change kind, assuming rework");
            ChangeKind::Rework
        })
    }
}

/// Classify `prior -> next`.
///
/// Speculative merge results are written only to an in-memory object store.
///
/// # Errors
/// Returns error if either commit cannot be read.
pub fn compute(
    repo: &Repository,
    prior: Oid,
    next: Oid,
    strategy: MergeStrategy,
    max_object_size: Option<u64>,
) -> Result<ChangeKind> {
    if prior == next {
        return Ok(ChangeKind::NoCodeChange);
    }

    let prior_commit = repo.commit_info(prior)?;
    let next_commit = repo.commit_info(next)?;

    if prior_commit.message != next_commit.message {
        return Ok(if is_same_delta_and_tree(repo, &prior_commit, &next_commit)? {
            ChangeKind::NoCodeChange
        } else {
            ChangeKind::Rework
        });
    }

    if is_same_delta_and_tree(repo, &prior_commit, &next_commit)? {
        return Ok(ChangeKind::NoChange);
    }

    let (Some(prior_base), Some(next_base)) =
        (prior_commit.first_parent(), next_commit.first_parent())
    else {
        // Root commits cannot be rebased trivially.
        return Ok(ChangeKind::Rework);
    };

    if (prior_commit.parent_count() > 1 || next_commit.parent_count() > 1)
        && !only_first_parent_changed(&prior_commit, &next_commit)
    {
        return Ok(ChangeKind::Rework);
    }

    let owned;
    let scratch = if repo.is_in_memory() {
        repo
    } else {
        owned = repo.in_memory()?;
        &owned
    };
    let merger = ThreeWayMerger::new(scratch, strategy).with_max_object_size(max_object_size);
    match merger.merge(Some(prior_base), next_base, prior) {
        Ok(outcome) if outcome.clean_tree() == Some(next_commit.tree) => {
            Ok(if prior_commit.parent_count() == 1 {
                ChangeKind::TrivialRebase
            } else {
                ChangeKind::MergeFirstParentUpdate
            })
        }
        Ok(_) => Ok(ChangeKind::Rework),
        Err(revu_git::Error::ObjectTooLarge { oid, size, .. }) => {
            debug!(%oid, size, "object too large for trivial rebase check");
            Ok(ChangeKind::Rework)
        }
        Err(e) => Err(e.into()),
    }
}

/// Same tree, same number of parents, and pairwise identical parent trees.
fn is_same_delta_and_tree(
    repo: &Repository,
    prior: &CommitInfo,
    next: &CommitInfo,
) -> Result<bool> {
    if prior.tree != next.tree || prior.parent_count() != next.parent_count() {
        return Ok(false);
    }
    for (p, n) in prior.parents.iter().zip(&next.parents) {
        if p == n {
            continue;
        }
        let p_tree = repo.commit_info(*p)?.tree;
        let n_tree = repo.commit_info(*n)?.tree;
        if p_tree != n_tree {
            return Ok(false);
        }
    }
    Ok(true)
}

fn only_first_parent_changed(prior: &CommitInfo, next: &CommitInfo) -> bool {
    prior.parent_count() == next.parent_count()
        && prior.parents.first() != next.parents.first()
        && prior.parents[1..] == next.parents[1..]
}
