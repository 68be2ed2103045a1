//! Three-way merge strategies and conflict-marker tree synthesis.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use git2::{Index, IndexConflict, IndexEntry, IndexTime, MergeFileOptions, MergeOptions, Oid};
use tracing::debug;

use crate::error::{Error, Result};
use crate::repository::Repository;

/// Named merge strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MergeStrategy {
    /// Content merge with rename detection.
    #[default]
    Recursive,
    /// Content merge without rename detection.
    Resolve,
    /// Always take our tree.
    Ours,
    /// Always take their tree.
    Theirs,
}

impl MergeStrategy {
    /// Canonical lower-case name, as used in cache keys and configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Recursive => "recursive",
            Self::Resolve => "resolve",
            Self::Ours => "ours",
            Self::Theirs => "theirs",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "resolve" => Ok(Self::Resolve),
            "ours" => Ok(Self::Ours),
            "theirs" => Ok(Self::Theirs),
            _ => Err(Error::UnknownMergeStrategy(s.to_string())),
        }
    }
}

/// Result of a three-way merge.
pub enum MergeOutcome {
    /// The merge was clean; the tree has been written.
    Clean(Oid),
    /// At least one path could not be merged.
    Conflicted(ConflictedMerge),
}

impl MergeOutcome {
    /// The clean tree, if any.
    #[must_use]
    pub const fn clean_tree(&self) -> Option<Oid> {
        match self {
            Self::Clean(tree) => Some(*tree),
            Self::Conflicted(_) => None,
        }
    }
}

impl fmt::Debug for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean(tree) => f.debug_tuple("Clean").field(tree).finish(),
            Self::Conflicted(c) => f.debug_tuple("Conflicted").field(&c.unmerged_paths).finish(),
        }
    }
}

/// Labels printed on conflict markers.
#[derive(Debug, Clone, Copy)]
pub struct MarkerLabels<'a> {
    pub ours: &'a str,
    pub theirs: &'a str,
    pub base: &'a str,
}

/// Tree with conflict markers embedded into the conflicting files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedTree {
    pub tree: Oid,
    pub files_with_markers: BTreeSet<String>,
}

/// A merge that left unmerged paths in its index.
pub struct ConflictedMerge {
    index: Index,
    unmerged_paths: Vec<String>,
}

impl ConflictedMerge {
    /// Sorted, de-duplicated list of paths that failed to merge.
    #[must_use]
    pub fn unmerged_paths(&self) -> &[String] {
        &self.unmerged_paths
    }

    /// Resolve every conflict by embedding markers and write the tree.
    ///
    /// Paths present on both sides get a textual merge with markers; paths
    /// deleted on one side keep the surviving content.
    ///
    /// # Errors
    /// Returns error if blobs or the tree cannot be written.
    pub fn write_tree_with_markers(
        mut self,
        repo: &Repository,
        labels: MarkerLabels<'_>,
        diff3: bool,
    ) -> Result<MarkedTree> {
        let conflicts = self
            .index
            .conflicts()?
            .collect::<std::result::Result<Vec<IndexConflict>, git2::Error>>()?;
        let mut files_with_markers = BTreeSet::new();

        for conflict in conflicts {
            let Some(path) = conflict_path(&conflict) else {
                continue;
            };
            self.index.conflict_remove(Path::new(&path))?;

            match (&conflict.ancestor, &conflict.our, &conflict.their) {
                (ancestor, Some(ours), Some(theirs)) => {
                    let content =
                        merge_with_markers(repo, ancestor.as_ref(), ours, theirs, labels, diff3)?;
                    let blob = repo.write_blob(&content)?;
                    self.index
                        .add(&stage0_entry(&path, ours.mode, blob, content.len()))?;
                    files_with_markers.insert(path);
                }
                (_, Some(side), None) | (_, None, Some(side)) => {
                    self.index.add(&stage0_entry(
                        &path,
                        side.mode,
                        side.id,
                        side.file_size as usize,
                    ))?;
                }
                (_, None, None) => {}
            }
        }

        let tree = self.index.write_tree_to(repo.inner())?;
        debug!(%tree, files = files_with_markers.len(), "wrote tree with conflict markers");
        Ok(MarkedTree {
            tree,
            files_with_markers,
        })
    }
}

fn conflict_path(conflict: &IndexConflict) -> Option<String> {
    conflict
        .our
        .as_ref()
        .or(conflict.their.as_ref())
        .or(conflict.ancestor.as_ref())
        .map(|e| String::from_utf8_lossy(&e.path).into_owned())
}

fn stage0_entry(path: &str, mode: u32, id: Oid, size: usize) -> IndexEntry {
    let path = path.as_bytes().to_vec();
    #[allow(clippy::cast_possible_truncation)]
    let flags = path.len().min(0xfff) as u16;
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode,
        uid: 0,
        gid: 0,
        file_size: u32::try_from(size).unwrap_or(u32::MAX),
        id,
        flags,
        flags_extended: 0,
        path,
    }
}

fn merge_with_markers(
    repo: &Repository,
    ancestor: Option<&IndexEntry>,
    ours: &IndexEntry,
    theirs: &IndexEntry,
    labels: MarkerLabels<'_>,
    diff3: bool,
) -> Result<Vec<u8>> {
    // Add/add conflicts have no ancestor; merge against an empty file.
    let empty;
    let ancestor = match ancestor {
        Some(entry) => entry,
        None => {
            let blob = repo.write_blob(&[])?;
            empty = stage0_entry(&String::from_utf8_lossy(&ours.path), ours.mode, blob, 0);
            &empty
        }
    };

    let mut opts = MergeFileOptions::new();
    opts.our_label(labels.ours)
        .their_label(labels.theirs)
        .ancestor_label(labels.base);
    if diff3 {
        opts.style_diff3(true);
    }

    match repo
        .inner()
        .merge_file_from_index(ancestor, ours, theirs, Some(&mut opts))
    {
        Ok(result) => Ok(result.content().to_vec()),
        Err(e) => {
            // Binary content cannot carry markers; keep our side.
            debug!(error = %e, "textual merge failed, keeping our content");
            repo.read_blob(ours.id)
        }
    }
}

/// Three-way merger bound to one repository handle.
///
/// Use an in-memory handle (see [`Repository::in_memory`]) for speculative
/// merges so that no result touches durable storage.
#[derive(Debug)]
pub struct ThreeWayMerger<'r> {
    repo: &'r Repository,
    strategy: MergeStrategy,
    max_object_size: Option<u64>,
}

impl<'r> ThreeWayMerger<'r> {
    #[must_use]
    pub const fn new(repo: &'r Repository, strategy: MergeStrategy) -> Self {
        Self {
            repo,
            strategy,
            max_object_size: None,
        }
    }

    /// Refuse to merge blobs larger than `limit` bytes.
    #[must_use]
    pub const fn with_max_object_size(mut self, limit: Option<u64>) -> Self {
        self.max_object_size = limit;
        self
    }

    #[must_use]
    pub const fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Merge commit `theirs` into commit `ours` using `base` as the merge
    /// base. A missing base merges against the empty tree.
    ///
    /// # Errors
    /// Returns `ObjectTooLarge` if a blob that needs a content merge exceeds
    /// the size limit, or a git error if objects are missing.
    pub fn merge(&self, base: Option<Oid>, ours: Oid, theirs: Oid) -> Result<MergeOutcome> {
        let ours_tree = self.repo.find_commit(ours)?.tree()?;
        let theirs_tree = self.repo.find_commit(theirs)?.tree()?;
        match self.strategy {
            MergeStrategy::Ours => return Ok(MergeOutcome::Clean(ours_tree.id())),
            MergeStrategy::Theirs => return Ok(MergeOutcome::Clean(theirs_tree.id())),
            MergeStrategy::Recursive | MergeStrategy::Resolve => {}
        }

        let base_tree = match base {
            Some(oid) => self.repo.find_commit(oid)?.tree()?,
            None => {
                let empty = self.repo.empty_tree()?;
                self.repo.inner().find_tree(empty)?
            }
        };

        if let Some(limit) = self.max_object_size {
            self.check_object_sizes(&base_tree, &ours_tree, &theirs_tree, limit)?;
        }

        let mut opts = MergeOptions::new();
        opts.find_renames(self.strategy == MergeStrategy::Recursive);
        let mut index = self
            .repo
            .inner()
            .merge_trees(&base_tree, &ours_tree, &theirs_tree, Some(&opts))?;

        if !index.has_conflicts() {
            let tree = index.write_tree_to(self.repo.inner())?;
            return Ok(MergeOutcome::Clean(tree));
        }

        let mut unmerged: BTreeSet<String> = BTreeSet::new();
        for conflict in index.conflicts()? {
            if let Some(path) = conflict_path(&conflict?) {
                unmerged.insert(path);
            }
        }
        debug!(paths = unmerged.len(), strategy = %self.strategy, "merge has conflicts");
        Ok(MergeOutcome::Conflicted(ConflictedMerge {
            index,
            unmerged_paths: unmerged.into_iter().collect(),
        }))
    }

    /// Paths modified on both sides need a content merge; their blobs must
    /// fit under the limit.
    fn check_object_sizes(
        &self,
        base: &git2::Tree<'_>,
        ours: &git2::Tree<'_>,
        theirs: &git2::Tree<'_>,
        limit: u64,
    ) -> Result<()> {
        let inner = self.repo.inner();
        let ours_diff = inner.diff_tree_to_tree(Some(base), Some(ours), None)?;
        let theirs_diff = inner.diff_tree_to_tree(Some(base), Some(theirs), None)?;

        let mut ours_changed = BTreeSet::new();
        for delta in ours_diff.deltas() {
            if let Some(path) = delta.new_file().path() {
                ours_changed.insert(path.to_path_buf());
            }
        }

        for delta in theirs_diff.deltas() {
            let Some(path) = delta.new_file().path() else {
                continue;
            };
            if !ours_changed.contains(path) {
                continue;
            }
            for oid in [delta.old_file().id(), delta.new_file().id()] {
                if oid.is_zero() {
                    continue;
                }
                let size = self.repo.object_size(oid)?;
                if size as u64 > limit {
                    return Err(Error::ObjectTooLarge {
                        oid: oid.to_string(),
                        size,
                        limit,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{NewCommit, PersonIdent};
    use chrono::DateTime;
    use tempfile::TempDir;

    fn ident() -> PersonIdent {
        PersonIdent::new(
            "Test User",
            "test@example.com",
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        )
    }

    fn commit(repo: &Repository, parents: &[Oid], files: &[(&str, &[u8])]) -> Oid {
        let tree = repo.write_flat_tree(files).unwrap();
        let who = ident();
        repo.write_commit(&NewCommit {
            tree,
            parents,
            author: &who,
            committer: &who,
            message: "commit\n",
        })
        .unwrap()
    }

    fn init() -> (TempDir, Repository) {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init_bare(temp.path().join("p.git")).unwrap();
        (temp, repo)
    }

    const LABELS: MarkerLabels<'static> = MarkerLabels {
        ours: "BASE",
        theirs: "PATCH SET",
        base: "ANCESTOR",
    };

    #[test]
    fn test_strategy_names() {
        for s in [
            MergeStrategy::Recursive,
            MergeStrategy::Resolve,
            MergeStrategy::Ours,
            MergeStrategy::Theirs,
        ] {
            assert_eq!(s.name().parse::<MergeStrategy>().unwrap(), s);
        }
        assert!("octopus".parse::<MergeStrategy>().is_err());
    }

    #[test]
    fn test_clean_merge_of_disjoint_files() {
        let (_temp, repo) = init();
        let base = commit(&repo, &[], &[("a", b"a\n"), ("b", b"b\n")]);
        let ours = commit(&repo, &[base], &[("a", b"a2\n"), ("b", b"b\n")]);
        let theirs = commit(&repo, &[base], &[("a", b"a\n"), ("b", b"b2\n")]);

        let merger = ThreeWayMerger::new(&repo, MergeStrategy::Recursive);
        let tree = merger
            .merge(Some(base), ours, theirs)
            .unwrap()
            .clean_tree()
            .unwrap();
        assert_eq!(repo.read_path(tree, "a").unwrap().unwrap(), b"a2\n");
        assert_eq!(repo.read_path(tree, "b").unwrap().unwrap(), b"b2\n");
    }

    #[test]
    fn test_conflict_reports_paths_and_writes_markers() {
        let (_temp, repo) = init();
        let base = commit(&repo, &[], &[("a", b"line\n"), ("z", b"same\n")]);
        let ours = commit(&repo, &[base], &[("a", b"ours\n"), ("z", b"same\n")]);
        let theirs = commit(&repo, &[base], &[("a", b"theirs\n"), ("z", b"same\n")]);

        let merger = ThreeWayMerger::new(&repo, MergeStrategy::Recursive);
        let MergeOutcome::Conflicted(conflicted) = merger.merge(Some(base), ours, theirs).unwrap()
        else {
            panic!("expected conflict");
        };
        assert_eq!(conflicted.unmerged_paths(), ["a".to_string()]);

        let marked = conflicted
            .write_tree_with_markers(&repo, LABELS, false)
            .unwrap();
        assert_eq!(
            marked.files_with_markers.iter().collect::<Vec<_>>(),
            vec!["a"]
        );
        let raw = repo.read_path(marked.tree, "a").unwrap().unwrap();
        let content = String::from_utf8(raw).unwrap();
        assert!(content.contains("<<<<<<< BASE"));
        assert!(content.contains(">>>>>>> PATCH SET"));
        assert!(content.contains("ours\n"));
        assert!(content.contains("theirs\n"));
        assert_eq!(repo.read_path(marked.tree, "z").unwrap().unwrap(), b"same\n");
    }

    #[test]
    fn test_diff3_markers_include_ancestor() {
        let (_temp, repo) = init();
        let base = commit(&repo, &[], &[("a", b"line\n")]);
        let ours = commit(&repo, &[base], &[("a", b"ours\n")]);
        let theirs = commit(&repo, &[base], &[("a", b"theirs\n")]);

        let merger = ThreeWayMerger::new(&repo, MergeStrategy::Recursive);
        let MergeOutcome::Conflicted(conflicted) = merger.merge(Some(base), ours, theirs).unwrap()
        else {
            panic!("expected conflict");
        };
        let marked = conflicted.write_tree_with_markers(&repo, LABELS, true).unwrap();
        let raw = repo.read_path(marked.tree, "a").unwrap().unwrap();
        let content = String::from_utf8(raw).unwrap();
        assert!(content.contains("||||||| ANCESTOR"));
        assert!(content.contains("line\n"));
    }

    #[test]
    fn test_add_add_conflict_gets_markers() {
        let (_temp, repo) = init();
        let base = commit(&repo, &[], &[("z", b"same\n")]);
        let ours = commit(&repo, &[base], &[("new", b"ours\n"), ("z", b"same\n")]);
        let theirs = commit(&repo, &[base], &[("new", b"theirs\n"), ("z", b"same\n")]);

        let merger = ThreeWayMerger::new(&repo, MergeStrategy::Recursive);
        let MergeOutcome::Conflicted(conflicted) = merger.merge(Some(base), ours, theirs).unwrap()
        else {
            panic!("expected conflict");
        };
        assert_eq!(conflicted.unmerged_paths(), ["new".to_string()]);
        let marked = conflicted.write_tree_with_markers(&repo, LABELS, false).unwrap();
        let raw = repo.read_path(marked.tree, "new").unwrap().unwrap();
        let content = String::from_utf8(raw).unwrap();
        assert!(content.contains("<<<<<<< BASE"));
        assert!(content.contains("ours\n"));
        assert!(content.contains("theirs\n"));
    }

    #[test]
    fn test_modify_delete_keeps_surviving_side() {
        let (_temp, repo) = init();
        let base = commit(&repo, &[], &[("a", b"a\n"), ("keep", b"k\n")]);
        let ours = commit(&repo, &[base], &[("keep", b"k\n")]);
        let theirs = commit(&repo, &[base], &[("a", b"changed\n"), ("keep", b"k\n")]);

        let merger = ThreeWayMerger::new(&repo, MergeStrategy::Recursive);
        let MergeOutcome::Conflicted(conflicted) = merger.merge(Some(base), ours, theirs).unwrap()
        else {
            panic!("expected conflict");
        };
        let marked = conflicted
            .write_tree_with_markers(&repo, LABELS, false)
            .unwrap();
        assert!(marked.files_with_markers.is_empty());
        assert_eq!(repo.read_path(marked.tree, "a").unwrap().unwrap(), b"changed\n");
    }

    #[test]
    fn test_ours_and_theirs_strategies() {
        let (_temp, repo) = init();
        let base = commit(&repo, &[], &[("a", b"1\n")]);
        let ours = commit(&repo, &[base], &[("a", b"2\n")]);
        let theirs = commit(&repo, &[base], &[("a", b"3\n")]);

        let ours_tree = repo.commit_info(ours).unwrap().tree;
        let theirs_tree = repo.commit_info(theirs).unwrap().tree;
        let o = ThreeWayMerger::new(&repo, MergeStrategy::Ours)
            .merge(Some(base), ours, theirs)
            .unwrap();
        let t = ThreeWayMerger::new(&repo, MergeStrategy::Theirs)
            .merge(Some(base), ours, theirs)
            .unwrap();
        assert_eq!(o.clean_tree(), Some(ours_tree));
        assert_eq!(t.clean_tree(), Some(theirs_tree));
    }

    #[test]
    fn test_object_size_limit() {
        let (_temp, repo) = init();
        let big = vec![b'x'; 64];
        let base = commit(&repo, &[], &[("a", &big)]);
        let ours = commit(&repo, &[base], &[("a", b"small\n")]);
        let theirs = commit(&repo, &[base], &[("a", b"other\n")]);

        let merger =
            ThreeWayMerger::new(&repo, MergeStrategy::Recursive).with_max_object_size(Some(16));
        assert!(matches!(
            merger.merge(Some(base), ours, theirs),
            Err(Error::ObjectTooLarge { .. })
        ));
    }

    #[test]
    fn test_speculative_merge_leaves_no_objects() {
        let (_temp, repo) = init();
        let base = commit(&repo, &[], &[("a", b"a\n"), ("b", b"b\n")]);
        let ours = commit(&repo, &[base], &[("a", b"a2\n"), ("b", b"b\n")]);
        let theirs = commit(&repo, &[base], &[("a", b"a\n"), ("b", b"b2\n")]);

        let tree = {
            let scratch = repo.in_memory().unwrap();
            ThreeWayMerger::new(&scratch, MergeStrategy::Recursive)
                .merge(Some(base), ours, theirs)
                .unwrap()
                .clean_tree()
                .unwrap()
        };
        assert!(repo.inner().find_tree(tree).is_err());
    }
}
