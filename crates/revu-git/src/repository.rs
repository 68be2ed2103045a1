//! Repository wrapper providing the object and ref primitives the core needs.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{ObjectType, Oid};

use crate::error::{Error, Result};
use crate::refs::RefTransaction;

/// Priority of the in-memory object backend. Higher than the loose (1) and
/// packed (2) backends so every write lands in memory.
const MEMPACK_PRIORITY: i32 = 1000;

/// Regular (non-executable) file mode.
pub const FILE_MODE: i32 = 0o100_644;

/// Identity of an author or committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonIdent {
    pub name: String,
    pub email: String,
    pub when: DateTime<Utc>,
    /// Offset from UTC in minutes.
    pub tz_offset_minutes: i32,
}

impl PersonIdent {
    /// Create an identity in UTC.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when,
            tz_offset_minutes: 0,
        }
    }

    /// Same person, different timestamp and zone.
    #[must_use]
    pub fn with_when(&self, when: DateTime<Utc>, tz_offset_minutes: i32) -> Self {
        Self {
            name: self.name.clone(),
            email: self.email.clone(),
            when,
            tz_offset_minutes,
        }
    }

    fn from_signature(sig: &git2::Signature<'_>) -> Self {
        let time = sig.when();
        Self {
            name: String::from_utf8_lossy(sig.name_bytes()).into_owned(),
            email: String::from_utf8_lossy(sig.email_bytes()).into_owned(),
            when: DateTime::from_timestamp(time.seconds(), 0).unwrap_or_default(),
            tz_offset_minutes: time.offset_minutes(),
        }
    }

    pub(crate) fn to_signature(&self) -> Result<git2::Signature<'static>> {
        let time = git2::Time::new(self.when.timestamp(), self.tz_offset_minutes);
        Ok(git2::Signature::new(&self.name, &self.email, &time)?)
    }
}

/// Parsed commit: ids, identities and the full message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: Oid,
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub message: String,
    pub author: PersonIdent,
    pub committer: PersonIdent,
}

impl CommitInfo {
    /// First parent, if the commit is not a root commit.
    #[must_use]
    pub fn first_parent(&self) -> Option<Oid> {
        self.parents.first().copied()
    }

    /// Number of parents.
    #[must_use]
    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    /// First line of the message.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// A commit to be written.
#[derive(Debug, Clone)]
pub struct NewCommit<'a> {
    pub tree: Oid,
    pub parents: &'a [Oid],
    pub author: &'a PersonIdent,
    pub committer: &'a PersonIdent,
    pub message: &'a str,
}

/// High-level wrapper around a bare project repository.
pub struct Repository {
    inner: git2::Repository,
    in_memory: bool,
}

impl Repository {
    /// Open a repository at the given path.
    ///
    /// # Errors
    /// Returns error if no repository is found at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let inner = git2::Repository::open(path)
            .map_err(|_| Error::NotARepository(path.display().to_string()))?;
        Ok(Self {
            inner,
            in_memory: false,
        })
    }

    /// Create a new bare repository at `path`.
    ///
    /// # Errors
    /// Returns error if the repository cannot be created.
    pub fn init_bare(path: impl AsRef<Path>) -> Result<Self> {
        let inner = git2::Repository::init_bare(path)?;
        Ok(Self {
            inner,
            in_memory: false,
        })
    }

    /// Open a second handle on the same repository whose object writes go to
    /// a throwaway in-memory store.
    ///
    /// Reads fall through to the real object database. Nothing written
    /// through the returned handle survives it being dropped, and it must
    /// never be used to update refs.
    ///
    /// # Errors
    /// Returns error if the repository cannot be reopened.
    pub fn in_memory(&self) -> Result<Self> {
        let inner = git2::Repository::open(self.inner.path())?;
        {
            let odb = inner.odb()?;
            odb.add_new_mempack_backend(MEMPACK_PRIORITY)?;
        }
        Ok(Self {
            inner,
            in_memory: true,
        })
    }

    /// Whether object writes through this handle are discarded on drop.
    #[must_use]
    pub const fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Path to the git directory.
    #[must_use]
    pub fn git_dir(&self) -> &Path {
        self.inner.path()
    }

    // === Refs ===

    /// Resolve a ref exactly, returning `None` when it does not exist.
    ///
    /// # Errors
    /// Returns error if the ref database cannot be read.
    pub fn exact_ref(&self, name: &str) -> Result<Option<Oid>> {
        match self.inner.refname_to_id(name) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a ref that must exist.
    ///
    /// # Errors
    /// Returns `RefNotFound` if the ref does not exist.
    pub fn require_ref(&self, name: &str) -> Result<Oid> {
        self.exact_ref(name)?
            .ok_or_else(|| Error::RefNotFound(name.into()))
    }

    /// All direct refs whose name starts with `prefix`.
    ///
    /// # Errors
    /// Returns error if the ref database cannot be read.
    pub fn refs_by_prefix(&self, prefix: &str) -> Result<BTreeMap<String, Oid>> {
        let mut refs = BTreeMap::new();
        for reference in self.inner.references_glob(&format!("{prefix}*"))? {
            let reference = reference?;
            let (Some(name), Some(target)) = (reference.name(), reference.target()) else {
                continue;
            };
            refs.insert(name.to_string(), target);
        }
        Ok(refs)
    }

    /// Begin an atomic multi-ref update.
    #[must_use]
    pub fn ref_transaction(&self) -> RefTransaction<'_> {
        RefTransaction::new(self)
    }

    // === Commits ===

    /// Get a commit by its id.
    ///
    /// # Errors
    /// Returns error if the commit is not found.
    pub fn find_commit(&self, oid: Oid) -> Result<git2::Commit<'_>> {
        self.inner
            .find_commit(oid)
            .map_err(|_| Error::ObjectNotFound(oid.to_string()))
    }

    /// Parse a commit into an owned [`CommitInfo`].
    ///
    /// # Errors
    /// Returns error if the commit is not found.
    pub fn commit_info(&self, oid: Oid) -> Result<CommitInfo> {
        let commit = self.find_commit(oid)?;
        Ok(CommitInfo {
            id: commit.id(),
            tree: commit.tree_id(),
            parents: commit.parent_ids().collect(),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            author: PersonIdent::from_signature(&commit.author()),
            committer: PersonIdent::from_signature(&commit.committer()),
        })
    }

    /// Write a commit object without touching any ref.
    ///
    /// # Errors
    /// Returns error if a parent or the tree is missing.
    pub fn write_commit(&self, commit: &NewCommit<'_>) -> Result<Oid> {
        let tree = self.inner.find_tree(commit.tree)?;
        let parents = commit
            .parents
            .iter()
            .map(|p| self.find_commit(*p))
            .collect::<Result<Vec<_>>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        let author = commit.author.to_signature()?;
        let committer = commit.committer.to_signature()?;
        Ok(self.inner.commit(
            None,
            &author,
            &committer,
            commit.message,
            &tree,
            &parent_refs,
        )?)
    }

    /// Whether `ancestor` is reachable from `descendant` (or equal to it).
    ///
    /// # Errors
    /// Returns error if the revision walk fails.
    pub fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.inner.graph_descendant_of(descendant, ancestor)?)
    }

    /// Get the merge base between two commits, if any.
    ///
    /// # Errors
    /// Returns error if merge base calculation fails.
    pub fn merge_base(&self, one: Oid, two: Oid) -> Result<Option<Oid>> {
        match self.inner.merge_base(one, two) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a revision (commit id, abbreviation or ref name) to a commit.
    ///
    /// # Errors
    /// Returns error if the string does not name a commit.
    pub fn resolve_commit(&self, rev: &str) -> Result<Oid> {
        let object = self
            .inner
            .revparse_single(rev)
            .map_err(|_| Error::InvalidObjectId(rev.into()))?;
        let commit = object
            .peel_to_commit()
            .map_err(|_| Error::ObjectNotFound(rev.into()))?;
        Ok(commit.id())
    }

    // === Trees and blobs ===

    /// Write a blob.
    ///
    /// # Errors
    /// Returns error if the object database rejects the write.
    pub fn write_blob(&self, content: &[u8]) -> Result<Oid> {
        Ok(self.inner.blob(content)?)
    }

    /// Read a blob's content.
    ///
    /// # Errors
    /// Returns error if the blob is not found.
    pub fn read_blob(&self, oid: Oid) -> Result<Vec<u8>> {
        let blob = self
            .inner
            .find_blob(oid)
            .map_err(|_| Error::ObjectNotFound(oid.to_string()))?;
        Ok(blob.content().to_vec())
    }

    /// Write a flat tree of regular files.
    ///
    /// # Errors
    /// Returns error if a blob cannot be written.
    pub fn write_flat_tree(&self, files: &[(&str, &[u8])]) -> Result<Oid> {
        let mut builder = self.inner.treebuilder(None)?;
        for (name, content) in files {
            let blob = self.inner.blob(content)?;
            builder.insert(name, blob, FILE_MODE)?;
        }
        Ok(builder.write()?)
    }

    /// The id of the empty tree, writing it if needed.
    ///
    /// # Errors
    /// Returns error if the tree cannot be written.
    pub fn empty_tree(&self) -> Result<Oid> {
        Ok(self.inner.treebuilder(None)?.write()?)
    }

    /// Read the blob at `path` inside `tree`, if present.
    ///
    /// # Errors
    /// Returns error if the tree cannot be read.
    pub fn read_path(&self, tree: Oid, path: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.inner.find_tree(tree)?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }
        self.read_blob(entry.id()).map(Some)
    }

    /// Size of an object without loading its content.
    ///
    /// # Errors
    /// Returns error if the object is not found.
    pub fn object_size(&self, oid: Oid) -> Result<usize> {
        let (size, _) = self.inner.odb()?.read_header(oid)?;
        Ok(size)
    }

    /// Copy the objects reachable from `tips` that this repository lacks
    /// out of `source`, typically an in-memory handle. The walk stops at
    /// objects already present here. Returns the number of objects copied.
    ///
    /// # Errors
    /// Returns `ObjectNotFound` if a reachable object is in neither store.
    pub fn import_objects(&self, source: &Self, tips: &[Oid]) -> Result<usize> {
        let target = self.inner.odb()?;
        let origin = source.inner.odb()?;
        let mut pending = tips.to_vec();
        let mut copied = 0;
        while let Some(oid) = pending.pop() {
            if target.exists(oid) {
                continue;
            }
            let object = origin
                .read(oid)
                .map_err(|_| Error::ObjectNotFound(oid.to_string()))?;
            match object.kind() {
                ObjectType::Commit => {
                    let commit = source.find_commit(oid)?;
                    pending.push(commit.tree_id());
                    pending.extend(commit.parent_ids());
                }
                ObjectType::Tree => {
                    let tree = source.inner.find_tree(oid)?;
                    // Gitlinks point into other repositories.
                    pending.extend(
                        tree.iter()
                            .filter(|entry| entry.kind() != Some(ObjectType::Commit))
                            .map(|entry| entry.id()),
                    );
                }
                _ => {}
            }
            target.write(object.kind(), object.data())?;
            copied += 1;
        }
        Ok(copied)
    }

    // === Low-level access ===

    /// Get a reference to the underlying git2 repository.
    ///
    /// Use sparingly - prefer high-level methods.
    #[must_use]
    pub const fn inner(&self) -> &git2::Repository {
        &self.inner
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.git_dir())
            .field("in_memory", &self.in_memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ident() -> PersonIdent {
        PersonIdent::new(
            "Test User",
            "test@example.com",
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        )
    }

    fn init_test_repo() -> (TempDir, Repository) {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init_bare(temp.path().join("project.git")).unwrap();
        (temp, repo)
    }

    fn commit(repo: &Repository, parents: &[Oid], files: &[(&str, &[u8])], msg: &str) -> Oid {
        let tree = repo.write_flat_tree(files).unwrap();
        let who = ident();
        repo.write_commit(&NewCommit {
            tree,
            parents,
            author: &who,
            committer: &who,
            message: msg,
        })
        .unwrap()
    }

    #[test]
    fn test_commit_info_roundtrip() {
        let (_temp, repo) = init_test_repo();
        let root = commit(&repo, &[], &[("a.txt", b"one\n")], "Initial commit\n\nBody\n");
        let child = commit(&repo, &[root], &[("a.txt", b"two\n")], "Second\n");

        let info = repo.commit_info(child).unwrap();
        assert_eq!(info.parents, vec![root]);
        assert_eq!(info.first_parent(), Some(root));
        assert_eq!(info.subject(), "Second");
        assert_eq!(info.author, ident());

        let root_info = repo.commit_info(root).unwrap();
        assert_eq!(root_info.parent_count(), 0);
        assert_eq!(root_info.message, "Initial commit\n\nBody\n");
    }

    #[test]
    fn test_exact_ref_missing() {
        let (_temp, repo) = init_test_repo();
        assert_eq!(repo.exact_ref("refs/heads/main").unwrap(), None);
        assert!(matches!(
            repo.require_ref("refs/heads/main"),
            Err(Error::RefNotFound(_))
        ));
    }

    #[test]
    fn test_ancestry() {
        let (_temp, repo) = init_test_repo();
        let root = commit(&repo, &[], &[("a.txt", b"1")], "root");
        let mid = commit(&repo, &[root], &[("a.txt", b"2")], "mid");
        let tip = commit(&repo, &[mid], &[("a.txt", b"3")], "tip");

        assert!(repo.is_ancestor(root, tip).unwrap());
        assert!(repo.is_ancestor(tip, tip).unwrap());
        assert!(!repo.is_ancestor(tip, root).unwrap());
        assert_eq!(repo.merge_base(mid, tip).unwrap(), Some(mid));
    }

    #[test]
    fn test_read_path() {
        let (_temp, repo) = init_test_repo();
        let tree = repo
            .write_flat_tree(&[("change.json", b"{}"), ("other", b"x")])
            .unwrap();
        assert_eq!(
            repo.read_path(tree, "change.json").unwrap(),
            Some(b"{}".to_vec())
        );
        assert_eq!(repo.read_path(tree, "missing").unwrap(), None);
    }

    #[test]
    fn test_in_memory_writes_are_discarded() {
        let (_temp, repo) = init_test_repo();
        let blob = {
            let scratch = repo.in_memory().unwrap();
            assert!(scratch.is_in_memory());
            let oid = scratch.write_blob(b"speculative content").unwrap();
            assert_eq!(scratch.read_blob(oid).unwrap(), b"speculative content");
            oid
        };
        assert!(repo.read_blob(blob).is_err());
    }

    #[test]
    fn test_import_objects_copies_missing_closure() {
        let (_temp, repo) = init_test_repo();
        let root = commit(&repo, &[], &[("a.txt", b"one\n")], "root");
        let scratch = repo.in_memory().unwrap();
        let child = commit(&scratch, &[root], &[("a.txt", b"two\n"), ("b", b"b")], "child");
        let stray = scratch.write_blob(b"unreferenced").unwrap();
        assert!(repo.commit_info(child).is_err());

        let copied = repo.import_objects(&scratch, &[child]).unwrap();

        // Commit, tree and two blobs; the root commit was already present.
        assert_eq!(copied, 4);
        let info = repo.commit_info(child).unwrap();
        assert_eq!(info.parents, vec![root]);
        assert_eq!(repo.read_path(info.tree, "b").unwrap(), Some(b"b".to_vec()));
        assert!(repo.read_blob(stray).is_err());
        assert_eq!(repo.import_objects(&scratch, &[child]).unwrap(), 0);
    }

    #[test]
    fn test_in_memory_reads_real_objects() {
        let (_temp, repo) = init_test_repo();
        let blob = repo.write_blob(b"durable").unwrap();
        let scratch = repo.in_memory().unwrap();
        assert_eq!(scratch.read_blob(blob).unwrap(), b"durable");
        assert_eq!(scratch.object_size(blob).unwrap(), 7);
    }
}
