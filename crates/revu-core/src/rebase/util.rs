//! Finding the base a patch set should be rebased onto.

use revu_git::{CommitInfo, Oid, Repository};
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::model::{ChangeId, PatchSet, PatchSetId};
use crate::notes::ChangeNotes;

/// A patch set that can serve as a rebase base, with its change.
#[derive(Debug, Clone)]
pub struct Base {
    pub notes: ChangeNotes,
    pub patch_set: PatchSet,
}

impl Base {
    fn at(notes: ChangeNotes, num: u32) -> Option<Self> {
        let patch_set = notes.patch_set(num)?.clone();
        Some(Self { notes, patch_set })
    }
}

/// Rebase helpers over one project repository.
#[derive(Debug, Clone, Copy)]
pub struct RebaseUtil<'r> {
    repo: &'r Repository,
}

impl<'r> RebaseUtil<'r> {
    #[must_use]
    pub const fn new(repo: &'r Repository) -> Self {
        Self { repo }
    }

    /// Interpret user input naming a base: a patch set ref, a change
    /// number (its current patch set), or a commit id prefix of any patch
    /// set (the highest numbered match wins).
    ///
    /// # Errors
    /// Returns error if change metadata cannot be read.
    pub fn parse_base(&self, input: &str) -> Result<Option<Base>> {
        let input = input.trim();
        if let Some(ps) = PatchSetId::from_ref(input) {
            return Ok(ChangeNotes::load(self.repo, ps.change)?.and_then(|n| Base::at(n, ps.num)));
        }

        if let Ok(num) = input.parse::<u32>()
            && let Some(notes) = ChangeNotes::load(self.repo, ChangeId(num))?
        {
            let current = notes.change.current_patch_set;
            return Ok(Base::at(notes, current));
        }

        if input.len() < 4 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(None);
        }
        let prefix = input.to_ascii_lowercase();
        let mut best: Option<Base> = None;
        for notes in ChangeNotes::load_all(self.repo)?.into_values() {
            let hit = notes
                .patch_sets
                .values()
                .filter(|ps| ps.commit.to_string().starts_with(&prefix))
                .map(|ps| ps.id.num)
                .max();
            if let Some(num) = hit
                && best.as_ref().is_none_or(|b| b.patch_set.id.num < num)
            {
                best = Base::at(notes, num);
            }
        }
        Ok(best)
    }

    /// Where `ps` should go: the current patch set of the open change it
    /// depends on, or else the tip of its destination branch.
    ///
    /// # Errors
    /// Returns `Unprocessable` for root or merge commits or a missing
    /// branch, and `Conflict` when the patch set is already up to date or
    /// depends on an abandoned change.
    pub fn find_base_revision(&self, notes: &ChangeNotes, ps: &PatchSet) -> Result<Oid> {
        let info = self.repo.commit_info(ps.commit)?;
        let parent = sole_parent(&info)?;
        let dest = &notes.change.dest;

        let all = ChangeNotes::load_all(self.repo)?;
        let dependency = all.values().filter(|n| n.change.dest == *dest).find_map(|n| {
            n.patch_sets
                .values()
                .find(|p| p.commit == parent)
                .map(|p| (n, p.id))
        });
        if let Some((dep, dep_ps)) = dependency {
            let change = &dep.change;
            if change.is_abandoned() {
                return Err(Error::Conflict(format!(
                    "Cannot rebase a change with an abandoned parent: {}",
                    change.key
                )));
            }
            if change.is_new() {
                if dep_ps == change.current_patch_set_id() {
                    return Err(Error::Conflict(
                        "Change is already based on the latest patch set of the dependent change."
                            .into(),
                    ));
                }
                return Ok(dep.require_current_patch_set()?.commit);
            }
        }

        let tip = self.repo.exact_ref(dest.as_ref_name())?.ok_or_else(|| {
            Error::Unprocessable(format!(
                "The destination branch does not exist: {}",
                dest.as_ref_name()
            ))
        })?;
        if tip == parent {
            return Err(Error::Conflict("Change is already up to date.".into()));
        }
        Ok(tip)
    }

    /// Resolve an explicit base, or find one when `base` is `None`. An
    /// empty base means the destination branch tip.
    ///
    /// # Errors
    /// Returns `Conflict` when the named base is unusable.
    pub fn parse_or_find_base_revision(
        &self,
        notes: &ChangeNotes,
        ps: &PatchSet,
        base: Option<&str>,
    ) -> Result<Oid> {
        let Some(input) = base.map(str::trim) else {
            return self.find_base_revision(notes, ps);
        };
        let change = &notes.change;
        let dest = &change.dest;
        let tip = self.repo.exact_ref(dest.as_ref_name())?;
        if input.is_empty() {
            return tip.ok_or_else(|| {
                Error::Conflict(format!(
                    "can't rebase onto tip of branch {}; branch doesn't exist",
                    dest.as_ref_name()
                ))
            });
        }

        let Some(base) = self.parse_base(input)? else {
            let commit = self
                .repo
                .resolve_commit(input)
                .map_err(|_| Error::Conflict(format!("Base change not found: {input}")))?;
            return match tip {
                Some(tip) if self.repo.is_ancestor(commit, tip)? => Ok(commit),
                _ => Err(Error::Conflict(format!(
                    "base revision is missing from the destination branch: {input}"
                ))),
            };
        };

        let other = &base.notes.change;
        if other.id == change.id {
            return Err(Error::Conflict(format!(
                "cannot rebase change {} onto itself",
                change.id
            )));
        }
        if other.project != change.project {
            return Err(Error::Conflict(format!(
                "base change is in wrong project: {}",
                other.project
            )));
        }
        if other.dest != change.dest {
            return Err(Error::Conflict(format!(
                "base change is targeting wrong branch: {}",
                other.dest.as_ref_name()
            )));
        }
        if other.is_abandoned() {
            return Err(Error::Conflict(format!(
                "base change is abandoned: {}",
                other.key
            )));
        }
        if self.repo.is_ancestor(ps.commit, base.patch_set.commit)? {
            return Err(Error::Conflict(format!(
                "base change {} is a descendant of the current change - recursion not allowed",
                other.key
            )));
        }
        Ok(base.patch_set.commit)
    }

    /// Whether `ps` has somewhere to go. Never fails.
    #[must_use]
    pub fn can_rebase(&self, notes: &ChangeNotes, ps: &PatchSet) -> bool {
        match self.find_base_revision(notes, ps) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::Infrastructure => {
                warn!(patch_set = %ps.id, error = %e, "error checking rebase");
                false
            }
            Err(e) => {
                debug!(patch_set = %ps.id, reason = %e, "cannot rebase");
                false
            }
        }
    }

    /// Checks that do not depend on the target: the change is open, `ps`
    /// is current and its commit has exactly one parent.
    ///
    /// # Errors
    /// Returns `Conflict` naming the failed precondition.
    pub fn verify_rebase_preconditions(&self, notes: &ChangeNotes, ps: &PatchSet) -> Result<()> {
        let change = &notes.change;
        if !change.is_new() {
            return Err(Error::Conflict(format!(
                "Change {} is {}",
                change.id, change.status
            )));
        }
        if ps.id != change.current_patch_set_id() {
            return Err(Error::Conflict("patch set is not current".into()));
        }
        match self.repo.commit_info(ps.commit)?.parent_count() {
            1 => Ok(()),
            0 => Err(Error::Conflict(format!(
                "Error rebasing {}. Cannot rebase commit with no ancestor",
                change.id
            ))),
            _ => Err(Error::Conflict(format!(
                "Error rebasing {}. Cannot rebase merge commits",
                change.id
            ))),
        }
    }
}

/// The only parent of a rebasable commit.
pub(super) fn sole_parent(info: &CommitInfo) -> Result<Oid> {
    match info.parents.as_slice() {
        [parent] => Ok(*parent),
        [] => Err(Error::Unprocessable(
            "Cannot rebase a change without any parents (is this the initial commit?).".into(),
        )),
        _ => Err(Error::Unprocessable(
            "Cannot rebase a change with multiple parents.".into(),
        )),
    }
}

/// Next free patch set id given the change's existing refs.
#[must_use]
pub fn next_patch_set_id<'a>(
    ref_names: impl IntoIterator<Item = &'a String>,
    current: PatchSetId,
) -> PatchSetId {
    ref_names
        .into_iter()
        .filter_map(|name| PatchSetId::from_ref(name))
        .filter(|ps| ps.change == current.change)
        .fold(current, |max, ps| if ps.num > max.num { ps } else { max })
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BranchName;
    use crate::testing::{self, TestSite};

    struct Fixture {
        site: TestSite,
        base: Oid,
    }

    impl Fixture {
        fn new() -> Self {
            let site = TestSite::new();
            let base = site.repo.commit(&[], &[("a", "1\n")], "base\n");
            site.repo.set_ref("refs/heads/main", base);
            Self { site, base }
        }

        fn change(&self, parent: Oid, content: &str) -> (ChangeId, ChangeNotes) {
            let commit = self
                .site
                .repo
                .commit(&[parent], &[("a", content)], &format!("{content}\n"));
            let id = testing::create_change(&self.site, commit);
            (id, self.notes(id))
        }

        fn notes(&self, id: ChangeId) -> ChangeNotes {
            ChangeNotes::load_required(&self.site.repo.repo, id).unwrap()
        }

        fn util(&self) -> RebaseUtil<'_> {
            RebaseUtil::new(&self.site.repo.repo)
        }
    }

    fn current(notes: &ChangeNotes) -> &PatchSet {
        notes.current_patch_set().unwrap()
    }

    #[test]
    fn test_up_to_date() {
        let f = Fixture::new();
        let (_, notes) = f.change(f.base, "2\n");
        let err = f.util().find_base_revision(&notes, current(&notes)).unwrap_err();
        assert_eq!(err.to_string(), "Change is already up to date.");
        assert!(!f.util().can_rebase(&notes, current(&notes)));
    }

    #[test]
    fn test_branch_tip() {
        let f = Fixture::new();
        let (_, notes) = f.change(f.base, "2\n");
        let tip = f.site.repo.commit(&[f.base], &[("b", "1\n")], "upstream\n");
        f.site.repo.set_ref("refs/heads/main", tip);

        assert_eq!(f.util().find_base_revision(&notes, current(&notes)).unwrap(), tip);
        assert!(f.util().can_rebase(&notes, current(&notes)));
    }

    #[test]
    fn test_missing_branch() {
        let f = Fixture::new();
        let (_, notes) = f.change(f.base, "2\n");
        f.site.repo.repo.inner().find_reference("refs/heads/main").unwrap().delete().unwrap();
        let err = f.util().find_base_revision(&notes, current(&notes)).unwrap_err();
        assert_eq!(err.to_string(), "The destination branch does not exist: refs/heads/main");
    }

    #[test]
    fn test_dependent_change() {
        let f = Fixture::new();
        let (parent_id, parent_notes) = f.change(f.base, "2\n");
        let (_, child) = f.change(current(&parent_notes).commit, "3\n");

        let err = f.util().find_base_revision(&child, current(&child)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Change is already based on the latest patch set of the dependent change."
        );

        // The parent gets a second patch set: the child should follow it.
        let ps2 = f.site.repo.commit(&[f.base], &[("a", "2b\n")], "2b\n");
        let mut batch = testing::batch(&f.site, 1);
        batch.add_op(
            parent_id,
            crate::ops::PatchSetInserter::new(&parent_notes, PatchSetId::new(parent_id, 2), ps2),
        );
        batch.execute().unwrap();
        assert_eq!(f.util().find_base_revision(&child, current(&child)).unwrap(), ps2);

        testing::abandon(&f.site, parent_id);
        let err = f.util().find_base_revision(&child, current(&child)).unwrap_err();
        assert!(err.to_string().starts_with("Cannot rebase a change with an abandoned parent: I"));
    }

    #[test]
    fn test_root_commit() {
        let f = Fixture::new();
        let root = f.site.repo.commit(&[], &[("a", "r\n")], "root\n");
        let id = testing::create_change(&f.site, root);
        let notes = f.notes(id);
        let err = f.util().find_base_revision(&notes, current(&notes)).unwrap_err();
        assert!(matches!(err, Error::Unprocessable(_)));
        let err = f.util().verify_rebase_preconditions(&notes, current(&notes)).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Error rebasing {id}. Cannot rebase commit with no ancestor")
        );
    }

    #[test]
    fn test_parse_base() {
        let f = Fixture::new();
        let (id, notes) = f.change(f.base, "2\n");
        let commit = current(&notes).commit;
        let util = f.util();

        let by_ref = util.parse_base(&format!("refs/changes/{:02}/{id}/1", id.0 % 100)).unwrap();
        assert_eq!(by_ref.unwrap().patch_set.commit, commit);

        let by_number = util.parse_base(&id.to_string()).unwrap();
        assert_eq!(by_number.unwrap().patch_set.id, PatchSetId::new(id, 1));

        let by_commit = util.parse_base(&commit.to_string()[..8]).unwrap();
        assert_eq!(by_commit.unwrap().notes.change.id, id);

        assert!(util.parse_base("zzzz").unwrap().is_none());
        assert!(util.parse_base("refs/changes/01/999/1").unwrap().is_none());
    }

    #[test]
    fn test_parse_or_find_checks() {
        let f = Fixture::new();
        let (parent_id, parent) = f.change(f.base, "2\n");
        let (child_id, child) = f.change(current(&parent).commit, "3\n");
        let util = f.util();

        let err = util
            .parse_or_find_base_revision(
                &child,
                current(&child),
                Some(child_id.to_string().as_str()),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), format!("cannot rebase change {child_id} onto itself"));

        let err = util
            .parse_or_find_base_revision(&parent, current(&parent), Some(&child_id.to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("recursion not allowed"));

        assert_eq!(
            util.parse_or_find_base_revision(&child, current(&child), Some(""))
                .unwrap(),
            f.base
        );
        assert_eq!(
            util.parse_or_find_base_revision(&child, current(&child), Some(&f.base.to_string()))
                .unwrap(),
            f.base
        );

        let stray = f.site.repo.commit(&[], &[("x", "1\n")], "stray\n");
        let err = util
            .parse_or_find_base_revision(&child, current(&child), Some(&stray.to_string()))
            .unwrap_err();
        assert!(
            err.to_string()
                .starts_with("base revision is missing from the destination branch")
        );

        let other_branch = f.site.repo.commit(&[f.base], &[("a", "o\n")], "other\n");
        let other_id = testing::create_change(&f.site, other_branch);
        let mut other = f.notes(other_id);
        other.change.dest = BranchName::new("stable");
        let err = util
            .parse_or_find_base_revision(&other, current(&other), Some(&parent_id.to_string()))
            .unwrap_err();
        assert_eq!(err.to_string(), "base change is targeting wrong branch: refs/heads/main");
    }

    #[test]
    fn test_next_patch_set_id() {
        let id = ChangeId(7);
        let refs = [
            "refs/changes/07/7/1".to_string(),
            "refs/changes/07/7/4".to_string(),
            "refs/changes/07/7/meta".to_string(),
        ];
        assert_eq!(
            next_patch_set_id(&refs, PatchSetId::new(id, 2)),
            PatchSetId::new(id, 5)
        );
        assert_eq!(
            next_patch_set_id(&[], PatchSetId::new(id, 2)),
            PatchSetId::new(id, 3)
        );
    }
}
