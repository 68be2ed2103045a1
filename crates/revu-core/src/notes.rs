//! NoteDb: change metadata stored as a commit history under
//! `refs/changes/<nn>/<id>/meta`.
//!
//! Every metadata commit carries the complete change state as `change.json`
//! in its tree. The commit message records what changed as footers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use revu_git::{NewCommit, Oid, PersonIdent, Repository};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::footer::Footer;
use crate::model::{
    AccountId, CHANGES_PREFIX, Change, ChangeId, ChangeMessage, ChangeStatus, PatchSet,
    PatchSetApproval, PatchSetId, ReviewerState,
};

/// File holding the serialized state in each metadata commit.
pub const STATE_FILE: &str = "change.json";

/// Footer keys written to metadata commits.
pub mod footers {
    pub const PATCH_SET: &str = "Patch-set";
    pub const STATUS: &str = "Status";
    pub const TOPIC: &str = "Topic";
    pub const WORK_IN_PROGRESS: &str = "Work-in-progress";
    pub const PRIVATE: &str = "Private";
    pub const REVIEWER: &str = "Reviewer";
    pub const CC: &str = "CC";
    pub const REMOVED: &str = "Removed";
    pub const LABEL: &str = "Label";
    pub const COMMIT: &str = "Commit";
    pub const SUBJECT: &str = "Subject";
    pub const GROUPS: &str = "Groups";
    pub const BRANCH: &str = "Branch";
    pub const CHANGE_ID: &str = "Change-id";
    pub const COPIED_LABEL: &str = "Copied-Label";
}

/// Loaded change state: the change, its patch sets, reviewers, votes and
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotes {
    pub change: Change,
    pub patch_sets: BTreeMap<u32, PatchSet>,
    #[serde(default)]
    pub reviewers: BTreeMap<AccountId, ReviewerState>,
    #[serde(default)]
    pub approvals: Vec<PatchSetApproval>,
    #[serde(default)]
    pub messages: Vec<ChangeMessage>,
    /// Metadata commit this state was read from; `None` for a change that
    /// has not been stored yet.
    #[serde(skip)]
    meta_id: Option<Oid>,
}

impl ChangeNotes {
    /// State for a change that is about to be created.
    #[must_use]
    pub const fn new(change: Change) -> Self {
        Self {
            change,
            patch_sets: BTreeMap::new(),
            reviewers: BTreeMap::new(),
            approvals: Vec::new(),
            messages: Vec::new(),
            meta_id: None,
        }
    }

    /// Load the latest state of a change, or `None` if it does not exist.
    ///
    /// # Errors
    /// Returns `CorruptNotes` if the stored state cannot be decoded.
    pub fn load(repo: &Repository, id: ChangeId) -> Result<Option<Self>> {
        let Some(meta) = repo.exact_ref(&id.meta_ref())? else {
            return Ok(None);
        };
        Self::load_at(repo, id, meta).map(Some)
    }

    /// Load the state of a change, failing if it does not exist.
    ///
    /// # Errors
    /// Returns `ChangeNotFound` if there is no metadata ref.
    pub fn load_required(repo: &Repository, id: ChangeId) -> Result<Self> {
        Self::load(repo, id)?.ok_or(Error::ChangeNotFound(id))
    }

    /// Load the state recorded by a specific metadata commit.
    ///
    /// # Errors
    /// Returns `CorruptNotes` if the commit has no decodable state.
    pub fn load_at(repo: &Repository, id: ChangeId, meta: Oid) -> Result<Self> {
        let info = repo.commit_info(meta)?;
        let raw = repo
            .read_path(info.tree, STATE_FILE)?
            .ok_or_else(|| Error::CorruptNotes {
                change: id,
                message: format!("{STATE_FILE} missing in {meta}"),
            })?;
        let mut notes: Self = serde_json::from_slice(&raw).map_err(|e| Error::CorruptNotes {
            change: id,
            message: e.to_string(),
        })?;
        if notes.change.id != id {
            return Err(Error::CorruptNotes {
                change: id,
                message: format!("state belongs to change {}", notes.change.id),
            });
        }
        notes.meta_id = Some(meta);
        Ok(notes)
    }

    /// Every change stored in the repository, by id.
    ///
    /// # Errors
    /// Returns error if any change fails to load.
    pub fn load_all(repo: &Repository) -> Result<BTreeMap<ChangeId, Self>> {
        let mut all = BTreeMap::new();
        for (name, meta) in repo.refs_by_prefix(CHANGES_PREFIX)? {
            if let Some(id) = ChangeId::from_meta_ref(&name) {
                all.insert(id, Self::load_at(repo, id, meta)?);
            }
        }
        Ok(all)
    }

    #[must_use]
    pub const fn meta_id(&self) -> Option<Oid> {
        self.meta_id
    }

    pub(crate) const fn set_meta_id(&mut self, meta: Oid) {
        self.meta_id = Some(meta);
    }

    #[must_use]
    pub const fn change_id(&self) -> ChangeId {
        self.change.id
    }

    /// The current patch set, if the change has any.
    #[must_use]
    pub fn current_patch_set(&self) -> Option<&PatchSet> {
        self.patch_sets.get(&self.change.current_patch_set)
    }

    /// The current patch set, failing for a change without patch sets.
    ///
    /// # Errors
    /// Returns `CorruptNotes` if the current patch set is missing.
    pub fn require_current_patch_set(&self) -> Result<&PatchSet> {
        self.current_patch_set().ok_or_else(|| Error::CorruptNotes {
            change: self.change.id,
            message: format!(
                "current patch set {} missing",
                self.change.current_patch_set
            ),
        })
    }

    #[must_use]
    pub fn patch_set(&self, num: u32) -> Option<&PatchSet> {
        self.patch_sets.get(&num)
    }

    /// Highest patch set number stored.
    #[must_use]
    pub fn latest_patch_set_num(&self) -> u32 {
        self.patch_sets.keys().next_back().copied().unwrap_or(0)
    }

    /// Votes on one patch set.
    pub fn approvals_on(&self, ps: PatchSetId) -> impl Iterator<Item = &PatchSetApproval> {
        self.approvals.iter().filter(move |a| a.patch_set == ps)
    }

    /// Accounts currently in `state`.
    #[must_use]
    pub fn reviewers_in(&self, state: ReviewerState) -> Vec<AccountId> {
        self.reviewers
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(a, _)| *a)
            .collect()
    }

    /// Owner plus active reviewers and CCs.
    #[must_use]
    pub fn interested_accounts(&self) -> Vec<AccountId> {
        let mut accounts = vec![self.change.owner];
        accounts.extend(
            self.reviewers
                .iter()
                .filter(|(_, s)| **s != ReviewerState::Removed)
                .map(|(a, _)| *a),
        );
        crate::model::dedup_accounts(&accounts)
    }
}

/// Metadata delta recorded against one patch set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeUpdate {
    patch_set: PatchSetId,
    footers: Vec<Footer>,
    messages: Vec<String>,
}

impl ChangeUpdate {
    #[must_use]
    pub const fn new(patch_set: PatchSetId) -> Self {
        Self {
            patch_set,
            footers: Vec::new(),
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub const fn patch_set(&self) -> PatchSetId {
        self.patch_set
    }

    #[must_use]
    pub fn footers(&self) -> &[Footer] {
        &self.footers
    }

    /// Whether the update records nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.footers.is_empty() && self.messages.is_empty()
    }

    fn footer(&mut self, key: &str, value: impl Into<String>) {
        self.footers.push(Footer {
            key: key.to_string(),
            value: value.into(),
        });
    }
}

/// Applies field mutations to the working state and records each one in
/// the update for its patch set.
pub struct ChangeUpdater<'a> {
    notes: &'a mut ChangeNotes,
    update: &'a mut ChangeUpdate,
    author: Option<AccountId>,
    when: DateTime<Utc>,
}

impl<'a> ChangeUpdater<'a> {
    pub(crate) fn new(
        notes: &'a mut ChangeNotes,
        update: &'a mut ChangeUpdate,
        author: Option<AccountId>,
        when: DateTime<Utc>,
    ) -> Self {
        notes.change.last_updated_on = when;
        Self {
            notes,
            update,
            author,
            when,
        }
    }

    /// Record initial fields of a newly created change.
    pub fn create_change(&mut self) {
        let change = &self.notes.change;
        let (branch, key) = (change.dest.to_string(), change.key.to_string());
        self.update.footer(footers::BRANCH, branch);
        self.update.footer(footers::CHANGE_ID, key);
        self.update.footer(footers::STATUS, ChangeStatus::New.as_str());
    }

    /// Store a new patch set and make it current.
    pub fn add_patch_set(&mut self, ps: PatchSet) {
        self.update.footer(footers::COMMIT, ps.commit.to_string());
        if !ps.groups.is_empty() {
            self.update.footer(footers::GROUPS, ps.groups.join(","));
        }
        self.notes.change.current_patch_set = ps.id.num;
        self.notes.patch_sets.insert(ps.id.num, ps);
    }

    /// Point the change at an existing patch set.
    pub fn set_current_patch_set(&mut self, num: u32) {
        self.notes.change.current_patch_set = num;
    }

    pub fn set_subject(&mut self, subject: &str) {
        if self.notes.change.subject != subject {
            self.notes.change.subject = subject.to_string();
            self.update.footer(footers::SUBJECT, subject);
        }
    }

    pub fn set_status(&mut self, status: ChangeStatus) {
        self.notes.change.status = status;
        self.update.footer(footers::STATUS, status.as_str());
    }

    pub fn set_topic(&mut self, topic: Option<String>) {
        self.update
            .footer(footers::TOPIC, topic.clone().unwrap_or_default());
        self.notes.change.topic = topic;
    }

    pub fn set_work_in_progress(&mut self, wip: bool) {
        self.notes.change.work_in_progress = wip;
        self.update.footer(footers::WORK_IN_PROGRESS, wip.to_string());
    }

    pub fn set_private(&mut self, private: bool) {
        self.notes.change.private = private;
        self.update.footer(footers::PRIVATE, private.to_string());
    }

    pub fn set_groups(&mut self, groups: Vec<String>) {
        let num = self.update.patch_set.num;
        if let Some(ps) = self.notes.patch_sets.get_mut(&num) {
            self.update.footer(footers::GROUPS, groups.join(","));
            ps.groups = groups;
        }
    }

    pub fn put_reviewer(&mut self, account: AccountId, state: ReviewerState) {
        let key = match state {
            ReviewerState::Reviewer => footers::REVIEWER,
            ReviewerState::Cc => footers::CC,
            ReviewerState::Removed => footers::REMOVED,
        };
        self.update.footer(key, format!("user {account}"));
        self.notes.reviewers.insert(account, state);
    }

    /// Set or replace a vote on this update's patch set. A zero vote removes
    /// any existing vote.
    pub fn put_approval(&mut self, account: AccountId, label: &str, value: i16) {
        let ps = self.update.patch_set;
        self.notes
            .approvals
            .retain(|a| !(a.patch_set == ps && a.account == account && a.label == label));
        if value == 0 {
            self.update
                .footer(footers::LABEL, format!("-{label} user {account}"));
            return;
        }
        self.update.footer(
            footers::LABEL,
            format!("{} user {account}", crate::model::format_vote(label, value)),
        );
        self.notes.approvals.push(PatchSetApproval {
            patch_set: ps,
            account,
            label: label.to_string(),
            value,
            granted: self.when,
            copied: false,
        });
    }

    /// Carry a vote from an earlier patch set to this one.
    pub fn copy_approval(&mut self, from: &PatchSetApproval) {
        let ps = self.update.patch_set;
        self.update.footer(
            footers::COPIED_LABEL,
            format!("{} user {}", from.label_vote(), from.account),
        );
        self.notes.approvals.push(PatchSetApproval {
            patch_set: ps,
            copied: true,
            ..from.clone()
        });
    }

    /// Remove every vote by `account` on this update's patch set.
    pub fn remove_approvals_by(&mut self, account: AccountId) -> Vec<PatchSetApproval> {
        let ps = self.update.patch_set;
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .notes
            .approvals
            .drain(..)
            .partition(|a| a.patch_set == ps && a.account == account);
        self.notes.approvals = kept;
        for a in &removed {
            self.update
                .footer(footers::LABEL, format!("-{} user {account}", a.label));
        }
        removed
    }

    /// Post a change message attributed to the acting user.
    pub fn add_change_message(&mut self, message: &str, tag: Option<&str>) {
        self.update.messages.push(message.to_string());
        self.notes.messages.push(ChangeMessage {
            author: self.author,
            message: message.to_string(),
            written_on: self.when,
            patch_set: Some(self.update.patch_set.num),
            tag: tag.map(str::to_string),
        });
    }

    /// Read-only view of the working state.
    #[must_use]
    pub fn notes(&self) -> &ChangeNotes {
        self.notes
    }
}

/// Write one metadata commit covering `updates` on top of the state's
/// current metadata commit. Returns the new commit id.
///
/// # Errors
/// Returns error if objects cannot be written.
pub fn write_meta_commit(
    repo: &Repository,
    notes: &ChangeNotes,
    updates: &[ChangeUpdate],
    author: &PersonIdent,
    committer: &PersonIdent,
) -> Result<Oid> {
    let json = serde_json::to_vec_pretty(notes)?;
    let tree = repo.write_flat_tree(&[(STATE_FILE, json.as_slice())])?;
    let message = meta_commit_message(notes, updates);
    let parents: Vec<Oid> = notes.meta_id.into_iter().collect();
    let oid = repo.write_commit(&NewCommit {
        tree,
        parents: &parents,
        author,
        committer,
        message: &message,
    })?;
    debug!(change = %notes.change.id, meta = %oid, "wrote metadata commit");
    Ok(oid)
}

fn meta_commit_message(notes: &ChangeNotes, updates: &[ChangeUpdate]) -> String {
    let subject = if notes.meta_id.is_none() {
        "Create change".to_string()
    } else {
        let last = updates
            .last()
            .map_or(notes.change.current_patch_set, |u| u.patch_set.num);
        format!("Update patch set {last}")
    };

    let mut message = subject;
    for body in updates.iter().flat_map(|u| u.messages.iter()) {
        message.push_str("\n\n");
        message.push_str(body.trim_end());
    }
    message.push('\n');
    for update in updates {
        message.push('\n');
        message.push_str(footers::PATCH_SET);
        message.push_str(": ");
        message.push_str(&update.patch_set.num.to_string());
        for footer in &update.footers {
            message.push('\n');
            message.push_str(&footer.key);
            message.push_str(": ");
            message.push_str(&footer.value);
        }
    }
    message.push('\n');
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchName, ChangeKey, Project};
    use revu_git::RefUpdate;
    use tempfile::TempDir;

    fn when() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn ident() -> PersonIdent {
        PersonIdent::new("Server", "server@example.com", when())
    }

    fn new_notes(commit: Oid) -> ChangeNotes {
        let change = Change {
            id: ChangeId(5),
            key: ChangeKey::from_commit(commit),
            project: Project::new("demo").unwrap(),
            dest: BranchName::new("main"),
            owner: AccountId(100),
            status: ChangeStatus::New,
            current_patch_set: 1,
            subject: "Add feature".into(),
            topic: None,
            work_in_progress: false,
            private: false,
            created_on: when(),
            last_updated_on: when(),
        };
        ChangeNotes::new(change)
    }

    #[test]
    fn test_write_and_load() {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init_bare(temp.path().join("demo.git")).unwrap();
        let commit = repo.empty_tree().unwrap();

        let mut notes = new_notes(commit);
        let ps_id = PatchSetId::new(ChangeId(5), 1);
        let mut update = ChangeUpdate::new(ps_id);
        {
            let mut u = ChangeUpdater::new(&mut notes, &mut update, Some(AccountId(100)), when());
            u.create_change();
            u.add_patch_set(PatchSet {
                id: ps_id,
                commit,
                uploader: AccountId(100),
                created_on: when(),
                groups: PatchSet::default_groups(commit),
                description: None,
            });
            u.put_reviewer(AccountId(200), ReviewerState::Reviewer);
            u.put_approval(AccountId(200), "Code-Review", 1);
            u.add_change_message("Uploaded patch set 1.", None);
        }

        let meta = write_meta_commit(&repo, &notes, &[update], &ident(), &ident()).unwrap();
        let mut tx = repo.ref_transaction();
        tx.add(RefUpdate::create(ChangeId(5).meta_ref(), meta)).unwrap();
        tx.commit(&ident()).unwrap();

        let loaded = ChangeNotes::load_required(&repo, ChangeId(5)).unwrap();
        assert_eq!(loaded.meta_id(), Some(meta));
        assert_eq!(loaded.current_patch_set().unwrap().commit, commit);
        assert_eq!(loaded.reviewers_in(ReviewerState::Reviewer), vec![AccountId(200)]);
        assert_eq!(loaded.approvals_on(ps_id).count(), 1);
        assert_eq!(loaded.messages.len(), 1);

        let info = repo.commit_info(meta).unwrap();
        assert_eq!(info.subject(), "Create change");
        assert!(info.message.contains("Patch-set: 1\n"));
        assert!(info.message.contains("Reviewer: user 200\n"));
        assert!(info.message.contains("Label: Code-Review+1 user 200\n"));

        let all = ChangeNotes::load_all(&repo).unwrap();
        assert_eq!(all.keys().copied().collect::<Vec<_>>(), vec![ChangeId(5)]);
    }

    #[test]
    fn test_missing_change() {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init_bare(temp.path().join("demo.git")).unwrap();
        assert!(ChangeNotes::load(&repo, ChangeId(1)).unwrap().is_none());
        assert!(matches!(
            ChangeNotes::load_required(&repo, ChangeId(1)),
            Err(Error::ChangeNotFound(ChangeId(1)))
        ));
    }

    #[test]
    fn test_zero_vote_removes() {
        let commit = Oid::zero();
        let mut notes = new_notes(commit);
        let ps_id = PatchSetId::new(ChangeId(5), 1);
        let mut update = ChangeUpdate::new(ps_id);
        let mut u = ChangeUpdater::new(&mut notes, &mut update, Some(AccountId(1)), when());
        u.put_approval(AccountId(1), "Verified", 1);
        u.put_approval(AccountId(1), "Verified", 0);
        assert!(u.notes().approvals.is_empty());
        assert_eq!(update.footers().len(), 2);
    }
}
