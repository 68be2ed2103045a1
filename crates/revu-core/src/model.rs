//! Change, patch set and account model.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use revu_git::{Oid, PersonIdent};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix of all change refs.
pub const CHANGES_PREFIX: &str = "refs/changes/";

/// Numeric change identifier, unique within a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub u32);

impl ChangeId {
    /// `refs/changes/<nn>/<id>/`, where `nn` is the last two digits.
    #[must_use]
    pub fn ref_prefix(self) -> String {
        format!("{CHANGES_PREFIX}{:02}/{}/", self.0 % 100, self.0)
    }

    /// Ref holding the change's metadata history.
    #[must_use]
    pub fn meta_ref(self) -> String {
        format!("{}meta", self.ref_prefix())
    }

    /// Parse `refs/changes/<nn>/<id>/meta`.
    #[must_use]
    pub fn from_meta_ref(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(CHANGES_PREFIX)?.strip_suffix("/meta")?;
        let (shard, id) = rest.split_once('/')?;
        let id: u32 = id.parse().ok()?;
        (shard == format!("{:02}", id % 100)).then_some(Self(id))
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u32>()
            .ok()
            .filter(|id| *id > 0)
            .map(Self)
            .ok_or_else(|| Error::BadRequest(format!("invalid change number: {s}")))
    }
}

/// Patch set identifier: change plus 1-based sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatchSetId {
    pub change: ChangeId,
    pub num: u32,
}

impl PatchSetId {
    #[must_use]
    pub const fn new(change: ChangeId, num: u32) -> Self {
        Self { change, num }
    }

    /// The following patch set of the same change.
    #[must_use]
    pub const fn next(self) -> Self {
        Self::new(self.change, self.num + 1)
    }

    /// `refs/changes/<nn>/<id>/<num>`.
    #[must_use]
    pub fn ref_name(self) -> String {
        format!("{}{}", self.change.ref_prefix(), self.num)
    }

    /// Parse a patch set ref. Returns `None` for meta refs and other names.
    #[must_use]
    pub fn from_ref(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(CHANGES_PREFIX)?;
        let mut parts = rest.split('/');
        let shard = parts.next()?;
        let change: u32 = parts.next()?.parse().ok()?;
        let num: u32 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || shard != format!("{:02}", change % 100) || num == 0 {
            return None;
        }
        Some(Self::new(ChangeId(change), num))
    }
}

impl fmt::Display for PatchSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.change, self.num)
    }
}

/// Numeric account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user account with its commit identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub email: String,
}

impl Account {
    /// Commit identity of this account at `when`.
    #[must_use]
    pub fn ident(&self, when: DateTime<Utc>) -> PersonIdent {
        PersonIdent::new(&self.name, &self.email, when)
    }
}

/// The user on whose behalf an update runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentUser {
    /// A real account.
    Identified(Account),
    /// The server itself (e.g. merged-by-push bookkeeping).
    Internal,
}

impl CurrentUser {
    #[must_use]
    pub const fn account_id(&self) -> Option<AccountId> {
        match self {
            Self::Identified(a) => Some(a.id),
            Self::Internal => None,
        }
    }

    /// Account id, or `BadRequest` for the internal user.
    ///
    /// # Errors
    /// Returns error when the user is the internal user.
    pub fn require_account(&self) -> Result<AccountId> {
        self.account_id()
            .ok_or_else(|| Error::BadRequest("operation requires an identified user".into()))
    }
}

/// Name of a hosted project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Project(String);

impl Project {
    /// Create a project name.
    ///
    /// # Errors
    /// Returns `BadRequest` for empty names or names that escape the site.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let name = name.trim_end_matches(".git").trim_matches('/').to_string();
        if name.is_empty()
            || name.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(Error::BadRequest(format!("invalid project name: {name}")));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully-qualified branch ref name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchName(String);

impl BranchName {
    /// Normalize `main` to `refs/heads/main`; full ref names pass through.
    #[must_use]
    pub fn new(name: &str) -> Self {
        if name.starts_with("refs/") {
            Self(name.to_string())
        } else {
            Self(format!("refs/heads/{name}"))
        }
    }

    /// Full ref name.
    #[must_use]
    pub fn as_ref_name(&self) -> &str {
        &self.0
    }

    /// Name with `refs/heads/` stripped.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.0.strip_prefix("refs/heads/").unwrap_or(&self.0)
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Stable change key (`I` followed by 40 hex digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeKey(String);

impl ChangeKey {
    /// Parse a key, validating its shape.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('I')?;
        (hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| Self(format!("I{}", hex.to_ascii_lowercase())))
    }

    /// Key derived from a commit id, used when the message carries none.
    #[must_use]
    pub fn from_commit(commit: Oid) -> Self {
        Self(format!("I{commit}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    New,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::New)
    }

    /// Lower-case name used in messages and footers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Merged => "merged",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutable review unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub key: ChangeKey,
    pub project: Project,
    pub dest: BranchName,
    pub owner: AccountId,
    pub status: ChangeStatus,
    /// Number of the current patch set.
    pub current_patch_set: u32,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub work_in_progress: bool,
    #[serde(default)]
    pub private: bool,
    pub created_on: DateTime<Utc>,
    pub last_updated_on: DateTime<Utc>,
}

impl Change {
    #[must_use]
    pub const fn current_patch_set_id(&self) -> PatchSetId {
        PatchSetId::new(self.id, self.current_patch_set)
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.status.is_open()
    }

    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.status == ChangeStatus::Merged
    }

    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.status == ChangeStatus::Abandoned
    }
}

/// Immutable snapshot of one revision of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub id: PatchSetId,
    #[serde(with = "oid_hex")]
    pub commit: Oid,
    pub uploader: AccountId,
    pub created_on: DateTime<Utc>,
    /// Relation-chain groups.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PatchSet {
    /// Default groups for a commit that starts a new relation chain.
    #[must_use]
    pub fn default_groups(commit: Oid) -> Vec<String> {
        vec![commit.to_string()]
    }
}

/// Role of an account on a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewerState {
    Reviewer,
    Cc,
    Removed,
}

impl ReviewerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reviewer => "REVIEWER",
            Self::Cc => "CC",
            Self::Removed => "REMOVED",
        }
    }
}

/// A label vote on a patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSetApproval {
    pub patch_set: PatchSetId,
    pub account: AccountId,
    pub label: String,
    pub value: i16,
    pub granted: DateTime<Utc>,
    /// Carried over from an earlier patch set.
    #[serde(default)]
    pub copied: bool,
}

impl PatchSetApproval {
    /// `Code-Review+2` style rendering.
    #[must_use]
    pub fn label_vote(&self) -> String {
        format_vote(&self.label, self.value)
    }
}

/// Render a vote as `Label+N`, `Label-N` or `Label=0`.
#[must_use]
pub fn format_vote(label: &str, value: i16) -> String {
    match value {
        v if v > 0 => format!("{label}+{v}"),
        0 => format!("{label}=0"),
        v => format!("{label}{v}"),
    }
}

/// A message posted on a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AccountId>,
    pub message: String,
    pub written_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_set: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Collect distinct accounts, preserving first-seen order.
#[must_use]
pub fn dedup_accounts(accounts: &[AccountId]) -> Vec<AccountId> {
    let mut seen = BTreeSet::new();
    accounts.iter().copied().filter(|a| seen.insert(*a)).collect()
}

pub(crate) mod oid_hex {
    use revu_git::Oid;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(oid: &Oid, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&oid.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Oid, D::Error> {
        let s = String::deserialize(d)?;
        Oid::from_str(&s).map_err(serde::de::Error::custom)
    }
}
