//! # revu-core
//!
//! Core library for revu: the change model and its metadata history, the
//! batched three-phase update engine every mutation runs through, the
//! change-kind and mergeability caches, and rebase.

pub mod cache;
pub mod change_kind;
pub mod config;
pub mod error;
pub mod events;
pub mod footer;
pub mod mergeability;
pub mod model;
pub mod notes;
pub mod notify;
pub mod ops;
pub mod permission;
pub mod rebase;
pub mod sequence;
pub mod services;
pub mod site;
pub mod traits;
pub mod update;
pub mod validation;

#[cfg(test)]
mod testing;

pub use change_kind::{ChangeKind, ChangeKindCache};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use events::{ChangeEvent, EventListener};
pub use mergeability::{MergeabilityCache, SubmitType};
pub use model::{
    Account, AccountId, BranchName, Change, ChangeId, ChangeKey, ChangeStatus, CurrentUser,
    PatchSet, PatchSetId, Project, ReviewerState,
};
pub use notes::ChangeNotes;
pub use notify::NotifyHandling;
pub use ops::ChangeOp;
pub use rebase::{RebaseChangeOp, RebaseTarget, RebaseUtil};
pub use sequence::Sequences;
pub use services::Services;
pub use site::Site;
pub use traits::SiteStore;
pub use update::{BatchResult, BatchUpdate, ChangeResult, RetryHelper};
