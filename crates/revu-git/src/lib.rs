//! # revu-git
//!
//! Git object and ref store for revu, built on git2-rs.
//! Provides atomic multi-ref compare-and-swap transactions, throwaway
//! in-memory object stores for speculative work, and three-way merge
//! strategies with conflict-marker tree synthesis.

mod error;
mod merge;
mod refs;
mod repository;

pub use error::{Error, Result};
pub use git2;
pub use git2::Oid;
pub use merge::{
    ConflictedMerge, MarkedTree, MarkerLabels, MergeOutcome, MergeStrategy, ThreeWayMerger,
};
pub use refs::{RefTransaction, RefUpdate};
pub use repository::{CommitInfo, FILE_MODE, NewCommit, PersonIdent, Repository};
