//! Service layer for business logic with dependency injection.
//!
//! Services take the site through the [`SiteStore`](revu_core::SiteStore)
//! trait and return plain data, leaving presentation to the commands.

pub mod analysis;
pub mod change;

pub use analysis::AnalysisService;
pub use change::{ChangeService, CreateRequest, Outcome, RebaseRequest};
