//! Trait abstractions for site storage.
//!
//! `SiteStore` abstracts the site directory so commands can be driven
//! against a temporary or alternative layout.

use std::path::Path;

use revu_git::Repository;

use crate::Result;
use crate::config::Config;
use crate::model::{BranchName, Project};
use crate::site::Site;

/// Site-level storage: configuration and project repositories.
#[allow(clippy::missing_errors_doc)]
pub trait SiteStore {
    /// Check whether the site has been initialized.
    fn is_initialized(&self) -> bool;

    /// Create the site layout with a default configuration.
    fn init(&self) -> Result<()>;

    /// Root directory of the site.
    fn root(&self) -> &Path;

    fn load_config(&self) -> Result<Config>;

    fn save_config(&self, config: &Config) -> Result<()>;

    /// Create a project, optionally with an initial branch.
    fn create_project(
        &self,
        project: &Project,
        initial_branch: Option<&BranchName>,
    ) -> Result<Repository>;

    fn open_project(&self, project: &Project) -> Result<Repository>;

    fn list_projects(&self) -> Result<Vec<Project>>;
}

impl SiteStore for Site {
    fn is_initialized(&self) -> bool {
        Self::is_initialized(self)
    }

    fn init(&self) -> Result<()> {
        Self::init(self)
    }

    fn root(&self) -> &Path {
        Self::root(self)
    }

    fn load_config(&self) -> Result<Config> {
        Self::load_config(self)
    }

    fn save_config(&self, config: &Config) -> Result<()> {
        Self::save_config(self, config)
    }

    fn create_project(
        &self,
        project: &Project,
        initial_branch: Option<&BranchName>,
    ) -> Result<Repository> {
        Self::create_project(self, project, initial_branch)
    }

    fn open_project(&self, project: &Project) -> Result<Repository> {
        Self::open_project(self, project)
    }

    fn list_projects(&self) -> Result<Vec<Project>> {
        Self::list_projects(self)
    }
}
