//! Site directory layout.
//!
//! ```text
//! <site>/etc/revu.toml     configuration
//! <site>/git/<name>.git    bare project repositories
//! <site>/cache/            persisted caches
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use revu_git::{NewCommit, RefUpdate, Repository};
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{BranchName, Project};
use crate::services::{Services, ServicesBuilder};

/// A revu site rooted at one directory.
#[derive(Debug, Clone)]
pub struct Site {
    root: PathBuf,
}

impl Site {
    const ETC_DIR: &'static str = "etc";
    const GIT_DIR: &'static str = "git";
    const CACHE_DIR: &'static str = "cache";
    const CONFIG_FILE: &'static str = "revu.toml";

    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open an initialized site.
    ///
    /// # Errors
    /// Returns `NotInitialized` if `root` holds no site.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let site = Self::new(root);
        if !site.is_initialized() {
            return Err(Error::NotInitialized(site.root));
        }
        Ok(site)
    }

    /// Create the directory layout and a default config.
    ///
    /// # Errors
    /// Returns `AlreadyInitialized` if a config exists, or an IO error.
    pub fn init(&self) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::AlreadyInitialized(self.root.clone()));
        }
        fs::create_dir_all(self.root.join(Self::ETC_DIR))?;
        fs::create_dir_all(self.git_dir())?;
        fs::create_dir_all(self.cache_dir())?;
        Config::default().save(self.config_path())?;
        info!(site = %self.root.display(), "initialized site");
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.config_path().exists()
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn config_path(&self) -> PathBuf {
        self.root.join(Self::ETC_DIR).join(Self::CONFIG_FILE)
    }

    fn git_dir(&self) -> PathBuf {
        self.root.join(Self::GIT_DIR)
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(Self::CACHE_DIR)
    }

    fn project_path(&self, project: &Project) -> PathBuf {
        self.git_dir().join(format!("{}.git", project.name()))
    }

    /// # Errors
    /// Returns error if the config cannot be read or parsed.
    pub fn load_config(&self) -> Result<Config> {
        Config::load(self.config_path())
    }

    /// # Errors
    /// Returns error if the config cannot be written.
    pub fn save_config(&self, config: &Config) -> Result<()> {
        config.save(self.config_path())
    }

    /// Services for this site, with caches persisted under `cache/`.
    ///
    /// # Errors
    /// Returns error if the config cannot be loaded.
    pub fn services_builder(&self) -> Result<ServicesBuilder> {
        Ok(Services::builder(self.load_config()?).cache_dir(self.cache_dir()))
    }

    /// Create a bare project repository. With `initial_branch`, the branch
    /// starts at an empty root commit.
    ///
    /// # Errors
    /// Returns `ProjectExists` if the repository is already there.
    pub fn create_project(
        &self,
        project: &Project,
        initial_branch: Option<&BranchName>,
    ) -> Result<Repository> {
        let path = self.project_path(project);
        if path.exists() {
            return Err(Error::ProjectExists(project.to_string()));
        }
        let repo = Repository::init_bare(&path)?;

        if let Some(branch) = initial_branch {
            let config = self.load_config()?;
            let ident = config.server.ident(Utc::now());
            let tree = repo.empty_tree()?;
            let root = repo.write_commit(&NewCommit {
                tree,
                parents: &[],
                author: &ident,
                committer: &ident,
                message: "Initial empty repository\n",
            })?;
            let mut tx = repo.ref_transaction();
            tx.add(RefUpdate::create(branch.as_ref_name(), root))?;
            tx.commit(&ident)?;
        }
        info!(%project, "created project");
        Ok(repo)
    }

    /// # Errors
    /// Returns `ProjectNotFound` if there is no such repository.
    pub fn open_project(&self, project: &Project) -> Result<Repository> {
        let path = self.project_path(project);
        if !path.exists() {
            return Err(Error::ProjectNotFound(project.to_string()));
        }
        Ok(Repository::open(path)?)
    }

    /// Names of all projects, sorted.
    ///
    /// # Errors
    /// Returns error if the git directory cannot be listed.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        collect_projects(&self.git_dir(), &self.git_dir(), &mut projects)?;
        projects.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(projects)
    }
}

fn collect_projects(root: &Path, dir: &Path, out: &mut Vec<Project>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let is_repo = path.extension().is_some_and(|ext| ext == "git");
        if !is_repo {
            collect_projects(root, &path, out)?;
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root)
            && let Some(name) = rel.to_str()
        {
            out.push(Project::new(name)?);
        }
    }
    Ok(())
}
