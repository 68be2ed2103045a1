//! `revu project` commands.

use anyhow::Result;
use revu_core::{BranchName, Site};

use super::GlobalArgs;
use super::utils::parse_project;
use crate::output;

/// Create a project, with `branch` at an empty root commit unless `empty`.
pub fn create(global: &GlobalArgs, name: &str, branch: &str, empty: bool) -> Result<()> {
    let site = Site::open(&global.site)?;
    let project = parse_project(name)?;
    let branch = (!empty).then(|| BranchName::new(branch));

    site.create_project(&project, branch.as_ref())?;

    output::success(&format!("Created project {project}"));
    if let Some(branch) = branch {
        output::detail(&format!("  branch {branch}"));
    }
    Ok(())
}

/// List projects, one per line.
pub fn list(global: &GlobalArgs) -> Result<()> {
    let site = Site::open(&global.site)?;
    let projects = site.list_projects()?;
    if projects.is_empty() {
        output::info("No projects yet. Use `revu project create <name>` to add one.");
        return Ok(());
    }
    for project in projects {
        output::essential(project.name());
    }
    Ok(())
}
