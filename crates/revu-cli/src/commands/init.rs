//! `revu init` command - Initialize a site directory.

use anyhow::Result;
use revu_core::Site;

use super::GlobalArgs;
use crate::output;

/// Run the init command.
pub fn run(global: &GlobalArgs) -> Result<()> {
    let site = Site::new(&global.site);

    if site.is_initialized() {
        output::warn(&format!(
            "Site is already initialized at {}",
            site.root().display()
        ));
        return Ok(());
    }

    site.init()?;

    output::success(&format!("Initialized site at {}", site.root().display()));
    output::info(&format!(
        "Configuration in {}",
        site.root().join("etc/revu.toml").display()
    ));
    Ok(())
}
