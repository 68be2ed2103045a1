use anyhow::{Context, Result, bail};
use revu_core::{Account, AccountId, CurrentUser, Project, Services, Site};

use super::GlobalArgs;

/// An opened site with its services and acting user.
pub struct Session {
    pub site: Site,
    pub services: Services,
    pub user: CurrentUser,
}

impl Session {
    /// Open the site named by `--site` and build its services.
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let site = Site::open(&global.site)?;
        let services = site
            .services_builder()?
            .build()
            .context("Failed to start site services")?;
        Ok(Self {
            site,
            services,
            user: current_user(global)?,
        })
    }

    /// Persist caches and drain queued email.
    pub fn close(self) -> Result<()> {
        self.services.shutdown()?;
        Ok(())
    }
}

/// The acting user from the global flags. Without `--user-id` commands run
/// as the server.
pub fn current_user(global: &GlobalArgs) -> Result<CurrentUser> {
    let Some(id) = global.user_id else {
        if global.user_name.is_some() || global.user_email.is_some() {
            bail!("--user-name and --user-email require --user-id");
        }
        return Ok(CurrentUser::Internal);
    };
    Ok(CurrentUser::Identified(Account {
        id: AccountId(id),
        name: global
            .user_name
            .clone()
            .unwrap_or_else(|| format!("User {id}")),
        email: global
            .user_email
            .clone()
            .unwrap_or_else(|| format!("user{id}@localhost")),
    }))
}

pub fn parse_project(name: &str) -> Result<Project> {
    Project::new(name).with_context(|| format!("Invalid project name: {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(user_id: Option<u32>, user_name: Option<&str>) -> GlobalArgs {
        GlobalArgs {
            site: PathBuf::from("."),
            user_id,
            user_name: user_name.map(String::from),
            user_email: None,
            quiet: false,
            log_json: false,
        }
    }

    #[test]
    fn test_internal_user_without_id() {
        assert_eq!(current_user(&args(None, None)).unwrap(), CurrentUser::Internal);
    }

    #[test]
    fn test_identified_user_defaults() {
        let CurrentUser::Identified(account) = current_user(&args(Some(5), None)).unwrap() else {
            panic!("expected an identified user");
        };
        assert_eq!(account.id, AccountId(5));
        assert_eq!(account.name, "User 5");
        assert_eq!(account.email, "user5@localhost");
    }

    #[test]
    fn test_name_without_id_rejected() {
        assert!(current_user(&args(None, Some("Alice"))).is_err());
    }
}
