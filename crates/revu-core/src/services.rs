//! Long-lived collaborators shared by every batch update.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use revu_git::{MergeStrategy, PersonIdent};
use tracing::debug;

use crate::cache::PersistentCache;
use crate::change_kind::{self, ChangeKindCache};
use crate::config::Config;
use crate::error::Result;
use crate::events::{EventBus, EventListener};
use crate::mergeability::{self, MergeabilityCache};
use crate::notify::{EmailJob, EmailSender, LogSender, NotificationDispatcher};
use crate::permission::{AllowAll, PermissionBackend};
use crate::validation::{ChangeIdValidator, CommitValidator};

/// Configuration, policy hooks, caches and the notification pool.
pub struct Services {
    pub config: Config,
    pub permissions: Arc<dyn PermissionBackend>,
    pub validators: Vec<Arc<dyn CommitValidator>>,
    pub events: EventBus,
    pub change_kind: ChangeKindCache,
    pub mergeability: MergeabilityCache,
    strategy: MergeStrategy,
    notifier: NotificationDispatcher,
    synchronous_email: bool,
}

impl Services {
    #[must_use]
    pub fn builder(config: Config) -> ServicesBuilder {
        ServicesBuilder {
            config,
            permissions: Arc::new(AllowAll),
            validators: vec![Arc::new(ChangeIdValidator)],
            events: EventBus::new(),
            sender: Arc::new(LogSender),
            cache_dir: None,
            synchronous_email: false,
        }
    }

    /// Configured merge strategy.
    #[must_use]
    pub const fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// The server's own identity, used as committer of metadata commits.
    #[must_use]
    pub fn server_ident(&self, when: DateTime<Utc>) -> PersonIdent {
        self.config.server.ident(when)
    }

    /// Hand an email to the worker pool.
    pub fn send_email(&self, job: EmailJob) {
        self.notifier.dispatch(job, self.synchronous_email);
    }

    /// Persist caches and drain pending email.
    ///
    /// # Errors
    /// Returns error if a cache file cannot be written.
    pub fn shutdown(self) -> Result<()> {
        self.change_kind.flush()?;
        self.mergeability.flush()?;
        self.notifier
            .shutdown(Duration::from_millis(self.config.notify.sync_timeout_ms));
        Ok(())
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("strategy", &self.strategy)
            .field("validators", &self.validators.len())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Services`].
pub struct ServicesBuilder {
    config: Config,
    permissions: Arc<dyn PermissionBackend>,
    validators: Vec<Arc<dyn CommitValidator>>,
    events: EventBus,
    sender: Arc<dyn EmailSender>,
    cache_dir: Option<PathBuf>,
    synchronous_email: bool,
}

impl ServicesBuilder {
    #[must_use]
    pub fn permissions(mut self, permissions: Arc<dyn PermissionBackend>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Add a commit validator after the built-in ones.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn CommitValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.events.register(listener);
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.sender = sender;
        self
    }

    /// Persist caches under `dir`. Without it caches live in memory only.
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Wait for each email before returning from the batch.
    #[must_use]
    pub const fn synchronous_email(mut self, wait: bool) -> Self {
        self.synchronous_email = wait;
        self
    }

    /// # Errors
    /// Returns error for an unknown merge strategy or if the notification
    /// pool cannot start.
    pub fn build(self) -> Result<Services> {
        let strategy = self.config.merge.strategy()?;
        let max_object_size = self.config.merge.max_object_size;

        let kind_def =
            change_kind::CACHE_DEF.with_max_weight(self.config.cache.change_kind_max_weight);
        let merge_def =
            mergeability::CACHE_DEF.with_max_weight(self.config.cache.mergeability_max_weight);
        let (kind_cache, merge_cache) = match &self.cache_dir {
            Some(dir) => {
                debug!(dir = %dir.display(), "opening persistent caches");
                (
                    PersistentCache::open(kind_def, dir),
                    PersistentCache::open(merge_def, dir),
                )
            }
            None => (
                PersistentCache::in_memory(kind_def),
                PersistentCache::in_memory(merge_def),
            ),
        };

        let notifier = NotificationDispatcher::new(&self.config.notify, self.sender)?;
        Ok(Services {
            change_kind: ChangeKindCache::new(kind_cache, strategy, max_object_size),
            mergeability: MergeabilityCache::new(merge_cache, max_object_size),
            strategy,
            permissions: self.permissions,
            validators: self.validators,
            events: self.events,
            notifier,
            synchronous_email: self.synchronous_email,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_kind::ChangeKind;
    use crate::testing::TestRepo;

    #[test]
    fn test_caches_persist_across_services() {
        let t = TestRepo::new();
        let base = t.commit(&[], &[("a", "1\n")], "base\n");
        let next = t.commit_at(&[], &[("a", "1\n")], "base\n", 1);
        let cache_dir = t.dir().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();

        let services = Services::builder(Config::default())
            .cache_dir(&cache_dir)
            .build()
            .unwrap();
        assert_eq!(
            services.change_kind.get(&t.repo, Some(base), next),
            ChangeKind::NoChange
        );
        services.shutdown().unwrap();

        let services = Services::builder(Config::default())
            .cache_dir(&cache_dir)
            .build()
            .unwrap();
        assert_eq!(services.change_kind.peek(base, next), Some(ChangeKind::NoChange));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let mut config = Config::default();
        config.merge.strategy = "octopus".into();
        assert!(Services::builder(config).build().is_err());
    }
}
