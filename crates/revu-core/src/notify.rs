//! Email notification jobs and their background dispatch.
//!
//! Ops enqueue an [`EmailJob`] from their post-update phase. Jobs run on a
//! small tokio worker pool; the caller only waits when it asks for a
//! synchronous send, and then at most `sync_timeout`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::error::{Error, Result};
use crate::model::{AccountId, ChangeId, Project};

/// Who receives notifications for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyHandling {
    /// Send nothing.
    None,
    /// Only the change owner.
    Owner,
    /// Owner, reviewers and CCs.
    #[default]
    All,
}

impl std::str::FromStr for NotifyHandling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "owner" => Ok(Self::Owner),
            "all" => Ok(Self::All),
            _ => Err(Error::BadRequest(format!("invalid notify handling: {s}"))),
        }
    }
}

/// Kind of email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    NewChange,
    ReplacePatchSet,
    Abandoned,
    Merged,
    Deleted,
    AddReviewer,
    DeleteReviewer,
    Vote,
}

/// One email to compose and deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailJob {
    pub kind: EmailKind,
    pub project: Project,
    pub change: ChangeId,
    pub subject: String,
    pub from: Option<AccountId>,
    pub to: Vec<AccountId>,
    pub message: Option<String>,
}

impl EmailJob {
    /// Narrow recipients according to `handling`. Returns `None` when
    /// nobody is left.
    #[must_use]
    pub fn addressed(
        mut self,
        handling: NotifyHandling,
        owner: AccountId,
        interested: &[AccountId],
    ) -> Option<Self> {
        self.to = match handling {
            NotifyHandling::None => return None,
            NotifyHandling::Owner => vec![owner],
            NotifyHandling::All => interested.to_vec(),
        };
        // Never notify the actor about their own action.
        if let Some(from) = self.from {
            self.to.retain(|a| *a != from);
        }
        (!self.to.is_empty()).then_some(self)
    }
}

/// Delivers composed emails.
pub trait EmailSender: Send + Sync {
    /// Send one job.
    ///
    /// # Errors
    /// Failures are logged by the dispatcher.
    fn send(&self, job: &EmailJob) -> Result<()>;
}

/// Writes every job to the log instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

impl EmailSender for LogSender {
    fn send(&self, job: &EmailJob) -> Result<()> {
        info!(
            kind = ?job.kind,
            project = %job.project,
            change = %job.change,
            recipients = job.to.len(),
            subject = %job.subject,
            "email"
        );
        Ok(())
    }
}

/// Runs email jobs on a background worker pool.
pub struct NotificationDispatcher {
    runtime: tokio::runtime::Runtime,
    sender: Arc<dyn EmailSender>,
    sync_timeout: Duration,
}

impl NotificationDispatcher {
    /// Start the worker pool.
    ///
    /// # Errors
    /// Returns error if the runtime cannot be built.
    pub fn new(config: &NotifyConfig, sender: Arc<dyn EmailSender>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .max_blocking_threads(config.worker_threads.max(1))
            .thread_name("revu-notify")
            .enable_time()
            .build()?;
        Ok(Self {
            runtime,
            sender,
            sync_timeout: Duration::from_millis(config.sync_timeout_ms),
        })
    }

    /// Queue a job. With `wait`, block until it is sent or the sync timeout
    /// elapses; failures and timeouts are logged, never returned.
    pub fn dispatch(&self, job: EmailJob, wait: bool) {
        let sender = Arc::clone(&self.sender);
        let handle = self.runtime.spawn_blocking(move || {
            if let Err(e) = sender.send(&job) {
                warn!(change = %job.change, kind = ?job.kind, error = %e, "email delivery failed");
            }
        });
        if !wait {
            return;
        }

        let timeout = self.sync_timeout;
        let outcome = self
            .runtime
            .block_on(async move { tokio::time::timeout(timeout, handle).await });
        match outcome {
            Ok(Ok(())) => debug!("email sent synchronously"),
            Ok(Err(e)) => warn!(error = %e, "email task failed"),
            Err(_) => warn!(timeout_ms = timeout.as_millis(), "timed out waiting for email"),
        }
    }

    /// Stop accepting work and wait up to `timeout` for queued jobs.
    pub fn shutdown(self, timeout: Duration) {
        self.runtime.shutdown_timeout(timeout);
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("sync_timeout", &self.sync_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSender;

    fn job() -> EmailJob {
        EmailJob {
            kind: EmailKind::Abandoned,
            project: Project::new("p").unwrap(),
            change: ChangeId(1),
            subject: "Subject".into(),
            from: Some(AccountId(1)),
            to: vec![],
            message: None,
        }
    }

    #[test]
    fn test_addressing() {
        let interested = [AccountId(1), AccountId(2), AccountId(3)];
        assert!(job().addressed(NotifyHandling::None, AccountId(1), &interested).is_none());
        // Owner is the actor, so nobody is left.
        assert!(job().addressed(NotifyHandling::Owner, AccountId(1), &interested).is_none());
        let all = job()
            .addressed(NotifyHandling::All, AccountId(1), &interested)
            .unwrap();
        assert_eq!(all.to, vec![AccountId(2), AccountId(3)]);
    }

    #[test]
    fn test_sync_dispatch_delivers() {
        let sender = Arc::new(RecordingSender::default());
        let dispatcher =
            NotificationDispatcher::new(&NotifyConfig::default(), sender.clone()).unwrap();
        dispatcher.dispatch(job(), true);
        assert_eq!(sender.jobs().len(), 1);
        dispatcher.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_async_dispatch_delivers_in_background() {
        let sender = Arc::new(RecordingSender::default());
        let dispatcher =
            NotificationDispatcher::new(&NotifyConfig::default(), sender.clone()).unwrap();
        dispatcher.dispatch(job(), false);
        for _ in 0..200 {
            if !sender.jobs().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sender.jobs().len(), 1);
        dispatcher.shutdown(Duration::from_secs(1));
    }
}
