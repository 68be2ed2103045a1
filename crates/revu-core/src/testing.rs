//! Test fixtures shared by unit tests.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use revu_git::{NewCommit, Oid, PersonIdent, RefUpdate, Repository};
use tempfile::TempDir;

use crate::config::Config;
use crate::error::Result;
use crate::events::{ChangeEvent, EventListener};
use crate::model::{Account, AccountId, BranchName, ChangeId, CurrentUser, Project};
use crate::notify::{EmailJob, EmailSender};
use crate::ops::{AbandonOp, ChangeInserter};
use crate::sequence::Sequences;
use crate::services::Services;
use crate::update::BatchUpdate;

/// Fixed clock for deterministic commits.
pub const EPOCH: i64 = 1_700_000_000;

pub fn when() -> DateTime<Utc> {
    at(EPOCH)
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn account(id: u32) -> Account {
    Account {
        id: AccountId(id),
        name: format!("User {id}"),
        email: format!("user{id}@example.com"),
    }
}

pub fn user(id: u32) -> CurrentUser {
    CurrentUser::Identified(account(id))
}

pub fn project() -> Project {
    Project::new("demo").unwrap()
}

/// A bare repository in a temp directory.
pub struct TestRepo {
    pub repo: Repository,
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path().join("demo.git")).unwrap();
        Self { repo, dir }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn commit(&self, parents: &[Oid], files: &[(&str, &str)], message: &str) -> Oid {
        self.commit_at(parents, files, message, EPOCH)
    }

    pub fn commit_at(
        &self,
        parents: &[Oid],
        files: &[(&str, &str)],
        message: &str,
        secs: i64,
    ) -> Oid {
        let entries: Vec<(&str, &[u8])> = files.iter().map(|(p, c)| (*p, c.as_bytes())).collect();
        let tree = self.repo.write_flat_tree(&entries).unwrap();
        let who = PersonIdent::new("Author", "author@example.com", at(secs));
        self.repo
            .write_commit(&NewCommit {
                tree,
                parents,
                author: &who,
                committer: &who,
                message,
            })
            .unwrap()
    }

    /// Point `name` at `target`, creating or moving it.
    pub fn set_ref(&self, name: &str, target: Oid) {
        let old = self.repo.exact_ref(name).unwrap();
        let mut tx = self.repo.ref_transaction();
        tx.add(RefUpdate {
            name: name.to_string(),
            old,
            new: Some(target),
        })
        .unwrap();
        tx.commit(&PersonIdent::new("Test", "test@example.com", when()))
            .unwrap();
    }
}

/// Services with an in-memory cache, recording listener and sender.
pub struct TestSite {
    pub repo: TestRepo,
    pub services: Services,
    pub listener: Arc<RecordingListener>,
    pub sender: Arc<RecordingSender>,
}

impl TestSite {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let listener = Arc::new(RecordingListener::default());
        let sender = Arc::new(RecordingSender::default());
        let services = Services::builder(config)
            .listener(listener.clone())
            .sender(sender.clone())
            .synchronous_email(true)
            .build()
            .unwrap();
        Self {
            repo: TestRepo::new(),
            services,
            listener,
            sender,
        }
    }
}

/// A batch acting as `user(id)` at the fixed clock.
pub fn batch(site: &TestSite, id: u32) -> BatchUpdate<'_> {
    BatchUpdate::new(&site.repo.repo, &site.services, project(), user(id), when())
}

/// Create a change on `main` owned by user 1 for `commit`.
pub fn create_change(site: &TestSite, commit: Oid) -> ChangeId {
    let id = Sequences::new(&site.repo.repo, site.services.server_ident(when()))
        .next_change_id()
        .unwrap();
    let mut batch = batch(site, 1);
    batch.insert_change(ChangeInserter::new(id, commit, BranchName::new("main")));
    batch.execute().unwrap();
    id
}

/// Abandon `id` as its owner.
pub fn abandon(site: &TestSite, id: ChangeId) {
    let mut batch = batch(site, 1);
    batch.add_op(id, AbandonOp::default());
    batch.execute().unwrap();
}

/// Records every event it sees.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(ChangeEvent::name).collect()
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &ChangeEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Records every email job instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingSender {
    jobs: Mutex<Vec<EmailJob>>,
}

impl RecordingSender {
    pub fn jobs(&self) -> Vec<EmailJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EmailSender for RecordingSender {
    fn send(&self, job: &EmailJob) -> Result<()> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job.clone());
        Ok(())
    }
}
