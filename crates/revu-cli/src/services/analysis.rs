//! Read-only merge analysis: change kind and mergeability.

use anyhow::{Context, Result};
use revu_core::{ChangeId, ChangeKind, ChangeNotes, Project, Services, SiteStore, SubmitType};
use serde::Serialize;

/// Classification of `prior -> next`.
#[derive(Debug, Clone, Serialize)]
pub struct KindReport {
    pub prior: String,
    pub next: String,
    pub kind: ChangeKind,
}

/// Predicted submit outcome of a change's current patch set.
#[derive(Debug, Clone, Serialize)]
pub struct MergeabilityReport {
    pub change: ChangeId,
    pub patch_set: u32,
    pub commit: String,
    pub branch: String,
    /// `None` when the branch does not exist yet.
    pub tip: Option<String>,
    pub submit_type: String,
    pub mergeable: bool,
}

/// Service answering analysis queries through the shared caches.
pub struct AnalysisService<'a, S: SiteStore> {
    store: &'a S,
    services: &'a Services,
}

impl<'a, S: SiteStore> AnalysisService<'a, S> {
    pub const fn new(store: &'a S, services: &'a Services) -> Self {
        Self { store, services }
    }

    /// Classify `next` as a new patch set replacing `prior`.
    pub fn kind(&self, project: &Project, prior: &str, next: &str) -> Result<KindReport> {
        let repo = self.store.open_project(project)?;
        let prior = repo
            .resolve_commit(prior)
            .with_context(|| format!("Unknown revision: {prior}"))?;
        let next = repo
            .resolve_commit(next)
            .with_context(|| format!("Unknown revision: {next}"))?;
        let kind = self.services.change_kind.get(&repo, Some(prior), next);
        Ok(KindReport {
            prior: prior.to_string(),
            next: next.to_string(),
            kind,
        })
    }

    /// Predict whether the change's current patch set merges into its
    /// destination branch with `submit_type`.
    pub fn mergeable(
        &self,
        project: &Project,
        id: ChangeId,
        submit_type: SubmitType,
    ) -> Result<MergeabilityReport> {
        let repo = self.store.open_project(project)?;
        let notes = ChangeNotes::load_required(&repo, id)?;
        let ps = notes.require_current_patch_set()?;
        let branch = &notes.change.dest;
        let tip = repo.exact_ref(branch.as_ref_name())?;
        let mergeable = self.services.mergeability.get(
            &repo,
            ps.commit,
            tip,
            submit_type,
            self.services.strategy(),
        );
        Ok(MergeabilityReport {
            change: id,
            patch_set: ps.id.num,
            commit: ps.commit.to_string(),
            branch: branch.short_name().to_string(),
            tip: tip.map(|t| t.to_string()),
            submit_type: submit_type.to_string(),
            mergeable,
        })
    }
}
