//! `revu kind` and `revu mergeable` - merge analysis queries.

use anyhow::Result;
use colored::Colorize;
use revu_core::{ChangeId, SubmitType};

use super::GlobalArgs;
use super::utils::{Session, parse_project};
use crate::output;
use crate::services::AnalysisService;

/// Classify `next` as a new patch set replacing `prior`.
pub fn kind(global: &GlobalArgs, project: &str, prior: &str, next: &str, json: bool) -> Result<()> {
    let project = parse_project(project)?;
    let session = Session::open(global)?;
    let report = AnalysisService::new(&session.site, &session.services).kind(&project, prior, next);
    session.close()?;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    output::essential(report.kind.as_str());
    output::detail(&format!(
        "  {} -> {}  {}",
        &report.prior[..12],
        &report.next[..12],
        output::kind(report.kind)
    ));
    Ok(())
}

/// Predict whether a change merges into its branch.
pub fn mergeable(
    global: &GlobalArgs,
    project: &str,
    change: u32,
    submit_type: &str,
    json: bool,
) -> Result<()> {
    let project = parse_project(project)?;
    let submit_type: SubmitType = submit_type.parse()?;
    let session = Session::open(global)?;
    let report = AnalysisService::new(&session.site, &session.services).mergeable(
        &project,
        ChangeId(change),
        submit_type,
    );
    session.close()?;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    output::essential(if report.mergeable { "mergeable" } else { "not mergeable" });
    let verdict = if report.mergeable {
        "merges cleanly".green()
    } else {
        "has conflicts".red()
    };
    output::detail(&format!(
        "  change {} ps {} into {} ({}): {verdict}",
        report.change, report.patch_set, report.branch, report.submit_type
    ));
    Ok(())
}
