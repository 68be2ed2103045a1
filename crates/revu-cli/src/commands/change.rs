//! `revu change` commands - create and edit changes.

use anyhow::Result;
use colored::Colorize;
use revu_core::ops::{
    AbandonOp, AddReviewersOp, DeleteChangeOp, DeleteReviewerOp, MarkMergedOp, PostVoteOp,
    SetPrivateOp, SetTopicOp, WorkInProgressOp,
};
use revu_core::{AccountId, ChangeId, ChangeNotes, ChangeResult, ReviewerState};
use revu_git::MergeStrategy;

use super::utils::{Session, parse_project};
use super::{CreateArgs, GlobalArgs, RebaseArgs};
use crate::output;
use crate::services::{ChangeService, CreateRequest, Outcome, RebaseRequest};

/// Run `f` against a change service, then shut the session down.
fn with_service<T>(
    global: &GlobalArgs,
    f: impl FnOnce(&ChangeService<'_, revu_core::Site>) -> Result<T>,
) -> Result<T> {
    let session = Session::open(global)?;
    let value = {
        let service = ChangeService::new(&session.site, &session.services, session.user.clone());
        f(&service)
    };
    session.close()?;
    value
}

/// Report a mutation: `done` on success, a notice when nothing changed.
fn report(id: ChangeId, outcome: &Outcome, done: &str) {
    match outcome.result {
        ChangeResult::Skipped => output::info(&format!("Change {id} unchanged")),
        ChangeResult::Deleted => output::success(&format!("Deleted change {id}")),
        ChangeResult::Upserted => output::success(&format!("Change {id}: {done}")),
    }
}

pub fn create(global: &GlobalArgs, args: &CreateArgs) -> Result<()> {
    let project = parse_project(&args.project)?;
    let request = CreateRequest {
        branch: args.branch.clone(),
        commit: args.commit.clone(),
        topic: args.topic.clone(),
        work_in_progress: args.wip,
        private: args.private,
        reviewers: args.reviewers.clone(),
    };
    let notes = with_service(global, |service| service.create(&project, &request))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&notes)?);
        return Ok(());
    }
    output::success(&format!(
        "Created change {} on {}",
        notes.change.id, notes.change.dest
    ));
    output::essential(&notes.change.id.to_string());
    Ok(())
}

pub fn show(global: &GlobalArgs, project: &str, change: u32, json: bool) -> Result<()> {
    let project = parse_project(project)?;
    let notes = with_service(global, |service| service.show(&project, ChangeId(change)))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&notes)?);
    } else {
        print_change(&notes);
    }
    Ok(())
}

fn print_change(notes: &ChangeNotes) {
    let change = &notes.change;
    println!();
    println!(
        "  {} {}  {}",
        format!("Change {}", change.id).bold(),
        output::status(change.status),
        change.subject
    );
    output::hr();
    output::detail(&format!("  project   {}", change.project));
    output::detail(&format!("  branch    {}", change.dest));
    output::detail(&format!("  key       {}", change.key.as_str()));
    output::detail(&format!("  owner     {}", change.owner.0));
    if let Some(topic) = &change.topic {
        output::detail(&format!("  topic     {topic}"));
    }
    let mut flags = Vec::new();
    if change.work_in_progress {
        flags.push("work in progress");
    }
    if change.private {
        flags.push("private");
    }
    if !flags.is_empty() {
        output::detail(&format!("  flags     {}", flags.join(", ")));
    }

    for ps in notes.patch_sets.values() {
        let marker = if ps.id.num == change.current_patch_set {
            "*"
        } else {
            " "
        };
        output::detail(&format!(
            "  {marker} ps {:<3} {}  {}",
            ps.id.num,
            ps.commit,
            ps.description.as_deref().unwrap_or_default()
        ));
    }

    for (account, state) in &notes.reviewers {
        if *state != ReviewerState::Removed {
            let role = state.as_str().to_lowercase();
            output::detail(&format!("  {role:<9} {}", account.0));
        }
    }

    let votes: Vec<String> = notes
        .approvals_on(change.current_patch_set_id())
        .map(|a| format!("{} by {}", output::vote(&a.label, a.value), a.account.0))
        .collect();
    if !votes.is_empty() {
        output::detail(&format!("  votes     {}", votes.join(", ")));
    }

    if let Some(last) = notes.messages.last() {
        output::hr();
        output::detail(&format!("  {}", last.message.replace('\n', "\n  ")));
    }
    println!();
}

pub fn abandon(
    global: &GlobalArgs,
    project: &str,
    change: u32,
    message: Option<String>,
) -> Result<()> {
    let project = parse_project(project)?;
    let id = ChangeId(change);
    let outcome = with_service(global, |service| {
        service.apply(&project, id, |_, _| Ok(AbandonOp::new(message.clone()).into()))
    })?;
    report(id, &outcome, "abandoned");
    Ok(())
}

pub fn rebase(global: &GlobalArgs, args: &RebaseArgs) -> Result<()> {
    let project = parse_project(&args.project)?;
    let id = ChangeId(args.change);
    let request = RebaseRequest {
        base: args.base.clone(),
        allow_conflicts: args.allow_conflicts,
        match_author_date: args.match_author_date,
        strategy: args
            .strategy
            .as_deref()
            .map(str::parse::<MergeStrategy>)
            .transpose()?,
    };
    let outcome = with_service(global, |service| service.rebase(&project, id, &request))?;

    let Some(notes) = &outcome.notes else {
        report(id, &outcome, "rebased");
        return Ok(());
    };
    let change = &notes.change;
    report(
        id,
        &outcome,
        &format!("rebased as patch set {}", change.current_patch_set),
    );
    if let Some(ps) = notes.current_patch_set() {
        output::essential(&ps.commit.to_string());
    }
    if change.work_in_progress
        && let Some(last) = notes.messages.last()
        && last.message.contains("conflicts")
    {
        output::warn("Rebased with conflicts; the change is now work in progress");
        output::detail(&last.message);
    }
    Ok(())
}

pub fn topic(
    global: &GlobalArgs,
    project: &str,
    change: u32,
    topic: Option<String>,
) -> Result<()> {
    let project = parse_project(project)?;
    let id = ChangeId(change);
    let outcome = with_service(global, |service| {
        service.apply(&project, id, |_, _| Ok(SetTopicOp::new(topic.clone()).into()))
    })?;
    let done = match outcome.notes.as_ref().and_then(|n| n.change.topic.as_deref()) {
        Some(topic) => format!("topic set to {topic}"),
        None => "topic removed".to_string(),
    };
    report(id, &outcome, &done);
    Ok(())
}

pub fn work_in_progress(
    global: &GlobalArgs,
    project: &str,
    change: u32,
    wip: bool,
    message: Option<String>,
) -> Result<()> {
    let project = parse_project(project)?;
    let id = ChangeId(change);
    let outcome = with_service(global, |service| {
        service.apply(&project, id, |_, _| {
            Ok(WorkInProgressOp::new(wip, message.clone()).into())
        })
    })?;
    let done = if wip {
        "work in progress"
    } else {
        "ready for review"
    };
    report(id, &outcome, done);
    Ok(())
}

pub fn private(global: &GlobalArgs, project: &str, change: u32, private: bool) -> Result<()> {
    let project = parse_project(project)?;
    let id = ChangeId(change);
    let outcome = with_service(global, |service| {
        service.apply(&project, id, |_, _| Ok(SetPrivateOp::new(private).into()))
    })?;
    report(id, &outcome, if private { "private" } else { "not private" });
    Ok(())
}

pub fn add_reviewers(
    global: &GlobalArgs,
    project: &str,
    change: u32,
    accounts: Vec<u32>,
    cc: bool,
) -> Result<()> {
    let project = parse_project(project)?;
    let id = ChangeId(change);
    let accounts: Vec<AccountId> = accounts.into_iter().map(AccountId).collect();
    let state = if cc {
        ReviewerState::Cc
    } else {
        ReviewerState::Reviewer
    };
    let outcome = with_service(global, |service| {
        service.apply(&project, id, |_, _| {
            Ok(AddReviewersOp::new(accounts.clone(), state).into())
        })
    })?;
    report(id, &outcome, &format!("{} added", state.as_str().to_lowercase()));
    Ok(())
}

pub fn remove_reviewer(
    global: &GlobalArgs,
    project: &str,
    change: u32,
    account: u32,
) -> Result<()> {
    let project = parse_project(project)?;
    let id = ChangeId(change);
    let outcome = with_service(global, |service| {
        service.apply(&project, id, |_, _| {
            Ok(DeleteReviewerOp::new(AccountId(account)).into())
        })
    })?;
    report(id, &outcome, &format!("removed reviewer {account}"));
    Ok(())
}

pub fn vote(
    global: &GlobalArgs,
    project: &str,
    change: u32,
    label: &str,
    value: i16,
) -> Result<()> {
    let project = parse_project(project)?;
    let id = ChangeId(change);
    let outcome = with_service(global, |service| {
        service.apply(&project, id, |_, _| Ok(PostVoteOp::new(label, value).into()))
    })?;
    report(id, &outcome, &output::vote(label, value));
    Ok(())
}

pub fn merged(
    global: &GlobalArgs,
    project: &str,
    change: u32,
    patch_set: Option<u32>,
) -> Result<()> {
    let project = parse_project(project)?;
    let id = ChangeId(change);
    let outcome = with_service(global, |service| {
        service.apply(&project, id, |_, notes| {
            let num = patch_set.unwrap_or(notes.change.current_patch_set);
            Ok(MarkMergedOp::new(num).into())
        })
    })?;
    report(id, &outcome, "merged");
    Ok(())
}

pub fn delete(global: &GlobalArgs, project: &str, change: u32) -> Result<()> {
    let project = parse_project(project)?;
    let id = ChangeId(change);
    let outcome = with_service(global, |service| {
        service.apply(&project, id, |_, _| Ok(DeleteChangeOp::new(id).into()))
    })?;
    report(id, &outcome, "deleted");
    Ok(())
}
