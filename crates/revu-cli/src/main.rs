//! revu CLI - administer code-review changes in bare git repositories.

use clap::Parser;

mod commands;
mod output;
mod services;
mod telemetry;

use commands::{ChangeCommands, Cli, Commands, ProjectCommands, ReviewerCommands};

fn main() {
    let cli = Cli::parse();
    output::set_quiet(cli.global.quiet);
    telemetry::init(cli.global.log_json);

    let global = &cli.global;
    let result = match cli.command {
        Commands::Init => commands::init::run(global),
        Commands::Project { command } => match command {
            ProjectCommands::Create {
                name,
                branch,
                empty,
            } => commands::project::create(global, &name, &branch, empty),
            ProjectCommands::List => commands::project::list(global),
        },
        Commands::Change { command } => run_change(global, command),
        Commands::Kind {
            project,
            prior,
            next,
            json,
        } => commands::analyze::kind(global, &project, &prior, &next, json),
        Commands::Mergeable {
            project,
            change,
            submit_type,
            json,
        } => commands::analyze::mergeable(global, &project, change, &submit_type, json),
        Commands::Completions { shell } => commands::completions::run(shell),
    };

    if let Err(e) = result {
        output::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn run_change(global: &commands::GlobalArgs, command: ChangeCommands) -> anyhow::Result<()> {
    use commands::change;

    match command {
        ChangeCommands::Create(args) => change::create(global, &args),
        ChangeCommands::Show {
            project,
            change,
            json,
        } => change::show(global, &project, change, json),
        ChangeCommands::Abandon {
            project,
            change,
            message,
        } => change::abandon(global, &project, change, message),
        ChangeCommands::Rebase(args) => change::rebase(global, &args),
        ChangeCommands::Topic {
            project,
            change,
            topic,
        } => change::topic(global, &project, change, topic),
        ChangeCommands::Wip {
            project,
            change,
            message,
        } => change::work_in_progress(global, &project, change, true, message),
        ChangeCommands::Ready {
            project,
            change,
            message,
        } => change::work_in_progress(global, &project, change, false, message),
        ChangeCommands::Private {
            project,
            change,
            unset,
        } => change::private(global, &project, change, !unset),
        ChangeCommands::Reviewer { command } => match command {
            ReviewerCommands::Add {
                project,
                change,
                accounts,
                cc,
            } => change::add_reviewers(global, &project, change, accounts, cc),
            ReviewerCommands::Remove {
                project,
                change,
                account,
            } => change::remove_reviewer(global, &project, change, account),
        },
        ChangeCommands::Vote {
            project,
            change,
            label,
            value,
        } => change::vote(global, &project, change, &label, value),
        ChangeCommands::Merged {
            project,
            change,
            patch_set,
        } => change::merged(global, &project, change, patch_set),
        ChangeCommands::Delete { project, change } => change::delete(global, &project, change),
    }
}
