//! Command-line definitions and command handlers.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

pub mod analyze;
pub mod change;
pub mod completions;
pub mod init;
pub mod project;
pub mod utils;

/// revu - code-review changes stored in bare git repositories.
#[derive(Debug, Parser)]
#[command(name = "revu", version, about, propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every command.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Site directory.
    #[arg(long, global = true, env = "REVU_SITE", default_value = ".")]
    pub site: PathBuf,

    /// Account acting on changes. Without it, commands run as the server.
    #[arg(long, global = true, env = "REVU_USER_ID")]
    pub user_id: Option<u32>,

    /// Display name of the acting account.
    #[arg(long, global = true, env = "REVU_USER_NAME")]
    pub user_name: Option<String>,

    /// Email of the acting account.
    #[arg(long, global = true, env = "REVU_USER_EMAIL")]
    pub user_email: Option<String>,

    /// Only print essential output.
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Write logs as JSON lines to stderr.
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a site directory.
    Init,

    /// Manage projects.
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Create and edit changes.
    Change {
        #[command(subcommand)]
        command: ChangeCommands,
    },

    /// Classify how one commit relates to another as a new patch set.
    Kind {
        project: String,
        /// The prior patch set's commit.
        prior: String,
        /// The new patch set's commit.
        next: String,
        #[arg(long)]
        json: bool,
    },

    /// Predict whether a change would merge cleanly into its branch.
    Mergeable {
        project: String,
        change: u32,
        /// Submit type to simulate.
        #[arg(long, default_value = "merge-if-necessary")]
        submit_type: String,
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum ProjectCommands {
    /// Create a bare project repository.
    Create {
        name: String,
        /// Branch to create with an initial empty commit.
        #[arg(long, default_value = "main")]
        branch: String,
        /// Create no branch at all.
        #[arg(long)]
        empty: bool,
    },

    /// List projects.
    List,
}

#[derive(Debug, Subcommand)]
pub enum ChangeCommands {
    /// Create a change from a commit already in the project.
    Create(CreateArgs),

    /// Show a change.
    Show {
        project: String,
        change: u32,
        #[arg(long)]
        json: bool,
    },

    /// Abandon a change.
    Abandon {
        project: String,
        change: u32,
        #[arg(long, short)]
        message: Option<String>,
    },

    /// Rebase the current patch set.
    Rebase(RebaseArgs),

    /// Set the topic. Omit it to remove the topic.
    Topic {
        project: String,
        change: u32,
        topic: Option<String>,
    },

    /// Mark a change work in progress.
    Wip {
        project: String,
        change: u32,
        #[arg(long, short)]
        message: Option<String>,
    },

    /// Mark a change ready for review.
    Ready {
        project: String,
        change: u32,
        #[arg(long, short)]
        message: Option<String>,
    },

    /// Make a change private.
    Private {
        project: String,
        change: u32,
        /// Make it visible again.
        #[arg(long)]
        unset: bool,
    },

    /// Add or remove reviewers.
    Reviewer {
        #[command(subcommand)]
        command: ReviewerCommands,
    },

    /// Vote on the current patch set.
    Vote {
        project: String,
        change: u32,
        label: String,
        #[arg(allow_hyphen_values = true)]
        value: i16,
    },

    /// Record a change as merged by a direct push.
    Merged {
        project: String,
        change: u32,
        /// Patch set that landed. Defaults to the current one.
        #[arg(long)]
        patch_set: Option<u32>,
    },

    /// Delete a change that was never merged.
    Delete { project: String, change: u32 },
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    pub project: String,
    /// Commit (or any revision) for patch set 1.
    pub commit: String,
    /// Destination branch.
    #[arg(long, short, default_value = "main")]
    pub branch: String,
    #[arg(long)]
    pub topic: Option<String>,
    #[arg(long)]
    pub wip: bool,
    #[arg(long)]
    pub private: bool,
    /// Reviewer account ids.
    #[arg(long = "reviewer", value_name = "ACCOUNT")]
    pub reviewers: Vec<u32>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RebaseArgs {
    pub project: String,
    pub change: u32,
    /// New base: a change number, patch set ref, or commit. An empty value
    /// means the branch tip. Without it, the parent change or branch tip is
    /// used.
    #[arg(long)]
    pub base: Option<String>,
    /// Commit conflicts as markers instead of failing.
    #[arg(long)]
    pub allow_conflicts: bool,
    /// Keep the original author date.
    #[arg(long)]
    pub match_author_date: bool,
    /// Merge strategy override.
    #[arg(long)]
    pub strategy: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ReviewerCommands {
    /// Add reviewers or CCs.
    Add {
        project: String,
        change: u32,
        #[arg(required = true)]
        accounts: Vec<u32>,
        /// Add as CC instead of reviewer.
        #[arg(long)]
        cc: bool,
    },

    /// Remove a reviewer and their votes.
    Remove {
        project: String,
        change: u32,
        account: u32,
    },
}
