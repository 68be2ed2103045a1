//! Terminal output formatting utilities.

use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use revu_core::{ChangeKind, ChangeStatus};

static QUIET_MODE: AtomicBool = AtomicBool::new(false);

/// Set quiet mode globally. Call once at startup.
pub fn set_quiet(quiet: bool) {
    QUIET_MODE.store(quiet, Ordering::Relaxed);
}

fn is_quiet() -> bool {
    QUIET_MODE.load(Ordering::Relaxed)
}

/// Print a success message (suppressed in quiet mode).
pub fn success(msg: &str) {
    if !is_quiet() {
        println!("{} {}", "✓".green(), msg);
    }
}

/// Print an error message (always prints to stderr).
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a warning message (always prints to stderr).
pub fn warn(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

/// Print an info message (suppressed in quiet mode).
pub fn info(msg: &str) {
    if !is_quiet() {
        println!("{} {}", "→".blue(), msg);
    }
}

/// Print a detail line without prefix (suppressed in quiet mode).
pub fn detail(msg: &str) {
    if !is_quiet() {
        println!("{msg}");
    }
}

/// Print essential machine-readable output (always prints).
pub fn essential(msg: &str) {
    println!("{msg}");
}

/// Print a horizontal line (suppressed in quiet mode).
pub fn hr() {
    if !is_quiet() {
        println!("{}", "─".repeat(50).dimmed());
    }
}

/// Colored change status.
#[must_use]
pub fn status(status: ChangeStatus) -> String {
    let text = status.as_str().to_uppercase();
    match status {
        ChangeStatus::New => text.cyan().to_string(),
        ChangeStatus::Merged => text.green().to_string(),
        ChangeStatus::Abandoned => text.red().to_string(),
    }
}

/// Colored change kind. Anything that keeps votes is green.
#[must_use]
pub fn kind(kind: ChangeKind) -> String {
    let text = kind.as_str();
    match kind {
        ChangeKind::Rework => text.yellow().to_string(),
        ChangeKind::TrivialRebase
        | ChangeKind::MergeFirstParentUpdate
        | ChangeKind::NoCodeChange
        | ChangeKind::NoChange => text.green().to_string(),
    }
}

/// Format a vote value with its sign.
#[must_use]
pub fn vote(label: &str, value: i16) -> String {
    let text = revu_core::model::format_vote(label, value);
    match value.signum() {
        1 => text.green().to_string(),
        -1 => text.red().to_string(),
        _ => text.dimmed().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_colors() {
        colored::control::set_override(true);

        assert_eq!(status(ChangeStatus::New), "NEW".cyan().to_string());
        assert_eq!(status(ChangeStatus::Merged), "MERGED".green().to_string());
        assert_eq!(
            status(ChangeStatus::Abandoned),
            "ABANDONED".red().to_string()
        );

        colored::control::set_override(false);
    }

    #[test]
    fn test_kind_contains_name() {
        assert!(kind(ChangeKind::TrivialRebase).contains("TRIVIAL_REBASE"));
        assert!(kind(ChangeKind::Rework).contains("REWORK"));
    }

    #[test]
    fn test_vote_contains_sign() {
        assert!(vote("Code-Review", 2).contains("Code-Review+2"));
        assert!(vote("Verified", -1).contains("Verified-1"));
    }

    #[test]
    fn test_quiet_mode_enabled() {
        set_quiet(true);
        assert!(is_quiet());
        set_quiet(false);
        assert!(!is_quiet());
    }
}
