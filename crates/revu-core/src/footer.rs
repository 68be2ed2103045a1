//! Commit message footers.
//!
//! Footers are `Key: value` lines in the last paragraph of a message.

use revu_git::Oid;

use crate::model::{Change, ChangeKey, PatchSetApproval};

pub const CHANGE_ID: &str = "Change-Id";
pub const REVIEWED_ON: &str = "Reviewed-on";

/// One parsed footer line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub key: String,
    pub value: String,
}

fn parse_footer_line(line: &str) -> Option<Footer> {
    let (key, value) = line.split_once(':')?;
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return None;
    }
    Some(Footer {
        key: key.to_string(),
        value: value.trim().to_string(),
    })
}

/// Footers of the last paragraph, in order. A paragraph containing any
/// non-footer line yields no footers.
#[must_use]
pub fn parse(message: &str) -> Vec<Footer> {
    let trimmed = message.trim_end();
    let Some(last) = trimmed.rsplit("\n\n").next() else {
        return Vec::new();
    };
    // A one-paragraph message is all subject.
    if last.len() == trimmed.len() {
        return Vec::new();
    }
    let footers: Option<Vec<Footer>> = last.lines().map(parse_footer_line).collect();
    footers.unwrap_or_default()
}

/// Values of every footer named `key`, case-insensitively.
#[must_use]
pub fn values(message: &str, key: &str) -> Vec<String> {
    parse(message)
        .into_iter()
        .filter(|f| f.key.eq_ignore_ascii_case(key))
        .map(|f| f.value)
        .collect()
}

/// The change key from the last `Change-Id` footer, if well-formed.
#[must_use]
pub fn change_key(message: &str) -> Option<ChangeKey> {
    values(message, CHANGE_ID)
        .last()
        .and_then(|v| ChangeKey::parse(v))
}

/// Change key for a new change: the footer, or one derived from the commit.
#[must_use]
pub fn change_key_or_derive(message: &str, commit: Oid) -> ChangeKey {
    change_key(message).unwrap_or_else(|| ChangeKey::from_commit(commit))
}

/// Append footer lines, starting a footer paragraph if needed.
#[must_use]
pub fn append(message: &str, footers: &[Footer]) -> String {
    if footers.is_empty() {
        return message.to_string();
    }
    let mut out = message.trim_end().to_string();
    if parse(&out).is_empty() {
        out.push('\n');
    }
    for footer in footers {
        out.push('\n');
        out.push_str(&footer.key);
        out.push_str(": ");
        out.push_str(&footer.value);
    }
    out.push('\n');
    out
}

fn approval_footer(approval: &PatchSetApproval) -> Footer {
    let voter = format!("user {}", approval.account);
    match approval.label.as_str() {
        "Code-Review" => Footer {
            key: "Reviewed-by".into(),
            value: voter,
        },
        "Verified" => Footer {
            key: "Tested-by".into(),
            value: voter,
        },
        label => Footer {
            key: label.to_string(),
            value: format!("{:+} {voter}", approval.value),
        },
    }
}

/// Message with submit-time footers: `Change-Id` if missing, `Reviewed-on`
/// when a web URL is configured, and one line per positive vote.
#[must_use]
pub fn submit_message(
    original: &str,
    change: &Change,
    approvals: &[PatchSetApproval],
    canonical_web_url: Option<&str>,
) -> String {
    let existing = parse(original);
    let mut footers = Vec::new();

    if !existing.iter().any(|f| f.key.eq_ignore_ascii_case(CHANGE_ID)) {
        footers.push(Footer {
            key: CHANGE_ID.into(),
            value: change.key.to_string(),
        });
    }
    if let Some(url) = canonical_web_url {
        footers.push(Footer {
            key: REVIEWED_ON.into(),
            value: format!(
                "{}/c/{}/+/{}",
                url.trim_end_matches('/'),
                change.project,
                change.id
            ),
        });
    }
    for approval in approvals.iter().filter(|a| a.value > 0) {
        let footer = approval_footer(approval);
        if !existing.contains(&footer) && !footers.contains(&footer) {
            footers.push(footer);
        }
    }
    append(original, &footers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountId, BranchName, ChangeId, ChangeStatus, PatchSetId, Project};
    use chrono::DateTime;

    const KEY: &str = "I0123456789abcdef0123456789abcdef01234567";

    fn change() -> Change {
        let when = DateTime::from_timestamp(0, 0).unwrap();
        Change {
            id: ChangeId(42),
            key: ChangeKey::parse(KEY).unwrap(),
            project: Project::new("demo").unwrap(),
            dest: BranchName::new("main"),
            owner: AccountId(1),
            status: ChangeStatus::New,
            current_patch_set: 1,
            subject: "Subject".into(),
            topic: None,
            work_in_progress: false,
            private: false,
            created_on: when,
            last_updated_on: when,
        }
    }

    #[test]
    fn test_parse_footers() {
        let msg = format!("Subject\n\nBody text.\n\nBug: 12\nChange-Id: {KEY}\n");
        let footers = parse(&msg);
        assert_eq!(footers.len(), 2);
        assert_eq!(footers[0].key, "Bug");
        assert_eq!(change_key(&msg).unwrap().as_str(), KEY);
    }

    #[test]
    fn test_subject_only_has_no_footers() {
        assert!(parse("Fix: the thing\n").is_empty());
    }

    #[test]
    fn test_mixed_paragraph_has_no_footers() {
        assert!(parse("Subject\n\nsome prose\nKey: value\n").is_empty());
    }

    #[test]
    fn test_derived_key() {
        let oid = Oid::from_str("89abcdef0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(
            change_key_or_derive("No footer\n", oid).as_str(),
            "I89abcdef0123456789abcdef0123456789abcdef"
        );
    }

    #[test]
    fn test_submit_message_adds_footers() {
        let when = DateTime::from_timestamp(0, 0).unwrap();
        let approvals = vec![
            PatchSetApproval {
                patch_set: PatchSetId::new(ChangeId(42), 1),
                account: AccountId(7),
                label: "Code-Review".into(),
                value: 2,
                granted: when,
                copied: false,
            },
            PatchSetApproval {
                patch_set: PatchSetId::new(ChangeId(42), 1),
                account: AccountId(8),
                label: "Code-Review".into(),
                value: -1,
                granted: when,
                copied: false,
            },
        ];
        let msg = submit_message(
            "Subject\n\nBody\n",
            &change(),
            &approvals,
            Some("https://review.example.com/"),
        );
        assert_eq!(
            msg,
            format!(
                "Subject\n\nBody\n\nChange-Id: {KEY}\n\
                 Reviewed-on: https://review.example.com/c/demo/+/42\n\
                 Reviewed-by: user 7\n"
            )
        );
    }

    #[test]
    fn test_submit_message_keeps_existing_change_id() {
        let original = format!("Subject\n\nChange-Id: {KEY}\n");
        let msg = submit_message(&original, &change(), &[], None);
        assert_eq!(msg, original);
    }
}
