//! Bulk account import
//!
//! One account per line: `email password refresh_token [comment]`, with `-`
//! for an absent field. Blank lines and `#` comments are skipped. A bad line
//! is logged and the import moves on.

use std::path::Path;

use anyhow::{Context, Result};
use common::Secret;
use token_lifecycle::{NewAccount, TokenManager};
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub existing: usize,
    pub failed: usize,
}

fn present(field: &str) -> Option<&str> {
    (field != "-").then_some(field)
}

/// Parse one line. `None` for lines with nothing to import.
pub fn parse_line(line: &str) -> Option<std::result::Result<NewAccount, String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut rest = line;
    let mut fields = Vec::with_capacity(3);
    while fields.len() < 3 {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            break;
        }
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        fields.push(&trimmed[..end]);
        rest = &trimmed[end..];
    }
    let [email, password, refresh_token] = fields[..] else {
        return Some(Err(
            "expected: email password refresh_token [comment]".to_owned()
        ));
    };

    Some(Ok(NewAccount {
        email: present(email).unwrap_or_default().to_owned(),
        password: present(password).map(Secret::from),
        refresh_token: present(refresh_token).map(Secret::from),
        comment: rest.trim().to_owned(),
    }))
}

/// Enroll every account listed in `path`.
pub async fn import_accounts(manager: &TokenManager, path: &Path) -> Result<ImportSummary> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read import file {}", path.display()))?;

    let mut summary = ImportSummary::default();
    for (index, line) in contents.lines().enumerate() {
        let line_no = index + 1;
        let new = match parse_line(line) {
            None => continue,
            Some(Ok(new)) => new,
            Some(Err(reason)) => {
                warn!(line = line_no, reason = %reason, "skipping malformed import line");
                summary.failed += 1;
                continue;
            }
        };

        match manager.add_account(new).await {
            Ok(added) if added.created => {
                info!(line = line_no, account_id = %added.account.id, "account imported");
                summary.added += 1;
            }
            Ok(added) => {
                info!(line = line_no, account_id = %added.account.id, "account already enrolled");
                summary.existing += 1;
            }
            Err(e) => {
                warn!(line = line_no, category = e.category(), error = %e, "import failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
