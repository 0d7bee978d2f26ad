//! Enforcement adapter bindings.

use crate::application::ports::{AdapterError, EnforcementAdapter};
use crate::domain::sanction::{ActionKind, EnforcementAction};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::process::Output;
use tokio::process::Command;

const SUBJECT: &str = "{subject}";

/// Logs every call and succeeds. Used for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAdapter;

#[async_trait]
impl EnforcementAdapter for NoopAdapter {
    async fn apply(&self, action: &EnforcementAction) -> Result<(), AdapterError> {
        tracing::info!(action = %action, "dry run: would apply");
        Ok(())
    }

    async fn revert(&self, action: &EnforcementAction) -> Result<(), AdapterError> {
        tracing::info!(action = %action, "dry run: would revert");
        Ok(())
    }
}

/// Argument vectors for one action kind. `{subject}` is substituted in
/// every argument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSet {
    /// Exits 0 when the action is already in force
    #[serde(default)]
    pub check: Option<Vec<String>>,
    pub apply: Vec<String>,
    pub revert: Vec<String>,
}

impl CommandSet {
    /// Drop rules on the INPUT chain.
    pub fn iptables() -> Self {
        let rule = |op: &str| {
            ["iptables", op, "INPUT", "-s", SUBJECT, "-j", "DROP"]
                .map(String::from)
                .to_vec()
        };
        Self {
            check: Some(rule("-C")),
            apply: rule("-I"),
            revert: rule("-D"),
        }
    }

    /// Lock and unlock local accounts. Both operations are idempotent, so
    /// no check command is needed.
    pub fn usermod() -> Self {
        Self {
            check: None,
            apply: ["usermod", "-L", SUBJECT].map(String::from).to_vec(),
            revert: ["usermod", "-U", SUBJECT].map(String::from).to_vec(),
        }
    }
}

/// Runs external commands to enforce actions.
///
/// When a check command is configured, `apply` skips if the check reports
/// the action in force and `revert` skips if it reports it absent.
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    network_block: Option<CommandSet>,
    account_lock: Option<CommandSet>,
}

impl Default for CommandAdapter {
    fn default() -> Self {
        Self {
            network_block: Some(CommandSet::iptables()),
            account_lock: Some(CommandSet::usermod()),
        }
    }
}

impl CommandAdapter {
    pub fn new(network_block: Option<CommandSet>, account_lock: Option<CommandSet>) -> Self {
        Self {
            network_block,
            account_lock,
        }
    }

    fn commands(&self, action: &EnforcementAction) -> Result<&CommandSet, AdapterError> {
        let set = match action.action_kind {
            ActionKind::NetworkBlock => self.network_block.as_ref(),
            ActionKind::AccountLock => self.account_lock.as_ref(),
        };
        set.ok_or_else(|| AdapterError::Failed(format!("no commands configured for {}", action.action_kind)))
    }

    async fn is_enforced(&self, set: &CommandSet, subject: &str) -> Result<Option<bool>, AdapterError> {
        let Some(check) = &set.check else {
            return Ok(None);
        };
        let output = run(check, subject).await?;
        Ok(Some(output.status.success()))
    }
}

#[async_trait]
impl EnforcementAdapter for CommandAdapter {
    async fn apply(&self, action: &EnforcementAction) -> Result<(), AdapterError> {
        validate_subject(action)?;
        let set = self.commands(action)?;
        if self.is_enforced(set, &action.subject).await? == Some(true) {
            tracing::debug!(action = %action, "already in force; skipping apply");
            return Ok(());
        }
        expect_success(&set.apply, run(&set.apply, &action.subject).await?)
    }

    async fn revert(&self, action: &EnforcementAction) -> Result<(), AdapterError> {
        validate_subject(action)?;
        let set = self.commands(action)?;
        if self.is_enforced(set, &action.subject).await? == Some(false) {
            tracing::debug!(action = %action, "not in force; skipping revert");
            return Ok(());
        }
        expect_success(&set.revert, run(&set.revert, &action.subject).await?)
    }
}

fn validate_subject(action: &EnforcementAction) -> Result<(), AdapterError> {
    let subject = action.subject.as_str();
    let valid = match action.action_kind {
        ActionKind::NetworkBlock => subject.parse::<IpAddr>().is_ok(),
        ActionKind::AccountLock => {
            !subject.is_empty()
                && !subject.starts_with('-')
                && subject
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        }
    };
    if valid {
        Ok(())
    } else {
        Err(AdapterError::InvalidSubject(subject.to_string()))
    }
}

async fn run(argv: &[String], subject: &str) -> Result<Output, AdapterError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AdapterError::Failed("empty command".into()))?;
    Command::new(program)
        .args(args.iter().map(|a| a.replace(SUBJECT, subject)))
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AdapterError::Failed(format!("cannot run {}: {}", program, e)))
}

fn expect_success(argv: &[String], output: Output) -> Result<(), AdapterError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(AdapterError::Failed(format!(
        "{} exited with {}: {}",
        argv.first().map(String::as_str).unwrap_or_default(),
        output.status,
        stderr.trim()
    )))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into(), "sh".into(), SUBJECT.into()]
    }

    // Marker files stand in for firewall state.
    fn file_backed(dir: &Path) -> CommandSet {
        let marker = dir.join("$1").display().to_string();
        CommandSet {
            check: Some(sh(&format!("test -e \"{}\"", marker))),
            apply: sh(&format!("echo applied >> \"{}.calls\"; touch \"{}\"", marker, marker)),
            revert: sh(&format!("rm \"{}\"", marker)),
        }
    }

    #[tokio::test]
    async fn test_apply_and_revert_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CommandAdapter::new(Some(file_backed(dir.path())), None);
        let action = EnforcementAction::network_block("10.0.0.1".parse().unwrap());

        adapter.apply(&action).await.unwrap();
        adapter.apply(&action).await.unwrap();
        let calls = std::fs::read_to_string(dir.path().join("10.0.0.1.calls")).unwrap();
        assert_eq!(calls.lines().count(), 1);

        adapter.revert(&action).await.unwrap();
        adapter.revert(&action).await.unwrap();
        assert!(!dir.path().join("10.0.0.1").exists());
    }

    #[tokio::test]
    async fn test_failing_command_reports_stderr() {
        let set = CommandSet {
            check: None,
            apply: sh("echo boom >&2; exit 3"),
            revert: sh("true"),
        };
        let adapter = CommandAdapter::new(None, Some(set));

        let err = adapter.apply(&EnforcementAction::account_lock("alice")).await.unwrap_err();
        match err {
            AdapterError::Failed(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejects_option_like_subjects() {
        let adapter = CommandAdapter::default();
        let err = adapter
            .apply(&EnforcementAction::account_lock("-rf"))
            .await
            .unwrap_err();
        assert_eq!(err, AdapterError::InvalidSubject("-rf".into()));
    }

    #[tokio::test]
    async fn test_unconfigured_kind_fails() {
        let adapter = CommandAdapter::new(None, None);
        let err = adapter
            .revert(&EnforcementAction::network_block("10.0.0.1".parse().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Failed(_)));
    }

    #[test]
    fn test_presets() {
        assert_eq!(CommandSet::iptables().apply[1], "-I");
        assert!(CommandSet::usermod().check.is_none());
    }
}
