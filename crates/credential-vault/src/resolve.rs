//! Source resolution: environment, file, keychain, prompt.

use std::io::{BufRead, Write};
use std::process::Command;

use secrecy::SecretString;
use tracing::{debug, warn};

use crate::types::CredentialSource;

/// Supplies values for prompt-sourced credentials.
pub trait Prompter: Send + Sync {
    fn prompt(&self, name: &str, description: Option<&str>) -> std::io::Result<String>;
}

/// Reads a single line from stdin.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&self, name: &str, description: Option<&str>) -> std::io::Result<String> {
        let mut stderr = std::io::stderr();
        match description {
            Some(desc) => write!(stderr, "{name} ({desc}): ")?,
            None => write!(stderr, "{name}: ")?,
        }
        stderr.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Resolve a value from a non-interactive source.
///
/// `None` for `Inline` and `Prompt`, which are never resolved here, and for
/// sources that have nothing to offer (unset variable, unreadable file).
/// Whether that matters is decided by `validate_all`.
pub(crate) fn resolve_source(name: &str, source: &CredentialSource) -> Option<SecretString> {
    let value = match source {
        CredentialSource::Env { var } => match std::env::var(var) {
            Ok(v) if !v.is_empty() => Some(v),
            _ => None,
        },
        CredentialSource::File { path } => match std::fs::read_to_string(path) {
            Ok(raw) => {
                let trimmed = raw.trim_end_matches(['\r', '\n']).to_string();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            Err(e) => {
                warn!(credential = %name, path = %path.display(), error = %e, "credential file unreadable");
                None
            }
        },
        CredentialSource::Keychain { service, account } => {
            read_keychain(service, account.as_deref())
        }
        CredentialSource::Inline | CredentialSource::Prompt => None,
    };

    debug!(credential = %name, source = source.label(), resolved = value.is_some(), "resolved credential source");
    value.map(SecretString::from)
}

/// Look up a keychain entry through the platform CLI.
///
/// Unavailable tooling is treated as "no value" rather than an error so that
/// optional keychain credentials do not break hosts without a keyring.
fn read_keychain(service: &str, account: Option<&str>) -> Option<String> {
    let output = if cfg!(target_os = "macos") {
        let mut cmd = Command::new("security");
        cmd.args(["find-generic-password", "-s", service]);
        if let Some(account) = account {
            cmd.args(["-a", account]);
        }
        cmd.arg("-w").output()
    } else {
        let mut cmd = Command::new("secret-tool");
        cmd.args(["lookup", "service", service]);
        if let Some(account) = account {
            cmd.args(["account", account]);
        }
        cmd.output()
    };

    match output {
        Ok(o) if o.status.success() => {
            let value = String::from_utf8_lossy(&o.stdout)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            (!value.is_empty()).then_some(value)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_resolve_env_present() {
        std::env::set_var("CV_RESOLVE_TEST_PRESENT", "abc123");
        let value = resolve_source(
            "test",
            &CredentialSource::Env {
                var: "CV_RESOLVE_TEST_PRESENT".to_string(),
            },
        );
        assert_eq!(value.expect("value").expose_secret(), "abc123");
    }

    #[test]
    fn test_resolve_env_missing_is_none() {
        let value = resolve_source(
            "test",
            &CredentialSource::Env {
                var: "CV_RESOLVE_TEST_DEFINITELY_UNSET".to_string(),
            },
        );
        assert!(value.is_none());
    }

    #[test]
    fn test_resolve_file_trims_newline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("token");
        std::fs::write(&path, "ghp_secret\n").expect("write");

        let value = resolve_source("gh", &CredentialSource::File { path }).expect("value");
        assert_eq!(value.expose_secret(), "ghp_secret");
    }

    #[test]
    fn test_resolve_missing_file_is_none() {
        let value = resolve_source(
            "gh",
            &CredentialSource::File {
                path: "/nonexistent/agentkiln/token".into(),
            },
        );
        assert!(value.is_none());
    }

    #[test]
    fn test_prompt_source_not_resolved_eagerly() {
        let value = resolve_source("p", &CredentialSource::Prompt);
        assert!(value.is_none());
    }
}
