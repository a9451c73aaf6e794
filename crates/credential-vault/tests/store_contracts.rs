//! Behavioral contracts for the credential store.
//!
//! Listings and persisted files must never carry a secret value, and
//! validation must report every missing required credential at once.

use std::io;

use credential_vault::{
    Credential, CredentialError, CredentialKind, CredentialSource, CredentialStore, ExposeSecret,
    Prompter,
};

struct FixedPrompter(&'static str);

impl Prompter for FixedPrompter {
    fn prompt(&self, _name: &str, _description: Option<&str>) -> io::Result<String> {
        Ok(self.0.to_string())
    }
}

fn populated_store(dir: &std::path::Path) -> CredentialStore {
    std::env::set_var("CV_CONTRACT_ENV_TOKEN", "env-secret-value");
    let file = dir.join("cert.pem");
    std::fs::write(&file, "file-secret-value\n").expect("write secret file");

    let store = CredentialStore::new();
    store
        .add(Credential::from_env(
            "ENV_TOKEN",
            CredentialKind::Token,
            "CV_CONTRACT_ENV_TOKEN",
        ))
        .expect("add env");
    store
        .add(Credential::new(
            "TLS_CERT",
            CredentialKind::Certificate,
            CredentialSource::File { path: file },
        ))
        .expect("add file");
    store
        .add(Credential::inline(
            "INLINE_PASSWORD",
            CredentialKind::Password,
            "inline-secret-value",
        ))
        .expect("add inline");
    store
        .add(Credential::new(
            "PROMPTED",
            CredentialKind::Custom,
            CredentialSource::Prompt,
        ))
        .expect("add prompt");
    store
}

// ===========================================================================
// Redaction
// ===========================================================================

#[test]
fn list_never_contains_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = populated_store(dir.path());
    store
        .resolve_prompt("PROMPTED", &FixedPrompter("prompt-secret-value"))
        .expect("resolve prompt");

    let listed = store.list();
    assert_eq!(listed.len(), 4);
    for meta in &listed {
        assert!(meta.value.is_empty(), "{} leaked a value", meta.name);
    }

    let json = serde_json::to_string(&listed).expect("serialize listing");
    for secret in [
        "env-secret-value",
        "file-secret-value",
        "inline-secret-value",
        "prompt-secret-value",
    ] {
        assert!(!json.contains(secret));
    }
}

#[test]
fn persisted_file_holds_metadata_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("credentials.json");

    let store = CredentialStore::open(&path).expect("open");
    store
        .add(Credential::inline(
            "OPENAI_KEY",
            CredentialKind::ApiKey,
            "sk-very-secret",
        ))
        .expect("add");

    let raw = std::fs::read_to_string(&path).expect("read metadata file");
    assert!(raw.contains("OPENAI_KEY"));
    assert!(!raw.contains("sk-very-secret"));
}

#[test]
fn reopen_re_resolves_from_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("credentials.json");
    std::env::set_var("CV_CONTRACT_REOPEN", "from-env");

    {
        let store = CredentialStore::open(&path).expect("open");
        store
            .add(Credential::from_env(
                "REOPEN_ENV",
                CredentialKind::Token,
                "CV_CONTRACT_REOPEN",
            ))
            .expect("add env");
        store
            .add(Credential::inline("REOPEN_INLINE", CredentialKind::Token, "gone"))
            .expect("add inline");
    }

    let reopened = CredentialStore::open(&path).expect("reopen");
    assert_eq!(reopened.len(), 2);
    assert_eq!(
        reopened.get("REOPEN_ENV").expect("env value").expose_secret(),
        "from-env"
    );
    assert!(matches!(
        reopened.get("REOPEN_INLINE").unwrap_err(),
        CredentialError::Unresolved(_)
    ));
}

// ===========================================================================
// Resolution and validation
// ===========================================================================

#[test]
fn prompt_credentials_resolve_lazily() {
    let store = CredentialStore::new();
    store
        .add(Credential::new(
            "ASK_ME",
            CredentialKind::Password,
            CredentialSource::Prompt,
        ))
        .expect("add");

    assert!(!store.is_resolved("ASK_ME"));
    assert!(matches!(
        store.validate_all().unwrap_err(),
        CredentialError::MissingRequired { .. }
    ));

    store
        .resolve_prompt("ASK_ME", &FixedPrompter("typed"))
        .expect("resolve");
    assert_eq!(store.get("ASK_ME").expect("get").expose_secret(), "typed");
    store.validate_all().expect("all resolved");
}

#[test]
fn resolve_prompt_rejects_other_sources() {
    let store = CredentialStore::new();
    store
        .add(Credential::inline("PLAIN", CredentialKind::Token, "x"))
        .expect("add");
    let err = store
        .resolve_prompt("PLAIN", &FixedPrompter("y"))
        .unwrap_err();
    assert!(matches!(err, CredentialError::Invalid(_)));
}

#[test]
fn validate_all_reports_exactly_the_missing_env_credential() {
    std::env::set_var("CV_CONTRACT_PRESENT", "present");
    std::env::remove_var("CV_CONTRACT_MISSING_REQUIRED");

    let store = CredentialStore::new();
    store
        .add(Credential::from_env(
            "PRESENT",
            CredentialKind::ApiKey,
            "CV_CONTRACT_PRESENT",
        ))
        .expect("add present");
    store
        .add(Credential::from_env(
            "MISSING_KEY",
            CredentialKind::ApiKey,
            "CV_CONTRACT_MISSING_REQUIRED",
        ))
        .expect("add missing");
    store
        .add(
            Credential::from_env(
                "MISSING_BUT_OPTIONAL",
                CredentialKind::ApiKey,
                "CV_CONTRACT_MISSING_OPTIONAL",
            )
            .optional(),
        )
        .expect("add optional");

    match store.validate_all() {
        Err(CredentialError::MissingRequired { names }) => {
            assert_eq!(names, vec!["MISSING_KEY".to_string()]);
        }
        other => panic!("expected MissingRequired, got {other:?}"),
    }
}

#[test]
fn validate_all_lists_names_sorted() {
    let store = CredentialStore::new();
    for name in ["ZETA", "ALPHA", "MID"] {
        store
            .add(Credential::new(name, CredentialKind::Token, CredentialSource::Prompt))
            .expect("add");
    }
    match store.validate_all() {
        Err(CredentialError::MissingRequired { names }) => {
            assert_eq!(names, vec!["ALPHA", "MID", "ZETA"]);
        }
        other => panic!("expected MissingRequired, got {other:?}"),
    }
}

#[test]
fn unreadable_files_are_reported_by_validate_all() {
    let store = CredentialStore::new();
    store
        .add(
            Credential::new(
                "OPT_CERT",
                CredentialKind::Certificate,
                CredentialSource::File {
                    path: "/nonexistent/agentkiln/opt.pem".into(),
                },
            )
            .optional(),
        )
        .expect("optional file credential is accepted");
    store
        .add(Credential::new(
            "REQ_CERT",
            CredentialKind::Certificate,
            CredentialSource::File {
                path: "/nonexistent/agentkiln/req.pem".into(),
            },
        ))
        .expect("required file credential is accepted");

    assert!(!store.is_resolved("OPT_CERT"));
    assert!(matches!(
        store.get("OPT_CERT"),
        Err(CredentialError::Unresolved(_))
    ));
    match store.validate_all() {
        Err(CredentialError::MissingRequired { names }) => {
            assert_eq!(names, vec!["REQ_CERT".to_string()]);
        }
        other => panic!("expected MissingRequired, got {other:?}"),
    }
}

// ===========================================================================
// Persistence failures
// ===========================================================================

#[test]
fn failed_write_leaves_add_retryable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("state");
    std::fs::write(&blocker, "not a directory").expect("write blocker");

    let store = CredentialStore::open(blocker.join("credentials.json")).expect("open");
    let err = store
        .add(Credential::inline("A", CredentialKind::ApiKey, "a-value"))
        .unwrap_err();
    assert!(matches!(err, CredentialError::Io(_)));
    assert!(store.is_empty());

    std::fs::remove_file(&blocker).expect("remove blocker");
    store
        .add(Credential::inline("A", CredentialKind::ApiKey, "a-value"))
        .expect("retry succeeds");
    assert_eq!(store.len(), 1);
}

#[test]
fn failed_write_keeps_removed_credential() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = dir.path().join("state");
    let store = CredentialStore::open(state.join("credentials.json")).expect("open");
    store
        .add(Credential::inline("A", CredentialKind::ApiKey, "a-value"))
        .expect("add");

    std::fs::remove_dir_all(&state).expect("remove state dir");
    std::fs::write(&state, "not a directory").expect("write blocker");

    assert!(store.remove("A").is_err());
    assert_eq!(store.len(), 1);
    assert_eq!(store.get("A").expect("still present").expose_secret(), "a-value");
}
