//! Credential table with metadata-only persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::{CredentialError, Result};
use crate::resolve::{resolve_source, Prompter};
use crate::types::{Credential, CredentialMetadata, CredentialSource};

fn name_is_valid(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]{0,127}$").ok())
        .as_ref()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Owns every resolved secret value in the process.
///
/// Other components look values up by name for the duration of one call and
/// never copy them into long-lived state.
#[derive(Debug, Default)]
pub struct CredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
    metadata_path: Option<PathBuf>,
}

impl CredentialStore {
    /// In-memory store with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a metadata file, re-resolving every entry.
    ///
    /// A missing file yields an empty store. Inline credentials come back
    /// unresolved since their values were never written out.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut table = HashMap::new();

        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let entries: Vec<CredentialMetadata> = serde_json::from_str(&raw)?;
            for meta in entries {
                let mut credential = Credential::from_metadata(meta);
                match resolve_source(&credential.name, &credential.source) {
                    Some(value) => {
                        credential.value = Some(value);
                        credential.resolved_at = Some(Utc::now());
                    }
                    None if !credential.optional => {
                        warn!(credential = %credential.name, "required credential unresolved on reload")
                    }
                    None => {}
                }
                table.insert(credential.name.clone(), credential);
            }
            info!(path = %path.display(), count = table.len(), "loaded credential metadata");
        }

        Ok(Self {
            credentials: RwLock::new(table),
            metadata_path: Some(path),
        })
    }

    /// Register a credential and resolve it from its source.
    pub fn add(&self, mut credential: Credential) -> Result<CredentialMetadata> {
        validate(&credential)?;

        if !matches!(credential.source, CredentialSource::Inline) {
            if let Some(value) = resolve_source(&credential.name, &credential.source) {
                credential.value = Some(value);
            }
        }
        if credential.is_resolved() {
            credential.resolved_at = Some(Utc::now());
        }

        let meta = credential.metadata();
        {
            // The file is written before the table changes, so a failed
            // write leaves both untouched.
            let mut table = self.write();
            if table.contains_key(&credential.name) {
                return Err(CredentialError::Duplicate(credential.name));
            }
            let mut entries = sorted_metadata(&table);
            entries.push(meta.clone());
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            self.persist(&entries)?;
            table.insert(credential.name.clone(), credential);
        }

        info!(credential = %meta.name, source = meta.source.label(), resolved = meta.resolved, "credential added");
        Ok(meta)
    }

    /// Resolved value for `name`.
    pub fn get(&self, name: &str) -> Result<SecretString> {
        let table = self.read();
        let credential = table
            .get(name)
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))?;

        match &credential.value {
            Some(value) if !value.expose_secret().is_empty() => {
                Ok(SecretString::from(value.expose_secret().to_string()))
            }
            _ => Err(CredentialError::Unresolved(name.to_string())),
        }
    }

    /// Whether a credential is registered and currently holds a value.
    pub fn is_resolved(&self, name: &str) -> bool {
        self.read().get(name).map(Credential::is_resolved).unwrap_or(false)
    }

    /// Resolve a prompt-sourced credential on request.
    pub fn resolve_prompt(&self, name: &str, prompter: &dyn Prompter) -> Result<()> {
        let description = {
            let table = self.read();
            let credential = table
                .get(name)
                .ok_or_else(|| CredentialError::NotFound(name.to_string()))?;
            if !matches!(credential.source, CredentialSource::Prompt) {
                return Err(CredentialError::Invalid(format!(
                    "credential '{name}' is not prompt-sourced"
                )));
            }
            credential.description.clone()
        };

        // Prompt without holding the lock.
        let answer = prompter.prompt(name, description.as_deref())?;
        if answer.is_empty() {
            return Err(CredentialError::ResolutionFailed {
                name: name.to_string(),
                source_kind: "prompt".to_string(),
                reason: "empty input".to_string(),
            });
        }

        let mut table = self.write();
        let credential = table
            .get_mut(name)
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))?;
        credential.value = Some(SecretString::from(answer));
        credential.resolved_at = Some(Utc::now());
        debug!(credential = %name, "prompt credential resolved");
        Ok(())
    }

    /// Metadata for every credential, sorted by name. Values are always blank.
    pub fn list(&self) -> Vec<CredentialMetadata> {
        sorted_metadata(&self.read())
    }

    /// Report every required credential that has no value, in one error.
    pub fn validate_all(&self) -> Result<()> {
        let mut missing: Vec<String> = self
            .read()
            .values()
            .filter(|c| !c.optional && !c.is_resolved())
            .map(|c| c.name.clone())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(CredentialError::MissingRequired { names: missing })
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        {
            let mut table = self.write();
            if !table.contains_key(name) {
                return Err(CredentialError::NotFound(name.to_string()));
            }
            let entries: Vec<CredentialMetadata> = sorted_metadata(&table)
                .into_iter()
                .filter(|m| m.name != name)
                .collect();
            self.persist(&entries)?;
            table.remove(name);
        }
        info!(credential = %name, "credential removed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metadata_path(&self) -> Option<&Path> {
        self.metadata_path.as_deref()
    }

    fn persist(&self, entries: &[CredentialMetadata]) -> Result<()> {
        let Some(path) = &self.metadata_path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(entries)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        debug!(path = %path.display(), count = entries.len(), "persisted credential metadata");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Credential>> {
        self.credentials.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Credential>> {
        self.credentials.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn sorted_metadata(table: &HashMap<String, Credential>) -> Vec<CredentialMetadata> {
    let mut out: Vec<_> = table.values().map(Credential::metadata).collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn validate(credential: &Credential) -> Result<()> {
    if !name_is_valid(&credential.name) {
        return Err(CredentialError::Invalid(format!(
            "name '{}' must start with a letter and contain only [A-Za-z0-9_.-]",
            credential.name
        )));
    }

    match &credential.source {
        CredentialSource::Env { var } if var.trim().is_empty() => Err(CredentialError::Invalid(
            format!("'{}': env source needs a variable name", credential.name),
        )),
        CredentialSource::File { path } if path.as_os_str().is_empty() => Err(
            CredentialError::Invalid(format!("'{}': file source needs a path", credential.name)),
        ),
        CredentialSource::Keychain { service, .. } if service.trim().is_empty() => {
            Err(CredentialError::Invalid(format!(
                "'{}': keychain source needs a service",
                credential.name
            )))
        }
        CredentialSource::Inline if !credential.is_resolved() => Err(CredentialError::Invalid(
            format!("'{}': inline source needs a value", credential.name),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialKind;

    #[test]
    fn test_rejects_bad_names() {
        let store = CredentialStore::new();
        for bad in ["", "1abc", "has space", "semi;colon"] {
            let err = store
                .add(Credential::inline(bad, CredentialKind::Token, "x"))
                .unwrap_err();
            assert!(matches!(err, CredentialError::Invalid(_)), "{bad}");
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let store = CredentialStore::new();
        store
            .add(Credential::inline("A", CredentialKind::Token, "1"))
            .expect("first add");
        let err = store
            .add(Credential::inline("A", CredentialKind::Token, "2"))
            .unwrap_err();
        assert!(matches!(err, CredentialError::Duplicate(_)));
        assert_eq!(store.get("A").expect("get").expose_secret(), "1");
    }

    #[test]
    fn test_get_unresolved_optional() {
        let store = CredentialStore::new();
        store
            .add(
                Credential::from_env("OPT", CredentialKind::ApiKey, "CV_STORE_TEST_UNSET_OPT")
                    .optional(),
            )
            .expect("add");
        assert!(matches!(
            store.get("OPT").unwrap_err(),
            CredentialError::Unresolved(_)
        ));
        store.validate_all().expect("optional does not fail validation");
    }

    #[test]
    fn test_get_unknown() {
        let store = CredentialStore::new();
        assert!(matches!(
            store.get("NOPE").unwrap_err(),
            CredentialError::NotFound(_)
        ));
    }

    #[test]
    fn test_remove() {
        let store = CredentialStore::new();
        store
            .add(Credential::inline("A", CredentialKind::Token, "1"))
            .expect("add");
        store.remove("A").expect("remove");
        assert!(store.is_empty());
        assert!(matches!(
            store.remove("A").unwrap_err(),
            CredentialError::NotFound(_)
        ));
    }
}
