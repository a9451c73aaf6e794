//! Credential metadata and in-memory secret values.
//!
//! A [`Credential`] carries its resolved value as a [`SecretString`] that is
//! skipped by serde and redacted in `Debug`. Everything that leaves the store
//! (listings, the metadata file) is built from [`CredentialMetadata`], which
//! has no way to hold a secret.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// What kind of secret a credential holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    Username,
    Password,
    Token,
    Certificate,
    Custom,
}

impl std::str::FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "api_key" => Ok(Self::ApiKey),
            "username" => Ok(Self::Username),
            "password" => Ok(Self::Password),
            "token" => Ok(Self::Token),
            "certificate" => Ok(Self::Certificate),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown credential kind: {other}")),
        }
    }
}

/// Where a credential's value comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Environment variable lookup.
    Env { var: String },
    /// Contents of a file (trailing newline trimmed).
    File { path: PathBuf },
    /// OS keychain entry, read through the platform CLI.
    Keychain {
        service: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<String>,
    },
    /// Value supplied directly in configuration. Not restored on reload.
    Inline,
    /// Interactive prompt, resolved lazily on request.
    Prompt,
}

impl CredentialSource {
    /// Short label used in logs and errors.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Env { .. } => "env",
            Self::File { .. } => "file",
            Self::Keychain { .. } => "keychain",
            Self::Inline => "inline",
            Self::Prompt => "prompt",
        }
    }
}

/// A named secret and its (possibly unresolved) in-memory value.
pub struct Credential {
    pub name: String,
    pub kind: CredentialKind,
    pub source: CredentialSource,
    pub optional: bool,
    pub description: Option<String>,
    pub(crate) value: Option<SecretString>,
    pub(crate) resolved_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Credential whose value will be resolved from `source` on `add`.
    pub fn new(name: impl Into<String>, kind: CredentialKind, source: CredentialSource) -> Self {
        Self {
            name: name.into(),
            kind,
            source,
            optional: false,
            description: None,
            value: None,
            resolved_at: None,
        }
    }

    /// Shorthand for an environment-variable credential.
    pub fn from_env(name: impl Into<String>, kind: CredentialKind, var: impl Into<String>) -> Self {
        Self::new(name, kind, CredentialSource::Env { var: var.into() })
    }

    /// Credential carrying an inline value.
    pub fn inline(name: impl Into<String>, kind: CredentialKind, value: impl Into<String>) -> Self {
        let mut credential = Self::new(name, kind, CredentialSource::Inline);
        credential.value = Some(SecretString::from(value.into()));
        credential
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether a value is currently held.
    pub fn is_resolved(&self) -> bool {
        self.value
            .as_ref()
            .map(|v| !v.expose_secret().is_empty())
            .unwrap_or(false)
    }

    /// Metadata view of this credential. Never contains the value.
    pub fn metadata(&self) -> CredentialMetadata {
        CredentialMetadata {
            name: self.name.clone(),
            kind: self.kind,
            source: self.source.clone(),
            optional: self.optional,
            description: self.description.clone(),
            resolved: self.is_resolved(),
            resolved_at: self.resolved_at,
            value: String::new(),
        }
    }

    pub(crate) fn from_metadata(meta: CredentialMetadata) -> Self {
        Self {
            name: meta.name,
            kind: meta.kind,
            source: meta.source,
            optional: meta.optional,
            description: meta.description,
            value: None,
            resolved_at: None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("optional", &self.optional)
            .field("value", &if self.is_resolved() { "[REDACTED]" } else { "<unresolved>" })
            .finish()
    }
}

/// Serializable, value-free description of a credential.
///
/// `value` is always empty; it exists so consumers that expect the field see a
/// blank string rather than a missing key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialMetadata {
    pub name: String,
    pub kind: CredentialKind,
    pub source: CredentialSource,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_has_blank_value() {
        let cred = Credential::inline("OPENAI_KEY", CredentialKind::ApiKey, "sk-live-123");
        let meta = cred.metadata();
        assert!(meta.resolved);
        assert_eq!(meta.value, "");

        let json = serde_json::to_string(&meta).expect("serialize");
        assert!(!json.contains("sk-live-123"));
    }

    #[test]
    fn test_debug_redacts_value() {
        let cred = Credential::inline("DB_PASSWORD", CredentialKind::Password, "hunter2");
        let debug = format!("{cred:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_kind_from_str_accepts_dashes() {
        assert_eq!("api-key".parse::<CredentialKind>(), Ok(CredentialKind::ApiKey));
        assert_eq!("Token".parse::<CredentialKind>(), Ok(CredentialKind::Token));
        assert!("bogus".parse::<CredentialKind>().is_err());
    }

    #[test]
    fn test_source_serde_tagged() {
        let source = CredentialSource::Env {
            var: "GITHUB_TOKEN".to_string(),
        };
        let json = serde_json::to_value(&source).expect("serialize");
        assert_eq!(json["type"], "env");
        assert_eq!(json["var"], "GITHUB_TOKEN");
    }
}
