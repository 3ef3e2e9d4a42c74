//! Backend Configuration
//!
//! The recognized backend options, validated once at load time. Unknown or
//! mistyped keys are rejected instead of being silently ignored.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Default number of concurrent sessions when `parallelNum` is absent
pub const DEFAULT_PARALLEL_NUM: u32 = 30;

/// Upper bound accepted for `parallelNum`
pub const MAX_PARALLEL_NUM: u32 = 1000;

// =============================================================================
// Backend Configuration
// =============================================================================

/// Configuration for a single OceanStor backend
#[derive(Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackendConfig {
    /// Management endpoints, tried in order
    pub urls: Vec<String>,
    /// Login user
    pub user: String,
    /// Login password
    #[serde(skip_serializing)]
    pub password: String,
    /// vStore (tenant) to scope the session to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vstore_name: Option<String>,
    /// Maximum number of concurrent sessions
    #[serde(
        default,
        deserialize_with = "deserialize_parallel_num",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<u32>")]
    pub parallel_num: Option<u32>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("urls", &self.urls)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("vstore_name", &self.vstore_name)
            .field("parallel_num", &self.parallel_num)
            .finish()
    }
}

impl BackendConfig {
    /// Create a configuration from the required fields
    pub fn new(urls: Vec<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            urls,
            user: user.into(),
            password: password.into(),
            vstore_name: None,
            parallel_num: None,
        }
    }

    /// Scope the session to a vStore
    pub fn with_vstore(mut self, vstore_name: impl Into<String>) -> Self {
        self.vstore_name = Some(vstore_name.into());
        self
    }

    /// Set the concurrency hint
    pub fn with_parallel_num(mut self, parallel_num: u32) -> Self {
        self.parallel_num = Some(parallel_num);
        self
    }

    /// Parse and validate a YAML (or JSON) document
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(input)
            .map_err(|e| Error::Configuration(format!("Invalid backend configuration: {}", e)))?;
        config.validated()
    }

    /// Parse and validate an already-decoded parameter bag
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| Error::Configuration(format!("Invalid backend configuration: {}", e)))?;
        config.validated()
    }

    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Validate field contents, normalizing an empty vStore name to none
    pub fn validated(mut self) -> Result<Self> {
        if self.urls.is_empty() {
            return Err(Error::Configuration("urls must be provided".into()));
        }
        for url in &self.urls {
            let url = url.trim();
            if url.is_empty() {
                return Err(Error::Configuration("urls must not contain empty entries".into()));
            }
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(Error::Configuration(format!(
                    "url {} must use the http or https scheme",
                    url
                )));
            }
        }
        if self.user.is_empty() {
            return Err(Error::Configuration("user must be provided".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Configuration("password must be provided".into()));
        }
        if let Some(n) = self.parallel_num {
            if n == 0 || n > MAX_PARALLEL_NUM {
                return Err(Error::Configuration(format!(
                    "parallelNum must be between 1 and {}, got {}",
                    MAX_PARALLEL_NUM, n
                )));
            }
        }
        if self.vstore_name.as_deref().is_some_and(str::is_empty) {
            self.vstore_name = None;
        }
        Ok(self)
    }

    /// Effective session pool size
    pub fn parallel_limit(&self) -> usize {
        self.parallel_num.unwrap_or(DEFAULT_PARALLEL_NUM) as usize
    }

    /// Render the JSON schema of the configuration file
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(BackendConfig))
            .unwrap_or(serde_json::Value::Null)
    }
}

/// `parallelNum` has historically been written as a string; accept both forms
fn deserialize_parallel_num<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u32),
        Str(String),
    }

    match Option::<NumOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrString::Num(n)) => Ok(Some(n)),
        Some(NumOrString::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(NumOrString::Str(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("parallelNum {:?} is not a number", s))),
    }
}
