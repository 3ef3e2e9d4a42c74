//! Parameter Resolver
//!
//! Builds the canonical provisioning request from the loosely-typed
//! parameters supplied by the orchestration layer. Every recognized key and
//! its effect is listed in [`RECOGNIZED_PARAMETERS`]; anything else is
//! dropped.

use crate::domain::types::SECTOR_SIZE;
use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Description stamped on every provisioned volume
pub const VOLUME_DESCRIPTION: &str = "Created from Kubernetes CSI";

/// How a recognized parameter is carried into the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEffect {
    /// Copied under the lower-cased key, value type preserved
    PassThrough,
    /// Parsed as a boolean token
    Flag,
    /// Copied verbatim as a string
    Text,
}

/// Every parameter key the resolver understands
pub const RECOGNIZED_PARAMETERS: &[(&str, ParamEffect)] = &[
    ("storagepool", ParamEffect::PassThrough),
    ("allocType", ParamEffect::PassThrough),
    ("qos", ParamEffect::PassThrough),
    ("authClient", ParamEffect::PassThrough),
    ("cloneFrom", ParamEffect::PassThrough),
    ("cloneSpeed", ParamEffect::PassThrough),
    ("metroDomain", ParamEffect::PassThrough),
    ("remoteStoragePool", ParamEffect::PassThrough),
    ("sourceSnapshotName", ParamEffect::PassThrough),
    ("sourceVolumeName", ParamEffect::PassThrough),
    ("snapshotParentId", ParamEffect::PassThrough),
    ("applicationType", ParamEffect::PassThrough),
    ("hyperMetro", ParamEffect::Flag),
    ("replication", ParamEffect::Flag),
    ("replicationSyncPeriod", ParamEffect::Text),
    ("vStorePairID", ParamEffect::Text),
];

/// Parse a boolean token, case-insensitively.
///
/// Accepts `true`/`t`/`1`/`yes` and `false`/`f`/`0`/`no`.
pub fn parse_bool_token(token: &str) -> Option<bool> {
    match token.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Round a byte count up to the next sector boundary
pub fn round_up_capacity(requested_size_bytes: i64) -> Result<u64> {
    if requested_size_bytes <= 0 {
        return Err(Error::Validation(format!(
            "requested size must be positive, got {}",
            requested_size_bytes
        )));
    }
    Ok((requested_size_bytes as u64).div_ceil(SECTOR_SIZE) * SECTOR_SIZE)
}

// =============================================================================
// Provisioning Parameters
// =============================================================================

/// Canonical provisioning request, built and discarded per request
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningParameters {
    name: String,
    capacity: u64,
    passthrough: BTreeMap<String, Value>,
    hyper_metro: Option<bool>,
    replication: Option<bool>,
    replication_sync_period: Option<String>,
    vstore_pair_id: Option<String>,
}

impl ProvisioningParameters {
    /// Resolve raw caller parameters into a provisioning request
    pub fn resolve(
        raw: &Map<String, Value>,
        volume_name: &str,
        requested_size_bytes: i64,
    ) -> Result<Self> {
        if volume_name.is_empty() {
            return Err(Error::Validation("volume name must be provided".into()));
        }

        let mut params = Self {
            name: volume_name.to_string(),
            capacity: round_up_capacity(requested_size_bytes)?,
            passthrough: BTreeMap::new(),
            hyper_metro: None,
            replication: None,
            replication_sync_period: None,
            vstore_pair_id: None,
        };

        for (key, effect) in RECOGNIZED_PARAMETERS {
            let Some(value) = raw.get(*key).filter(|v| is_present(v)) else {
                continue;
            };

            match effect {
                ParamEffect::PassThrough => {
                    params.passthrough.insert(key.to_lowercase(), value.clone());
                }
                ParamEffect::Flag => {
                    let Some(token) = string_value(key, value) else {
                        continue;
                    };
                    let flag = parse_bool_token(token).ok_or_else(|| {
                        Error::Validation(format!("{} must be a boolean, got {:?}", key, token))
                    })?;
                    match *key {
                        "hyperMetro" => params.hyper_metro = Some(flag),
                        _ => params.replication = Some(flag),
                    }
                }
                ParamEffect::Text => {
                    let Some(text) = string_value(key, value).map(str::to_string) else {
                        continue;
                    };
                    match *key {
                        "replicationSyncPeriod" => params.replication_sync_period = Some(text),
                        _ => params.vstore_pair_id = Some(text),
                    }
                }
            }
        }

        Ok(params)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &'static str {
        VOLUME_DESCRIPTION
    }

    /// Capacity in bytes, a multiple of 512
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Pass-through value by its lower-cased key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.passthrough.get(key)
    }

    pub fn storage_pool(&self) -> Option<&str> {
        self.get("storagepool").and_then(Value::as_str)
    }

    pub fn hyper_metro(&self) -> Option<bool> {
        self.hyper_metro
    }

    pub fn replication(&self) -> Option<bool> {
        self.replication
    }

    pub fn replication_sync_period(&self) -> Option<&str> {
        self.replication_sync_period.as_deref()
    }

    pub fn vstore_pair_id(&self) -> Option<&str> {
        self.vstore_pair_id.as_deref()
    }

    /// Flatten into the canonical key/value map
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".into(), Value::from(self.name.clone()));
        map.insert("description".into(), Value::from(VOLUME_DESCRIPTION));
        map.insert("capacity".into(), Value::from(self.capacity));
        for (key, value) in &self.passthrough {
            map.insert(key.clone(), value.clone());
        }
        if let Some(flag) = self.hyper_metro {
            map.insert("hypermetro".into(), Value::from(flag));
        }
        if let Some(flag) = self.replication {
            map.insert("replication".into(), Value::from(flag));
        }
        if let Some(period) = &self.replication_sync_period {
            map.insert("replicationSyncPeriod".into(), Value::from(period.clone()));
        }
        if let Some(pair) = &self.vstore_pair_id {
            map.insert("vStorePairID".into(), Value::from(pair.clone()));
        }
        map
    }
}

impl Serialize for ProvisioningParameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

/// Null and the empty string count as absent
fn is_present(value: &Value) -> bool {
    !matches!(value, Value::Null) && value.as_str() != Some("")
}

/// String-typed optional parameters of another JSON type are skipped
fn string_value<'a>(key: &str, value: &'a Value) -> Option<&'a str> {
    let text = value.as_str();
    if text.is_none() {
        warn!("Parameter {} is not a string ({}), ignoring it", key, value);
    }
    text
}
