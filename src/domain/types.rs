//! Array Metadata Types
//!
//! Product identity, license features, pools and the capability model
//! derived from them.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

// =============================================================================
// Product Identity
// =============================================================================

/// Array generation outside the Dorado lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyGeneration {
    V3,
    V5,
}

/// Product family of the array, resolved once at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductFamily {
    Dorado,
    DoradoV6,
    Other(LegacyGeneration),
}

impl ProductFamily {
    /// True for every all-flash Dorado generation
    pub fn is_dorado(&self) -> bool {
        matches!(self, ProductFamily::Dorado | ProductFamily::DoradoV6)
    }

    /// Parse the system metadata into a product family.
    ///
    /// `V600`/`V700` versions are DoradoV6, `V500` is V5, and `V300` is
    /// either Dorado (8xx product modes) or V3.
    pub fn from_system(system: &SystemInfo) -> Result<Self> {
        let version = system
            .product_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::ProductVersionParse("system info has no PRODUCTVERSION".into())
            })?;

        if version.starts_with("V600") || version.starts_with("V700") {
            return Ok(ProductFamily::DoradoV6);
        }
        if version.starts_with("V500") {
            return Ok(ProductFamily::Other(LegacyGeneration::V5));
        }
        if version.starts_with("V300") {
            let dorado_mode = system
                .product_mode
                .as_deref()
                .and_then(|mode| mode.trim().parse::<u32>().ok())
                .is_some_and(|mode| (800..900).contains(&mode));
            return Ok(if dorado_mode {
                ProductFamily::Dorado
            } else {
                ProductFamily::Other(LegacyGeneration::V3)
            });
        }

        Err(Error::ProductVersionParse(version.to_string()))
    }
}

impl std::fmt::Display for ProductFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductFamily::Dorado => write!(f, "Dorado"),
            ProductFamily::DoradoV6 => write!(f, "DoradoV6"),
            ProductFamily::Other(LegacyGeneration::V3) => write!(f, "V3"),
            ProductFamily::Other(LegacyGeneration::V5) => write!(f, "V5"),
        }
    }
}

impl Serialize for ProductFamily {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// System metadata returned by the array
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "NAME", default)]
    pub name: Option<String>,
    #[serde(rename = "PRODUCTVERSION", default)]
    pub product_version: Option<String>,
    #[serde(rename = "PRODUCTMODE", default)]
    pub product_mode: Option<String>,
    /// Remaining fields, kept for diagnostics
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SystemInfo {
    pub fn new(product_version: impl Into<String>, product_mode: impl Into<String>) -> Self {
        Self {
            product_version: Some(product_version.into()),
            product_mode: Some(product_mode.into()),
            ..Default::default()
        }
    }
}

// =============================================================================
// License Features
// =============================================================================

/// License feature name to enabled state, fetched fresh per negotiation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LicenseFeatureSet(BTreeMap<String, bool>);

impl LicenseFeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a feature from the array's raw status value.
    ///
    /// Status `1` or `true` means enabled; anything else is disabled.
    pub fn insert_status(&mut self, feature: impl Into<String>, status: &serde_json::Value) {
        let enabled = match status {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_i64() == Some(1),
            serde_json::Value::String(s) => s.trim() == "1",
            _ => false,
        };
        self.0.insert(feature.into(), enabled);
    }

    pub fn insert(&mut self, feature: impl Into<String>, enabled: bool) {
        self.0.insert(feature.into(), enabled);
    }

    /// Absent features are disabled
    pub fn is_enabled(&self, feature: &str) -> bool {
        self.0.get(feature).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for LicenseFeatureSet {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Capabilities advertised to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    SupportThin,
    SupportThick,
    SupportQoS,
    SupportMetro,
    SupportMetroNAS,
    SupportReplication,
    SupportApplicationType,
    SupportClone,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::SupportThin,
        Capability::SupportThick,
        Capability::SupportQoS,
        Capability::SupportMetro,
        Capability::SupportMetroNAS,
        Capability::SupportReplication,
        Capability::SupportApplicationType,
        Capability::SupportClone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::SupportThin => "SupportThin",
            Capability::SupportThick => "SupportThick",
            Capability::SupportQoS => "SupportQoS",
            Capability::SupportMetro => "SupportMetro",
            Capability::SupportMetroNAS => "SupportMetroNAS",
            Capability::SupportReplication => "SupportReplication",
            Capability::SupportApplicationType => "SupportApplicationType",
            Capability::SupportClone => "SupportClone",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable result of a capability negotiation
#[derive(Debug, Clone)]
pub struct CapabilitySet {
    flags: BTreeMap<Capability, bool>,
    /// When the negotiation ran
    pub negotiated_at: chrono::DateTime<chrono::Utc>,
}

impl CapabilitySet {
    pub fn new(flags: impl IntoIterator<Item = (Capability, bool)>) -> Self {
        let mut all: BTreeMap<Capability, bool> =
            Capability::ALL.iter().map(|c| (*c, false)).collect();
        all.extend(flags);
        Self {
            flags: all,
            negotiated_at: chrono::Utc::now(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.flags.get(&capability).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, bool)> + '_ {
        self.flags.iter().map(|(c, v)| (*c, *v))
    }

    /// Capability name to flag, the shape the orchestration layer consumes
    pub fn to_map(&self) -> BTreeMap<&'static str, bool> {
        self.iter().map(|(c, v)| (c.as_str(), v)).collect()
    }
}

impl PartialEq for CapabilitySet {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
    }
}

impl Eq for CapabilitySet {}

impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

// =============================================================================
// Pools
// =============================================================================

/// Usage type meaning "unified/any" on DoradoV6 arrays
pub const UNIFIED_POOL_USAGE_TYPE: &str = "0";

/// Sector size used for array capacity accounting
pub const SECTOR_SIZE: u64 = 512;

/// Pool usage requested by a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolUsage {
    /// Block (LUN) pools
    San,
    /// File system pools
    Nas,
}

impl PoolUsage {
    /// Usage-type code reported by the array
    pub fn code(&self) -> &'static str {
        match self {
            PoolUsage::San => "1",
            PoolUsage::Nas => "2",
        }
    }
}

impl std::fmt::Display for PoolUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolUsage::San => write!(f, "san"),
            PoolUsage::Nas => write!(f, "nas"),
        }
    }
}

/// Raw pool metadata as reported by the array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "USAGETYPE", default)]
    pub usage_type: Option<String>,
    /// Alternate usage type reported by newer generations
    #[serde(rename = "NEWUSAGETYPE", default)]
    pub new_usage_type: Option<String>,
    /// Free capacity in sectors, as a decimal string
    #[serde(
        rename = "USERFREECAPACITY",
        default,
        deserialize_with = "deserialize_capacity"
    )]
    pub user_free_capacity: Option<String>,
}

/// Some firmware reports capacities as JSON numbers instead of strings
fn deserialize_capacity<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    Ok(match Option::<NumOrString>::deserialize(deserializer)? {
        None => None,
        Some(NumOrString::Num(n)) => Some(n.to_string()),
        Some(NumOrString::Str(s)) => Some(s),
    })
}

impl Pool {
    pub fn new(
        name: impl Into<String>,
        usage_type: impl Into<String>,
        user_free_capacity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            usage_type: Some(usage_type.into()),
            new_usage_type: None,
            user_free_capacity: Some(user_free_capacity.into()),
        }
    }

    pub fn with_new_usage_type(mut self, usage_type: impl Into<String>) -> Self {
        self.new_usage_type = Some(usage_type.into());
        self
    }
}

/// Usable free capacity of a qualifying pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolCapability {
    pub name: String,
    pub free_capacity_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_product_family_parsing() {
        let cases = [
            ("V600R005C00", "", ProductFamily::DoradoV6),
            ("V700R001C00", "", ProductFamily::DoradoV6),
            ("V500R007C10", "", ProductFamily::Other(LegacyGeneration::V5)),
            ("V300R002C10", "811", ProductFamily::Dorado),
            ("V300R006C50", "61", ProductFamily::Other(LegacyGeneration::V3)),
        ];

        for (version, mode, expected) in cases {
            let system = SystemInfo::new(version, mode);
            assert_eq!(ProductFamily::from_system(&system).unwrap(), expected, "{}", version);
        }
    }

    #[test]
    fn test_product_family_parse_errors() {
        let err = ProductFamily::from_system(&SystemInfo::default()).unwrap_err();
        assert_matches!(err, Error::ProductVersionParse(_));

        let err = ProductFamily::from_system(&SystemInfo::new("6.1.0", "")).unwrap_err();
        assert_matches!(err, Error::ProductVersionParse(v) if v == "6.1.0");

        let err = ProductFamily::from_system(&SystemInfo::new("   ", "")).unwrap_err();
        assert_matches!(err, Error::ProductVersionParse(_));
    }

    #[test]
    fn test_system_info_deserialize() {
        let system: SystemInfo = serde_json::from_value(serde_json::json!({
            "ID": "2102351",
            "NAME": "array-1",
            "PRODUCTVERSION": "V600R005C00",
            "PRODUCTMODE": "812",
            "HEALTHSTATUS": "1",
        }))
        .unwrap();
        assert_eq!(system.product_version.as_deref(), Some("V600R005C00"));
        assert!(system.extra.contains_key("HEALTHSTATUS"));
    }

    #[test]
    fn test_product_family_display() {
        assert_eq!(ProductFamily::DoradoV6.to_string(), "DoradoV6");
        assert_eq!(ProductFamily::Other(LegacyGeneration::V5).to_string(), "V5");
        assert!(ProductFamily::Dorado.is_dorado());
        assert!(!ProductFamily::Other(LegacyGeneration::V3).is_dorado());
    }

    #[test]
    fn test_license_status() {
        let mut features = LicenseFeatureSet::new();
        features.insert_status("SmartThin", &serde_json::json!(1));
        features.insert_status("SmartQoS", &serde_json::json!(2));
        features.insert_status("HyperMetro", &serde_json::json!(true));

        assert!(features.is_enabled("SmartThin"));
        assert!(!features.is_enabled("SmartQoS"));
        assert!(features.is_enabled("HyperMetro"));
        assert!(!features.is_enabled("HyperReplication"));
    }

    #[test]
    fn test_capability_set_defaults_false() {
        let set = CapabilitySet::new([(Capability::SupportClone, true)]);
        assert!(set.supports(Capability::SupportClone));
        assert!(!set.supports(Capability::SupportThin));
        assert_eq!(set.to_map().len(), Capability::ALL.len());

        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["SupportClone"], serde_json::json!(true));
        assert_eq!(json["SupportMetroNAS"], serde_json::json!(false));
    }

    #[test]
    fn test_pool_deserialize() {
        let pool: Pool = serde_json::from_value(serde_json::json!({
            "NAME": "pool1",
            "USAGETYPE": "1",
            "USERFREECAPACITY": "1000",
            "ID": "0",
        }))
        .unwrap();
        assert_eq!(pool, Pool::new("pool1", "1", "1000"));
    }

    #[test]
    fn test_pool_numeric_capacity() {
        let pool: Pool = serde_json::from_value(serde_json::json!({
            "NAME": "pool1",
            "USAGETYPE": "1",
            "USERFREECAPACITY": 1000,
        }))
        .unwrap();
        assert_eq!(pool.user_free_capacity.as_deref(), Some("1000"));

        let pool: Pool = serde_json::from_value(serde_json::json!({"NAME": "pool2"})).unwrap();
        assert_eq!(pool.user_free_capacity, None);
    }
}
