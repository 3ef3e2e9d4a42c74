//! QoS Validator
//!
//! Checks a requested QoS profile against the SmartX parameter table of the
//! array's product family. No I/O.

use crate::domain::ports::{QosCapabilityTable, QosCapabilityTableRef, QosProfile};
use crate::domain::types::ProductFamily;
use crate::error::{Error, Result};
use std::sync::Arc;

const IOTYPE: &str = "IOTYPE";
const MAX_BANDWIDTH: &str = "MAXBANDWIDTH";
const MAX_IOPS: &str = "MAXIOPS";
const MIN_BANDWIDTH: &str = "MINBANDWIDTH";
const MIN_IOPS: &str = "MINIOPS";
const LATENCY: &str = "LATENCY";

/// Read/write I/O type, the only one Dorado arrays accept
const IOTYPE_READ_WRITE: i64 = 2;

// =============================================================================
// Value Rules
// =============================================================================

/// Accepted values of one QoS parameter
#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Not supported on this product
    Unsupported,
    /// One of the listed values
    OneOf(&'static [i64]),
    /// Strictly greater than the bound
    GreaterThan(i64),
}

impl Rule {
    fn check(&self, field: &str, value: i64) -> Result<()> {
        let reason = match self {
            Rule::Unsupported => "not supported on this product".to_string(),
            Rule::OneOf(allowed) if !allowed.contains(&value) => {
                format!("value {} must be one of {:?}", value, allowed)
            }
            Rule::GreaterThan(bound) if value <= *bound => {
                format!("value {} must be greater than {}", value, bound)
            }
            _ => return Ok(()),
        };
        Err(Error::UnsupportedQos {
            field: field.to_string(),
            reason,
        })
    }
}

fn rule_for(product: ProductFamily, field: &str) -> Rule {
    match (product, field) {
        (ProductFamily::Other(_), IOTYPE) => Rule::OneOf(&[0, 1, 2]),
        (_, IOTYPE) => Rule::OneOf(&[IOTYPE_READ_WRITE]),

        (_, MAX_BANDWIDTH) => Rule::GreaterThan(0),
        (ProductFamily::DoradoV6, MAX_IOPS) => Rule::GreaterThan(100),
        (_, MAX_IOPS) => Rule::GreaterThan(0),

        (ProductFamily::Dorado, MIN_BANDWIDTH | MIN_IOPS | LATENCY) => Rule::Unsupported,
        (ProductFamily::DoradoV6, MIN_IOPS) => Rule::GreaterThan(100),
        (ProductFamily::DoradoV6, LATENCY) => Rule::OneOf(&[500, 1500]),
        (_, MIN_BANDWIDTH | MIN_IOPS | LATENCY) => Rule::GreaterThan(0),

        _ => Rule::Unsupported,
    }
}

// =============================================================================
// SmartX Table
// =============================================================================

/// Built-in SmartX QoS parameter table
#[derive(Debug, Clone, Copy, Default)]
pub struct SmartXQosTable;

impl QosCapabilityTable for SmartXQosTable {
    fn check(&self, product: ProductFamily, profile: &QosProfile) -> Result<()> {
        // BTreeMap iteration is sorted, so the reported field is stable
        for (field, value) in profile {
            rule_for(product, field).check(field, *value)?;
        }

        if !profile.contains_key(IOTYPE) {
            return Err(Error::UnsupportedQos {
                field: IOTYPE.into(),
                reason: "IOTYPE must be specified".into(),
            });
        }
        if profile.len() == 1 {
            return Err(Error::UnsupportedQos {
                field: IOTYPE.into(),
                reason: "at least one limit besides IOTYPE is required".into(),
            });
        }

        if matches!(product, ProductFamily::Other(_)) {
            let upper = [MAX_BANDWIDTH, MAX_IOPS]
                .iter()
                .any(|k| profile.contains_key(*k));
            let lower = [MIN_BANDWIDTH, MIN_IOPS, LATENCY]
                .iter()
                .find(|k| profile.contains_key(**k));
            if let (true, Some(field)) = (upper, lower) {
                return Err(Error::UnsupportedQos {
                    field: field.to_string(),
                    reason: "upper and lower limits cannot be combined".into(),
                });
            }
        }

        Ok(())
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Parses QoS profiles and checks them against a capability table
#[derive(Clone)]
pub struct QosValidator {
    table: QosCapabilityTableRef,
}

impl Default for QosValidator {
    fn default() -> Self {
        Self::new(Arc::new(SmartXQosTable))
    }
}

impl std::fmt::Debug for QosValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QosValidator").finish_non_exhaustive()
    }
}

impl QosValidator {
    pub fn new(table: QosCapabilityTableRef) -> Self {
        Self { table }
    }

    /// Parse a QoS profile from its JSON object form
    pub fn parse_profile(qos_config: &str) -> Result<QosProfile> {
        let value: serde_json::Value = serde_json::from_str(qos_config)
            .map_err(|e| Error::Validation(format!("QoS config is not valid JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::Validation("QoS config must be a JSON object".into()))?;

        object
            .iter()
            .map(|(key, value)| {
                value.as_i64().map(|v| (key.to_uppercase(), v)).ok_or_else(|| {
                    Error::UnsupportedQos {
                        field: key.clone(),
                        reason: format!("value {} is not an integer", value),
                    }
                })
            })
            .collect()
    }

    /// Validate `qos_config` for `product`, naming the first unsupported field
    pub fn validate(&self, product: ProductFamily, qos_config: &str) -> Result<()> {
        let profile = Self::parse_profile(qos_config)?;
        self.table.check(product, &profile)
    }
}
