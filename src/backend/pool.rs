//! Pool Capacity Aggregator
//!
//! Filters the array's pool catalog down to the requested pools usable for
//! a given usage type and converts their free capacity from sectors to
//! bytes.

use crate::domain::context::RequestContext;
use crate::domain::ports::ArrayClient;
use crate::domain::types::{
    Pool, PoolCapability, PoolUsage, SECTOR_SIZE, UNIFIED_POOL_USAGE_TYPE,
};
use crate::error::Result;
use crate::metrics::PluginMetrics;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// Why a requested pool was left out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not in the catalog
    Missing,
    /// Usage type does not match
    WrongUsage { usage_type: Option<String> },
    /// Free capacity missing, malformed or out of range
    BadCapacity { raw: Option<String> },
}

impl SkipReason {
    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::Missing => "missing",
            SkipReason::WrongUsage { .. } => "wrong_usage",
            SkipReason::BadCapacity { .. } => "bad_capacity",
        }
    }
}

/// Outcome of filtering a catalog
#[derive(Debug, Clone, Default)]
pub struct PoolSelection {
    /// Qualifying pools in requested order
    pub pools: IndexMap<String, PoolCapability>,
    /// Requested pools left out
    pub skipped: Vec<(String, SkipReason)>,
}

/// True when the pool serves `usage` or is unified
pub fn pool_qualifies(pool: &Pool, usage: PoolUsage) -> bool {
    let usage_type = pool.usage_type.as_deref();
    usage_type == Some(usage.code())
        || usage_type == Some(UNIFIED_POOL_USAGE_TYPE)
        || pool.new_usage_type.as_deref() == Some(UNIFIED_POOL_USAGE_TYPE)
}

/// Free capacity in bytes, or `None` when the raw field is unusable
pub fn free_capacity_bytes(pool: &Pool) -> Option<u64> {
    pool.user_free_capacity
        .as_deref()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .and_then(|sectors| sectors.checked_mul(SECTOR_SIZE))
}

/// Select and convert the requested pools from a fetched catalog.
///
/// Never fails: unusable pools are reported in `skipped`.
pub fn select_pools(
    catalog: &BTreeMap<String, Pool>,
    requested: &[String],
    usage: PoolUsage,
) -> PoolSelection {
    let mut selection = PoolSelection::default();

    for name in requested {
        if selection.pools.contains_key(name) {
            continue;
        }

        let Some(pool) = catalog.get(name) else {
            warn!("Pool {} does not exist", name);
            selection.skipped.push((name.clone(), SkipReason::Missing));
            continue;
        };

        if !pool_qualifies(pool, usage) {
            warn!("Pool {} is not for {}", name, usage);
            selection.skipped.push((
                name.clone(),
                SkipReason::WrongUsage {
                    usage_type: pool.usage_type.clone(),
                },
            ));
            continue;
        }

        match free_capacity_bytes(pool) {
            Some(free_capacity_bytes) => {
                selection.pools.insert(
                    name.clone(),
                    PoolCapability {
                        name: name.clone(),
                        free_capacity_bytes,
                    },
                );
            }
            None => {
                warn!(
                    "Pool {} has unusable free capacity {:?}, skipping",
                    name, pool.user_free_capacity
                );
                selection.skipped.push((
                    name.clone(),
                    SkipReason::BadCapacity {
                        raw: pool.user_free_capacity.clone(),
                    },
                ));
            }
        }
    }

    selection
}

/// Fetch the catalog once and return the capacities of qualifying pools.
///
/// Only a failed catalog fetch is an error; missing or disqualified pools
/// are skipped and the result may be empty.
pub async fn aggregate(
    client: &dyn ArrayClient,
    requested: &[String],
    usage: PoolUsage,
    metrics: &PluginMetrics,
    ctx: &RequestContext,
) -> Result<IndexMap<String, PoolCapability>> {
    let catalog = match ctx.query("GetAllPools", client.get_all_pools(ctx)).await {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("Get all pools error: {}", e);
            metrics.record_pool_refresh(false);
            return Err(e);
        }
    };
    debug!("Fetched {} pools", catalog.len());

    let selection = select_pools(&catalog, requested, usage);
    for (_, reason) in &selection.skipped {
        metrics.record_pool_skipped(reason.label());
    }
    metrics.record_pool_refresh(true);

    Ok(selection.pools)
}
