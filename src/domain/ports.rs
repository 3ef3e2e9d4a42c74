//! Domain Ports - Collaborator traits consumed by the plugin
//!
//! These traits define the boundaries between the negotiation logic and the
//! array's management API. Adapters implement them to provide concrete
//! transports.

use crate::config::BackendConfig;
use crate::domain::context::RequestContext;
use crate::domain::types::{LicenseFeatureSet, Pool, ProductFamily, SystemInfo};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Array Client Port
// =============================================================================

/// One session against the array's management API.
///
/// A client holds at most one authentication token and must not be used by
/// overlapping operations.
#[async_trait]
pub trait ArrayClient: Send + Sync {
    /// Authenticate, trying the configured endpoints in order
    async fn login(&self, ctx: &RequestContext) -> Result<()>;

    /// Drop the authentication token
    async fn logout(&self, ctx: &RequestContext) -> Result<()>;

    /// Fetch system metadata
    async fn get_system(&self, ctx: &RequestContext) -> Result<SystemInfo>;

    /// Fetch license feature states
    async fn get_license_feature(&self, ctx: &RequestContext) -> Result<LicenseFeatureSet>;

    /// Fetch the full pool catalog keyed by pool name
    async fn get_all_pools(&self, ctx: &RequestContext) -> Result<BTreeMap<String, Pool>>;

    /// Endpoint of the current session, if logged in
    fn endpoint(&self) -> Option<String>;
}

/// Mints fresh, unauthenticated clients
pub trait ClientFactory: Send + Sync {
    fn create(&self, config: &BackendConfig) -> Result<Arc<dyn ArrayClient>>;
}

// =============================================================================
// QoS Capability Port
// =============================================================================

/// Parsed QoS profile: parameter name to integer limit
pub type QosProfile = BTreeMap<String, i64>;

/// Per-product table of supported QoS parameters
pub trait QosCapabilityTable: Send + Sync {
    /// Fail with a validation error naming the first unsupported field
    fn check(&self, product: ProductFamily, profile: &QosProfile) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ArrayClientRef = Arc<dyn ArrayClient>;
pub type ClientFactoryRef = Arc<dyn ClientFactory>;
pub type QosCapabilityTableRef = Arc<dyn QosCapabilityTable>;
