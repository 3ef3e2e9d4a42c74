//! Capability Negotiator
//!
//! Derives the backend capability set from license feature state and the
//! product family.

use crate::domain::context::RequestContext;
use crate::domain::ports::ArrayClient;
use crate::domain::types::{Capability, CapabilitySet, LicenseFeatureSet, ProductFamily};
use crate::error::Result;
use tracing::{debug, error};

/// License feature gating each feature-backed capability
const FEATURE_RULES: [(Capability, &str); 5] = [
    (Capability::SupportThin, "SmartThin"),
    (Capability::SupportQoS, "SmartQoS"),
    (Capability::SupportMetro, "HyperMetro"),
    (Capability::SupportMetroNAS, "HyperMetroNAS"),
    (Capability::SupportReplication, "HyperReplication"),
];

/// Apply the capability rules. Pure function of its inputs.
pub fn derive_capabilities(product: ProductFamily, features: &LicenseFeatureSet) -> CapabilitySet {
    let from_features = FEATURE_RULES
        .iter()
        .map(|(capability, feature)| (*capability, features.is_enabled(feature)));

    let from_product = [
        // Dorado arrays are all-flash and thin-only
        (Capability::SupportThick, !product.is_dorado()),
        (
            Capability::SupportApplicationType,
            product == ProductFamily::DoradoV6,
        ),
        (Capability::SupportClone, true),
    ];

    CapabilitySet::new(from_features.chain(from_product))
}

/// Fetch license features once and derive the capability set.
///
/// Query errors propagate unchanged; retrying is up to the caller.
pub async fn negotiate(
    client: &dyn ArrayClient,
    product: ProductFamily,
    ctx: &RequestContext,
) -> Result<CapabilitySet> {
    let features = ctx
        .query("GetLicenseFeature", client.get_license_feature(ctx))
        .await
        .map_err(|e| {
            error!("Get license feature error: {}", e);
            e
        })?;

    debug!("License features: {:?}", features);
    Ok(derive_capabilities(product, &features))
}
