//! OceanStor Backend
//!
//! Session handling, capability negotiation, pool capacity aggregation,
//! provisioning parameter resolution and QoS validation, tied together by
//! [`OceanstorPlugin`].

pub mod capability;
pub mod params;
pub mod plugin;
pub mod pool;
pub mod qos;
pub mod session;

pub use capability::{derive_capabilities, negotiate};
pub use params::{parse_bool_token, round_up_capacity, ProvisioningParameters};
pub use plugin::{BackendPlugin, OceanstorPlugin, PluginFactory};
pub use pool::{select_pools, PoolSelection, SkipReason};
pub use qos::{QosValidator, SmartXQosTable};
pub use session::{BackendSession, PooledSession, PrimaryGuard};
