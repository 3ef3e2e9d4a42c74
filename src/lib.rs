//! OceanStor Backend - Storage Plugin Core
//!
//! Backend plugin core for Huawei OceanStor arrays: authenticates against the
//! array management API, negotiates capabilities, reports pool capacity and
//! validates provisioning requests on behalf of a CSI driver.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                      Orchestration Layer (CSI driver)                       │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                     BackendPlugin / OceanstorPlugin                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐   │
//! │  │  Capability  │  │     Pool     │  │  Parameter   │  │      QoS       │   │
//! │  │  Negotiator  │  │  Aggregator  │  │   Resolver   │  │   Validator    │   │
//! │  └──────┬───────┘  └──────┬───────┘  └──────────────┘  └────────────────┘   │
//! │         │                 │                                                 │
//! │         └────────┬────────┘                                                 │
//! │       ┌──────────┴──────────┐                                               │
//! │       │   Backend Session   │  primary handle + bounded session pool        │
//! │       └──────────┬──────────┘                                               │
//! ├──────────────────┼──────────────────────────────────────────────────────────┤
//! │                  │         ArrayClient port                                 │
//! │  ┌───────────────┴─────────────┐  ┌─────────────────────────────────────┐   │
//! │  │     REST (deviceManager)    │  │        Mock (in-memory array)       │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`backend`]: Session handling and the plugin operations
//! - [`client`]: `ArrayClient` adapters
//! - [`config`]: Backend configuration
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling
//! - [`metrics`]: Prometheus collectors

pub mod backend;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use backend::{
    BackendPlugin, BackendSession, OceanstorPlugin, PluginFactory, PooledSession,
    ProvisioningParameters, QosValidator, SmartXQosTable,
};

pub use client::{MockArray, RestClient, RestClientFactory, RestClientOptions};

pub use config::BackendConfig;

pub use domain::context::RequestContext;

pub use domain::ports::{ArrayClient, ClientFactory, QosCapabilityTable, QosProfile};

pub use domain::types::{
    Capability, CapabilitySet, LegacyGeneration, LicenseFeatureSet, Pool, PoolCapability,
    PoolUsage, ProductFamily, SystemInfo,
};

pub use error::{Error, ErrorKind, Result};

pub use metrics::PluginMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
