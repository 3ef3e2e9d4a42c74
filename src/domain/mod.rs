//! Domain layer - Core types and port definitions
//!
//! This module defines the array metadata model and the traits (ports) that
//! client adapters implement, following hexagonal architecture principles.

pub mod context;
pub mod ports;
pub mod types;

pub use context::*;
pub use ports::*;
pub use types::*;
