//! Array Client Adapters
//!
//! Provides adapters for the array management API:
//! - REST: HTTPS/JSON `deviceManager/rest` transport
//! - Mock: in-memory array for tests and benches

pub mod mock;
pub mod rest;

pub use mock::*;
pub use rest::*;
