//! In-process backend bridge for htun unit and integration testing.
//!
//! [`SimBridge`] implements [`htun_domain::BackendBridge`] with shared
//! in-memory buffers instead of real sockets. Each connected tunnel gets a
//! [`SimPeer`] that plays the application: it sees every byte the switch
//! delivered and can produce bytes for the client to poll.
//! [`SimBridgeConfig`] controls injected faults:
//!
//! - Connect refusal and connect delay
//! - Write failure after N accepted writes
//! - Teardown failure
//! - Echo mode (inbound bytes mirrored to the outbound side)
//!
//! # Quick start
//!
//! ```rust
//! use htun_bridge_sim::{SimBridge, SimBridgeConfig};
//!
//! let bridge = SimBridge::new(SimBridgeConfig::echo());
//! ```

mod bridge;
mod config;
mod handle;

// --- public API
pub use bridge::SimBridge;
pub use config::SimBridgeConfig;
pub use handle::SimPeer;
