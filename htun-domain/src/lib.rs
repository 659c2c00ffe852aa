//! Core types, errors and the backend bridge contract for the htun HTTP
//! tunnel.
//!
//! This crate defines the vocabulary of the system. The server, the
//! in-process bridge simulator and the example client all speak its types.
//!
//! # Structure
//!
//! - [`error`]    — [`TunnelError`], its [`ErrorKind`] taxonomy, [`Result<T>`] alias
//! - [`tunnel`]   — [`TunnelId`], lifecycle [`Phase`], the id header name
//! - [`config`]   — [`TunnelConfig`] limits and timers
//! - [`bridge`]   — [`BackendBridge`] / [`BridgeHandle`] traits
//! - [`outbound`] — [`OutboundQueue`], the buffered backend-to-client side of a bridge

mod bridge;
mod config;
mod error;
mod outbound;
mod tunnel;

// --- error
pub use error::{ErrorKind, Result, TunnelError};

// --- tunnel
pub use tunnel::{Phase, TunnelId, TUNNEL_ID_HEADER};

// --- config
pub use config::{
    // ---
    TunnelConfig,
    DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_BODY_BYTES,
    DEFAULT_POLL_TIMEOUT,
    DEFAULT_PREFIX,
    DEFAULT_SWEEP_INTERVAL,
};

// --- bridge
pub use bridge::{
    // ---
    BackendBridge,
    BackendBridgePtr,
    BridgeHandle,
    BridgeHandlePtr,
    DataCallback,
};

// --- outbound
pub use outbound::OutboundQueue;
