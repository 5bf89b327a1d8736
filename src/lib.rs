//! rvmediator: lifecycle manager for mediated rewarded video ads.
//!
//! The crate requests ads from a mediation server, binds the ad network
//! adapter named in each response to its placement, relays the adapter's
//! events to a single application listener, and decides which reward to
//! grant when a video completes.

#![allow(clippy::upper_case_acronyms)]

pub mod adapter;
pub mod config;
pub mod core;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod orchestration;
pub mod state;
pub mod transport;

pub use adapter::{
    AdapterCallbacks, AdapterConfig, AdapterIdentity, AdapterRegistry, BroadcastToken,
    RewardedAdapter,
};
pub use config::Config;
pub use crate::core::{AdapterError, ErrorCode, ManagerError, ManagerResult, Reward};
pub use manager::{LifecycleManager, ManagerHandle, RewardedVideoListener};
pub use orchestration::{LoadDisposition, RequestParameters};
pub use transport::{
    AdDescriptor, AdRequest, AsyncTransport, ResponseSink, SpawnedTransport, Transport,
    TransportError,
};
