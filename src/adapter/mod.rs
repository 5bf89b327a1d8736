//! Third-party ad network adapters
//!
//! An adapter wraps one ad network SDK. The manager builds adapters through
//! the [`AdapterRegistry`], hands each one a fresh [`BroadcastToken`] inside
//! its configuration payload, and from then on only listens to what the
//! adapter reports through its [`AdapterCallbacks`].

pub mod callbacks;
pub mod registry;

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
};

use log::warn;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::core::AdapterError;

pub use callbacks::{AdapterCallbacks, AdapterEvent};
pub use registry::{AdapterCreateFn, AdapterRegistry};

/// Configuration key under which the broadcast token is injected.
pub const BROADCAST_TOKEN_KEY: &str = "broadcast_token";

/// Opaque key-value configuration handed to an adapter on initialize.
pub type AdapterConfig = Map<String, JsonValue>;

/// Contract every ad network adapter implements.
///
/// Adapters are foreign code: any method may fail, panic, or report back
/// through its callbacks from any thread, including from inside
/// `initialize` or `show` themselves.
pub trait RewardedAdapter: Send + Sync {
    /// Network-specific sub-id. Placements whose adapters share the adapter
    /// type and this id share completion events.
    fn network_id(&self) -> String;

    /// Start loading an ad. The outcome is reported later through
    /// `callbacks.load_success()` or `callbacks.load_failure(..)`.
    fn initialize(
        &mut self,
        config: &AdapterConfig,
        callbacks: AdapterCallbacks,
    ) -> Result<(), AdapterError>;

    /// Whether a loaded ad is ready to play.
    fn has_video(&self) -> bool;

    /// Present the loaded ad.
    fn show(&mut self) -> Result<(), AdapterError>;

    /// Tear down: the binding is being replaced or cleared. Callbacks issued
    /// after this are ignored.
    fn invalidate(&mut self) {}
}

/// Adapter type plus network sub-id; the key used for completion fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterIdentity {
    pub adapter_type: String,
    pub network_id: String,
}

impl AdapterIdentity {
    pub fn new(adapter_type: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            network_id: network_id.into(),
        }
    }
}

impl fmt::Display for AdapterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.adapter_type, self.network_id)
    }
}

/// Correlation key between a live adapter binding and its callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BroadcastToken(Uuid);

impl BroadcastToken {
    pub fn generate() -> Self {
        BroadcastToken(Uuid::new_v4())
    }

    /// Reads the token the manager injected into an adapter configuration.
    pub fn from_config(config: &AdapterConfig) -> Option<Self> {
        config
            .get(BROADCAST_TOKEN_KEY)
            .and_then(JsonValue::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(BroadcastToken)
    }
}

impl fmt::Display for BroadcastToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs a synchronous adapter call, turning a panic into `AdapterError::Panicked`.
pub(crate) fn guarded<T>(
    operation: &str,
    f: impl FnOnce() -> Result<T, AdapterError>,
) -> Result<T, AdapterError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            warn!("Adapter panicked during {operation}: {message}");
            Err(AdapterError::Panicked {
                operation: operation.to_string(),
                message,
            })
        }
    }
}
