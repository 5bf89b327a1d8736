//! Core value types shared by every rvmediator component
//!
//! Errors, error codes and rewards live here so that the registry, the
//! store, the orchestrator and the manager can use them without depending
//! on each other.

pub mod error;
pub mod reward;

// Re-export commonly used types
pub use error::{AdapterError, ErrorCode, ErrorContext, ManagerError, ManagerResult};
pub use reward::{choose, Reward};
