//! Ad request orchestration
//!
//! This module turns load calls into ad requests and tracks them until
//! their responses come back.

pub mod orchestrator;
pub mod request;

pub use orchestrator::{LoadDisposition, PendingRequest, RequestOrchestrator};
pub use request::{AdUrlGenerator, RequestParameters};
