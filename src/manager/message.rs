//! Messages drained by the lifecycle manager on its owner context

use crate::{
    adapter::{AdapterEvent, AdapterIdentity, BroadcastToken},
    core::Reward,
    orchestration::RequestParameters,
    transport::{AdDescriptor, RequestId, TransportError},
};

#[derive(Debug)]
pub(crate) enum Message {
    /// Posted by a `ManagerHandle` from another thread
    Command(Command),
    /// Posted by a transport through its `ResponseSink`
    Response {
        request_id: RequestId,
        result: Result<AdDescriptor, TransportError>,
    },
    /// Posted by an adapter through its `AdapterCallbacks`
    Adapter {
        token: BroadcastToken,
        event: AdapterEvent,
    },
}

#[derive(Debug)]
pub(crate) enum Command {
    Load {
        placement_id: String,
        params: Option<RequestParameters>,
    },
    Show {
        placement_id: String,
    },
    Completed {
        identity: AdapterIdentity,
        reward: Reward,
    },
    Clear,
    Shutdown,
}
