use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::{
    adapter::AdapterIdentity,
    core::{ManagerError, ManagerResult, Reward},
    orchestration::RequestParameters,
    state::PlacementStateStore,
};

use super::message::{Command, Message};

/// Cloneable, thread-safe front door to a running `LifecycleManager`.
///
/// Mutating calls are queued and take effect when the manager drains its
/// queue. Queries read the shared placement store directly.
#[derive(Clone)]
pub struct ManagerHandle {
    mailbox: UnboundedSender<Message>,
    store: Arc<PlacementStateStore>,
}

impl ManagerHandle {
    pub(crate) fn new(mailbox: UnboundedSender<Message>, store: Arc<PlacementStateStore>) -> Self {
        Self { mailbox, store }
    }

    pub fn load(
        &self,
        placement_id: impl Into<String>,
        params: Option<RequestParameters>,
    ) -> ManagerResult<()> {
        self.post(Command::Load {
            placement_id: placement_id.into(),
            params,
        })
    }

    pub fn show(&self, placement_id: impl Into<String>) -> ManagerResult<()> {
        self.post(Command::Show {
            placement_id: placement_id.into(),
        })
    }

    /// Report a completion that arrived out of band, e.g. from a
    /// server-side verification.
    pub fn report_completed(&self, identity: AdapterIdentity, reward: Reward) -> ManagerResult<()> {
        self.post(Command::Completed { identity, reward })
    }

    pub fn clear(&self) -> ManagerResult<()> {
        self.post(Command::Clear)
    }

    pub fn shutdown(&self) -> ManagerResult<()> {
        self.post(Command::Shutdown)
    }

    pub fn has_video(&self, placement_id: &str) -> bool {
        self.store.has_video(placement_id)
    }

    pub fn is_showing(&self, placement_id: &str) -> bool {
        self.store.is_showing(placement_id)
    }

    /// Reward credited for the most recent completed view of
    /// `placement_id`, `Reward::Failure` if none.
    pub fn last_shown_reward(&self, placement_id: &str) -> Reward {
        self.store.last_shown_reward(placement_id)
    }

    pub fn customer_id(&self) -> Option<String> {
        self.store.customer_id()
    }

    fn post(&self, command: Command) -> ManagerResult<()> {
        self.mailbox
            .send(Message::Command(command))
            .map_err(|_| ManagerError::Stopped)
    }
}
