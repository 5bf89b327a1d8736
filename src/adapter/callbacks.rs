use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    core::{ErrorCode, Reward},
    manager::message::Message,
};

use super::BroadcastToken;

/// Something an adapter reports about its own lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    LoadSuccess,
    LoadFailure(ErrorCode),
    Started,
    Clicked,
    Closed,
    Completed(Reward),
}

/// Callback surface handed to an adapter on initialize.
///
/// Every call only posts a message to the manager's queue, so adapters may
/// invoke these from any thread, and from inside `initialize` or `show`.
#[derive(Debug, Clone)]
pub struct AdapterCallbacks {
    token: BroadcastToken,
    mailbox: UnboundedSender<Message>,
}

impl AdapterCallbacks {
    pub(crate) fn new(token: BroadcastToken, mailbox: UnboundedSender<Message>) -> Self {
        Self { token, mailbox }
    }

    pub fn token(&self) -> BroadcastToken {
        self.token
    }

    pub fn load_success(&self) {
        self.post(AdapterEvent::LoadSuccess);
    }

    pub fn load_failure(&self, code: ErrorCode) {
        self.post(AdapterEvent::LoadFailure(code));
    }

    pub fn started(&self) {
        self.post(AdapterEvent::Started);
    }

    pub fn clicked(&self) {
        self.post(AdapterEvent::Clicked);
    }

    pub fn closed(&self) {
        self.post(AdapterEvent::Closed);
    }

    pub fn completed(&self, reward: Reward) {
        self.post(AdapterEvent::Completed(reward));
    }

    fn post(&self, event: AdapterEvent) {
        let message = Message::Adapter {
            token: self.token,
            event,
        };
        if let Err(e) = self.mailbox.send(message) {
            debug!("Manager is gone, dropping adapter event: {:?}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    #[test]
    fn test_events_carry_the_token() {
        let (sender, mut receiver) = unbounded_channel();
        let token = BroadcastToken::generate();
        let callbacks = AdapterCallbacks::new(token, sender);

        callbacks.load_success();
        callbacks.completed(Reward::success("coins", 10));

        match receiver.try_recv().unwrap() {
            Message::Adapter { token: t, event } => {
                assert_eq!(t, token);
                assert_eq!(event, AdapterEvent::LoadSuccess);
            }
            other => panic!("unexpected message {other:?}"),
        }
        match receiver.try_recv().unwrap() {
            Message::Adapter { event, .. } => {
                assert_eq!(event, AdapterEvent::Completed(Reward::success("coins", 10)));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_posting_after_manager_dropped_is_silent() {
        let (sender, receiver) = unbounded_channel();
        drop(receiver);
        let callbacks = AdapterCallbacks::new(BroadcastToken::generate(), sender);
        callbacks.closed();
    }
}
