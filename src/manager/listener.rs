use std::collections::HashSet;

use crate::core::{ErrorCode, Reward};

/// Application-side receiver of rewarded video events.
///
/// Every method has an empty default, so implementors only override what
/// they care about. All calls happen on the manager's owner context.
pub trait RewardedVideoListener: Send {
    fn on_load_success(&mut self, _placement_id: &str) {}

    fn on_load_failure(&mut self, _placement_id: &str, _code: ErrorCode) {}

    fn on_started(&mut self, _placement_id: &str) {}

    fn on_clicked(&mut self, _placement_id: &str) {}

    fn on_closed(&mut self, _placement_id: &str) {}

    /// One call per distinct reward among the placements being credited.
    fn on_completed(&mut self, _placement_ids: &HashSet<String>, _reward: &Reward) {}
}
