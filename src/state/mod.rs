//! Placement state store
//!
//! The only shared mutable resource in the crate. The owner context is the
//! only writer; `has_video` and the other lookups may be called from any
//! thread through a `ManagerHandle`.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use log::{debug, info, warn};

use crate::{
    adapter::{guarded, AdapterIdentity, BroadcastToken, RewardedAdapter},
    core::Reward,
};

/// Where a bound adapter is in its load/show cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStatus {
    /// Initialized, waiting for the adapter to report its load outcome
    Loading,
    /// Loaded; playable if the adapter agrees
    Ready,
    /// Shown once; needs a fresh load before it can be shown again
    Shown,
}

// Adapter calls run on this lock, never under a placement entry guard.
type SharedAdapter = Arc<Mutex<Box<dyn RewardedAdapter>>>;

/// A live adapter instance owned by one placement
pub struct AdapterBinding {
    identity: AdapterIdentity,
    token: BroadcastToken,
    adapter: SharedAdapter,
    status: BindingStatus,
    failover_url: Option<String>,
}

impl AdapterBinding {
    pub fn new(
        identity: AdapterIdentity,
        token: BroadcastToken,
        adapter: Box<dyn RewardedAdapter>,
        failover_url: Option<String>,
    ) -> Self {
        Self {
            identity,
            token,
            adapter: Arc::new(Mutex::new(adapter)),
            status: BindingStatus::Loading,
            failover_url,
        }
    }

    pub fn identity(&self) -> &AdapterIdentity {
        &self.identity
    }

    pub fn token(&self) -> BroadcastToken {
        self.token
    }

    pub fn status(&self) -> BindingStatus {
        self.status
    }

    fn invalidate(self) {
        debug!("Invalidating adapter {} ({})", self.identity, self.token);
        let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = guarded("invalidate", || {
            adapter.invalidate();
            Ok(())
        }) {
            warn!("Adapter {} failed to invalidate: {}", self.identity, e);
        }
    }
}

#[derive(Default)]
struct Placement {
    binding: Option<AdapterBinding>,
    reward: Reward,
    last_shown_reward: Reward,
    customer_id: Option<String>,
}

/// Thread-safe per-placement state plus the process-wide showing marker
pub struct PlacementStateStore {
    placements: DashMap<String, Placement>,
    tokens: DashMap<BroadcastToken, String>,
    showing: ArcSwapOption<String>,
    last_shown_by_type: DashMap<String, Reward>,
    default_customer_id: Option<String>,
    customer_id: ArcSwapOption<String>,
}

impl Default for PlacementStateStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PlacementStateStore {
    pub fn new(default_customer_id: Option<String>) -> Self {
        Self {
            placements: DashMap::new(),
            tokens: DashMap::new(),
            showing: ArcSwapOption::empty(),
            last_shown_by_type: DashMap::new(),
            customer_id: ArcSwapOption::from(default_customer_id.clone().map(Arc::new)),
            default_customer_id,
        }
    }

    /// Create the placement record if this is the first time we see it
    pub fn ensure(&self, placement_id: &str) {
        self.placements
            .entry(placement_id.to_string())
            .or_default();
    }

    pub fn contains(&self, placement_id: &str) -> bool {
        self.placements.contains_key(placement_id)
    }

    pub fn placement_ids(&self) -> Vec<String> {
        self.placements.iter().map(|entry| entry.key().clone()).collect()
    }

    // ---- showing marker ----

    /// Mark a placement as the one on screen. Last show wins.
    pub fn set_showing(&self, placement_id: &str) {
        if let Some(previous) = self.showing.swap(Some(Arc::new(placement_id.to_string()))) {
            if previous.as_str() != placement_id {
                debug!("Showing marker moved from {} to {}", previous, placement_id);
            }
        }
    }

    pub fn clear_showing(&self) {
        self.showing.store(None);
    }

    pub fn showing(&self) -> Option<String> {
        self.showing.load_full().map(|id| id.as_ref().clone())
    }

    pub fn is_showing(&self, placement_id: &str) -> bool {
        self.showing
            .load()
            .as_deref()
            .is_some_and(|id| id == placement_id)
    }

    // ---- adapter bindings ----

    /// Bind a new adapter to a placement, invalidating the previous one first.
    pub fn bind_adapter(&self, placement_id: &str, binding: AdapterBinding) {
        self.unbind(placement_id);

        info!(
            "Binding adapter {} to placement {} ({})",
            binding.identity, placement_id, binding.token
        );
        self.tokens
            .insert(binding.token, placement_id.to_string());
        self.placements
            .entry(placement_id.to_string())
            .or_default()
            .binding = Some(binding);
    }

    /// Drop and invalidate the placement's binding. Returns whether one existed.
    pub fn unbind(&self, placement_id: &str) -> bool {
        let old = self
            .placements
            .get_mut(placement_id)
            .and_then(|mut placement| placement.binding.take());

        match old {
            Some(old) => {
                self.tokens.remove(&old.token);
                old.invalidate();
                true
            }
            None => false,
        }
    }

    /// Run `f` against the bound adapter.
    ///
    /// The placement entry is released before `f` runs, so the adapter may
    /// query the store (e.g. `has_video`) from inside the call.
    pub fn with_adapter<R>(
        &self,
        placement_id: &str,
        f: impl FnOnce(&mut dyn RewardedAdapter) -> R,
    ) -> Option<R> {
        let adapter = self.shared_adapter(placement_id)?;
        let mut adapter = adapter.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(adapter.as_mut()))
    }

    fn shared_adapter(&self, placement_id: &str) -> Option<SharedAdapter> {
        self.placements
            .get(placement_id)?
            .binding
            .as_ref()
            .map(|b| b.adapter.clone())
    }

    /// The placement currently bound to `token`, if the token is still live
    pub fn placement_for_token(&self, token: &BroadcastToken) -> Option<String> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }

    pub fn token_for(&self, placement_id: &str) -> Option<BroadcastToken> {
        self.placements
            .get(placement_id)?
            .binding
            .as_ref()
            .map(AdapterBinding::token)
    }

    pub fn identity_for(&self, placement_id: &str) -> Option<AdapterIdentity> {
        self.placements
            .get(placement_id)?
            .binding
            .as_ref()
            .map(|b| b.identity.clone())
    }

    pub fn binding_status(&self, placement_id: &str) -> Option<BindingStatus> {
        self.placements
            .get(placement_id)?
            .binding
            .as_ref()
            .map(AdapterBinding::status)
    }

    pub fn failover_url_for(&self, placement_id: &str) -> Option<String> {
        self.placements
            .get(placement_id)?
            .binding
            .as_ref()
            .and_then(|b| b.failover_url.clone())
    }

    /// Move a binding from `from` to `to`. Returns false if the binding is
    /// missing or in another state, which is how duplicate adapter callbacks
    /// are detected.
    pub fn transition(&self, placement_id: &str, from: BindingStatus, to: BindingStatus) -> bool {
        let Some(mut placement) = self.placements.get_mut(placement_id) else {
            return false;
        };
        match placement.binding.as_mut() {
            Some(binding) if binding.status == from => {
                binding.status = to;
                true
            }
            _ => false,
        }
    }

    /// A placement has video when its adapter loaded, has not been shown
    /// since, and still reports itself playable.
    ///
    /// Never blocks on the adapter: one that is busy in another call counts
    /// as not playable.
    pub fn has_video(&self, placement_id: &str) -> bool {
        let adapter = match self.placements.get(placement_id) {
            Some(placement) => match placement.binding.as_ref() {
                Some(binding) if binding.status == BindingStatus::Ready => binding.adapter.clone(),
                _ => return false,
            },
            None => return false,
        };
        let Ok(adapter) = adapter.try_lock() else {
            return false;
        };
        guarded("has_video", || Ok(adapter.has_video())).unwrap_or(false)
    }

    /// All placements bound to an adapter with this identity
    pub fn find_placements_by(&self, identity: &AdapterIdentity) -> HashSet<String> {
        self.placements
            .iter()
            .filter(|entry| {
                entry
                    .binding
                    .as_ref()
                    .is_some_and(|b| &b.identity == identity)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    // ---- rewards ----

    pub fn set_reward(&self, placement_id: &str, reward: Reward) {
        self.placements
            .entry(placement_id.to_string())
            .or_default()
            .reward = reward;
    }

    pub fn reward_for(&self, placement_id: &str) -> Reward {
        self.placements
            .get(placement_id)
            .map(|p| p.reward.clone())
            .unwrap_or_default()
    }

    pub fn set_last_shown_reward(&self, placement_id: &str, reward: Reward) {
        self.placements
            .entry(placement_id.to_string())
            .or_default()
            .last_shown_reward = reward;
    }

    pub fn last_shown_reward(&self, placement_id: &str) -> Reward {
        self.placements
            .get(placement_id)
            .map(|p| p.last_shown_reward.clone())
            .unwrap_or_default()
    }

    pub fn set_last_shown_reward_for_type(&self, adapter_type: &str, reward: Reward) {
        self.last_shown_by_type
            .insert(adapter_type.to_string(), reward);
    }

    pub fn last_shown_reward_for(&self, adapter_type: &str) -> Reward {
        self.last_shown_by_type
            .get(adapter_type)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    // ---- customer id ----

    /// Persist a customer id on the placement; it also becomes the current
    /// process-wide customer id.
    pub fn set_customer_id(&self, placement_id: &str, customer_id: &str) {
        self.placements
            .entry(placement_id.to_string())
            .or_default()
            .customer_id = Some(customer_id.to_string());
        self.customer_id
            .store(Some(Arc::new(customer_id.to_string())));
    }

    /// The placement's own customer id, else the process-wide one
    pub fn customer_id_for(&self, placement_id: &str) -> Option<String> {
        self.placements
            .get(placement_id)
            .and_then(|p| p.customer_id.clone())
            .or_else(|| self.customer_id())
    }

    pub fn customer_id(&self) -> Option<String> {
        self.customer_id.load_full().map(|id| id.as_ref().clone())
    }

    /// Drop every placement, invalidating all live bindings.
    pub fn clear(&self) {
        let ids = self.placement_ids();
        info!("Clearing state for {} placements", ids.len());
        for id in &ids {
            self.unbind(id);
        }
        self.placements.clear();
        self.tokens.clear();
        self.last_shown_by_type.clear();
        self.clear_showing();
        self.customer_id
            .store(self.default_customer_id.clone().map(Arc::new));
    }
}
