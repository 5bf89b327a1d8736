//! Rewarded video lifecycle manager
//!
//! [`LifecycleManager`] is the single owner of placement lifecycle state.
//! Transports, adapters and [`ManagerHandle`]s on other threads only post
//! messages to its queue; the manager applies them one at a time, either
//! through [`LifecycleManager::run_pending`] or the async
//! [`LifecycleManager::run`] loop, and is the only caller of the
//! [`RewardedVideoListener`].

pub mod handle;
pub mod listener;
pub(crate) mod message;


use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serde_json::Value as JsonValue;
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
    time::{sleep_until, Instant as TokioInstant},
};

use crate::{
    adapter::{
        guarded, AdapterCallbacks, AdapterEvent, AdapterIdentity, AdapterRegistry,
        BroadcastToken, RewardedAdapter, BROADCAST_TOKEN_KEY,
    },
    config::Config,
    core::{reward, ErrorCode, Reward},
    metrics,
    orchestration::{AdUrlGenerator, LoadDisposition, RequestOrchestrator, RequestParameters},
    state::{AdapterBinding, BindingStatus, PlacementStateStore},
    transport::{AdDescriptor, RequestId, Transport, TransportError},
};

pub use handle::ManagerHandle;
pub use listener::RewardedVideoListener;

use message::{Command, Message};

pub struct LifecycleManager {
    store: Arc<PlacementStateStore>,
    registry: AdapterRegistry,
    orchestrator: RequestOrchestrator,
    listener: Option<Box<dyn RewardedVideoListener>>,
    mailbox: UnboundedSender<Message>,
    inbox: UnboundedReceiver<Message>,
    adapter_timeout: Duration,
    // Adapters that have not reported a load result yet.
    load_deadlines: HashMap<BroadcastToken, Instant>,
    // Responses that arrived while their placement was on screen.
    parked: HashMap<String, AdDescriptor>,
}

impl LifecycleManager {
    pub fn new(config: &Config, registry: AdapterRegistry, transport: Arc<dyn Transport>) -> Self {
        let (mailbox, inbox) = unbounded_channel();
        let store = Arc::new(PlacementStateStore::new(config.customer_id.clone()));
        let orchestrator = RequestOrchestrator::new(
            transport,
            AdUrlGenerator::from_config(&config.ad_server),
            mailbox.clone(),
            config.ad_server.timeout(),
        );

        Self {
            store,
            registry,
            orchestrator,
            listener: None,
            mailbox,
            inbox,
            adapter_timeout: config.adapter_timeout(),
            load_deadlines: HashMap::new(),
            parked: HashMap::new(),
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle::new(self.mailbox.clone(), self.store.clone())
    }

    pub fn store(&self) -> &PlacementStateStore {
        &self.store
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Replace the listener. `None` turns every notification into a no-op.
    pub fn set_listener(&mut self, listener: Option<Box<dyn RewardedVideoListener>>) {
        self.listener = listener;
    }

    /// Request an ad for `placement_id`.
    ///
    /// A placement that is on screen is left untouched. Otherwise any
    /// in-flight request, parked response or still-loading adapter for it
    /// is superseded.
    pub fn load(
        &mut self,
        placement_id: &str,
        params: Option<RequestParameters>,
    ) -> LoadDisposition {
        if !self.store.is_showing(placement_id) {
            if self.orchestrator.is_pending(placement_id) {
                debug!("Superseding in-flight request for {}", placement_id);
            }
            if self.parked.remove(placement_id).is_some() {
                debug!("Discarding parked response for {}", placement_id);
            }
            if self.store.binding_status(placement_id) == Some(BindingStatus::Loading) {
                debug!("Abandoning loading adapter for {}", placement_id);
                self.disarm(placement_id);
                self.store.unbind(placement_id);
            }
        }
        self.orchestrator
            .load(&self.store, placement_id, params.as_ref())
    }

    pub fn has_video(&self, placement_id: &str) -> bool {
        self.store.has_video(placement_id)
    }

    /// Present the loaded ad for `placement_id`, or report
    /// `VideoNotAvailable` when there is none.
    pub fn show(&mut self, placement_id: &str) {
        if !self.store.has_video(placement_id) {
            info!("No video available for {}", placement_id);
            metrics::record_show(false);
            self.notify(|l| l.on_load_failure(placement_id, ErrorCode::VideoNotAvailable));
            return;
        }

        self.store.set_showing(placement_id);
        self.store
            .transition(placement_id, BindingStatus::Ready, BindingStatus::Shown);
        if let Some(identity) = self.store.identity_for(placement_id) {
            self.store.set_last_shown_reward_for_type(
                &identity.adapter_type,
                self.store.reward_for(placement_id),
            );
        }

        let shown = self
            .store
            .with_adapter(placement_id, |adapter| guarded("show", || adapter.show()));
        match shown {
            Some(Ok(())) => {
                info!("Showing video for {}", placement_id);
                metrics::record_show(true);
            }
            other => {
                let code = match other {
                    Some(Err(e)) => {
                        warn!("Adapter failed to show {}: {}", placement_id, e);
                        ErrorCode::from(&e)
                    }
                    _ => ErrorCode::VideoNotAvailable,
                };
                metrics::record_show(false);
                self.store.clear_showing();
                self.notify(|l| l.on_load_failure(placement_id, code));
                self.resume_parked(placement_id);
            }
        }
    }

    /// Forget every placement and in-flight request. Late responses and
    /// adapter callbacks from before the clear are dropped.
    pub fn clear(&mut self) {
        info!(
            "Clearing rewarded video state with {} request(s) in flight",
            self.orchestrator.in_flight()
        );
        self.orchestrator.clear();
        self.load_deadlines.clear();
        self.parked.clear();
        self.store.clear();
    }

    /// Fail every ad request and adapter load whose deadline has passed.
    /// Returns how many were expired.
    ///
    /// An adapter that misses its deadline is treated like one that
    /// reported a timeout, so a failover URL still applies.
    pub fn expire_overdue(&mut self) -> usize {
        let now = Instant::now();
        let mut expired = 0;

        for (request_id, pending) in self.orchestrator.expire_overdue(now) {
            expired += 1;
            warn!(
                "Ad request {} ({}) for {} timed out",
                request_id, pending.url, pending.placement_id
            );
            self.fail_load(&pending.placement_id, ErrorCode::NetworkTimeout);
        }

        let overdue: Vec<BroadcastToken> = self
            .load_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in overdue {
            self.load_deadlines.remove(&token);
            let Some(placement_id) = self.store.placement_for_token(&token) else {
                continue;
            };
            if self.store.binding_status(&placement_id) != Some(BindingStatus::Loading) {
                continue;
            }
            expired += 1;
            warn!("Adapter for {} did not finish loading in time", placement_id);
            self.load_failed(&placement_id, ErrorCode::NetworkTimeout);
        }
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        let adapters = self.load_deadlines.values().min().copied();
        match (self.orchestrator.next_deadline(), adapters) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn disarm(&mut self, placement_id: &str) {
        if let Some(token) = self.store.token_for(placement_id) {
            self.load_deadlines.remove(&token);
        }
    }

    // ---- identity-addressed adapter events ----

    pub fn on_adapter_load_success(&mut self, identity: &AdapterIdentity) {
        for placement_id in self.store.find_placements_by(identity) {
            self.load_succeeded(&placement_id);
        }
    }

    pub fn on_adapter_load_failure(&mut self, identity: &AdapterIdentity, code: ErrorCode) {
        for placement_id in self.store.find_placements_by(identity) {
            self.load_failed(&placement_id, code.clone());
        }
    }

    pub fn on_adapter_started(&mut self, identity: &AdapterIdentity) {
        for placement_id in self.targets(identity) {
            self.notify(|l| l.on_started(&placement_id));
        }
    }

    pub fn on_adapter_clicked(&mut self, identity: &AdapterIdentity) {
        for placement_id in self.targets(identity) {
            self.notify(|l| l.on_clicked(&placement_id));
        }
    }

    pub fn on_adapter_closed(&mut self, identity: &AdapterIdentity) {
        for placement_id in self.targets(identity) {
            self.closed(&placement_id);
        }
    }

    /// Credit a completed view.
    ///
    /// If the showing placement shares `identity` only it is credited,
    /// otherwise every placement bound to `identity` is. Each placement's
    /// reward is the server-assigned one when successful, else
    /// `network_reward`. The showing marker is cleared afterwards.
    pub fn on_adapter_completed(&mut self, identity: &AdapterIdentity, network_reward: Reward) {
        let targets = self.targets(identity);
        if targets.is_empty() {
            debug!("Completion for {} matched no placements", identity);
        }

        let mut by_reward: HashMap<Reward, HashSet<String>> = HashMap::new();
        for placement_id in targets {
            let chosen = reward::choose(&self.store.reward_for(&placement_id), &network_reward);
            self.store.set_last_shown_reward(&placement_id, chosen.clone());
            by_reward.entry(chosen).or_default().insert(placement_id);
        }

        for (reward, placement_ids) in &by_reward {
            info!(
                "Video completed for {:?} with reward {}",
                placement_ids, reward
            );
            metrics::COMPLETIONS.inc();
            self.notify(|l| l.on_completed(placement_ids, reward));
        }

        self.store.clear_showing();
    }

    // ---- queue ----

    /// Expire overdue loads, then apply every queued message without
    /// waiting. Returns how many messages were handled.
    pub fn run_pending(&mut self) -> usize {
        self.expire_overdue();
        let mut handled = 0;
        while let Ok(message) = self.inbox.try_recv() {
            handled += 1;
            if !self.dispatch(message) {
                break;
            }
        }
        handled
    }

    /// Drain the queue until `shutdown` flips to true or a handle asks the
    /// manager to stop. State is cleared on the way out.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Rewarded video manager started");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping rewarded video manager");
                        break;
                    }
                }
                message = self.inbox.recv() => {
                    let Some(message) = message else { break };
                    if !self.dispatch(message) {
                        info!("Rewarded video manager asked to stop");
                        break;
                    }
                }
                _ = sleep_until(TokioInstant::from_std(deadline.unwrap_or_else(Instant::now))), if deadline.is_some() => {
                    self.expire_overdue();
                }
            }
        }
        self.clear();
    }

    // Returns false once the manager should stop.
    fn dispatch(&mut self, message: Message) -> bool {
        match message {
            Message::Command(command) => return self.execute(command),
            Message::Response { request_id, result } => self.on_response(request_id, result),
            Message::Adapter { token, event } => self.on_adapter_event(token, event),
        }
        true
    }

    fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Load {
                placement_id,
                params,
            } => {
                self.load(&placement_id, params);
            }
            Command::Show { placement_id } => self.show(&placement_id),
            Command::Completed { identity, reward } => self.on_adapter_completed(&identity, reward),
            Command::Clear => self.clear(),
            Command::Shutdown => return false,
        }
        true
    }

    // ---- responses ----

    fn on_response(&mut self, request_id: RequestId, result: Result<AdDescriptor, TransportError>) {
        let Some(pending) = self.orchestrator.complete(request_id) else {
            debug!("Dropping response for superseded request {}", request_id);
            return;
        };
        let placement_id = pending.placement_id;

        match result {
            Ok(descriptor) => self.on_descriptor(&placement_id, descriptor),
            Err(e) => {
                warn!(
                    "Ad request {} for {} failed: {}",
                    pending.url, placement_id, e
                );
                self.fail_load(&placement_id, e.error_code());
            }
        }
    }

    fn on_descriptor(&mut self, placement_id: &str, descriptor: AdDescriptor) {
        if self.store.is_showing(placement_id) {
            info!("Holding response for {} until its video closes", placement_id);
            self.parked.insert(placement_id.to_string(), descriptor);
            return;
        }

        self.store.set_reward(placement_id, descriptor.reward());
        let AdDescriptor {
            adapter_type,
            mut adapter_config,
            failover_url,
            ..
        } = descriptor;
        let failover_url = failover_url.filter(|url| !url.is_empty());

        let adapter = match self.registry.instantiate(&adapter_type) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("Unable to build adapter for {}: {}", placement_id, e);
                self.fail_over_or_report(
                    placement_id,
                    failover_url.as_deref(),
                    ErrorCode::AdapterConfiguration,
                );
                return;
            }
        };
        let network_id = match guarded("network_id", || Ok(adapter.network_id())) {
            Ok(network_id) => network_id,
            Err(e) => {
                discard(adapter);
                self.fail_over_or_report(placement_id, failover_url.as_deref(), ErrorCode::from(&e));
                return;
            }
        };

        let token = BroadcastToken::generate();
        adapter_config.insert(
            BROADCAST_TOKEN_KEY.to_string(),
            JsonValue::String(token.to_string()),
        );
        let identity = AdapterIdentity::new(adapter_type, network_id);
        self.store.bind_adapter(
            placement_id,
            AdapterBinding::new(identity, token, adapter, failover_url.clone()),
        );

        let callbacks = AdapterCallbacks::new(token, self.mailbox.clone());
        let initialized = self.store.with_adapter(placement_id, |adapter| {
            guarded("initialize", || adapter.initialize(&adapter_config, callbacks))
        });
        match initialized {
            Some(Err(e)) => {
                warn!("Adapter failed to initialize for {}: {}", placement_id, e);
                self.store.unbind(placement_id);
                self.fail_over_or_report(placement_id, failover_url.as_deref(), ErrorCode::from(&e));
            }
            _ => {
                self.load_deadlines
                    .insert(token, Instant::now() + self.adapter_timeout);
            }
        }
    }

    fn resume_parked(&mut self, placement_id: &str) {
        if let Some(descriptor) = self.parked.remove(placement_id) {
            debug!("Binding held response for {}", placement_id);
            self.on_descriptor(placement_id, descriptor);
        }
    }

    fn fail_over_or_report(&mut self, placement_id: &str, failover_url: Option<&str>, code: ErrorCode) {
        match failover_url {
            Some(url) => {
                self.orchestrator.failover(placement_id, url);
            }
            None => self.fail_load(placement_id, code),
        }
    }

    fn fail_load(&mut self, placement_id: &str, code: ErrorCode) {
        info!("Load failed for {}: {}", placement_id, code);
        metrics::record_load(false);
        self.notify(|l| l.on_load_failure(placement_id, code));
    }

    // ---- token-addressed adapter events ----

    fn on_adapter_event(&mut self, token: BroadcastToken, event: AdapterEvent) {
        let Some(placement_id) = self.store.placement_for_token(&token) else {
            debug!("Dropping {:?} from stale adapter {}", event, token);
            return;
        };

        match event {
            AdapterEvent::LoadSuccess => self.load_succeeded(&placement_id),
            AdapterEvent::LoadFailure(code) => self.load_failed(&placement_id, code),
            AdapterEvent::Started => self.notify(|l| l.on_started(&placement_id)),
            AdapterEvent::Clicked => self.notify(|l| l.on_clicked(&placement_id)),
            AdapterEvent::Closed => self.closed(&placement_id),
            AdapterEvent::Completed(reward) => {
                if let Some(identity) = self.store.identity_for(&placement_id) {
                    self.on_adapter_completed(&identity, reward);
                }
            }
        }
    }

    fn load_succeeded(&mut self, placement_id: &str) {
        self.disarm(placement_id);
        if !self
            .store
            .transition(placement_id, BindingStatus::Loading, BindingStatus::Ready)
        {
            debug!("Ignoring repeated load success for {}", placement_id);
            return;
        }
        info!("Video loaded for {}", placement_id);
        metrics::record_load(true);
        self.notify(|l| l.on_load_success(placement_id));
    }

    fn load_failed(&mut self, placement_id: &str, code: ErrorCode) {
        if self.store.binding_status(placement_id) != Some(BindingStatus::Loading) {
            debug!("Ignoring load failure for {} outside loading", placement_id);
            return;
        }
        let failover_url = self
            .store
            .failover_url_for(placement_id)
            .filter(|url| !url.is_empty());
        self.disarm(placement_id);
        self.store.unbind(placement_id);
        self.fail_over_or_report(placement_id, failover_url.as_deref(), code);
    }

    fn closed(&mut self, placement_id: &str) {
        if self.store.is_showing(placement_id) {
            self.store.clear_showing();
        }
        self.notify(|l| l.on_closed(placement_id));
        self.resume_parked(placement_id);
    }

    // The showing placement alone when it shares `identity`, else all of them.
    fn targets(&self, identity: &AdapterIdentity) -> HashSet<String> {
        let mut placements = self.store.find_placements_by(identity);
        match self.store.showing() {
            Some(showing) if placements.contains(&showing) => {
                placements.retain(|id| *id == showing);
                placements
            }
            _ => placements,
        }
    }

    fn notify(&mut self, f: impl FnOnce(&mut dyn RewardedVideoListener)) {
        match self.listener.as_mut() {
            Some(listener) => f(listener.as_mut()),
            None => debug!("No rewarded video listener set"),
        }
    }
}

// Tear down an adapter that never got bound.
fn discard(mut adapter: Box<dyn RewardedAdapter>) {
    let _ = guarded("invalidate", || {
        adapter.invalidate();
        Ok(())
    });
}
