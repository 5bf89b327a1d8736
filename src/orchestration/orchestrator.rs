//! Request orchestration
//!
//! Issues ad requests, chains failover URLs, and keeps the table that maps
//! in-flight requests back to their placements. Lives on the owner context.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    manager::message::Message,
    metrics,
    state::PlacementStateStore,
    transport::{AdRequest, RequestId, ResponseSink, Transport},
};

use super::request::{AdUrlGenerator, RequestParameters};

/// What happened to a load call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDisposition {
    /// An ad request went out; the outcome arrives through the listener
    Requested(RequestId),
    /// The placement is on screen; nothing was sent and nobody is notified
    NotAttempted,
}

/// An ad request waiting for its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub placement_id: String,
    pub url: String,
    pub failover: bool,
    /// When the request is given up as timed out
    pub deadline: Instant,
}

pub struct RequestOrchestrator {
    transport: Arc<dyn Transport>,
    url_generator: AdUrlGenerator,
    mailbox: UnboundedSender<Message>,
    request_timeout: Duration,
    next_request_id: RequestId,
    pending: HashMap<RequestId, PendingRequest>,
    // newest request per placement; older ones are superseded
    latest: HashMap<String, RequestId>,
}

impl RequestOrchestrator {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        url_generator: AdUrlGenerator,
        mailbox: UnboundedSender<Message>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            url_generator,
            mailbox,
            request_timeout,
            next_request_id: 1,
            pending: HashMap::new(),
            latest: HashMap::new(),
        }
    }

    /// Build and send the initial ad request for a placement.
    pub fn load(
        &mut self,
        store: &PlacementStateStore,
        placement_id: &str,
        params: Option<&RequestParameters>,
    ) -> LoadDisposition {
        if store.is_showing(placement_id) {
            info!("Placement {} is showing, not loading", placement_id);
            return LoadDisposition::NotAttempted;
        }

        store.ensure(placement_id);
        if let Some(customer_id) = params.and_then(|p| p.customer_id.as_deref()) {
            store.set_customer_id(placement_id, customer_id);
        }
        let customer_id = store.customer_id_for(placement_id);

        let url = self.url_generator.generate(
            placement_id,
            params.and_then(|p| p.keywords.as_deref()),
            params.and_then(|p| p.user_data_keywords.as_deref()),
            customer_id.as_deref(),
        );

        LoadDisposition::Requested(self.issue(placement_id, url, false))
    }

    /// Request the next candidate of a failover chain.
    pub fn failover(&mut self, placement_id: &str, url: &str) -> RequestId {
        info!("Placement {} failing over to {}", placement_id, url);
        self.issue(placement_id, url.to_string(), true)
    }

    fn issue(&mut self, placement_id: &str, url: String, failover: bool) -> RequestId {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        if let Some(previous) = self.latest.insert(placement_id.to_string(), request_id) {
            if self.pending.remove(&previous).is_some() {
                debug!(
                    "Request {} for {} superseded by {}",
                    previous, placement_id, request_id
                );
            }
        }
        self.pending.insert(
            request_id,
            PendingRequest {
                placement_id: placement_id.to_string(),
                url: url.clone(),
                failover,
                deadline: Instant::now() + self.request_timeout,
            },
        );
        metrics::record_request(failover);

        debug!("Sending request {} for {}: {}", request_id, placement_id, url);
        let request = AdRequest {
            request_id,
            placement_id: placement_id.to_string(),
            url,
        };
        self.transport
            .send(request, ResponseSink::new(request_id, self.mailbox.clone()));

        request_id
    }

    /// Claim the pending entry for a response. `None` means the request was
    /// superseded or already answered and the response must be dropped.
    pub fn complete(&mut self, request_id: RequestId) -> Option<PendingRequest> {
        let pending = self.pending.remove(&request_id)?;
        if self.latest.get(&pending.placement_id) == Some(&request_id) {
            self.latest.remove(&pending.placement_id);
        }
        Some(pending)
    }

    /// Remove and return every request whose deadline is at or before `now`.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<(RequestId, PendingRequest)> {
        let overdue: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(request_id, _)| *request_id)
            .collect();

        overdue
            .into_iter()
            .filter_map(|request_id| Some((request_id, self.complete(request_id)?)))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    pub fn is_pending(&self, placement_id: &str) -> bool {
        self.latest.contains_key(placement_id)
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.latest.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        requests: Mutex<Vec<AdRequest>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, request: AdRequest, _sink: ResponseSink) {
            self.requests.lock().unwrap().push(request);
        }
    }

    fn orchestrator() -> (RequestOrchestrator, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let (sender, _receiver) = unbounded_channel();
        let orchestrator = RequestOrchestrator::new(
            transport.clone(),
            AdUrlGenerator::new("https://ads.example.com/m/ad"),
            sender,
            Duration::from_secs(10),
        );
        (orchestrator, transport)
    }

    #[test]
    fn test_load_while_showing_is_not_attempted() {
        let (mut orchestrator, transport) = orchestrator();
        let store = PlacementStateStore::default();
        store.set_showing("testAdUnit");

        assert_eq!(
            orchestrator.load(&store, "testAdUnit", None),
            LoadDisposition::NotAttempted
        );
        assert!(transport.requests.lock().unwrap().is_empty());
        assert!(!store.contains("testAdUnit"));
    }

    #[test]
    fn test_load_builds_url_with_keywords_and_customer_id() {
        let (mut orchestrator, transport) = orchestrator();
        let store = PlacementStateStore::default();
        let params = RequestParameters::new("nonsense;garbage;keywords").with_customer_id("cid");

        orchestrator.load(&store, "testAdUnit", Some(&params));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.contains("id=testAdUnit"));
        assert!(requests[0].url.contains("q=nonsense%3Bgarbage%3Bkeywords"));
        assert!(requests[0].url.contains("customer_id=cid"));
        assert_eq!(store.customer_id().as_deref(), Some("cid"));
    }

    #[test]
    fn test_customer_id_is_reused_on_later_loads() {
        let (mut orchestrator, transport) = orchestrator();
        let store = PlacementStateStore::default();

        orchestrator.load(
            &store,
            "testAdUnit",
            Some(&RequestParameters::default().with_customer_id("cid")),
        );
        orchestrator.load(&store, "testAdUnit", None);

        let requests = transport.requests.lock().unwrap();
        assert!(requests[1].url.contains("customer_id=cid"));
    }

    #[test]
    fn test_newer_request_supersedes_older() {
        let (mut orchestrator, _transport) = orchestrator();
        let store = PlacementStateStore::default();

        let LoadDisposition::Requested(first) = orchestrator.load(&store, "a", None) else {
            panic!("expected a request");
        };
        let LoadDisposition::Requested(second) = orchestrator.load(&store, "a", None) else {
            panic!("expected a request");
        };

        assert_ne!(first, second);
        assert!(orchestrator.complete(first).is_none());
        let pending = orchestrator.complete(second).unwrap();
        assert_eq!(pending.placement_id, "a");
        assert!(!pending.failover);
        assert!(!orchestrator.is_pending("a"));
        assert_eq!(orchestrator.in_flight(), 0);
    }

    #[test]
    fn test_failover_requests_the_given_url() {
        let (mut orchestrator, transport) = orchestrator();
        let request_id = orchestrator.failover("a", "fail.url");

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].url, "fail.url");
        assert_eq!(requests[0].request_id, request_id);
        drop(requests);

        assert!(orchestrator.complete(request_id).unwrap().failover);
    }

    #[test]
    fn test_overdue_requests_expire() {
        let (mut orchestrator, _transport) = orchestrator();
        let store = PlacementStateStore::default();
        assert!(orchestrator.next_deadline().is_none());

        let LoadDisposition::Requested(request_id) = orchestrator.load(&store, "a", None) else {
            panic!("expected a request");
        };
        let deadline = orchestrator.next_deadline().unwrap();

        assert!(orchestrator
            .expire_overdue(deadline - Duration::from_millis(1))
            .is_empty());
        let expired = orchestrator.expire_overdue(deadline);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, request_id);
        assert_eq!(expired[0].1.placement_id, "a");
        assert!(!orchestrator.is_pending("a"));
        assert!(orchestrator.complete(request_id).is_none());
    }

    #[test]
    fn test_distinct_placements_do_not_supersede_each_other() {
        let (mut orchestrator, _transport) = orchestrator();
        let store = PlacementStateStore::default();

        let LoadDisposition::Requested(a) = orchestrator.load(&store, "a", None) else {
            panic!("expected a request");
        };
        let LoadDisposition::Requested(b) = orchestrator.load(&store, "b", None) else {
            panic!("expected a request");
        };

        assert!(orchestrator.complete(a).is_some());
        assert!(orchestrator.complete(b).is_some());
    }
}
