//! Transport boundary
//!
//! The manager never performs HTTP itself. It hands an [`AdRequest`] to a
//! [`Transport`] together with a [`ResponseSink`]; whoever performs the
//! request completes the sink from whatever thread it likes, and the outcome
//! is queued back onto the manager.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::{runtime::Handle, sync::mpsc::UnboundedSender};

use crate::{
    adapter::AdapterConfig,
    core::{ErrorCode, ManagerError, ManagerResult, Reward},
    manager::message::Message,
};

/// Identifier of one in-flight ad request.
pub type RequestId = u64;

/// Outbound ad request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdRequest {
    pub request_id: RequestId,
    pub placement_id: String,
    pub url: String,
}

/// Decoded ad server response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdDescriptor {
    /// Adapter type identifier, resolved through the adapter registry.
    pub adapter_type: String,
    /// Opaque adapter configuration payload.
    #[serde(default)]
    pub adapter_config: AdapterConfig,
    /// Next candidate to request if this one cannot be used.
    #[serde(default)]
    pub failover_url: Option<String>,
    #[serde(default)]
    pub reward_label: Option<String>,
    #[serde(default)]
    pub reward_amount: Option<String>,
}

impl AdDescriptor {
    pub fn new(adapter_type: impl Into<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            ..Default::default()
        }
    }

    pub fn with_failover_url(mut self, url: impl Into<String>) -> Self {
        self.failover_url = Some(url.into());
        self
    }

    pub fn with_reward(mut self, label: impl Into<String>, amount: impl Into<String>) -> Self {
        self.reward_label = Some(label.into());
        self.reward_amount = Some(amount.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.adapter_config.insert(key.into(), value.into());
        self
    }

    /// Decode a descriptor from a JSON response body
    pub fn from_json(body: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(body).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    /// The locally configured reward carried by this response
    pub fn reward(&self) -> Reward {
        Reward::from_response(self.reward_label.as_deref(), self.reward_amount.as_deref())
    }
}

/// Failures of the transport itself. None of these trigger failover.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("ad server returned status {0}")]
    Status(u16),
    #[error("malformed ad response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Error code reported to the listener for this failure
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TransportError::Timeout => ErrorCode::NetworkTimeout,
            TransportError::Connection(_) => ErrorCode::NetworkError,
            TransportError::Status(204) => ErrorCode::NoFill,
            TransportError::Status(_) | TransportError::Malformed(_) => ErrorCode::ServerError,
        }
    }
}

/// One-shot completion handle for an ad request.
///
/// A sink dropped without being completed answers its request with
/// `TransportError::Connection`, so a transport that loses a request (or
/// panics while serving it) still ends the load.
#[derive(Debug)]
pub struct ResponseSink {
    request_id: RequestId,
    mailbox: Option<UnboundedSender<Message>>,
}

impl ResponseSink {
    pub(crate) fn new(request_id: RequestId, mailbox: UnboundedSender<Message>) -> Self {
        Self {
            request_id,
            mailbox: Some(mailbox),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn complete(mut self, result: Result<AdDescriptor, TransportError>) {
        self.post(result);
    }

    pub fn succeed(self, descriptor: AdDescriptor) {
        self.complete(Ok(descriptor));
    }

    pub fn fail(self, error: TransportError) {
        self.complete(Err(error));
    }

    fn post(&mut self, result: Result<AdDescriptor, TransportError>) {
        let Some(mailbox) = self.mailbox.take() else {
            return;
        };
        let message = Message::Response {
            request_id: self.request_id,
            result,
        };
        if mailbox.send(message).is_err() {
            debug!(
                "Manager is gone, dropping response for request {}",
                self.request_id
            );
        }
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if self.mailbox.is_some() {
            debug!("Request {} dropped without a response", self.request_id);
            self.post(Err(TransportError::Connection(
                "response sink dropped".to_string(),
            )));
        }
    }
}

/// Performs ad requests. Implementations must eventually complete the sink
/// exactly once; dropping it without completing leaves the load unanswered.
pub trait Transport: Send + Sync {
    fn send(&self, request: AdRequest, sink: ResponseSink);
}

/// Async flavour of [`Transport`], bridged with [`SpawnedTransport`].
#[async_trait]
pub trait AsyncTransport: Send + Sync + 'static {
    async fn send(&self, request: AdRequest) -> Result<AdDescriptor, TransportError>;
}

/// Runs an [`AsyncTransport`] on a tokio runtime, one task per request.
pub struct SpawnedTransport<T> {
    inner: Arc<T>,
    runtime: Handle,
    timeout: Option<Duration>,
}

impl<T: AsyncTransport> SpawnedTransport<T> {
    pub fn new(inner: T, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(inner),
            runtime,
            timeout: None,
        }
    }

    /// Bind to the runtime of the calling context
    pub fn on_current_runtime(inner: T) -> ManagerResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| ManagerError::Configuration(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(inner, runtime))
    }

    /// Fail requests that take longer than `timeout` with `TransportError::Timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<T: AsyncTransport> Transport for SpawnedTransport<T> {
    fn send(&self, request: AdRequest, sink: ResponseSink) {
        let inner = self.inner.clone();
        let timeout = self.timeout;
        self.runtime.spawn(async move {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, inner.send(request))
                    .await
                    .unwrap_or(Err(TransportError::Timeout)),
                None => inner.send(request).await,
            };
            sink.complete(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    struct FixedTransport {
        delay: Duration,
    }

    #[async_trait]
    impl AsyncTransport for FixedTransport {
        async fn send(&self, request: AdRequest) -> Result<AdDescriptor, TransportError> {
            tokio::time::sleep(self.delay).await;
            Ok(AdDescriptor::new("test").with_config("url", request.url))
        }
    }

    fn request() -> AdRequest {
        AdRequest {
            request_id: 7,
            placement_id: "testAdUnit".to_string(),
            url: "https://ads.example.com/m/ad?id=testAdUnit".to_string(),
        }
    }

    #[tokio::test]
    async fn test_spawned_transport_completes_sink() {
        let (sender, mut receiver) = unbounded_channel();
        let transport = SpawnedTransport::on_current_runtime(FixedTransport {
            delay: Duration::from_millis(1),
        })
        .unwrap();

        transport.send(request(), ResponseSink::new(7, sender));

        match receiver.recv().await.unwrap() {
            Message::Response { request_id, result } => {
                assert_eq!(request_id, 7);
                assert_eq!(result.unwrap().adapter_type, "test");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawned_transport_times_out() {
        let (sender, mut receiver) = unbounded_channel();
        let transport = SpawnedTransport::on_current_runtime(FixedTransport {
            delay: Duration::from_secs(5),
        })
        .unwrap()
        .with_timeout(Duration::from_millis(10));

        transport.send(request(), ResponseSink::new(7, sender));

        match receiver.recv().await.unwrap() {
            Message::Response { result, .. } => assert_eq!(result, Err(TransportError::Timeout)),
            other => panic!("unexpected message {other:?}"),
        }
    }

    struct PanickingTransport;

    #[async_trait]
    impl AsyncTransport for PanickingTransport {
        async fn send(&self, _request: AdRequest) -> Result<AdDescriptor, TransportError> {
            panic!("transport bug")
        }
    }

    #[test]
    fn test_dropped_sink_reports_connection_error() {
        let (sender, mut receiver) = unbounded_channel();
        drop(ResponseSink::new(3, sender.clone()));
        ResponseSink::new(4, sender).succeed(AdDescriptor::new("test"));

        match receiver.try_recv().unwrap() {
            Message::Response { request_id, result } => {
                assert_eq!(request_id, 3);
                assert!(matches!(result, Err(TransportError::Connection(_))));
            }
            other => panic!("unexpected message {other:?}"),
        }
        // a completed sink answers exactly once
        match receiver.try_recv().unwrap() {
            Message::Response { request_id, result } => {
                assert_eq!(request_id, 4);
                assert!(result.is_ok());
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spawned_transport_panic_still_answers() {
        let (sender, mut receiver) = unbounded_channel();
        let transport = SpawnedTransport::on_current_runtime(PanickingTransport).unwrap();

        transport.send(request(), ResponseSink::new(7, sender));

        match receiver.recv().await.unwrap() {
            Message::Response { request_id, result } => {
                assert_eq!(request_id, 7);
                assert!(matches!(result, Err(TransportError::Connection(_))));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(TransportError::Timeout.error_code(), ErrorCode::NetworkTimeout);
        assert_eq!(
            TransportError::Connection("reset".to_string()).error_code(),
            ErrorCode::NetworkError
        );
        assert_eq!(TransportError::Status(204).error_code(), ErrorCode::NoFill);
        assert_eq!(TransportError::Status(503).error_code(), ErrorCode::ServerError);
    }

    #[test]
    fn test_descriptor_from_json() {
        let body = br#"{
            "adapter_type": "vungle",
            "adapter_config": {"app_id": "abc"},
            "failover_url": "https://ads.example.com/fail",
            "reward_label": "coins",
            "reward_amount": "25"
        }"#;
        let descriptor = AdDescriptor::from_json(body).unwrap();
        assert_eq!(descriptor.adapter_type, "vungle");
        assert_eq!(descriptor.adapter_config["app_id"], "abc");
        assert_eq!(descriptor.failover_url.as_deref(), Some("https://ads.example.com/fail"));
        assert_eq!(descriptor.reward(), Reward::success("coins", 25));

        assert!(matches!(
            AdDescriptor::from_json(b"not json"),
            Err(TransportError::Malformed(_))
        ));
    }
}
