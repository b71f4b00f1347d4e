//! Event reporting.
//!
//! A finalized event goes to two independent sinks:
//!
//! 1. the remote reporting API, fire-and-forget on its own task
//! 2. the in-process message sink drained by the persistence task, with the
//!    local queue as a direct fallback when the sink is closed or full
//!
//! Neither branch can fail the caller.

use crate::config::ReportingConfig;
use crate::types::TrackerError;
use async_trait::async_trait;
use outreach_store::{EventQueue, OutreachEvent, OutreachKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Message type tag carried on the sink
pub const EVENT_MESSAGE_TYPE: &str = "connect-event";

/// Typed message delivered to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutreachMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: OutreachEvent,
}

impl OutreachMessage {
    pub fn new(payload: OutreachEvent) -> Self {
        Self {
            msg_type: EVENT_MESSAGE_TYPE.to_string(),
            payload,
        }
    }
}

/// Body posted to the remote API
#[derive(Debug, Serialize)]
struct RemoteBody<'a> {
    #[serde(rename = "recipientName")]
    recipient_name: &'a str,
}

/// Remote reporting channel
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn push(&self, event: &OutreachEvent) -> Result<(), TrackerError>;
}

/// POSTs `{"recipientName": ...}` to a per-kind endpoint
pub struct HttpRemoteSink {
    client: Client,
    connect_endpoint: Option<String>,
    message_endpoint: Option<String>,
}

impl HttpRemoteSink {
    pub fn new(config: &ReportingConfig) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            connect_endpoint: config.connect_endpoint.clone(),
            message_endpoint: config.message_endpoint.clone(),
        })
    }

    fn endpoint(&self, kind: OutreachKind) -> Option<&str> {
        match kind {
            OutreachKind::Connect => self.connect_endpoint.as_deref(),
            OutreachKind::Message => self.message_endpoint.as_deref(),
        }
    }
}

#[async_trait]
impl RemoteSink for HttpRemoteSink {
    async fn push(&self, event: &OutreachEvent) -> Result<(), TrackerError> {
        let endpoint = self
            .endpoint(event.kind)
            .ok_or(TrackerError::NoEndpoint(event.kind))?;

        let response = self
            .client
            .post(endpoint)
            .json(&RemoteBody {
                recipient_name: &event.name,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::RemoteStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        debug!("Remote accepted {} event for {:?}", event.kind, event.name);
        Ok(())
    }
}

/// Formats finalized events and hands them to both sinks
#[derive(Clone)]
pub struct ActionReporter {
    remote: Option<Arc<dyn RemoteSink>>,
    sink: mpsc::Sender<OutreachMessage>,
    queue: Arc<Mutex<EventQueue>>,
}

impl ActionReporter {
    pub fn new(
        remote: Option<Arc<dyn RemoteSink>>,
        sink: mpsc::Sender<OutreachMessage>,
        queue: Arc<Mutex<EventQueue>>,
    ) -> Self {
        Self { remote, sink, queue }
    }

    /// Build the remote sink from configuration, if enabled
    pub fn remote_from_config(config: &ReportingConfig) -> Option<Arc<dyn RemoteSink>> {
        if !config.remote_enabled {
            return None;
        }
        match HttpRemoteSink::new(config) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                warn!("Remote reporting disabled: {}", e);
                None
            }
        }
    }

    /// Emit `event` to both sinks. Returns once the local branch settled;
    /// the remote push keeps running in the background.
    pub async fn report(&self, event: OutreachEvent) -> Option<JoinHandle<()>> {
        info!(
            "📤 {} {} ({})",
            event.kind.activity(),
            event.display_name(),
            event.status
        );

        let remote = self.remote.as_ref().map(|remote| {
            let remote = Arc::clone(remote);
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = remote.push(&event).await {
                    warn!("Remote report failed for {:?}: {}", event.name, e);
                }
            })
        });

        match self.sink.try_send(OutreachMessage::new(event)) {
            Ok(()) => trace!("Event delivered to message sink"),
            Err(e) => {
                let reason = match &e {
                    mpsc::error::TrySendError::Full(_) => "full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                };
                warn!("Message sink {}, storing event locally", reason);
                let message = e.into_inner();
                if let Err(e) = self.queue.lock().await.push(&message.payload) {
                    error!("Failed to store event locally: {}", e);
                }
            }
        }

        remote
    }
}

/// Persistence collaborator: drain the message sink into the local queue
pub async fn persist_messages(mut rx: mpsc::Receiver<OutreachMessage>, queue: Arc<Mutex<EventQueue>>) {
    while let Some(message) = rx.recv().await {
        if message.msg_type != EVENT_MESSAGE_TYPE {
            trace!("Ignoring message of type {}", message.msg_type);
            continue;
        }
        match queue.lock().await.push(&message.payload) {
            Ok(()) => debug!("Persisted {} event", message.payload.kind),
            Err(e) => error!("Failed to persist event: {}", e),
        }
    }
    debug!("Message sink closed, persistence stopped");
}
