use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::types::{ApprovalDecision, ApprovalRequest, DecisionKind};
use crate::error::UpstreamError;
use crate::pipeline::Recommendation;

/// What a delivery looks like from the outside: still waiting, or decided.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryStatus {
    Pending,
    Decided(Vec<ApprovalDecision>),
}

/// The formatted message a channel delivers to reviewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPayload {
    pub request_id: String,
    pub expires_at: DateTime<Utc>,
    pub outputs: Vec<Recommendation>,
}

/// The closed set of notification transports.
///
/// Every variant answers the same two-method contract (`send` a formatted
/// request, `check_status` of a delivery), so the approval gate never
/// branches on transport. Adding a transport means adding a variant here.
#[derive(Debug)]
pub enum NotificationChannel {
    /// Request dropped as JSON in an outbox directory; decisions read from
    /// an inbox file a reviewer (or tooling) writes.
    FileBased(FileChannel),
    /// Request POSTed to a review service; decisions polled over HTTP.
    Webhook(WebhookChannel),
    /// Scriptable in-process variant for tests and the demo.
    InMemory(InMemoryChannel),
}

impl NotificationChannel {
    /// Deliver a request, returning the delivery id used for polling.
    pub async fn send(
        &self,
        request: &ApprovalRequest,
        outputs: &[Recommendation],
    ) -> Result<String, UpstreamError> {
        let payload = ApprovalPayload {
            request_id: request.request_id.clone(),
            expires_at: request.expires_at,
            outputs: outputs.to_vec(),
        };
        match self {
            NotificationChannel::FileBased(channel) => channel.send(&payload),
            NotificationChannel::Webhook(channel) => channel.send(&payload).await,
            NotificationChannel::InMemory(channel) => channel.send(&payload),
        }
    }

    pub async fn check_status(&self, delivery_id: &str) -> Result<DeliveryStatus, UpstreamError> {
        match self {
            NotificationChannel::FileBased(channel) => channel.check_status(delivery_id),
            NotificationChannel::Webhook(channel) => channel.check_status(delivery_id).await,
            NotificationChannel::InMemory(channel) => channel.check_status(delivery_id),
        }
    }
}

/// Outbox/inbox file transport.
#[derive(Debug)]
pub struct FileChannel {
    outbox: PathBuf,
    inbox: PathBuf,
}

impl FileChannel {
    pub fn new(outbox: impl Into<PathBuf>, inbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
            inbox: inbox.into(),
        }
    }

    fn send(&self, payload: &ApprovalPayload) -> Result<String, UpstreamError> {
        std::fs::create_dir_all(&self.outbox)
            .map_err(|e| UpstreamError::Other(e.to_string()))?;
        let path = self.outbox.join(format!("{}.json", payload.request_id));
        let blob = serde_json::to_vec_pretty(payload)
            .map_err(|e| UpstreamError::Other(e.to_string()))?;
        std::fs::write(path, blob).map_err(|e| UpstreamError::Other(e.to_string()))?;
        Ok(payload.request_id.clone())
    }

    fn check_status(&self, delivery_id: &str) -> Result<DeliveryStatus, UpstreamError> {
        let path = self.inbox.join(format!("{delivery_id}.json"));
        if !path.exists() {
            return Ok(DeliveryStatus::Pending);
        }
        let blob = std::fs::read(path).map_err(|e| UpstreamError::Other(e.to_string()))?;
        let decisions: Vec<ApprovalDecision> =
            serde_json::from_slice(&blob).map_err(|e| UpstreamError::Other(e.to_string()))?;
        Ok(DeliveryStatus::Decided(decisions))
    }
}

#[derive(Debug, Deserialize)]
struct DeliveryReceipt {
    delivery_id: String,
}

#[derive(Debug, Deserialize)]
struct DeliveryStatusBody {
    status: String,
    #[serde(default)]
    decisions: Vec<ApprovalDecision>,
}

/// HTTP transport to an external review service.
#[derive(Debug)]
pub struct WebhookChannel {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl WebhookChannel {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            token,
        }
    }

    fn map_transport(err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Network(err.to_string())
        }
    }

    async fn map_failure(response: reqwest::Response) -> UpstreamError {
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return UpstreamError::Http {
                status: status.as_u16(),
                message: "rate limited".to_string(),
                retry_after_ms: retry_after,
            };
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        UpstreamError::Http {
            status: status.as_u16(),
            message,
            retry_after_ms: None,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn send(&self, payload: &ApprovalPayload) -> Result<String, UpstreamError> {
        let url = format!("{}/requests", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(payload)
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(Self::map_failure(response).await);
        }

        let receipt = response
            .json::<DeliveryReceipt>()
            .await
            .map_err(|e| UpstreamError::Other(format!("malformed receipt: {e}")))?;
        Ok(receipt.delivery_id)
    }

    async fn check_status(&self, delivery_id: &str) -> Result<DeliveryStatus, UpstreamError> {
        let url = format!("{}/deliveries/{delivery_id}", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(Self::map_failure(response).await);
        }

        let body = response
            .json::<DeliveryStatusBody>()
            .await
            .map_err(|e| UpstreamError::Other(format!("malformed status: {e}")))?;
        match body.status.as_str() {
            "decided" => Ok(DeliveryStatus::Decided(body.decisions)),
            _ => Ok(DeliveryStatus::Pending),
        }
    }
}

/// In-process transport with scriptable decisions.
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    auto_decision: Option<DecisionKind>,
    sent_items: Mutex<HashMap<String, Vec<String>>>,
    staged: Mutex<HashMap<String, Vec<ApprovalDecision>>>,
    staged_next: Mutex<Option<Vec<ApprovalDecision>>>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery is immediately decided Approved for all items:
    /// the demo-mode reviewer.
    pub fn auto_approving() -> Self {
        Self::auto_deciding(DecisionKind::Approved)
    }

    /// Every delivery is immediately decided with the given kind for all
    /// items.
    pub fn auto_deciding(kind: DecisionKind) -> Self {
        Self {
            auto_decision: Some(kind),
            ..Self::default()
        }
    }

    /// Script the decisions a future `check_status` will report for a
    /// request id.
    pub fn stage_decisions(&self, request_id: &str, decisions: Vec<ApprovalDecision>) {
        self.staged
            .lock()
            .unwrap()
            .insert(request_id.to_string(), decisions);
    }

    /// Script the decisions for whichever delivery is polled next; useful
    /// when the request id is generated by the caller.
    pub fn stage_next(&self, decisions: Vec<ApprovalDecision>) {
        *self.staged_next.lock().unwrap() = Some(decisions);
    }

    fn send(&self, payload: &ApprovalPayload) -> Result<String, UpstreamError> {
        let items = payload.outputs.iter().map(|o| o.id.clone()).collect();
        self.sent_items
            .lock()
            .unwrap()
            .insert(payload.request_id.clone(), items);
        Ok(payload.request_id.clone())
    }

    fn check_status(&self, delivery_id: &str) -> Result<DeliveryStatus, UpstreamError> {
        if let Some(decisions) = self.staged_next.lock().unwrap().take() {
            return Ok(DeliveryStatus::Decided(decisions));
        }
        if let Some(decisions) = self.staged.lock().unwrap().get(delivery_id) {
            return Ok(DeliveryStatus::Decided(decisions.clone()));
        }
        if let Some(kind) = &self.auto_decision {
            let sent = self.sent_items.lock().unwrap();
            if let Some(items) = sent.get(delivery_id) {
                let decisions = items
                    .iter()
                    .map(|id| ApprovalDecision::new(id.clone(), kind.clone(), "auto"))
                    .collect();
                return Ok(DeliveryStatus::Decided(decisions));
            }
        }
        Ok(DeliveryStatus::Pending)
    }
}
