//! GraphQL subscription handler.
//!
//! Each subscribe request carries one GraphQL document; executing it against
//! the injected schema may open a live subscription, whose backend-assigned
//! id is tracked here so it can be deleted on unsubscribe. One channel may
//! hold several live subscriptions (one per distinct query).

use std::sync::Arc;

use async_trait::async_trait;
use cable_core::errors::BoxError;
use cable_core::{CableError, LogPayload, SubscriptionId};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::websocket::channel::Channel;

/// Typed subscribe request, parsed loudly from the envelope data.
#[derive(Clone, Debug, Deserialize)]
pub struct GraphqlRequest {
    /// The GraphQL document. Required.
    pub query: String,
    /// Operation variables; defaults to an empty object.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Operation name, for documents with several operations.
    #[serde(rename = "operationName", default)]
    pub operation_name: Option<String>,
}

/// What the schema-execution backend produced for one request.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOutcome {
    /// The execution result payload.
    pub result: Value,
    /// Whether more data is expected on this subscription.
    pub more: bool,
    /// Id of the live subscription, when the document opened one.
    pub subscription_id: Option<SubscriptionId>,
}

/// Schema-execution capability injected by the host application.
#[async_trait]
pub trait SubscriptionExecutor: Send + Sync {
    /// Execute one GraphQL document.
    async fn execute(&self, request: &GraphqlRequest) -> Result<ExecutionOutcome, BoxError>;

    /// Delete one live subscription.
    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), BoxError>;
}

/// GraphQL variant of the channel handler.
pub struct GraphqlHandler {
    executor: Arc<dyn SubscriptionExecutor>,
    subscription_ids: Vec<SubscriptionId>,
}

impl GraphqlHandler {
    /// New handler bound to the given executor.
    #[must_use]
    pub fn new(executor: Arc<dyn SubscriptionExecutor>) -> Self {
        Self {
            executor,
            subscription_ids: Vec::new(),
        }
    }

    /// Ids of the live subscriptions this channel holds.
    #[must_use]
    pub fn subscription_ids(&self) -> &[SubscriptionId] {
        &self.subscription_ids
    }

    /// Parse, execute, track, and reply over the owning channel.
    pub async fn subscribe(&mut self, channel: &Channel, data: &Value) -> Result<(), CableError> {
        let request: GraphqlRequest = serde_json::from_value(data.clone())
            .map_err(|e| CableError::InvalidRequest(e.to_string()))?;

        let outcome = self
            .executor
            .execute(&request)
            .await
            .map_err(CableError::ExecutionFailed)?;

        let created = outcome.subscription_id.is_some();
        if let Some(id) = outcome.subscription_id {
            self.subscription_ids.push(id);
        }

        channel.reply(&json!({
            "result": outcome.result,
            "more": outcome.more,
        }))?;

        channel
            .log_payload()
            .with_param(
                "operation_name",
                request.operation_name.unwrap_or_default(),
            )
            .with_param("subscription_created", created)
            .info("graphql subscription established");

        Ok(())
    }

    /// Best-effort deletion of every tracked subscription.
    ///
    /// Individual failures are logged and do not abort the rest; the list
    /// is cleared unconditionally.
    pub async fn unsubscribe(&mut self, log: &LogPayload) {
        let count = self.subscription_ids.len();
        for id in self.subscription_ids.drain(..) {
            if let Err(err) = self.executor.delete_subscription(&id).await {
                log.clone()
                    .with_param("subscription_id", id.as_str())
                    .error("failed to delete graphql subscription", &err);
            }
        }
        if count > 0 {
            log.clone()
                .with_param("subscription_count", count)
                .info("graphql subscriptions cleaned up");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
