//! Per-request activity logger.
//!
//! [`ActivityLogger`] is an extractor. Taking it as a handler argument arms
//! the duration timer and captures the request context (identity, client
//! IP, user agent, request id). The handler describes what it did with the
//! builder methods and finishes with exactly one terminal call:
//!
//! ```rust,ignore
//! async fn rename(logger: ActivityLogger, Json(body): Json<Rename>) -> AppResult<Json<Device>> {
//!     let before = devices.get(&body.id)?;
//!     let logger = logger
//!         .action(ActionType::Update, "device", &body.id)
//!         .before(&before);
//!
//!     match devices.rename(&body.id, &body.name) {
//!         Ok(after) => {
//!             logger.after(&after).record_success();
//!             Ok(Json(after))
//!         }
//!         Err(e) => {
//!             logger.record_error(e.to_string());
//!             Err(e)
//!         }
//!     }
//! }
//! ```
//!
//! Terminal methods consume the logger, so a record cannot be written twice.
//! Persistence runs on a tracked background task; its outcome never reaches
//! the handler.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::device::DeviceInfo;
use super::record::{ActionType, ActivityRecord, ActivityStatus, JsonMap};
use super::store::AuditStore;
use crate::auth::{CurrentIdentity, Identity};
use crate::metrics;
use crate::middleware::ip::{TrustedProxyConfig, resolve_client_ip};

/// Header carrying the correlation id set by the request-id layer.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared handle the logger persists through.
#[derive(Clone)]
pub struct AuditSink {
    store: Arc<dyn AuditStore>,
    tracker: TaskTracker,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("pending_writes", &self.tracker.len())
            .finish()
    }
}

impl AuditSink {
    pub fn new(
        store: Arc<dyn AuditStore>,
        tracker: TaskTracker,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self {
            store,
            tracker,
            trusted_proxies,
        }
    }

    /// Tracker owning in-flight audit writes.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }
}

/// Builder for one activity record.
#[derive(Debug)]
#[must_use = "an activity logger does nothing until record_success/record_error/record_failure is called"]
pub struct ActivityLogger {
    sink: AuditSink,
    identity: Option<Arc<Identity>>,
    ip_address: String,
    user_agent: Option<String>,
    request_id: Option<String>,
    started: Instant,
    action: ActionType,
    resource_type: Option<String>,
    resource_id: Option<String>,
    description: Option<String>,
    metadata: JsonMap,
    before: Option<JsonMap>,
    after: Option<JsonMap>,
    component_states: BTreeMap<String, String>,
}

impl ActivityLogger {
    /// Create a logger from already-known context. The timer starts now.
    pub fn new(
        sink: AuditSink,
        identity: Option<Arc<Identity>>,
        ip_address: impl Into<String>,
        user_agent: Option<String>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            sink,
            identity,
            ip_address: ip_address.into(),
            user_agent,
            request_id,
            started: Instant::now(),
            action: ActionType::View,
            resource_type: None,
            resource_id: None,
            description: None,
            metadata: JsonMap::new(),
            before: None,
            after: None,
            component_states: BTreeMap::new(),
        }
    }

    /// Capture context from request parts.
    pub fn from_parts(sink: AuditSink, parts: &Parts) -> Self {
        let identity = parts
            .extensions
            .get::<CurrentIdentity>()
            .map(|current| current.0.clone());
        let ip_address =
            resolve_client_ip(&parts.headers, &parts.extensions, &sink.trusted_proxies).into_owned();
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let user_agent = header(USER_AGENT.as_str());
        let request_id = header(REQUEST_ID_HEADER);

        Self::new(sink, identity, ip_address, user_agent, request_id)
    }

    /// Set the acting identity explicitly, e.g. right after a login exchange
    /// on a route that runs without the auth layer.
    pub fn identity(mut self, identity: Arc<Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn action(
        mut self,
        action: ActionType,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.action = action;
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a metadata entry. Values that fail to serialize are skipped.
    pub fn meta<V: Serialize + ?Sized>(mut self, key: impl Into<String>, value: &V) -> Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.metadata.insert(key, value);
            }
            Err(e) => warn!(key = %key, error = %e, "Dropping unserializable audit metadata"),
        }
        self
    }

    /// Snapshot the state before the operation.
    pub fn before<T: Serialize + ?Sized>(mut self, state: &T) -> Self {
        self.before = snapshot(state, "before");
        self
    }

    /// Snapshot the state after the operation.
    pub fn after<T: Serialize + ?Sized>(mut self, state: &T) -> Self {
        self.after = snapshot(state, "after");
        self
    }

    /// Record the state of a named sub-component (e.g. a circuit breaker).
    pub fn component_status(mut self, name: impl Into<String>, state: impl Into<String>) -> Self {
        self.component_states.insert(name.into(), state.into());
        self
    }

    pub fn record_success(self) -> Option<JoinHandle<()>> {
        self.finish(ActivityStatus::Success, None)
    }

    /// The operation broke.
    pub fn record_error(self, message: impl Into<String>) -> Option<JoinHandle<()>> {
        self.finish(ActivityStatus::Error, Some(message.into()))
    }

    /// The operation ran and was refused.
    pub fn record_failure(self, message: impl Into<String>) -> Option<JoinHandle<()>> {
        self.finish(ActivityStatus::Failed, Some(message.into()))
    }

    fn finish(self, status: ActivityStatus, error_message: Option<String>) -> Option<JoinHandle<()>> {
        let Some(identity) = self.identity else {
            debug!(action = self.action.as_str(), "No identity on request, audit record dropped");
            return None;
        };

        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let device = self
            .user_agent
            .as_deref()
            .map(DeviceInfo::from_user_agent)
            .unwrap_or_default();

        let record = ActivityRecord {
            id: Uuid::new_v4(),
            user_id: identity.id.clone(),
            username: identity.username.clone(),
            role: identity.role.clone(),
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            description: self.description,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            device,
            status,
            error_message,
            duration_ms,
            before: self.before,
            after: self.after,
            component_states: self.component_states,
            metadata: self.metadata,
            request_id: self.request_id,
            created_at: Utc::now(),
        };

        metrics::record_audit_record(status.as_str());
        let store = self.sink.store.clone();

        Some(self.sink.tracker.spawn(async move {
            if let Err(e) = store.create_log(&record).await {
                metrics::record_audit_persist_failure();
                error!(
                    record_id = %record.id,
                    user_id = %record.user_id,
                    action = record.action.as_str(),
                    error = %e,
                    "Failed to persist activity record"
                );
            }
        }))
    }
}

fn snapshot<T: Serialize + ?Sized>(state: &T, which: &'static str) -> Option<JsonMap> {
    match serde_json::to_value(state) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        Ok(other) => {
            warn!(snapshot = which, kind = json_kind(&other), "State snapshot is not an object, omitted");
            None
        }
        Err(e) => {
            warn!(snapshot = which, error = %e, "State snapshot failed to serialize, omitted");
            None
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl<S> FromRequestParts<S> for ActivityLogger
where
    AuditSink: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(AuditSink::from_ref(state), parts))
    }
}
