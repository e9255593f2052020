//! HTTP trigger for dispatch sweeps.
//!
//! External schedulers (a platform cron, a Kubernetes CronJob) call
//! `POST /cron/reminders` with the shared secret in `x-cron-secret`. The
//! response body is the sweep's [`DispatchSummary`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::dispatch::{DispatchSummary, ReminderDispatcher};
use crate::error::{Result, TrialwatchError};

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-cron-secret";

#[derive(Clone)]
struct TriggerState {
    dispatcher: Arc<ReminderDispatcher>,
    secret: Arc<str>,
}

/// Router exposing `POST /cron/reminders`.
///
/// An empty `secret` leaves the route mounted but answering 503.
pub fn router(dispatcher: Arc<ReminderDispatcher>, secret: &str) -> Router {
    let state = TriggerState {
        dispatcher,
        secret: Arc::from(secret),
    };
    Router::new()
        .route("/cron/reminders", post(handle_trigger))
        .with_state(state)
}

async fn handle_trigger(
    State(state): State<TriggerState>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    if state.secret.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "trigger secret not configured" })),
        );
    }

    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented != Some(&*state.secret) {
        warn!("rejected dispatch trigger with bad secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        );
    }

    match state.dispatcher.process_due_reminders(Utc::now()).await {
        Ok(summary) => (StatusCode::OK, Json(summary_json(&summary))),
        Err(e) => {
            error!("triggered dispatch sweep failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

fn summary_json(summary: &DispatchSummary) -> serde_json::Value {
    serde_json::to_value(summary).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

/// Running trigger server. Aborted on drop.
pub struct TriggerServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TriggerServer {
    /// Bind `bind` (port `0` picks a free port) and serve in the background.
    ///
    /// # Errors
    ///
    /// Returns [`TrialwatchError::Trigger`] if the listener cannot bind.
    pub async fn start(
        dispatcher: Arc<ReminderDispatcher>,
        bind: &str,
        secret: &str,
    ) -> Result<Self> {
        if secret.is_empty() {
            warn!("trigger secret is empty; /cron/reminders will answer 503");
        }
        let app = router(dispatcher, secret);

        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| TrialwatchError::Trigger(format!("bind {bind} failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| TrialwatchError::Trigger(format!("failed to get local addr: {e}")))?;

        info!("dispatch trigger listening on http://{addr}/cron/reminders");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("trigger server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for TriggerServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
